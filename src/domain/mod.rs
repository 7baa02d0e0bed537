//! Data model of a load run.
//!
//! - configuration types (`types`)
//! - stored events and containers (`event`)
//! - bins and first-match bin search (`binning`)
//! - samples (`sample`)
//! - dials, the dial factory and dial collections (`dial`)

pub mod binning;
pub mod dial;
pub mod event;
pub mod sample;
pub mod types;

pub use binning::*;
pub use dial::*;
pub use event::*;
pub use sample::*;
pub use types::*;
