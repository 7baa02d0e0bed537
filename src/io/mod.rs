//! Input/output helpers.
//!
//! - JSON load configuration (`config`)
//! - JSON histogram files for hist-content datasets (`hist`)
//! - per-sample event CSV export (`export`)

pub mod config;
pub mod export;
pub mod hist;

pub use config::*;
pub use export::*;
pub use hist::*;
