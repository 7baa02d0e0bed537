//! `evload` library crate.
//!
//! The binary (`evload`) is a thin wrapper around this library so that:
//!
//! - the pipeline is testable without spawning processes
//! - downstream consumers (fitters, plotters) can drive the loader directly

pub mod app;
pub mod cli;
pub mod data;
pub mod debug;
pub mod domain;
pub mod error;
pub mod expr;
pub mod fit;
pub mod io;
pub mod load;
pub mod math;
pub mod report;
pub mod source;
