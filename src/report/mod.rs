//! Reporting: terminal tables for load runs.

pub mod format;

pub use format::*;
