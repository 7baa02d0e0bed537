//! Downstream consumers of the loaded structures.
//!
//! - parameter propagation through the event-dial cache (`propagate`)
//! - per-bin weight sums per sample (`histogram`)

pub mod histogram;
pub mod propagate;

pub use histogram::*;
pub use propagate::*;
