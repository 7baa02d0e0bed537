//! Numerical helpers for correction functions.

pub mod spline;

pub use spline::*;
