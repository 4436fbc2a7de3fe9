//! Regression models.
//!
//! Only ordinary least squares for now; fitting works on the standardized
//! feature matrix produced by `features`.

pub mod linear;

pub use linear::*;
