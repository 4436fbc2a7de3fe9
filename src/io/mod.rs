//! Input/output helpers.
//!
//! - raw and canonical CSV caches (`export`)
//! - schema bundle and model JSON (`artifacts`)

pub mod artifacts;
pub mod export;

pub use artifacts::*;
pub use export::*;
