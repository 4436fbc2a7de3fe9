//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - timestamps and observations (`Timestamp`, `Observation`)
//! - the canonical long-format dataset (`CanonicalDataset`)
//! - storage-facing enums (`WriteMode`, `ColumnType`)

pub mod types;

pub use types::*;
