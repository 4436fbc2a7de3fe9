//! Data acquisition.
//!
//! This module contains:
//! - FAOSTAT API client (`faostat`)
//! - CSV file adapter (`csv_source`)
//! - the untyped table both produce (`raw`)
//! - per-source column mappings (`sources`)

pub mod csv_source;
pub mod faostat;
pub mod raw;
pub mod sources;

pub use csv_source::load_csv;
pub use faostat::{FaostatClient, FaostatQuery};
pub use raw::RawTable;
pub use sources::{Source, load_source};
