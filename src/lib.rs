//! `agri-yield` library crate.
//!
//! The binary (`agri`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - pipelines are reusable outside the CLI (schedulers, notebooks, etc.)
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod features;
pub mod io;
pub mod math;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod report;
pub mod store;
