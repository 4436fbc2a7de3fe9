//! Error taxonomy for the ingestion, storage and modelling pipeline.
//!
//! Structural failures are surfaced unmodified to the caller. Value-level
//! numeric coercion failures never appear here: they degrade to nulls in the
//! normalizer and the store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Table '{0}' already exists")]
    TableAlreadyExists(String),

    #[error("Table '{0}' not found. Run `agri collect` or `agri import` first.")]
    TableNotFound(String),

    #[error("Feature schema mismatch: {0}")]
    FeatureSchemaMismatch(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Model error: {0}")]
    Model(String),
}

impl AppError {
    /// Process exit code for the `agri` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) => 2,
            AppError::EmptyResult(_)
            | AppError::NotFound(_)
            | AppError::SchemaMismatch(_)
            | AppError::MissingColumns(_)
            | AppError::InsufficientData(_)
            | AppError::Io(_) => 3,
            AppError::UpstreamUnavailable(_) => 4,
            AppError::TableAlreadyExists(_) | AppError::TableNotFound(_) | AppError::Storage(_) => 5,
            AppError::FeatureSchemaMismatch(_) | AppError::Artifact(_) | AppError::Model(_) => 6,
        }
    }
}

// Library errors collapse into the message-carrying variant of their exit-code
// category; `#[from]` would need one variant per source type.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::Io(format!("CSV error: {err}"))
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Artifact(err.to_string())
    }
}
