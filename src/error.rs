//! Error types for mail-actions.
//!
//! Most failures inside a pipeline run are captured as outcome values
//! (`DispatchResult`, `AuditOutcome`, `ReconcileOutcome`) rather than
//! errors. The types here cover startup, configuration and the raw
//! persistence layer.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Rules error: {0}")]
    Rules(#[from] RulesError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed request: {0}")]
    Request(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid field name: {0}")]
    InvalidField(String),
}

/// Rule table loading errors.
///
/// Only surfaced by the strict loader. `RuleTable::load_or_empty` turns
/// these into an empty table.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("Failed to read rule file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rule file: {0}")]
    Parse(String),
}

/// Pipeline boundary errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid email payload: {0}")]
    InvalidEmail(String),

    #[error("No escalated decision for review token {0}")]
    UnknownToken(String),

    #[error("No intake record for message {0}")]
    IntakeMissing(String),

    #[error("Review feedback needs a store")]
    StoreRequired,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
