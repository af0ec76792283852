//! Error types for the intake wizard.

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Record storage errors, raised by both the libSQL backend and the HTTP
/// record client.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Record server request failed: {0}")]
    Transport(String),
}

/// Local session cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced to the host by the wizard.
///
/// Every low-level failure is classified into one of these kinds before it
/// leaves the wizard layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WizardError {
    #[error("Unknown step key: {key}")]
    InvalidStepKey { key: String },

    #[error("No session found for {lookup}")]
    SessionNotFound { lookup: String },

    #[error("Session expired or invalid: {reason}")]
    SessionExpiredOrInvalid { reason: String },

    #[error("Precondition failed: {reason}")]
    PreconditionFailed { reason: String },

    #[error("Transient IO failure during {operation}: {reason}")]
    TransientIo { operation: String, reason: String },

    #[error("Step {step} failed validation: {reason}")]
    StepValidation { step: String, reason: String },

    #[error("No active session; bootstrap first")]
    NoActiveSession,

    #[error("Bootstrap superseded by a newer request")]
    Superseded,
}

impl WizardError {
    /// Classify a storage failure that happened while running `operation`.
    pub fn transient(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::TransientIo {
            operation: operation.to_string(),
            reason: err.to_string(),
        }
    }

    /// Whether the host can reasonably retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo { .. } | Self::Superseded)
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
