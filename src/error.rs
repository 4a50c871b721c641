//! Error types for the signup funnel.

use uuid::Uuid;

use crate::catalog::StepKey;

/// Top-level error type for the funnel.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Funnel error: {0}")]
    Funnel(#[from] FunnelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid step catalog: {0}")]
    InvalidCatalog(String),
}

/// Persistence-layer errors.
///
/// `NotFound` covers both an absent snapshot and a corrupt one — callers
/// treat the two identically and start a fresh session.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No persisted state for session {session_id}")]
    NotFound { session_id: Uuid },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Recoverable funnel outcomes surfaced as typed errors.
#[derive(Debug, thiserror::Error)]
pub enum FunnelError {
    #[error("Step {step} is missing required fields: {}", missing.join(", "))]
    IncompleteStep { step: StepKey, missing: Vec<String> },

    #[error("Already at the first step")]
    AtStart,

    #[error("Verification already in progress for session {session_id}")]
    AlreadyInProgress { session_id: Uuid },

    #[error("Step {0} is not in the catalog")]
    UnknownStep(StepKey),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for the funnel.
pub type Result<T> = std::result::Result<T, Error>;
