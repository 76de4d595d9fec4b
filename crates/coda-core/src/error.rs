//! Unified error types for Coda

use thiserror::Error;

/// Unified error type for all Coda operations
#[derive(Error, Debug)]
pub enum CodaError {
    // Patch errors
    #[error("Patch fragment not found: {0}")]
    PatchNotFound(String),

    #[error("Patch fragment matches {matches} times (must be unique): {fragment}")]
    PatchAmbiguous { fragment: String, matches: usize },

    #[error("Replacement {0} has an empty original fragment")]
    EmptyFragment(usize),

    // Collaborator errors
    #[error("API error: {0}")]
    Api(String),

    #[error("API limit: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid collaborator response: {0}")]
    InvalidResponse(String),

    // Process errors
    #[error("Process error: {0}")]
    Process(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl CodaError {
    /// Whether this error came from locating or applying a replacement set.
    ///
    /// The verification loop counts these exactly like a failed generation call.
    pub fn is_patch_error(&self) -> bool {
        matches!(
            self,
            CodaError::PatchNotFound(_)
                | CodaError::PatchAmbiguous { .. }
                | CodaError::EmptyFragment(_)
        )
    }
}

/// Result type alias using CodaError
pub type Result<T> = std::result::Result<T, CodaError>;
