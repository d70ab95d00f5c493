//! Store error types.

/// Unified error type for repository implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("record not found: {id}")]
    NotFound { id: String },

    /// The record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for backend-specific failures.
    #[error("store error: {reason}")]
    Backend { reason: String },
}

/// Convenience alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;
