//! Runtime error types.
//!
//! All runtime subsystems surface errors through [`EngineError`].  Lifecycle
//! errors (engine used before initialize, after destroy, empty input) are the
//! only class raised to callers of public methods; transport and parse
//! failures travel the bus as events instead.

use agentflow_core::CoreError;

/// Unified error type for the agent runtime.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // -- Lifecycle errors ---------------------------------------------------
    /// The engine has not been initialized yet.
    #[error("engine is not initialized")]
    NotInitialized,

    /// The engine has been destroyed and no longer accepts work.
    #[error("engine is destroyed")]
    Destroyed,

    /// The user message carried no substantive content.
    #[error("message must not be empty")]
    EmptyMessage,

    // -- Driver errors ------------------------------------------------------
    /// The in-flight request was aborted by the caller.
    #[error("driver request aborted")]
    Aborted,

    /// The backend rejected the request due to rate limiting.
    #[error("rate limited: {reason}")]
    RateLimited { reason: String },

    /// The driver failed to produce or continue a stream.
    #[error("driver error: {reason}")]
    Driver { reason: String },

    /// A connection-level failure between driver and backend.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    // -- Parse errors -------------------------------------------------------
    /// Accumulated data could not be parsed into the expected shape.
    #[error("parse error: {reason}")]
    Parse { reason: String },

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Upstream crate errors ----------------------------------------------
    /// An error propagated from the core crate.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    // -- Shared state -------------------------------------------------------
    /// Shared runtime state was poisoned by a panicking holder.
    #[error("shared state poisoned: {what}")]
    Poisoned { what: &'static str },

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal runtime error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The stable wire code for this error, suitable for transports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "ENGINE_NOT_INITIALIZED",
            Self::Destroyed => "ENGINE_DESTROYED",
            Self::EmptyMessage => "EMPTY_MESSAGE",
            Self::Aborted => "DRIVER_ABORTED",
            Self::RateLimited { .. } => "RATE_LIMIT",
            Self::Driver { .. } | Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Parse { .. } | Self::Json(_) => "PARSE_ERROR",
            Self::Core(inner) => inner.code(),
            Self::Poisoned { .. } | Self::Internal(_) => "UNKNOWN_ERROR",
        }
    }
}

/// Convenience alias used throughout the runtime crate.
pub type Result<T> = std::result::Result<T, EngineError>;
