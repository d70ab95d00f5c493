//! Core error types.
//!
//! All event-model and bus failures surface through [`CoreError`], the single
//! error type returned by every public API in this crate.  Each variant maps
//! to one of the wire error codes exposed to transports via
//! [`CoreError::code`].

/// Unified error type for the agentflow core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // -- Bus errors ---------------------------------------------------------
    /// The event bus has been closed and no longer accepts emissions.
    #[error("event bus is closed")]
    BusClosed,

    /// A bus lock was poisoned by a panicking holder.
    #[error("bus state poisoned: {what}")]
    Poisoned { what: &'static str },

    // -- Serialization ------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An event arrived in a shape that cannot be mapped onto the canonical
    /// wire form (e.g. a non-object payload or a missing type tag).
    #[error("malformed wire event: {reason}")]
    MalformedWireEvent { reason: String },
}

impl CoreError {
    /// The stable wire code for this error, suitable for transports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BusClosed => "BUS_CLOSED",
            Self::Poisoned { .. } => "UNKNOWN_ERROR",
            Self::Serialization(_) | Self::MalformedWireEvent { .. } => "PARSE_ERROR",
        }
    }
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;
