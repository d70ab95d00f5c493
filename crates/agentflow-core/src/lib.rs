//! agentflow core.
//!
//! This crate provides the foundational pieces of the agentflow runtime:
//!
//! - **[`event`]** -- the four-layer event model (stream, state, message,
//!   exchange) and the canonical wire form.
//! - **[`message`]** -- the role-tagged message model.
//! - **[`bus`]** -- the single in-process publish/subscribe channel with
//!   producer/consumer views.
//! - **[`error`]** -- unified core error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod bus;
pub mod error;
pub mod event;
pub mod message;

// Re-export the most commonly used types at the crate root for convenience.
pub use bus::{BusConsumer, BusProducer, EventBus, EventHandler, HandlerResult, SubscriptionHandle};
pub use error::{CoreError, Result};
pub use event::{Event, EventLayer, EventPayload, EventType, StopReason};
pub use message::{
    ContentPart, ErrorCategory, Message, MessageBody, Role, Severity, ToolCallPart, ToolOutput,
    ToolResultPart, Usage, UserContent,
};
