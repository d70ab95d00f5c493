//! Driver seam.
//!
//! A driver turns a backend protocol into the canonical stream event
//! sequence: `message_start`, one or more content blocks framed by their
//! start/stop events, then `message_stop`.  Anything exposing this surface
//! can back an agent -- an LLM SDK wrapper, a scripted replay, or another
//! agent entirely.

pub mod adapter;
pub mod base;
pub mod replay;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use futures::stream::BoxStream;

use agentflow_core::event::EventPayload;
use agentflow_core::message::{Message, Usage};
use agentflow_core::StopReason;

use crate::error::Result;

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// A stream-layer event produced by a driver, before envelope stamping.
///
/// Mirrors the stream layer of the bus 1:1; the driver adapter wraps each one
/// into an enveloped bus event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The backend started producing a message.
    MessageStart { message_id: String, model: String },

    /// Mid-message metadata update.
    MessageDelta {
        stop_reason: Option<StopReason>,
        usage: Option<Usage>,
    },

    /// The message is complete.
    MessageStop {
        stop_reason: Option<StopReason>,
        usage: Option<Usage>,
    },

    /// A text content block opened.
    TextContentBlockStart { index: u32 },

    /// A chunk of text for an open block.
    TextDelta { index: u32, text: String },

    /// A text content block closed.
    TextContentBlockStop { index: u32 },

    /// A tool-use content block opened.
    ToolUseContentBlockStart { index: u32, id: String, name: String },

    /// A chunk of the tool input JSON.
    InputJsonDelta { index: u32, partial_json: String },

    /// A tool-use content block closed.
    ToolUseContentBlockStop { index: u32, id: String },

    /// The backend failed mid-stream.
    ErrorReceived {
        message: String,
        error_code: Option<String>,
    },
}

impl From<StreamEvent> for EventPayload {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::MessageStart { message_id, model } => {
                Self::MessageStart { message_id, model }
            }
            StreamEvent::MessageDelta { stop_reason, usage } => {
                Self::MessageDelta { stop_reason, usage }
            }
            StreamEvent::MessageStop { stop_reason, usage } => {
                Self::MessageStop { stop_reason, usage }
            }
            StreamEvent::TextContentBlockStart { index } => Self::TextContentBlockStart { index },
            StreamEvent::TextDelta { index, text } => Self::TextDelta { index, text },
            StreamEvent::TextContentBlockStop { index } => Self::TextContentBlockStop { index },
            StreamEvent::ToolUseContentBlockStart { index, id, name } => {
                Self::ToolUseContentBlockStart { index, id, name }
            }
            StreamEvent::InputJsonDelta {
                index,
                partial_json,
            } => Self::InputJsonDelta {
                index,
                partial_json,
            },
            StreamEvent::ToolUseContentBlockStop { index, id } => {
                Self::ToolUseContentBlockStop { index, id }
            }
            StreamEvent::ErrorReceived {
                message,
                error_code,
            } => Self::ErrorReceived {
                message,
                error_code,
            },
        }
    }
}

impl TryFrom<EventPayload> for StreamEvent {
    type Error = EventPayload;

    /// Recover the stream-layer form of a payload; higher-layer payloads are
    /// handed back unchanged.
    fn try_from(payload: EventPayload) -> std::result::Result<Self, EventPayload> {
        match payload {
            EventPayload::MessageStart { message_id, model } => {
                Ok(Self::MessageStart { message_id, model })
            }
            EventPayload::MessageDelta { stop_reason, usage } => {
                Ok(Self::MessageDelta { stop_reason, usage })
            }
            EventPayload::MessageStop { stop_reason, usage } => {
                Ok(Self::MessageStop { stop_reason, usage })
            }
            EventPayload::TextContentBlockStart { index } => {
                Ok(Self::TextContentBlockStart { index })
            }
            EventPayload::TextDelta { index, text } => Ok(Self::TextDelta { index, text }),
            EventPayload::TextContentBlockStop { index } => {
                Ok(Self::TextContentBlockStop { index })
            }
            EventPayload::ToolUseContentBlockStart { index, id, name } => {
                Ok(Self::ToolUseContentBlockStart { index, id, name })
            }
            EventPayload::InputJsonDelta {
                index,
                partial_json,
            } => Ok(Self::InputJsonDelta {
                index,
                partial_json,
            }),
            EventPayload::ToolUseContentBlockStop { index, id } => {
                Ok(Self::ToolUseContentBlockStop { index, id })
            }
            EventPayload::ErrorReceived {
                message,
                error_code,
            } => Ok(Self::ErrorReceived {
                message,
                error_code,
            }),
            other => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver trait
// ---------------------------------------------------------------------------

/// A lazy sequence of stream events from one `send_message` call.
pub type StreamEventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// The outbound side of a `send_message` call: one user message, or an
/// ongoing sequence for backends that hold a multi-turn conversation open.
pub enum DriverInput {
    /// A single user message.
    Message(Box<Message>),
    /// An ongoing sequence of user messages.
    Conversation(BoxStream<'static, Message>),
}

impl From<Message> for DriverInput {
    fn from(message: Message) -> Self {
        Self::Message(Box::new(message))
    }
}

/// Stream source for an agent.
///
/// Implementations must frame every response as `message_start`, at least one
/// content block with matching start/stop events, then `message_stop`.
/// `abort` cancels in-flight production while leaving the driver usable;
/// `destroy` releases resources irreversibly.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Logical conversation identity.
    fn session_id(&self) -> &str;

    /// Backend-assigned resumption token; absent until the backend hands one
    /// out (typically after the first exchange).
    fn driver_session_id(&self) -> Option<String>;

    /// Send outbound input and produce the resulting stream events lazily.
    async fn send_message(&self, input: DriverInput) -> Result<StreamEventStream>;

    /// Cancel the in-flight `send_message`, if any.  The driver remains
    /// usable afterwards.
    async fn abort(&self);

    /// Release resources.  Further calls on the driver are not permitted.
    async fn destroy(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_event_payload_roundtrip() {
        let events = vec![
            StreamEvent::MessageStart {
                message_id: "m1".into(),
                model: "x".into(),
            },
            StreamEvent::TextDelta {
                index: 0,
                text: "Hel".into(),
            },
            StreamEvent::ToolUseContentBlockStop {
                index: 1,
                id: "t1".into(),
            },
            StreamEvent::MessageStop {
                stop_reason: Some(StopReason::EndTurn),
                usage: None,
            },
        ];

        for event in events {
            let payload: EventPayload = event.clone().into();
            let back = StreamEvent::try_from(payload).expect("stream payload maps back");
            assert_eq!(back, event);
        }
    }

    #[test]
    fn higher_layer_payloads_are_rejected() {
        assert!(StreamEvent::try_from(EventPayload::AgentReady).is_err());
        assert!(StreamEvent::try_from(EventPayload::ConversationInterrupted).is_err());
    }
}
