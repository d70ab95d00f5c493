//! Event model.
//!
//! Every event that flows through the bus shares an envelope (uuid, agent id,
//! timestamp) and carries one [`EventPayload`] from one of four layers:
//!
//! - **stream** -- fine-grained deltas produced by the driver;
//! - **state** -- agent lifecycle and activity transitions;
//! - **message** -- fully assembled user/assistant/tool-use/error messages;
//! - **exchange** -- request/response pairs with duration, usage, and cost.
//!
//! On the wire an event is the JSON object
//! `{type, uuid, agentId, timestamp, data, index?}`: the snake_case type tag,
//! millisecond-epoch timestamp, camelCase payload fields under `data`, and
//! the content-block index (when the event has one) hoisted to the top level.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::ser::{Error as _, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::message::{Message, Usage};

// ---------------------------------------------------------------------------
// Stop reasons
// ---------------------------------------------------------------------------

/// Why the backend stopped producing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model finished its turn.
    EndTurn,
    /// The token budget was exhausted.
    MaxTokens,
    /// A configured stop sequence was hit.
    StopSequence,
    /// The model wants tool results before continuing; the turn is not over.
    ToolUse,
    /// A reason this core does not recognize.
    #[serde(other)]
    Unknown,
}

impl StopReason {
    /// Whether this reason terminates the conversation turn.
    ///
    /// `tool_use` does not: the backend continues after tool results arrive.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::EndTurn | Self::MaxTokens | Self::StopSequence)
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The layer-tagged payload of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventPayload {
    // -- Stream layer -------------------------------------------------------
    /// The backend started producing a message.
    MessageStart { message_id: String, model: String },

    /// Mid-message metadata update (stop reason, usage).
    MessageDelta {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// The message is complete.
    MessageStop {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// A text content block opened at `index`.
    TextContentBlockStart { index: u32 },

    /// A chunk of text for the block at `index`.
    TextDelta { index: u32, text: String },

    /// The text block at `index` closed.
    TextContentBlockStop { index: u32 },

    /// A tool-use content block opened at `index`.
    ToolUseContentBlockStart { index: u32, id: String, name: String },

    /// A chunk of the tool input JSON for the block at `index`.
    InputJsonDelta { index: u32, partial_json: String },

    /// The tool-use block at `index` closed.
    ToolUseContentBlockStop { index: u32, id: String },

    /// The driver failed while producing the stream.
    ErrorReceived {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },

    // -- State layer --------------------------------------------------------
    /// The engine started initializing.
    AgentInitializing,

    /// The engine finished initializing and accepts messages.
    AgentReady,

    /// The engine was destroyed.
    AgentDestroyed,

    /// A conversation turn began.
    ConversationStart { message_id: String },

    /// The agent is waiting on the backend.
    ConversationThinking,

    /// The agent is producing output.
    ConversationResponding,

    /// The conversation turn ended.
    ConversationEnd { reason: StopReason },

    /// The caller cancelled the current exchange.
    ConversationInterrupted,

    /// The backend announced an upcoming tool invocation.
    ToolPlanned { tool_id: String, tool_name: String },

    /// The tool invocation is in flight.
    ToolExecuting {
        tool_id: String,
        tool_name: String,
        input: Value,
    },

    /// An external executor reported tool success.
    ToolCompleted { tool_id: String, result: Value },

    /// An external executor reported tool failure.
    ToolFailed { tool_id: String, error: String },

    /// A failure was lifted into the state layer.
    ErrorOccurred {
        code: String,
        message: String,
        recoverable: bool,
    },

    // -- Message layer ------------------------------------------------------
    /// A complete user message.
    UserMessage { message: Message },

    /// A complete assistant message.
    AssistantMessage { message: Message },

    /// A complete tool-use message.
    ToolUseMessage { message: Message },

    /// A user-visible error message.
    ErrorMessage { message: Message },

    // -- Exchange layer -----------------------------------------------------
    /// A user request opened an exchange.
    ExchangeRequest {
        exchange_id: Uuid,
        user_message: Message,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        requested_at: DateTime<Utc>,
    },

    /// The assistant response that closed an exchange, with metrics.
    ExchangeResponse {
        exchange_id: Uuid,
        assistant_message: Message,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        responded_at: DateTime<Utc>,
        duration_ms: i64,
        usage: Usage,
        cost_usd: f64,
    },
}

impl EventPayload {
    /// The tag identifying this payload's variant.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::MessageStart { .. } => EventType::MessageStart,
            Self::MessageDelta { .. } => EventType::MessageDelta,
            Self::MessageStop { .. } => EventType::MessageStop,
            Self::TextContentBlockStart { .. } => EventType::TextContentBlockStart,
            Self::TextDelta { .. } => EventType::TextDelta,
            Self::TextContentBlockStop { .. } => EventType::TextContentBlockStop,
            Self::ToolUseContentBlockStart { .. } => EventType::ToolUseContentBlockStart,
            Self::InputJsonDelta { .. } => EventType::InputJsonDelta,
            Self::ToolUseContentBlockStop { .. } => EventType::ToolUseContentBlockStop,
            Self::ErrorReceived { .. } => EventType::ErrorReceived,
            Self::AgentInitializing => EventType::AgentInitializing,
            Self::AgentReady => EventType::AgentReady,
            Self::AgentDestroyed => EventType::AgentDestroyed,
            Self::ConversationStart { .. } => EventType::ConversationStart,
            Self::ConversationThinking => EventType::ConversationThinking,
            Self::ConversationResponding => EventType::ConversationResponding,
            Self::ConversationEnd { .. } => EventType::ConversationEnd,
            Self::ConversationInterrupted => EventType::ConversationInterrupted,
            Self::ToolPlanned { .. } => EventType::ToolPlanned,
            Self::ToolExecuting { .. } => EventType::ToolExecuting,
            Self::ToolCompleted { .. } => EventType::ToolCompleted,
            Self::ToolFailed { .. } => EventType::ToolFailed,
            Self::ErrorOccurred { .. } => EventType::ErrorOccurred,
            Self::UserMessage { .. } => EventType::UserMessage,
            Self::AssistantMessage { .. } => EventType::AssistantMessage,
            Self::ToolUseMessage { .. } => EventType::ToolUseMessage,
            Self::ErrorMessage { .. } => EventType::ErrorMessage,
            Self::ExchangeRequest { .. } => EventType::ExchangeRequest,
            Self::ExchangeResponse { .. } => EventType::ExchangeResponse,
        }
    }

    /// The content-block index, for payloads scoped to one block.
    pub fn index(&self) -> Option<u32> {
        match self {
            Self::TextContentBlockStart { index }
            | Self::TextDelta { index, .. }
            | Self::TextContentBlockStop { index }
            | Self::ToolUseContentBlockStart { index, .. }
            | Self::InputJsonDelta { index, .. }
            | Self::ToolUseContentBlockStop { index, .. } => Some(*index),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Event type tags
// ---------------------------------------------------------------------------

/// The abstraction layer an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventLayer {
    Stream,
    State,
    Message,
    Exchange,
}

macro_rules! event_types {
    ($( $variant:ident => $tag:literal, $layer:ident; )*) => {
        /// Copyable tag identifying an event variant, used for subscription
        /// filtering and for the wire `type` field.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventType {
            $( $variant, )*
        }

        impl EventType {
            /// The snake_case wire name of this event type.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $tag, )*
                }
            }

            /// The layer this event type belongs to.
            pub fn layer(self) -> EventLayer {
                match self {
                    $( Self::$variant => EventLayer::$layer, )*
                }
            }
        }

        impl FromStr for EventType {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $( $tag => Ok(Self::$variant), )*
                    other => Err(CoreError::MalformedWireEvent {
                        reason: format!("unknown event type: {other}"),
                    }),
                }
            }
        }
    };
}

event_types! {
    MessageStart => "message_start", Stream;
    MessageDelta => "message_delta", Stream;
    MessageStop => "message_stop", Stream;
    TextContentBlockStart => "text_content_block_start", Stream;
    TextDelta => "text_delta", Stream;
    TextContentBlockStop => "text_content_block_stop", Stream;
    ToolUseContentBlockStart => "tool_use_content_block_start", Stream;
    InputJsonDelta => "input_json_delta", Stream;
    ToolUseContentBlockStop => "tool_use_content_block_stop", Stream;
    ErrorReceived => "error_received", Stream;
    AgentInitializing => "agent_initializing", State;
    AgentReady => "agent_ready", State;
    AgentDestroyed => "agent_destroyed", State;
    ConversationStart => "conversation_start", State;
    ConversationThinking => "conversation_thinking", State;
    ConversationResponding => "conversation_responding", State;
    ConversationEnd => "conversation_end", State;
    ConversationInterrupted => "conversation_interrupted", State;
    ToolPlanned => "tool_planned", State;
    ToolExecuting => "tool_executing", State;
    ToolCompleted => "tool_completed", State;
    ToolFailed => "tool_failed", State;
    ErrorOccurred => "error_occurred", State;
    UserMessage => "user_message", Message;
    AssistantMessage => "assistant_message", Message;
    ToolUseMessage => "tool_use_message", Message;
    ErrorMessage => "error_message", Message;
    ExchangeRequest => "exchange_request", Exchange;
    ExchangeResponse => "exchange_response", Exchange;
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One event on the bus: envelope plus layer-tagged payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Unique event identifier.
    pub uuid: Uuid,
    /// The agent this event belongs to.
    pub agent_id: Uuid,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Layer-tagged payload.
    pub payload: EventPayload,
}

impl Event {
    /// Create an event stamped with a fresh uuid and the current time.
    pub fn new(agent_id: Uuid, payload: EventPayload) -> Self {
        Self {
            uuid: Uuid::now_v7(),
            agent_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// The tag identifying this event's payload variant.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// The layer this event belongs to.
    pub fn layer(&self) -> EventLayer {
        self.event_type().layer()
    }

    /// Serialize to the canonical wire object.
    pub fn to_wire(&self) -> Result<Value> {
        let mut payload = serde_json::to_value(&self.payload)?;
        let fields = payload
            .as_object_mut()
            .ok_or_else(|| CoreError::MalformedWireEvent {
                reason: "payload did not serialize to an object".into(),
            })?;
        let type_tag = fields
            .remove("type")
            .ok_or_else(|| CoreError::MalformedWireEvent {
                reason: "payload is missing its type tag".into(),
            })?;
        let index = fields.remove("index");

        let mut wire = Map::new();
        wire.insert("type".into(), type_tag);
        wire.insert("uuid".into(), Value::String(self.uuid.to_string()));
        wire.insert("agentId".into(), Value::String(self.agent_id.to_string()));
        wire.insert(
            "timestamp".into(),
            Value::from(self.timestamp.timestamp_millis()),
        );
        wire.insert("data".into(), Value::Object(std::mem::take(fields)));
        if let Some(index) = index {
            wire.insert("index".into(), index);
        }
        Ok(Value::Object(wire))
    }

    /// Parse an event from the canonical wire object.
    pub fn from_wire(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::MalformedWireEvent {
                reason: "wire event must be a JSON object".into(),
            })?;

        let field = |name: &str| {
            obj.get(name).ok_or_else(|| CoreError::MalformedWireEvent {
                reason: format!("missing field: {name}"),
            })
        };

        let uuid = Uuid::parse_str(field("uuid")?.as_str().unwrap_or_default()).map_err(|e| {
            CoreError::MalformedWireEvent {
                reason: format!("invalid uuid: {e}"),
            }
        })?;
        let agent_id = Uuid::parse_str(field("agentId")?.as_str().unwrap_or_default()).map_err(
            |e| CoreError::MalformedWireEvent {
                reason: format!("invalid agentId: {e}"),
            },
        )?;
        let millis =
            field("timestamp")?
                .as_i64()
                .ok_or_else(|| CoreError::MalformedWireEvent {
                    reason: "timestamp must be a millisecond epoch integer".into(),
                })?;
        let timestamp = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| CoreError::MalformedWireEvent {
                reason: format!("timestamp out of range: {millis}"),
            })?;

        // Reassemble the internally tagged payload object.
        let mut data = match obj.get("data") {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(CoreError::MalformedWireEvent {
                    reason: format!("data must be an object, got: {other}"),
                });
            }
            None => Map::new(),
        };
        data.insert("type".into(), field("type")?.clone());
        if let Some(index) = obj.get("index") {
            data.insert("index".into(), index.clone());
        }
        let payload: EventPayload = serde_json::from_value(Value::Object(data))?;

        Ok(Self {
            uuid,
            agent_id,
            timestamp,
            payload,
        })
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let wire = self.to_wire().map_err(S::Error::custom)?;
        let obj = wire.as_object().expect("to_wire returns an object");
        let mut map = serializer.serialize_map(Some(obj.len()))?;
        for (key, value) in obj {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_wire(&value).map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> Uuid {
        Uuid::now_v7()
    }

    #[test]
    fn text_delta_wire_shape() {
        let event = Event::new(
            agent(),
            EventPayload::TextDelta {
                index: 2,
                text: "Hel".into(),
            },
        );
        let wire = event.to_wire().unwrap();

        assert_eq!(wire["type"], "text_delta");
        assert_eq!(wire["index"], 2);
        assert_eq!(wire["data"]["text"], "Hel");
        assert!(wire["data"].get("index").is_none());
        assert_eq!(wire["agentId"], event.agent_id.to_string());
        assert_eq!(wire["timestamp"], event.timestamp.timestamp_millis());
    }

    #[test]
    fn tool_use_wire_shape() {
        let event = Event::new(
            agent(),
            EventPayload::ToolUseContentBlockStart {
                index: 0,
                id: "t1".into(),
                name: "search".into(),
            },
        );
        let wire = event.to_wire().unwrap();
        assert_eq!(wire["type"], "tool_use_content_block_start");
        assert_eq!(wire["index"], 0);
        assert_eq!(wire["data"]["id"], "t1");
        assert_eq!(wire["data"]["name"], "search");

        let delta = Event::new(
            agent(),
            EventPayload::InputJsonDelta {
                index: 0,
                partial_json: "{\"q\":".into(),
            },
        );
        let wire = delta.to_wire().unwrap();
        assert_eq!(wire["data"]["partialJson"], "{\"q\":");
    }

    #[test]
    fn exchange_response_wire_shape() {
        let now = Utc::now();
        let event = Event::new(
            agent(),
            EventPayload::ExchangeResponse {
                exchange_id: Uuid::now_v7(),
                assistant_message: Message::assistant("Hello", None),
                responded_at: now,
                duration_ms: 125,
                usage: Usage {
                    input: 10,
                    output: 20,
                },
                cost_usd: 0.00033,
            },
        );
        let wire = event.to_wire().unwrap();
        assert_eq!(wire["type"], "exchange_response");
        assert_eq!(wire["data"]["durationMs"], 125);
        assert_eq!(wire["data"]["usage"]["input"], 10);
        assert_eq!(wire["data"]["costUsd"], 0.00033);
        assert_eq!(wire["data"]["respondedAt"], now.timestamp_millis());
    }

    #[test]
    fn unit_payload_has_empty_data() {
        let event = Event::new(agent(), EventPayload::AgentReady);
        let wire = event.to_wire().unwrap();
        assert_eq!(wire["type"], "agent_ready");
        assert_eq!(wire["data"], serde_json::json!({}));
        assert!(wire.get("index").is_none());
    }

    #[test]
    fn wire_roundtrip() {
        let events = vec![
            Event::new(
                agent(),
                EventPayload::MessageStart {
                    message_id: "m1".into(),
                    model: "x".into(),
                },
            ),
            Event::new(
                agent(),
                EventPayload::MessageStop {
                    stop_reason: Some(StopReason::EndTurn),
                    usage: Some(Usage {
                        input: 5,
                        output: 7,
                    }),
                },
            ),
            Event::new(agent(), EventPayload::ConversationInterrupted),
            Event::new(
                agent(),
                EventPayload::UserMessage {
                    message: Message::user("Hi"),
                },
            ),
        ];

        for event in events {
            let wire = serde_json::to_value(&event).unwrap();
            let parsed: Event = serde_json::from_value(wire).unwrap();
            // Millisecond precision is all the wire carries.
            assert_eq!(parsed.uuid, event.uuid);
            assert_eq!(parsed.agent_id, event.agent_id);
            assert_eq!(
                parsed.timestamp.timestamp_millis(),
                event.timestamp.timestamp_millis()
            );
            assert_eq!(parsed.event_type(), event.event_type());
        }
    }

    #[test]
    fn event_type_parse() {
        assert_eq!(
            "assistant_message".parse::<EventType>().unwrap(),
            EventType::AssistantMessage
        );
        assert_eq!(
            "tool_use_content_block_stop".parse::<EventType>().unwrap(),
            EventType::ToolUseContentBlockStop
        );
        assert!("no_such_event".parse::<EventType>().is_err());
    }

    #[test]
    fn event_layers() {
        assert_eq!(EventType::TextDelta.layer(), EventLayer::Stream);
        assert_eq!(EventType::ConversationEnd.layer(), EventLayer::State);
        assert_eq!(EventType::UserMessage.layer(), EventLayer::Message);
        assert_eq!(EventType::ExchangeResponse.layer(), EventLayer::Exchange);
    }

    #[test]
    fn stop_reason_terminality() {
        assert!(StopReason::EndTurn.is_terminal());
        assert!(StopReason::MaxTokens.is_terminal());
        assert!(StopReason::StopSequence.is_terminal());
        assert!(!StopReason::ToolUse.is_terminal());
        assert!(!StopReason::Unknown.is_terminal());
    }

    #[test]
    fn unknown_stop_reason_deserializes() {
        let parsed: StopReason = serde_json::from_str("\"pause_turn\"").unwrap();
        assert_eq!(parsed, StopReason::Unknown);
    }
}
