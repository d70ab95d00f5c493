//! Record types.
//!
//! The persistent shapes the runtime's collaborators pass through a
//! [`crate::Repository`]: containers (a running agent plus its wiring),
//! the images they are launched from, sessions, and stored messages.  The
//! managers that own these records live outside the core; the core only
//! consumes the repository signatures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agentflow_core::message::Message;

/// Anything addressable by a string id in a repository.
pub trait Entity: Clone + Send + Sync + 'static {
    /// The unique id of this record.
    fn id(&self) -> &str;
}

/// A runnable agent configuration: driver wiring plus engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    /// Human-readable name (e.g. "research-assistant").
    pub name: String,
    /// Driver kind this image launches with.
    pub driver: String,
    /// Free-form engine/driver settings.
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Entity for ImageRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A live agent instance launched from an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    /// The [`ImageRecord`] this container was launched from.
    pub image_id: String,
    /// The engine's agent id.
    pub agent_id: Uuid,
    /// Current lifecycle phase as a string (e.g. "ready", "destroyed").
    pub phase: String,
    pub created_at: DateTime<Utc>,
}

impl Entity for ContainerRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

/// One logical conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    /// The container this session ran in.
    pub container_id: String,
    /// Backend-assigned resumption token, if any.
    pub driver_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Entity for SessionRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A stored message, addressable independently of its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    /// The session the message belongs to.
    pub session_id: String,
    /// The message payload itself.
    pub message: Message,
}

impl MessageRecord {
    /// Wrap a message for storage under its own envelope id.
    pub fn new(session_id: impl Into<String>, message: Message) -> Self {
        Self {
            id: message.id.clone(),
            session_id: session_id.into(),
            message,
        }
    }
}

impl Entity for MessageRecord {
    fn id(&self) -> &str {
        &self.id
    }
}
