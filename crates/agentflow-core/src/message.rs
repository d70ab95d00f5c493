//! Message model.
//!
//! These types model the fully assembled messages that flow on the message
//! layer of the bus: user input, assistant output, observed tool use, system
//! instructions, and user-visible errors.  They are backend-agnostic; drivers
//! translate provider wire formats into this shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Roles and shared payload pieces
// ---------------------------------------------------------------------------

/// The role of a message, determining its payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Input from the human user.
    User,
    /// Assembled output from the LLM backend.
    Assistant,
    /// An observed tool invocation and its (possibly pending) result.
    ToolUse,
    /// Free-form system instruction content.
    System,
    /// A human-readable error surfaced to clients.
    Error,
}

/// Token usage reported by the backend for one assistant message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the input (prompt).
    #[serde(default)]
    pub input: u64,
    /// Number of tokens generated by the model.
    #[serde(default)]
    pub output: u64,
}

/// Severity of an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Fatal,
}

/// Coarse classification of an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Empty or malformed user input.
    Validation,
    /// Backend/LLM protocol failure.
    Llm,
    /// Tool invocation failure.
    Tool,
    /// Connection-level failure.
    Transport,
    /// Unexpected internal failure.
    Internal,
}

// ---------------------------------------------------------------------------
// User content
// ---------------------------------------------------------------------------

/// One part of a structured user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },
    /// An inline image, base64-encoded.
    Image { media_type: String, data: String },
    /// An attached file, base64-encoded.
    File {
        name: String,
        media_type: String,
        data: String,
    },
}

/// The content of a user message: a plain text body or an ordered sequence
/// of content parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl UserContent {
    /// Whether the content carries nothing substantive.
    ///
    /// Whitespace-only text counts as empty; a part list is empty when it
    /// contains no parts, or only whitespace text parts.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Parts(parts) => parts.iter().all(|part| match part {
                ContentPart::Text { text } => text.trim().is_empty(),
                ContentPart::Image { .. } | ContentPart::File { .. } => false,
            }),
        }
    }

    /// The concatenated text of the content (non-text parts contribute
    /// nothing).
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

impl From<&str> for UserContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for UserContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

// ---------------------------------------------------------------------------
// Tool use
// ---------------------------------------------------------------------------

/// A tool invocation requested by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallPart {
    /// Identifier assigned by the backend for correlating the result.
    pub id: String,
    /// The name of the tool to invoke.
    pub name: String,
    /// Structured input for the tool.
    pub input: Value,
}

/// The outcome of a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutput {
    /// Plain text output.
    Text { text: String },
    /// A failure description.
    ErrorText { text: String },
    /// Structured output.
    Structured { value: Value },
}

impl ToolOutput {
    /// The empty placeholder used until external tool execution completes.
    pub fn pending() -> Self {
        Self::Text {
            text: String::new(),
        }
    }
}

/// The result slot paired with a tool call.
///
/// The output stays at [`ToolOutput::pending`] until an external executor
/// fills it in; the core only observes tool use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultPart {
    /// The [`ToolCallPart::id`] this result corresponds to.
    pub id: String,
    /// The tool name, mirrored for convenience.
    pub name: String,
    /// The output, if execution has completed.
    pub output: ToolOutput,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Role-specific payload of a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MessageBody {
    /// Input from the human user.
    User { content: UserContent },

    /// Assembled assistant output: the concatenation of all produced text
    /// parts, plus the token usage the backend reported (if any).
    Assistant {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// An observed tool invocation paired with its result slot.
    ToolUse {
        call: ToolCallPart,
        result: ToolResultPart,
    },

    /// Free-form system instruction content.
    System { content: String },

    /// A human-readable error surfaced to clients.
    Error {
        message: String,
        severity: Severity,
        category: ErrorCategory,
        #[serde(skip_serializing_if = "Option::is_none")]
        recoverable: Option<bool>,
    },
}

/// A single message with a shared envelope (id, timestamp) and role-specific
/// payload.
///
/// Ids are unique within an agent.  Timestamps are non-decreasing in arrival
/// order but not guaranteed strictly monotonic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier (driver-assigned for assistant and tool-use
    /// messages, minted locally otherwise).
    pub id: String,

    /// When the message was created.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Role-tagged payload.
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    fn with_body(body: MessageBody) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            body,
        }
    }

    /// Create a user message from plain text or structured content.
    pub fn user(content: impl Into<UserContent>) -> Self {
        Self::with_body(MessageBody::User {
            content: content.into(),
        })
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>, usage: Option<Usage>) -> Self {
        Self::with_body(MessageBody::Assistant {
            content: content.into(),
            usage,
        })
    }

    /// Create a tool-use message with a pending result placeholder.
    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        let id = id.into();
        let name = name.into();
        Self::with_body(MessageBody::ToolUse {
            call: ToolCallPart {
                id: id.clone(),
                name: name.clone(),
                input,
            },
            result: ToolResultPart {
                id,
                name,
                output: ToolOutput::pending(),
            },
        })
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_body(MessageBody::System {
            content: content.into(),
        })
    }

    /// Create an error message.
    pub fn error(
        message: impl Into<String>,
        severity: Severity,
        category: ErrorCategory,
        recoverable: Option<bool>,
    ) -> Self {
        Self::with_body(MessageBody::Error {
            message: message.into(),
            severity,
            category,
            recoverable,
        })
    }

    /// Replace the envelope id (used by the assembler, which carries the
    /// driver-assigned message id).
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replace the envelope timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The role of this message.
    pub fn role(&self) -> Role {
        match &self.body {
            MessageBody::User { .. } => Role::User,
            MessageBody::Assistant { .. } => Role::Assistant,
            MessageBody::ToolUse { .. } => Role::ToolUse,
            MessageBody::System { .. } => Role::System,
            MessageBody::Error { .. } => Role::Error,
        }
    }

    /// The textual content of the message, where it has one.
    pub fn content_text(&self) -> String {
        match &self.body {
            MessageBody::User { content } => content.text(),
            MessageBody::Assistant { content, .. } | MessageBody::System { content } => {
                content.clone()
            }
            MessageBody::ToolUse { .. } => String::new(),
            MessageBody::Error { message, .. } => message.clone(),
        }
    }

    /// The token usage carried by an assistant message, if any.
    pub fn usage(&self) -> Option<Usage> {
        match &self.body {
            MessageBody::Assistant { usage, .. } => *usage,
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
