//! Framing driver template.
//!
//! [`BaseDriver`] supplies the fixed outer framing every driver owes the
//! stream layer -- `message_start`, content blocks with matching start/stop
//! events at ascending indices, `message_stop` -- so a [`ContentSource`]
//! implements only content generation.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use uuid::Uuid;

use agentflow_core::StopReason;
use agentflow_core::message::Message;

use super::{Driver, DriverInput, StreamEvent, StreamEventStream};
use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Content source
// ---------------------------------------------------------------------------

/// One content block produced by a [`ContentSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// A text block, emitted as a single delta.
    Text(String),
    /// A tool invocation, emitted as one input JSON delta.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

/// Generates the content of a response; the [`BaseDriver`] does the framing.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// The model name reported in `message_start`.
    fn model(&self) -> &str;

    /// Produce the content blocks answering `message`.
    async fn respond(&self, message: &Message) -> Result<Vec<ContentBlock>>;
}

// ---------------------------------------------------------------------------
// Base driver
// ---------------------------------------------------------------------------

/// Driver template wrapping a [`ContentSource`] in the canonical framing.
///
/// Single-turn: when handed an ongoing conversation it responds to the first
/// message of the sequence.
pub struct BaseDriver<S> {
    session_id: String,
    source: S,
    current: Mutex<CancelToken>,
    destroyed: AtomicBool,
}

impl<S: ContentSource> BaseDriver<S> {
    /// Create a driver for a fresh session.
    pub fn new(source: S) -> Self {
        Self {
            session_id: Uuid::now_v7().to_string(),
            source,
            current: Mutex::new(CancelToken::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Create a driver bound to an existing session id.
    pub fn with_session_id(source: S, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::new(source)
        }
    }

    fn fresh_token(&self) -> Result<CancelToken> {
        let token = CancelToken::new();
        *self.current.lock().map_err(|_| EngineError::Poisoned {
            what: "driver abort token",
        })? = token.clone();
        Ok(token)
    }
}

#[async_trait]
impl<S: ContentSource> Driver for BaseDriver<S> {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn driver_session_id(&self) -> Option<String> {
        None
    }

    async fn send_message(&self, input: DriverInput) -> Result<StreamEventStream> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(EngineError::Driver {
                reason: "driver has been destroyed".into(),
            });
        }

        let message = match input {
            DriverInput::Message(message) => *message,
            DriverInput::Conversation(mut messages) => {
                messages.next().await.ok_or(EngineError::EmptyMessage)?
            }
        };

        let token = self.fresh_token()?;
        let blocks = self.source.respond(&message).await?;
        let message_id = format!("msg_{}", Uuid::now_v7().simple());
        let model = self.source.model().to_owned();

        let uses_tools = blocks
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }));
        let stop_reason = if uses_tools {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };

        let mut events = Vec::with_capacity(blocks.len() * 3 + 2);
        events.push(StreamEvent::MessageStart { message_id, model });
        for (i, block) in blocks.into_iter().enumerate() {
            let index = i as u32;
            match block {
                ContentBlock::Text(text) => {
                    events.push(StreamEvent::TextContentBlockStart { index });
                    events.push(StreamEvent::TextDelta { index, text });
                    events.push(StreamEvent::TextContentBlockStop { index });
                }
                ContentBlock::ToolUse { id, name, input } => {
                    events.push(StreamEvent::ToolUseContentBlockStart {
                        index,
                        id: id.clone(),
                        name,
                    });
                    events.push(StreamEvent::InputJsonDelta {
                        index,
                        partial_json: input.to_string(),
                    });
                    events.push(StreamEvent::ToolUseContentBlockStop { index, id });
                }
            }
        }
        events.push(StreamEvent::MessageStop {
            stop_reason: Some(stop_reason),
            usage: None,
        });

        // Lazy playback; abort is honored between events.
        let stream = futures::stream::unfold(
            (events.into_iter(), token),
            |(mut events, token)| async move {
                if token.is_cancelled() {
                    return None;
                }
                let event = events.next()?;
                Some((Ok(event), (events, token)))
            },
        );
        Ok(Box::pin(stream))
    }

    async fn abort(&self) {
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
