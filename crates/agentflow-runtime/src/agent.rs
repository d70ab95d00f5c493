//! Agent service facade.
//!
//! [`Agent`] is the public surface over an [`Engine`]: construction runs
//! initialization, and the send / react / interrupt / clear / destroy calls
//! delegate straight through.
//!
//! The facade also implements [`Driver`]: `send_message` forwards the user
//! message and yields the stream-layer events of the resulting turn, so one
//! agent can serve as the backend of another.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use agentflow_core::bus::{BusConsumer, BusProducer, SubscriptionHandle};
use agentflow_core::event::{EventLayer, EventPayload};
use agentflow_core::message::Message;

use crate::config::EngineConfig;
use crate::driver::{Driver, DriverInput, StreamEvent, StreamEventStream};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::handlers::{HandlerBinding, Handlers};
use crate::queue::MessageQueue;
use crate::state::AgentState;

/// A runtime identity: engine + driver + bus, behind one handle.
#[derive(Clone)]
pub struct Agent {
    engine: Arc<Engine>,
}

impl Agent {
    /// Construct and initialize an agent over a driver.
    pub async fn new(driver: Arc<dyn Driver>, config: EngineConfig) -> Result<Self> {
        let engine = Arc::new(Engine::new(driver, config));
        engine.initialize().await?;
        Ok(Self { engine })
    }

    /// The agent id allocated at engine construction.
    pub fn agent_id(&self) -> Uuid {
        self.engine.agent_id()
    }

    /// Build a user message from content, record it, and emit it.
    pub async fn send(
        &self,
        content: impl Into<agentflow_core::UserContent>,
    ) -> Result<Message> {
        self.engine.send(content).await
    }

    /// Bind a handler table to the bus; returns its disposer.
    pub fn react(&self, handlers: Handlers) -> Result<HandlerBinding> {
        self.engine.react(handlers)
    }

    /// Cancel the in-flight exchange, if any.
    pub async fn interrupt(&self) -> Result<()> {
        self.engine.interrupt().await
    }

    /// Empty the message history and abort any in-flight request.
    pub async fn clear(&self) -> Result<()> {
        self.engine.clear().await
    }

    /// Tear the agent down irreversibly.
    pub async fn destroy(&self) -> Result<()> {
        self.engine.destroy().await
    }

    /// The current lifecycle state.
    pub fn state(&self) -> AgentState {
        self.engine.state()
    }

    /// Register a state-change observer.
    pub fn on_state_change<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(crate::state::StateChange) + Send + Sync + 'static,
    {
        self.engine.on_state_change(observer)
    }

    /// A snapshot of the message history in arrival order.
    pub fn history(&self) -> Vec<Message> {
        self.engine.history()
    }

    /// The pending-message queue for external orchestrators.
    pub fn queue(&self) -> &MessageQueue {
        self.engine.queue()
    }

    /// A read-only view of the bus.
    pub fn consumer(&self) -> BusConsumer {
        self.engine.consumer()
    }

    /// A write-only view of the bus (e.g. for external tool executors that
    /// report `tool_completed` / `tool_failed`).
    pub fn producer(&self) -> BusProducer {
        self.engine.producer()
    }
}

// ---------------------------------------------------------------------------
// Agent as a driver
// ---------------------------------------------------------------------------

/// Disposes the turn-scoped subscription when the stream is dropped early.
struct SubscriptionGuard(SubscriptionHandle);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

#[async_trait]
impl Driver for Agent {
    fn session_id(&self) -> &str {
        self.engine.session_id()
    }

    fn driver_session_id(&self) -> Option<String> {
        self.engine.driver_session_id()
    }

    async fn send_message(&self, input: DriverInput) -> Result<StreamEventStream> {
        let message = match input {
            DriverInput::Message(message) => *message,
            DriverInput::Conversation(mut messages) => {
                use futures::StreamExt;
                messages.next().await.ok_or(EngineError::EmptyMessage)?
            }
        };

        // Capture this turn's stream layer before the send goes out.
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.engine.consumer().subscribe_all(move |event| {
            let tx = tx.clone();
            Box::pin(async move {
                if event.layer() == EventLayer::Stream {
                    let _ = tx.send(event.payload);
                }
                Ok(())
            })
        });
        let guard = SubscriptionGuard(subscription);

        self.engine.send_message(message).await?;

        // Yield until message_stop closes the turn, then release the
        // subscription.
        let stream = futures::stream::unfold(
            (rx, Some(guard), false),
            |(mut rx, guard, done)| async move {
                if done {
                    drop(guard);
                    return None;
                }
                match rx.recv().await {
                    Some(payload) => {
                        let event = StreamEvent::try_from(payload).ok()?;
                        let is_stop = matches!(event, StreamEvent::MessageStop { .. });
                        Some((Ok(event), (rx, guard, is_stop)))
                    }
                    None => {
                        drop(guard);
                        None
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    async fn abort(&self) {
        if let Err(error) = self.engine.interrupt().await {
            tracing::debug!(error = %error, "interrupt on abort failed");
        }
    }

    async fn destroy(&self) {
        if let Err(error) = self.engine.destroy().await {
            tracing::debug!(error = %error, "destroy failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::replay::ReplayDriver;
    use agentflow_core::StopReason;
    use futures::StreamExt;

    fn hello_script() -> Vec<StreamEvent> {
        vec![
            StreamEvent::MessageStart {
                message_id: "m1".into(),
                model: "x".into(),
            },
            StreamEvent::TextContentBlockStart { index: 0 },
            StreamEvent::TextDelta {
                index: 0,
                text: "Hello".into(),
            },
            StreamEvent::TextContentBlockStop { index: 0 },
            StreamEvent::MessageStop {
                stop_reason: Some(StopReason::EndTurn),
                usage: None,
            },
        ]
    }

    #[tokio::test]
    async fn agent_drives_another_agent() {
        let backend = Arc::new(ReplayDriver::single("inner", hello_script()));
        let inner = Agent::new(backend, EngineConfig::default()).await.unwrap();

        // The inner agent is itself the driver of the outer agent.
        let outer = Agent::new(Arc::new(inner), EngineConfig::default())
            .await
            .unwrap();

        let sent = outer.send("Hi").await.unwrap();
        assert_eq!(sent.content_text(), "Hi");

        // The outer agent assembles the inner agent's streamed turn.
        for _ in 0..100 {
            if outer
                .history()
                .iter()
                .any(|m| m.content_text() == "Hello")
            {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("outer agent never assembled the inner turn");
    }

    #[tokio::test]
    async fn facade_send_message_yields_the_stream_layer() {
        let backend = Arc::new(ReplayDriver::single("s1", hello_script()));
        let agent = Agent::new(backend, EngineConfig::default()).await.unwrap();

        let mut stream = agent
            .send_message(Message::user("Hi").into())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }

        assert!(matches!(events.first(), Some(StreamEvent::MessageStart { .. })));
        assert!(matches!(
            events.last(),
            Some(StreamEvent::MessageStop { .. })
        ));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, StreamEvent::TextDelta { text, .. } if text == "Hello"))
        );
    }
}
