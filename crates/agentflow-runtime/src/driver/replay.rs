//! Scripted replay driver.
//!
//! Plays back pre-recorded stream event scripts, one script per
//! `send_message` call.  The deterministic backend used by the integration
//! suites; also useful for demos and canned fixtures.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::{Driver, DriverInput, StreamEvent, StreamEventStream};
use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};

/// Driver that replays scripted stream events.
pub struct ReplayDriver {
    session_id: String,
    driver_session_id: Option<String>,
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    current: Mutex<CancelToken>,
    delay: Option<Duration>,
    abort_count: AtomicUsize,
    destroyed: AtomicBool,
}

impl ReplayDriver {
    /// Create a driver that answers successive `send_message` calls with the
    /// given scripts, in order.
    pub fn new(session_id: impl Into<String>, scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            session_id: session_id.into(),
            driver_session_id: None,
            scripts: Mutex::new(scripts.into()),
            current: Mutex::new(CancelToken::new()),
            delay: None,
            abort_count: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Create a driver with a single script.
    pub fn single(session_id: impl Into<String>, script: Vec<StreamEvent>) -> Self {
        Self::new(session_id, vec![script])
    }

    /// Report a backend-assigned resumption token.
    #[must_use]
    pub fn with_driver_session_id(mut self, id: impl Into<String>) -> Self {
        self.driver_session_id = Some(id.into());
        self
    }

    /// Pause between played-back events, giving callers a window to
    /// interrupt mid-stream.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `abort` has been called.
    pub fn abort_count(&self) -> usize {
        self.abort_count.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Driver for ReplayDriver {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn driver_session_id(&self) -> Option<String> {
        self.driver_session_id.clone()
    }

    async fn send_message(&self, input: DriverInput) -> Result<StreamEventStream> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(EngineError::Driver {
                reason: "driver has been destroyed".into(),
            });
        }

        // The replay ignores message content but still drains the outbound
        // side the way a real backend would.
        if let DriverInput::Conversation(mut messages) = input {
            let _ = messages.next().await;
        }

        let script = self
            .scripts
            .lock()
            .map_err(|_| EngineError::Poisoned {
                what: "replay scripts",
            })?
            .pop_front()
            .ok_or_else(|| EngineError::Driver {
                reason: "replay script exhausted".into(),
            })?;

        let token = CancelToken::new();
        *self.current.lock().map_err(|_| EngineError::Poisoned {
            what: "driver abort token",
        })? = token.clone();
        let delay = self.delay;

        let stream = futures::stream::unfold(
            (script.into_iter(), token, delay),
            |(mut events, token, delay)| async move {
                if token.is_cancelled() {
                    return None;
                }
                let event = events.next()?;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if token.is_cancelled() {
                    return None;
                }
                Some((Ok(event), (events, token, delay)))
            },
        );
        Ok(Box::pin(stream))
    }

    async fn abort(&self) {
        self.abort_count.fetch_add(1, Ordering::AcqRel);
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

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::StopReason;
    use agentflow_core::message::Message;
    use futures::TryStreamExt;

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
    async fn replays_scripts_in_order() {
        let driver = ReplayDriver::new("s1", vec![hello_script(), hello_script()]);

        for _ in 0..2 {
            let stream = driver
                .send_message(Message::user("Hi").into())
                .await
                .unwrap();
            let events: Vec<StreamEvent> = stream.try_collect().await.unwrap();
            assert_eq!(events, hello_script());
        }

        let exhausted = driver.send_message(Message::user("Hi").into()).await;
        assert!(matches!(exhausted, Err(EngineError::Driver { .. })));
    }

    #[tokio::test]
    async fn abort_suppresses_remaining_events() {
        let driver = ReplayDriver::single("s1", hello_script());
        let mut stream = driver
            .send_message(Message::user("Hi").into())
            .await
            .unwrap();

        assert!(stream.next().await.is_some());
        driver.abort().await;
        assert_eq!(driver.abort_count(), 1);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn destroy_is_irreversible() {
        let driver = ReplayDriver::single("s1", hello_script());
        driver.destroy().await;
        assert!(
            driver
                .send_message(Message::user("Hi").into())
                .await
                .is_err()
        );
    }
}
