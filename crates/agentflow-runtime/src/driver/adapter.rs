//! Driver adapter.
//!
//! Bridges a [`Driver`]'s lazy event sequence onto the bus.  The adapter
//! subscribes to `user_message`; each receipt creates a cancellation token,
//! invokes the driver, and forwards every produced stream event as an
//! enveloped bus event from a spawned task.  The token is honored between
//! events, so an abort suppresses everything the driver has not yet yielded.

use std::sync::{Arc, Mutex};

use futures::StreamExt;

use agentflow_core::bus::{BusProducer, SubscriptionHandle};
use agentflow_core::event::{Event, EventPayload};
use agentflow_core::message::Message;
use uuid::Uuid;

use super::{Driver, DriverInput};
use crate::cancel::CancelToken;
use crate::reactor::ReactorContext;

/// Bridges driver output onto the bus with per-request cancellation.
pub struct DriverAdapter {
    driver: Arc<dyn Driver>,
    current: Mutex<Option<CancelToken>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl DriverAdapter {
    /// Create an adapter over a driver.  Call [`DriverAdapter::initialize`]
    /// to attach it to a bus.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            current: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe to `user_message` and start forwarding driver output.
    pub fn initialize(self: &Arc<Self>, ctx: &ReactorContext) {
        let adapter = Arc::clone(self);
        let producer = ctx.producer.clone();
        let agent_id = ctx.agent_id;

        let subscription = ctx.consumer.subscribe(
            agentflow_core::EventType::UserMessage,
            move |event| {
                let adapter = Arc::clone(&adapter);
                let producer = producer.clone();
                Box::pin(async move {
                    if let EventPayload::UserMessage { message } = event.payload {
                        adapter.dispatch(producer, agent_id, message);
                    }
                    Ok(())
                })
            },
        );
        if let Ok(mut slot) = self.subscription.lock() {
            *slot = Some(subscription);
        }
    }

    /// Signal the in-flight request's token and abort the driver.
    pub async fn abort(&self) {
        if let Some(token) = self.current.lock().ok().and_then(|mut c| c.take()) {
            token.cancel();
        }
        self.driver.abort().await;
    }

    /// Whether a forwarded request is still in flight.
    pub fn has_inflight(&self) -> bool {
        self.current
            .lock()
            .map(|current| current.is_some())
            .unwrap_or(false)
    }

    /// Detach from the bus and cancel any in-flight forwarding.
    pub async fn destroy(&self) {
        if let Some(subscription) = self.subscription.lock().ok().and_then(|mut s| s.take()) {
            subscription.dispose();
        }
        self.abort().await;
    }

    fn dispatch(self: Arc<Self>, producer: BusProducer, agent_id: Uuid, message: Message) {
        let token = CancelToken::new();
        if let Ok(mut current) = self.current.lock() {
            *current = Some(token.clone());
        }

        tokio::spawn(async move {
            self.forward(producer, agent_id, message, token.clone()).await;

            // Discard the token once this request is done, unless a newer
            // request has already replaced it.
            if let Ok(mut current) = self.current.lock() {
                if current.as_ref().is_some_and(|t| t.same_as(&token)) {
                    *current = None;
                }
            }
        });
    }

    async fn forward(
        &self,
        producer: BusProducer,
        agent_id: Uuid,
        message: Message,
        token: CancelToken,
    ) {
        let mut stream = match self.driver.send_message(DriverInput::from(message)).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::warn!(agent_id = %agent_id, error = %error, "driver send failed");
                let received = EventPayload::ErrorReceived {
                    message: error.to_string(),
                    error_code: Some(error.code().to_owned()),
                };
                let _ = producer.emit(Event::new(agent_id, received)).await;
                return;
            }
        };

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!(agent_id = %agent_id, "forwarding cancelled");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(stream_event)) => {
                        if token.is_cancelled() {
                            break;
                        }
                        let event = Event::new(agent_id, stream_event.into());
                        if producer.emit(event).await.is_err() {
                            // Bus closed under us; nothing left to forward to.
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        tracing::warn!(agent_id = %agent_id, error = %error, "driver stream failed");
                        let received = EventPayload::ErrorReceived {
                            message: error.to_string(),
                            error_code: Some(error.code().to_owned()),
                        };
                        let _ = producer.emit(Event::new(agent_id, received)).await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::StreamEvent;
    use crate::driver::replay::ReplayDriver;
    use agentflow_core::bus::EventBus;
    use agentflow_core::event::EventType;
    use agentflow_core::StopReason;
    use std::time::Duration;

    fn script() -> Vec<StreamEvent> {
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

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn forwards_stream_events_onto_the_bus() {
        let bus = EventBus::new();
        let agent_id = Uuid::now_v7();
        let driver = Arc::new(ReplayDriver::single("s1", script()));
        let adapter = Arc::new(DriverAdapter::new(driver));
        let ctx = ReactorContext::from_bus(&bus, agent_id, "s1");
        adapter.initialize(&ctx);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        bus.subscribe_all(move |event| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(event.event_type());
                Ok(())
            })
        });

        bus.emit(Event::new(
            agent_id,
            EventPayload::UserMessage {
                message: Message::user("Hi"),
            },
        ))
        .await
        .unwrap();

        let log = Arc::clone(&seen);
        wait_for(move || {
            log.lock()
                .unwrap()
                .contains(&EventType::MessageStop)
        })
        .await;

        let types = seen.lock().unwrap().clone();
        assert_eq!(
            types,
            vec![
                EventType::UserMessage,
                EventType::MessageStart,
                EventType::TextContentBlockStart,
                EventType::TextDelta,
                EventType::TextContentBlockStop,
                EventType::MessageStop,
            ]
        );
        wait_for(move || !adapter.has_inflight()).await;
    }

    #[tokio::test]
    async fn driver_failure_becomes_error_received() {
        let bus = EventBus::new();
        let agent_id = Uuid::now_v7();
        // No scripts: the first send fails.
        let driver = Arc::new(ReplayDriver::new("s1", vec![]));
        let adapter = Arc::new(DriverAdapter::new(driver));
        let ctx = ReactorContext::from_bus(&bus, agent_id, "s1");
        adapter.initialize(&ctx);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        bus.subscribe(EventType::ErrorReceived, move |event| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                if let EventPayload::ErrorReceived { error_code, .. } = event.payload {
                    log.lock().unwrap().push(error_code);
                }
                Ok(())
            })
        });

        bus.emit(Event::new(
            agent_id,
            EventPayload::UserMessage {
                message: Message::user("Hi"),
            },
        ))
        .await
        .unwrap();

        let log = Arc::clone(&seen);
        wait_for(move || !log.lock().unwrap().is_empty()).await;
        assert_eq!(
            seen.lock().unwrap()[0].as_deref(),
            Some("TRANSPORT_ERROR")
        );
    }

    #[tokio::test]
    async fn abort_suppresses_further_forwarding() {
        let bus = EventBus::new();
        let agent_id = Uuid::now_v7();
        let driver = Arc::new(
            ReplayDriver::single("s1", script()).with_delay(Duration::from_millis(30)),
        );
        let adapter = Arc::new(DriverAdapter::new(Arc::clone(&driver) as Arc<dyn Driver>));
        let ctx = ReactorContext::from_bus(&bus, agent_id, "s1");
        adapter.initialize(&ctx);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        bus.subscribe_all(move |event| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(event.event_type());
                Ok(())
            })
        });

        bus.emit(Event::new(
            agent_id,
            EventPayload::UserMessage {
                message: Message::user("Hi"),
            },
        ))
        .await
        .unwrap();

        // Let the first couple of events through, then abort.
        let log = Arc::clone(&seen);
        wait_for(move || log.lock().unwrap().contains(&EventType::MessageStart)).await;
        adapter.abort().await;
        assert_eq!(driver.abort_count(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let types = seen.lock().unwrap().clone();
        assert!(!types.contains(&EventType::MessageStop));
    }
}
