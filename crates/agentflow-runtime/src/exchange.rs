//! Exchange tracker.
//!
//! Pairs each user request with the assistant response that concludes it and
//! reports duration, token usage, and cost on the exchange layer.  At most
//! one exchange is pending per agent; an interruption discards the pending
//! exchange without emission.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use agentflow_core::bus::SubscriptionHandle;
use agentflow_core::event::{Event, EventPayload};
use agentflow_core::message::Usage;

use crate::config::CostRates;
use crate::error::{EngineError, Result};
use crate::reactor::ReactorContext;

struct PendingExchange {
    exchange_id: Uuid,
    requested_at: DateTime<Utc>,
}

/// Pairs user requests with assistant responses and computes metrics.
pub struct ExchangeTracker {
    rates: CostRates,
    pending: Arc<Mutex<Option<PendingExchange>>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl ExchangeTracker {
    /// Create a tracker with the given cost rates.  Call
    /// [`ExchangeTracker::initialize`] to attach it to a bus.
    #[must_use]
    pub fn new(rates: CostRates) -> Self {
        Self {
            rates,
            pending: Arc::new(Mutex::new(None)),
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe to the message layer and start tracking.
    pub fn initialize(&self, ctx: &ReactorContext) {
        let pending = Arc::clone(&self.pending);
        let rates = self.rates;
        let producer = ctx.producer.clone();
        let agent_id = ctx.agent_id;

        let subscription = ctx.consumer.subscribe_all(move |event| {
            let pending = Arc::clone(&pending);
            let producer = producer.clone();
            Box::pin(async move {
                if let Some(payload) = handle_event(&pending, rates, event)? {
                    producer.emit(Event::new(agent_id, payload)).await?;
                }
                Ok(())
            })
        });
        if let Ok(mut slot) = self.subscription.lock() {
            *slot = Some(subscription);
        }
    }

    /// Whether an exchange is currently pending.
    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .map(|pending| pending.is_some())
            .unwrap_or(false)
    }

    /// Detach from the bus and drop any pending exchange.
    pub fn destroy(&self) {
        if let Some(subscription) = self.subscription.lock().ok().and_then(|mut s| s.take()) {
            subscription.dispose();
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.take();
        }
    }
}

fn lock_pending<'a>(
    pending: &'a Mutex<Option<PendingExchange>>,
) -> Result<std::sync::MutexGuard<'a, Option<PendingExchange>>> {
    pending.lock().map_err(|_| EngineError::Poisoned {
        what: "pending exchange",
    })
}

fn handle_event(
    pending: &Mutex<Option<PendingExchange>>,
    rates: CostRates,
    event: Event,
) -> Result<Option<EventPayload>> {
    match event.payload {
        EventPayload::UserMessage { message } => {
            let exchange_id = Uuid::now_v7();
            let requested_at = event.timestamp;
            *lock_pending(pending)? = Some(PendingExchange {
                exchange_id,
                requested_at,
            });
            Ok(Some(EventPayload::ExchangeRequest {
                exchange_id,
                user_message: message,
                requested_at,
            }))
        }

        EventPayload::AssistantMessage { message } => {
            let Some(open) = lock_pending(pending)?.take() else {
                tracing::debug!("assistant message with no pending exchange; dropping");
                return Ok(None);
            };
            let responded_at = event.timestamp;
            let duration_ms = (responded_at - open.requested_at).num_milliseconds().max(0);
            let usage = message.usage().unwrap_or(Usage::default());
            let cost_usd = rates.cost_usd(usage.input, usage.output);
            Ok(Some(EventPayload::ExchangeResponse {
                exchange_id: open.exchange_id,
                assistant_message: message,
                responded_at,
                duration_ms,
                usage,
                cost_usd,
            }))
        }

        EventPayload::ConversationInterrupted => {
            if lock_pending(pending)?.take().is_some() {
                tracing::debug!("pending exchange discarded by interruption");
            }
            Ok(None)
        }

        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::bus::EventBus;
    use agentflow_core::event::EventType;
    use agentflow_core::message::Message;

    struct Fixture {
        bus: EventBus,
        agent_id: Uuid,
        tracker: Arc<ExchangeTracker>,
        exchanges: Arc<Mutex<Vec<EventPayload>>>,
    }

    fn fixture(rates: CostRates) -> Fixture {
        let bus = EventBus::new();
        let agent_id = Uuid::now_v7();
        let tracker = Arc::new(ExchangeTracker::new(rates));
        tracker.initialize(&ReactorContext::from_bus(&bus, agent_id, "s1"));

        let exchanges = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&exchanges);
        bus.subscribe_all(move |event| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                if event.layer() == agentflow_core::EventLayer::Exchange {
                    log.lock().unwrap().push(event.payload);
                }
                Ok(())
            })
        });

        Fixture {
            bus,
            agent_id,
            tracker,
            exchanges,
        }
    }

    impl Fixture {
        async fn feed(&self, payload: EventPayload) {
            self.bus
                .emit(Event::new(self.agent_id, payload))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn pairs_request_with_response() {
        let fx = fixture(CostRates::default());
        fx.feed(EventPayload::UserMessage {
            message: Message::user("Hi"),
        })
        .await;
        assert!(fx.tracker.has_pending());

        fx.feed(EventPayload::AssistantMessage {
            message: Message::assistant("Hello", None),
        })
        .await;
        assert!(!fx.tracker.has_pending());

        let exchanges = fx.exchanges.lock().unwrap().clone();
        assert_eq!(exchanges.len(), 2);

        let EventPayload::ExchangeRequest { exchange_id, .. } = &exchanges[0] else {
            panic!("expected exchange_request, got {:?}", exchanges[0]);
        };
        let EventPayload::ExchangeResponse {
            exchange_id: response_id,
            duration_ms,
            usage,
            cost_usd,
            ..
        } = &exchanges[1]
        else {
            panic!("expected exchange_response, got {:?}", exchanges[1]);
        };
        assert_eq!(response_id, exchange_id);
        assert!(*duration_ms >= 0);
        // No usage on the assistant message: zero tokens, zero cost.
        assert_eq!(*usage, Usage::default());
        assert_eq!(*cost_usd, 0.0);
    }

    #[tokio::test]
    async fn cost_uses_configured_rates() {
        let fx = fixture(CostRates {
            input_rate: 1e-3,
            output_rate: 2e-3,
        });
        fx.feed(EventPayload::UserMessage {
            message: Message::user("Hi"),
        })
        .await;
        fx.feed(EventPayload::AssistantMessage {
            message: Message::assistant(
                "Hello",
                Some(Usage {
                    input: 100,
                    output: 50,
                }),
            ),
        })
        .await;

        let exchanges = fx.exchanges.lock().unwrap().clone();
        let EventPayload::ExchangeResponse { cost_usd, usage, .. } = &exchanges[1] else {
            panic!("expected exchange_response");
        };
        assert_eq!(
            *usage,
            Usage {
                input: 100,
                output: 50
            }
        );
        assert!((cost_usd - (100.0 * 1e-3 + 50.0 * 2e-3)).abs() < 1e-12);
    }

    #[tokio::test]
    async fn response_without_pending_is_dropped() {
        let fx = fixture(CostRates::default());
        fx.feed(EventPayload::AssistantMessage {
            message: Message::assistant("orphan", None),
        })
        .await;

        assert!(fx.exchanges.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn interruption_discards_pending_without_emission() {
        let fx = fixture(CostRates::default());
        fx.feed(EventPayload::UserMessage {
            message: Message::user("Hi"),
        })
        .await;
        fx.feed(EventPayload::ConversationInterrupted).await;
        assert!(!fx.tracker.has_pending());

        // A later assistant message no longer has an exchange to close.
        fx.feed(EventPayload::AssistantMessage {
            message: Message::assistant("late", None),
        })
        .await;

        let exchanges = fx.exchanges.lock().unwrap().clone();
        assert_eq!(exchanges.len(), 1);
        assert!(matches!(
            exchanges[0],
            EventPayload::ExchangeRequest { .. }
        ));
    }

    #[tokio::test]
    async fn new_request_supersedes_pending() {
        let fx = fixture(CostRates::default());
        fx.feed(EventPayload::UserMessage {
            message: Message::user("first"),
        })
        .await;
        fx.feed(EventPayload::UserMessage {
            message: Message::user("second"),
        })
        .await;
        fx.feed(EventPayload::AssistantMessage {
            message: Message::assistant("reply", None),
        })
        .await;

        let exchanges = fx.exchanges.lock().unwrap().clone();
        // Two requests, one response; the response pairs with the latest.
        assert_eq!(exchanges.len(), 3);
        let EventPayload::ExchangeRequest { exchange_id, .. } = &exchanges[1] else {
            panic!("expected exchange_request");
        };
        let EventPayload::ExchangeResponse {
            exchange_id: response_id,
            ..
        } = &exchanges[2]
        else {
            panic!("expected exchange_response");
        };
        assert_eq!(response_id, exchange_id);
    }
}
