//! In-process event bus.
//!
//! A single publish/subscribe subject carries every layer's events.  The bus
//! is cheaply cloneable (`Arc`-backed) and `Send + Sync`; producers and
//! consumers are write-only / read-only views over the same subject, so
//! creating more of them is free and unbounded.
//!
//! # Ordering
//!
//! Events are dispatched one at a time: every subscriber observes events in
//! emission order, and all subscribers observe the same order.  Within one
//! event, delivery to each subscriber is independent, so a handler that
//! suspends does not block the other subscribers of that event; it only
//! delays the next event.  Emissions made re-entrantly from inside a handler
//! are appended to an internal FIFO and dispatched after the current
//! delivery completes, never interleaved into it.
//!
//! # Failure semantics
//!
//! A failing handler never prevents delivery to subsequent subscribers: the
//! error is logged and swallowed.  There is no retry and no dead-letter.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use agentflow_core::bus::EventBus;
//! # use agentflow_core::event::{Event, EventPayload, EventType};
//! # async fn example() {
//! let bus = EventBus::new();
//! let sub = bus.subscribe(EventType::AgentReady, |event| {
//!     Box::pin(async move {
//!         println!("agent {} is ready", event.agent_id);
//!         Ok(())
//!     })
//! });
//!
//! bus.emit(Event::new(uuid::Uuid::now_v7(), EventPayload::AgentReady))
//!     .await
//!     .unwrap();
//! sub.dispose();
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::future::BoxFuture;

use crate::error::{CoreError, Result};
use crate::event::{Event, EventType};

// ---------------------------------------------------------------------------
// Handler types
// ---------------------------------------------------------------------------

/// Error type handlers may surface; logged by the bus and swallowed.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by event handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// A boxed async event handler.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    filter: Option<EventType>,
    handler: EventHandler,
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

struct BusInner {
    /// Registered subscribers in insertion order.
    subscribers: Mutex<Vec<Subscriber>>,

    /// Pending events awaiting dispatch (re-entrancy FIFO).
    queue: Mutex<VecDeque<Event>>,

    /// Set while one emit call is draining the queue.
    dispatching: AtomicBool,

    /// Once set, emit is rejected and subscribers are released.
    closed: AtomicBool,

    next_id: AtomicU64,
}

/// Single in-process pub/sub channel carrying all layer events.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new, open bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                queue: Mutex::new(VecDeque::new()),
                dispatching: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// All matching handlers for the event run independently; the call
    /// returns once each has completed, so a suspending handler delays only
    /// the next event, never its peers.  Re-entrant emissions from inside a
    /// handler are queued and dispatched after the current delivery.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BusClosed`] once the bus has been closed.
    pub async fn emit(&self, event: Event) -> Result<()> {
        emit_on(&self.inner, event).await
    }

    /// Subscribe to a single event type.  Returns a disposer handle.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionHandle
    where
        F: Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
    {
        register(&self.inner, Some(event_type), Arc::new(handler))
    }

    /// Subscribe to every event.  Returns a disposer handle.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
    {
        register(&self.inner, None, Arc::new(handler))
    }

    /// Create a write-only view of this bus.
    #[must_use]
    pub fn producer(&self) -> BusProducer {
        BusProducer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Create a read-only view of this bus.
    #[must_use]
    pub fn consumer(&self) -> BusConsumer {
        BusConsumer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Complete the bus: release all subscribers, drop pending events, and
    /// reject further emissions.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.clear();
        }
        if let Ok(mut queue) = self.inner.queue.lock() {
            queue.clear();
        }
        tracing::debug!("event bus closed");
    }

    /// Whether the bus has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The current number of subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Write-only view of an [`EventBus`].
#[derive(Clone)]
pub struct BusProducer {
    inner: Arc<BusInner>,
}

impl BusProducer {
    /// Publish an event.  See [`EventBus::emit`].
    pub async fn emit(&self, event: Event) -> Result<()> {
        emit_on(&self.inner, event).await
    }
}

/// Read-only view of an [`EventBus`].
#[derive(Clone)]
pub struct BusConsumer {
    inner: Arc<BusInner>,
}

impl BusConsumer {
    /// Subscribe to a single event type.  See [`EventBus::subscribe`].
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionHandle
    where
        F: Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
    {
        register(&self.inner, Some(event_type), Arc::new(handler))
    }

    /// Subscribe to every event.  See [`EventBus::subscribe_all`].
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
    {
        register(&self.inner, None, Arc::new(handler))
    }
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// Disposer for one subscription.
///
/// Calling [`SubscriptionHandle::dispose`] removes the handler; the call is
/// idempotent and handles are cheap to clone.  Dropping a handle without
/// disposing leaves the subscription active.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Weak<BusInner>,
    id: u64,
}

impl SubscriptionHandle {
    /// Remove the subscription.  No event emitted after this call reaches
    /// the handler.
    pub fn dispose(&self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Ok(mut subscribers) = inner.subscribers.lock() {
                subscribers.retain(|s| s.id != self.id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn register(
    inner: &Arc<BusInner>,
    filter: Option<EventType>,
    handler: EventHandler,
) -> SubscriptionHandle {
    let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
    if inner.closed.load(Ordering::Acquire) {
        // The bus has completed; hand back an inert disposer.
        tracing::debug!("subscribe on closed bus ignored");
        return SubscriptionHandle {
            inner: Weak::new(),
            id,
        };
    }
    match inner.subscribers.lock() {
        Ok(mut subscribers) => subscribers.push(Subscriber {
            id,
            filter,
            handler,
        }),
        Err(_) => {
            tracing::warn!("subscriber registry poisoned; subscription dropped");
            return SubscriptionHandle {
                inner: Weak::new(),
                id,
            };
        }
    }
    SubscriptionHandle {
        inner: Arc::downgrade(inner),
        id,
    }
}

async fn emit_on(inner: &Arc<BusInner>, event: Event) -> Result<()> {
    if inner.closed.load(Ordering::Acquire) {
        return Err(CoreError::BusClosed);
    }

    inner
        .queue
        .lock()
        .map_err(|_| CoreError::Poisoned { what: "bus queue" })?
        .push_back(event);

    // If another emit is already draining, our event rides its queue.
    if inner.dispatching.swap(true, Ordering::AcqRel) {
        return Ok(());
    }

    loop {
        let next = inner
            .queue
            .lock()
            .map_err(|_| CoreError::Poisoned { what: "bus queue" })?
            .pop_front();
        match next {
            Some(event) => {
                let event_type = event.event_type();
                let subscribers: Vec<Subscriber> = inner
                    .subscribers
                    .lock()
                    .map_err(|_| CoreError::Poisoned {
                        what: "bus subscribers",
                    })?
                    .iter()
                    .filter(|s| s.filter.is_none_or(|f| f == event_type))
                    .cloned()
                    .collect();

                // Each subscriber gets its own delivery; a suspending
                // handler must not hold up its peers.
                let deliveries = subscribers.into_iter().map(|subscriber| {
                    let event = event.clone();
                    async move { (subscriber.handler)(event).await }
                });
                for result in futures::future::join_all(deliveries).await {
                    if let Err(error) = result {
                        tracing::warn!(
                            event_type = %event_type,
                            error = %error,
                            "event handler failed; continuing delivery"
                        );
                    }
                }
            }
            None => {
                inner.dispatching.store(false, Ordering::Release);
                // An emit may have queued between the pop and the flag
                // reset; reclaim the drain if so.
                let queue_empty = inner
                    .queue
                    .lock()
                    .map_err(|_| CoreError::Poisoned { what: "bus queue" })?
                    .is_empty();
                if queue_empty || inner.dispatching.swap(true, Ordering::AcqRel) {
                    break;
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
