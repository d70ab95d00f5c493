//! Agent engine.
//!
//! The composition root: wires the driver adapter, state machine, message
//! assembler, and exchange tracker onto one bus, owns the agent identity and
//! message history, and exposes the send / react / interrupt / clear /
//! destroy surface.
//!
//! Lifecycle errors are the only class raised to callers; transport and
//! parse failures travel the bus as events (see the crate error docs).

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use agentflow_core::bus::{EventBus, SubscriptionHandle};
use agentflow_core::event::{Event, EventPayload};
use agentflow_core::message::{ErrorCategory, Message, MessageBody, Severity};

use crate::assembler::MessageAssembler;
use crate::config::{CostRates, EngineConfig};
use crate::driver::Driver;
use crate::driver::adapter::DriverAdapter;
use crate::error::{EngineError, Result};
use crate::exchange::ExchangeTracker;
use crate::handlers::{HandlerBinding, Handlers};
use crate::queue::MessageQueue;
use crate::reactor::ReactorContext;
use crate::state::{AgentState, StateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineStatus {
    Created,
    Ready,
    Destroyed,
}

/// Composes driver, bus, assembler, state machine, and tracker into one
/// agent runtime.
pub struct Engine {
    agent_id: Uuid,
    session_id: String,
    driver: Arc<dyn Driver>,
    bus: EventBus,
    cost: CostRates,

    status: Mutex<EngineStatus>,
    initial_handlers: Mutex<Vec<Handlers>>,
    history: Arc<Mutex<Vec<Message>>>,
    queue: MessageQueue,

    adapter: Mutex<Option<Arc<DriverAdapter>>>,
    machine: Mutex<Option<Arc<StateMachine>>>,
    assembler: Mutex<Option<MessageAssembler>>,
    tracker: Mutex<Option<ExchangeTracker>>,

    bindings: Mutex<Vec<SubscriptionHandle>>,
    destroy_callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Engine {
    /// Create an engine over a driver.  The agent id is allocated here; the
    /// session id comes from the driver.  Call [`Engine::initialize`] before
    /// sending.
    pub fn new(driver: Arc<dyn Driver>, config: EngineConfig) -> Self {
        let agent_id = Uuid::now_v7();
        let session_id = driver.session_id().to_owned();
        tracing::info!(agent_id = %agent_id, session_id = %session_id, "engine created");

        Self {
            agent_id,
            session_id,
            driver,
            bus: EventBus::new(),
            cost: config.cost,
            status: Mutex::new(EngineStatus::Created),
            initial_handlers: Mutex::new(config.handlers),
            history: Arc::new(Mutex::new(Vec::new())),
            queue: MessageQueue::new(),
            adapter: Mutex::new(None),
            machine: Mutex::new(None),
            assembler: Mutex::new(None),
            tracker: Mutex::new(None),
            bindings: Mutex::new(Vec::new()),
            destroy_callbacks: Mutex::new(Vec::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    /// The agent id allocated at construction.
    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    /// The logical conversation identity supplied by the driver.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The backend-assigned resumption token, if the driver has one.
    pub fn driver_session_id(&self) -> Option<String> {
        self.driver.driver_session_id()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Wire the pipeline onto the bus and emit `agent_ready`.
    ///
    /// Idempotent while the engine is alive.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Destroyed`] after `destroy()`.
    pub async fn initialize(&self) -> Result<()> {
        match *self.lock_status()? {
            EngineStatus::Ready => return Ok(()),
            EngineStatus::Destroyed => return Err(EngineError::Destroyed),
            EngineStatus::Created => {}
        }

        self.emit(EventPayload::AgentInitializing).await?;

        let adapter = Arc::new(DriverAdapter::new(Arc::clone(&self.driver)));
        adapter.initialize(&self.context());
        *self.adapter.lock().map_err(poisoned("engine adapter"))? = Some(adapter);

        let machine = Arc::new(StateMachine::new());
        machine.initialize(&self.context());
        *self.machine.lock().map_err(poisoned("state machine"))? = Some(machine);

        let assembler = MessageAssembler::new();
        assembler.initialize(&self.context());
        *self.assembler.lock().map_err(poisoned("assembler"))? = Some(assembler);

        let tracker = ExchangeTracker::new(self.cost);
        tracker.initialize(&self.context());
        *self.tracker.lock().map_err(poisoned("exchange tracker"))? = Some(tracker);

        // Handler tables supplied via configuration.
        let initial = std::mem::take(
            &mut *self
                .initial_handlers
                .lock()
                .map_err(poisoned("initial handlers"))?,
        );
        for handlers in initial {
            self.bind(handlers);
        }

        // Assembled messages flow back into history in arrival order.
        let history = Arc::clone(&self.history);
        let history_sub = self.bus.subscribe_all(move |event| {
            let history = Arc::clone(&history);
            Box::pin(async move {
                match event.payload {
                    EventPayload::AssistantMessage { message }
                    | EventPayload::ToolUseMessage { message } => {
                        history
                            .lock()
                            .map_err(poisoned("message history"))?
                            .push(message);
                    }
                    _ => {}
                }
                Ok(())
            })
        });
        if let Ok(mut bindings) = self.bindings.lock() {
            bindings.push(history_sub);
        }

        *self.lock_status()? = EngineStatus::Ready;
        self.emit(EventPayload::AgentReady).await?;
        tracing::info!(agent_id = %self.agent_id, "engine ready");
        Ok(())
    }

    /// Tear the engine down irreversibly.
    ///
    /// Destroy callbacks run in reverse insertion order, bound subscriptions
    /// are disposed, child components shut down in reverse creation order
    /// (tracker, assembler, state machine, adapter, driver), `agent_destroyed`
    /// is emitted, and the bus is closed.  Idempotent.
    pub async fn destroy(&self) -> Result<()> {
        {
            let mut status = self.lock_status()?;
            if *status == EngineStatus::Destroyed {
                return Ok(());
            }
            *status = EngineStatus::Destroyed;
        }
        tracing::info!(agent_id = %self.agent_id, "engine destroying");

        // Teardown tolerates poisoned locks: whatever can be released, is.
        let callbacks = self
            .destroy_callbacks
            .lock()
            .map(|mut callbacks| std::mem::take(&mut *callbacks))
            .unwrap_or_default();
        for callback in callbacks.into_iter().rev() {
            callback();
        }

        let bindings = self
            .bindings
            .lock()
            .map(|mut bindings| std::mem::take(&mut *bindings))
            .unwrap_or_default();
        for binding in bindings {
            binding.dispose();
        }

        if let Some(tracker) = self.tracker.lock().ok().and_then(|mut t| t.take()) {
            tracker.destroy();
        }
        if let Some(assembler) = self.assembler.lock().ok().and_then(|mut a| a.take()) {
            assembler.destroy();
        }
        if let Some(machine) = self.machine.lock().ok().and_then(|mut m| m.take()) {
            machine.destroy();
        }
        let adapter = self.adapter.lock().ok().and_then(|mut a| a.take());
        if let Some(adapter) = adapter {
            adapter.destroy().await;
        }
        self.driver.destroy().await;

        let _ = self.emit(EventPayload::AgentDestroyed).await;
        self.bus.close();
        self.queue.clear();
        Ok(())
    }

    /// Register a callback to run first during `destroy()`.  Callbacks run
    /// in reverse insertion order.
    pub fn on_destroy<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Ok(mut callbacks) = self.destroy_callbacks.lock() {
            callbacks.push(Box::new(callback));
        }
    }

    // -----------------------------------------------------------------------
    // Public surface
    // -----------------------------------------------------------------------

    /// Build a user message from content, record it, and emit it.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotInitialized`] before `initialize()`,
    /// [`EngineError::Destroyed`] after `destroy()`, and
    /// [`EngineError::EmptyMessage`] for whitespace-only content (which also
    /// emits a validation `error_message` event).
    pub async fn send(
        &self,
        content: impl Into<agentflow_core::UserContent>,
    ) -> Result<Message> {
        let message = Message::user(content.into());
        self.send_message(message.clone()).await?;
        Ok(message)
    }

    /// Record and emit a pre-built user message.
    pub async fn send_message(&self, message: Message) -> Result<()> {
        self.ensure_ready()?;

        let MessageBody::User { content } = &message.body else {
            return Err(EngineError::Internal(
                "send_message requires a user message".into(),
            ));
        };
        if content.is_empty() {
            let error = Message::error(
                "message must not be empty",
                Severity::Error,
                ErrorCategory::Validation,
                Some(true),
            );
            self.emit(EventPayload::ErrorMessage { message: error }).await?;
            return Err(EngineError::EmptyMessage);
        }

        self.history
            .lock()
            .map_err(poisoned("message history"))?
            .push(message.clone());
        self.emit(EventPayload::UserMessage { message }).await?;
        Ok(())
    }

    /// Bind a handler table to the bus.  Repeated calls are additive; the
    /// returned binding disposes exactly the subscriptions it created.
    pub fn react(&self, handlers: Handlers) -> Result<HandlerBinding> {
        if *self.lock_status()? == EngineStatus::Destroyed {
            return Err(EngineError::Destroyed);
        }
        Ok(self.bind(handlers))
    }

    /// Cancel the in-flight exchange, if any: abort the driver and emit
    /// `conversation_interrupted`.  A no-op while idle.
    pub async fn interrupt(&self) -> Result<()> {
        self.ensure_ready()?;
        if self.state() == AgentState::Idle {
            return Ok(());
        }

        let adapter = self.adapter.lock().map_err(poisoned("engine adapter"))?.clone();
        if let Some(adapter) = adapter {
            adapter.abort().await;
        }
        self.emit(EventPayload::ConversationInterrupted).await?;
        tracing::info!(agent_id = %self.agent_id, "exchange interrupted");
        Ok(())
    }

    /// Empty the message history and abort any in-flight driver request.
    /// Emits nothing; state transitions happen through normal channels.
    pub async fn clear(&self) -> Result<()> {
        self.ensure_ready()?;
        self.history
            .lock()
            .map_err(poisoned("message history"))?
            .clear();

        let adapter = self.adapter.lock().map_err(poisoned("engine adapter"))?.clone();
        if let Some(adapter) = adapter {
            if adapter.has_inflight() {
                adapter.abort().await;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The current lifecycle state (idle until initialized).
    pub fn state(&self) -> AgentState {
        self.machine
            .lock()
            .ok()
            .and_then(|machine| machine.as_ref().map(|m| m.current()))
            .unwrap_or(AgentState::Idle)
    }

    /// Register a state-change observer on the machine.
    ///
    /// # Errors
    ///
    /// Fails before `initialize()`.
    pub fn on_state_change<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(crate::state::StateChange) + Send + Sync + 'static,
    {
        let machine = self.machine.lock().map_err(poisoned("state machine"))?;
        let machine = machine.as_ref().ok_or(EngineError::NotInitialized)?;
        machine.on_state_change(observer);
        Ok(())
    }

    /// A snapshot of the message history in arrival order.
    pub fn history(&self) -> Vec<Message> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// The pending-message queue for external orchestrators.
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// A read-only view of the bus.
    pub fn consumer(&self) -> agentflow_core::BusConsumer {
        self.bus.consumer()
    }

    /// A write-only view of the bus.
    pub fn producer(&self) -> agentflow_core::BusProducer {
        self.bus.producer()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn context(&self) -> ReactorContext {
        ReactorContext::from_bus(&self.bus, self.agent_id, self.session_id.clone())
    }

    fn lock_status(&self) -> Result<std::sync::MutexGuard<'_, EngineStatus>> {
        self.status.lock().map_err(poisoned("engine status"))
    }

    fn ensure_ready(&self) -> Result<()> {
        match *self.lock_status()? {
            EngineStatus::Created => Err(EngineError::NotInitialized),
            EngineStatus::Destroyed => Err(EngineError::Destroyed),
            EngineStatus::Ready => Ok(()),
        }
    }

    fn bind(&self, handlers: Handlers) -> HandlerBinding {
        let mut handles = Vec::new();
        for (event_type, handler) in handlers.into_entries() {
            let handle = self.bus.subscribe(event_type, move |event| handler(event));
            handles.push(handle);
        }
        if let Ok(mut bindings) = self.bindings.lock() {
            bindings.extend(handles.iter().cloned());
        }
        HandlerBinding::new(handles)
    }

    async fn emit(&self, payload: EventPayload) -> Result<()> {
        self.bus.emit(Event::new(self.agent_id, payload)).await?;
        Ok(())
    }
}

/// Maps a poisoned-lock error onto the matching [`EngineError`] variant.
fn poisoned<T>(what: &'static str) -> impl FnOnce(std::sync::PoisonError<T>) -> EngineError {
    move |_| EngineError::Poisoned { what }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
