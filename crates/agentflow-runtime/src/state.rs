//! Agent state machine.
//!
//! Derives lifecycle state from the stream layer and lifts it into state
//! events.  Transitions are total: inputs with no entry in the table are
//! no-ops, and a transition to the current state is suppressed so observers
//! only ever see real changes.
//!
//! `tool_planned` / `tool_executing` transition at derivation time (both are
//! derived from one `tool_use_content_block_start`); every other state event
//! also applies when observed on the bus, so externally emitted
//! `tool_completed` / `tool_failed` / `conversation_interrupted` events move
//! the machine too.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentflow_core::bus::SubscriptionHandle;
use agentflow_core::event::{Event, EventPayload, StopReason};

use crate::reactor::ReactorContext;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Nothing in flight.
    Idle,
    /// A request was sent; no output observed yet.
    Thinking,
    /// Text output is streaming.
    Responding,
    /// The backend announced a tool invocation.
    PlanningTool,
    /// Waiting on an external tool result.
    AwaitingToolResult,
    /// A failure was lifted into the state layer.
    Error,
}

/// A state transition delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub prev: AgentState,
    pub current: AgentState,
}

/// Callback invoked on every real state change.
pub type StateObserver = Arc<dyn Fn(StateChange) + Send + Sync>;

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

struct MachineState {
    current: AgentState,
    /// Stop reason remembered from `message_delta`.
    pending_stop: Option<StopReason>,
    observers: Vec<StateObserver>,
}

/// Derives agent lifecycle state from observed bus events.
pub struct StateMachine {
    state: Arc<Mutex<MachineState>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl StateMachine {
    /// Create a machine in the idle state.  Call
    /// [`StateMachine::initialize`] to attach it to a bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MachineState {
                current: AgentState::Idle,
                pending_stop: None,
                observers: Vec::new(),
            })),
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe to the bus and start deriving state.
    pub fn initialize(&self, ctx: &ReactorContext) {
        let state = Arc::clone(&self.state);
        let producer = ctx.producer.clone();
        let agent_id = ctx.agent_id;

        let subscription = ctx.consumer.subscribe_all(move |event| {
            let state = Arc::clone(&state);
            let producer = producer.clone();
            Box::pin(async move {
                for payload in handle_event(&state, &event.payload) {
                    producer
                        .emit(Event::new(agent_id, payload))
                        .await?;
                }
                Ok(())
            })
        });
        if let Ok(mut slot) = self.subscription.lock() {
            *slot = Some(subscription);
        }
    }

    /// The current state.  A machine whose lock was poisoned by a panicking
    /// observer reads as [`AgentState::Error`].
    pub fn current(&self) -> AgentState {
        self.state
            .lock()
            .map(|guard| guard.current)
            .unwrap_or(AgentState::Error)
    }

    /// Register an observer; observers run in registration order and only
    /// when the state actually changes.
    pub fn on_state_change<F>(&self, observer: F)
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        if let Ok(mut guard) = self.state.lock() {
            guard.observers.push(Arc::new(observer));
        }
    }

    /// Force the machine back to idle.  Emits no change when already idle.
    pub fn reset(&self) {
        transition(&self.state, AgentState::Idle);
    }

    /// Detach from the bus.
    pub fn destroy(&self) {
        if let Some(subscription) = self.subscription.lock().ok().and_then(|mut s| s.take()) {
            subscription.dispose();
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Transition logic
// ---------------------------------------------------------------------------

/// Apply an observed event, returning derived state events to emit.
fn handle_event(state: &Arc<Mutex<MachineState>>, payload: &EventPayload) -> Vec<EventPayload> {
    let mut derived = Vec::new();
    match payload {
        // -- Stream layer: derive state events ------------------------------
        EventPayload::MessageStart { message_id, .. } => {
            if current_of(state) == Some(AgentState::Idle) {
                derived.push(EventPayload::ConversationStart {
                    message_id: message_id.clone(),
                });
                transition(state, AgentState::Thinking);
            }
        }

        EventPayload::TextDelta { .. } => {
            if current_of(state) == Some(AgentState::Thinking) {
                derived.push(EventPayload::ConversationResponding);
                transition(state, AgentState::Responding);
            }
        }

        EventPayload::ToolUseContentBlockStart { id, name, .. } => {
            derived.push(EventPayload::ToolPlanned {
                tool_id: id.clone(),
                tool_name: name.clone(),
            });
            transition(state, AgentState::PlanningTool);
            // The input has not streamed yet; the assembled tool_use_message
            // carries the parsed value later.
            derived.push(EventPayload::ToolExecuting {
                tool_id: id.clone(),
                tool_name: name.clone(),
                input: Value::Null,
            });
            transition(state, AgentState::AwaitingToolResult);
        }

        EventPayload::MessageDelta { stop_reason, .. } => {
            if stop_reason.is_some() {
                if let Ok(mut guard) = state.lock() {
                    guard.pending_stop = *stop_reason;
                }
            }
        }

        EventPayload::MessageStop { stop_reason, .. } => {
            let pending = state.lock().ok().and_then(|mut guard| guard.pending_stop.take());
            match stop_reason.or(pending) {
                Some(reason) if reason.is_terminal() => {
                    derived.push(EventPayload::ConversationEnd { reason });
                    transition(state, AgentState::Idle);
                }
                _ => {}
            }
        }

        EventPayload::ErrorReceived {
            message,
            error_code,
        } => {
            derived.push(EventPayload::ErrorOccurred {
                code: error_code
                    .clone()
                    .unwrap_or_else(|| "unknown_error".to_owned()),
                message: message.clone(),
                recoverable: true,
            });
            transition(state, AgentState::Error);
        }

        // -- State layer: apply transitions for observed state events -------
        EventPayload::ConversationStart { .. } => {
            if current_of(state) == Some(AgentState::Idle) {
                transition(state, AgentState::Thinking);
            }
        }
        EventPayload::ConversationThinking => transition(state, AgentState::Thinking),
        EventPayload::ConversationResponding => transition(state, AgentState::Responding),
        EventPayload::ConversationEnd { .. } | EventPayload::ConversationInterrupted => {
            if let Ok(mut guard) = state.lock() {
                guard.pending_stop = None;
            }
            transition(state, AgentState::Idle);
        }
        EventPayload::ToolCompleted { .. } | EventPayload::ToolFailed { .. } => {
            transition(state, AgentState::Responding);
        }
        EventPayload::ErrorOccurred { .. } => transition(state, AgentState::Error),

        _ => {}
    }
    derived
}

/// The current state, or `None` when the lock is poisoned (in which case
/// callers skip their derivation rather than act on a guess).
fn current_of(state: &Arc<Mutex<MachineState>>) -> Option<AgentState> {
    state.lock().ok().map(|guard| guard.current)
}

/// Move to `next`, notifying observers when the state actually changes.
/// A poisoned lock drops the transition.
fn transition(state: &Arc<Mutex<MachineState>>, next: AgentState) {
    let (change, observers) = {
        let Ok(mut guard) = state.lock() else {
            tracing::warn!(?next, "machine state poisoned; dropping transition");
            return;
        };
        if guard.current == next {
            return;
        }
        let change = StateChange {
            prev: guard.current,
            current: next,
        };
        guard.current = next;
        (change, guard.observers.clone())
    };

    tracing::debug!(prev = ?change.prev, current = ?change.current, "agent state changed");
    for observer in observers {
        observer(change);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
