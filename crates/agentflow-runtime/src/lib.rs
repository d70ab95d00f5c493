//! agentflow runtime.
//!
//! The layered, event-driven core of an agent: a pluggable [`driver`] feeds
//! fine-grained stream events onto one bus, and the pipeline lifts them into
//! three higher layers consumed over the same bus.
//!
//! ```text
//!                    ┌───────────────┐
//!   user input ────> │    Engine     │──── user_message ────┐
//!                    └───────┬───────┘                      │
//!                            │                        ┌─────┴─────┐
//!                    ┌───────┴───────┐                │ EventBus  │
//!                    │ DriverAdapter │<── subscribe ──┤ (core)    │
//!                    └───────┬───────┘                └─────┬─────┘
//!                            │ stream events                │
//!            ┌───────────────┼──────────────┐               │
//!     ┌──────┴─────┐  ┌──────┴──────┐  ┌────┴────────┐      │
//!     │ Assembler  │  │ StateMachine│  │ ExchangeTr. │── emits ──> bus
//!     │ (messages) │  │ (state)     │  │ (exchanges) │
//!     └────────────┘  └─────────────┘  └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`driver`] -- the driver seam, framing template, replay driver, and the
//!   bus adapter.
//! - [`assembler`] -- delta accumulation into complete messages.
//! - [`state`] -- the lifecycle state machine.
//! - [`exchange`] -- request/response pairing with duration, usage, cost.
//! - [`engine`] -- the composition root.
//! - [`agent`] -- the public facade (which is itself a valid driver).
//! - [`handlers`] -- event handler registration tables.
//! - [`queue`] -- the pending-message FIFO.
//! - [`cancel`] -- cooperative cancellation tokens.
//! - [`error`] -- runtime error types.

pub mod agent;
pub mod assembler;
pub mod cancel;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod handlers;
pub mod queue;
pub mod reactor;
pub mod state;

// Re-export the most commonly used types at the crate root.
pub use agent::Agent;
pub use assembler::MessageAssembler;
pub use cancel::CancelToken;
pub use config::{CostRates, EngineConfig};
pub use driver::{
    Driver, DriverInput, StreamEvent, StreamEventStream,
    adapter::DriverAdapter,
    base::{BaseDriver, ContentBlock, ContentSource},
    replay::ReplayDriver,
};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use exchange::ExchangeTracker;
pub use handlers::{HandlerBinding, Handlers, method_name_to_event_type};
pub use queue::MessageQueue;
pub use reactor::ReactorContext;
pub use state::{AgentState, StateChange, StateMachine};
