//! Reactor context.
//!
//! The bundle of bus views and identity handed to every pipeline component's
//! lifecycle methods.  Components that historically took a bus directly and
//! components that took an explicit context are one implementation here:
//! [`ReactorContext::from_bus`] covers the bus-direct form.

use agentflow_core::bus::{BusConsumer, BusProducer, EventBus};
use agentflow_core::event::{Event, EventPayload};
use uuid::Uuid;

use crate::error::Result;

/// Bus views plus agent identity, passed to component initialize/destroy.
#[derive(Clone)]
pub struct ReactorContext {
    /// Write-only bus view.
    pub producer: BusProducer,
    /// Read-only bus view.
    pub consumer: BusConsumer,
    /// The agent every emitted event is stamped with.
    pub agent_id: Uuid,
    /// Logical conversation identity supplied by the driver.
    pub session_id: String,
}

impl ReactorContext {
    /// Bundle explicit views with an identity.
    pub fn new(
        producer: BusProducer,
        consumer: BusConsumer,
        agent_id: Uuid,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            producer,
            consumer,
            agent_id,
            session_id: session_id.into(),
        }
    }

    /// Derive both views from a bus.
    pub fn from_bus(bus: &EventBus, agent_id: Uuid, session_id: impl Into<String>) -> Self {
        Self::new(bus.producer(), bus.consumer(), agent_id, session_id)
    }

    /// Emit a payload enveloped with this context's agent id.
    pub async fn emit(&self, payload: EventPayload) -> Result<()> {
        self.producer.emit(Event::new(self.agent_id, payload)).await?;
        Ok(())
    }
}
