//! Handler registration tables.
//!
//! Library users react to events by supplying a [`Handlers`] table: an
//! ordered mapping from event type to async callback.  Entries can be keyed
//! directly by [`EventType`] or by the `onPascalCase` method-name convention
//! (`onAssistantMessage` binds `assistant_message`); the table is the
//! explicit stand-in for member introspection.

use agentflow_core::bus::{EventHandler, HandlerResult, SubscriptionHandle};
use agentflow_core::event::{Event, EventType};
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Name conversion
// ---------------------------------------------------------------------------

/// Convert an `on`-prefixed PascalCase handler method name to its snake_case
/// event type name.
///
/// Letters split per uppercase boundary: `onFooBar` maps to `foo_bar`,
/// `onXMLHTTP` maps to `x_m_l_h_t_t_p`.  Returns `None` when the name does
/// not follow the convention.
pub fn method_name_to_event_type(name: &str) -> Option<String> {
    let suffix = name.strip_prefix("on")?;
    if !suffix.chars().next()?.is_ascii_uppercase() {
        return None;
    }

    let mut out = String::with_capacity(suffix.len() * 2);
    for (i, ch) in suffix.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// Handlers table
// ---------------------------------------------------------------------------

/// Ordered event-type → callback table, bound to the bus by `react()`.
///
/// Insertion order is preserved for deterministic delivery.  Omitted event
/// types are simply not subscribed.
#[derive(Default)]
pub struct Handlers {
    entries: Vec<(EventType, EventHandler)>,
}

impl Handlers {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for an event type.
    #[must_use]
    pub fn on<F>(mut self, event_type: EventType, handler: F) -> Self
    where
        F: Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
    {
        self.entries.push((event_type, Arc::new(handler)));
        self
    }

    /// Register a callback by its `onPascalCase` convention name.
    ///
    /// # Errors
    ///
    /// Fails when the name does not follow the convention or does not map to
    /// a known event type.
    pub fn method<F>(self, name: &str, handler: F) -> Result<Self>
    where
        F: Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
    {
        let event_name =
            method_name_to_event_type(name).ok_or_else(|| EngineError::Parse {
                reason: format!("handler method name does not follow the `on` convention: {name}"),
            })?;
        let event_type: EventType =
            event_name.parse().map_err(|_| EngineError::Parse {
                reason: format!("no event type for handler method `{name}` ({event_name})"),
            })?;
        Ok(self.on(event_type, handler))
    }

    /// The number of registered callbacks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(EventType, EventHandler)> {
        self.entries
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Combined disposer for one `react()` call.
#[derive(Clone, Default)]
pub struct HandlerBinding {
    handles: Vec<SubscriptionHandle>,
}

impl HandlerBinding {
    pub(crate) fn new(handles: Vec<SubscriptionHandle>) -> Self {
        Self { handles }
    }

    /// Dispose every subscription made by the originating `react()` call.
    /// Idempotent.
    pub fn dispose(&self) {
        for handle in &self.handles {
            handle.dispose();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
