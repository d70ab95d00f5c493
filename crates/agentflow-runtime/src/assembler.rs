//! Message assembler.
//!
//! Accumulates stream deltas into complete messages.  Text blocks stay
//! pending until `message_stop` because an assistant message aggregates every
//! text block of the turn; tool-use blocks are emitted as soon as their stop
//! event closes them.  An interruption discards the partial assembly without
//! emitting anything.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;

use agentflow_core::bus::SubscriptionHandle;
use agentflow_core::event::{Event, EventPayload, StopReason};
use agentflow_core::message::{Message, Usage};

use crate::error::{EngineError, Result};
use crate::reactor::ReactorContext;

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// One active content block, keyed by its index.
#[derive(Debug)]
enum Slot {
    /// Ordered text deltas.
    Text(Vec<String>),
    /// Tool identity plus the accumulating partial JSON input.
    Tool {
        id: String,
        name: String,
        json: String,
    },
}

#[derive(Debug, Default)]
struct AssemblerState {
    /// Driver-assigned id of the message currently being assembled.
    message_id: Option<String>,
    /// Arrival time of the current `message_start`.
    started_at: Option<DateTime<Utc>>,
    /// Active blocks by index; BTreeMap iteration gives the ascending-index
    /// concatenation order.
    slots: BTreeMap<u32, Slot>,
    /// Usage remembered from `message_delta`, superseded by `message_stop`.
    usage: Option<Usage>,
    /// Stop reason remembered from `message_delta`.
    stop_reason: Option<StopReason>,
}

impl AssemblerState {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

/// Accumulates stream deltas into assistant and tool-use messages.
pub struct MessageAssembler {
    state: Arc<Mutex<AssemblerState>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl MessageAssembler {
    /// Create an idle assembler.  Call [`MessageAssembler::initialize`] to
    /// attach it to a bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AssemblerState::default())),
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe to the stream layer and start assembling.
    pub fn initialize(&self, ctx: &ReactorContext) {
        let state = Arc::clone(&self.state);
        let producer = ctx.producer.clone();
        let agent_id = ctx.agent_id;

        let subscription = ctx.consumer.subscribe_all(move |event| {
            let state = Arc::clone(&state);
            let producer = producer.clone();
            Box::pin(async move {
                if let Some(message) = handle_event(&state, event)? {
                    producer.emit(Event::new(agent_id, message)).await?;
                }
                Ok(())
            })
        });
        if let Ok(mut slot) = self.subscription.lock() {
            *slot = Some(subscription);
        }
    }

    /// Detach from the bus and drop any partial assembly.
    pub fn destroy(&self) {
        if let Some(subscription) = self.subscription.lock().ok().and_then(|mut s| s.take()) {
            subscription.dispose();
        }
        if let Ok(mut state) = self.state.lock() {
            state.reset();
        }
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply one event to the accumulator, returning a message-layer payload to
/// emit when the event completes a message.
fn handle_event(state: &Mutex<AssemblerState>, event: Event) -> Result<Option<EventPayload>> {
    let mut state = state.lock().map_err(|_| EngineError::Poisoned {
        what: "assembler accumulator",
    })?;
    Ok(match event.payload {
        EventPayload::MessageStart { message_id, .. } => {
            state.reset();
            state.message_id = Some(message_id);
            state.started_at = Some(event.timestamp);
            None
        }

        EventPayload::TextDelta { index, text } => {
            match state
                .slots
                .entry(index)
                .or_insert_with(|| Slot::Text(Vec::new()))
            {
                Slot::Text(deltas) => deltas.push(text),
                Slot::Tool { .. } => {
                    tracing::warn!(index, "text delta for a tool-use block; ignoring");
                }
            }
            None
        }

        EventPayload::TextContentBlockStart { index } => {
            state.slots.entry(index).or_insert_with(|| Slot::Text(Vec::new()));
            None
        }

        // Text blocks stay pending until message_stop.
        EventPayload::TextContentBlockStop { .. } => None,

        EventPayload::ToolUseContentBlockStart { index, id, name } => {
            state.slots.insert(
                index,
                Slot::Tool {
                    id,
                    name,
                    json: String::new(),
                },
            );
            None
        }

        EventPayload::InputJsonDelta {
            index,
            partial_json,
        } => {
            match state.slots.get_mut(&index) {
                Some(Slot::Tool { json, .. }) => json.push_str(&partial_json),
                _ => tracing::warn!(index, "input json delta without a tool-use block; ignoring"),
            }
            None
        }

        EventPayload::ToolUseContentBlockStop { index, .. } => {
            let Some(Slot::Tool { id, name, json }) = state.slots.remove(&index) else {
                return Ok(None);
            };
            let input = if json.is_empty() {
                // No-argument tools produce zero input deltas.
                Ok(Value::Object(serde_json::Map::new()))
            } else {
                serde_json::from_str(&json)
            };
            match input {
                Ok(input) => Some(EventPayload::ToolUseMessage {
                    message: Message::tool_use(id, name, input),
                }),
                Err(error) => {
                    tracing::warn!(
                        index,
                        tool_id = %id,
                        error = %error,
                        "tool input did not assemble into valid JSON; skipping block"
                    );
                    None
                }
            }
        }

        EventPayload::MessageDelta { stop_reason, usage } => {
            if stop_reason.is_some() {
                state.stop_reason = stop_reason;
            }
            if usage.is_some() {
                state.usage = usage;
            }
            None
        }

        EventPayload::MessageStop { stop_reason, usage } => {
            // A stop with no open message (e.g. after an interruption
            // discarded the assembly) has nothing to emit.
            let Some(message_id) = state.message_id.take() else {
                state.reset();
                return Ok(None);
            };
            let started_at = state.started_at.take().unwrap_or(event.timestamp);
            let effective_stop = stop_reason.or(state.stop_reason);
            let effective_usage = usage.or(state.usage);

            // BTreeMap iteration yields slots in ascending index order.
            let slots = std::mem::take(&mut state.slots);
            state.reset();

            // The turn continues after tool_use; no assistant message yet.
            if effective_stop == Some(StopReason::ToolUse) {
                return Ok(None);
            }

            let content: String = slots
                .into_values()
                .filter_map(|slot| match slot {
                    Slot::Text(deltas) => Some(deltas.concat()),
                    Slot::Tool { .. } => None,
                })
                .collect();

            let message = Message::assistant(content, effective_usage)
                .with_id(message_id)
                .with_timestamp(started_at);
            Some(EventPayload::AssistantMessage { message })
        }

        EventPayload::ConversationInterrupted => {
            state.reset();
            None
        }

        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::bus::EventBus;
    use agentflow_core::message::MessageBody;
    use uuid::Uuid;

    struct Fixture {
        bus: EventBus,
        agent_id: Uuid,
        assembler: MessageAssembler,
        messages: Arc<Mutex<Vec<Message>>>,
    }

    fn fixture() -> Fixture {
        let bus = EventBus::new();
        let agent_id = Uuid::now_v7();
        let assembler = MessageAssembler::new();
        assembler.initialize(&ReactorContext::from_bus(&bus, agent_id, "s1"));

        let messages = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&messages);
        bus.subscribe_all(move |event| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                match event.payload {
                    EventPayload::AssistantMessage { message }
                    | EventPayload::ToolUseMessage { message } => {
                        log.lock().unwrap().push(message);
                    }
                    _ => {}
                }
                Ok(())
            })
        });

        Fixture {
            bus,
            agent_id,
            assembler,
            messages,
        }
    }

    impl Fixture {
        async fn feed(&self, payloads: Vec<EventPayload>) {
            for payload in payloads {
                self.bus
                    .emit(Event::new(self.agent_id, payload))
                    .await
                    .unwrap();
            }
        }

        fn assembled(&self) -> Vec<Message> {
            self.messages.lock().unwrap().clone()
        }
    }

    fn start(id: &str) -> EventPayload {
        EventPayload::MessageStart {
            message_id: id.into(),
            model: "x".into(),
        }
    }

    fn stop(reason: StopReason) -> EventPayload {
        EventPayload::MessageStop {
            stop_reason: Some(reason),
            usage: None,
        }
    }

    #[tokio::test]
    async fn assembles_text_deltas_into_an_assistant_message() {
        let fx = fixture();
        fx.feed(vec![
            start("m1"),
            EventPayload::TextContentBlockStart { index: 0 },
            EventPayload::TextDelta {
                index: 0,
                text: "Hel".into(),
            },
            EventPayload::TextDelta {
                index: 0,
                text: "lo".into(),
            },
            EventPayload::TextContentBlockStop { index: 0 },
            stop(StopReason::EndTurn),
        ])
        .await;

        let messages = fx.assembled();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages[0].content_text(), "Hello");
    }

    #[tokio::test]
    async fn concatenates_blocks_in_ascending_index_order() {
        let fx = fixture();
        // Blocks arrive at index 1 first, then index 0.
        fx.feed(vec![
            start("m1"),
            EventPayload::TextContentBlockStart { index: 1 },
            EventPayload::TextDelta {
                index: 1,
                text: "B".into(),
            },
            EventPayload::TextContentBlockStop { index: 1 },
            EventPayload::TextContentBlockStart { index: 0 },
            EventPayload::TextDelta {
                index: 0,
                text: "A".into(),
            },
            EventPayload::TextContentBlockStop { index: 0 },
            stop(StopReason::EndTurn),
        ])
        .await;

        assert_eq!(fx.assembled()[0].content_text(), "AB");
    }

    #[tokio::test]
    async fn emits_tool_use_message_with_parsed_input() {
        let fx = fixture();
        fx.feed(vec![
            start("m1"),
            EventPayload::ToolUseContentBlockStart {
                index: 0,
                id: "t1".into(),
                name: "search".into(),
            },
            EventPayload::InputJsonDelta {
                index: 0,
                partial_json: "{\"q\":".into(),
            },
            EventPayload::InputJsonDelta {
                index: 0,
                partial_json: "\"x\"}".into(),
            },
            EventPayload::ToolUseContentBlockStop {
                index: 0,
                id: "t1".into(),
            },
            stop(StopReason::ToolUse),
        ])
        .await;

        let messages = fx.assembled();
        // Tool-use message only; the turn continues, so no assistant message.
        assert_eq!(messages.len(), 1);
        match &messages[0].body {
            MessageBody::ToolUse { call, result } => {
                assert_eq!(call.id, "t1");
                assert_eq!(call.name, "search");
                assert_eq!(call.input, serde_json::json!({"q": "x"}));
                assert_eq!(result.output, agentflow_core::ToolOutput::pending());
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_tool_input_skips_the_block() {
        let fx = fixture();
        fx.feed(vec![
            start("m1"),
            EventPayload::ToolUseContentBlockStart {
                index: 0,
                id: "t1".into(),
                name: "search".into(),
            },
            EventPayload::InputJsonDelta {
                index: 0,
                partial_json: "{not json".into(),
            },
            EventPayload::ToolUseContentBlockStop {
                index: 0,
                id: "t1".into(),
            },
            // A sibling text block in the same message still assembles.
            EventPayload::TextContentBlockStart { index: 1 },
            EventPayload::TextDelta {
                index: 1,
                text: "done".into(),
            },
            EventPayload::TextContentBlockStop { index: 1 },
            stop(StopReason::EndTurn),
        ])
        .await;

        let messages = fx.assembled();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role(), agentflow_core::Role::Assistant);
        assert_eq!(messages[0].content_text(), "done");
    }

    #[tokio::test]
    async fn empty_tool_input_parses_as_empty_object() {
        let fx = fixture();
        fx.feed(vec![
            start("m1"),
            EventPayload::ToolUseContentBlockStart {
                index: 0,
                id: "t1".into(),
                name: "ping".into(),
            },
            EventPayload::ToolUseContentBlockStop {
                index: 0,
                id: "t1".into(),
            },
        ])
        .await;

        let messages = fx.assembled();
        assert_eq!(messages.len(), 1);
        match &messages[0].body {
            MessageBody::ToolUse { call, .. } => {
                assert_eq!(call.input, serde_json::json!({}));
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn usage_carried_from_message_delta() {
        let fx = fixture();
        fx.feed(vec![
            start("m1"),
            EventPayload::TextContentBlockStart { index: 0 },
            EventPayload::TextDelta {
                index: 0,
                text: "ok".into(),
            },
            EventPayload::TextContentBlockStop { index: 0 },
            EventPayload::MessageDelta {
                stop_reason: Some(StopReason::EndTurn),
                usage: Some(Usage {
                    input: 11,
                    output: 7,
                }),
            },
            EventPayload::MessageStop {
                stop_reason: None,
                usage: None,
            },
        ])
        .await;

        let messages = fx.assembled();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].usage(),
            Some(Usage {
                input: 11,
                output: 7
            })
        );
    }

    #[tokio::test]
    async fn interruption_discards_partial_assembly() {
        let fx = fixture();
        fx.feed(vec![
            start("m1"),
            EventPayload::TextContentBlockStart { index: 0 },
            EventPayload::TextDelta {
                index: 0,
                text: "par".into(),
            },
            EventPayload::ConversationInterrupted,
            // A stray stop after the interruption assembles nothing from the
            // discarded deltas.
            stop(StopReason::EndTurn),
        ])
        .await;

        assert!(fx.assembled().is_empty());
    }

    #[tokio::test]
    async fn at_most_one_assistant_message_per_pair() {
        let fx = fixture();
        fx.feed(vec![
            start("m1"),
            EventPayload::TextContentBlockStart { index: 0 },
            EventPayload::TextDelta {
                index: 0,
                text: "one".into(),
            },
            EventPayload::TextContentBlockStop { index: 0 },
            stop(StopReason::EndTurn),
            start("m2"),
            EventPayload::TextContentBlockStart { index: 0 },
            EventPayload::TextDelta {
                index: 0,
                text: "two".into(),
            },
            EventPayload::TextContentBlockStop { index: 0 },
            stop(StopReason::EndTurn),
        ])
        .await;

        let messages = fx.assembled();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content_text(), "one");
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages[1].content_text(), "two");
        assert_eq!(messages[1].id, "m2");
    }
}
