//! Pending-message queue.
//!
//! A FIFO of inbound user messages that arrived while the agent was busy.
//! The engine owns one but never blocks `send()` on it; external
//! orchestrators that want strict serialization dequeue from here when the
//! agent returns to idle.

use std::collections::VecDeque;
use std::sync::Mutex;

use agentflow_core::Message;

/// FIFO of pending inbound user messages.  Lifecycle is tied to the engine.
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: Mutex<VecDeque<Message>>,
}

impl MessageQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the back of the queue.
    pub fn enqueue(&self, message: Message) {
        if let Ok(mut items) = self.items.lock() {
            items.push_back(message);
        }
    }

    /// Remove and return the message at the front of the queue.
    pub fn dequeue(&self) -> Option<Message> {
        self.items.lock().ok().and_then(|mut items| items.pop_front())
    }

    /// The number of pending messages.
    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items
            .lock()
            .map(|items| items.is_empty())
            .unwrap_or(true)
    }

    /// Drop every pending message.
    pub fn clear(&self) {
        if let Ok(mut items) = self.items.lock() {
            items.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let queue = MessageQueue::new();
        assert!(queue.is_empty());

        queue.enqueue(Message::user("first"));
        queue.enqueue(Message::user("second"));
        queue.enqueue(Message::user("third"));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.dequeue().unwrap().content_text(), "first");
        assert_eq!(queue.dequeue().unwrap().content_text(), "second");
        assert_eq!(queue.dequeue().unwrap().content_text(), "third");
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn clear_empties_the_queue() {
        let queue = MessageQueue::new();
        queue.enqueue(Message::user("a"));
        queue.enqueue(Message::user("b"));

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.dequeue().is_none());
    }
}
