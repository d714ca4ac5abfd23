//! In-memory pub/sub for inter-agent messages, with bounded history.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Message target: one agent id, or every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    Agent(String),
    Broadcast,
}

/// One inter-agent message. `sequence` and `sent_at` are stamped by the bus
/// at publish time; values set by the caller are overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub to: Recipient,
    pub content: Value,
    pub sequence: u64,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn new(from: impl Into<String>, to: Recipient, content: Value) -> Self {
        Self {
            from: from.into(),
            to,
            content,
            sequence: 0,
            sent_at: Utc::now(),
        }
    }

    /// Message addressed to a single agent id.
    pub fn direct(from: impl Into<String>, to: impl Into<String>, content: Value) -> Self {
        Self::new(from, Recipient::Agent(to.into()), content)
    }

    /// Message addressed to every subscriber.
    pub fn broadcast(from: impl Into<String>, content: Value) -> Self {
        Self::new(from, Recipient::Broadcast, content)
    }
}

#[derive(Debug)]
struct BusInner {
    next_sequence: u64,
    history: VecDeque<Message>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Message>>>,
}

/// Pub/sub bus scoped to one run. Each subscription owns an unbounded FIFO
/// queue; history is a bounded ring that drops its oldest entry when full.
///
/// Sequence stamping, history retention and fan-out all happen under one
/// lock, so the order any subscriber observes is exactly sequence order
/// even with concurrent publishers.
#[derive(Debug)]
pub struct MessageBus {
    inner: Mutex<BusInner>,
    history_limit: usize,
}

impl MessageBus {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                next_sequence: 1,
                history: VecDeque::new(),
                subscribers: HashMap::new(),
            }),
            history_limit: history_limit.max(1),
        }
    }

    /// Register a queue under `agent_id`. Multiple subscriptions per agent
    /// id are allowed; each receives its own copy of matching messages.
    /// Subscriptions only see messages published after they registered.
    pub fn subscribe(&self, agent_id: impl Into<String>) -> MessageSubscription {
        let agent_id = agent_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .subscribers
            .entry(agent_id.clone())
            .or_default()
            .push(tx);
        debug!(agent_id = %agent_id, "bus subscription registered");
        MessageSubscription {
            agent_id,
            receiver: rx,
        }
    }

    /// Stamp, store and deliver. Returns the assigned sequence number.
    /// Closed subscriptions on the target are pruned as a side effect.
    pub fn publish(&self, mut message: Message) -> u64 {
        let mut inner = self.inner.lock();
        message.sequence = inner.next_sequence;
        inner.next_sequence += 1;
        message.sent_at = Utc::now();
        let sequence = message.sequence;

        while inner.history.len() >= self.history_limit {
            inner.history.pop_front();
        }
        inner.history.push_back(message.clone());

        match &message.to {
            Recipient::Agent(agent_id) => {
                let delivered = match inner.subscribers.get_mut(agent_id) {
                    Some(queues) => {
                        queues.retain(|queue| queue.send(message.clone()).is_ok());
                        !queues.is_empty()
                    }
                    None => false,
                };
                if !delivered {
                    warn!(
                        agent_id = %agent_id,
                        from = %message.from,
                        "message to agent with no live subscribers"
                    );
                }
            }
            Recipient::Broadcast => {
                for queues in inner.subscribers.values_mut() {
                    queues.retain(|queue| queue.send(message.clone()).is_ok());
                }
            }
        }
        sequence
    }

    /// Retained messages, oldest first.
    pub fn history(&self) -> Vec<Message> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    /// Registered subscriptions for `agent_id`. Closed ones are counted
    /// until a publish to that agent prunes them.
    pub fn subscriber_count(&self, agent_id: &str) -> usize {
        self.inner
            .lock()
            .subscribers
            .get(agent_id)
            .map(|queues| queues.len())
            .unwrap_or(0)
    }
}

/// Receiving end of one subscription. FIFO in publish order.
#[derive(Debug)]
pub struct MessageSubscription {
    agent_id: String,
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl MessageSubscription {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Next message, waiting if the queue is empty. `None` once the bus has
    /// been dropped and the queue drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn direct_delivery_is_fifo_with_stamped_sequences() {
        let bus = MessageBus::new(16);
        let mut sub = bus.subscribe("poet");

        bus.publish(Message::direct("muse", "poet", json!({"line": 1})));
        bus.publish(Message::direct("muse", "poet", json!({"line": 2})));
        bus.publish(Message::direct("muse", "poet", json!({"line": 3})));

        let received: Vec<Message> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert_eq!(received.len(), 3);
        assert_eq!(
            received.iter().map(|m| m.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(received[0].content, json!({"line": 1}));
        assert_eq!(received[2].content, json!({"line": 3}));
    }

    #[test]
    fn broadcast_reaches_every_subscription() {
        let bus = MessageBus::new(16);
        let mut critic = bus.subscribe("critic");
        let mut editor = bus.subscribe("editor");
        let mut poet = bus.subscribe("poet");

        bus.publish(Message::broadcast("poet", json!("draft ready")));

        for sub in [&mut critic, &mut editor, &mut poet] {
            let msg = sub.try_recv().unwrap();
            assert_eq!(msg.from, "poet");
            assert_eq!(msg.content, json!("draft ready"));
        }
    }

    #[test]
    fn direct_message_only_reaches_the_target() {
        let bus = MessageBus::new(16);
        let mut critic = bus.subscribe("critic");
        let mut editor = bus.subscribe("editor");

        bus.publish(Message::direct("poet", "critic", json!("thoughts?")));

        assert!(critic.try_recv().is_some());
        assert!(editor.try_recv().is_none());
    }

    #[test]
    fn two_subscriptions_same_agent_each_get_a_copy() {
        let bus = MessageBus::new(16);
        let mut first = bus.subscribe("critic");
        let mut second = bus.subscribe("critic");

        bus.publish(Message::direct("poet", "critic", json!("hello")));

        assert!(first.try_recv().is_some());
        assert!(second.try_recv().is_some());
    }

    #[test]
    fn history_drops_oldest_when_full() {
        let bus = MessageBus::new(3);
        for i in 1..=5 {
            bus.publish(Message::broadcast("poet", json!(i)));
        }

        let history = bus.history();
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.iter().map(|m| m.sequence).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
        assert_eq!(bus.history_len(), 3);
    }

    #[test]
    fn publish_without_subscribers_still_records_history() {
        let bus = MessageBus::new(8);
        let sequence = bus.publish(Message::direct("poet", "nobody", json!("anyone?")));
        assert_eq!(sequence, 1);
        assert_eq!(bus.history_len(), 1);
    }

    #[test]
    fn closed_subscriptions_are_pruned_on_publish() {
        let bus = MessageBus::new(8);
        let sub = bus.subscribe("critic");
        assert_eq!(bus.subscriber_count("critic"), 1);

        drop(sub);
        bus.publish(Message::direct("poet", "critic", json!("gone")));
        assert_eq!(bus.subscriber_count("critic"), 0);
    }

    #[tokio::test]
    async fn recv_waits_for_the_next_message() {
        let bus = std::sync::Arc::new(MessageBus::new(8));
        let mut sub = bus.subscribe("critic");

        let publisher = std::sync::Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            publisher.publish(Message::direct("poet", "critic", json!("late")));
        });

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.content, json!("late"));
    }

    #[test]
    fn concurrent_publishers_never_reorder_a_subscriber_queue() {
        let bus = std::sync::Arc::new(MessageBus::new(1024));
        let mut sub = bus.subscribe("audience");

        let mut handles = Vec::new();
        for speaker in ["alpha", "beta", "gamma"] {
            let bus = std::sync::Arc::clone(&bus);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    bus.publish(Message::direct(speaker, "audience", json!(i)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let sequences: Vec<u64> = std::iter::from_fn(|| sub.try_recv())
            .map(|m| m.sequence)
            .collect();
        assert_eq!(sequences.len(), 150);
        assert!(
            sequences.windows(2).all(|pair| pair[0] < pair[1]),
            "delivery order must match sequence order"
        );
    }
}
