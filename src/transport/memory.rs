//! In-process broker
//!
//! Used for `--offline` runs and by the tests. A `MemoryBusHandle` shares
//! the broker state, so the owner of the handle can script connect failures,
//! drop the session, inject inbound messages and inspect what was published.

use super::bus::{cause, InboundMessage, MessageBus};
use super::topics::topic_matches;
use crate::error::{NodeError, NodeResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

impl PublishedMessage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Default)]
struct Broker {
    alive: bool,
    connect_attempts: usize,
    connect_failures: VecDeque<i32>,
    /// Publishes still allowed before the session drops
    publishes_left: Option<usize>,
    published: Vec<PublishedMessage>,
    subscriptions: Vec<String>,
    inbound: VecDeque<InboundMessage>,
    last_error: i32,
}

impl Broker {
    fn deliver(&mut self, message: InboundMessage) -> bool {
        if self
            .subscriptions
            .iter()
            .any(|pattern| topic_matches(pattern, &message.topic))
        {
            self.inbound.push_back(message);
            true
        } else {
            false
        }
    }
}

fn lock(broker: &Mutex<Broker>) -> MutexGuard<'_, Broker> {
    match broker.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct MemoryBus {
    broker: Arc<Mutex<Broker>>,
}

/// Control side of a `MemoryBus`
#[derive(Clone)]
pub struct MemoryBusHandle {
    broker: Arc<Mutex<Broker>>,
}

impl MemoryBus {
    pub fn new() -> (Self, MemoryBusHandle) {
        let broker = Arc::new(Mutex::new(Broker::default()));
        (
            Self {
                broker: Arc::clone(&broker),
            },
            MemoryBusHandle { broker },
        )
    }
}

impl MemoryBusHandle {
    /// Make the next connect attempt fail with `code`
    pub fn fail_next_connect(&self, code: i32) {
        lock(&self.broker).connect_failures.push_back(code);
    }

    /// Drop the session as if the broker went away
    pub fn drop_session(&self) {
        let mut broker = lock(&self.broker);
        broker.alive = false;
        broker.last_error = cause::CONNECTION_LOST;
    }

    /// Let `count` more publishes through, then drop the session on the next one
    pub fn drop_after_publishes(&self, count: usize) {
        lock(&self.broker).publishes_left = Some(count);
    }

    /// Queue a message as if another client had published it.
    /// Returns false when no subscription matches.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        lock(&self.broker).deliver(InboundMessage::new(topic, payload))
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.broker).alive
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.broker).connect_attempts
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.broker).published.clone()
    }

    /// Published messages whose topic starts with `prefix`
    pub fn published_under(&self, prefix: &str) -> Vec<PublishedMessage> {
        lock(&self.broker)
            .published
            .iter()
            .filter(|m| m.topic.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.broker).subscriptions.clone()
    }

    pub fn clear_published(&self) {
        lock(&self.broker).published.clear();
    }
}

#[async_trait::async_trait]
impl MessageBus for MemoryBus {
    async fn connect(&mut self) -> NodeResult<()> {
        let mut broker = lock(&self.broker);
        broker.connect_attempts += 1;

        if let Some(code) = broker.connect_failures.pop_front() {
            broker.alive = false;
            broker.last_error = code;
            return Err(NodeError::link(code, "scripted connect failure"));
        }

        // A new session starts without the previous subscriptions
        broker.subscriptions.clear();
        broker.alive = true;
        broker.last_error = cause::OK;
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut broker = lock(&self.broker);
        broker.alive = false;
        broker.last_error = cause::DISCONNECTED;
    }

    fn is_session_alive(&self) -> bool {
        lock(&self.broker).alive
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>, retained: bool) -> NodeResult<()> {
        let mut broker = lock(&self.broker);
        if !broker.alive {
            return Err(NodeError::link(broker.last_error, "session is down"));
        }

        if let Some(left) = broker.publishes_left {
            if left == 0 {
                broker.publishes_left = None;
                broker.alive = false;
                broker.last_error = cause::CONNECTION_LOST;
                return Err(NodeError::link(cause::CONNECTION_LOST, "session dropped"));
            }
            broker.publishes_left = Some(left - 1);
        }

        debug!("memory bus: {} ({} bytes)", topic, payload.len());
        broker.deliver(InboundMessage::new(topic, payload.clone()));
        broker.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            retained,
        });
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> NodeResult<()> {
        let mut broker = lock(&self.broker);
        if !broker.alive {
            return Err(NodeError::link(broker.last_error, "session is down"));
        }
        if !broker.subscriptions.iter().any(|s| s == topic) {
            broker.subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    fn try_next_message(&mut self) -> Option<InboundMessage> {
        lock(&self.broker).inbound.pop_front()
    }

    fn last_error_code(&self) -> i32 {
        lock(&self.broker).last_error
    }

    fn name(&self) -> &str {
        "memory"
    }
}
