//! Publish/subscribe messaging between the scheduler and machines.
//!
//! Topics follow MQTT conventions: `/`-separated levels, with `+` matching
//! exactly one level and a trailing `#` matching any remainder.
//!
//! | Topic                         | Publisher        | Payload            |
//! |-------------------------------|------------------|--------------------|
//! | `machines/{id}/heartbeat`     | machines         | [`Heartbeat`]      |
//! | `machines/{id}/work`          | job assigner     | [`WorkAssignment`] |
//! | `scheduler/orders/create`     | order intake     | [`OrderSpec`]      |
//! | `scheduler/order/completed`   | heartbeat observer | [`OrderCompleted`] |
//! | `scheduler/queue/status`      | queue publisher  | [`QueueStatus`]    |
//!
//! [`Heartbeat`]: crate::scheduler::Heartbeat
//! [`OrderSpec`]: crate::scheduler::OrderSpec

pub mod memory;
pub mod message;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub use memory::InMemoryBus;
pub use message::{OrderCompleted, OrderSnapshot, QueueStatus, WorkAssignment};

pub const HEARTBEAT_FILTER: &str = "machines/+/heartbeat";
pub const ORDER_CREATE_TOPIC: &str = "scheduler/orders/create";
pub const ORDER_COMPLETED_TOPIC: &str = "scheduler/order/completed";
pub const QUEUE_STATUS_TOPIC: &str = "scheduler/queue/status";

pub fn heartbeat_topic(machine_id: &str) -> String {
    format!("machines/{machine_id}/heartbeat")
}

pub fn work_topic(machine_id: &str) -> String {
    format!("machines/{machine_id}/work")
}

/// Machine id embedded in a `machines/{id}/...` topic.
pub fn machine_id_from_topic(topic: &str) -> Option<&str> {
    let mut levels = topic.split('/');
    match (levels.next(), levels.next()) {
        (Some("machines"), Some(id)) if !id.is_empty() => Some(id),
        _ => None,
    }
}

/// MQTT-style topic filter match.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, filter: &str) -> Result<Box<dyn Subscription>>;
}

/// Stream of messages matching one filter.
#[async_trait]
pub trait Subscription: Send {
    /// Next matching message, or `None` once the transport is closed.
    async fn recv(&mut self) -> Option<Message>;
}

/// Serialises `payload` as JSON and publishes it.
pub async fn publish_json<T: Serialize + Sync>(
    transport: &dyn Transport,
    topic: &str,
    payload: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(payload)?;
    transport.publish(topic, bytes).await
}
