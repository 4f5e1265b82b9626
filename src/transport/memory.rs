use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{topic_matches, Message, Subscription, Transport};
use crate::error::Result;

const DEFAULT_CAPACITY: usize = 4096;

/// In-process pub/sub bus backed by a tokio broadcast channel.
///
/// Every subscriber sees every message and filters locally. Publishing with
/// no subscribers succeeds, matching broker semantics.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    sender: broadcast::Sender<Message>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

#[async_trait]
impl Transport for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let message = Message {
            topic: topic.to_string(),
            payload,
        };
        // Err only means nobody is subscribed right now.
        let _ = self.sender.send(message);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(BusSubscription {
            filter: filter.to_string(),
            receiver: self.sender.subscribe(),
        }))
    }
}

struct BusSubscription {
    filter: String,
    receiver: broadcast::Receiver<Message>,
}

#[async_trait]
impl Subscription for BusSubscription {
    async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if topic_matches(&self.filter, &message.topic) => {
                    return Some(message)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(filter = %self.filter, skipped, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_only_matching_topics() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("machines/+/heartbeat").await.unwrap();

        bus.publish("machines/A-1/work", b"work".to_vec()).await.unwrap();
        bus.publish("machines/A-1/heartbeat", b"hb".to_vec())
            .await
            .unwrap();

        let message = sub.recv().await.unwrap();
        assert_eq!(message.topic, "machines/A-1/heartbeat");
        assert_eq!(message.payload, b"hb".to_vec());
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let bus = InMemoryBus::new();
        assert!(bus.publish("scheduler/queue/status", vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn messages_arrive_in_publish_order() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("scheduler/#").await.unwrap();
        for i in 0..3u8 {
            bus.publish("scheduler/queue/status", vec![i]).await.unwrap();
        }
        for i in 0..3u8 {
            assert_eq!(sub.recv().await.unwrap().payload, vec![i]);
        }
    }
}
