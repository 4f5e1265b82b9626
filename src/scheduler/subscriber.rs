use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, SchedulerError};
use crate::scheduler::order::{OrderId, OrderSpec};
use crate::scheduler::orders::OrderManager;
use crate::transport::{Message, Transport, ORDER_CREATE_TOPIC};

/// Turns order-creation messages into orders.
///
/// Payloads are parsed strictly. A malformed or invalid request is dropped and
/// logged, never retried.
pub struct OrderSubscriber {
    transport: Arc<dyn Transport>,
    orders: OrderManager,
}

impl OrderSubscriber {
    pub fn new(transport: Arc<dyn Transport>, orders: OrderManager) -> Self {
        Self { transport, orders }
    }

    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let mut subscription = self.transport.subscribe(ORDER_CREATE_TOPIC).await?;
        tracing::info!(topic = ORDER_CREATE_TOPIC, "Order subscriber listening");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Order subscriber stopped");
                    break;
                }
                message = subscription.recv() => {
                    let Some(message) = message else {
                        tracing::warn!("Order subscription closed");
                        break;
                    };
                    match self.handle_message(&message).await {
                        Ok(_) => {}
                        Err(e @ (SchedulerError::MalformedMessage { .. } | SchedulerError::InvalidOrder(_))) => {
                            tracing::warn!(error = %e, "Dropping order request");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to create order");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn handle_message(&self, message: &Message) -> Result<OrderId> {
        let spec: OrderSpec = serde_json::from_slice(&message.payload)
            .map_err(|e| SchedulerError::malformed(&message.topic, e.to_string()))?;
        self.orders.create_order(&spec).await
    }
}
