use thiserror::Error;

use crate::scheduler::{OrderId, UnitId};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Unit not found: {0}")]
    UnitNotFound(UnitId),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed message on {topic}: {reason}")]
    MalformedMessage { topic: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn malformed(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
