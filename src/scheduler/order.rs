use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

pub type OrderId = u64;

/// Largest number of units a single order may request.
pub const MAX_QUANTITY: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Processing => write!(f, "processing"),
            OrderStatus::Completed => write!(f, "completed"),
            OrderStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverType {
    Hardcover,
    Softcover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperType {
    Glossy,
    Matte,
}

/// Order-creation request as published on `scheduler/orders/create`.
///
/// Unknown and missing fields are both parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderSpec {
    pub title: String,
    pub author: String,
    pub pages: u32,
    pub cover_type: CoverType,
    pub paper_type: PaperType,
    pub quantity: u32,
}

impl OrderSpec {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(SchedulerError::InvalidOrder("title is empty".into()));
        }
        if self.author.trim().is_empty() {
            return Err(SchedulerError::InvalidOrder("author is empty".into()));
        }
        if self.pages == 0 {
            return Err(SchedulerError::InvalidOrder("pages must be at least 1".into()));
        }
        if self.quantity == 0 {
            return Err(SchedulerError::InvalidOrder(
                "quantity must be at least 1".into(),
            ));
        }
        if self.quantity > MAX_QUANTITY {
            return Err(SchedulerError::InvalidOrder(format!(
                "quantity {} exceeds the maximum of {MAX_QUANTITY}",
                self.quantity
            )));
        }
        Ok(())
    }
}

/// Durable order record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub title: String,
    pub author: String,
    pub pages: u32,
    pub cover_type: CoverType,
    pub paper_type: PaperType,
    pub quantity: u32,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    /// Set when the first unit is dispatched to a printing machine.
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(id: OrderId, spec: &OrderSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: spec.title.clone(),
            author: spec.author.clone(),
            pages: spec.pages,
            cover_type: spec.cover_type,
            paper_type: spec.paper_type,
            quantity: spec.quantity,
            status: OrderStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Processing time from first dispatch to completion.
    pub fn processing_duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
