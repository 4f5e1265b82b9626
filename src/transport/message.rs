use serde::{Deserialize, Serialize};

use crate::scheduler::{CoverType, Order, OrderId, PaperType, Stage, UnitId};

/// Production parameters a machine needs to work on one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: OrderId,
    pub title: String,
    pub author: String,
    pub pages: u32,
    pub cover_type: CoverType,
    pub paper_type: PaperType,
    pub unit_number: u32,
}

impl OrderSnapshot {
    pub fn new(order: &Order, unit_number: u32) -> Self {
        Self {
            order_id: order.id,
            title: order.title.clone(),
            author: order.author.clone(),
            pages: order.pages,
            cover_type: order.cover_type,
            paper_type: order.paper_type,
            unit_number,
        }
    }
}

/// Published on `machines/{id}/work`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkAssignment {
    pub unit_id: UnitId,
    pub stage: Stage,
    pub order_data: OrderSnapshot,
}

/// Published on `scheduler/order/completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: OrderId,
    pub title: String,
    pub units: u64,
    pub total: u32,
    pub duration_seconds: f64,
    pub duration_minutes: f64,
    pub requeues: u64,
    pub avg_recovery_ms: f64,
    pub message: String,
}

/// Published on `scheduler/queue/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub job_a: usize,
    pub job_b: usize,
    pub job_c: usize,
    pub job_d: usize,
}

impl QueueStatus {
    pub fn set(&mut self, stage: Stage, depth: usize) {
        match stage {
            Stage::A => self.job_a = depth,
            Stage::B => self.job_b = depth,
            Stage::C => self.job_c = depth,
            Stage::D => self.job_d = depth,
        }
    }

    pub fn total(&self) -> usize {
        self.job_a + self.job_b + self.job_c + self.job_d
    }
}
