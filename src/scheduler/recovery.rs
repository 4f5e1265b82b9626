use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduler::order::OrderId;
use crate::scheduler::stage::Stage;
use crate::scheduler::unit::UnitId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryReason {
    MachineFailure,
    Orphaned,
}

impl std::fmt::Display for RecoveryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryReason::MachineFailure => write!(f, "machine_failure"),
            RecoveryReason::Orphaned => write!(f, "orphaned"),
        }
    }
}

/// Append-only audit record of one re-queued unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryEvent {
    pub id: Uuid,
    pub unit_id: UnitId,
    pub order_id: OrderId,
    pub stage: Stage,
    pub machine_id: String,
    pub machine_type: Stage,
    pub reason: RecoveryReason,
    pub failure_detected_at: DateTime<Utc>,
    pub requeued_at: DateTime<Utc>,
}

impl RecoveryEvent {
    pub fn recovery_ms(&self) -> i64 {
        (self.requeued_at - self.failure_detected_at).num_milliseconds()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoverySummary {
    pub total_recoveries: u64,
    pub avg_recovery_ms: f64,
    pub min_recovery_ms: i64,
    pub max_recovery_ms: i64,
    pub median_recovery_ms: f64,
}

impl RecoverySummary {
    /// Aggregates recovery latencies. Median interpolates between the two
    /// middle samples for even counts.
    pub fn from_latencies(mut latencies: Vec<i64>) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }
        latencies.sort_unstable();
        let count = latencies.len();
        let sum: i64 = latencies.iter().sum();
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (latencies[mid - 1] + latencies[mid]) as f64 / 2.0
        } else {
            latencies[mid] as f64
        };
        Self {
            total_recoveries: count as u64,
            avg_recovery_ms: sum as f64 / count as f64,
            min_recovery_ms: latencies[0],
            max_recovery_ms: latencies[count - 1],
            median_recovery_ms: median,
        }
    }
}

/// Timing of one completed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDurationStats {
    pub order_id: OrderId,
    pub title: String,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub wait_seconds: f64,
    pub processing_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_is_zeroed() {
        let summary = RecoverySummary::from_latencies(vec![]);
        assert_eq!(summary.total_recoveries, 0);
        assert_eq!(summary.avg_recovery_ms, 0.0);
    }

    #[test]
    fn summary_of_odd_count() {
        let summary = RecoverySummary::from_latencies(vec![30, 10, 20]);
        assert_eq!(summary.total_recoveries, 3);
        assert_eq!(summary.min_recovery_ms, 10);
        assert_eq!(summary.max_recovery_ms, 30);
        assert_eq!(summary.avg_recovery_ms, 20.0);
        assert_eq!(summary.median_recovery_ms, 20.0);
    }

    #[test]
    fn median_of_even_count_interpolates() {
        let summary = RecoverySummary::from_latencies(vec![4, 1, 3, 2]);
        assert_eq!(summary.median_recovery_ms, 2.5);
    }
}
