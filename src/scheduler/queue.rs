use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::scheduler::stage::{Priority, Stage};
use crate::scheduler::unit::UnitId;
use crate::store::StateStore;

/// Weight of one priority tier. Larger than any timestamp term, so a higher
/// tier always outranks a lower one regardless of enqueue time.
const PRIORITY_WEIGHT: u128 = 1 << 64;

/// Latest representable enqueue stamp.
const MAX_STAMP: u64 = u64::MAX;

/// Composite queue score: `priority * PRIORITY_WEIGHT + (MAX_STAMP - stamp)`.
///
/// Within a tier an earlier stamp yields a higher score, so the oldest entry
/// pops first.
pub fn queue_score(priority: Priority, stamp: u64) -> u128 {
    u128::from(priority.tier()) * PRIORITY_WEIGHT + u128::from(MAX_STAMP - stamp)
}

/// Per-stage priority queues over the state store.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn StateStore>,
    last_stamp: Arc<AtomicU64>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            last_stamp: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue time in microseconds, strictly increasing per queue handle so
    /// two enqueues in the same microsecond still order FIFO.
    fn next_stamp(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
        let previous = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(previous.saturating_add(1))
    }

    /// Adds `unit_id` to the stage's queue. Re-enqueueing a unit that is
    /// already queued replaces its score instead of adding a duplicate.
    pub async fn enqueue(&self, stage: Stage, unit_id: UnitId, priority: Priority) -> Result<()> {
        let score = queue_score(priority, self.next_stamp());
        self.store.queue_push(stage, unit_id, score).await?;
        tracing::debug!(unit_id = %unit_id, stage = %stage, priority = %priority, "Enqueued unit");
        Ok(())
    }

    /// Pops the highest-priority, oldest entry. Never blocks.
    pub async fn dequeue(&self, stage: Stage) -> Result<Option<UnitId>> {
        let unit_id = self.store.queue_pop_max(stage).await?;
        if let Some(unit_id) = unit_id {
            tracing::debug!(unit_id = %unit_id, stage = %stage, "Dequeued unit");
        }
        Ok(unit_id)
    }

    pub async fn len(&self, stage: Stage) -> Result<usize> {
        self.store.queue_len(stage).await
    }

    pub async fn is_empty(&self, stage: Stage) -> Result<bool> {
        Ok(self.len(stage).await? == 0)
    }

    pub async fn contains(&self, stage: Stage, unit_id: &UnitId) -> Result<bool> {
        Ok(self.store.queue_score(stage, unit_id).await?.is_some())
    }

    /// Priority tier a queued unit was enqueued at.
    pub async fn priority_of(&self, stage: Stage, unit_id: &UnitId) -> Result<Option<Priority>> {
        let score = self.store.queue_score(stage, unit_id).await?;
        Ok(score.and_then(|score| Priority::from_tier((score / PRIORITY_WEIGHT) as u8)))
    }
}
