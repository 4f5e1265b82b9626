use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::error::{Result, SchedulerError};
use crate::scheduler::order::{Order, OrderId, OrderSpec, OrderStatus};
use crate::scheduler::queue::JobQueue;
use crate::scheduler::stage::{Priority, Stage, StageStatus};
use crate::scheduler::unit::{Assignee, UnitId, UnitState};
use crate::store::{DurableStore, StateStore};

/// Per-stage tally of an order's live units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageBreakdown {
    pub stage: Stage,
    pub pending: usize,
    pub waiting: usize,
    pub running: usize,
    pub completed: usize,
}

impl StageBreakdown {
    fn empty(stage: Stage) -> Self {
        Self {
            stage,
            pending: 0,
            waiting: 0,
            running: 0,
            completed: 0,
        }
    }

    fn count(&mut self, status: StageStatus) {
        match status {
            StageStatus::Pending => self.pending += 1,
            StageStatus::Waiting => self.waiting += 1,
            StageStatus::Running => self.running += 1,
            StageStatus::Completed => self.completed += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderStatusReport {
    pub order: Order,
    pub completed_units: u64,
    pub units_in_progress: usize,
    pub stages: Vec<StageBreakdown>,
}

/// What a startup reconciliation pass repaired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub orders_checked: usize,
    pub units_seeded: usize,
    pub stages_requeued: usize,
    pub orders_completed: usize,
}

/// Creates orders and reads their aggregate state.
#[derive(Clone)]
pub struct OrderManager {
    state: Arc<dyn StateStore>,
    durable: Arc<dyn DurableStore>,
    queue: JobQueue,
}

impl OrderManager {
    pub fn new(state: Arc<dyn StateStore>, durable: Arc<dyn DurableStore>, queue: JobQueue) -> Self {
        Self {
            state,
            durable,
            queue,
        }
    }

    /// Persists the order, initialises its units and seeds the stage A and B
    /// queues at priority 1.
    ///
    /// The writes are not transactional. An order interrupted part way stays
    /// `pending` and is completed by [`OrderManager::reconcile`].
    pub async fn create_order(&self, spec: &OrderSpec) -> Result<OrderId> {
        spec.validate()?;

        let order_id = self.durable.create_order(spec).await?;
        let created_at = Utc::now();

        for unit_number in 1..=spec.quantity {
            let unit = UnitState::new(UnitId::new(order_id, unit_number), created_at);
            self.state.put_unit(&unit).await?;
        }

        for unit_number in 1..=spec.quantity {
            let unit_id = UnitId::new(order_id, unit_number);
            for stage in Stage::INITIAL {
                self.queue.enqueue(stage, unit_id, Priority::New).await?;
            }
        }

        self.durable
            .update_order_status(order_id, OrderStatus::Processing)
            .await?;

        tracing::info!(
            order_id,
            title = %spec.title,
            quantity = spec.quantity,
            "Order created"
        );
        Ok(order_id)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.durable
            .get_order(order_id)
            .await?
            .ok_or(SchedulerError::OrderNotFound(order_id))
    }

    /// Aggregates the live state of an order's units. Read-only.
    pub async fn order_status(&self, order_id: OrderId) -> Result<OrderStatusReport> {
        let order = self.get_order(order_id).await?;

        let mut stages: Vec<StageBreakdown> =
            Stage::ALL.iter().map(|s| StageBreakdown::empty(*s)).collect();
        let mut units_in_progress = 0;
        for unit_id in self.state.order_unit_ids(order_id).await? {
            // Deleted between listing and reading: already finished.
            let Some(unit) = self.state.get_unit(&unit_id).await? else {
                continue;
            };
            units_in_progress += 1;
            for breakdown in stages.iter_mut() {
                breakdown.count(unit.stage(breakdown.stage).status);
            }
        }

        let completed_units = if order.status == OrderStatus::Completed {
            u64::from(order.quantity)
        } else {
            self.state.completed_count(order_id).await?
        };

        Ok(OrderStatusReport {
            order,
            completed_units,
            units_in_progress,
            stages,
        })
    }

    /// Repairs state left behind by a crash. Must run before the scheduling
    /// loops start.
    ///
    /// - `pending` orders get any missing units seeded.
    /// - Pending stages missing from their queue are re-enqueued.
    /// - Waiting stages whose dependencies completed are released.
    /// - Orders whose units all finished are marked completed.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for status in [OrderStatus::Pending, OrderStatus::Processing] {
            for order in self.durable.orders_with_status(status).await? {
                report.orders_checked += 1;
                self.reconcile_order(&order, &mut report).await?;
            }
        }

        if report != ReconcileReport::default() {
            tracing::info!(
                orders_checked = report.orders_checked,
                units_seeded = report.units_seeded,
                stages_requeued = report.stages_requeued,
                orders_completed = report.orders_completed,
                "Reconciliation finished"
            );
        }
        Ok(report)
    }

    async fn reconcile_order(&self, order: &Order, report: &mut ReconcileReport) -> Result<()> {
        if order.status == OrderStatus::Pending {
            let created_at = Utc::now();
            for unit_number in 1..=order.quantity {
                let unit = UnitState::new(UnitId::new(order.id, unit_number), created_at);
                if self.state.put_unit_if_absent(&unit).await? {
                    report.units_seeded += 1;
                }
            }
        }

        let unit_ids = self.state.order_unit_ids(order.id).await?;
        for unit_id in &unit_ids {
            let Some(unit) = self.state.get_unit(unit_id).await? else {
                continue;
            };
            for stage in Stage::ALL {
                let status = unit.stage(stage).status;
                let eligible = match status {
                    StageStatus::Pending => true,
                    StageStatus::Waiting => unit.dependencies_met(stage),
                    StageStatus::Running | StageStatus::Completed => false,
                };
                if !eligible || self.queue.contains(stage, unit_id).await? {
                    continue;
                }
                if status == StageStatus::Waiting {
                    self.state
                        .update_stage(unit_id, stage, StageStatus::Pending, Assignee::Unchanged)
                        .await?;
                }
                self.queue
                    .enqueue(stage, *unit_id, stage.unblocked_priority())
                    .await?;
                report.stages_requeued += 1;
                tracing::info!(unit_id = %unit_id, stage = %stage, "Re-enqueued stage during reconciliation");
            }
        }

        match order.status {
            OrderStatus::Pending => {
                self.durable
                    .update_order_status(order.id, OrderStatus::Processing)
                    .await?;
            }
            OrderStatus::Processing if unit_ids.is_empty() => {
                let completed = self.state.completed_count(order.id).await?;
                if completed >= u64::from(order.quantity)
                    && self.durable.mark_order_completed(order.id).await?
                {
                    self.state.delete_completed(order.id).await?;
                    report.orders_completed += 1;
                    tracing::info!(order_id = order.id, "Order completed during reconciliation");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::order::{CoverType, PaperType};
    use crate::store::{InMemoryDurableStore, InMemoryStateStore};

    fn spec(quantity: u32) -> OrderSpec {
        OrderSpec {
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            pages: 412,
            cover_type: CoverType::Softcover,
            paper_type: PaperType::Matte,
            quantity,
        }
    }

    fn manager() -> (OrderManager, Arc<InMemoryStateStore>, Arc<InMemoryDurableStore>) {
        let state = Arc::new(InMemoryStateStore::new());
        let durable = Arc::new(InMemoryDurableStore::new());
        let queue = JobQueue::new(state.clone());
        (
            OrderManager::new(state.clone(), durable.clone(), queue),
            state,
            durable,
        )
    }

    #[tokio::test]
    async fn create_order_seeds_units_and_queues() {
        let (manager, state, _) = manager();
        let order_id = manager.create_order(&spec(3)).await.unwrap();

        assert_eq!(state.order_unit_ids(order_id).await.unwrap().len(), 3);
        assert_eq!(state.queue_len(Stage::A).await.unwrap(), 3);
        assert_eq!(state.queue_len(Stage::B).await.unwrap(), 3);
        assert_eq!(state.queue_len(Stage::C).await.unwrap(), 0);

        let order = manager.get_order(order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
        assert!(order.started_at.is_none());
    }

    #[tokio::test]
    async fn invalid_order_is_rejected_before_any_write() {
        let (manager, state, durable) = manager();
        let result = manager.create_order(&spec(0)).await;
        assert!(matches!(result, Err(SchedulerError::InvalidOrder(_))));
        assert!(state.unit_ids().await.unwrap().is_empty());
        assert!(durable
            .orders_with_status(OrderStatus::Pending)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn get_unknown_order_is_not_found() {
        let (manager, _, _) = manager();
        assert!(matches!(
            manager.get_order(99).await,
            Err(SchedulerError::OrderNotFound(99))
        ));
    }

    #[tokio::test]
    async fn order_status_counts_stages() {
        let (manager, state, _) = manager();
        let order_id = manager.create_order(&spec(2)).await.unwrap();
        state
            .update_stage(
                &UnitId::new(order_id, 1),
                Stage::A,
                StageStatus::Running,
                Assignee::Machine("A-1"),
            )
            .await
            .unwrap();

        let report = manager.order_status(order_id).await.unwrap();
        assert_eq!(report.units_in_progress, 2);
        assert_eq!(report.completed_units, 0);
        let a = report.stages[0];
        assert_eq!((a.pending, a.running), (1, 1));
        let c = report.stages[2];
        assert_eq!(c.waiting, 2);
    }

    #[tokio::test]
    async fn reconcile_on_clean_state_does_nothing() {
        let (manager, _, _) = manager();
        manager.create_order(&spec(2)).await.unwrap();
        let report = manager.reconcile().await.unwrap();
        assert_eq!(report.orders_checked, 1);
        assert_eq!(report.units_seeded, 0);
        assert_eq!(report.stages_requeued, 0);
    }
}
