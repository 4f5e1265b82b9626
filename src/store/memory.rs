//! In-memory implementations of the store contracts.
//!
//! ## Limitations
//!
//! - **Single-process only**: state is not shared across process boundaries
//! - **No persistence**: everything is lost when the process exits
//!
//! Each method takes one lock for its whole body and never awaits while
//! holding it, which gives the per-key atomicity the contracts promise.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use super::{DurableStore, StateStore};
use crate::error::{Result, SchedulerError};
use crate::scheduler::{
    Assignee, MachineState, MachineStatus, Order, OrderDurationStats, OrderId, OrderSpec,
    OrderStatus, RecoveryEvent, RecoverySummary, Stage, StageStatus, UnitId, UnitState,
};

fn poison_err<T>(_: PoisonError<T>) -> SchedulerError {
    SchedulerError::Store("lock poisoned".to_string())
}

/// Sorted-set semantics: unique members, each with one score.
#[derive(Debug, Default)]
struct ScoredQueue {
    ordered: BTreeSet<(u128, UnitId)>,
    scores: HashMap<UnitId, u128>,
}

impl ScoredQueue {
    fn push(&mut self, unit_id: UnitId, score: u128) {
        if let Some(old) = self.scores.insert(unit_id, score) {
            self.ordered.remove(&(old, unit_id));
        }
        self.ordered.insert((score, unit_id));
    }

    fn pop_max(&mut self) -> Option<UnitId> {
        let (_, unit_id) = self.ordered.pop_last()?;
        self.scores.remove(&unit_id);
        Some(unit_id)
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn score(&self, unit_id: &UnitId) -> Option<u128> {
        self.scores.get(unit_id).copied()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    machines: RwLock<HashMap<String, MachineState>>,
    units: RwLock<BTreeMap<UnitId, UnitState>>,
    queues: RwLock<HashMap<Stage, ScoredQueue>>,
    completed: RwLock<HashMap<OrderId, u64>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn put_machine(&self, state: &MachineState) -> Result<()> {
        let mut machines = self.machines.write().map_err(poison_err)?;
        machines.insert(state.machine_id.clone(), state.clone());
        Ok(())
    }

    async fn get_machine(&self, machine_id: &str) -> Result<Option<MachineState>> {
        let machines = self.machines.read().map_err(poison_err)?;
        Ok(machines.get(machine_id).cloned())
    }

    async fn machine_ids(&self) -> Result<Vec<String>> {
        let machines = self.machines.read().map_err(poison_err)?;
        let mut ids: Vec<String> = machines.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn set_machine_status(
        &self,
        machine_id: &str,
        status: MachineStatus,
        current_unit: Option<UnitId>,
    ) -> Result<bool> {
        let mut machines = self.machines.write().map_err(poison_err)?;
        match machines.get_mut(machine_id) {
            Some(machine) => {
                machine.status = status;
                machine.current_unit_id = current_unit;
                if current_unit.is_none() {
                    machine.progress = None;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn put_unit(&self, unit: &UnitState) -> Result<()> {
        let mut units = self.units.write().map_err(poison_err)?;
        units.insert(unit.id, unit.clone());
        Ok(())
    }

    async fn put_unit_if_absent(&self, unit: &UnitState) -> Result<bool> {
        let mut units = self.units.write().map_err(poison_err)?;
        if units.contains_key(&unit.id) {
            return Ok(false);
        }
        units.insert(unit.id, unit.clone());
        Ok(true)
    }

    async fn get_unit(&self, unit_id: &UnitId) -> Result<Option<UnitState>> {
        let units = self.units.read().map_err(poison_err)?;
        Ok(units.get(unit_id).cloned())
    }

    async fn update_stage(
        &self,
        unit_id: &UnitId,
        stage: Stage,
        status: StageStatus,
        assignee: Assignee<'_>,
    ) -> Result<bool> {
        let mut units = self.units.write().map_err(poison_err)?;
        let Some(unit) = units.get_mut(unit_id) else {
            return Ok(false);
        };
        let state = unit.stage_mut(stage);
        state.status = status;
        match assignee {
            Assignee::Unchanged => {}
            Assignee::Cleared => state.machine = None,
            Assignee::Machine(machine_id) => state.machine = Some(machine_id.to_string()),
        }
        match status {
            StageStatus::Running => state.started_at = Some(Utc::now()),
            StageStatus::Completed => state.completed_at = Some(Utc::now()),
            StageStatus::Pending | StageStatus::Waiting => {}
        }
        Ok(true)
    }

    async fn delete_unit(&self, unit_id: &UnitId) -> Result<()> {
        let mut units = self.units.write().map_err(poison_err)?;
        units.remove(unit_id);
        Ok(())
    }

    async fn unit_ids(&self) -> Result<Vec<UnitId>> {
        let units = self.units.read().map_err(poison_err)?;
        Ok(units.keys().copied().collect())
    }

    async fn order_unit_ids(&self, order_id: OrderId) -> Result<Vec<UnitId>> {
        let units = self.units.read().map_err(poison_err)?;
        Ok(units
            .keys()
            .filter(|id| id.order_id == order_id)
            .copied()
            .collect())
    }

    async fn queue_push(&self, stage: Stage, unit_id: UnitId, score: u128) -> Result<()> {
        let mut queues = self.queues.write().map_err(poison_err)?;
        queues.entry(stage).or_default().push(unit_id, score);
        Ok(())
    }

    async fn queue_pop_max(&self, stage: Stage) -> Result<Option<UnitId>> {
        let mut queues = self.queues.write().map_err(poison_err)?;
        Ok(queues.get_mut(&stage).and_then(ScoredQueue::pop_max))
    }

    async fn queue_len(&self, stage: Stage) -> Result<usize> {
        let queues = self.queues.read().map_err(poison_err)?;
        Ok(queues.get(&stage).map(ScoredQueue::len).unwrap_or(0))
    }

    async fn queue_score(&self, stage: Stage, unit_id: &UnitId) -> Result<Option<u128>> {
        let queues = self.queues.read().map_err(poison_err)?;
        Ok(queues.get(&stage).and_then(|queue| queue.score(unit_id)))
    }

    async fn incr_completed(&self, order_id: OrderId) -> Result<u64> {
        let mut completed = self.completed.write().map_err(poison_err)?;
        let count = completed.entry(order_id).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn completed_count(&self, order_id: OrderId) -> Result<u64> {
        let completed = self.completed.read().map_err(poison_err)?;
        Ok(completed.get(&order_id).copied().unwrap_or(0))
    }

    async fn delete_completed(&self, order_id: OrderId) -> Result<()> {
        let mut completed = self.completed.write().map_err(poison_err)?;
        completed.remove(&order_id);
        Ok(())
    }
}

#[derive(Debug)]
pub struct InMemoryDurableStore {
    orders: RwLock<BTreeMap<OrderId, Order>>,
    recoveries: RwLock<Vec<RecoveryEvent>>,
    next_id: AtomicU64,
}

impl Default for InMemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(BTreeMap::new()),
            recoveries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn with_order<T>(&self, order_id: OrderId, f: impl FnOnce(&mut Order) -> T) -> Result<T> {
        let mut orders = self.orders.write().map_err(poison_err)?;
        let order = orders
            .get_mut(&order_id)
            .ok_or(SchedulerError::OrderNotFound(order_id))?;
        Ok(f(order))
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn create_order(&self, spec: &OrderSpec) -> Result<OrderId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut orders = self.orders.write().map_err(poison_err)?;
        orders.insert(id, Order::new(id, spec, Utc::now()));
        Ok(id)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let orders = self.orders.read().map_err(poison_err)?;
        Ok(orders.get(&order_id).cloned())
    }

    async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let orders = self.orders.read().map_err(poison_err)?;
        Ok(orders
            .values()
            .filter(|order| order.status == status)
            .cloned()
            .collect())
    }

    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        self.with_order(order_id, |order| order.status = status)
    }

    async fn mark_order_started(&self, order_id: OrderId) -> Result<bool> {
        self.with_order(order_id, |order| {
            if order.started_at.is_some() {
                return false;
            }
            order.started_at = Some(Utc::now());
            order.status = OrderStatus::Processing;
            true
        })
    }

    async fn mark_order_completed(&self, order_id: OrderId) -> Result<bool> {
        self.with_order(order_id, |order| {
            if order.completed_at.is_some() {
                return false;
            }
            order.completed_at = Some(Utc::now());
            order.status = OrderStatus::Completed;
            true
        })
    }

    async fn append_recovery_event(&self, event: &RecoveryEvent) -> Result<()> {
        let mut recoveries = self.recoveries.write().map_err(poison_err)?;
        recoveries.push(event.clone());
        Ok(())
    }

    async fn recovery_events(&self) -> Result<Vec<RecoveryEvent>> {
        let recoveries = self.recoveries.read().map_err(poison_err)?;
        let mut events = recoveries.clone();
        events.sort_by(|a, b| b.requeued_at.cmp(&a.requeued_at));
        Ok(events)
    }

    async fn recovery_summary(&self, order_id: Option<OrderId>) -> Result<RecoverySummary> {
        let recoveries = self.recoveries.read().map_err(poison_err)?;
        let latencies = recoveries
            .iter()
            .filter(|event| order_id.map_or(true, |id| event.order_id == id))
            .map(RecoveryEvent::recovery_ms)
            .collect();
        Ok(RecoverySummary::from_latencies(latencies))
    }

    async fn order_duration_stats(&self) -> Result<Vec<OrderDurationStats>> {
        let orders = self.orders.read().map_err(poison_err)?;
        let mut stats: Vec<OrderDurationStats> = orders
            .values()
            .filter(|order| order.status == OrderStatus::Completed)
            .filter_map(|order| {
                let started_at = order.started_at?;
                let completed_at = order.completed_at?;
                Some(OrderDurationStats {
                    order_id: order.id,
                    title: order.title.clone(),
                    quantity: order.quantity,
                    created_at: order.created_at,
                    started_at,
                    completed_at,
                    wait_seconds: seconds(started_at - order.created_at),
                    processing_seconds: seconds(completed_at - started_at),
                })
            })
            .collect();
        stats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stats)
    }
}

fn seconds(duration: chrono::Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}
