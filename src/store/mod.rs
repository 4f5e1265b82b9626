//! Contracts for the two external stores the scheduler runs against.
//!
//! - [`StateStore`]: low-latency shared state. Live machine state, live unit
//!   state, per-stage priority queues and per-order completion counters. Every
//!   operation is atomic at the single key/field level; nothing spans keys.
//! - [`DurableStore`]: order records and the recovery-event audit log, used for
//!   lifecycle timestamps and statistics rather than dispatch decisions.
//!
//! The in-memory implementations in [`memory`] back tests and the bundled
//! simulator.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::scheduler::{
    Assignee, MachineState, MachineStatus, Order, OrderDurationStats, OrderId, OrderSpec,
    OrderStatus, RecoveryEvent, RecoverySummary, Stage, StageStatus, UnitId, UnitState,
};

pub use memory::{InMemoryDurableStore, InMemoryStateStore};

/// Shared live state.
///
/// Consumers must tolerate a unit observed mid-update: writes to different
/// fields of the same unit are independent, so missing or partial state means
/// "not yet eligible", never an error.
#[async_trait]
pub trait StateStore: Send + Sync {
    // --- Machines ---

    /// Overwrites the full state of a machine.
    async fn put_machine(&self, state: &MachineState) -> Result<()>;

    async fn get_machine(&self, machine_id: &str) -> Result<Option<MachineState>>;

    async fn machine_ids(&self) -> Result<Vec<String>>;

    /// Overwrites only the status and current unit of a known machine.
    /// Returns `false` if the machine has never been seen.
    async fn set_machine_status(
        &self,
        machine_id: &str,
        status: MachineStatus,
        current_unit: Option<UnitId>,
    ) -> Result<bool>;

    // --- Units ---

    /// Writes a fresh unit record, replacing any existing one.
    async fn put_unit(&self, unit: &UnitState) -> Result<()>;

    /// Writes the unit only if no record exists. Returns whether it wrote.
    async fn put_unit_if_absent(&self, unit: &UnitState) -> Result<bool>;

    async fn get_unit(&self, unit_id: &UnitId) -> Result<Option<UnitState>>;

    /// Overwrites one stage's status (and optionally its machine) and stamps
    /// `started_at`/`completed_at` when moving to running/completed.
    /// Returns `false` if the unit no longer exists.
    async fn update_stage(
        &self,
        unit_id: &UnitId,
        stage: Stage,
        status: StageStatus,
        assignee: Assignee<'_>,
    ) -> Result<bool>;

    async fn delete_unit(&self, unit_id: &UnitId) -> Result<()>;

    async fn unit_ids(&self) -> Result<Vec<UnitId>>;

    async fn order_unit_ids(&self, order_id: OrderId) -> Result<Vec<UnitId>>;

    // --- Priority queues ---

    /// Inserts `unit_id` with `score`. A member already present in the queue
    /// has its score replaced rather than being duplicated.
    async fn queue_push(&self, stage: Stage, unit_id: UnitId, score: u128) -> Result<()>;

    /// Atomically removes and returns the highest-scoring member.
    async fn queue_pop_max(&self, stage: Stage) -> Result<Option<UnitId>>;

    async fn queue_len(&self, stage: Stage) -> Result<usize>;

    /// Score of a queued member, or `None` if it is not queued.
    async fn queue_score(&self, stage: Stage, unit_id: &UnitId) -> Result<Option<u128>>;

    // --- Order completion counters ---

    /// Increments and returns the order's completed-unit counter.
    async fn incr_completed(&self, order_id: OrderId) -> Result<u64>;

    async fn completed_count(&self, order_id: OrderId) -> Result<u64>;

    async fn delete_completed(&self, order_id: OrderId) -> Result<()>;
}

/// Durable order and recovery records.
///
/// Each row class has one logical writer: the order manager creates and
/// starts orders, the heartbeat observer completes them, the heartbeat
/// monitor appends recovery events.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Inserts a `pending` order and returns its id.
    async fn create_order(&self, spec: &OrderSpec) -> Result<OrderId>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>>;

    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()>;

    /// Stamps `started_at` and moves to `processing` unless already started.
    /// Returns whether this call did the stamping.
    async fn mark_order_started(&self, order_id: OrderId) -> Result<bool>;

    /// Stamps `completed_at` and moves to `completed` unless already
    /// completed. Returns whether this call did the transition.
    async fn mark_order_completed(&self, order_id: OrderId) -> Result<bool>;

    async fn append_recovery_event(&self, event: &RecoveryEvent) -> Result<()>;

    /// All recovery events, newest first.
    async fn recovery_events(&self) -> Result<Vec<RecoveryEvent>>;

    /// Recovery latency aggregates, across all orders or for one.
    async fn recovery_summary(&self, order_id: Option<OrderId>) -> Result<RecoverySummary>;

    /// Timing of completed orders, newest first.
    async fn order_duration_stats(&self) -> Result<Vec<OrderDurationStats>>;
}
