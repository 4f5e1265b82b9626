//! Scheduling core: domain types and the components that move units through
//! the production stages.
//!
//! # Components
//!
//! - [`OrderManager`]: creates orders and their units, seeds the first-stage
//!   queues, and reconciles interrupted creations at startup
//! - [`JobQueue`]: per-stage priority queues over the state store
//! - [`JobAssigner`]: periodically matches idle machines to queued units
//! - [`HeartbeatObserver`]: ingests heartbeats, detects stage completion and
//!   advances the dependency graph
//! - [`HeartbeatMonitor`]: detects silent machines and re-queues their work
//! - [`QueueStatusPublisher`]: broadcasts queue depths
//! - [`OrderSubscriber`]: turns order-creation messages into orders
//!
//! # Unit Lifecycle
//!
//! ```text
//! A: pending ──assign──▶ running ──heartbeat──▶ completed ─┐
//! B: pending ──assign──▶ running ──heartbeat──▶ completed ─┴▶ C: waiting ▶ pending (p2)
//! C: pending ──assign──▶ running ──heartbeat──▶ completed ──▶ D: waiting ▶ pending (p1)
//! D: pending ──assign──▶ running ──heartbeat──▶ completed ──▶ unit deleted
//!
//! any running stage ──machine silent──▶ pending (p3)
//! ```

pub mod assigner;
pub mod machine;
pub mod monitor;
pub mod observer;
pub mod order;
pub mod orders;
pub mod queue;
pub mod recovery;
pub mod stage;
pub mod status;
pub mod subscriber;
pub mod unit;

pub use assigner::JobAssigner;
pub use machine::{Heartbeat, MachineState, MachineStatus, Observation};
pub use monitor::HeartbeatMonitor;
pub use observer::{HeartbeatObserver, HeartbeatOutcome};
pub use order::{
    CoverType, Order, OrderId, OrderSpec, OrderStatus, PaperType, MAX_QUANTITY,
};
pub use orders::{OrderManager, OrderStatusReport, ReconcileReport, StageBreakdown};
pub use queue::JobQueue;
pub use recovery::{OrderDurationStats, RecoveryEvent, RecoveryReason, RecoverySummary};
pub use stage::{Priority, Stage, StageStatus};
pub use status::QueueStatusPublisher;
pub use subscriber::OrderSubscriber;
pub use unit::{Assignee, StageState, UnitId, UnitState};
