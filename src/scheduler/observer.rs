use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, SchedulerError};
use crate::scheduler::machine::{Heartbeat, MachineStatus, Observation};
use crate::scheduler::order::OrderId;
use crate::scheduler::queue::JobQueue;
use crate::scheduler::stage::{Stage, StageStatus};
use crate::scheduler::unit::{Assignee, UnitId};
use crate::store::{DurableStore, StateStore};
use crate::transport::{
    machine_id_from_topic, publish_json, Message, OrderCompleted, Transport, HEARTBEAT_FILTER,
    ORDER_COMPLETED_TOPIC,
};

/// Result of handling one heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Dropped: the sender does not own the unit it claims to run.
    Rejected,
    /// Machine state recorded, nothing else changed.
    Recorded,
    /// Machine state recorded and the unit's stage completed.
    Completed(UnitId),
}

/// Ingests machine heartbeats, detects stage completion and advances the
/// dependency graph.
///
/// Previous observations are held privately per machine. They are never
/// shared, so a restarted observer treats every machine's next heartbeat as
/// a first observation.
pub struct HeartbeatObserver {
    state: Arc<dyn StateStore>,
    durable: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    queue: JobQueue,
    previous: HashMap<String, Observation>,
}

impl HeartbeatObserver {
    pub fn new(
        state: Arc<dyn StateStore>,
        durable: Arc<dyn DurableStore>,
        transport: Arc<dyn Transport>,
        queue: JobQueue,
    ) -> Self {
        Self {
            state,
            durable,
            transport,
            queue,
            previous: HashMap::new(),
        }
    }

    /// Consumes heartbeats until `token` is cancelled or the transport closes.
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        let mut subscription = self.transport.subscribe(HEARTBEAT_FILTER).await?;
        tracing::info!(filter = HEARTBEAT_FILTER, "Heartbeat observer subscribed");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Heartbeat observer stopped");
                    break;
                }
                message = subscription.recv() => {
                    let Some(message) = message else {
                        tracing::warn!("Heartbeat subscription closed");
                        break;
                    };
                    match self.handle_message(&message).await {
                        Ok(_) => {}
                        Err(e @ SchedulerError::MalformedMessage { .. }) => {
                            tracing::warn!(error = %e, "Dropping malformed heartbeat");
                        }
                        Err(e) => {
                            tracing::error!(topic = %message.topic, error = %e, "Failed to handle heartbeat");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Parses and handles a raw heartbeat message.
    pub async fn handle_message(&mut self, message: &Message) -> Result<HeartbeatOutcome> {
        let heartbeat: Heartbeat = serde_json::from_slice(&message.payload)
            .map_err(|e| SchedulerError::malformed(&message.topic, e.to_string()))?;
        heartbeat.validate(&message.topic)?;
        if let Some(topic_id) = machine_id_from_topic(&message.topic) {
            if topic_id != heartbeat.machine_id {
                return Err(SchedulerError::malformed(
                    &message.topic,
                    format!("payload machine_id '{}' does not match topic", heartbeat.machine_id),
                ));
            }
        }
        self.handle_heartbeat(heartbeat).await
    }

    pub async fn handle_heartbeat(&mut self, heartbeat: Heartbeat) -> Result<HeartbeatOutcome> {
        if !self.owns_claimed_unit(&heartbeat).await? {
            return Ok(HeartbeatOutcome::Rejected);
        }

        self.state.put_machine(&heartbeat.to_state()).await?;

        let current = heartbeat.observation();
        let completed = self
            .previous
            .insert(heartbeat.machine_id.clone(), current)
            .and_then(|previous| previous.completed_unit(&current));

        if let Some(unit_id) = completed {
            if self
                .complete_stage(&heartbeat.machine_id, heartbeat.machine_type, unit_id)
                .await?
            {
                return Ok(HeartbeatOutcome::Completed(unit_id));
            }
        }
        Ok(HeartbeatOutcome::Recorded)
    }

    /// A running heartbeat is accepted only if the store records this machine
    /// as running the claimed unit's stage.
    async fn owns_claimed_unit(&self, heartbeat: &Heartbeat) -> Result<bool> {
        let (MachineStatus::Running, Some(unit_id)) = (heartbeat.status, heartbeat.current_unit_id)
        else {
            return Ok(true);
        };
        let machine_id = heartbeat.machine_id.as_str();
        let stage = heartbeat.machine_type;

        let Some(unit) = self.state.get_unit(&unit_id).await? else {
            tracing::warn!(machine_id, unit_id = %unit_id, "Rejecting heartbeat for unit that no longer exists");
            return Ok(false);
        };
        let recorded = unit.stage(stage);
        if recorded.status == StageStatus::Completed {
            tracing::warn!(machine_id, unit_id = %unit_id, stage = %stage, "Rejecting heartbeat for completed stage");
            return Ok(false);
        }
        if !recorded.is_running_on(machine_id) {
            tracing::warn!(
                machine_id,
                unit_id = %unit_id,
                stage = %stage,
                assigned = recorded.machine.as_deref().unwrap_or("none"),
                status = %recorded.status,
                "Rejecting stale heartbeat"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Marks the stage completed and releases whatever it unblocks. Returns
    /// `false` if the machine no longer holds the stage.
    async fn complete_stage(&self, machine_id: &str, stage: Stage, unit_id: UnitId) -> Result<bool> {
        let Some(unit) = self.state.get_unit(&unit_id).await? else {
            tracing::debug!(machine_id, unit_id = %unit_id, "Completion for finished unit ignored");
            return Ok(false);
        };
        let recorded = unit.stage(stage);
        if recorded.status == StageStatus::Completed && recorded.machine.as_deref() == Some(machine_id) {
            // 100% heartbeat followed by idle reports the same completion twice.
            tracing::debug!(machine_id, unit_id = %unit_id, stage = %stage, "Completion already recorded");
            return Ok(false);
        }
        if !recorded.is_running_on(machine_id) {
            tracing::warn!(
                machine_id,
                unit_id = %unit_id,
                stage = %stage,
                "Ignoring completion for stage not held by machine"
            );
            return Ok(false);
        }

        self.state
            .update_stage(&unit_id, stage, StageStatus::Completed, Assignee::Machine(machine_id))
            .await?;
        tracing::info!(
            unit_id = %unit_id,
            stage = %stage,
            operation = stage.operation(),
            machine_id,
            "Stage completed"
        );

        if stage == Stage::D {
            self.finish_unit(unit_id).await?;
            return Ok(true);
        }

        // Re-read: both A and B may have completed by now, in either order.
        let Some(unit) = self.state.get_unit(&unit_id).await? else {
            return Ok(true);
        };
        for next in stage.dependents() {
            if unit.stage(*next).status == StageStatus::Waiting && unit.dependencies_met(*next) {
                self.state
                    .update_stage(&unit_id, *next, StageStatus::Pending, Assignee::Unchanged)
                    .await?;
                self.queue
                    .enqueue(*next, unit_id, next.unblocked_priority())
                    .await?;
                tracing::info!(unit_id = %unit_id, stage = %next, "Dependencies met, stage queued");
            }
        }
        Ok(true)
    }

    async fn finish_unit(&self, unit_id: UnitId) -> Result<()> {
        let order_id = unit_id.order_id;
        let completed = self.state.incr_completed(order_id).await?;
        self.state.delete_unit(&unit_id).await?;

        let Some(order) = self.durable.get_order(order_id).await? else {
            tracing::warn!(order_id, unit_id = %unit_id, "Finished unit belongs to unknown order");
            return Ok(());
        };
        tracing::info!(
            order_id,
            unit_id = %unit_id,
            completed,
            quantity = order.quantity,
            "Unit finished"
        );

        if completed >= u64::from(order.quantity) && self.durable.mark_order_completed(order_id).await? {
            self.state.delete_completed(order_id).await?;
            if let Err(e) = self.publish_completion(order_id, completed).await {
                tracing::error!(order_id, error = %e, "Failed to publish order completion");
            }
        }
        Ok(())
    }

    async fn publish_completion(&self, order_id: OrderId, units: u64) -> Result<()> {
        let order = self
            .durable
            .get_order(order_id)
            .await?
            .ok_or(SchedulerError::OrderNotFound(order_id))?;
        let recoveries = self.durable.recovery_summary(Some(order_id)).await?;

        let duration = order
            .processing_duration()
            .or_else(|| order.completed_at.map(|end| end - order.created_at))
            .unwrap_or_else(chrono::Duration::zero);
        let duration_seconds = duration.num_milliseconds() as f64 / 1000.0;
        let duration_minutes = duration_seconds / 60.0;

        let completed = OrderCompleted {
            order_id,
            title: order.title.clone(),
            units,
            total: order.quantity,
            duration_seconds,
            duration_minutes,
            requeues: recoveries.total_recoveries,
            avg_recovery_ms: recoveries.avg_recovery_ms,
            message: format!(
                "Order {order_id} '{}' completed: {units}/{} units in {duration_minutes:.1} min, {} re-queues",
                order.title, order.quantity, recoveries.total_recoveries
            ),
        };
        publish_json(self.transport.as_ref(), ORDER_COMPLETED_TOPIC, &completed).await?;
        tracing::info!(
            order_id,
            duration_seconds,
            requeues = recoveries.total_recoveries,
            "Order completed"
        );
        Ok(())
    }
}
