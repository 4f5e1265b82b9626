use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::scheduler::machine::{MachineState, MachineStatus};
use crate::scheduler::queue::JobQueue;
use crate::scheduler::stage::{Priority, Stage, StageStatus};
use crate::scheduler::unit::{Assignee, UnitId};
use crate::store::{DurableStore, StateStore};
use crate::transport::{publish_json, work_topic, OrderSnapshot, Transport, WorkAssignment};

/// Matches idle machines to queued units and dispatches work assignments.
///
/// This is the only component that moves a stage to `running`. The stage is
/// marked running before the assignment is published, so a crash after
/// dispatch is recovered by the heartbeat monitor.
#[derive(Clone)]
pub struct JobAssigner {
    state: Arc<dyn StateStore>,
    durable: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    queue: JobQueue,
    interval: Duration,
}

impl JobAssigner {
    pub fn new(
        state: Arc<dyn StateStore>,
        durable: Arc<dyn DurableStore>,
        transport: Arc<dyn Transport>,
        queue: JobQueue,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            durable,
            transport,
            queue,
            interval,
        }
    }

    /// Runs assignment passes until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Job assigner stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.assign_pending().await {
                        tracing::error!(error = %e, "Assignment pass failed");
                    }
                }
            }
        }
    }

    /// One assignment pass over every stage. Returns the number of units
    /// dispatched.
    ///
    /// A store error after a unit is popped re-queues that unit at recovery
    /// priority and the pass moves on to the next machine.
    pub async fn assign_pending(&self) -> Result<usize> {
        let idle = self.idle_machines_by_stage().await?;
        let mut assigned = 0;

        for (stage, machines) in idle {
            for machine in machines {
                let Some(unit_id) = self.next_pending(stage).await? else {
                    break;
                };
                match self.dispatch(&machine, stage, unit_id).await {
                    Ok(true) => assigned += 1,
                    Ok(false) => {}
                    Err(e) => {
                        // The entry is already popped: put it back or it is lost.
                        tracing::error!(
                            unit_id = %unit_id,
                            stage = %stage,
                            machine_id = %machine.machine_id,
                            error = %e,
                            "Dispatch failed, re-queueing"
                        );
                        if let Err(e) = self
                            .requeue_after_failed_dispatch(&machine.machine_id, stage, unit_id)
                            .await
                        {
                            tracing::error!(
                                unit_id = %unit_id,
                                stage = %stage,
                                error = %e,
                                "Failed to re-queue unit after dispatch error"
                            );
                        }
                    }
                }
            }
        }

        Ok(assigned)
    }

    /// Idle machines grouped by the stage they execute, read fresh from the
    /// state store.
    async fn idle_machines_by_stage(&self) -> Result<BTreeMap<Stage, Vec<MachineState>>> {
        let mut idle: BTreeMap<Stage, Vec<MachineState>> = BTreeMap::new();
        let mut ids = self.state.machine_ids().await?;
        ids.sort();
        for machine_id in ids {
            if let Some(machine) = self.state.get_machine(&machine_id).await? {
                if machine.status == MachineStatus::Idle {
                    idle.entry(machine.machine_type).or_default().push(machine);
                }
            }
        }
        Ok(idle)
    }

    /// Pops entries until one refers to a unit whose stage is still pending.
    /// Entries for deleted units or already-handled stages are stale and
    /// dropped. An entry whose unit cannot be read is restored before the
    /// error is returned.
    async fn next_pending(&self, stage: Stage) -> Result<Option<UnitId>> {
        while let Some(unit_id) = self.queue.dequeue(stage).await? {
            let unit = match self.state.get_unit(&unit_id).await {
                Ok(unit) => unit,
                Err(e) => {
                    if let Err(requeue_err) =
                        self.queue.enqueue(stage, unit_id, Priority::Recovery).await
                    {
                        tracing::error!(
                            unit_id = %unit_id,
                            stage = %stage,
                            error = %requeue_err,
                            "Failed to restore popped queue entry"
                        );
                    }
                    return Err(e);
                }
            };
            match unit {
                Some(unit) if unit.stage(stage).status == StageStatus::Pending => {
                    return Ok(Some(unit_id));
                }
                Some(unit) => {
                    tracing::debug!(
                        unit_id = %unit_id,
                        stage = %stage,
                        status = %unit.stage(stage).status,
                        "Dropping stale queue entry"
                    );
                }
                None => {
                    tracing::debug!(unit_id = %unit_id, stage = %stage, "Dropping queue entry for finished unit");
                }
            }
        }
        Ok(None)
    }

    async fn dispatch(&self, machine: &MachineState, stage: Stage, unit_id: UnitId) -> Result<bool> {
        let machine_id = machine.machine_id.as_str();

        let Some(order) = self.durable.get_order(unit_id.order_id).await? else {
            tracing::warn!(unit_id = %unit_id, "Queued unit references unknown order, dropping");
            return Ok(false);
        };

        if stage == Stage::A
            && order.started_at.is_none()
            && self.durable.mark_order_started(order.id).await?
        {
            tracing::info!(order_id = order.id, "Order started");
        }

        let marked = self
            .state
            .update_stage(&unit_id, stage, StageStatus::Running, Assignee::Machine(machine_id))
            .await?;
        if !marked {
            return Ok(false);
        }
        self.state
            .set_machine_status(machine_id, MachineStatus::Running, Some(unit_id))
            .await?;

        let assignment = WorkAssignment {
            unit_id,
            stage,
            order_data: OrderSnapshot::new(&order, unit_id.unit_number),
        };
        if let Err(e) = publish_json(self.transport.as_ref(), &work_topic(machine_id), &assignment).await {
            tracing::warn!(
                unit_id = %unit_id,
                machine_id,
                error = %e,
                "Failed to publish work assignment, re-queueing"
            );
            self.requeue_after_failed_dispatch(machine_id, stage, unit_id)
                .await?;
            return Ok(false);
        }

        tracing::info!(
            unit_id = %unit_id,
            stage = %stage,
            operation = stage.operation(),
            machine_id,
            "Assigned unit"
        );
        Ok(true)
    }

    async fn requeue_after_failed_dispatch(
        &self,
        machine_id: &str,
        stage: Stage,
        unit_id: UnitId,
    ) -> Result<()> {
        self.state
            .update_stage(&unit_id, stage, StageStatus::Pending, Assignee::Cleared)
            .await?;
        self.queue.enqueue(stage, unit_id, Priority::Recovery).await?;
        // The machine's next idle heartbeat also clears this.
        self.state
            .set_machine_status(machine_id, MachineStatus::Idle, None)
            .await?;
        Ok(())
    }
}
