use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::scheduler::machine::{MachineState, MachineStatus};
use crate::scheduler::queue::JobQueue;
use crate::scheduler::recovery::{RecoveryEvent, RecoveryReason};
use crate::scheduler::stage::{Priority, Stage, StageStatus};
use crate::scheduler::unit::{Assignee, UnitId};
use crate::store::{DurableStore, StateStore};

/// Detects silent machines and re-queues the work they held.
///
/// A failed machine is marked `off`, so it is neither re-detected on every
/// tick nor picked by the assigner. Its next heartbeat overwrites that.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    state: Arc<dyn StateStore>,
    durable: Arc<dyn DurableStore>,
    queue: JobQueue,
    interval: Duration,
    timeout: chrono::Duration,
}

impl HeartbeatMonitor {
    pub fn new(
        state: Arc<dyn StateStore>,
        durable: Arc<dyn DurableStore>,
        queue: JobQueue,
        config: &SchedulerConfig,
    ) -> Self {
        let timeout_ms = i64::try_from(config.heartbeat_timeout().as_millis()).unwrap_or(i64::MAX);
        Self {
            state,
            durable,
            queue,
            interval: config.heartbeat_interval(),
            timeout: chrono::Duration::milliseconds(timeout_ms),
        }
    }

    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Heartbeat monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_machines_at(Utc::now()).await {
                        tracing::error!(error = %e, "Liveness check failed");
                    }
                }
            }
        }
    }

    /// One liveness pass as of `now`. Returns the number of units re-queued.
    pub async fn check_machines_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut requeued = 0;
        let mut known = HashMap::new();

        for machine_id in self.state.machine_ids().await? {
            let Some(machine) = self.state.get_machine(&machine_id).await? else {
                continue;
            };
            known.insert(machine_id, machine.clone());
            if machine.status == MachineStatus::Off {
                continue;
            }
            let silence = machine.silent_for(now);
            if silence <= self.timeout {
                continue;
            }

            tracing::warn!(
                machine_id = %machine.machine_id,
                machine_type = %machine.machine_type,
                silent_ms = silence.num_milliseconds(),
                "Machine failure detected"
            );
            match self.recover_machine(&machine, now).await {
                Ok(count) => requeued += count,
                Err(e) => {
                    tracing::error!(machine_id = %machine.machine_id, error = %e, "Failed to recover machine");
                }
            }
        }

        requeued += self.recover_stranded(&known, now).await?;
        Ok(requeued)
    }

    /// Marks `machine` off, then resets every unit running on it back to
    /// pending at recovery priority.
    ///
    /// An assignment racing with this pass either lands before the scan and
    /// is recovered here, or overwrites `off` and is detected on the next
    /// pass.
    async fn recover_machine(
        &self,
        machine: &MachineState,
        detected_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.state
            .set_machine_status(&machine.machine_id, MachineStatus::Off, None)
            .await?;

        let stage = machine.machine_type;
        let mut requeued = 0;

        for unit_id in self.state.unit_ids().await? {
            let Some(unit) = self.state.get_unit(&unit_id).await? else {
                continue;
            };
            if !unit.stage(stage).is_running_on(&machine.machine_id) {
                continue;
            }
            if self
                .requeue(
                    unit_id,
                    stage,
                    &machine.machine_id,
                    machine.machine_type,
                    RecoveryReason::MachineFailure,
                    detected_at,
                )
                .await?
            {
                requeued += 1;
            }
        }

        Ok(requeued)
    }

    /// Re-queues running stages no liveness pass will ever reach: those on
    /// a machine with no state record (orphaned) and those on a machine that
    /// is already off and still silent.
    async fn recover_stranded(
        &self,
        known: &HashMap<String, MachineState>,
        detected_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut requeued = 0;
        for unit_id in self.state.unit_ids().await? {
            let Some(unit) = self.state.get_unit(&unit_id).await? else {
                continue;
            };
            for stage in Stage::ALL {
                let recorded = unit.stage(stage);
                if recorded.status != StageStatus::Running {
                    continue;
                }
                let machine_id = recorded.machine.clone().unwrap_or_default();
                let (machine_type, reason) = match known.get(&machine_id) {
                    None => (stage, RecoveryReason::Orphaned),
                    Some(machine)
                        if machine.status == MachineStatus::Off
                            && machine.silent_for(detected_at) > self.timeout =>
                    {
                        (machine.machine_type, RecoveryReason::MachineFailure)
                    }
                    Some(_) => continue,
                };
                if self
                    .requeue(unit_id, stage, &machine_id, machine_type, reason, detected_at)
                    .await?
                {
                    requeued += 1;
                }
            }
        }
        Ok(requeued)
    }

    async fn requeue(
        &self,
        unit_id: UnitId,
        stage: Stage,
        machine_id: &str,
        machine_type: Stage,
        reason: RecoveryReason,
        detected_at: DateTime<Utc>,
    ) -> Result<bool> {
        let reset = self
            .state
            .update_stage(&unit_id, stage, StageStatus::Pending, Assignee::Cleared)
            .await?;
        if !reset {
            return Ok(false);
        }
        self.queue.enqueue(stage, unit_id, Priority::Recovery).await?;

        let event = RecoveryEvent {
            id: Uuid::new_v4(),
            unit_id,
            order_id: unit_id.order_id,
            stage,
            machine_id: machine_id.to_string(),
            machine_type,
            reason,
            failure_detected_at: detected_at,
            requeued_at: Utc::now().max(detected_at),
        };
        self.durable.append_recovery_event(&event).await?;

        tracing::warn!(
            unit_id = %unit_id,
            stage = %stage,
            machine_id,
            reason = %reason,
            recovery_ms = event.recovery_ms(),
            "Unit re-queued"
        );
        Ok(true)
    }
}
