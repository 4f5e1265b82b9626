use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use crate::config::FleetConfig;
use crate::error::Result;
use crate::scheduler::Stage;
use crate::transport::{work_topic, Transport, WorkAssignment};
use crate::worker::heartbeat::{HeartbeatSender, MachineSnapshot};

/// Progress updates reported per unit, excluding the final 100%.
const PROGRESS_TICKS: u32 = 4;

/// How one unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished,
    Crashed,
    Cancelled,
}

/// A simulated production machine.
///
/// Every machine type behaves the same and differs only in the stage it is
/// tagged with. Assignments are taken from `machines/{id}/work` one at a time.
/// Assignments that arrive while busy wait in the subscription.
pub struct SimulatedMachine {
    id: String,
    stage: Stage,
    transport: Arc<dyn Transport>,
    heartbeat: HeartbeatSender,
    config: FleetConfig,
    rng: StdRng,
}

impl SimulatedMachine {
    pub fn new(
        id: impl Into<String>,
        stage: Stage,
        transport: Arc<dyn Transport>,
        config: FleetConfig,
    ) -> Self {
        let id = id.into();
        let heartbeat =
            HeartbeatSender::new(id.clone(), stage, config.heartbeat_interval(), transport.clone());
        Self {
            id,
            stage,
            transport,
            heartbeat,
            config,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        let mut inbox = self.transport.subscribe(&work_topic(&self.id)).await?;

        let heartbeat = self.heartbeat.clone();
        let heartbeat_token = token.child_token();
        let heartbeat_task = tokio::spawn({
            let token = heartbeat_token.clone();
            async move { heartbeat.run(token).await }
        });

        self.heartbeat.update(MachineSnapshot::idle()).await?;
        tracing::info!(
            machine_id = %self.id,
            stage = %self.stage,
            operation = self.stage.operation(),
            "Machine online"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                message = inbox.recv() => {
                    let Some(message) = message else { break };
                    let assignment: WorkAssignment = match serde_json::from_slice(&message.payload) {
                        Ok(assignment) => assignment,
                        Err(e) => {
                            tracing::warn!(machine_id = %self.id, error = %e, "Ignoring malformed work assignment");
                            continue;
                        }
                    };
                    if assignment.stage != self.stage {
                        tracing::warn!(
                            machine_id = %self.id,
                            stage = %assignment.stage,
                            "Ignoring assignment for another stage"
                        );
                        continue;
                    }
                    if self.process(&assignment, &token).await? == Outcome::Cancelled {
                        break;
                    }
                }
            }
        }

        heartbeat_token.cancel();
        let _ = heartbeat_task.await;
        self.heartbeat.update(MachineSnapshot::off()).await?;
        tracing::info!(machine_id = %self.id, "Machine stopped");
        Ok(())
    }

    async fn process(
        &mut self,
        assignment: &WorkAssignment,
        token: &CancellationToken,
    ) -> Result<Outcome> {
        let unit_id = assignment.unit_id;
        tracing::debug!(
            machine_id = %self.id,
            unit_id = %unit_id,
            title = %assignment.order_data.title,
            "Starting unit"
        );
        self.heartbeat
            .update(MachineSnapshot::running(unit_id, 0))
            .await?;

        let total_ms = self
            .rng
            .gen_range(self.config.min_work_ms..=self.config.max_work_ms);
        let tick = Duration::from_millis(total_ms / u64::from(PROGRESS_TICKS + 1));

        for step in 1..=PROGRESS_TICKS {
            if self.sleep_or_cancel(tick, token).await {
                return Ok(Outcome::Cancelled);
            }
            if self.rng.gen_bool(self.config.failure_probability) {
                return self.crash(token).await;
            }
            let progress = (step * 100 / (PROGRESS_TICKS + 1)) as u8;
            self.heartbeat
                .update(MachineSnapshot::running(unit_id, progress))
                .await?;
        }
        if self.sleep_or_cancel(tick, token).await {
            return Ok(Outcome::Cancelled);
        }

        self.heartbeat
            .update(MachineSnapshot::running(unit_id, 100))
            .await?;
        self.heartbeat.update(MachineSnapshot::idle()).await?;
        tracing::debug!(machine_id = %self.id, unit_id = %unit_id, "Finished unit");
        Ok(Outcome::Finished)
    }

    /// Goes silent for the restart delay and comes back idle. The unit in
    /// hand is lost and left to the scheduler's failure detection.
    async fn crash(&mut self, token: &CancellationToken) -> Result<Outcome> {
        tracing::warn!(
            machine_id = %self.id,
            restart_ms = self.config.restart_delay_ms,
            "Simulating machine crash"
        );
        self.heartbeat.update(MachineSnapshot::crashed()).await?;
        if self.sleep_or_cancel(self.config.restart_delay(), token).await {
            return Ok(Outcome::Cancelled);
        }
        self.heartbeat.update(MachineSnapshot::idle()).await?;
        tracing::info!(machine_id = %self.id, "Machine restarted");
        Ok(Outcome::Crashed)
    }

    /// Returns `true` if cancelled before the sleep finished.
    async fn sleep_or_cancel(&self, duration: Duration, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}
