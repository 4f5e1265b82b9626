use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::scheduler::{Heartbeat, MachineStatus, Stage, UnitId};
use crate::transport::{heartbeat_topic, publish_json, Transport};

/// What a machine currently reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineSnapshot {
    pub status: MachineStatus,
    pub unit_id: Option<UnitId>,
    pub progress: Option<u8>,
    /// A crashed machine is offline and sends nothing.
    pub online: bool,
}

impl MachineSnapshot {
    pub fn idle() -> Self {
        Self {
            status: MachineStatus::Idle,
            unit_id: None,
            progress: None,
            online: true,
        }
    }

    pub fn running(unit_id: UnitId, progress: u8) -> Self {
        Self {
            status: MachineStatus::Running,
            unit_id: Some(unit_id),
            progress: Some(progress),
            online: true,
        }
    }

    /// Powered down cleanly. Still announced, unlike a crash.
    pub fn off() -> Self {
        Self {
            status: MachineStatus::Off,
            unit_id: None,
            progress: None,
            online: true,
        }
    }

    pub fn crashed() -> Self {
        Self {
            online: false,
            ..Self::off()
        }
    }
}

/// Publishes a machine's heartbeats.
///
/// The snapshot lock is held across each publish, so periodic heartbeats and
/// state-change heartbeats reach the transport in the order the state changed.
#[derive(Clone)]
pub struct HeartbeatSender {
    machine_id: String,
    stage: Stage,
    interval: Duration,
    transport: Arc<dyn Transport>,
    snapshot: Arc<Mutex<MachineSnapshot>>,
}

impl HeartbeatSender {
    pub fn new(
        machine_id: impl Into<String>,
        stage: Stage,
        interval: Duration,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            stage,
            interval,
            transport,
            snapshot: Arc::new(Mutex::new(MachineSnapshot::idle())),
        }
    }

    /// Replaces the snapshot and publishes it immediately.
    pub async fn update(&self, next: MachineSnapshot) -> Result<()> {
        let mut snapshot = self.snapshot.lock().await;
        *snapshot = next;
        self.publish(&snapshot).await
    }

    /// Sends the current snapshot every interval until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = self.snapshot.lock().await;
                    if let Err(e) = self.publish(&snapshot).await {
                        tracing::warn!(machine_id = %self.machine_id, error = %e, "Heartbeat publish failed");
                    }
                }
            }
        }
    }

    async fn publish(&self, snapshot: &MachineSnapshot) -> Result<()> {
        if !snapshot.online {
            return Ok(());
        }
        let heartbeat = Heartbeat {
            machine_id: self.machine_id.clone(),
            machine_type: self.stage,
            status: snapshot.status,
            current_unit_id: snapshot.unit_id,
            progress: snapshot.progress,
            timestamp: Utc::now(),
        };
        publish_json(
            self.transport.as_ref(),
            &heartbeat_topic(&self.machine_id),
            &heartbeat,
        )
        .await
    }
}
