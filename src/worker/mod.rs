//! Simulated production machines.
//!
//! Stands in for the physical fleet so the scheduler can run end to end
//! in-process:
//! - **Work**: listens on `machines/{id}/work` and processes assignments
//!   sequentially with progress ticks
//! - **Heartbeat**: reports status on an interval and immediately on every
//!   state change
//! - **Crashes**: with a configurable probability a machine goes silent for a
//!   restart delay, losing the unit in hand
//!
//! Machine ids are `{stage}-{n}`, e.g. `C-2`.

pub mod heartbeat;
pub mod machine;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::FleetConfig;
use crate::scheduler::Stage;
use crate::transport::Transport;

pub use heartbeat::{HeartbeatSender, MachineSnapshot};
pub use machine::SimulatedMachine;

/// Starts `machines_per_stage` machines for every stage.
pub fn spawn_fleet(
    config: &FleetConfig,
    transport: Arc<dyn Transport>,
    token: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for stage in Stage::ALL {
        for n in 1..=config.machines_per_stage {
            let machine = SimulatedMachine::new(
                format!("{stage}-{n}"),
                stage,
                transport.clone(),
                config.clone(),
            );
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                let machine_id = machine.id().to_string();
                if let Err(e) = machine.run(token).await {
                    tracing::error!(machine_id = %machine_id, error = %e, "Machine stopped with error");
                }
            }));
        }
    }
    tracing::info!(machines = handles.len(), "Simulated fleet started");
    handles
}
