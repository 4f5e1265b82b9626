use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::scheduler::stage::Stage;
use crate::scheduler::unit::UnitId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Off,
    Idle,
    Running,
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineStatus::Off => write!(f, "off"),
            MachineStatus::Idle => write!(f, "idle"),
            MachineStatus::Running => write!(f, "running"),
        }
    }
}

/// Self-reported machine status, published on `machines/{id}/heartbeat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub machine_id: String,
    pub machine_type: Stage,
    pub status: MachineStatus,
    #[serde(default)]
    pub current_unit_id: Option<UnitId>,
    #[serde(default)]
    pub progress: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

impl Heartbeat {
    /// Boundary checks beyond what the schema enforces.
    pub fn validate(&self, topic: &str) -> Result<()> {
        if self.machine_id.trim().is_empty() {
            return Err(SchedulerError::malformed(topic, "machine_id is empty"));
        }
        if let Some(progress) = self.progress {
            if progress > 100 {
                return Err(SchedulerError::malformed(
                    topic,
                    format!("progress {progress} is above 100"),
                ));
            }
        }
        if self.status == MachineStatus::Running && self.current_unit_id.is_none() {
            return Err(SchedulerError::malformed(
                topic,
                "running heartbeat without current_unit_id",
            ));
        }
        Ok(())
    }

    /// Snapshot of this heartbeat as it is stored.
    pub fn to_state(&self) -> MachineState {
        MachineState {
            machine_id: self.machine_id.clone(),
            machine_type: self.machine_type,
            status: self.status,
            current_unit_id: self.current_unit_id,
            progress: self.progress,
            last_heartbeat: self.timestamp,
        }
    }

    /// The part of a heartbeat the observer compares between observations.
    pub fn observation(&self) -> Observation {
        Observation {
            status: self.status,
            unit_id: self.current_unit_id,
            progress: self.progress,
        }
    }
}

/// Live machine state, overwritten on every accepted heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState {
    pub machine_id: String,
    pub machine_type: Stage,
    pub status: MachineStatus,
    pub current_unit_id: Option<UnitId>,
    pub progress: Option<u8>,
    pub last_heartbeat: DateTime<Utc>,
}

impl MachineState {
    pub fn silent_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_heartbeat
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub status: MachineStatus,
    pub unit_id: Option<UnitId>,
    pub progress: Option<u8>,
}

impl Observation {
    /// Unit whose stage just finished, if `next` signals a completion after
    /// `self`.
    ///
    /// Either the machine kept running the same unit and reached 100%, or it
    /// went from running a unit to idle.
    pub fn completed_unit(&self, next: &Observation) -> Option<UnitId> {
        if self.status != MachineStatus::Running {
            return None;
        }
        match next.status {
            MachineStatus::Running
                if next.unit_id.is_some()
                    && next.unit_id == self.unit_id
                    && next.progress == Some(100) =>
            {
                next.unit_id
            }
            MachineStatus::Idle => self.unit_id,
            _ => None,
        }
    }
}
