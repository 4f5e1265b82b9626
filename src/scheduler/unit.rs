use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::order::OrderId;
use crate::scheduler::stage::{Stage, StageStatus};

/// Identity of one physical item of an order, rendered as `"{order}:{n}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitId {
    pub order_id: OrderId,
    pub unit_number: u32,
}

impl UnitId {
    pub fn new(order_id: OrderId, unit_number: u32) -> Self {
        Self {
            order_id,
            unit_number,
        }
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.order_id, self.unit_number)
    }
}

impl std::str::FromStr for UnitId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (order, number) = s
            .split_once(':')
            .ok_or_else(|| format!("unit id '{s}' is not of the form order:unit"))?;
        let order_id = order
            .parse::<OrderId>()
            .map_err(|e| format!("unit id '{s}' has invalid order id: {e}"))?;
        let unit_number = number
            .parse::<u32>()
            .map_err(|e| format!("unit id '{s}' has invalid unit number: {e}"))?;
        if unit_number == 0 {
            return Err(format!("unit id '{s}' has unit number 0"));
        }
        Ok(Self::new(order_id, unit_number))
    }
}

impl TryFrom<String> for UnitId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UnitId> for String {
    fn from(id: UnitId) -> Self {
        id.to_string()
    }
}

/// Per-stage slice of a unit's live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    pub status: StageStatus,
    pub machine: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StageState {
    pub fn new(status: StageStatus) -> Self {
        Self {
            status,
            machine: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// True if `machine_id` currently holds this stage.
    pub fn is_running_on(&self, machine_id: &str) -> bool {
        self.status == StageStatus::Running && self.machine.as_deref() == Some(machine_id)
    }
}

/// Live state of a unit as held in the state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    pub id: UnitId,
    pub created_at: DateTime<Utc>,
    stages: [StageState; 4],
}

impl UnitState {
    pub fn new(id: UnitId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            stages: Stage::ALL.map(|stage| StageState::new(stage.initial_status())),
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.id.order_id
    }

    pub fn stage(&self, stage: Stage) -> &StageState {
        &self.stages[stage as usize]
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageState {
        &mut self.stages[stage as usize]
    }

    pub fn is_completed(&self, stage: Stage) -> bool {
        self.stage(stage).status == StageStatus::Completed
    }

    /// True when every dependency of `stage` has completed.
    pub fn dependencies_met(&self, stage: Stage) -> bool {
        stage.dependencies().iter().all(|dep| self.is_completed(*dep))
    }
}

/// Assignment change carried alongside a stage status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignee<'a> {
    Unchanged,
    Cleared,
    Machine(&'a str),
}
