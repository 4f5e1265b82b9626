use serde::{Deserialize, Serialize};

/// Production stage. Each machine type executes exactly one stage, so the
/// same letter doubles as the machine type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    A,
    B,
    C,
    D,
}

/// Stage → operation lookup table used for logging and by simulated machines.
const OPERATIONS: [(Stage, &str); 4] = [
    (Stage::A, "printing"),
    (Stage::B, "cover"),
    (Stage::C, "binding"),
    (Stage::D, "packaging"),
];

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::A, Stage::B, Stage::C, Stage::D];

    /// Stages seeded when an order is created.
    pub const INITIAL: [Stage; 2] = [Stage::A, Stage::B];

    pub fn operation(self) -> &'static str {
        OPERATIONS
            .iter()
            .find(|(stage, _)| *stage == self)
            .map(|(_, op)| *op)
            .unwrap_or("unknown")
    }

    /// Name of the per-stage priority queue.
    pub fn queue_key(self) -> &'static str {
        match self {
            Stage::A => "job_a",
            Stage::B => "job_b",
            Stage::C => "job_c",
            Stage::D => "job_d",
        }
    }

    /// Stages that must all be completed before this one becomes eligible.
    pub fn dependencies(self) -> &'static [Stage] {
        match self {
            Stage::A | Stage::B => &[],
            Stage::C => &[Stage::A, Stage::B],
            Stage::D => &[Stage::C],
        }
    }

    /// Stages whose eligibility may change when this stage completes.
    pub fn dependents(self) -> &'static [Stage] {
        match self {
            Stage::A | Stage::B => &[Stage::C],
            Stage::C => &[Stage::D],
            Stage::D => &[],
        }
    }

    /// Status a freshly created unit starts with for this stage.
    pub fn initial_status(self) -> StageStatus {
        if self.dependencies().is_empty() {
            StageStatus::Pending
        } else {
            StageStatus::Waiting
        }
    }

    /// Priority used when a stage is enqueued after its dependencies clear.
    ///
    /// Binding waits on two independent stages, so it is lifted above fresh
    /// work. Packaging follows a single stage and gets no boost.
    pub fn unblocked_priority(self) -> Priority {
        if self.dependencies().len() > 1 {
            Priority::DependencySatisfied
        } else {
            Priority::New
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::A => write!(f, "A"),
            Stage::B => write!(f, "B"),
            Stage::C => write!(f, "C"),
            Stage::D => write!(f, "D"),
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Stage::A),
            "B" => Ok(Stage::B),
            "C" => Ok(Stage::C),
            "D" => Ok(Stage::D),
            other => Err(format!("unknown stage '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Waiting,
    Running,
    Completed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Waiting => write!(f, "waiting"),
            StageStatus::Running => write!(f, "running"),
            StageStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Queue priority tier. Higher tiers always dequeue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    New = 1,
    DependencySatisfied = 2,
    Recovery = 3,
}

impl Priority {
    pub fn tier(self) -> u8 {
        self as u8
    }

    pub fn from_tier(tier: u8) -> Option<Self> {
        match tier {
            1 => Some(Priority::New),
            2 => Some(Priority::DependencySatisfied),
            3 => Some(Priority::Recovery),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::New => "new",
            Priority::DependencySatisfied => "dependencies met",
            Priority::Recovery => "re-queued",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.tier(), self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_statuses_follow_dependencies() {
        assert_eq!(Stage::A.initial_status(), StageStatus::Pending);
        assert_eq!(Stage::B.initial_status(), StageStatus::Pending);
        assert_eq!(Stage::C.initial_status(), StageStatus::Waiting);
        assert_eq!(Stage::D.initial_status(), StageStatus::Waiting);
    }

    #[test]
    fn unblocked_priorities() {
        assert_eq!(Stage::C.unblocked_priority(), Priority::DependencySatisfied);
        assert_eq!(Stage::D.unblocked_priority(), Priority::New);
    }

    #[test]
    fn dependents_are_inverse_of_dependencies() {
        for stage in Stage::ALL {
            for dep in stage.dependencies() {
                assert!(dep.dependents().contains(&stage));
            }
        }
    }

    #[test]
    fn stage_parses_case_insensitively() {
        assert_eq!("c".parse::<Stage>().unwrap(), Stage::C);
        assert!("E".parse::<Stage>().is_err());
    }

    #[test]
    fn operation_lookup() {
        assert_eq!(Stage::A.operation(), "printing");
        assert_eq!(Stage::D.operation(), "packaging");
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Recovery > Priority::DependencySatisfied);
        assert!(Priority::DependencySatisfied > Priority::New);
        assert_eq!(Priority::Recovery.tier(), 3);
    }
}
