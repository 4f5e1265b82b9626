use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, SchedulerError};

/// Timing of the scheduler's background loops.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Period at which machines are expected to heartbeat. Also the tick of
    /// the heartbeat monitor.
    pub heartbeat_interval_ms: u64,
    /// Missed heartbeat periods before a machine is declared failed.
    pub timeout_cycles: u32,
    /// Tick of the job assigner.
    pub assignment_interval_ms: u64,
    /// Tick of the queue status publisher.
    pub queue_status_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            timeout_cycles: 3,
            assignment_interval_ms: 500,
            queue_status_interval_ms: 1000,
        }
    }
}

impl SchedulerConfig {
    pub fn with_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    pub fn with_timeout_cycles(mut self, cycles: u32) -> Self {
        self.timeout_cycles = cycles;
        self
    }

    pub fn with_assignment_interval_ms(mut self, ms: u64) -> Self {
        self.assignment_interval_ms = ms;
        self
    }

    pub fn with_queue_status_interval_ms(mut self, ms: u64) -> Self {
        self.queue_status_interval_ms = ms;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence after which a machine counts as failed.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.timeout_cycles
    }

    pub fn assignment_interval(&self) -> Duration {
        Duration::from_millis(self.assignment_interval_ms)
    }

    pub fn queue_status_interval(&self) -> Duration {
        Duration::from_millis(self.queue_status_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "heartbeat interval must be positive".into(),
            ));
        }
        if self.timeout_cycles == 0 {
            return Err(SchedulerError::InvalidConfig(
                "timeout cycles must be at least 1".into(),
            ));
        }
        if self.assignment_interval_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "assignment interval must be positive".into(),
            ));
        }
        if self.queue_status_interval_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "queue status interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Simulated machine fleet.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Machines started for each stage type.
    pub machines_per_stage: usize,
    /// Bounds of the simulated time to process one unit.
    pub min_work_ms: u64,
    pub max_work_ms: u64,
    /// Chance per progress tick that a machine crashes mid-unit.
    pub failure_probability: f64,
    /// Silence of a crashed machine before it comes back idle.
    pub restart_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            machines_per_stage: 2,
            min_work_ms: 2000,
            max_work_ms: 5000,
            failure_probability: 0.0,
            restart_delay_ms: 10_000,
            heartbeat_interval_ms: 1000,
        }
    }
}

impl FleetConfig {
    pub fn with_machines_per_stage(mut self, count: usize) -> Self {
        self.machines_per_stage = count;
        self
    }

    pub fn with_work_range_ms(mut self, min: u64, max: u64) -> Self {
        self.min_work_ms = min;
        self.max_work_ms = max;
        self
    }

    pub fn with_failure_probability(mut self, probability: f64) -> Self {
        self.failure_probability = probability;
        self
    }

    pub fn with_restart_delay_ms(mut self, ms: u64) -> Self {
        self.restart_delay_ms = ms;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Also checks the fleet against the scheduler's failure detector: a
    /// crashed machine must stay silent long enough to be detected, or its
    /// return to idle would read as a completion.
    pub fn validate(&self, scheduler: &SchedulerConfig) -> Result<()> {
        if self.min_work_ms > self.max_work_ms {
            return Err(SchedulerError::InvalidConfig(format!(
                "work range {}..{} ms is empty",
                self.min_work_ms, self.max_work_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.failure_probability) {
            return Err(SchedulerError::InvalidConfig(format!(
                "failure probability {} is outside 0..=1",
                self.failure_probability
            )));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "machine heartbeat interval must be positive".into(),
            ));
        }
        if self.failure_probability > 0.0 && self.restart_delay() <= scheduler.heartbeat_timeout() {
            return Err(SchedulerError::InvalidConfig(format!(
                "restart delay {} ms must exceed the heartbeat timeout of {} ms",
                self.restart_delay_ms,
                scheduler.heartbeat_timeout().as_millis()
            )));
        }
        Ok(())
    }
}

/// Read-only inspection API. Disabled when no address is set.
#[derive(Debug, Clone, Default)]
pub struct ApiConfig {
    pub listen_addr: Option<SocketAddr>,
}
