use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::scheduler::queue::JobQueue;
use crate::scheduler::stage::Stage;
use crate::transport::{publish_json, QueueStatus, Transport, QUEUE_STATUS_TOPIC};

/// Periodically broadcasts per-stage queue depths.
#[derive(Clone)]
pub struct QueueStatusPublisher {
    transport: Arc<dyn Transport>,
    queue: JobQueue,
    interval: Duration,
}

impl QueueStatusPublisher {
    pub fn new(transport: Arc<dyn Transport>, queue: JobQueue, interval: Duration) -> Self {
        Self {
            transport,
            queue,
            interval,
        }
    }

    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_once().await {
                        tracing::error!(error = %e, "Failed to publish queue status");
                    }
                }
            }
        }
    }

    pub async fn snapshot(&self) -> Result<QueueStatus> {
        let mut status = QueueStatus::default();
        for stage in Stage::ALL {
            status.set(stage, self.queue.len(stage).await?);
        }
        Ok(status)
    }

    pub async fn publish_once(&self) -> Result<QueueStatus> {
        let status = self.snapshot().await?;
        publish_json(self.transport.as_ref(), QUEUE_STATUS_TOPIC, &status).await?;
        tracing::debug!(
            job_a = status.job_a,
            job_b = status.job_b,
            job_c = status.job_c,
            job_d = status.job_d,
            "Queue status published"
        );
        Ok(status)
    }
}
