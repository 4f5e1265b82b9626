use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::config::{ApiConfig, SchedulerConfig};
use crate::error::Result;
use crate::scheduler::{
    HeartbeatMonitor, HeartbeatObserver, JobAssigner, JobQueue, OrderManager, OrderSubscriber,
    QueueStatusPublisher,
};
use crate::store::{DurableStore, StateStore};
use crate::transport::Transport;

/// Scheduler process: owns the stores, the transport and every component.
pub struct Node {
    pub config: SchedulerConfig,
    pub api: ApiConfig,
    pub state: Arc<dyn StateStore>,
    pub durable: Arc<dyn DurableStore>,
    pub transport: Arc<dyn Transport>,
    pub queue: JobQueue,
    pub orders: OrderManager,
}

impl Node {
    pub fn new(
        config: SchedulerConfig,
        api: ApiConfig,
        state: Arc<dyn StateStore>,
        durable: Arc<dyn DurableStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let queue = JobQueue::new(state.clone());
        let orders = OrderManager::new(state.clone(), durable.clone(), queue.clone());
        Ok(Self {
            config,
            api,
            state,
            durable,
            transport,
            queue,
            orders,
        })
    }

    /// Run the scheduler until `token` is cancelled.
    ///
    /// 1. Reconciles state left by an interrupted previous run
    /// 2. Spawns the heartbeat observer and order subscriber (event-driven)
    /// 3. Spawns the heartbeat monitor, job assigner and queue status
    ///    publisher (periodic)
    /// 4. Optionally spawns the inspection API
    /// 5. Waits for every task to stop after cancellation
    ///
    /// # Errors
    ///
    /// Returns an error only if reconciliation fails. Each component logs its
    /// own errors and keeps running.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        self.orders.reconcile().await?;

        let mut tasks = JoinSet::new();

        let observer = HeartbeatObserver::new(
            self.state.clone(),
            self.durable.clone(),
            self.transport.clone(),
            self.queue.clone(),
        );
        let observer_token = token.clone();
        tasks.spawn(async move {
            if let Err(e) = observer.run(observer_token).await {
                tracing::error!(error = %e, "Heartbeat observer failed to start");
            }
        });

        let subscriber = OrderSubscriber::new(self.transport.clone(), self.orders.clone());
        let subscriber_token = token.clone();
        tasks.spawn(async move {
            if let Err(e) = subscriber.run(subscriber_token).await {
                tracing::error!(error = %e, "Order subscriber failed to start");
            }
        });

        let monitor = HeartbeatMonitor::new(
            self.state.clone(),
            self.durable.clone(),
            self.queue.clone(),
            &self.config,
        );
        let monitor_token = token.clone();
        tasks.spawn(async move { monitor.run(monitor_token).await });

        let assigner = JobAssigner::new(
            self.state.clone(),
            self.durable.clone(),
            self.transport.clone(),
            self.queue.clone(),
            self.config.assignment_interval(),
        );
        let assigner_token = token.clone();
        tasks.spawn(async move { assigner.run(assigner_token).await });

        let publisher = QueueStatusPublisher::new(
            self.transport.clone(),
            self.queue.clone(),
            self.config.queue_status_interval(),
        );
        let publisher_token = token.clone();
        tasks.spawn(async move { publisher.run(publisher_token).await });

        if let Some(addr) = self.api.listen_addr {
            let api_state = ApiState {
                state: self.state.clone(),
                durable: self.durable.clone(),
                queue: self.queue.clone(),
                orders: self.orders.clone(),
            };
            let api_token = token.clone();
            tasks.spawn(async move { run_api(addr, api_state, api_token).await });
        }

        tracing::info!(
            heartbeat_timeout_ms = self.config.heartbeat_timeout().as_millis() as u64,
            "Scheduler running"
        );

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Scheduler task panicked");
            }
        }
        tracing::info!("Scheduler stopped");
        Ok(())
    }
}
