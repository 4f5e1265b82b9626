//! Read-only JSON inspection API.
//!
//! | Route                  | Body                                         |
//! |------------------------|----------------------------------------------|
//! | `GET /api/queues`      | per-stage queue depths                       |
//! | `GET /api/machines`    | live machine states                          |
//! | `GET /api/orders/:id`  | order record with per-stage unit breakdown   |
//! | `GET /api/stats`       | completed-order timings and recovery metrics |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::SchedulerError;
use crate::scheduler::{
    JobQueue, MachineState, OrderDurationStats, OrderId, OrderManager, OrderStatusReport,
    RecoveryEvent, RecoverySummary, Stage,
};
use crate::store::{DurableStore, StateStore};
use crate::transport::QueueStatus;

/// Recovery events included in `/api/stats`.
const RECENT_RECOVERIES: usize = 20;

#[derive(Clone)]
pub struct ApiState {
    pub state: Arc<dyn StateStore>,
    pub durable: Arc<dyn DurableStore>,
    pub queue: JobQueue,
    pub orders: OrderManager,
}

#[derive(Serialize)]
struct QueuesResponse {
    #[serde(flatten)]
    depths: QueueStatus,
    total: usize,
}

#[derive(Serialize)]
struct StatsResponse {
    completed_orders: Vec<OrderDurationStats>,
    recovery: RecoverySummary,
    recent_recoveries: Vec<RecoveryEvent>,
}

struct ApiError(SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            SchedulerError::OrderNotFound(_) | SchedulerError::UnitNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            _ => {
                tracing::error!(error = %self.0, "Inspection request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/queues", get(queues_handler))
        .route("/api/machines", get(machines_handler))
        .route("/api/orders/:id", get(order_handler))
        .route("/api/stats", get(stats_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_api(addr: SocketAddr, state: ApiState, token: CancellationToken) {
    tracing::info!(addr = %addr, "Starting inspection API");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind inspection API");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Inspection API failed");
    }
}

async fn queues_handler(State(state): State<ApiState>) -> Result<Json<QueuesResponse>, ApiError> {
    let mut depths = QueueStatus::default();
    for stage in Stage::ALL {
        depths.set(stage, state.queue.len(stage).await?);
    }
    Ok(Json(QueuesResponse {
        total: depths.total(),
        depths,
    }))
}

async fn machines_handler(
    State(state): State<ApiState>,
) -> Result<Json<Vec<MachineState>>, ApiError> {
    let mut machines = Vec::new();
    for machine_id in state.state.machine_ids().await? {
        if let Some(machine) = state.state.get_machine(&machine_id).await? {
            machines.push(machine);
        }
    }
    machines.sort_by(|a, b| a.machine_id.cmp(&b.machine_id));
    Ok(Json(machines))
}

async fn order_handler(
    State(state): State<ApiState>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<OrderStatusReport>, ApiError> {
    Ok(Json(state.orders.order_status(order_id).await?))
}

async fn stats_handler(State(state): State<ApiState>) -> Result<Json<StatsResponse>, ApiError> {
    let mut recent_recoveries = state.durable.recovery_events().await?;
    recent_recoveries.truncate(RECENT_RECOVERIES);
    Ok(Json(StatsResponse {
        completed_orders: state.durable.order_duration_stats().await?,
        recovery: state.durable.recovery_summary(None).await?,
        recent_recoveries,
    }))
}
