
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use bindery::api::{router, ApiState};
use bindery::scheduler::Stage;

use test_harness::{spec, Harness};

fn app(h: &Harness) -> Router {
    router(ApiState {
        state: h.state.clone(),
        durable: h.durable.clone(),
        queue: h.queue.clone(),
        orders: h.orders.clone(),
    })
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_queues_endpoint_reports_depths() {
    let h = Harness::new();
    h.orders.create_order(&spec(3)).await.unwrap();

    let (status, body) = get(app(&h), "/api/queues").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_a"], 3);
    assert_eq!(body["job_b"], 3);
    assert_eq!(body["job_c"], 0);
    assert_eq!(body["job_d"], 0);
    assert_eq!(body["total"], 6);
}

#[tokio::test]
async fn test_machines_endpoint_lists_sorted_states() {
    let mut h = Harness::new();
    h.register("C-2", Stage::C).await;
    h.register("A-1", Stage::A).await;

    let (status, body) = get(app(&h), "/api/machines").await;
    assert_eq!(status, StatusCode::OK);
    let machines = body.as_array().unwrap();
    assert_eq!(machines.len(), 2);
    assert_eq!(machines[0]["machine_id"], "A-1");
    assert_eq!(machines[0]["status"], "idle");
    assert_eq!(machines[1]["machine_id"], "C-2");
}

#[tokio::test]
async fn test_order_endpoint_returns_breakdown() {
    let h = Harness::new();
    let order_id = h.orders.create_order(&spec(2)).await.unwrap();

    let (status, body) = get(app(&h), &format!("/api/orders/{order_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["id"], order_id);
    assert_eq!(body["order"]["status"], "processing");
    assert_eq!(body["units_in_progress"], 2);
    assert_eq!(body["stages"].as_array().unwrap().len(), 4);
    assert_eq!(body["stages"][0]["pending"], 2);
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let h = Harness::new();
    let (status, body) = get(app(&h), "/api/orders/404").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("404"));
}

#[tokio::test]
async fn test_stats_endpoint_includes_recoveries() {
    let mut h = Harness::new();
    h.orders.create_order(&spec(1)).await.unwrap();
    h.register("A-1", Stage::A).await;
    h.assigner.assign_pending().await.unwrap();
    h.monitor
        .check_machines_at(Utc::now() + chrono::Duration::seconds(5))
        .await
        .unwrap();

    let (status, body) = get(app(&h), "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recovery"]["total_recoveries"], 1);
    assert_eq!(body["recent_recoveries"].as_array().unwrap().len(), 1);
    assert_eq!(body["recent_recoveries"][0]["reason"], "machine_failure");
    assert!(body["completed_orders"].as_array().unwrap().is_empty());
}
