
use std::sync::Arc;

use serde_json::json;

use bindery::error::SchedulerError;
use bindery::scheduler::{OrderStatus, OrderSubscriber, Stage};
use bindery::store::{DurableStore, StateStore};
use bindery::transport::{Message, ORDER_CREATE_TOPIC};

use test_harness::Harness;

fn message(payload: serde_json::Value) -> Message {
    Message {
        topic: ORDER_CREATE_TOPIC.to_string(),
        payload: serde_json::to_vec(&payload).unwrap(),
    }
}

fn subscriber(h: &Harness) -> OrderSubscriber {
    OrderSubscriber::new(Arc::new(h.bus.clone()), h.orders.clone())
}

fn valid_request() -> serde_json::Value {
    json!({
        "title": "Piranesi",
        "author": "Susanna Clarke",
        "pages": 272,
        "cover_type": "softcover",
        "paper_type": "glossy",
        "quantity": 4
    })
}

#[tokio::test]
async fn test_valid_request_creates_order() {
    let h = Harness::new();
    let order_id = subscriber(&h)
        .handle_message(&message(valid_request()))
        .await
        .unwrap();

    let order = h.durable.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.title, "Piranesi");
    assert_eq!(order.quantity, 4);
    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(h.state.order_unit_ids(order_id).await.unwrap().len(), 4);
    assert_eq!(h.queue.len(Stage::A).await.unwrap(), 4);
}

#[tokio::test]
async fn test_unknown_field_is_rejected() {
    let h = Harness::new();
    let mut request = valid_request();
    request["rush"] = json!(true);

    let result = subscriber(&h).handle_message(&message(request)).await;
    assert!(matches!(result, Err(SchedulerError::MalformedMessage { .. })));
    assert!(h.state.unit_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_cover_type_is_rejected() {
    let h = Harness::new();
    let mut request = valid_request();
    request["cover_type"] = json!("leather");

    let result = subscriber(&h).handle_message(&message(request)).await;
    assert!(matches!(result, Err(SchedulerError::MalformedMessage { .. })));
}

#[tokio::test]
async fn test_zero_quantity_is_invalid() {
    let h = Harness::new();
    let mut request = valid_request();
    request["quantity"] = json!(0);

    let result = subscriber(&h).handle_message(&message(request)).await;
    assert!(matches!(result, Err(SchedulerError::InvalidOrder(_))));
    assert!(h
        .durable
        .orders_with_status(OrderStatus::Pending)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_oversized_quantity_is_invalid() {
    let h = Harness::new();
    let mut request = valid_request();
    request["quantity"] = json!(u32::MAX);

    let result = subscriber(&h).handle_message(&message(request)).await;
    assert!(matches!(result, Err(SchedulerError::InvalidOrder(_))));
    assert!(h.state.unit_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_garbage_payload_is_malformed() {
    let h = Harness::new();
    let garbage = Message {
        topic: ORDER_CREATE_TOPIC.to_string(),
        payload: b"not json at all".to_vec(),
    };

    let result = subscriber(&h).handle_message(&garbage).await;
    assert!(matches!(result, Err(SchedulerError::MalformedMessage { .. })));
}
