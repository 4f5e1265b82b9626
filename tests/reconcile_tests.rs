
use bindery::scheduler::{Assignee, OrderStatus, Priority, Stage, StageStatus, UnitId, UnitState};
use bindery::store::{DurableStore, StateStore};

use chrono::Utc;
use test_harness::{spec, Harness};

#[tokio::test]
async fn test_pending_order_gets_missing_units_seeded() {
    let h = Harness::new();
    // Crash after the first unit was written.
    let order_id = h.durable.create_order(&spec(2)).await.unwrap();
    let first = UnitId::new(order_id, 1);
    h.state.put_unit(&UnitState::new(first, Utc::now())).await.unwrap();

    let report = h.orders.reconcile().await.unwrap();
    assert_eq!(report.orders_checked, 1);
    assert_eq!(report.units_seeded, 1);
    assert_eq!(report.stages_requeued, 4);

    let second = UnitId::new(order_id, 2);
    assert!(h.state.get_unit(&second).await.unwrap().is_some());
    for unit_id in [first, second] {
        for stage in [Stage::A, Stage::B] {
            assert_eq!(
                h.queue.priority_of(stage, &unit_id).await.unwrap(),
                Some(Priority::New)
            );
        }
    }
    let order = h.durable.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Processing);
}

#[tokio::test]
async fn test_popped_but_undispatched_stage_is_requeued() {
    let h = Harness::new();
    let order_id = h.orders.create_order(&spec(1)).await.unwrap();
    let unit_id = UnitId::new(order_id, 1);
    assert_eq!(h.queue.dequeue(Stage::A).await.unwrap(), Some(unit_id));

    let report = h.orders.reconcile().await.unwrap();
    assert_eq!(report.stages_requeued, 1);
    assert!(h.queue.contains(Stage::A, &unit_id).await.unwrap());
    assert_eq!(h.queue.len(Stage::B).await.unwrap(), 1);
}

#[tokio::test]
async fn test_waiting_binding_with_dependencies_met_is_released() {
    let h = Harness::new();
    let order_id = h.orders.create_order(&spec(1)).await.unwrap();
    let unit_id = UnitId::new(order_id, 1);
    for stage in [Stage::A, Stage::B] {
        h.queue.dequeue(stage).await.unwrap();
        h.state
            .update_stage(&unit_id, stage, StageStatus::Completed, Assignee::Machine("X-1"))
            .await
            .unwrap();
    }

    let report = h.orders.reconcile().await.unwrap();
    assert_eq!(report.stages_requeued, 1);

    let unit = h.state.get_unit(&unit_id).await.unwrap().unwrap();
    assert_eq!(unit.stage(Stage::C).status, StageStatus::Pending);
    assert_eq!(unit.stage(Stage::D).status, StageStatus::Waiting);
    assert_eq!(
        h.queue.priority_of(Stage::C, &unit_id).await.unwrap(),
        Some(Priority::DependencySatisfied)
    );
}

#[tokio::test]
async fn test_running_stage_is_left_to_the_monitor() {
    let h = Harness::new();
    let order_id = h.orders.create_order(&spec(1)).await.unwrap();
    let unit_id = UnitId::new(order_id, 1);
    h.queue.dequeue(Stage::A).await.unwrap();
    h.state
        .update_stage(&unit_id, Stage::A, StageStatus::Running, Assignee::Machine("A-1"))
        .await
        .unwrap();

    let report = h.orders.reconcile().await.unwrap();
    assert_eq!(report.stages_requeued, 0);
    assert!(!h.queue.contains(Stage::A, &unit_id).await.unwrap());
}

#[tokio::test]
async fn test_fully_finished_order_is_completed() {
    let h = Harness::new();
    // Crash after the last unit was deleted but before the order was marked.
    let order_id = h.durable.create_order(&spec(1)).await.unwrap();
    h.durable
        .update_order_status(order_id, OrderStatus::Processing)
        .await
        .unwrap();
    h.state.incr_completed(order_id).await.unwrap();

    let report = h.orders.reconcile().await.unwrap();
    assert_eq!(report.orders_completed, 1);

    let order = h.durable.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    assert!(order.completed_at.is_some());
    assert_eq!(h.state.completed_count(order_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let h = Harness::new();
    let order_id = h.durable.create_order(&spec(3)).await.unwrap();

    let first = h.orders.reconcile().await.unwrap();
    assert_eq!(first.units_seeded, 3);
    let second = h.orders.reconcile().await.unwrap();
    assert_eq!(second.units_seeded, 0);
    assert_eq!(second.stages_requeued, 0);
    assert_eq!(h.queue.len(Stage::A).await.unwrap(), 3);
    assert_eq!(h.state.order_unit_ids(order_id).await.unwrap().len(), 3);
}
