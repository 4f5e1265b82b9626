
use chrono::{Duration, Utc};

use bindery::scheduler::{
    Assignee, HeartbeatOutcome, MachineStatus, Priority, RecoveryReason, Stage, StageStatus,
    UnitId,
};
use bindery::store::{DurableStore, StateStore};

use test_harness::{idle, running, spec, Harness};

/// Creates orders 1..=5 and hands unit `5:1` stage A to `A-1`.
async fn assign_five_one(h: &mut Harness) -> UnitId {
    for _ in 0..5 {
        h.orders.create_order(&spec(1)).await.unwrap();
    }
    // Drop the older printing entries so 5:1 is next in line.
    for _ in 0..4 {
        h.queue.dequeue(Stage::A).await.unwrap();
    }
    h.register("A-1", Stage::A).await;
    assert_eq!(h.assigner.assign_pending().await.unwrap(), 1);

    let unit_id = UnitId::new(5, 1);
    h.observer
        .handle_heartbeat(running("A-1", Stage::A, unit_id, 30))
        .await
        .unwrap();
    unit_id
}

fn past_timeout(h: &Harness) -> chrono::DateTime<Utc> {
    let timeout = Duration::from_std(h.config.heartbeat_timeout()).unwrap();
    Utc::now() + timeout + Duration::milliseconds(100)
}

#[tokio::test]
async fn test_silent_machine_work_is_requeued_at_recovery_priority() {
    let mut h = Harness::new();
    let unit_id = assign_five_one(&mut h).await;

    let requeued = h.monitor.check_machines_at(past_timeout(&h)).await.unwrap();
    assert_eq!(requeued, 1);

    let unit = h.state.get_unit(&unit_id).await.unwrap().unwrap();
    assert_eq!(unit.stage(Stage::A).status, StageStatus::Pending);
    assert!(unit.stage(Stage::A).machine.is_none());
    assert_eq!(
        h.queue.priority_of(Stage::A, &unit_id).await.unwrap(),
        Some(Priority::Recovery)
    );

    let events = h.durable.recovery_events().await.unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.unit_id, unit_id);
    assert_eq!(event.order_id, 5);
    assert_eq!(event.stage, Stage::A);
    assert_eq!(event.machine_id, "A-1");
    assert_eq!(event.reason, RecoveryReason::MachineFailure);
    assert!(event.recovery_ms() >= 0);

    let machine = h.state.get_machine("A-1").await.unwrap().unwrap();
    assert_eq!(machine.status, MachineStatus::Off);
}

#[tokio::test]
async fn test_machine_within_timeout_is_left_alone() {
    let mut h = Harness::new();
    let unit_id = assign_five_one(&mut h).await;

    assert_eq!(h.monitor.check_machines_at(Utc::now()).await.unwrap(), 0);
    let unit = h.state.get_unit(&unit_id).await.unwrap().unwrap();
    assert!(unit.stage(Stage::A).is_running_on("A-1"));
    assert!(h.durable.recovery_events().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dead_machine_is_recovered_only_once() {
    let mut h = Harness::new();
    assign_five_one(&mut h).await;

    let later = past_timeout(&h);
    assert_eq!(h.monitor.check_machines_at(later).await.unwrap(), 1);
    assert_eq!(
        h.monitor
            .check_machines_at(later + Duration::seconds(30))
            .await
            .unwrap(),
        0
    );
    assert_eq!(h.durable.recovery_events().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_idle_machine_failure_logs_no_recovery() {
    let mut h = Harness::new();
    h.register("D-1", Stage::D).await;

    assert_eq!(h.monitor.check_machines_at(past_timeout(&h)).await.unwrap(), 0);
    assert!(h.durable.recovery_events().await.unwrap().is_empty());
    let machine = h.state.get_machine("D-1").await.unwrap().unwrap();
    assert_eq!(machine.status, MachineStatus::Off);
}

#[tokio::test]
async fn test_late_heartbeat_from_replaced_machine_is_rejected() {
    let mut h = Harness::new();
    let unit_id = assign_five_one(&mut h).await;
    h.monitor.check_machines_at(past_timeout(&h)).await.unwrap();

    h.register("A-2", Stage::A).await;
    assert_eq!(h.assigner.assign_pending().await.unwrap(), 1);
    let unit = h.state.get_unit(&unit_id).await.unwrap().unwrap();
    assert!(unit.stage(Stage::A).is_running_on("A-2"));

    let outcome = h
        .observer
        .handle_heartbeat(running("A-1", Stage::A, unit_id, 60))
        .await
        .unwrap();
    assert_eq!(outcome, HeartbeatOutcome::Rejected);

    let unit = h.state.get_unit(&unit_id).await.unwrap().unwrap();
    assert!(unit.stage(Stage::A).is_running_on("A-2"));
    let old = h.state.get_machine("A-1").await.unwrap().unwrap();
    assert_eq!(old.status, MachineStatus::Off);

    // Returning to idle must not complete a stage A-1 no longer holds.
    let outcome = h
        .observer
        .handle_heartbeat(idle("A-1", Stage::A))
        .await
        .unwrap();
    assert_eq!(outcome, HeartbeatOutcome::Recorded);
    let unit = h.state.get_unit(&unit_id).await.unwrap().unwrap();
    assert!(unit.stage(Stage::A).is_running_on("A-2"));
}

#[tokio::test]
async fn test_replaced_machine_finishes_recovered_unit() {
    let mut h = Harness::new();
    let unit_id = assign_five_one(&mut h).await;
    h.monitor.check_machines_at(past_timeout(&h)).await.unwrap();

    h.register("A-2", Stage::A).await;
    h.assigner.assign_pending().await.unwrap();
    assert_eq!(
        h.finish("A-2", Stage::A, unit_id).await,
        HeartbeatOutcome::Completed(unit_id)
    );

    let unit = h.state.get_unit(&unit_id).await.unwrap().unwrap();
    assert_eq!(unit.stage(Stage::A).status, StageStatus::Completed);
    assert_eq!(unit.stage(Stage::A).machine.as_deref(), Some("A-2"));
    let summary = h.durable.recovery_summary(Some(5)).await.unwrap();
    assert_eq!(summary.total_recoveries, 1);
}

#[tokio::test]
async fn test_heartbeat_replay_is_idempotent() {
    let mut h = Harness::new();
    let unit_id = assign_five_one(&mut h).await;

    let heartbeat = running("A-1", Stage::A, unit_id, 45);
    h.observer.handle_heartbeat(heartbeat.clone()).await.unwrap();
    let machine_before = h.state.get_machine("A-1").await.unwrap();
    let unit_before = h.state.get_unit(&unit_id).await.unwrap();

    let outcome = h.observer.handle_heartbeat(heartbeat).await.unwrap();
    assert_eq!(outcome, HeartbeatOutcome::Recorded);
    assert_eq!(h.state.get_machine("A-1").await.unwrap(), machine_before);
    assert_eq!(h.state.get_unit(&unit_id).await.unwrap(), unit_before);
}

#[tokio::test]
async fn test_completion_replay_is_idempotent() {
    let mut h = Harness::new();
    let unit_id = assign_five_one(&mut h).await;

    let done = running("A-1", Stage::A, unit_id, 100);
    assert_eq!(
        h.observer.handle_heartbeat(done.clone()).await.unwrap(),
        HeartbeatOutcome::Completed(unit_id)
    );
    let unit_before = h.state.get_unit(&unit_id).await.unwrap();

    assert_eq!(
        h.observer.handle_heartbeat(done).await.unwrap(),
        HeartbeatOutcome::Rejected
    );
    assert_eq!(h.state.get_unit(&unit_id).await.unwrap(), unit_before);
}

#[tokio::test]
async fn test_unit_running_on_unknown_machine_is_orphaned() {
    let h = Harness::new();
    let order_id = h.orders.create_order(&spec(1)).await.unwrap();
    let unit_id = UnitId::new(order_id, 1);
    h.queue.dequeue(Stage::B).await.unwrap();
    h.state
        .update_stage(
            &unit_id,
            Stage::B,
            StageStatus::Running,
            Assignee::Machine("B-ghost"),
        )
        .await
        .unwrap();

    assert_eq!(h.monitor.check_machines_at(Utc::now()).await.unwrap(), 1);

    let unit = h.state.get_unit(&unit_id).await.unwrap().unwrap();
    assert_eq!(unit.stage(Stage::B).status, StageStatus::Pending);
    let events = h.durable.recovery_events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, RecoveryReason::Orphaned);
    assert_eq!(events[0].machine_id, "B-ghost");
    assert_eq!(
        h.queue.priority_of(Stage::B, &unit_id).await.unwrap(),
        Some(Priority::Recovery)
    );
}

#[tokio::test]
async fn test_unit_left_running_on_machine_marked_off_is_recovered() {
    let mut h = Harness::new();
    let order_id = h.orders.create_order(&spec(1)).await.unwrap();
    let unit_id = UnitId::new(order_id, 1);
    h.register("A-1", Stage::A).await;
    assert_eq!(h.assigner.assign_pending().await.unwrap(), 1);

    // A liveness pass's off write landing after the assignment.
    h.state
        .set_machine_status("A-1", MachineStatus::Off, None)
        .await
        .unwrap();

    let later = past_timeout(&h);
    assert_eq!(h.monitor.check_machines_at(later).await.unwrap(), 1);

    let unit = h.state.get_unit(&unit_id).await.unwrap().unwrap();
    assert_eq!(unit.stage(Stage::A).status, StageStatus::Pending);
    assert_eq!(
        h.queue.priority_of(Stage::A, &unit_id).await.unwrap(),
        Some(Priority::Recovery)
    );
    let events = h.durable.recovery_events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, RecoveryReason::MachineFailure);
    assert_eq!(events[0].machine_id, "A-1");

    assert_eq!(h.monitor.check_machines_at(later).await.unwrap(), 0);
}

#[tokio::test]
async fn test_machine_back_from_off_keeps_its_unit() {
    let mut h = Harness::new();
    let order_id = h.orders.create_order(&spec(1)).await.unwrap();
    let unit_id = UnitId::new(order_id, 1);
    h.register("A-1", Stage::A).await;
    h.assigner.assign_pending().await.unwrap();
    h.state
        .set_machine_status("A-1", MachineStatus::Off, None)
        .await
        .unwrap();

    // Off but heard from within the timeout: not stranded.
    assert_eq!(h.monitor.check_machines_at(Utc::now()).await.unwrap(), 0);
    let unit = h.state.get_unit(&unit_id).await.unwrap().unwrap();
    assert!(unit.stage(Stage::A).is_running_on("A-1"));
}
