//! Scenario: legacy persisted statuses and caller-supplied status strings.
//!
//! # Invariants under test
//! - A row holding an out-of-vocabulary status is read as `waiting`.
//! - A transition out of such a row persists a remark naming the raw value.
//! - Mixed-case and padded targets are accepted; unknown targets fail with
//!   `InvalidTransition`, and an unknown entity still reports `NotFound` first.

use sqm_db::QueueStore;
use sqm_engine::{Actor, EngineOptions, TransitionError};
use sqm_status::{EventType, QueueStatus, Role};
use sqm_testkit::mem_engine;
use uuid::Uuid;

#[tokio::test]
async fn legacy_status_reads_as_waiting() {
    let (engine, store, _) = mem_engine(EngineOptions::default());
    let row = store.insert_raw(31, "ON_HOLD");

    let e = engine.get(row.id).await.unwrap();
    assert_eq!(e.status, QueueStatus::Waiting);
    // Reads never write.
    assert_eq!(store.row(row.id).unwrap().status, "ON_HOLD");
}

#[tokio::test]
async fn transition_out_of_legacy_status_records_the_correction() {
    let (engine, store, _) = mem_engine(EngineOptions::default());
    let row = store.insert_raw(32, "in_progress");

    let e = engine
        .change_status(row.id, QueueStatus::Serving, &Actor::staff("c-1", Role::Cashier))
        .await
        .unwrap();
    assert_eq!(e.status, QueueStatus::Serving);

    let remarks = e.remarks.unwrap_or_default();
    assert!(remarks.contains("in_progress"), "remarks={remarks}");
    assert!(remarks.contains("waiting"), "remarks={remarks}");

    let events = store.events_for(row.id);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].previous_status, QueueStatus::Waiting);
    assert_eq!(events[0].event_type, EventType::Called);
}

#[tokio::test]
async fn legacy_row_obeys_graph_from_waiting() {
    let (engine, store, _) = mem_engine(EngineOptions::default());
    let row = store.insert_raw(33, "done");

    let err = engine
        .change_status(row.id, QueueStatus::Completed, &Actor::staff("a-1", Role::Admin))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransitionError::InvalidTransition {
            from: QueueStatus::Waiting,
            ..
        }
    ));
    assert_eq!(store.row(row.id).unwrap().status, "done");
}

#[tokio::test]
async fn padded_mixed_case_target_is_accepted() {
    let (engine, store, _) = mem_engine(EngineOptions::default());
    let id = store.create_entity(34).await.unwrap().id;

    let e = engine
        .change_status_raw(id, "  Serving ", &Actor::staff("c-1", Role::Cashier))
        .await
        .unwrap();
    assert_eq!(e.status, QueueStatus::Serving);
}

#[tokio::test]
async fn unknown_target_is_invalid_and_mutates_nothing() {
    let (engine, store, _) = mem_engine(EngineOptions::default());
    let id = store.create_entity(35).await.unwrap().id;

    for raw in ["on_hold", "", "   ", "canceled"] {
        let err = engine
            .change_status_raw(id, raw, &Actor::staff("a-1", Role::Admin))
            .await
            .unwrap_err();
        match err {
            TransitionError::InvalidTransition { from, requested } => {
                assert_eq!(from, QueueStatus::Waiting);
                assert_eq!(requested, raw);
            }
            other => panic!("raw={raw:?} gave {other:?}"),
        }
    }
    assert_eq!(store.row(id).unwrap().status, "waiting");
    assert!(store.events_for(id).is_empty());
}

#[tokio::test]
async fn missing_entity_wins_over_bad_target() {
    let (engine, _, _) = mem_engine(EngineOptions::default());
    let err = engine
        .change_status_raw(Uuid::new_v4(), "nonsense", &Actor::staff("a-1", Role::Admin))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::NotFound { .. }), "{err:?}");
}
