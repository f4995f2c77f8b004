//! Scenario: graph and role matrix decide every status change.
//!
//! # Invariants under test
//! - Pairs outside the graph fail with `InvalidTransition` for every role.
//! - Legal edges a role is not granted fail with `AccessDenied`, never
//!   `InvalidTransition`.
//! - Terminal statuses accept no further transition.
//! - The seven reference flows behave as documented.

use sqm_db::QueueStore;
use sqm_engine::{Actor, EngineOptions, StatusEngine, TransitionError};
use sqm_status::{is_allowed_for_role, is_legal_transition, EventType, QueueStatus, Role};
use sqm_testkit::{mem_engine, MemQueueStore};
use uuid::Uuid;

use QueueStatus::{Cancelled, Completed, Processing, Serving, Waiting};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Create an entity and walk it to `status` through the trusted path.
async fn entity_at(engine: &StatusEngine<MemQueueStore>, status: QueueStatus) -> Uuid {
    let id = engine
        .store()
        .create_entity(1)
        .await
        .expect("create entity")
        .id;
    let path: &[QueueStatus] = match status {
        Waiting => &[],
        Serving => &[Serving],
        Processing => &[Serving, Processing],
        Completed => &[Serving, Processing, Completed],
        Cancelled => &[Cancelled],
    };
    let system = Actor::system("seed");
    for step in path {
        engine
            .change_status(id, *step, &system)
            .await
            .expect("seed transition");
    }
    id
}

async fn status_of(engine: &StatusEngine<MemQueueStore>, id: Uuid) -> QueueStatus {
    engine.get(id).await.expect("entity exists").status
}

// ---------------------------------------------------------------------------
// Reference flows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cashier_calls_waiting_entry() {
    let (engine, store, _) = mem_engine(EngineOptions::default());
    let id = entity_at(&engine, Waiting).await;

    let e = engine
        .change_status(id, Serving, &Actor::staff("cashier-1", Role::Cashier))
        .await
        .expect("cashier may call");
    assert_eq!(e.status, Serving);

    let events = store.events_for(id);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Called);
    assert_eq!(events[0].previous_status, Waiting);
    assert_eq!(events[0].actor_id, "cashier-1");
    assert_eq!(events[0].actor_role, Some(Role::Cashier));
}

#[tokio::test]
async fn cashier_starts_processing_and_start_is_stamped() {
    let (engine, store, _) = mem_engine(EngineOptions::default());
    let id = entity_at(&engine, Serving).await;

    let e = engine
        .change_status(id, Processing, &Actor::staff("cashier-1", Role::Cashier))
        .await
        .expect("cashier may start processing");
    assert_eq!(e.status, Processing);
    assert!(e.processing_started_at.is_some());
    assert!(e.processing_ended_at.is_none());

    let last = store.events_for(id).pop().expect("ledger row");
    assert_eq!(last.event_type, EventType::ProcessingStarted);
    assert_eq!(last.processing_start_at, e.processing_started_at);
}

#[tokio::test]
async fn admin_completes_and_end_is_stamped() {
    let (engine, store, _) = mem_engine(EngineOptions::default());
    let id = entity_at(&engine, Processing).await;

    let e = engine
        .change_status(id, Completed, &Actor::staff("admin-1", Role::Admin))
        .await
        .expect("admin may complete");
    assert_eq!(e.status, Completed);
    assert!(e.processing_ended_at.is_some());

    let last = store.events_for(id).pop().expect("ledger row");
    assert_eq!(last.event_type, EventType::Served);
    assert!(last.processing_end_at.is_some());
}

#[tokio::test]
async fn admin_cannot_reopen_completed() {
    let (engine, _, _) = mem_engine(EngineOptions::default());
    let id = entity_at(&engine, Completed).await;

    let err = engine
        .change_status(id, Processing, &Actor::staff("admin-1", Role::Admin))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::InvalidTransition { .. }), "{err:?}");
    assert_eq!(err.to_string(), "Invalid status transition");
    assert_eq!(status_of(&engine, id).await, Completed);
}

#[tokio::test]
async fn admin_cannot_requeue_cancelled() {
    let (engine, _, _) = mem_engine(EngineOptions::default());
    let id = entity_at(&engine, Cancelled).await;

    let err = engine
        .change_status(id, Waiting, &Actor::staff("admin-1", Role::Admin))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::InvalidTransition { .. }), "{err:?}");
    assert_eq!(status_of(&engine, id).await, Cancelled);
}

#[tokio::test]
async fn sales_is_denied_calling() {
    let (engine, store, _) = mem_engine(EngineOptions::default());
    let id = entity_at(&engine, Waiting).await;

    let err = engine
        .change_status(id, Serving, &Actor::staff("sales-1", Role::Sales))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::AccessDenied { .. }), "{err:?}");
    assert_eq!(err.to_string(), "Access denied");
    assert_eq!(status_of(&engine, id).await, Waiting);
    assert!(store.events_for(id).is_empty());
}

#[tokio::test]
async fn cashier_is_denied_fast_track_but_admin_may_take_it() {
    let (engine, _, _) = mem_engine(EngineOptions::default());
    let id = entity_at(&engine, Waiting).await;

    let err = engine
        .change_status(id, Processing, &Actor::staff("cashier-1", Role::Cashier))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::AccessDenied { .. }), "{err:?}");
    assert_eq!(status_of(&engine, id).await, Waiting);

    let e = engine
        .change_status(id, Processing, &Actor::staff("admin-1", Role::Admin))
        .await
        .expect("admin may fast-track");
    assert_eq!(e.status, Processing);
    assert!(e.processing_started_at.is_some());
}

// ---------------------------------------------------------------------------
// Exhaustive matrix
// ---------------------------------------------------------------------------

#[tokio::test]
async fn illegal_pairs_are_invalid_for_every_role() {
    let (engine, store, _) = mem_engine(EngineOptions::default());

    for from in QueueStatus::ALL {
        for to in QueueStatus::ALL {
            if is_legal_transition(from, to) {
                continue;
            }
            let id = entity_at(&engine, from).await;
            let before = store.events_for(id).len();

            for role in Role::ALL {
                let err = engine
                    .change_status(id, to, &Actor::staff("u", role))
                    .await
                    .unwrap_err();
                assert!(
                    matches!(err, TransitionError::InvalidTransition { .. }),
                    "{role}: {from}->{to} gave {err:?}"
                );
            }
            assert_eq!(status_of(&engine, id).await, from);
            assert_eq!(store.events_for(id).len(), before);
        }
    }
}

#[tokio::test]
async fn ungranted_legal_edges_are_denied_never_invalid() {
    let (engine, _, _) = mem_engine(EngineOptions::default());

    for from in QueueStatus::ALL {
        for to in QueueStatus::ALL {
            if !is_legal_transition(from, to) {
                continue;
            }
            for role in Role::ALL {
                let id = entity_at(&engine, from).await;
                let res = engine.change_status(id, to, &Actor::staff("u", role)).await;
                if is_allowed_for_role(role, from, to) {
                    let e = res.unwrap_or_else(|e| panic!("{role}: {from}->{to}: {e:?}"));
                    assert_eq!(e.status, to);
                } else {
                    let err = res.unwrap_err();
                    assert!(
                        matches!(err, TransitionError::AccessDenied { .. }),
                        "{role}: {from}->{to} gave {err:?}"
                    );
                    assert_eq!(status_of(&engine, id).await, from);
                }
            }
        }
    }
}

#[tokio::test]
async fn terminal_statuses_accept_nothing_even_from_system() {
    let (engine, _, _) = mem_engine(EngineOptions::default());
    for terminal in [Completed, Cancelled] {
        let id = entity_at(&engine, terminal).await;
        for to in QueueStatus::ALL {
            let err = engine
                .change_status(id, to, &Actor::system("scheduler"))
                .await
                .unwrap_err();
            assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        }
    }
}

#[tokio::test]
async fn unknown_entity_is_not_found() {
    let (engine, _, _) = mem_engine(EngineOptions::default());
    let err = engine
        .change_status(Uuid::new_v4(), Serving, &Actor::staff("admin-1", Role::Admin))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::NotFound { .. }), "{err:?}");
    assert_eq!(err.to_string(), "Queue entry not found");
}

#[tokio::test]
async fn unrecognized_role_claim_is_denied() {
    let (engine, _, _) = mem_engine(EngineOptions::default());
    let id = entity_at(&engine, Waiting).await;
    let err = engine
        .change_status(id, Serving, &Actor::from_claim("u-9", "floor_manager"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::AccessDenied { .. }), "{err:?}");
}
