mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use worktrack_core::error::CoreError;
use worktrack_lifecycle::expiration::{ExpirationOutcome, ReconcileReport};
use worktrack_lifecycle::join::JoinRequest;
use worktrack_lifecycle::ServiceSettings;

use common::{harness, harness_with, minutes_from_now, wait_for_completion};

// ---------------------------------------------------------------------------
// Startup reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn overdue_session_is_completed_on_startup_without_timer() {
    let h = harness();
    let overdue = h
        .store
        .insert_session("alice", "", minutes_from_now(-70), minutes_from_now(-10));

    let report = h.service.initialize_from_database().await.unwrap();

    assert_eq!(
        report,
        ReconcileReport {
            completed: 1,
            ..ReconcileReport::default()
        }
    );
    assert!(!h.store.session(overdue.id).unwrap().is_active());
    assert_eq!(h.publisher.ended_count(overdue.id), 1);
    assert_eq!(h.service.expiration().registry().total_armed(), 0);

    // A second pass finds nothing left to do.
    let again = h.service.initialize_from_database().await.unwrap();
    assert_eq!(again, ReconcileReport::default());
    assert_eq!(h.publisher.ended_count(overdue.id), 1);
    assert_eq!(h.store.completions_applied(), 1);
}

#[tokio::test]
async fn future_sessions_get_timers_on_startup() {
    let h = harness();
    let pending = h
        .store
        .insert_session("alice", "", minutes_from_now(-10), minutes_from_now(30));
    let overdue = h
        .store
        .insert_session("bob", "", minutes_from_now(-90), minutes_from_now(-1));

    let report = h.service.initialize_from_database().await.unwrap();

    assert_eq!(report.scheduled, 1);
    assert_eq!(report.completed, 1);
    let registry = h.service.expiration().registry();
    assert_eq!(registry.deadline(pending.id), Some(pending.planned_end));
    assert!(!registry.is_armed(overdue.id));
    assert!(h.store.session(pending.id).unwrap().is_active());
}

#[tokio::test]
async fn reconciliation_fails_fast_when_store_is_down() {
    let h = harness();
    h.store.set_unavailable(true);
    assert_matches!(
        h.service.initialize_from_database().await,
        Err(CoreError::StorageUnavailable(_))
    );
}

// ---------------------------------------------------------------------------
// Firing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timer_completes_session_at_planned_end() {
    let h = harness_with(ServiceSettings {
        default_duration: chrono::Duration::milliseconds(200),
        ..ServiceSettings::default()
    });
    let joined = h.service.join(&JoinRequest::new("alice", "")).await.unwrap();

    let session = wait_for_completion(&h.store, joined.session_id, Duration::from_secs(5)).await;

    assert!(!session.is_active());
    assert_eq!(h.publisher.ended_count(joined.session_id), 1);
    assert!(!h.service.expiration().registry().is_armed(joined.session_id));
}

#[tokio::test]
async fn out_before_deadline_prevents_expiry() {
    let h = harness_with(ServiceSettings {
        default_duration: chrono::Duration::milliseconds(300),
        ..ServiceSettings::default()
    });
    let joined = h.service.join(&JoinRequest::new("alice", "")).await.unwrap();
    let out = h.service.out("alice").await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(
        h.store.session(joined.session_id).unwrap().actual_end,
        Some(out.actual_end)
    );
    assert_eq!(h.publisher.ended_count(joined.session_id), 1);
}

#[tokio::test]
async fn expiring_completed_session_is_noop() {
    let h = harness();
    let joined = h.service.join(&JoinRequest::new("alice", "")).await.unwrap();
    h.service.out("alice").await.unwrap();

    let outcome = h
        .service
        .expiration()
        .handle_expiration(joined.session_id, joined.user_id)
        .await
        .unwrap();

    assert_eq!(outcome, ExpirationOutcome::AlreadyCompleted);
    assert_eq!(h.publisher.ended_count(joined.session_id), 1);
}

#[tokio::test]
async fn extended_session_is_not_due() {
    let h = harness();
    let session = h
        .store
        .insert_session("alice", "", minutes_from_now(-5), minutes_from_now(10));

    let outcome = h
        .service
        .expiration()
        .handle_expiration(session.id, session.user_id)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ExpirationOutcome::Postponed {
            planned_end: session.planned_end
        }
    );
    assert!(h.store.session(session.id).unwrap().is_active());
}

#[tokio::test]
async fn missing_session_is_reported() {
    let h = harness();
    let outcome = h.service.expiration().handle_expiration(404, 1).await.unwrap();
    assert_eq!(outcome, ExpirationOutcome::Missing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_completions_apply_once() {
    let h = harness();
    let session = h
        .store
        .insert_session("alice", "", minutes_from_now(-60), minutes_from_now(-1));

    let expirations: Vec<_> = (0..3)
        .map(|_| {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .expiration()
                    .handle_expiration(session.id, session.user_id)
                    .await
            })
        })
        .collect();
    let out = {
        let service = h.service.clone();
        tokio::spawn(async move { service.out("alice").await })
    };

    let mut completed = 0;
    for handle in expirations {
        if let ExpirationOutcome::Completed { .. } = handle.await.unwrap().unwrap() {
            completed += 1;
        }
    }
    match out.await.unwrap() {
        Ok(_) => {}
        Err(CoreError::SessionNotFound { .. }) => {}
        Err(other) => panic!("unexpected out error: {other}"),
    }

    assert!(completed <= 1);
    assert_eq!(h.store.completions_applied(), 1);
    assert_eq!(h.publisher.ended_count(session.id), 1);
}

#[tokio::test]
async fn shutdown_cancels_pending_timers() {
    let h = harness();
    h.service.join(&JoinRequest::new("alice", "")).await.unwrap();
    h.service.join(&JoinRequest::new("bob", "")).await.unwrap();

    assert_eq!(h.service.shutdown(), 2);
    assert!(h.service.expiration().registry().is_empty());
}
