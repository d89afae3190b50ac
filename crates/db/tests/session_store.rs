//! Integration tests for `PgSessionStore` against a real PostgreSQL.
//!
//! Run with `DATABASE_URL` pointing at a scratch server and `--ignored`.

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use worktrack_core::session::NewSession;
use worktrack_core::store::{SessionRange, SessionStore, StoreError};
use worktrack_core::tier::Tier;
use worktrack_core::user::NewUser;
use worktrack_db::PgSessionStore;

async fn seed_active_session(store: &PgSessionStore, name: &str) -> (i64, i64) {
    let mut tx = store.begin().await.unwrap();
    let user = tx
        .create_user(&NewUser::new(name, Tier::Tier2).unwrap())
        .await
        .unwrap();
    let session = tx
        .create_session(&NewSession::new(user.id, "essay", Duration::minutes(60), Utc::now()).unwrap())
        .await
        .unwrap();
    tx.commit().await.unwrap();
    (user.id, session.id)
}

// ---------------------------------------------------------------------------
// Test: conditional completion applies exactly once
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn conditional_completion_applies_once(pool: PgPool) {
    let store = PgSessionStore::new(pool);
    let (_, session_id) = seed_active_session(&store, "alice").await;

    let now = Utc::now();
    assert_eq!(store.complete_session_conditional(session_id, now).await.unwrap(), 1);
    assert_eq!(
        store
            .complete_session_conditional(session_id, now + Duration::minutes(1))
            .await
            .unwrap(),
        0
    );

    let session = store.find_session_by_id(session_id).await.unwrap().unwrap();
    assert!(session.actual_end.is_some());
    assert!(session.actual_end.unwrap() < now + Duration::seconds(1));
}

// ---------------------------------------------------------------------------
// Test: duplicate user insert reports a conflict without poisoning the tx
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn duplicate_user_insert_keeps_transaction_usable(pool: PgPool) {
    let store = PgSessionStore::new(pool);
    seed_active_session(&store, "bob").await;

    let mut tx = store.begin().await.unwrap();
    let result = tx.create_user(&NewUser::new("bob", Tier::Tier1).unwrap()).await;
    assert_matches!(result, Err(StoreError::UniqueViolation { constraint }) if constraint == "uq_users_name");

    let existing = tx.find_user_by_name_for_update("bob").await.unwrap();
    assert_eq!(existing.map(|u| u.tier), Some(Tier::Tier2));
    tx.rollback().await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: the partial unique index rejects a second active session
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn second_active_session_violates_index(pool: PgPool) {
    let store = PgSessionStore::new(pool);
    let (user_id, _) = seed_active_session(&store, "carol").await;

    let mut tx = store.begin().await.unwrap();
    let result = tx
        .create_session(&NewSession::new(user_id, "again", Duration::minutes(60), Utc::now()).unwrap())
        .await;
    assert_matches!(result, Err(StoreError::UniqueViolation { constraint }) if constraint == "uq_sessions_active_user");
}

// ---------------------------------------------------------------------------
// Test: planned end update is a compare-and-set
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn planned_end_update_requires_previous_value(pool: PgPool) {
    let store = PgSessionStore::new(pool);
    let (_, session_id) = seed_active_session(&store, "dave").await;
    let session = store.find_session_by_id(session_id).await.unwrap().unwrap();

    let extended = session.planned_end + Duration::minutes(30);
    assert!(store
        .update_session_planned_end(session_id, session.planned_end, extended)
        .await
        .unwrap());
    // Stale `previous` no longer matches.
    assert!(!store
        .update_session_planned_end(session_id, session.planned_end, extended + Duration::minutes(5))
        .await
        .unwrap());
}

// ---------------------------------------------------------------------------
// Test: expiry does not override a newer planned end
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn expiry_requires_observed_planned_end(pool: PgPool) {
    let store = PgSessionStore::new(pool);
    let (_, session_id) = seed_active_session(&store, "erin").await;
    let session = store.find_session_by_id(session_id).await.unwrap().unwrap();

    let extended = session.planned_end + Duration::minutes(30);
    assert!(store
        .update_session_planned_end(session_id, session.planned_end, extended)
        .await
        .unwrap());

    let now = Utc::now();
    assert_eq!(
        store
            .expire_session_conditional(session_id, session.planned_end, now)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        store.expire_session_conditional(session_id, extended, now).await.unwrap(),
        1
    );
}

// ---------------------------------------------------------------------------
// Test: active listing joins owner name and tier
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn active_listing_includes_owner(pool: PgPool) {
    let store = PgSessionStore::new(pool);
    let (user_id, session_id) = seed_active_session(&store, "erin").await;

    let active = store.list_all_active_sessions().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].session_id, session_id);
    assert_eq!(active[0].user_name, "erin");
    assert_eq!(active[0].tier, Tier::Tier2);

    let all = store
        .list_sessions_for_user(user_id, SessionRange::All)
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}
