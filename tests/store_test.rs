mod common;

use std::sync::Arc;
use zrp_backend::store::{QueryProfiler, Store};

#[tokio::test]
async fn migrations_are_idempotent() {
    let app = common::setup().await;
    // Second run is a no-op, not an error.
    app.state.store.migrate().await.expect("re-running migrations");
    app.state.store.migrate().await.expect("third run");

    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
    )
    .fetch_all(app.state.store.pool())
    .await
    .unwrap();
    let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
    for expected in [
        "api_keys",
        "audit_log",
        "change_history",
        "ecos",
        "email_config",
        "inventory",
        "notification_queue",
        "parts",
        "role_permissions",
        "sessions",
        "undo_log",
        "users",
        "vendors",
        "work_orders",
    ] {
        assert!(names.contains(&expected), "missing table {expected}");
    }
}

#[tokio::test]
async fn wal_and_foreign_keys_are_enabled() {
    let app = common::setup().await;
    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(app.state.store.pool())
        .await
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");

    let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(app.state.store.pool())
        .await
        .unwrap();
    assert_eq!(fk, 1);
}

#[tokio::test]
async fn introspection_guarded_columns_are_present() {
    let app = common::setup().await;
    // Both columns come from the additive migration path.
    let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT email, notification_preferences FROM users LIMIT 1",
    )
    .fetch_optional(app.state.store.pool())
    .await
    .expect("added columns should exist");
    assert!(row.is_none()); // empty table, but the statement parsed
}

#[tokio::test]
async fn session_cascade_follows_user_deletion() {
    let app = common::setup().await;
    let user_id = common::create_user(&app, "cascade", "a-long-enough-password", "user").await;
    app.state
        .auth
        .login("cascade", "a-long-enough-password", None, None)
        .await
        .unwrap();

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(app.state.store.pool())
        .await
        .unwrap();

    let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(app.state.store.pool())
        .await
        .unwrap();
    assert_eq!(sessions, 0);
}

#[tokio::test]
async fn profiler_records_store_wrapped_queries() {
    let app = common::setup().await;
    let before = app.state.store.profiler_snapshot().total;

    app.state
        .store
        .exec("INSERT INTO vendors (test)", "store_test", || {
            sqlx::query(
                "INSERT INTO vendors (id, name, created_at, updated_at)
                    VALUES ('V-p', 'Profiled', datetime('now'), datetime('now'))",
            )
            .execute(app.state.store.pool())
        })
        .await
        .unwrap();

    let snapshot = app.state.store.profiler_snapshot();
    assert!(snapshot.total > before);
    let recorded = snapshot
        .recent
        .iter()
        .find(|r| r.caller == "store_test")
        .expect("exec is recorded");
    assert_eq!(recorded.rows, Some(1));
}

#[tokio::test]
async fn disabled_profiler_stays_empty() {
    let db_path = std::env::temp_dir().join(format!(
        "zrp-profiler-off-{}.db",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&db_path);
    let store = Store::connect_with(
        &db_path.display().to_string(),
        Arc::new(QueryProfiler::disabled()),
    )
    .await
    .unwrap();
    store.migrate().await.unwrap();

    store
        .profiled("SELECT 1", "store_test", || {
            sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(store.pool())
        })
        .await
        .unwrap();

    assert_eq!(store.profiler_snapshot().total, 0);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", db_path.display(), suffix));
    }
}
