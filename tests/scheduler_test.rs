mod common;

use chrono::{Duration, Utc};
use std::path::PathBuf;
use zrp_backend::features::audit::models::{AuditAction, AuditEvent};
use zrp_backend::features::audit::MutationCtx;
use zrp_backend::features::scheduler::backup;
use zrp_backend::features::vendors::models::CreateVendor;

fn backup_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("zrp-sched-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn ctx() -> MutationCtx {
    MutationCtx {
        user_id: Some(1),
        username: "admin".to_string(),
        ip_address: None,
        user_agent: None,
    }
}

#[tokio::test]
async fn backup_produces_a_valid_snapshot() {
    let app = common::setup().await;
    for i in 0..3 {
        app.state
            .vendors
            .create(
                &ctx(),
                CreateVendor {
                    id: format!("V-{i}"),
                    name: format!("Vendor {i}"),
                    contact_name: None,
                    email: None,
                    phone: None,
                    address: None,
                    notes: None,
                },
            )
            .await
            .unwrap();
    }

    let dir = backup_dir("valid");
    let path = backup::run_backup(&app.state.store, &dir, 7).await.unwrap();
    assert!(path.exists());
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("zrp-backup-") && name.ends_with(".db"));

    // The snapshot opens as a SQLite database with matching row counts.
    let snapshot_pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite://{}", path.display()))
        .await
        .expect("backup opens as a database");
    let vendors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vendors")
        .fetch_one(&snapshot_pool)
        .await
        .unwrap();
    assert_eq!(vendors, 3);
    snapshot_pool.close().await;

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn repeated_backups_respect_retention() {
    let app = common::setup().await;
    let dir = backup_dir("retention");

    let mut paths = Vec::new();
    for _ in 0..4 {
        paths.push(backup::run_backup(&app.state.store, &dir, 2).await.unwrap());
    }
    // All four ran (same-second runs get numeric suffixes), but only the
    // newest two remain on disk.
    let remaining: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with("zrp-backup-"))
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(remaining.len(), 2);
    assert!(paths[3].exists(), "newest backup kept");

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn audit_retention_deletes_only_old_rows() {
    let app = common::setup().await;
    let event = AuditEvent {
        user_id: None,
        username: "system".to_string(),
        action: AuditAction::Create,
        module: "vendor".to_string(),
        record_id: "V-new".to_string(),
        summary: "fresh row".to_string(),
        before_value: None,
        after_value: None,
        ip_address: None,
        user_agent: None,
    };
    app.state.audit.record(&event).await.unwrap();

    sqlx::query(
        "INSERT INTO audit_log (username, action, module, record_id, created_at)
            VALUES ('system', 'CREATE', 'vendor', 'V-old', ?)",
    )
    .bind(Utc::now() - Duration::days(400))
    .execute(app.state.store.pool())
    .await
    .unwrap();

    let removed = app.state.audit.delete_older_than(365).await.unwrap();
    assert_eq!(removed, 1);

    let remaining: Vec<(String,)> =
        sqlx::query_as("SELECT record_id FROM audit_log WHERE module = 'vendor'")
            .fetch_all(app.state.store.pool())
            .await
            .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].0, "V-new");
}

#[tokio::test]
async fn email_drain_is_a_noop_while_disabled() {
    let app = common::setup().await;
    app.state
        .notifications
        .enqueue(None, "eco_approved", "ECO approved", "ECO-1 was approved")
        .await
        .unwrap();

    let sent = app.state.notifications.drain_email_queue().await.unwrap();
    assert_eq!(sent, 0);

    let unemailed: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notification_queue WHERE emailed = 0")
            .fetch_one(app.state.store.pool())
            .await
            .unwrap();
    assert_eq!(unemailed, 1, "queue is untouched while smtp is disabled");
}

#[tokio::test]
async fn email_config_is_a_singleton() {
    let app = common::setup().await;
    let mut config = app.state.notifications.email_config().await.unwrap();
    assert_eq!(config.id, 1);
    assert!(!config.enabled);

    config.smtp_host = "smtp.example.com".to_string();
    config.from_address = "zrp@example.com".to_string();
    config.enabled = true;
    app.state
        .notifications
        .update_email_config(&config)
        .await
        .unwrap();

    let reloaded = app.state.notifications.email_config().await.unwrap();
    assert!(reloaded.enabled);
    assert_eq!(reloaded.smtp_host, "smtp.example.com");

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM email_config")
        .fetch_one(app.state.store.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn scheduler_starts_and_shuts_down_cleanly() {
    let app = common::setup().await;
    let handle = app.state.scheduler().start();
    // Give the interval tasks their immediate first tick.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn gc_tasks_are_idempotent() {
    let app = common::setup().await;
    assert_eq!(app.state.auth.delete_expired_sessions().await.unwrap(), 0);
    assert_eq!(app.state.undo.delete_expired().await.unwrap(), 0);
    assert_eq!(app.state.auth.delete_expired_sessions().await.unwrap(), 0);
}
