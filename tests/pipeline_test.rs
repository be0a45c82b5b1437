mod common;

use serde_json::Value;
use tokio::sync::mpsc;
use zrp_backend::error::AppError;
use zrp_backend::features::audit::MutationCtx;
use zrp_backend::features::vendors::models::{CreateVendor, UpdateVendor};

fn ctx(user_id: i64, username: &str) -> MutationCtx {
    MutationCtx {
        user_id: Some(user_id),
        username: username.to_string(),
        ip_address: Some("203.0.113.7".to_string()),
        user_agent: Some("tests".to_string()),
    }
}

fn new_vendor(id: &str, name: &str) -> CreateVendor {
    CreateVendor {
        id: id.to_string(),
        name: name.to_string(),
        contact_name: None,
        email: None,
        phone: None,
        address: None,
        notes: None,
    }
}

async fn next_event(rx: &mut mpsc::Receiver<String>) -> Value {
    let frame = rx.recv().await.expect("expected a broadcast frame");
    serde_json::from_str(&frame).unwrap()
}

#[tokio::test]
async fn create_produces_one_audit_row_and_one_broadcast() {
    let app = common::setup().await;
    let (_conn, mut rx) = app.state.hub.register(7, "admin".to_string()).await;

    app.state
        .vendors
        .create(&ctx(7, "admin"), new_vendor("V-042", "Acme"))
        .await
        .unwrap();

    let rows: Vec<(String, String, String, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT action, module, record_id, before_value, after_value
            FROM audit_log WHERE module = 'vendor'",
    )
    .fetch_all(app.state.store.pool())
    .await
    .unwrap();
    assert_eq!(rows.len(), 1, "exactly one audit row per mutation");
    let (action, module, record_id, before, after) = &rows[0];
    assert_eq!(action, "CREATE");
    assert_eq!(module, "vendor");
    assert_eq!(record_id, "V-042");
    assert!(before.is_none());
    let after: Value = serde_json::from_str(after.as_deref().unwrap()).unwrap();
    assert_eq!(after["name"], "Acme");

    let event = next_event(&mut rx).await;
    assert_eq!(event["type"], "vendor_create");
    assert_eq!(event["id"], "V-042");
    assert_eq!(event["action"], "create");
    assert_eq!(event["user"], "admin");
    assert!(event["timestamp"].is_string());
}

#[tokio::test]
async fn update_captures_before_and_after() {
    let app = common::setup().await;
    app.state
        .vendors
        .create(&ctx(1, "admin"), new_vendor("V-1", "Initech"))
        .await
        .unwrap();

    let (vendor, undo_id) = app
        .state
        .vendors
        .update(
            &ctx(1, "admin"),
            "V-1",
            UpdateVendor {
                name: Some("Initrode".to_string()),
                contact_name: None,
                email: None,
                phone: None,
                address: None,
                notes: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(vendor.name, "Initrode");
    assert!(undo_id.is_some(), "updates are undoable");

    let (before, after): (Option<String>, Option<String>) = sqlx::query_as(
        "SELECT before_value, after_value FROM audit_log
            WHERE module = 'vendor' AND action = 'UPDATE'",
    )
    .fetch_one(app.state.store.pool())
    .await
    .unwrap();
    let before: Value = serde_json::from_str(&before.unwrap()).unwrap();
    let after: Value = serde_json::from_str(&after.unwrap()).unwrap();
    assert_eq!(before["name"], "Initech");
    assert_eq!(after["name"], "Initrode");

    // The change history carries the same mutation for the UI log.
    let changes = app.state.audit.change_history("vendor", "V-1").await.unwrap();
    assert_eq!(changes.len(), 2); // create + update
}

#[tokio::test]
async fn delete_is_one_sided_and_returns_an_undo_handle() {
    let app = common::setup().await;
    app.state
        .vendors
        .create(&ctx(1, "admin"), new_vendor("V-2", "Globex"))
        .await
        .unwrap();

    let undo_id = app
        .state
        .vendors
        .delete(&ctx(1, "admin"), "V-2")
        .await
        .unwrap();
    assert!(undo_id.is_some());

    let (before, after): (Option<String>, Option<String>) = sqlx::query_as(
        "SELECT before_value, after_value FROM audit_log
            WHERE module = 'vendor' AND action = 'DELETE'",
    )
    .fetch_one(app.state.store.pool())
    .await
    .unwrap();
    assert!(before.is_some());
    assert!(after.is_none());

    assert!(matches!(
        app.state.vendors.get("V-2").await,
        Err(AppError::NotFound)
    ));
}

#[tokio::test]
async fn failed_mutation_emits_nothing() {
    let app = common::setup().await;
    let (_conn, mut rx) = app.state.hub.register(1, "admin".to_string()).await;

    app.state
        .vendors
        .create(&ctx(1, "admin"), new_vendor("V-3", "First"))
        .await
        .unwrap();
    let _create_event = next_event(&mut rx).await;

    // Duplicate id: the insert fails, so no audit row and no frame.
    let err = app
        .state
        .vendors
        .create(&ctx(1, "admin"), new_vendor("V-3", "Second"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);

    let audits: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_log WHERE module = 'vendor' AND action = 'CREATE'",
    )
    .fetch_one(app.state.store.pool())
    .await
    .unwrap();
    assert_eq!(audits, 1);

    assert!(
        rx.try_recv().is_err(),
        "no broadcast for a failed mutation"
    );
}

#[tokio::test]
async fn snapshots_serialise_with_sorted_keys() {
    let app = common::setup().await;
    app.state
        .vendors
        .create(&ctx(1, "admin"), new_vendor("V-4", "Sorted"))
        .await
        .unwrap();
    let (after,): (Option<String>,) = sqlx::query_as(
        "SELECT after_value FROM audit_log WHERE module = 'vendor' AND record_id = 'V-4'",
    )
    .fetch_one(app.state.store.pool())
    .await
    .unwrap();
    let value: Value = serde_json::from_str(&after.unwrap()).unwrap();
    let keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    assert_eq!(keys, sorted);

    // Canonical form is stable across repeated serialisation.
    assert_eq!(
        serde_json::to_string(&value).unwrap(),
        serde_json::to_string(&value).unwrap()
    );
}
