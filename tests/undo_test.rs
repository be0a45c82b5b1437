mod common;

use chrono::{Duration, Utc};
use serde_json::Value;
use zrp_backend::error::AppError;
use zrp_backend::features::audit::MutationCtx;
use zrp_backend::features::vendors::models::{CreateVendor, UpdateVendor};

fn ctx(user_id: i64) -> MutationCtx {
    MutationCtx {
        user_id: Some(user_id),
        username: "admin".to_string(),
        ip_address: None,
        user_agent: None,
    }
}

fn new_vendor(id: &str, name: &str) -> CreateVendor {
    CreateVendor {
        id: id.to_string(),
        name: name.to_string(),
        contact_name: Some("Pat".to_string()),
        email: None,
        phone: None,
        address: Some("1 Main St".to_string()),
        notes: None,
    }
}

async fn snapshot_of(app: &common::TestApp, id: &str) -> Option<Value> {
    let raw: Option<String> = sqlx::query_scalar(
        "SELECT json_object('address', address, 'contact_name', contact_name,
            'created_at', created_at, 'email', email, 'id', id, 'name', name,
            'notes', notes, 'phone', phone, 'updated_at', updated_at)
            FROM vendors WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(app.state.store.pool())
    .await
    .unwrap();
    raw.map(|s| serde_json::from_str(&s).unwrap())
}

#[tokio::test]
async fn undo_of_a_delete_restores_the_exact_row() {
    let app = common::setup().await;
    app.state
        .vendors
        .create(&ctx(1), new_vendor("V-042", "Acme"))
        .await
        .unwrap();
    let before = snapshot_of(&app, "V-042").await.unwrap();

    let undo_id = app
        .state
        .vendors
        .delete(&ctx(1), "V-042")
        .await
        .unwrap()
        .expect("delete returns an undo id");

    let listed = app.state.undo.list(1).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, undo_id);
    assert_eq!(listed[0].entity_type, "vendor");

    app.state.undo.perform(undo_id, &ctx(1)).await.unwrap();

    let restored = snapshot_of(&app, "V-042").await.expect("row restored");
    assert_eq!(
        serde_json::to_string(&restored).unwrap(),
        serde_json::to_string(&before).unwrap(),
        "canonical JSON of the restored row matches the pre-delete snapshot"
    );

    // Consumed: a second invocation is a 404.
    assert!(matches!(
        app.state.undo.perform(undo_id, &ctx(1)).await,
        Err(AppError::NotFound)
    ));
}

#[tokio::test]
async fn undo_of_an_update_rolls_the_row_back() {
    let app = common::setup().await;
    app.state
        .vendors
        .create(&ctx(1), new_vendor("V-1", "Before"))
        .await
        .unwrap();
    let original = snapshot_of(&app, "V-1").await.unwrap();

    let (_, undo_id) = app
        .state
        .vendors
        .update(
            &ctx(1),
            "V-1",
            UpdateVendor {
                name: Some("After".to_string()),
                contact_name: None,
                email: None,
                phone: None,
                address: None,
                notes: None,
            },
        )
        .await
        .unwrap();

    app.state
        .undo
        .perform(undo_id.unwrap(), &ctx(1))
        .await
        .unwrap();

    let rolled_back = snapshot_of(&app, "V-1").await.unwrap();
    assert_eq!(rolled_back["name"], original["name"]);
}

#[tokio::test]
async fn expired_entries_are_invisible_and_unusable() {
    let app = common::setup().await;
    app.state
        .vendors
        .create(&ctx(1), new_vendor("V-2", "Gone"))
        .await
        .unwrap();
    let undo_id = app
        .state
        .vendors
        .delete(&ctx(1), "V-2")
        .await
        .unwrap()
        .unwrap();

    sqlx::query("UPDATE undo_log SET expires_at = ? WHERE id = ?")
        .bind(Utc::now() - Duration::hours(1))
        .bind(undo_id)
        .execute(app.state.store.pool())
        .await
        .unwrap();

    assert!(app.state.undo.list(1).await.unwrap().is_empty());
    assert!(matches!(
        app.state.undo.perform(undo_id, &ctx(1)).await,
        Err(AppError::NotFound)
    ));

    let removed = app.state.undo.delete_expired().await.unwrap();
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn another_users_entry_is_not_visible() {
    let app = common::setup().await;
    app.state
        .vendors
        .create(&ctx(1), new_vendor("V-3", "Mine"))
        .await
        .unwrap();
    let undo_id = app
        .state
        .vendors
        .delete(&ctx(1), "V-3")
        .await
        .unwrap()
        .unwrap();

    assert!(app.state.undo.list(2).await.unwrap().is_empty());
    assert!(matches!(
        app.state.undo.perform(undo_id, &ctx(2)).await,
        Err(AppError::NotFound)
    ));
}

#[tokio::test]
async fn restore_conflict_keeps_the_entry_for_manual_resolution() {
    let app = common::setup().await;
    app.state
        .vendors
        .create(&ctx(1), new_vendor("V-4", "Original"))
        .await
        .unwrap();
    let undo_id = app
        .state
        .vendors
        .delete(&ctx(1), "V-4")
        .await
        .unwrap()
        .unwrap();

    // Someone re-uses the id before the undo.
    app.state
        .vendors
        .create(&ctx(1), new_vendor("V-4", "Usurper"))
        .await
        .unwrap();

    let err = app.state.undo.perform(undo_id, &ctx(1)).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // The entry survives for manual resolution and the usurper is intact.
    assert_eq!(app.state.undo.list(1).await.unwrap().len(), 1);
    let current = snapshot_of(&app, "V-4").await.unwrap();
    assert_eq!(current["name"], "Usurper");
}

#[tokio::test]
async fn bulk_delete_undo_is_atomic() {
    let app = common::setup().await;
    for (id, name) in [("V-5", "Five"), ("V-6", "Six"), ("V-7", "Seven")] {
        app.state
            .vendors
            .create(&ctx(1), new_vendor(id, name))
            .await
            .unwrap();
    }

    let undo_id = app
        .state
        .vendors
        .bulk_delete(
            &ctx(1),
            vec!["V-5".to_string(), "V-6".to_string(), "V-7".to_string()],
        )
        .await
        .unwrap()
        .unwrap();
    for id in ["V-5", "V-6", "V-7"] {
        assert!(snapshot_of(&app, id).await.is_none());
    }

    app.state.undo.perform(undo_id, &ctx(1)).await.unwrap();
    for id in ["V-5", "V-6", "V-7"] {
        assert!(snapshot_of(&app, id).await.is_some(), "{id} restored");
    }
}

#[tokio::test]
async fn bulk_undo_conflict_rolls_the_whole_restore_back() {
    let app = common::setup().await;
    for (id, name) in [("V-8", "Eight"), ("V-9", "Nine")] {
        app.state
            .vendors
            .create(&ctx(1), new_vendor(id, name))
            .await
            .unwrap();
    }
    let undo_id = app
        .state
        .vendors
        .bulk_delete(&ctx(1), vec!["V-8".to_string(), "V-9".to_string()])
        .await
        .unwrap()
        .unwrap();

    // One of the two ids is taken again; the whole undo must fail.
    app.state
        .vendors
        .create(&ctx(1), new_vendor("V-9", "Taken"))
        .await
        .unwrap();

    let err = app.state.undo.perform(undo_id, &ctx(1)).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(
        snapshot_of(&app, "V-8").await.is_none(),
        "partial restore rolled back"
    );
}

#[tokio::test]
async fn undo_does_not_chain() {
    let app = common::setup().await;
    app.state
        .vendors
        .create(&ctx(1), new_vendor("V-10", "Once"))
        .await
        .unwrap();
    let undo_id = app
        .state
        .vendors
        .delete(&ctx(1), "V-10")
        .await
        .unwrap()
        .unwrap();

    app.state.undo.perform(undo_id, &ctx(1)).await.unwrap();

    assert!(
        app.state.undo.list(1).await.unwrap().is_empty(),
        "applying an undo must not create a new undo entry"
    );

    let undos: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_log WHERE module = 'vendor' AND action = 'UNDO'",
    )
    .fetch_one(app.state.store.pool())
    .await
    .unwrap();
    assert_eq!(undos, 1, "the undo itself is audited");
}
