use crate::error::AppError;
use crate::features::audit::models::{AuditAction, AuditEvent};
use crate::features::audit::{AuditService, MutationCtx};
use crate::features::entities::{self, EntityKind};
use crate::features::realtime::models::Event;
use crate::features::realtime::Hub;
use crate::features::undo::models::{UndoAction, UndoEntry};
use crate::store::Store;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct UndoService {
    store: Store,
    audit: AuditService,
    hub: Arc<Hub>,
}

impl UndoService {
    pub fn new(store: Store, audit: AuditService, hub: Arc<Hub>) -> Self {
        Self { store, audit, hub }
    }

    /// Unexpired entries belonging to the user, newest first.
    pub async fn list(&self, user_id: i64) -> Result<Vec<UndoEntry>, AppError> {
        let rows = self
            .store
            .profiled("SELECT FROM undo_log", "undo::list", || {
                sqlx::query_as(
                    "SELECT * FROM undo_log WHERE user_id = ? AND expires_at > ?
                        ORDER BY created_at DESC, id DESC",
                )
                .bind(user_id)
                .bind(Utc::now())
                .fetch_all(self.store.pool())
            })
            .await?;
        Ok(rows)
    }

    /// Apply an undo entry: restore the snapshot, consume the entry, audit
    /// and broadcast. Restores and the entry delete share one transaction;
    /// a restore conflict leaves the entry in place for manual resolution.
    pub async fn perform(&self, id: i64, ctx: &MutationCtx) -> Result<UndoEntry, AppError> {
        let user_id = ctx.user_id.ok_or(AppError::Unauthenticated)?;
        let mut tx = self.store.begin().await?;

        let entry: Option<UndoEntry> = sqlx::query_as(
            "SELECT * FROM undo_log WHERE id = ? AND user_id = ? AND expires_at > ?",
        )
        .bind(id)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await?;
        let entry = entry.ok_or(AppError::NotFound)?;

        let kind = EntityKind::parse(&entry.entity_type)
            .ok_or_else(|| AppError::Internal(format!("unknown entity type {}", entry.entity_type)))?;
        let action = UndoAction::parse(&entry.action)
            .ok_or_else(|| AppError::Internal(format!("unknown undo action {}", entry.action)))?;
        let snapshot: Value = serde_json::from_str(&entry.previous_data)
            .map_err(|e| AppError::Internal(format!("corrupt undo snapshot: {e}")))?;

        match action {
            UndoAction::Delete => {
                entities::restore_insert(&mut tx, kind, &snapshot)
                    .await
                    .map_err(conflict_on_existing_key)?;
            }
            UndoAction::Update => {
                entities::restore_replace(&mut tx, kind, &snapshot).await?;
            }
            UndoAction::BulkDelete => {
                let rows = snapshot.as_array().ok_or_else(|| {
                    AppError::Internal("bulk undo snapshot is not an array".to_string())
                })?;
                for row in rows {
                    entities::restore_insert(&mut tx, kind, row)
                        .await
                        .map_err(conflict_on_existing_key)?;
                }
            }
        }

        sqlx::query("DELETE FROM undo_log WHERE id = ?")
            .bind(entry.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        // Undo does not chain: this emit records the restore but never
        // writes a new undo entry.
        let event = AuditEvent {
            user_id: ctx.user_id,
            username: ctx.username.clone(),
            action: AuditAction::Undo,
            module: kind.module().to_string(),
            record_id: entry.entity_id.clone(),
            summary: format!("undid {} of {} {}", entry.action, kind.module(), entry.entity_id),
            before_value: None,
            after_value: Some(snapshot.clone()),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        };
        self.audit.record_best_effort(&event).await;
        self.audit.record_change_best_effort(&event).await;

        if kind.broadcasts() {
            let mut broadcast = Event::new(
                format!("{}_undo", kind.module()),
                entry.entity_id.clone(),
                "undo".to_string(),
            );
            broadcast.user_id = ctx.user_id;
            broadcast.user = Some(ctx.username.clone());
            broadcast.data = Some(snapshot);
            self.hub.broadcast(broadcast).await;
        }

        Ok(entry)
    }

    pub async fn delete_expired(&self) -> Result<u64, AppError> {
        let result = self
            .store
            .exec("DELETE FROM undo_log", "undo::gc", || {
                sqlx::query("DELETE FROM undo_log WHERE expires_at < ?")
                    .bind(Utc::now())
                    .execute(self.store.pool())
            })
            .await?;
        Ok(result.rows_affected())
    }
}

/// A primary-key collision during restore means something re-used the id
/// after the delete; surface it as a conflict the client can act on.
fn conflict_on_existing_key(err: AppError) -> AppError {
    match err {
        AppError::Database(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            AppError::conflict("a record with this id was created after the deletion")
        }
        other => other,
    }
}
