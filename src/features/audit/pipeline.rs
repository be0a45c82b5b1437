use crate::error::AppError;
use crate::features::audit::models::{AuditAction, AuditEvent};
use crate::features::audit::AuditService;
use crate::features::auth::models::Principal;
use crate::features::entities::{self, EntityKind};
use crate::features::realtime::models::Event;
use crate::features::realtime::Hub;
use crate::features::undo::models::UndoAction;
use crate::store::Store;
use chrono::{Duration, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::{Sqlite, Transaction};
use std::sync::Arc;

/// Request-scoped actor context threaded into every mutation.
#[derive(Debug, Clone, Default)]
pub struct MutationCtx {
    pub user_id: Option<i64>,
    pub username: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl MutationCtx {
    pub fn from_principal(
        principal: &Principal,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            user_id: principal.user().map(|u| u.id),
            username: principal.username().to_string(),
            ip_address,
            user_agent,
        }
    }
}

#[derive(Debug)]
pub struct MutationOutcome {
    pub undo_id: Option<i64>,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// The one path every entity mutation takes: snapshot, mutate, snapshot,
/// commit, then audit + change history + broadcast. Audit and broadcast are
/// best-effort; a failed mutation produces neither.
#[derive(Clone)]
pub struct ChangePipeline {
    store: Store,
    audit: AuditService,
    hub: Arc<Hub>,
}

impl ChangePipeline {
    pub fn new(store: Store, audit: AuditService, hub: Arc<Hub>) -> Self {
        Self { store, audit, hub }
    }

    pub async fn mutate<F>(
        &self,
        ctx: &MutationCtx,
        kind: EntityKind,
        id: &str,
        action: AuditAction,
        summary: String,
        undo: Option<UndoAction>,
        op: F,
    ) -> Result<MutationOutcome, AppError>
    where
        F: for<'t> FnOnce(
            &'t mut Transaction<'static, Sqlite>,
        ) -> BoxFuture<'t, Result<(), AppError>>,
    {
        let mut tx = self.store.begin().await?;
        let before = entities::snapshot(&mut tx, kind, id).await?;

        op(&mut tx).await?;

        let after = entities::snapshot(&mut tx, kind, id).await?;

        let undo_id = match undo {
            Some(undo_action) => {
                let snapshot = before.as_ref().ok_or_else(|| {
                    AppError::Internal("undo requested without a prior state".to_string())
                })?;
                Some(record_undo(&mut tx, ctx, undo_action, kind, id, snapshot).await?)
            }
            None => None,
        };

        tx.commit().await?;

        self.emit(ctx, kind, id, &action, summary, before.clone(), after.clone())
            .await;

        Ok(MutationOutcome {
            undo_id,
            before,
            after,
        })
    }

    /// Bulk delete: one transaction, one undo entry covering every row.
    /// Partial failure rolls the whole batch back.
    pub async fn mutate_bulk<F>(
        &self,
        ctx: &MutationCtx,
        kind: EntityKind,
        ids: &[String],
        summary: String,
        op: F,
    ) -> Result<MutationOutcome, AppError>
    where
        F: for<'t> FnOnce(
            &'t mut Transaction<'static, Sqlite>,
        ) -> BoxFuture<'t, Result<(), AppError>>,
    {
        let mut tx = self.store.begin().await?;

        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(snapshot) = entities::snapshot(&mut tx, kind, id).await? {
                snapshots.push(snapshot);
            }
        }
        if snapshots.is_empty() {
            return Err(AppError::NotFound);
        }

        op(&mut tx).await?;

        let previous = Value::Array(snapshots);
        let now = Utc::now();
        let inserted = sqlx::query(
            "INSERT INTO undo_log
                (user_id, action, entity_type, entity_id, previous_data, created_at, expires_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ctx.user_id.unwrap_or(0))
        .bind(UndoAction::BulkDelete.as_str())
        .bind(kind.module())
        .bind(ids.join(","))
        .bind(previous.to_string())
        .bind(now)
        .bind(now + Duration::hours(24))
        .execute(&mut *tx)
        .await?;
        let undo_id = inserted.last_insert_rowid();

        tx.commit().await?;

        let event = AuditEvent {
            user_id: ctx.user_id,
            username: ctx.username.clone(),
            action: AuditAction::Delete,
            module: kind.module().to_string(),
            record_id: ids.join(","),
            summary,
            before_value: Some(previous.clone()),
            after_value: None,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        };
        self.audit.record_best_effort(&event).await;
        // Change history stays per-record so each entity's UI log sees it.
        if let Value::Array(rows) = &previous {
            for row in rows {
                let record_id = row
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut entry = event.clone();
                entry.record_id = record_id;
                entry.before_value = Some(row.clone());
                self.audit.record_change_best_effort(&entry).await;
            }
        }

        if kind.broadcasts() {
            let mut broadcast = Event::new(
                format!("{}_{}", kind.module(), AuditAction::Delete.event_suffix()),
                ids.join(","),
                AuditAction::Delete.event_suffix(),
            );
            broadcast.user_id = ctx.user_id;
            broadcast.user = Some(ctx.username.clone());
            broadcast.data = Some(serde_json::json!({ "ids": ids }));
            self.hub.broadcast(broadcast).await;
        }

        Ok(MutationOutcome {
            undo_id: Some(undo_id),
            before: Some(previous),
            after: None,
        })
    }

    async fn emit(
        &self,
        ctx: &MutationCtx,
        kind: EntityKind,
        id: &str,
        action: &AuditAction,
        summary: String,
        before: Option<Value>,
        after: Option<Value>,
    ) {
        let event = AuditEvent {
            user_id: ctx.user_id,
            username: ctx.username.clone(),
            action: action.clone(),
            module: kind.module().to_string(),
            record_id: id.to_string(),
            summary,
            before_value: before,
            after_value: after.clone(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        };
        self.audit.record_best_effort(&event).await;
        self.audit.record_change_best_effort(&event).await;

        if kind.broadcasts() {
            self.hub
                .broadcast(Event::entity(kind, id, action, ctx, after))
                .await;
        }
    }
}

async fn record_undo(
    tx: &mut Transaction<'static, Sqlite>,
    ctx: &MutationCtx,
    action: UndoAction,
    kind: EntityKind,
    entity_id: &str,
    previous_data: &Value,
) -> Result<i64, AppError> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO undo_log
            (user_id, action, entity_type, entity_id, previous_data, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(ctx.user_id.unwrap_or(0))
    .bind(action.as_str())
    .bind(kind.module())
    .bind(entity_id)
    .bind(previous_data.to_string())
    .bind(now)
    .bind(now + Duration::hours(24))
    .execute(&mut **tx)
    .await?;
    Ok(result.last_insert_rowid())
}
