use crate::error::AppError;
use crate::features::audit::models::AuditAction;
use crate::features::audit::{ChangePipeline, MutationCtx};
use crate::features::entities::EntityKind;
use crate::features::undo::models::UndoAction;
use crate::features::vendors::models::{CreateVendor, UpdateVendor, Vendor};
use crate::store::Store;
use chrono::Utc;

#[derive(Clone)]
pub struct VendorService {
    store: Store,
    pipeline: ChangePipeline,
}

impl VendorService {
    pub fn new(store: Store, pipeline: ChangePipeline) -> Self {
        Self { store, pipeline }
    }

    pub async fn list(
        &self,
        search: Option<&str>,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Vendor>, i64), AppError> {
        let offset = (page - 1) * page_size;
        let pattern = search.map(|s| format!("%{s}%"));
        let (rows, total) = match &pattern {
            Some(pattern) => {
                let rows: Vec<Vendor> = sqlx::query_as(
                    "SELECT * FROM vendors WHERE name LIKE ? OR id LIKE ?
                        ORDER BY name LIMIT ? OFFSET ?",
                )
                .bind(pattern)
                .bind(pattern)
                .bind(page_size)
                .bind(offset)
                .fetch_all(self.store.pool())
                .await?;
                let total: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM vendors WHERE name LIKE ? OR id LIKE ?",
                )
                .bind(pattern)
                .bind(pattern)
                .fetch_one(self.store.pool())
                .await?;
                (rows, total)
            }
            None => {
                let rows: Vec<Vendor> =
                    sqlx::query_as("SELECT * FROM vendors ORDER BY name LIMIT ? OFFSET ?")
                        .bind(page_size)
                        .bind(offset)
                        .fetch_all(self.store.pool())
                        .await?;
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vendors")
                    .fetch_one(self.store.pool())
                    .await?;
                (rows, total)
            }
        };
        Ok((rows, total))
    }

    pub async fn get(&self, id: &str) -> Result<Vendor, AppError> {
        let vendor: Option<Vendor> = sqlx::query_as("SELECT * FROM vendors WHERE id = ?")
            .bind(id)
            .fetch_optional(self.store.pool())
            .await?;
        vendor.ok_or(AppError::NotFound)
    }

    pub async fn create(&self, ctx: &MutationCtx, request: CreateVendor) -> Result<Vendor, AppError> {
        let id = request.id.clone();
        let summary = format!("created vendor {}", request.name);
        self.pipeline
            .mutate(
                ctx,
                EntityKind::Vendor,
                &id,
                AuditAction::Create,
                summary,
                None,
                |tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>| {
                    Box::pin(async move {
                        let now = Utc::now();
                        sqlx::query(
                            "INSERT INTO vendors
                                (id, name, contact_name, email, phone, address, notes,
                                 created_at, updated_at)
                                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        )
                        .bind(&request.id)
                        .bind(&request.name)
                        .bind(&request.contact_name)
                        .bind(&request.email)
                        .bind(&request.phone)
                        .bind(&request.address)
                        .bind(&request.notes)
                        .bind(now)
                        .bind(now)
                        .execute(&mut **tx)
                        .await?;
                        Ok(())
                    })
                },
            )
            .await?;
        self.get(&id).await
    }

    pub async fn update(
        &self,
        ctx: &MutationCtx,
        id: &str,
        request: UpdateVendor,
    ) -> Result<(Vendor, Option<i64>), AppError> {
        // 404 before the pipeline opens a transaction.
        self.get(id).await?;

        let summary = format!("updated vendor {id}");
        let id_owned = id.to_string();
        let outcome = self
            .pipeline
            .mutate(
                ctx,
                EntityKind::Vendor,
                id,
                AuditAction::Update,
                summary,
                Some(UndoAction::Update),
                |tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>| {
                    Box::pin(async move {
                        sqlx::query(
                            "UPDATE vendors SET
                                name = COALESCE(?, name),
                                contact_name = COALESCE(?, contact_name),
                                email = COALESCE(?, email),
                                phone = COALESCE(?, phone),
                                address = COALESCE(?, address),
                                notes = COALESCE(?, notes),
                                updated_at = ?
                                WHERE id = ?",
                        )
                        .bind(&request.name)
                        .bind(&request.contact_name)
                        .bind(&request.email)
                        .bind(&request.phone)
                        .bind(&request.address)
                        .bind(&request.notes)
                        .bind(Utc::now())
                        .bind(id_owned)
                        .execute(&mut **tx)
                        .await?;
                        Ok(())
                    })
                },
            )
            .await?;

        Ok((self.get(id).await?, outcome.undo_id))
    }

    pub async fn delete(&self, ctx: &MutationCtx, id: &str) -> Result<Option<i64>, AppError> {
        self.get(id).await?;

        let summary = format!("deleted vendor {id}");
        let id_owned = id.to_string();
        let outcome = self
            .pipeline
            .mutate(
                ctx,
                EntityKind::Vendor,
                id,
                AuditAction::Delete,
                summary,
                Some(UndoAction::Delete),
                |tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>| {
                    Box::pin(async move {
                        sqlx::query("DELETE FROM vendors WHERE id = ?")
                            .bind(id_owned)
                            .execute(&mut **tx)
                            .await?;
                        Ok(())
                    })
                },
            )
            .await?;
        Ok(outcome.undo_id)
    }

    pub async fn bulk_delete(
        &self,
        ctx: &MutationCtx,
        ids: Vec<String>,
    ) -> Result<Option<i64>, AppError> {
        if ids.is_empty() {
            return Err(AppError::validation("ids must not be empty"));
        }
        let summary = format!("deleted {} vendors", ids.len());
        let op_ids = ids.clone();
        let outcome = self
            .pipeline
            .mutate_bulk(ctx, EntityKind::Vendor, &ids, summary, move |tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>| {
                Box::pin(async move {
                    for id in &op_ids {
                        sqlx::query("DELETE FROM vendors WHERE id = ?")
                            .bind(id)
                            .execute(&mut **tx)
                            .await?;
                    }
                    Ok(())
                })
            })
            .await?;
        Ok(outcome.undo_id)
    }
}
