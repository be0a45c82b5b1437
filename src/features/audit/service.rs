use crate::error::AppError;
use crate::features::audit::models::{AuditEntry, AuditEvent};
use crate::store::Store;
use chrono::{Duration, Utc};

#[derive(Clone)]
pub struct AuditService {
    store: Store,
}

impl AuditService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn record(&self, event: &AuditEvent) -> Result<(), AppError> {
        self.insert("audit_log", event).await
    }

    /// Audit rows describe what happened; they never gate it. Failures are
    /// logged and swallowed.
    pub async fn record_best_effort(&self, event: &AuditEvent) {
        if let Err(e) = self.record(event).await {
            tracing::warn!(
                error = %e,
                module = %event.module,
                action = %event.action.as_str(),
                "failed to write audit entry"
            );
        }
    }

    pub async fn record_change_best_effort(&self, event: &AuditEvent) {
        if let Err(e) = self.insert("change_history", event).await {
            tracing::warn!(
                error = %e,
                module = %event.module,
                record_id = %event.record_id,
                "failed to write change history entry"
            );
        }
    }

    async fn insert(&self, table: &'static str, event: &AuditEvent) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO {table}
                (user_id, username, action, module, record_id, summary,
                 before_value, after_value, ip_address, user_agent, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let before = event
            .before_value
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_default());
        let after = event
            .after_value
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_default());

        self.store
            .exec(&sql, "audit::insert", || {
                sqlx::query(&sql)
                    .bind(event.user_id)
                    .bind(&event.username)
                    .bind(event.action.as_str())
                    .bind(&event.module)
                    .bind(&event.record_id)
                    .bind(&event.summary)
                    .bind(&before)
                    .bind(&after)
                    .bind(&event.ip_address)
                    .bind(&event.user_agent)
                    .bind(Utc::now())
                    .execute(self.store.pool())
            })
            .await?;
        Ok(())
    }

    pub async fn list(
        &self,
        module: Option<&str>,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<AuditEntry>, i64), AppError> {
        let offset = (page - 1) * page_size;
        let (rows, total) = match module {
            Some(module) => {
                let rows: Vec<AuditEntry> = sqlx::query_as(
                    "SELECT * FROM audit_log WHERE module = ?
                        ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
                )
                .bind(module)
                .bind(page_size)
                .bind(offset)
                .fetch_all(self.store.pool())
                .await?;
                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE module = ?")
                        .bind(module)
                        .fetch_one(self.store.pool())
                        .await?;
                (rows, total)
            }
            None => {
                let rows: Vec<AuditEntry> = sqlx::query_as(
                    "SELECT * FROM audit_log ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
                )
                .bind(page_size)
                .bind(offset)
                .fetch_all(self.store.pool())
                .await?;
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
                    .fetch_one(self.store.pool())
                    .await?;
                (rows, total)
            }
        };
        Ok((rows, total))
    }

    pub async fn change_history(
        &self,
        module: &str,
        record_id: &str,
    ) -> Result<Vec<AuditEntry>, AppError> {
        let rows = sqlx::query_as(
            "SELECT * FROM change_history WHERE module = ? AND record_id = ?
                ORDER BY created_at DESC, id DESC LIMIT 200",
        )
        .bind(module)
        .bind(record_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows)
    }

    /// Retention sweep for both audit tables.
    pub async fn delete_older_than(&self, days: i64) -> Result<u64, AppError> {
        let cutoff = Utc::now() - Duration::days(days);
        let audit = self
            .store
            .exec("DELETE FROM audit_log", "audit::retention", || {
                sqlx::query("DELETE FROM audit_log WHERE created_at < ?")
                    .bind(cutoff)
                    .execute(self.store.pool())
            })
            .await?;
        let changes = self
            .store
            .exec("DELETE FROM change_history", "audit::retention", || {
                sqlx::query("DELETE FROM change_history WHERE created_at < ?")
                    .bind(cutoff)
                    .execute(self.store.pool())
            })
            .await?;
        Ok(audit.rows_affected() + changes.rows_affected())
    }
}
