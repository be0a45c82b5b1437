use crate::error::AppError;
use crate::store::Store;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub vendors: i64,
    pub parts: i64,
    pub open_work_orders: i64,
    pub pending_ecos: i64,
    pub recent_changes: i64,
}

#[derive(Clone)]
pub struct DashboardService {
    store: Store,
}

impl DashboardService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn stats(&self) -> Result<DashboardStats, AppError> {
        let vendors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vendors")
            .fetch_one(self.store.pool())
            .await?;
        let parts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM parts")
            .fetch_one(self.store.pool())
            .await?;
        let open_work_orders: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM work_orders WHERE status != 'done'")
                .fetch_one(self.store.pool())
                .await?;
        let pending_ecos: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ecos WHERE status = 'draft'")
                .fetch_one(self.store.pool())
                .await?;
        let recent_changes: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM change_history WHERE created_at > datetime('now', '-1 day')",
        )
        .fetch_one(self.store.pool())
        .await?;

        Ok(DashboardStats {
            vendors,
            parts,
            open_work_orders,
            pending_ecos,
            recent_changes,
        })
    }
}
