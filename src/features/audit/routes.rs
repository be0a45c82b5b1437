use crate::error::AppError;
use crate::features::audit::models::AuditEntry;
use crate::response::{self, ApiData, ApiPage};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub module: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<ApiPage<AuditEntry>>, AppError> {
    let (page, page_size) = response::clamp_paging(query.page, query.page_size);
    let (rows, total) = state
        .audit
        .list(query.module.as_deref(), page, page_size)
        .await?;
    Ok(response::page(rows, total, page, page_size))
}

pub async fn change_history(
    State(state): State<AppState>,
    Path((module, record_id)): Path<(String, String)>,
) -> Result<Json<ApiData<Vec<AuditEntry>>>, AppError> {
    let rows = state.audit.change_history(&module, &record_id).await?;
    Ok(response::data(rows))
}
