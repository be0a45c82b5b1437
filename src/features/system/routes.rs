use crate::error::AppError;
use crate::features::auth::models::{Principal, Role};
use crate::features::auth::permissions::RolePermission;
use crate::features::notifications::models::EmailConfig;
use crate::response::{self, ApiData};
use crate::store::ProfilerSnapshot;
use crate::AppState;
use axum::extract::State;
use axum::{Extension, Json};

fn require_admin(principal: &Principal) -> Result<(), AppError> {
    match principal.user() {
        Some(user) if user.role == Role::Admin => Ok(()),
        Some(_) => Err(AppError::forbidden("administrator role required")),
        None => Err(AppError::Unauthenticated),
    }
}

pub async fn profiler_snapshot(
    State(state): State<AppState>,
) -> Json<ApiData<ProfilerSnapshot>> {
    response::data(state.store.profiler_snapshot())
}

pub async fn list_permissions(
    State(state): State<AppState>,
) -> Result<Json<ApiData<Vec<RolePermission>>>, AppError> {
    Ok(response::data(state.permissions.list().await?))
}

/// Writes to the permission surface re-check the admin role in the handler
/// itself; the RBAC layer alone is not trusted for this route.
pub async fn upsert_permission(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(permission): Json<RolePermission>,
) -> Result<Json<ApiData<RolePermission>>, AppError> {
    require_admin(&principal)?;
    state.permissions.upsert(&permission).await?;
    Ok(response::data(permission))
}

pub async fn get_email_config(
    State(state): State<AppState>,
) -> Result<Json<ApiData<EmailConfig>>, AppError> {
    Ok(response::data(state.notifications.email_config().await?))
}

pub async fn update_email_config(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(config): Json<EmailConfig>,
) -> Result<Json<ApiData<serde_json::Value>>, AppError> {
    require_admin(&principal)?;
    state.notifications.update_email_config(&config).await?;
    Ok(response::data(serde_json::json!({ "updated": true })))
}
