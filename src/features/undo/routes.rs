use crate::error::AppError;
use crate::features::audit::MutationCtx;
use crate::features::auth::models::Principal;
use crate::features::undo::models::UndoEntry;
use crate::middleware::request_info::RequestInfo;
use crate::response::{self, ApiData};
use crate::AppState;
use axum::extract::{Path, State};
use axum::{Extension, Json};

pub async fn list_undo(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ApiData<Vec<UndoEntry>>>, AppError> {
    let user = principal.user().ok_or(AppError::Unauthenticated)?;
    let entries = state.undo.list(user.id).await?;
    Ok(response::data(entries))
}

pub async fn perform_undo(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(info): Extension<RequestInfo>,
    Path(id): Path<i64>,
) -> Result<Json<ApiData<UndoEntry>>, AppError> {
    let ctx = MutationCtx::from_principal(&principal, Some(info.ip), info.user_agent);
    let entry = state.undo.perform(id, &ctx).await?;
    Ok(response::data(entry))
}
