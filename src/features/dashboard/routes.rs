use crate::error::AppError;
use crate::features::dashboard::service::DashboardStats;
use crate::response::{self, ApiData};
use crate::AppState;
use axum::extract::State;
use axum::Json;

pub async fn dashboard(
    State(state): State<AppState>,
) -> Result<Json<ApiData<DashboardStats>>, AppError> {
    Ok(response::data(state.dashboard.stats().await?))
}
