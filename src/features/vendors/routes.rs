use crate::error::AppError;
use crate::features::audit::MutationCtx;
use crate::features::auth::models::Principal;
use crate::features::vendors::models::{
    BulkDeleteRequest, BulkDeleteResponse, CreateVendor, DeleteResponse, UpdateVendor, Vendor,
};
use crate::middleware::request_info::RequestInfo;
use crate::response::{self, ApiData, ApiPage};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct VendorListQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

fn mutation_ctx(principal: &Principal, info: &RequestInfo) -> MutationCtx {
    MutationCtx::from_principal(principal, Some(info.ip.clone()), info.user_agent.clone())
}

pub async fn list_vendors(
    State(state): State<AppState>,
    Query(query): Query<VendorListQuery>,
) -> Result<Json<ApiPage<Vendor>>, AppError> {
    let (page, page_size) = response::clamp_paging(query.page, query.page_size);
    let (vendors, total) = state
        .vendors
        .list(query.search.as_deref(), page, page_size)
        .await?;
    Ok(response::page(vendors, total, page, page_size))
}

pub async fn get_vendor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiData<Vendor>>, AppError> {
    Ok(response::data(state.vendors.get(&id).await?))
}

pub async fn create_vendor(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(info): Extension<RequestInfo>,
    Json(request): Json<CreateVendor>,
) -> Result<(StatusCode, Json<ApiData<Vendor>>), AppError> {
    request
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;
    let ctx = mutation_ctx(&principal, &info);
    let vendor = state.vendors.create(&ctx, request).await?;
    Ok((StatusCode::CREATED, response::data(vendor)))
}

pub async fn update_vendor(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(info): Extension<RequestInfo>,
    Path(id): Path<String>,
    Json(request): Json<UpdateVendor>,
) -> Result<Json<ApiData<Vendor>>, AppError> {
    request
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;
    let ctx = mutation_ctx(&principal, &info);
    let (vendor, _undo_id) = state.vendors.update(&ctx, &id, request).await?;
    Ok(response::data(vendor))
}

pub async fn delete_vendor(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(info): Extension<RequestInfo>,
    Path(id): Path<String>,
) -> Result<Json<ApiData<DeleteResponse>>, AppError> {
    let ctx = mutation_ctx(&principal, &info);
    let undo_id = state.vendors.delete(&ctx, &id).await?;
    Ok(response::data(DeleteResponse {
        deleted: id,
        undo_id,
    }))
}

pub async fn bulk_delete_vendors(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(info): Extension<RequestInfo>,
    Json(request): Json<BulkDeleteRequest>,
) -> Result<Json<ApiData<BulkDeleteResponse>>, AppError> {
    let ctx = mutation_ctx(&principal, &info);
    let undo_id = state.vendors.bulk_delete(&ctx, request.ids.clone()).await?;
    Ok(response::data(BulkDeleteResponse {
        deleted: request.ids,
        undo_id,
    }))
}
