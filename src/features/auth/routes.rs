use crate::error::AppError;
use crate::features::auth::models::{
    CreateUserRequest, LoginRequest, LoginResponse, Principal, PublicUser, ResetPasswordRequest,
    Role, SetActiveRequest,
};
use crate::middleware::auth::SESSION_COOKIE;
use crate::middleware::csrf::{set_csrf_cookie, CSRF_COOKIE_NAME};
use crate::middleware::request_info::RequestInfo;
use crate::response::{self, ApiData};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};
use validator::Validate;

fn session_cookie(token: String, ttl_hours: i64) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .path("/")
        .secure(cfg!(not(debug_assertions)))
        .same_site(SameSite::Lax)
        .max_age(tower_cookies::cookie::time::Duration::hours(ttl_hours))
        .build()
}

fn clear_session_cookies(cookies: &Cookies) {
    for name in [SESSION_COOKIE, CSRF_COOKIE_NAME] {
        let mut cookie = Cookie::new(name, "");
        cookie.set_path("/");
        cookie.set_max_age(tower_cookies::cookie::time::Duration::seconds(0));
        cookies.add(cookie);
    }
}

pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Extension(info): Extension<RequestInfo>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<ApiData<LoginResponse>>, AppError> {
    request
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;

    let (token, user) = state
        .auth
        .login(
            &request.username,
            &request.password,
            Some(info.ip.clone()),
            info.user_agent.clone(),
        )
        .await?;

    cookies.add(session_cookie(
        token.clone(),
        state.config.session_ttl_hours,
    ));
    set_csrf_cookie(&cookies);

    Ok(response::data(LoginResponse {
        token,
        user: PublicUser::from(&user),
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    cookies: Cookies,
    Extension(principal): Extension<Principal>,
    Extension(info): Extension<RequestInfo>,
) -> Result<Json<ApiData<serde_json::Value>>, AppError> {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        state
            .auth
            .logout(
                cookie.value(),
                principal.user(),
                Some(info.ip.clone()),
                info.user_agent.clone(),
            )
            .await?;
    }
    clear_session_cookies(&cookies);
    Ok(response::data(serde_json::json!({ "logged_out": true })))
}

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub id: i64,
    pub username: String,
    pub role: String,
}

pub async fn me(
    Extension(principal): Extension<Principal>,
) -> Result<Json<ApiData<WhoAmI>>, AppError> {
    let user = principal.user().ok_or(AppError::Unauthenticated)?;
    Ok(response::data(WhoAmI {
        id: user.id,
        username: user.username.clone(),
        role: user.role.as_str().to_string(),
    }))
}

fn require_admin(principal: &Principal) -> Result<&crate::features::auth::models::AuthUser, AppError> {
    let user = principal.user().ok_or(AppError::Unauthenticated)?;
    if user.role != Role::Admin {
        return Err(AppError::forbidden("administrator role required"));
    }
    Ok(user)
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(info): Extension<RequestInfo>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiData<PublicUser>>), AppError> {
    // The route is already RBAC-guarded; user management re-checks the
    // role itself so a misconfigured chain cannot mint accounts.
    let caller = require_admin(&principal)?;
    request
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;
    let user = state
        .auth
        .create_user(
            caller,
            request,
            Some(info.ip.clone()),
            info.user_agent.clone(),
        )
        .await?;
    Ok((StatusCode::CREATED, response::data(PublicUser::from(&user))))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<i64>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<ApiData<serde_json::Value>>, AppError> {
    require_admin(&principal)?;
    state.auth.reset_password(user_id, &request.password).await?;
    Ok(response::data(serde_json::json!({ "reset": user_id })))
}

pub async fn unlock_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiData<serde_json::Value>>, AppError> {
    require_admin(&principal)?;
    state.auth.unlock(user_id).await?;
    Ok(response::data(serde_json::json!({ "unlocked": user_id })))
}

pub async fn set_user_active(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<i64>,
    Json(request): Json<SetActiveRequest>,
) -> Result<Json<ApiData<serde_json::Value>>, AppError> {
    require_admin(&principal)?;
    state.auth.set_active(user_id, request.active).await?;
    Ok(response::data(
        serde_json::json!({ "id": user_id, "active": request.active }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    #[serde(default)]
    pub scopes: String,
}

#[derive(Debug, Serialize)]
pub struct CreateApiKeyResponse {
    /// Shown exactly once; only a hash is stored.
    pub key: String,
    pub id: i64,
}

pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<i64>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<ApiData<CreateApiKeyResponse>>), AppError> {
    require_admin(&principal)?;
    let (plaintext, key) = state.auth.create_api_key(user_id, &request.scopes).await?;
    Ok((
        StatusCode::CREATED,
        response::data(CreateApiKeyResponse {
            key: plaintext,
            id: key.id,
        }),
    ))
}
