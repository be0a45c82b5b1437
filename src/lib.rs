pub mod config;
pub mod error;
pub mod features;
pub mod middleware;
pub mod response;
pub mod store;

use crate::config::Config;
use crate::features::audit::{AuditService, ChangePipeline};
use crate::features::auth::{AuthService, PermissionService};
use crate::features::dashboard::DashboardService;
use crate::features::notifications::NotificationService;
use crate::features::realtime::Hub;
use crate::features::scheduler::Scheduler;
use crate::features::undo::UndoService;
use crate::features::vendors::VendorService;
use crate::middleware::rate_limit::RateLimiter;
use crate::middleware::rbac::Capability;
use crate::store::Store;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::predicate::{DefaultPredicate, Predicate, SizeAbove};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;

/// Construction-time singletons injected into every handler. Tests build
/// their own instance on a throwaway store.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub auth: AuthService,
    pub audit: AuditService,
    pub pipeline: ChangePipeline,
    pub undo: UndoService,
    pub vendors: VendorService,
    pub notifications: NotificationService,
    pub permissions: PermissionService,
    pub dashboard: DashboardService,
    pub hub: Arc<Hub>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn build(config: Arc<Config>, store: Store) -> Self {
        let hub = Arc::new(Hub::new());
        let audit = AuditService::new(store.clone());
        let auth = AuthService::new(store.clone(), config.clone(), audit.clone());
        let pipeline = ChangePipeline::new(store.clone(), audit.clone(), hub.clone());
        let undo = UndoService::new(store.clone(), audit.clone(), hub.clone());
        let vendors = VendorService::new(store.clone(), pipeline.clone());
        let notifications = NotificationService::new(store.clone());
        let permissions = PermissionService::new(store.clone());
        let dashboard = DashboardService::new(store.clone());
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_login,
            config.rate_limit_api,
        ));

        Self {
            config,
            store,
            auth,
            audit,
            pipeline,
            undo,
            vendors,
            notifications,
            permissions,
            dashboard,
            hub,
            rate_limiter,
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler {
            store: self.store.clone(),
            config: self.config.clone(),
            auth: self.auth.clone(),
            audit: self.audit.clone(),
            undo: self.undo.clone(),
            notifications: self.notifications.clone(),
        }
    }
}

/// The full application router with the complete middleware chain,
/// outermost to innermost: panic recovery, security headers, request
/// info, rate limiting, gzip, request logging, cookies, authentication
/// resolution; the per-route guards (401, then RBAC, then CSRF) sit
/// innermost, in that order.
pub fn app(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/logout", post(features::auth::routes::logout))
        .route("/me", get(features::auth::routes::me))
        .route("/dashboard", get(features::dashboard::routes::dashboard))
        .route("/undo", get(features::undo::routes::list_undo))
        .route("/undo/:id", post(features::undo::routes::perform_undo))
        .route("/presence", get(features::realtime::routes::presence))
        .route("/ws", get(features::realtime::routes::ws_upgrade))
        .route(
            "/change-history/:module/:id",
            get(features::audit::routes::change_history),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::csrf::validate_csrf,
        ))
        .route_layer(axum::middleware::from_fn(middleware::auth::require_auth));

    let vendor_routes = Router::new()
        .route(
            "/vendors",
            get(features::vendors::routes::list_vendors)
                .post(features::vendors::routes::create_vendor),
        )
        .route(
            "/vendors/bulk-delete",
            post(features::vendors::routes::bulk_delete_vendors),
        )
        .route(
            "/vendors/:id",
            get(features::vendors::routes::get_vendor)
                .put(features::vendors::routes::update_vendor)
                .delete(features::vendors::routes::delete_vendor),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::csrf::validate_csrf,
        ))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rbac::require_capability,
        ))
        .route_layer(Extension(Capability::module("vendor")))
        .route_layer(axum::middleware::from_fn(middleware::auth::require_auth));

    let audit_routes = Router::new()
        .route("/audit-logs", get(features::audit::routes::list_audit_logs))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::csrf::validate_csrf,
        ))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rbac::require_capability,
        ))
        .route_layer(Extension(Capability::module("audit")))
        .route_layer(axum::middleware::from_fn(middleware::auth::require_auth));

    let user_routes = Router::new()
        .route("/users", post(features::auth::routes::create_user))
        .route(
            "/users/:id/reset-password",
            post(features::auth::routes::reset_password),
        )
        .route("/users/:id/unlock", post(features::auth::routes::unlock_user))
        .route(
            "/users/:id/active",
            put(features::auth::routes::set_user_active),
        )
        .route(
            "/users/:id/api-keys",
            post(features::auth::routes::create_api_key),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::csrf::validate_csrf,
        ))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rbac::require_capability,
        ))
        .route_layer(Extension(Capability::module("users")))
        .route_layer(axum::middleware::from_fn(middleware::auth::require_auth));

    let system_routes = Router::new()
        .route(
            "/system/profiler",
            get(features::system::routes::profiler_snapshot),
        )
        .route(
            "/system/permissions",
            get(features::system::routes::list_permissions)
                .put(features::system::routes::upsert_permission),
        )
        .route(
            "/system/email-config",
            get(features::system::routes::get_email_config)
                .put(features::system::routes::update_email_config),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::csrf::validate_csrf,
        ))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rbac::require_capability,
        ))
        .route_layer(Extension(Capability::module("system")))
        .route_layer(axum::middleware::from_fn(middleware::auth::require_auth));

    let api = Router::new()
        .route("/login", post(features::auth::routes::login))
        .merge(session_routes)
        .merge(vendor_routes)
        .merge(audit_routes)
        .merge(user_routes)
        .merge(system_routes)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::resolve_principal,
        ))
        .layer(CookieManagerLayer::new())
        .layer(axum::middleware::from_fn(
            middleware::request_log::log_requests,
        ))
        .layer(
            // Keep the stock compressible-content-type filter and raise the
            // size floor to 1 KiB.
            CompressionLayer::new()
                .compress_when(DefaultPredicate::new().and(SizeAbove::new(1024))),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(
            middleware::request_info::resolve_request_info,
        ));

    if !state.config.origin.is_empty() {
        if let Ok(origin) = state.config.origin.parse::<axum::http::HeaderValue>() {
            app = app.layer(
                CorsLayer::new()
                    .allow_origin([origin])
                    .allow_methods([
                        axum::http::Method::GET,
                        axum::http::Method::POST,
                        axum::http::Method::PUT,
                        axum::http::Method::DELETE,
                    ])
                    .allow_headers([
                        axum::http::header::CONTENT_TYPE,
                        axum::http::header::AUTHORIZATION,
                        axum::http::HeaderName::from_static("x-csrf-token"),
                    ])
                    .allow_credentials(true),
            );
        }
    }

    app.layer(axum::middleware::from_fn(
        middleware::security_headers::security_headers,
    ))
    .layer(CatchPanicLayer::custom(handle_panic))
    .with_state(state)
}

fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %detail, "request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": "internal server error",
            "kind": "internal",
        })),
    )
        .into_response()
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "OK",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
