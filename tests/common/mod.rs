#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zrp_backend::config::Config;
use zrp_backend::features::auth::models::{AuthSource, AuthUser, CreateUserRequest, Role};
use zrp_backend::store::{QueryProfiler, Store};
use zrp_backend::AppState;

static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct TestApp {
    pub state: AppState,
    pub db_path: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.db_path.display(), suffix));
        }
    }
}

pub fn test_config() -> Config {
    Config {
        db_path: String::new(),
        port: 0,
        session_ttl_hours: 24,
        backup_time: "02:00".into(),
        backup_retention: 7,
        backup_dir: "backups".into(),
        rate_limit_login: 5,
        rate_limit_api: 100,
        query_profiler_enabled: true,
        query_profiler_threshold_ms: 10_000,
        login_lock_threshold: 5,
        login_lock_duration_minutes: 15,
        password_min_length: 12,
        origin: String::new(),
        audit_retention_days: 365,
    }
}

/// A fresh store and service set on a throwaway SQLite file.
pub async fn setup() -> TestApp {
    setup_with(test_config()).await
}

pub async fn setup_with(mut config: Config) -> TestApp {
    let n = DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    let db_path = std::env::temp_dir().join(format!(
        "zrp-test-{}-{}-{}.db",
        std::process::id(),
        n,
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    config.db_path = db_path.display().to_string();

    let profiler = Arc::new(QueryProfiler::new(
        config.query_profiler_enabled,
        config.query_profiler_threshold_ms,
        None,
    ));
    let store = Store::connect_with(&config.db_path, profiler)
        .await
        .expect("failed to open test database");
    store.migrate().await.expect("failed to migrate");

    let state = AppState::build(Arc::new(config), store);
    TestApp { state, db_path }
}

/// Synthetic admin identity for service-level calls that need a caller.
pub fn admin_caller() -> AuthUser {
    AuthUser {
        id: 0,
        username: "test-admin".to_string(),
        role: Role::Admin,
        source: AuthSource::ApiKey,
    }
}

pub async fn create_user(app: &TestApp, username: &str, password: &str, role: &str) -> i64 {
    let user = app
        .state
        .auth
        .create_user(
            &admin_caller(),
            CreateUserRequest {
                username: username.to_string(),
                password: password.to_string(),
                role: role.to_string(),
                email: None,
            },
            None,
            None,
        )
        .await
        .expect("failed to create test user");
    user.id
}

pub mod http {
    use axum::body::Body;
    use axum::http::{header, Request, Response, StatusCode};
    use axum::Router;
    use tower::util::ServiceExt;

    pub const TEST_IP: &str = "203.0.113.10";

    pub async fn send(app: &Router, request: Request<Body>) -> Response<axum::body::Body> {
        app.clone().oneshot(request).await.expect("request failed")
    }

    pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", TEST_IP)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .header("x-forwarded-for", TEST_IP)
            .body(Body::empty())
            .unwrap()
    }

    pub async fn body_json(response: Response<axum::body::Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read body");
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    }

    /// Session + CSRF cookie values extracted from a login response.
    #[derive(Debug, Clone)]
    pub struct SessionCookies {
        pub session: String,
        pub csrf: String,
    }

    impl SessionCookies {
        pub fn cookie_header(&self) -> String {
            format!("zrp_session={}; zrp_csrf={}", self.session, self.csrf)
        }
    }

    pub fn extract_cookies(response: &Response<axum::body::Body>) -> SessionCookies {
        let mut session = String::new();
        let mut csrf = String::new();
        for value in response.headers().get_all(header::SET_COOKIE) {
            let raw = value.to_str().unwrap_or_default();
            let pair = raw.split(';').next().unwrap_or_default();
            if let Some(v) = pair.strip_prefix("zrp_session=") {
                session = v.to_string();
            } else if let Some(v) = pair.strip_prefix("zrp_csrf=") {
                csrf = v.to_string();
            }
        }
        SessionCookies { session, csrf }
    }

    pub async fn login(app: &Router, username: &str, password: &str) -> SessionCookies {
        let response = send(
            app,
            json_request(
                "POST",
                "/api/v1/login",
                serde_json::json!({ "username": username, "password": password }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK, "login failed");
        extract_cookies(&response)
    }

    pub fn authed_get(uri: &str, cookies: &SessionCookies) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .header("x-forwarded-for", TEST_IP)
            .header(header::COOKIE, cookies.cookie_header())
            .body(Body::empty())
            .unwrap()
    }

    pub fn authed_json(
        method: &str,
        uri: &str,
        cookies: &SessionCookies,
        body: serde_json::Value,
    ) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", TEST_IP)
            .header(header::COOKIE, cookies.cookie_header())
            .header("x-csrf-token", cookies.csrf.clone())
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}
