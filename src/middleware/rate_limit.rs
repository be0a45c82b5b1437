use crate::middleware::request_info::RequestInfo;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

const WINDOW_SECS: u64 = 60;
/// Buckets with no activity for this long are pruned by the cleanup task.
const IDLE_SECS: u64 = 600;

/// Endpoint classes with independent budgets. Login endpoints get a much
/// tighter limit than the rest of the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Login,
    General,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        limit: usize,
        remaining: usize,
        reset: u64,
    },
    Limited {
        limit: usize,
        retry_after: u64,
        reset: u64,
    },
}

/// Per-IP sliding-window limiter. Timestamps inside the window are kept
/// per (ip, class); the prefix outside the window is dropped on every
/// check. State is in-memory only and resets with the process.
pub struct RateLimiter {
    limits: RwLock<HashMap<(String, EndpointClass), Vec<u64>>>,
    login_limit: usize,
    general_limit: usize,
    window: u64,
}

impl RateLimiter {
    pub fn new(login_limit: usize, general_limit: usize) -> Self {
        Self::with_window(login_limit, general_limit, WINDOW_SECS)
    }

    pub fn with_window(login_limit: usize, general_limit: usize, window: u64) -> Self {
        Self {
            limits: RwLock::new(HashMap::new()),
            login_limit,
            general_limit,
            window,
        }
    }

    fn limit_for(&self, class: EndpointClass) -> usize {
        match class {
            EndpointClass::Login => self.login_limit,
            EndpointClass::General => self.general_limit,
        }
    }

    pub async fn check(&self, ip: &str, class: EndpointClass) -> Decision {
        let now = unix_now();
        let limit = self.limit_for(class);
        let window_start = now.saturating_sub(self.window);

        let mut limits = self.limits.write().await;
        let timestamps = limits
            .entry((ip.to_string(), class))
            .or_insert_with(Vec::new);
        timestamps.retain(|&ts| ts > window_start);

        if timestamps.len() >= limit {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let reset = oldest + self.window;
            return Decision::Limited {
                limit,
                retry_after: reset.saturating_sub(now).max(1),
                reset,
            };
        }

        timestamps.push(now);
        let oldest = timestamps.first().copied().unwrap_or(now);
        Decision::Allowed {
            limit,
            remaining: limit - timestamps.len(),
            reset: oldest + self.window,
        }
    }

    /// Drop buckets that have been idle long enough that keeping them only
    /// leaks memory.
    pub async fn cleanup(&self) {
        let cutoff = unix_now().saturating_sub(IDLE_SECS);
        let mut limits = self.limits.write().await;
        limits.retain(|_, timestamps| timestamps.last().is_some_and(|&ts| ts > cutoff));
    }

    #[cfg(test)]
    async fn bucket_count(&self) -> usize {
        self.limits.read().await.len()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `/api/<version>/login` and friends form the login class.
pub fn classify(path: &str) -> Option<EndpointClass> {
    let rest = path.strip_prefix("/api/")?;
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() == 2 && segments[1] == "login" {
        Some(EndpointClass::Login)
    } else {
        Some(EndpointClass::General)
    }
}

pub async fn rate_limit_middleware(
    State(state): State<crate::AppState>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let Some(class) = classify(&path) else {
        // Static assets and non-API paths bypass the limiter entirely.
        return next.run(req).await;
    };

    let ip = req
        .extensions()
        .get::<RequestInfo>()
        .map(|info| info.ip.clone())
        .unwrap_or_else(|| "unknown".to_string());

    match state.rate_limiter.check(&ip, class).await {
        Decision::Allowed {
            limit,
            remaining,
            reset,
        } => {
            let mut response = next.run(req).await;
            apply_headers(&mut response, limit, remaining, reset);
            response
        }
        Decision::Limited {
            limit,
            retry_after,
            reset,
        } => {
            tracing::warn!(ip = %ip, path = %path, "rate limit exceeded");
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "rate limit exceeded",
                    "kind": "rate_limited",
                })),
            )
                .into_response();
            apply_headers(&mut response, limit, 0, reset);
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
            response
        }
    }
}

fn apply_headers(response: &mut Response, limit: usize, remaining: usize, reset: u64) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&reset.to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
}

/// Background task pruning idle buckets.
pub async fn cleanup_task(limiter: std::sync::Arc<RateLimiter>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        limiter.cleanup().await;
    }
}
