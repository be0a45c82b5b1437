use crate::features::auth::models::Principal;
use crate::middleware::request_info::RequestInfo;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;

/// One line per request. The principal is read back off the response
/// extensions, where the (inner) auth stage mirrors it.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let ip = req
        .extensions()
        .get::<RequestInfo>()
        .map(|info| info.ip.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let started = Instant::now();
    let response = next.run(req).await;
    let elapsed_ms = started.elapsed().as_millis();

    let principal = response
        .extensions()
        .get::<Principal>()
        .map(|p| p.username().to_string())
        .unwrap_or_else(|| "-".to_string());

    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = elapsed_ms as u64,
        principal = %principal,
        ip = %ip,
        "request"
    );
    response
}
