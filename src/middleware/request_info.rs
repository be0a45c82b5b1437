use axum::extract::connect_info::ConnectInfo;
use axum::extract::Request;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;

/// Per-request client metadata, resolved once and carried in extensions so
/// rate limiting, logging, and audit all agree on the caller's address.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub ip: String,
    pub user_agent: Option<String>,
}

pub async fn resolve_request_info(mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let info = RequestInfo {
        ip: client_ip(req.headers(), peer),
        user_agent: req
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
    };
    req.extensions_mut().insert(info);
    next.run(req).await
}

/// First hop of X-Forwarded-For, then X-Real-IP, then the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<String>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real = real.trim();
        if !real.is_empty() {
            return real.to_string();
        }
    }
    peer.unwrap_or_else(|| "unknown".to_string())
}
