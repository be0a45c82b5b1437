use crate::error::AppError;
use crate::features::auth::models::Principal;
use crate::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tower_cookies::Cookies;

pub const SESSION_COOKIE: &str = "zrp_session";

/// Resolve the request's principal: API key bearer first, then the session
/// cookie, else anonymous. The result rides in request extensions (and is
/// mirrored onto the response for the outer logging stage).
pub async fn resolve_principal(
    State(state): State<AppState>,
    cookies: Cookies,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = identify(&state, &req, &cookies).await?;

    req.extensions_mut().insert(principal.clone());
    let mut response = next.run(req).await;
    response.extensions_mut().insert(principal);
    Ok(response)
}

async fn identify(
    state: &AppState,
    req: &Request,
    cookies: &Cookies,
) -> Result<Principal, AppError> {
    if let Some(key) = bearer_token(req) {
        if let Some(user) = state.auth.authenticate_api_key(&key).await? {
            return Ok(Principal::User(user));
        }
        // A presented-but-invalid key does not fall through to the cookie.
        return Ok(Principal::Anonymous);
    }

    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        if let Some(user) = state.auth.authenticate_session(cookie.value()).await? {
            return Ok(Principal::User(user));
        }
    }

    Ok(Principal::Anonymous)
}

fn bearer_token(req: &Request) -> Option<String> {
    let value = req.headers().get("authorization")?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Route guard: reject anonymous callers with 401.
pub async fn require_auth(req: Request, next: Next) -> Result<Response, AppError> {
    match req.extensions().get::<Principal>() {
        Some(Principal::User(_)) => Ok(next.run(req).await),
        _ => Err(AppError::Unauthenticated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_auth(value: &str) -> Request {
        axum::http::Request::builder()
            .header("authorization", value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn bearer_token_is_extracted() {
        assert_eq!(
            bearer_token(&request_with_auth("Bearer zrp_abc123")),
            Some("zrp_abc123".to_string())
        );
        assert_eq!(
            bearer_token(&request_with_auth("bearer zrp_abc123")),
            Some("zrp_abc123".to_string())
        );
    }

    #[test]
    fn non_bearer_schemes_are_ignored() {
        assert_eq!(bearer_token(&request_with_auth("Basic dXNlcg==")), None);
        assert_eq!(bearer_token(&request_with_auth("Bearer ")), None);
        let bare = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(bearer_token(&bare), None);
    }
}
