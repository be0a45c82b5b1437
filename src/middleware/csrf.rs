use crate::error::AppError;
use crate::features::auth::models::{AuthSource, Principal};
use crate::AppState;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use rand::RngCore;
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};

pub const CSRF_COOKIE_NAME: &str = "zrp_csrf";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Double-submit token. Readable by the front-end (not HttpOnly) so it can
/// be echoed back in the header.
pub fn set_csrf_cookie(cookies: &Cookies) {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let cookie = Cookie::build((CSRF_COOKIE_NAME, hex::encode(bytes)))
        .path("/")
        .secure(cfg!(not(debug_assertions)))
        .same_site(SameSite::Lax)
        .build();
    cookies.add(cookie);
}

/// CSRF guard for state-changing methods. Only session-cookie principals
/// are at risk; API-key callers present their credential explicitly and
/// bypass this stage. Either the double-submit pair must match or the
/// Origin/Referer must match the configured origin.
pub async fn validate_csrf(
    State(state): State<AppState>,
    cookies: Cookies,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !is_state_changing(req.method()) {
        return Ok(next.run(req).await);
    }

    let via_session_cookie = matches!(
        req.extensions().get::<Principal>(),
        Some(Principal::User(user)) if user.source == AuthSource::Session
    );
    if !via_session_cookie {
        return Ok(next.run(req).await);
    }

    let header_token = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let cookie_token = cookies
        .get(CSRF_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .unwrap_or_default();

    if tokens_match(header_token, &cookie_token) {
        return Ok(next.run(req).await);
    }

    let origin = req
        .headers()
        .get("origin")
        .or_else(|| req.headers().get("referer"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if origin_matches(origin, &state.config.origin) {
        return Ok(next.run(req).await);
    }

    tracing::warn!(path = %req.uri().path(), "csrf validation failed");
    Err(AppError::forbidden("CSRF validation failed"))
}

fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn tokens_match(header: &str, cookie: &str) -> bool {
    !header.is_empty() && !cookie.is_empty() && header == cookie
}

fn origin_matches(presented: &str, configured: &str) -> bool {
    if configured.is_empty() || presented.is_empty() {
        return false;
    }
    let configured = configured.trim_end_matches('/');
    presented == configured || presented.starts_with(&format!("{configured}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_changing_methods() {
        assert!(is_state_changing(&Method::POST));
        assert!(is_state_changing(&Method::DELETE));
        assert!(!is_state_changing(&Method::GET));
        assert!(!is_state_changing(&Method::HEAD));
    }

    #[test]
    fn empty_tokens_never_match() {
        assert!(!tokens_match("", ""));
        assert!(!tokens_match("abc", ""));
        assert!(!tokens_match("", "abc"));
        assert!(tokens_match("abc", "abc"));
        assert!(!tokens_match("abc", "abd"));
    }

    #[test]
    fn origin_matching() {
        assert!(origin_matches(
            "https://zrp.example.com",
            "https://zrp.example.com"
        ));
        assert!(origin_matches(
            "https://zrp.example.com/app/vendors",
            "https://zrp.example.com"
        ));
        assert!(!origin_matches(
            "https://evil.example.com",
            "https://zrp.example.com"
        ));
        // An unset origin disables the fallback entirely.
        assert!(!origin_matches("https://zrp.example.com", ""));
        // Prefix tricks do not pass.
        assert!(!origin_matches(
            "https://zrp.example.com.evil.com",
            "https://zrp.example.com"
        ));
    }
}
