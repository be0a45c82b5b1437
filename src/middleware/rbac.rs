use crate::error::AppError;
use crate::features::auth::models::Principal;
use crate::features::auth::permissions::CapabilityAction;
use crate::AppState;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;

/// Capability tag attached at route registration. With `action: None` the
/// required action is derived from the method (GET/HEAD read, everything
/// else write).
#[derive(Debug, Clone, Copy)]
pub struct Capability {
    pub module: &'static str,
    pub action: Option<CapabilityAction>,
}

impl Capability {
    pub fn module(module: &'static str) -> Self {
        Self {
            module,
            action: None,
        }
    }

    pub fn read(module: &'static str) -> Self {
        Self {
            module,
            action: Some(CapabilityAction::Read),
        }
    }

    pub fn write(module: &'static str) -> Self {
        Self {
            module,
            action: Some(CapabilityAction::Write),
        }
    }
}

/// Route guard enforcing the caller's role capability. Routes opt in by
/// attaching a `Capability` extension ahead of this layer. Handlers that
/// edit the permission surface still re-check the admin role themselves.
pub async fn require_capability(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(capability) = req.extensions().get::<Capability>().copied() else {
        return Err(AppError::Internal(
            "route guarded by rbac without a capability tag".to_string(),
        ));
    };
    let user = req
        .extensions()
        .get::<Principal>()
        .and_then(|p| p.user())
        .ok_or(AppError::Unauthenticated)?;

    let action = capability
        .action
        .unwrap_or_else(|| action_for_method(req.method()));

    if !state
        .permissions
        .allows(user.role, capability.module, action)
        .await?
    {
        tracing::warn!(
            user = %user.username,
            module = capability.module,
            "capability denied"
        );
        return Err(AppError::forbidden("insufficient permissions"));
    }

    Ok(next.run(req).await)
}

fn action_for_method(method: &Method) -> CapabilityAction {
    match *method {
        Method::GET | Method::HEAD | Method::OPTIONS => CapabilityAction::Read,
        _ => CapabilityAction::Write,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_map_to_actions() {
        assert_eq!(action_for_method(&Method::GET), CapabilityAction::Read);
        assert_eq!(action_for_method(&Method::HEAD), CapabilityAction::Read);
        assert_eq!(action_for_method(&Method::POST), CapabilityAction::Write);
        assert_eq!(action_for_method(&Method::DELETE), CapabilityAction::Write);
    }
}
