use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    View,
    ViewSensitive,
    Export,
    Login,
    Logout,
    Approve,
    Reject,
    Undo,
    Custom(String),
}

impl AuditAction {
    pub fn as_str(&self) -> &str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::View => "VIEW",
            AuditAction::ViewSensitive => "VIEW_SENSITIVE",
            AuditAction::Export => "EXPORT",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::Approve => "APPROVE",
            AuditAction::Reject => "REJECT",
            AuditAction::Undo => "UNDO",
            AuditAction::Custom(s) => s,
        }
    }

    /// Suffix used in broadcast event types, e.g. `vendor_create`.
    pub fn event_suffix(&self) -> String {
        self.as_str().to_lowercase()
    }
}

/// A pending audit record, produced by the pipeline or by hand at the few
/// call sites (login/logout) that have no entity mutation.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub user_id: Option<i64>,
    pub username: String,
    pub action: AuditAction,
    pub module: String,
    pub record_id: String,
    pub summary: String,
    pub before_value: Option<Value>,
    pub after_value: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A persisted audit or change-history row (the two tables share a shape).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub username: String,
    pub action: String,
    pub module: String,
    pub record_id: String,
    pub summary: String,
    pub before_value: Option<String>,
    pub after_value: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}
