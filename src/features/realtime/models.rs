use crate::features::audit::models::AuditAction;
use crate::features::audit::MutationCtx;
use crate::features::entities::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A server-to-client frame. `kind` is `<module>_<action>` for entity
/// events, or `presence_update` / `pong`.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: String, id: String, action: String) -> Self {
        Self {
            kind,
            id,
            action,
            user_id: None,
            user: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn entity(
        kind: EntityKind,
        id: &str,
        action: &AuditAction,
        ctx: &MutationCtx,
        data: Option<Value>,
    ) -> Self {
        Self {
            kind: format!("{}_{}", kind.module(), action.event_suffix()),
            id: id.to_string(),
            action: action.event_suffix(),
            user_id: ctx.user_id,
            user: Some(ctx.username.clone()),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn presence_update(resource_type: &str, resource_id: &str, users: Vec<PresenceUser>) -> Self {
        let mut event = Self::new(
            "presence_update".to_string(),
            resource_id.to_string(),
            "update".to_string(),
        );
        event.data = Some(serde_json::json!({
            "resource_type": resource_type,
            "resource_id": resource_id,
            "users": users,
        }));
        event
    }
}

/// One principal's presence on a resource.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceUser {
    pub user_id: i64,
    pub username: String,
    pub mode: String,
    pub since: DateTime<Utc>,
}

/// Frames a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    PresenceAnnounce {
        resource_type: String,
        resource_id: String,
        mode: String,
    },
    PresenceRetract {
        resource_type: String,
        resource_id: String,
    },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_event_type_is_module_underscore_action() {
        let ctx = MutationCtx {
            user_id: Some(3),
            username: "alice".to_string(),
            ip_address: None,
            user_agent: None,
        };
        let event = Event::entity(
            EntityKind::WorkOrder,
            "WO-1",
            &AuditAction::Update,
            &ctx,
            None,
        );
        assert_eq!(event.kind, "work_order_update");
        assert_eq!(event.action, "update");
        assert_eq!(event.user.as_deref(), Some("alice"));
    }

    #[test]
    fn client_messages_deserialise() {
        let announce: ClientMessage = serde_json::from_str(
            r#"{"type":"presence_announce","resource_type":"work_order","resource_id":"WO-1","mode":"viewing"}"#,
        )
        .unwrap();
        assert!(matches!(announce, ClientMessage::PresenceAnnounce { .. }));

        let retract: ClientMessage = serde_json::from_str(
            r#"{"type":"presence_retract","resource_type":"work_order","resource_id":"WO-1"}"#,
        )
        .unwrap();
        assert!(matches!(retract, ClientMessage::PresenceRetract { .. }));

        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientMessage::Ping));
    }

    #[test]
    fn optional_fields_are_omitted() {
        let event = Event::new("pong".to_string(), String::new(), "pong".to_string());
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("user_id").is_none());
        assert!(json.get("data").is_none());
    }
}
