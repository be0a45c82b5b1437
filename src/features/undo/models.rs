use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoAction {
    Delete,
    Update,
    BulkDelete,
}

impl UndoAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UndoAction::Delete => "delete",
            UndoAction::Update => "update",
            UndoAction::BulkDelete => "bulk_delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "delete" => Some(UndoAction::Delete),
            "update" => Some(UndoAction::Update),
            "bulk_delete" => Some(UndoAction::BulkDelete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UndoEntry {
    pub id: i64,
    pub user_id: i64,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(skip_serializing)]
    pub previous_data: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips() {
        for action in [UndoAction::Delete, UndoAction::Update, UndoAction::BulkDelete] {
            assert_eq!(UndoAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(UndoAction::parse("redo"), None);
    }
}
