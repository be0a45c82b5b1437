use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: Option<i64>,
    pub event_type: String,
    pub title: String,
    pub message: String,
    pub emailed: bool,
    pub created_at: DateTime<Utc>,
}

/// Singleton SMTP configuration (row id = 1).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmailConfig {
    pub id: i64,
    pub smtp_host: String,
    pub smtp_port: i64,
    pub smtp_username: String,
    #[serde(skip_serializing)]
    pub smtp_password: String,
    pub from_address: String,
    pub enabled: bool,
}
