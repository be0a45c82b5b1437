use crate::error::AppError;
use crate::features::notifications::models::{EmailConfig, Notification};
use crate::store::Store;
use chrono::{Duration, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

#[derive(Clone)]
pub struct NotificationService {
    store: Store,
}

impl NotificationService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Queue a notification. `user_id = None` targets every opted-in user
    /// with an email address.
    pub async fn enqueue(
        &self,
        user_id: Option<i64>,
        event_type: &str,
        title: &str,
        message: &str,
    ) -> Result<i64, AppError> {
        let result = self
            .store
            .exec("INSERT INTO notification_queue", "notifications::enqueue", || {
                sqlx::query(
                    "INSERT INTO notification_queue
                        (user_id, event_type, title, message, emailed, created_at)
                        VALUES (?, ?, ?, ?, 0, ?)",
                )
                .bind(user_id)
                .bind(event_type)
                .bind(title)
                .bind(message)
                .bind(Utc::now())
                .execute(self.store.pool())
            })
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn email_config(&self) -> Result<EmailConfig, AppError> {
        let config: EmailConfig = sqlx::query_as("SELECT * FROM email_config WHERE id = 1")
            .fetch_one(self.store.pool())
            .await?;
        Ok(config)
    }

    pub async fn update_email_config(&self, config: &EmailConfig) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE email_config SET smtp_host = ?, smtp_port = ?, smtp_username = ?,
                smtp_password = ?, from_address = ?, enabled = ? WHERE id = 1",
        )
        .bind(&config.smtp_host)
        .bind(config.smtp_port)
        .bind(&config.smtp_username)
        .bind(&config.smtp_password)
        .bind(&config.from_address)
        .bind(config.enabled)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// One drain pass: unemailed rows from the last ten minutes, sent to
    /// opted-in recipients, marked `emailed` on success. Failures stay
    /// queued for the next tick.
    pub async fn drain_email_queue(&self) -> Result<usize, AppError> {
        let config = self.email_config().await?;
        if !config.enabled {
            return Ok(0);
        }
        let cutoff = Utc::now() - Duration::minutes(10);
        let pending: Vec<Notification> = sqlx::query_as(
            "SELECT * FROM notification_queue
                WHERE emailed = 0 AND created_at > ? ORDER BY created_at",
        )
        .bind(cutoff)
        .fetch_all(self.store.pool())
        .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mailer = build_mailer(&config)
            .map_err(|e| AppError::Internal(format!("smtp transport: {e}")))?;

        let mut sent = 0;
        for notification in pending {
            let recipients = self.recipients_for(&notification).await?;
            match self
                .send_one(&mailer, &config, &notification, &recipients)
                .await
            {
                Ok(()) => {
                    sqlx::query("UPDATE notification_queue SET emailed = 1 WHERE id = ?")
                        .bind(notification.id)
                        .execute(self.store.pool())
                        .await?;
                    sent += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        notification_id = notification.id,
                        error = %e,
                        "email dispatch failed, will retry"
                    );
                }
            }
        }
        Ok(sent)
    }

    /// Emails of the targeted user, or of every active user, filtered by
    /// per-event-type opt-in.
    async fn recipients_for(&self, notification: &Notification) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String, Option<String>)> = match notification.user_id {
            Some(user_id) => {
                sqlx::query_as(
                    "SELECT email, notification_preferences FROM users
                        WHERE id = ? AND active = 1 AND email IS NOT NULL",
                )
                .bind(user_id)
                .fetch_all(self.store.pool())
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT email, notification_preferences FROM users
                        WHERE active = 1 AND email IS NOT NULL",
                )
                .fetch_all(self.store.pool())
                .await?
            }
        };
        Ok(rows
            .into_iter()
            .filter(|(_, prefs)| opted_in(prefs.as_deref(), &notification.event_type))
            .map(|(email, _)| email)
            .collect())
    }

    async fn send_one(
        &self,
        mailer: &AsyncSmtpTransport<Tokio1Executor>,
        config: &EmailConfig,
        notification: &Notification,
        recipients: &[String],
    ) -> Result<(), AppError> {
        if recipients.is_empty() {
            // Nobody to deliver to counts as done, not as a failure.
            return Ok(());
        }
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| AppError::Internal(format!("bad from address: {e}")))?;
        for recipient in recipients {
            let to: Mailbox = match recipient.parse() {
                Ok(to) => to,
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "skipping invalid address");
                    continue;
                }
            };
            let email = Message::builder()
                .from(from.clone())
                .to(to)
                .subject(&notification.title)
                .header(ContentType::TEXT_PLAIN)
                .body(notification.message.clone())
                .map_err(|e| AppError::Internal(format!("build email: {e}")))?;
            mailer
                .send(email)
                .await
                .map_err(|e| AppError::Internal(format!("smtp send: {e}")))?;
        }
        Ok(())
    }
}

fn build_mailer(
    config: &EmailConfig,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, lettre::transport::smtp::Error> {
    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
        .port(config.smtp_port as u16);
    if !config.smtp_username.is_empty() {
        builder = builder.credentials(Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.clone(),
        ));
    }
    Ok(builder.build())
}

/// Preferences are a JSON object mapping event type to bool; a missing key
/// or unparsable blob means opted in.
pub fn opted_in(preferences: Option<&str>, event_type: &str) -> bool {
    let Some(raw) = preferences else {
        return true;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return true;
    };
    value
        .get(event_type)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(true)
}
