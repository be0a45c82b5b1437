use crate::config::Config;
use crate::error::AppError;
use crate::features::audit::models::{AuditAction, AuditEvent};
use crate::features::audit::AuditService;
use crate::features::auth::models::{
    ApiKey, AuthSource, AuthUser, CreateUserRequest, Role, User,
};
use crate::store::Store;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};

/// Hash verified when the username does not resolve to a usable account,
/// so the failure path costs the same as a real verification.
static DUMMY_HASH: OnceLock<String> = OnceLock::new();

fn dummy_hash() -> &'static str {
    DUMMY_HASH.get_or_init(|| {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(b"zrp-dummy-password", &salt)
            .map(|h| h.to_string())
            .unwrap_or_default()
    })
}

#[derive(Clone)]
pub struct AuthService {
    store: Store,
    config: Arc<Config>,
    audit: AuditService,
}

impl AuthService {
    pub fn new(store: Store, config: Arc<Config>, audit: AuditService) -> Self {
        Self {
            store,
            config,
            audit,
        }
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(String, User), AppError> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.store.pool())
            .await?;

        let user = match user {
            Some(u) if u.active => u,
            _ => {
                // Unknown or deactivated account: burn a verification anyway
                // so response timing does not reveal which usernames exist.
                verify_password(password, dummy_hash());
                return Err(AppError::Unauthenticated);
            }
        };

        let now = Utc::now();
        if let Some(until) = user.locked_until {
            if until > now {
                return Err(AppError::Locked {
                    retry_after_secs: (until - now).num_seconds().max(1),
                });
            }
        }

        if !verify_password(password, &user.password_hash) {
            self.register_failed_login(&user).await?;
            return Err(AppError::Unauthenticated);
        }

        sqlx::query(
            "UPDATE users SET failed_login_count = 0, locked_until = NULL,
                last_failed_login_at = NULL WHERE id = ?",
        )
        .bind(user.id)
        .execute(self.store.pool())
        .await?;

        let token = new_session_token();
        let expires_at = now + self.config.session_ttl();
        self.store
            .exec("INSERT INTO sessions", "auth::login", || {
                sqlx::query(
                    "INSERT INTO sessions (token, user_id, expires_at, created_at)
                        VALUES (?, ?, ?, ?)",
                )
                .bind(&token)
                .bind(user.id)
                .bind(expires_at)
                .bind(now)
                .execute(self.store.pool())
            })
            .await?;

        self.audit
            .record_best_effort(&AuditEvent {
                user_id: Some(user.id),
                username: user.username.clone(),
                action: AuditAction::Login,
                module: "auth".to_string(),
                record_id: user.id.to_string(),
                summary: format!("{} logged in", user.username),
                before_value: None,
                after_value: None,
                ip_address: ip,
                user_agent,
            })
            .await;

        tracing::info!(user = %user.username, "login succeeded");
        Ok((token, user))
    }

    async fn register_failed_login(&self, user: &User) -> Result<(), AppError> {
        let now = Utc::now();
        let window = Duration::minutes(15);

        // Failures only count as consecutive while they land inside the
        // window; an older streak starts over.
        let streak = match user.last_failed_login_at {
            Some(last) if now - last <= window => user.failed_login_count + 1,
            _ => 1,
        };

        if streak >= self.config.login_lock_threshold {
            let until = now + self.config.lock_duration();
            sqlx::query(
                "UPDATE users SET failed_login_count = ?, last_failed_login_at = ?,
                    locked_until = ? WHERE id = ?",
            )
            .bind(streak)
            .bind(now)
            .bind(until)
            .bind(user.id)
            .execute(self.store.pool())
            .await?;
            tracing::warn!(user = %user.username, until = %until, "account locked after repeated failures");
        } else {
            sqlx::query(
                "UPDATE users SET failed_login_count = ?, last_failed_login_at = ?
                    WHERE id = ?",
            )
            .bind(streak)
            .bind(now)
            .bind(user.id)
            .execute(self.store.pool())
            .await?;
        }
        Ok(())
    }

    pub async fn logout(
        &self,
        token: &str,
        caller: Option<&AuthUser>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(self.store.pool())
            .await?;

        if let Some(user) = caller {
            self.audit
                .record_best_effort(&AuditEvent {
                    user_id: Some(user.id),
                    username: user.username.clone(),
                    action: AuditAction::Logout,
                    module: "auth".to_string(),
                    record_id: user.id.to_string(),
                    summary: format!("{} logged out", user.username),
                    before_value: None,
                    after_value: None,
                    ip_address: ip,
                    user_agent,
                })
                .await;
        }
        Ok(())
    }

    /// Resolve a session cookie to its user, extending the session when at
    /// least five minutes have passed since the last extension.
    pub async fn authenticate_session(&self, token: &str) -> Result<Option<AuthUser>, AppError> {
        let now = Utc::now();
        let session: Option<(i64, chrono::DateTime<Utc>)> = sqlx::query_as(
            "SELECT user_id, expires_at FROM sessions WHERE token = ? AND expires_at > ?",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(self.store.pool())
        .await?;

        let Some((user_id, expires_at)) = session else {
            return Ok(None);
        };

        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ? AND active = 1")
            .bind(user_id)
            .fetch_optional(self.store.pool())
            .await?;
        let Some(user) = user else {
            return Ok(None);
        };

        let last_extended = expires_at - self.config.session_ttl();
        if now - last_extended >= Duration::minutes(5) {
            sqlx::query("UPDATE sessions SET expires_at = ? WHERE token = ?")
                .bind(now + self.config.session_ttl())
                .bind(token)
                .execute(self.store.pool())
                .await?;
        }

        let role = user.role();
        Ok(Some(AuthUser {
            id: user.id,
            username: user.username,
            role,
            source: AuthSource::Session,
        }))
    }

    pub async fn authenticate_api_key(&self, key: &str) -> Result<Option<AuthUser>, AppError> {
        let key_hash = hash_api_key(key);
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM api_keys WHERE key_hash = ? AND active = 1",
        )
        .bind(&key_hash)
        .fetch_optional(self.store.pool())
        .await?;

        let Some((user_id,)) = row else {
            return Ok(None);
        };

        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ? AND active = 1")
            .bind(user_id)
            .fetch_optional(self.store.pool())
            .await?;

        Ok(user.map(|u| {
            let role = u.role();
            AuthUser {
                id: u.id,
                username: u.username,
                role,
                source: AuthSource::ApiKey,
            }
        }))
    }

    pub async fn create_user(
        &self,
        caller: &AuthUser,
        request: CreateUserRequest,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<User, AppError> {
        self.check_password_policy(&request.password)?;
        let role = Role::parse(&request.role)
            .ok_or_else(|| AppError::field_validation("role", "unknown role"))?;

        let password_hash = hash_password(&request.password)?;
        let now = Utc::now();
        let result = self
            .store
            .exec("INSERT INTO users", "auth::create_user", || {
                sqlx::query(
                    "INSERT INTO users (username, password_hash, role, active, email, created_at)
                        VALUES (?, ?, ?, 1, ?, ?)",
                )
                .bind(&request.username)
                .bind(&password_hash)
                .bind(role.as_str())
                .bind(&request.email)
                .bind(now)
                .execute(self.store.pool())
            })
            .await?;

        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(self.store.pool())
            .await?;

        self.audit
            .record_best_effort(&AuditEvent {
                user_id: Some(caller.id),
                username: caller.username.clone(),
                action: AuditAction::Create,
                module: "users".to_string(),
                record_id: user.id.to_string(),
                summary: format!("created user {}", user.username),
                before_value: None,
                after_value: serde_json::to_value(&user).ok(),
                ip_address: ip,
                user_agent,
            })
            .await;

        Ok(user)
    }

    pub async fn reset_password(&self, user_id: i64, password: &str) -> Result<(), AppError> {
        self.check_password_policy(password)?;
        let password_hash = hash_password(password)?;
        let updated = sqlx::query(
            "UPDATE users SET password_hash = ?, failed_login_count = 0,
                locked_until = NULL, last_failed_login_at = NULL WHERE id = ?",
        )
        .bind(&password_hash)
        .bind(user_id)
        .execute(self.store.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    pub async fn unlock(&self, user_id: i64) -> Result<(), AppError> {
        let updated = sqlx::query(
            "UPDATE users SET failed_login_count = 0, locked_until = NULL,
                last_failed_login_at = NULL WHERE id = ?",
        )
        .bind(user_id)
        .execute(self.store.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    /// Deactivation invalidates every live session immediately.
    pub async fn set_active(&self, user_id: i64, active: bool) -> Result<(), AppError> {
        let mut tx = self.store.begin().await?;
        let updated = sqlx::query("UPDATE users SET active = ? WHERE id = ?")
            .bind(active)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        if !active {
            sqlx::query("DELETE FROM sessions WHERE user_id = ?")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Issue an API key for a user. The plaintext is returned exactly once;
    /// only its hash is stored.
    pub async fn create_api_key(
        &self,
        user_id: i64,
        scopes: &str,
    ) -> Result<(String, ApiKey), AppError> {
        let plaintext = format!("zrp_{}", new_session_token());
        let key_hash = hash_api_key(&plaintext);
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO api_keys (key_hash, user_id, scopes, active, created_at)
                VALUES (?, ?, ?, 1, ?)",
        )
        .bind(&key_hash)
        .bind(user_id)
        .bind(scopes)
        .bind(now)
        .execute(self.store.pool())
        .await?;

        let key: ApiKey = sqlx::query_as("SELECT * FROM api_keys WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(self.store.pool())
            .await?;
        Ok((plaintext, key))
    }

    /// First-boot bootstrap: an empty users table gets an admin account
    /// with a random password, printed to the log once.
    pub async fn ensure_admin(&self) -> Result<(), AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.store.pool())
            .await?;
        if count > 0 {
            return Ok(());
        }

        let mut bytes = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let password = hex::encode(bytes);
        let password_hash = hash_password(&password)?;
        sqlx::query(
            "INSERT INTO users (username, password_hash, role, active, created_at)
                VALUES ('admin', ?, 'admin', 1, ?)",
        )
        .bind(&password_hash)
        .bind(Utc::now())
        .execute(self.store.pool())
        .await?;
        tracing::warn!(username = "admin", password = %password, "created initial admin account");
        Ok(())
    }

    pub async fn delete_expired_sessions(&self) -> Result<u64, AppError> {
        let result = self
            .store
            .exec("DELETE FROM sessions", "auth::session_gc", || {
                sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
                    .bind(Utc::now())
                    .execute(self.store.pool())
            })
            .await?;
        Ok(result.rows_affected())
    }

    fn check_password_policy(&self, password: &str) -> Result<(), AppError> {
        if password.chars().count() < self.config.password_min_length {
            return Err(AppError::field_validation(
                "password",
                format!(
                    "password must be at least {} characters",
                    self.config.password_min_length
                ),
            ));
        }
        Ok(())
    }
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("password hash failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

fn new_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
