use dotenv::dotenv;
use serde::Deserialize;

/// Runtime configuration, sourced from `ZRP_*` environment variables with
/// defaults suitable for local development.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db_path: String,
    pub port: u16,
    pub session_ttl_hours: i64,
    pub backup_time: String,
    pub backup_retention: usize,
    pub backup_dir: String,
    pub rate_limit_login: usize,
    pub rate_limit_api: usize,
    pub query_profiler_enabled: bool,
    pub query_profiler_threshold_ms: u64,
    pub login_lock_threshold: i64,
    pub login_lock_duration_minutes: i64,
    pub password_min_length: usize,
    /// Origin allowed by the CSRF Origin/Referer fallback, e.g.
    /// `https://zrp.example.com`. Empty disables the fallback.
    pub origin: String,
    pub audit_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .set_default("db_path", "zrp.db")?
            .set_default("port", 8000)?
            .set_default("session_ttl_hours", 24)?
            .set_default("backup_time", "02:00")?
            .set_default("backup_retention", 7)?
            .set_default("backup_dir", "backups")?
            .set_default("rate_limit_login", 5)?
            .set_default("rate_limit_api", 100)?
            .set_default("query_profiler_enabled", false)?
            .set_default("query_profiler_threshold_ms", 100)?
            .set_default("login_lock_threshold", 5)?
            .set_default("login_lock_duration_minutes", 15)?
            .set_default("password_min_length", 12)?
            .set_default("origin", "")?
            .set_default("audit_retention_days", 365)?
            .add_source(config::Environment::with_prefix("ZRP"));

        builder.build()?.try_deserialize()
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours.max(1))
    }

    pub fn lock_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.login_lock_duration_minutes.max(1))
    }

    /// Retention is clamped to a sane range so a bad env value cannot wipe
    /// the audit trail or keep it forever.
    pub fn audit_retention_days(&self) -> i64 {
        self.audit_retention_days.clamp(30, 3650)
    }

    /// Parse `backup_time` ("HH:MM") into hour and minute, falling back to
    /// 02:00 on malformed input.
    pub fn backup_hour_minute(&self) -> (u32, u32) {
        let mut parts = self.backup_time.splitn(2, ':');
        let hour = parts.next().and_then(|p| p.parse().ok()).unwrap_or(2u32);
        let minute = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0u32);
        if hour > 23 || minute > 59 {
            (2, 0)
        } else {
            (hour, minute)
        }
    }
}

pub fn init() {
    dotenv().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            db_path: "zrp.db".into(),
            port: 8000,
            session_ttl_hours: 24,
            backup_time: "02:00".into(),
            backup_retention: 7,
            backup_dir: "backups".into(),
            rate_limit_login: 5,
            rate_limit_api: 100,
            query_profiler_enabled: false,
            query_profiler_threshold_ms: 100,
            login_lock_threshold: 5,
            login_lock_duration_minutes: 15,
            password_min_length: 12,
            origin: String::new(),
            audit_retention_days: 365,
        }
    }

    #[test]
    fn retention_is_clamped() {
        let mut cfg = base();
        cfg.audit_retention_days = 1;
        assert_eq!(cfg.audit_retention_days(), 30);
        cfg.audit_retention_days = 100_000;
        assert_eq!(cfg.audit_retention_days(), 3650);
        cfg.audit_retention_days = 90;
        assert_eq!(cfg.audit_retention_days(), 90);
    }

    #[test]
    fn backup_time_parses() {
        let mut cfg = base();
        assert_eq!(cfg.backup_hour_minute(), (2, 0));
        cfg.backup_time = "23:45".into();
        assert_eq!(cfg.backup_hour_minute(), (23, 45));
        cfg.backup_time = "99:99".into();
        assert_eq!(cfg.backup_hour_minute(), (2, 0));
        cfg.backup_time = "junk".into();
        assert_eq!(cfg.backup_hour_minute(), (2, 0));
    }
}
