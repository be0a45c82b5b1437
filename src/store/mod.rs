pub mod migrations;
pub mod profiler;

use crate::config::Config;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteQueryResult,
};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use profiler::{ProfilerSnapshot, QueryProfiler};

/// The single shared database handle. SQLite with WAL journalling and
/// foreign keys on; writes are serialised by SQLite's own write lock.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    profiler: Arc<QueryProfiler>,
}

impl Store {
    pub async fn connect(config: &Config) -> Result<Self, sqlx::Error> {
        let slow_log = if config.query_profiler_enabled {
            Some(slow_log_path(&config.db_path))
        } else {
            None
        };
        let profiler = Arc::new(QueryProfiler::new(
            config.query_profiler_enabled,
            config.query_profiler_threshold_ms,
            slow_log,
        ));
        Self::connect_with(&config.db_path, profiler).await
    }

    pub async fn connect_with(
        db_path: &str,
        profiler: Arc<QueryProfiler>,
    ) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        Ok(Self { pool, profiler })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        migrations::run(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction. Committed explicitly; rolled back when dropped
    /// on an error or panic path.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Profiled mutation. `run` must rebuild its query on every call: a
    /// SQLITE_BUSY failure is retried exactly once.
    pub async fn exec<F, Fut>(
        &self,
        sql: &str,
        caller: &str,
        run: F,
    ) -> Result<SqliteQueryResult, sqlx::Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<SqliteQueryResult, sqlx::Error>>,
    {
        let mut retried = false;
        loop {
            let started = Instant::now();
            let result = run().await;
            let elapsed = started.elapsed();
            match result {
                Ok(done) => {
                    self.profiler
                        .record(sql, caller, elapsed, Some(done.rows_affected()));
                    return Ok(done);
                }
                Err(e) if !retried && is_busy(&e) => {
                    self.profiler.record(sql, caller, elapsed, None);
                    tracing::debug!(sql, "retrying busy statement");
                    retried = true;
                }
                Err(e) => {
                    self.profiler.record(sql, caller, elapsed, None);
                    return Err(e);
                }
            }
        }
    }

    /// Profiled read. Row counts are not tracked for fetches.
    pub async fn profiled<T, F, Fut>(&self, sql: &str, caller: &str, run: F) -> Result<T, sqlx::Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut retried = false;
        loop {
            let started = Instant::now();
            let result = run().await;
            let elapsed = started.elapsed();
            self.profiler.record(sql, caller, elapsed, None);
            match result {
                Err(e) if !retried && is_busy(&e) => {
                    retried = true;
                }
                other => return other,
            }
        }
    }

    pub fn profiler_snapshot(&self) -> ProfilerSnapshot {
        self.profiler.snapshot()
    }

    pub fn profiler(&self) -> &QueryProfiler {
        &self.profiler
    }
}

fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("5") || db.message().contains("database is locked")
        }
        _ => false,
    }
}

fn slow_log_path(db_path: &str) -> PathBuf {
    Path::new(db_path)
        .parent()
        .map(|dir| dir.join("slow_queries.log"))
        .unwrap_or_else(|| PathBuf::from("slow_queries.log"))
}
