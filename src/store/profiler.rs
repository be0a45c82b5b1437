use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

const RING_CAPACITY: usize = 1000;
const RECENT_LIMIT: usize = 50;
const TOP_LIMIT: usize = 10;

/// One recorded query execution.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRecord {
    pub sql: String,
    pub caller: String,
    pub duration_ms: u64,
    pub rows: Option<u64>,
    pub at: DateTime<Utc>,
}

/// Read-only view returned by `snapshot()`.
#[derive(Debug, Serialize)]
pub struct ProfilerSnapshot {
    pub total: u64,
    pub slow_count: u64,
    pub top_by_duration: Vec<QueryRecord>,
    pub recent: Vec<QueryRecord>,
}

#[derive(Default)]
struct ProfilerInner {
    total: u64,
    slow_count: u64,
    ring: VecDeque<QueryRecord>,
}

/// In-memory query profiler. Keeps the most recent executions in a fixed
/// ring and appends queries slower than the threshold to a log file.
pub struct QueryProfiler {
    enabled: bool,
    threshold: Duration,
    slow_log_path: Option<PathBuf>,
    inner: Mutex<ProfilerInner>,
}

impl QueryProfiler {
    pub fn new(enabled: bool, threshold_ms: u64, slow_log_path: Option<PathBuf>) -> Self {
        Self {
            enabled,
            threshold: Duration::from_millis(threshold_ms),
            slow_log_path,
            inner: Mutex::new(ProfilerInner::default()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, u64::MAX, None)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&self, sql: &str, caller: &str, duration: Duration, rows: Option<u64>) {
        if !self.enabled {
            return;
        }

        let record = QueryRecord {
            sql: sql.to_string(),
            caller: caller.to_string(),
            duration_ms: duration.as_millis() as u64,
            rows,
            at: Utc::now(),
        };
        let slow = duration >= self.threshold;

        {
            let mut inner = self.inner.lock().expect("profiler lock poisoned");
            inner.total += 1;
            if slow {
                inner.slow_count += 1;
            }
            if inner.ring.len() == RING_CAPACITY {
                inner.ring.pop_front();
            }
            inner.ring.push_back(record.clone());
        }

        if slow {
            tracing::warn!(
                sql = %record.sql,
                caller = %record.caller,
                duration_ms = record.duration_ms,
                "slow query"
            );
            self.append_slow_log(&record);
        }
    }

    fn append_slow_log(&self, record: &QueryRecord) {
        let Some(path) = &self.slow_log_path else {
            return;
        };
        let line = format!(
            "[{}] {}ms rows={} caller={} sql={}\n",
            record.at.to_rfc3339(),
            record.duration_ms,
            record
                .rows
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.caller,
            record.sql,
        );
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(error = %e, path = %path.display(), "failed to append slow query log");
        }
    }

    pub fn snapshot(&self) -> ProfilerSnapshot {
        let inner = self.inner.lock().expect("profiler lock poisoned");

        let mut top: Vec<QueryRecord> = inner.ring.iter().cloned().collect();
        top.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
        top.truncate(TOP_LIMIT);

        let recent: Vec<QueryRecord> = inner
            .ring
            .iter()
            .rev()
            .take(RECENT_LIMIT)
            .cloned()
            .collect();

        ProfilerSnapshot {
            total: inner.total,
            slow_count: inner.slow_count,
            top_by_duration: top,
            recent,
        }
    }
}
