pub mod backup;

use crate::config::Config;
use crate::error::AppError;
use crate::features::audit::AuditService;
use crate::features::auth::AuthService;
use crate::features::notifications::NotificationService;
use crate::features::undo::UndoService;
use crate::store::Store;
use cron::Schedule;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

const EMAIL_DRAIN_PERIOD: Duration = Duration::from_secs(60);
const SESSION_GC_PERIOD: Duration = Duration::from_secs(600);
const UNDO_GC_PERIOD: Duration = Duration::from_secs(3600);
/// Audit retention runs in the quiet hours, away from the backup slot.
const AUDIT_RETENTION_CRON: &str = "0 30 3 * * *";

pub struct Scheduler {
    pub store: Store,
    pub config: Arc<Config>,
    pub auth: AuthService,
    pub audit: AuditService,
    pub undo: UndoService,
    pub notifications: NotificationService,
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal every task and wait for them to wind down. In-flight work
    /// finishes its current run first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

impl Scheduler {
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        // Backup and email each hold a mutex so runs cannot overlap even if
        // a tick fires while the previous run is still going.
        let backup_lock = Arc::new(Mutex::new(()));
        let email_lock = Arc::new(Mutex::new(()));

        {
            let notifications = self.notifications.clone();
            let email_lock = email_lock.clone();
            tasks.push(spawn_periodic(
                "email_drain",
                EMAIL_DRAIN_PERIOD,
                shutdown_rx.clone(),
                move || {
                    let notifications = notifications.clone();
                    let email_lock = email_lock.clone();
                    async move {
                        let _guard = email_lock.lock().await;
                        let sent = notifications.drain_email_queue().await?;
                        if sent > 0 {
                            tracing::info!(sent, "notification emails dispatched");
                        }
                        Ok(())
                    }
                },
            ));
        }

        {
            let auth = self.auth.clone();
            tasks.push(spawn_periodic(
                "session_gc",
                SESSION_GC_PERIOD,
                shutdown_rx.clone(),
                move || {
                    let auth = auth.clone();
                    async move {
                        let removed = auth.delete_expired_sessions().await?;
                        if removed > 0 {
                            tracing::debug!(removed, "expired sessions deleted");
                        }
                        Ok(())
                    }
                },
            ));
        }

        {
            let undo = self.undo.clone();
            tasks.push(spawn_periodic(
                "undo_gc",
                UNDO_GC_PERIOD,
                shutdown_rx.clone(),
                move || {
                    let undo = undo.clone();
                    async move {
                        let removed = undo.delete_expired().await?;
                        if removed > 0 {
                            tracing::debug!(removed, "expired undo entries deleted");
                        }
                        Ok(())
                    }
                },
            ));
        }

        {
            let (hour, minute) = self.config.backup_hour_minute();
            let expr = format!("0 {minute} {hour} * * *");
            let schedule = Schedule::from_str(&expr)
                .unwrap_or_else(|_| Schedule::from_str("0 0 2 * * *").expect("static cron"));
            let store = self.store.clone();
            let dir = PathBuf::from(&self.config.backup_dir);
            let retention = self.config.backup_retention;
            let backup_lock = backup_lock.clone();
            tasks.push(spawn_daily(
                "backup",
                schedule,
                shutdown_rx.clone(),
                move || {
                    let store = store.clone();
                    let dir = dir.clone();
                    let backup_lock = backup_lock.clone();
                    async move {
                        let _guard = backup_lock.lock().await;
                        backup::run_backup(&store, &dir, retention).await?;
                        Ok(())
                    }
                },
            ));
        }

        {
            let schedule = Schedule::from_str(AUDIT_RETENTION_CRON).expect("static cron");
            let audit = self.audit.clone();
            let days = self.config.audit_retention_days();
            tasks.push(spawn_daily(
                "audit_retention",
                schedule,
                shutdown_rx.clone(),
                move || {
                    let audit = audit.clone();
                    async move {
                        let removed = audit.delete_older_than(days).await?;
                        if removed > 0 {
                            tracing::info!(removed, days, "audit retention sweep");
                        }
                        Ok(())
                    }
                },
            ));
        }

        SchedulerHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// Fixed-period task loop. Each run executes in its own spawned task so a
/// panic is contained and the loop carries on at the next tick.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => run_contained(name, task()).await,
                _ = shutdown.changed() => {
                    tracing::debug!(task = name, "scheduler task stopping");
                    break;
                }
            }
        }
    })
}

/// Daily task at a local wall-clock time.
fn spawn_daily<F, Fut>(
    name: &'static str,
    schedule: Schedule,
    mut shutdown: watch::Receiver<bool>,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(chrono::Local).next() else {
                break;
            };
            let wait = (next - chrono::Local::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => run_contained(name, task()).await,
                _ = shutdown.changed() => {
                    tracing::debug!(task = name, "scheduler task stopping");
                    break;
                }
            }
        }
    })
}

async fn run_contained<Fut>(name: &'static str, fut: Fut)
where
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(task = name, error = %e, "scheduled task failed");
        }
        Err(join_err) if join_err.is_panic() => {
            tracing::error!(task = name, "scheduled task panicked");
        }
        Err(_) => {}
    }
}
