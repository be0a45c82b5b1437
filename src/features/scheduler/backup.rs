use crate::error::AppError;
use crate::store::Store;
use chrono::Local;
use std::path::{Path, PathBuf};

/// Snapshot the live database with `VACUUM INTO`, then prune old backups
/// keeping the newest `retention`.
pub async fn run_backup(
    store: &Store,
    dir: &Path,
    retention: usize,
) -> Result<PathBuf, AppError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AppError::Internal(format!("create backup dir: {e}")))?;

    let stamp = Local::now().format("%Y-%m-%dT%H-%M-%S").to_string();
    let path = unique_backup_path(dir, &stamp);

    let escaped = path.display().to_string().replace('\'', "''");
    let sql = format!("VACUUM INTO '{escaped}'");
    store
        .exec("VACUUM INTO", "scheduler::backup", || {
            sqlx::query(&sql).execute(store.pool())
        })
        .await?;
    tracing::info!(path = %path.display(), "database backup written");

    let pruned = prune_backups(dir, retention)?;
    if pruned > 0 {
        tracing::info!(pruned, "removed old backups");
    }
    Ok(path)
}

/// Timestamped name, with a numeric suffix if a backup from the same
/// second already exists.
fn unique_backup_path(dir: &Path, stamp: &str) -> PathBuf {
    let base = dir.join(format!("zrp-backup-{stamp}.db"));
    if !base.exists() {
        return base;
    }
    let mut suffix = 2;
    loop {
        let candidate = dir.join(format!("zrp-backup-{stamp}-{suffix}.db"));
        if !candidate.exists() {
            return candidate;
        }
        suffix += 1;
    }
}

/// Keep the newest N backups, ordered by modification time (suffixed
/// same-second backups would sort wrongly by name alone).
fn prune_backups(dir: &Path, keep: usize) -> Result<usize, AppError> {
    let mut backups: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| AppError::Internal(format!("read backup dir: {e}")))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("zrp-backup-") && n.ends_with(".db"))
                .unwrap_or(false)
        })
        .collect();
    backups.sort_by_key(|path| {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        (modified, path.clone())
    });

    let mut pruned = 0;
    if backups.len() > keep {
        let excess = backups.len() - keep;
        for path in backups.into_iter().take(excess) {
            match std::fs::remove_file(&path) {
                Ok(()) => pruned += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to prune backup")
                }
            }
        }
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("zrp-backup-test-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn collisions_get_a_numeric_suffix() {
        let dir = temp_dir("suffix");
        std::fs::write(dir.join("zrp-backup-2026-01-01T02-00-00.db"), b"x").unwrap();
        let next = unique_backup_path(&dir, "2026-01-01T02-00-00");
        assert!(next.ends_with("zrp-backup-2026-01-01T02-00-00-2.db"));
        std::fs::write(&next, b"x").unwrap();
        let third = unique_backup_path(&dir, "2026-01-01T02-00-00");
        assert!(third.ends_with("zrp-backup-2026-01-01T02-00-00-3.db"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn prune_keeps_the_newest() {
        let dir = temp_dir("prune");
        for day in 1..=5 {
            std::fs::write(
                dir.join(format!("zrp-backup-2026-01-0{day}T02-00-00.db")),
                b"x",
            )
            .unwrap();
        }
        // An unrelated file survives pruning.
        std::fs::write(dir.join("notes.txt"), b"keep me").unwrap();

        let pruned = prune_backups(&dir, 2).unwrap();
        assert_eq!(pruned, 3);
        assert!(!dir.join("zrp-backup-2026-01-01T02-00-00.db").exists());
        assert!(dir.join("zrp-backup-2026-01-04T02-00-00.db").exists());
        assert!(dir.join("zrp-backup-2026-01-05T02-00-00.db").exists());
        assert!(dir.join("notes.txt").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
