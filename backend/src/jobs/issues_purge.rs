//! Issues folder auto-purge
//!
//! Deletes files in the issues folder older than `issues_auto_purge_days`,
//! then removes the directories that leaves empty. The issues root itself is
//! never removed.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::db::Database;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeStats {
    pub files_removed: usize,
    pub dirs_removed: usize,
}

/// Run the purge against the configured issues folder
pub async fn run(db: Database, default_issues_root: PathBuf) -> Result<PurgeStats> {
    let settings = db
        .settings()
        .load_pipeline_settings()
        .await
        .context("Failed to load pipeline settings")?;

    if settings.issues_auto_purge_days == 0 {
        debug!("Issues auto-purge disabled");
        return Ok(PurgeStats::default());
    }

    let root = settings
        .issues_folder
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or(default_issues_root);
    let max_age = Duration::from_secs(u64::from(settings.issues_auto_purge_days) * SECS_PER_DAY);

    let stats = tokio::task::spawn_blocking(move || purge_older_than(&root, max_age, SystemTime::now()))
        .await
        .context("Issues purge task panicked")?;

    if stats.files_removed > 0 || stats.dirs_removed > 0 {
        info!(
            files = stats.files_removed,
            dirs = stats.dirs_removed,
            days = settings.issues_auto_purge_days,
            "Purged old issues"
        );
    }
    Ok(stats)
}

/// Remove files under `root` last modified more than `max_age` before `now`
pub fn purge_older_than(root: &Path, max_age: Duration, now: SystemTime) -> PurgeStats {
    let mut stats = PurgeStats::default();
    if !root.is_dir() {
        return stats;
    }

    for entry in WalkDir::new(root).follow_links(false).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
            Some(t) => t,
            None => continue,
        };
        let expired = now.duration_since(modified).map(|age| age > max_age).unwrap_or(false);
        if !expired {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "Purged issues file");
                stats.files_removed += 1;
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to purge issues file"),
        }
    }

    // Deepest first so parents see their children gone
    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_dir() && std::fs::remove_dir(entry.path()).is_ok() {
            stats.dirs_removed += 1;
        }
    }

    stats
}
