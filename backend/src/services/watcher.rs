//! Watch-folder source
//!
//! Feeds settled files from the watch folders into the pipeline:
//!
//! ```text
//! notify (debounced) -> settle check -> bounded queue -> single consumer
//! ```
//!
//! A file is settled once its size is unchanged across the settle delay.
//! The mover's in-progress copies and non-video files are never queued. Files
//! already in the watch folders at startup go through the same settle check.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::services::file_utils::{is_temp_artifact, is_video_file};
use crate::services::pipeline::Pipeline;

const DEFAULT_DEBOUNCE_MS: u64 = 500;
const DEFAULT_SETTLE_SECS: u64 = 10;
const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Coalescing window for raw filesystem events
    pub debounce: Duration,
    /// How long a file's size must stay unchanged before it is queued
    pub settle_delay: Duration,
    /// Bound of the settled-file queue
    pub queue_capacity: usize,
    /// Subtrees never queued, such as an issues folder inside a watch folder
    pub exclude: Vec<PathBuf>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            settle_delay: Duration::from_secs(DEFAULT_SETTLE_SECS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            exclude: Vec::new(),
        }
    }
}

/// Paths currently waiting out their settle delay
#[derive(Clone, Default)]
struct PendingSet(Arc<Mutex<HashSet<PathBuf>>>);

impl PendingSet {
    /// False when the path is already being watched
    fn insert(&self, path: &Path) -> bool {
        self.0.lock().insert(path.to_path_buf())
    }

    fn remove(&self, path: &Path) {
        self.0.lock().remove(path);
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }
}

/// Whether a raw event path is worth a settle check
fn is_candidate(path: &Path, exclude: &[PathBuf]) -> bool {
    !is_temp_artifact(path) && is_video_file(path) && !exclude.iter().any(|e| path.starts_with(e))
}

/// Wait until `path` stops growing. Returns false if it disappeared.
pub async fn wait_until_settled(path: &Path, settle_delay: Duration) -> bool {
    let mut last = match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => m.len(),
        _ => return false,
    };

    loop {
        tokio::time::sleep(settle_delay).await;
        let current = match tokio::fs::metadata(path).await {
            Ok(m) if m.is_file() => m.len(),
            _ => return false,
        };
        if current == last {
            return true;
        }
        debug!(path = %path.display(), size = current, "File still growing");
        last = current;
    }
}

/// Running watch-folder source. Dropping it stops the watchers; call
/// [`WatchFolderSource::shutdown`] to also stop the background tasks.
pub struct WatchFolderSource {
    // The debouncers own the OS watchers and must stay alive
    debouncers: Vec<Debouncer<RecommendedWatcher, RecommendedCache>>,
    tasks: Vec<JoinHandle<()>>,
    pending: PendingSet,
    roots: Vec<PathBuf>,
}

impl WatchFolderSource {
    /// Watch `roots` and feed settled files to `pipeline`
    pub async fn start(pipeline: Arc<Pipeline>, roots: Vec<PathBuf>, config: WatcherConfig) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel::<PathBuf>(config.queue_capacity);
        let (queue_tx, queue_rx) = mpsc::channel::<PathBuf>(config.queue_capacity);
        let pending = PendingSet::default();

        let mut debouncers = Vec::new();
        for root in &roots {
            if tokio::fs::metadata(root).await.map(|m| m.is_dir()).unwrap_or(false) {
                debouncers.push(watch_root(root, &config, event_tx.clone())?);
                info!(path = %root.display(), "Watching folder");
            } else {
                warn!(path = %root.display(), "Watch folder does not exist, skipping");
            }
        }

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(settle_loop(
            event_rx,
            queue_tx,
            pending.clone(),
            config.settle_delay,
        )));
        tasks.push(tokio::spawn(consume(queue_rx, pipeline)));

        // Files that arrived while we were not running
        let scan_roots = roots.clone();
        let exclude = config.exclude.clone();
        let existing = tokio::task::spawn_blocking(move || initial_scan(&scan_roots, &exclude))
            .await
            .context("Initial watch folder scan panicked")?;
        if !existing.is_empty() {
            info!(count = existing.len(), "Queueing files already in watch folders");
        }
        for path in existing {
            if event_tx.send(path).await.is_err() {
                break;
            }
        }

        Ok(Self {
            debouncers,
            tasks,
            pending,
            roots,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Files waiting out their settle delay
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn shutdown(mut self) {
        self.debouncers.clear();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Watch folder source stopped");
    }
}

fn watch_root(
    root: &Path,
    config: &WatcherConfig,
    event_tx: mpsc::Sender<PathBuf>,
) -> Result<Debouncer<RecommendedWatcher, RecommendedCache>> {
    let exclude = config.exclude.clone();
    let mut debouncer = new_debouncer(config.debounce, None, move |result: DebounceEventResult| match result {
        Ok(events) => {
            for event in events {
                if !matches!(event.event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    continue;
                }
                for path in &event.event.paths {
                    if is_candidate(path, &exclude) {
                        // Runs on the notify thread, outside the runtime
                        let _ = event_tx.blocking_send(path.clone());
                    }
                }
            }
        }
        Err(errors) => {
            for e in errors {
                error!(error = ?e, "Watcher error");
            }
        }
    })
    .context("Failed to create debouncer")?;

    debouncer
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", root.display()))?;

    Ok(debouncer)
}

fn initial_scan(roots: &[PathBuf], exclude: &[PathBuf]) -> Vec<PathBuf> {
    roots
        .iter()
        .flat_map(|root| {
            WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| is_candidate(p, exclude))
                .collect::<Vec<_>>()
        })
        .collect()
}

async fn settle_loop(
    mut events: mpsc::Receiver<PathBuf>,
    queue: mpsc::Sender<PathBuf>,
    pending: PendingSet,
    settle_delay: Duration,
) {
    while let Some(path) = events.recv().await {
        if !pending.insert(&path) {
            continue;
        }
        let queue = queue.clone();
        let pending = pending.clone();
        tokio::spawn(async move {
            if wait_until_settled(&path, settle_delay).await {
                debug!(path = %path.display(), "File settled");
                if queue.send(path.clone()).await.is_err() {
                    warn!(path = %path.display(), "Intake queue closed");
                }
            } else {
                debug!(path = %path.display(), "File vanished before settling");
            }
            pending.remove(&path);
        });
    }
}

async fn consume(mut queue: mpsc::Receiver<PathBuf>, pipeline: Arc<Pipeline>) {
    while let Some(path) = queue.recv().await {
        let outcome = pipeline.process_file(&path).await;
        debug!(path = %path.display(), disposition = ?outcome.disposition, "Processed file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_candidate_filter() {
        let exclude = vec![PathBuf::from("/w/issues")];
        assert!(is_candidate(Path::new("/w/Show.S01E01.mkv"), &exclude));
        assert!(!is_candidate(Path::new("/w/Show.S01E01.mkv.intake-partial"), &exclude));
        assert!(!is_candidate(Path::new("/w/Show.S01E01.nfo"), &exclude));
        assert!(!is_candidate(Path::new("/w/issues/duplicate/Show.S01E01.mkv"), &exclude));
    }

    #[test]
    fn test_pending_set_dedupes() {
        let pending = PendingSet::default();
        assert!(pending.insert(Path::new("/w/a.mkv")));
        assert!(!pending.insert(Path::new("/w/a.mkv")));
        assert_eq!(pending.len(), 1);
        pending.remove(Path::new("/w/a.mkv"));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_settled_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.mkv");
        tokio::fs::write(&file, b"done").await.unwrap();
        assert!(wait_until_settled(&file, Duration::from_millis(20)).await);
        assert!(!wait_until_settled(&dir.path().join("gone.mkv"), Duration::from_millis(20)).await);
    }

    #[test]
    fn test_initial_scan_skips_artifacts() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("Show")).unwrap();
        std::fs::write(dir.path().join("Show/Show.S01E01.mkv"), b"x").unwrap();
        std::fs::write(dir.path().join("Show/Show.S01E02.mkv.part"), b"x").unwrap();
        std::fs::write(dir.path().join("Show/Show.S01E01.srt"), b"x").unwrap();

        let found = initial_scan(&[dir.path().to_path_buf()], &[]);
        assert_eq!(found, vec![dir.path().join("Show/Show.S01E01.mkv")]);
    }
}
