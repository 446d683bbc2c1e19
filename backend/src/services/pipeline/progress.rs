//! Per-run progress reporting
//!
//! A [`RunProgress`] is created by whoever starts a run and handed to
//! [`Pipeline::process_file_with_progress`](super::Pipeline::process_file_with_progress).
//! Events are delivered on an unbounded channel; a dropped receiver is ignored.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::mpsc;

/// Pipeline state a run has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detected,
    Parsed,
    Matched,
    AutoImportAttempted,
    Decided,
    QualityCompared,
    Moved,
    Logged,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub path: PathBuf,
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunProgress {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl RunProgress {
    /// A handle plus the receiver its events arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A handle that drops every event
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn report(&self, path: &Path, stage: Stage, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressEvent {
                path: path.to_path_buf(),
                stage,
                message: message.into(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (progress, mut rx) = RunProgress::channel();
        let path = Path::new("/watch/a.mkv");
        progress.report(path, Stage::Detected, "start");
        progress.report(path, Stage::Parsed, "tv");
        drop(progress);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.stage, Stage::Detected);
        assert_eq!(rx.recv().await.unwrap().message, "tv");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_disabled_and_closed_handles_do_not_panic() {
        RunProgress::disabled().report(Path::new("x"), Stage::Logged, "ignored");

        let (progress, rx) = RunProgress::channel();
        drop(rx);
        progress.report(Path::new("x"), Stage::Logged, "receiver gone");
    }
}
