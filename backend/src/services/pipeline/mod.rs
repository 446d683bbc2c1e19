//! Watch-folder intake pipeline
//!
//! One call to [`Pipeline::process_file`] takes a settled file from the watch
//! folder to exactly one terminal place:
//! - the library, at the path its catalog entry's naming templates dictate
//! - the issues folder, with a reason code
//! - nowhere (pre-check skips and unrecoverable move failures leave it in place)
//!
//! Every run writes exactly one `pipeline_logs` record.
//!
//! ```text
//! Detected -> Parsed{TV|Movie|Unparseable} -> Matched{Found|NotFound}
//!          -> [AutoImportAttempted] -> Decided{NewFile|DuplicateExisting}
//!          -> [QualityCompared] -> Moved{Library|Issues} -> Logged
//! ```

mod auto_import;
mod movie;
mod progress;
mod tv;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::db::{
    CreatePipelineLog, Database, FolderType, LogResult, PipelineAction, PipelineLogRecord,
    PipelineSettings,
};
use crate::services::ffmpeg::MediaProbe;
use crate::services::file_mover::{
    MoveError, cleanup_empty_ancestors, move_companions, move_file, safe_copy, safe_delete_source,
    same_contents,
};
use crate::services::file_utils::{is_temp_artifact, is_video_file};
use crate::services::filename_parser::{ParsedCandidate, parse};
use crate::services::metadata::MetadataProvider;
use crate::services::organizer::{IssueReason, issues_destination};
use crate::services::quality_evaluator::{Comparison, compare};

pub use progress::{ProgressEvent, RunProgress, Stage};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Catalog entity kind, for reason codes and messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Show,
    Movie,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::Movie => "movie",
        }
    }
}

/// Why a run could not place a file in the library
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not parse '{0}' as an episode or a movie")]
    ParseFailure(String),

    #[error("no {} match for '{title}': {details}", kind.as_str())]
    MatchFailure {
        kind: MediaKind,
        title: String,
        details: String,
    },

    #[error("{} '{name}' has no library folder", kind.as_str())]
    MissingFolder { kind: MediaKind, name: String },

    #[error(transparent)]
    Io(#[from] MoveError),

    #[error("quality probe unavailable for {0}")]
    ProbeUnavailable(PathBuf),

    #[error("upgrade aborted: {0}")]
    UpgradeAbort(String),

    #[error("catalog error: {0:#}")]
    Catalog(#[from] anyhow::Error),
}

impl PipelineError {
    /// Issues-folder reason code for a file that hit this error
    pub fn issue_reason(&self) -> IssueReason {
        match self {
            Self::ParseFailure(_) => IssueReason::ParseFailed,
            Self::MatchFailure { kind: MediaKind::Show, .. } => IssueReason::ShowNotFound,
            Self::MatchFailure { kind: MediaKind::Movie, .. } => IssueReason::MovieNotFound,
            Self::MissingFolder { kind: MediaKind::Show, .. } => IssueReason::ShowNoFolder,
            Self::MissingFolder { kind: MediaKind::Movie, .. } => IssueReason::MovieNoFolder,
            Self::ProbeUnavailable(_) => IssueReason::DuplicateUnverified,
            Self::UpgradeAbort(_) => IssueReason::UpgradeAborted,
            Self::Io(_) | Self::Catalog(_) => IssueReason::MoveFailed,
        }
    }
}

/// Where a processed file ended up
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Library(PathBuf),
    Issues { reason: IssueReason, path: PathBuf },
    /// Pre-check rejected the file; it was not touched
    Skipped(String),
    /// Routing failed and the file could not be quarantined either
    LeftInPlace(String),
}

/// Result of one run
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub source: PathBuf,
    pub disposition: Disposition,
    /// The audit record, absent only if the log write itself failed
    pub log: Option<PipelineLogRecord>,
}

/// Decision a media flow hands back to the orchestrator
#[derive(Debug)]
enum Route {
    /// The flow already moved the file into the library
    Library {
        dest: PathBuf,
        action: PipelineAction,
        media_ref: String,
        details: String,
    },
    /// The file belongs in the issues folder
    Issues {
        reason: IssueReason,
        media_ref: Option<String>,
        details: String,
    },
}

impl From<PipelineError> for Route {
    fn from(e: PipelineError) -> Self {
        Route::Issues {
            reason: e.issue_reason(),
            media_ref: None,
            details: e.to_string(),
        }
    }
}

/// Settings and paths resolved once at the start of a run
struct RunContext {
    settings: PipelineSettings,
    issues_root: PathBuf,
    /// Directories empty-folder cleanup never climbs past
    cleanup_roots: Vec<PathBuf>,
    tv_roots: Vec<PathBuf>,
    movie_roots: Vec<PathBuf>,
    today: NaiveDate,
}

/// The intake orchestrator
pub struct Pipeline {
    db: Database,
    probe: Arc<dyn MediaProbe>,
    providers: Vec<Arc<dyn MetadataProvider>>,
    default_issues_root: PathBuf,
}

impl Pipeline {
    pub fn new(
        db: Database,
        probe: Arc<dyn MediaProbe>,
        providers: Vec<Arc<dyn MetadataProvider>>,
        default_issues_root: PathBuf,
    ) -> Self {
        Self {
            db,
            probe,
            providers,
            default_issues_root,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Main Public API
    // =========================================================================

    /// Route one settled file. Never fails; the outcome says what happened.
    pub async fn process_file(&self, path: &Path) -> ProcessOutcome {
        self.process_file_with_progress(path, &RunProgress::disabled()).await
    }

    pub async fn process_file_with_progress(&self, path: &Path, progress: &RunProgress) -> ProcessOutcome {
        progress.report(path, Stage::Detected, "file detected");
        let ctx = self.run_context().await;

        if let Some(reason) = self.precheck(path, &ctx).await {
            debug!(path = %path.display(), reason = %reason, "Skipping file");
            let log = self
                .write_log(
                    path,
                    PipelineAction::Skipped,
                    LogResult::Skipped,
                    None,
                    reason.clone(),
                    progress,
                )
                .await;
            return ProcessOutcome {
                source: path.to_path_buf(),
                disposition: Disposition::Skipped(reason),
                log,
            };
        }

        let file_name = file_name_of(path);
        let candidate = parse(&file_name);
        progress.report(path, Stage::Parsed, parsed_label(&candidate));

        let routed = match candidate {
            ParsedCandidate::Tv(tv) => self.process_tv(&ctx, path, tv, progress).await,
            ParsedCandidate::Movie(movie) => self.process_movie(&ctx, path, movie, progress).await,
            ParsedCandidate::Unparsed => Err(PipelineError::ParseFailure(file_name.clone())),
        };

        let route = routed.unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "File not placed in library");
            Route::from(e)
        });

        match route {
            Route::Library {
                dest,
                action,
                media_ref,
                details,
            } => {
                info!(
                    source = %path.display(),
                    dest = %dest.display(),
                    action = action.as_str(),
                    "File placed in library"
                );
                progress.report(path, Stage::Moved, dest.display().to_string());
                self.cleanup_source_dir(&ctx, path).await;
                let log = self
                    .write_log(path, action, LogResult::Success, Some(media_ref), details, progress)
                    .await;
                ProcessOutcome {
                    source: path.to_path_buf(),
                    disposition: Disposition::Library(dest),
                    log,
                }
            }
            Route::Issues {
                reason,
                media_ref,
                details,
            } => self.route_to_issues(&ctx, path, reason, media_ref, details, progress).await,
        }
    }

    // =========================================================================
    // Run setup
    // =========================================================================

    async fn run_context(&self) -> RunContext {
        let settings = match self.db.settings().load_pipeline_settings().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Failed to load pipeline settings, using defaults");
                PipelineSettings::default()
            }
        };

        let issues_root = settings
            .issues_folder
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_issues_root.clone());

        let folders = match self.db.scan_folders().list_enabled().await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "Failed to load scan folders");
                Vec::new()
            }
        };

        let roots_of = |kind: FolderType| -> Vec<PathBuf> {
            folders
                .iter()
                .filter(|f| f.folder_type == kind)
                .map(|f| PathBuf::from(&f.path))
                .collect()
        };
        let tv_roots = roots_of(FolderType::Tv);
        let movie_roots = roots_of(FolderType::Movies);

        let mut cleanup_roots: Vec<PathBuf> = folders.iter().map(|f| PathBuf::from(&f.path)).collect();
        cleanup_roots.push(issues_root.clone());

        RunContext {
            settings,
            issues_root,
            cleanup_roots,
            tv_roots,
            movie_roots,
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Reason to leave the file alone, if any
    async fn precheck(&self, path: &Path, ctx: &RunContext) -> Option<String> {
        if is_temp_artifact(path) {
            return Some("in-progress copy artifact".to_string());
        }

        // A quarantined file must never be routed again
        if path.starts_with(&ctx.issues_root) {
            return Some("already in the issues folder".to_string());
        }

        let meta = match tokio::fs::metadata(path).await {
            Ok(m) if m.is_file() => m,
            _ => return Some("file no longer exists".to_string()),
        };

        if !is_video_file(path) {
            return Some("not a video file".to_string());
        }

        let min_bytes = ctx.settings.min_file_size_mb.saturating_mul(BYTES_PER_MB);
        if meta.len() < min_bytes {
            return Some(format!(
                "below minimum size ({} bytes < {} MB)",
                meta.len(),
                ctx.settings.min_file_size_mb
            ));
        }

        None
    }

    // =========================================================================
    // Shared placement steps
    // =========================================================================

    /// Copy `src` to `dest`, commit the catalog claim, then bring companions
    /// over and remove the source. A failed claim removes the fresh copy.
    async fn install<F, Fut>(&self, ctx: &RunContext, src: &Path, dest: &Path, claim: F) -> Result<(), PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>>,
    {
        let copied = safe_copy(src, dest).await?;

        if let Err(e) = claim().await {
            if copied {
                if let Err(rm) = tokio::fs::remove_file(dest).await {
                    warn!(path = %dest.display(), error = %rm, "Failed to remove copy after catalog error");
                }
            }
            return Err(PipelineError::Catalog(e));
        }

        let companions = move_companions(src, dest, &ctx.settings.companion_extensions).await;
        if !companions.is_empty() {
            debug!(count = companions.len(), dest = %dest.display(), "Moved companion files");
        }

        safe_delete_source(src).await;
        Ok(())
    }

    /// Probe both copies and rank them
    async fn compare_quality(&self, ctx: &RunContext, existing: &Path, incoming: &Path) -> Result<Comparison, PipelineError> {
        let existing_profile = self
            .probe
            .analyze(existing)
            .await
            .ok_or_else(|| PipelineError::ProbeUnavailable(existing.to_path_buf()))?;
        let incoming_profile = self
            .probe
            .analyze(incoming)
            .await
            .ok_or_else(|| PipelineError::ProbeUnavailable(incoming.to_path_buf()))?;

        let result = compare(&existing_profile, &incoming_profile, &ctx.settings.quality_priorities);
        debug!(
            existing = %existing_profile.summary(),
            incoming = %incoming_profile.summary(),
            result = result.as_str(),
            "Compared duplicate quality"
        );
        Ok(result)
    }

    /// Move a library file that lost to a better copy into the issues folder
    /// as "<Owner Name> - <old file name>". On error the old file is still in
    /// its slot and nothing was left behind in the issues folder.
    async fn displace_existing(&self, ctx: &RunContext, existing: &Path, owner_name: &str) -> Result<PathBuf, PipelineError> {
        let name = crate::services::organizer::replaced_file_name(owner_name, &file_name_of(existing));
        let dest = issues_destination(
            &ctx.issues_root,
            IssueReason::Replaced,
            ctx.settings.issues_organization,
            &name,
            ctx.today,
        )
        .await;

        move_file(existing, &dest)
            .await
            .map_err(|e| PipelineError::UpgradeAbort(format!("could not move old file {}: {}", existing.display(), e)))?;
        move_companions(existing, &dest, &ctx.settings.companion_extensions).await;

        info!(old = %existing.display(), dest = %dest.display(), "Moved replaced file to issues");
        Ok(dest)
    }

    // =========================================================================
    // Terminal handling
    // =========================================================================

    async fn route_to_issues(
        &self,
        ctx: &RunContext,
        path: &Path,
        reason: IssueReason,
        media_ref: Option<String>,
        details: String,
        progress: &RunProgress,
    ) -> ProcessOutcome {
        let dest = issues_destination(
            &ctx.issues_root,
            reason,
            ctx.settings.issues_organization,
            &file_name_of(path),
            ctx.today,
        )
        .await;

        match move_file(path, &dest).await {
            Ok(()) => {
                move_companions(path, &dest, &ctx.settings.companion_extensions).await;
                info!(
                    source = %path.display(),
                    dest = %dest.display(),
                    reason = %reason,
                    "File moved to issues"
                );
                progress.report(path, Stage::Moved, dest.display().to_string());
                self.cleanup_source_dir(ctx, path).await;

                // The quarantine itself succeeded; the reason code carries the problem
                let log = self
                    .write_log(
                        path,
                        PipelineAction::MovedToIssues,
                        LogResult::Success,
                        media_ref,
                        format!("{}: {} -> {}", reason, details, dest.display()),
                        progress,
                    )
                    .await;
                ProcessOutcome {
                    source: path.to_path_buf(),
                    disposition: Disposition::Issues { reason, path: dest },
                    log,
                }
            }
            Err(e) => {
                error!(
                    source = %path.display(),
                    reason = %reason,
                    error = %e,
                    "Could not move file to issues, leaving it in place"
                );
                let message = format!("{}: {}; issues move failed: {}", reason, details, e);
                let log = self
                    .write_log(
                        path,
                        PipelineAction::Error,
                        LogResult::Failed,
                        media_ref,
                        message.clone(),
                        progress,
                    )
                    .await;
                ProcessOutcome {
                    source: path.to_path_buf(),
                    disposition: Disposition::LeftInPlace(message),
                    log,
                }
            }
        }
    }

    async fn cleanup_source_dir(&self, ctx: &RunContext, path: &Path) {
        if !ctx.settings.cleanup_empty_source_folders {
            return;
        }
        if let Some(parent) = path.parent() {
            let removed = cleanup_empty_ancestors(parent, &ctx.cleanup_roots).await;
            if removed > 0 {
                debug!(path = %parent.display(), removed, "Removed empty source folders");
            }
        }
    }

    async fn write_log(
        &self,
        path: &Path,
        action: PipelineAction,
        result: LogResult,
        media_ref: Option<String>,
        details: String,
        progress: &RunProgress,
    ) -> Option<PipelineLogRecord> {
        let entry = CreatePipelineLog {
            action_type: action,
            result,
            file_path: Some(path.to_string_lossy().to_string()),
            media_ref,
            details,
        };

        match self.db.pipeline_logs().create(entry).await {
            Ok(record) => {
                progress.report(path, Stage::Logged, record.details.clone());
                Some(record)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to write pipeline log");
                None
            }
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn parsed_label(candidate: &ParsedCandidate) -> String {
    match candidate {
        ParsedCandidate::Tv(tv) => format!("tv: {} S{:02}E{:02}", tv.title, tv.season, tv.episode),
        ParsedCandidate::Movie(m) => match m.year {
            Some(y) => format!("movie: {} ({})", m.title, y),
            None => format!("movie: {}", m.title),
        },
        ParsedCandidate::Unparsed => "unparseable".to_string(),
    }
}

/// Whether a catalog claim still points at a real file
async fn claim_is_live(file_path: Option<&str>) -> Option<PathBuf> {
    let path = PathBuf::from(file_path?);
    match tokio::fs::metadata(&path).await {
        Ok(m) if m.is_file() => Some(path),
        _ => None,
    }
}

/// A different file already sitting at `dest` without a catalog claim.
/// A byte-identical leftover of an interrupted earlier run is not reported.
async fn unclaimed_occupant(src: &Path, dest: &Path) -> Option<PathBuf> {
    match tokio::fs::metadata(dest).await {
        Ok(m) if m.is_file() => {}
        _ => return None,
    }
    (!same_contents(src, dest).await).then(|| dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_error_reason_codes() {
        assert_eq!(
            PipelineError::ParseFailure("x".into()).issue_reason(),
            IssueReason::ParseFailed
        );
        assert_eq!(
            PipelineError::MatchFailure {
                kind: MediaKind::Show,
                title: "x".into(),
                details: "none".into()
            }
            .issue_reason(),
            IssueReason::ShowNotFound
        );
        assert_eq!(
            PipelineError::MissingFolder { kind: MediaKind::Movie, name: "x".into() }.issue_reason(),
            IssueReason::MovieNoFolder
        );
        assert_eq!(
            PipelineError::Io(MoveError::SourceMissing("a".into())).issue_reason(),
            IssueReason::MoveFailed
        );
        assert_eq!(
            PipelineError::Catalog(anyhow::anyhow!("db")).issue_reason(),
            IssueReason::MoveFailed
        );
    }

    #[test]
    fn test_error_into_route_keeps_message() {
        let route = Route::from(PipelineError::UpgradeAbort("old file locked".into()));
        assert_matches!(
            route,
            Route::Issues { reason: IssueReason::UpgradeAborted, ref details, .. } if details.contains("old file locked")
        );
    }

    #[tokio::test]
    async fn test_claim_is_live() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.mkv");
        assert!(claim_is_live(None).await.is_none());
        assert!(claim_is_live(file.to_str()).await.is_none());
        tokio::fs::write(&file, b"x").await.unwrap();
        assert_eq!(claim_is_live(file.to_str()).await, Some(file));
    }

    #[tokio::test]
    async fn test_unclaimed_occupant_ignores_finished_copies() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("src.mkv");
        let dest = dir.path().join("dest.mkv");
        tokio::fs::write(&src, b"same").await.unwrap();
        assert!(unclaimed_occupant(&src, &dest).await.is_none());

        tokio::fs::write(&dest, b"same").await.unwrap();
        assert!(unclaimed_occupant(&src, &dest).await.is_none());

        tokio::fs::write(&dest, b"diff").await.unwrap();
        assert_eq!(unclaimed_occupant(&src, &dest).await, Some(dest.clone()));

        tokio::fs::write(&dest, b"different size").await.unwrap();
        assert_eq!(unclaimed_occupant(&src, &dest).await, Some(dest));
    }
}
