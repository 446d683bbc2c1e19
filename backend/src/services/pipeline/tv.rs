//! Episode flow: match a parsed episode to a show, then place or quarantine it

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    MediaKind, Pipeline, PipelineError, Route, RunContext, RunProgress, Stage, claim_is_live, file_name_of,
    unclaimed_occupant,
};
use crate::db::{EpisodeRecord, PipelineAction, ShowRecord};
use crate::services::filename_parser::{TvCandidate, clean_title};
use crate::services::organizer::{IssueReason, TemplateValues, episode_destination};
use crate::services::quality_evaluator::Comparison;
use crate::services::text_utils::{CATALOG_MATCH_THRESHOLD, find_best_match, title_similarity};

static SEASON_DIR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:season|series|staffel)[ ._-]*\d{1,4}|s\d{1,2}|specials|extras)$").unwrap()
});

/// Everything from a season marker onwards in a release folder name
static FOLDER_TAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[ ._-]+(?:s\d{1,2}(?:e\d{1,3})?|season[ ._-]?\d{1,2}|complete)(?:[ ._-].*)?$").unwrap()
});

/// Best score of `title` against a show's name and aliases. A known year
/// that disagrees only breaks ties between same-named shows.
pub(super) fn show_score(show: &ShowRecord, title: &str, year: Option<i32>) -> f64 {
    let base = show
        .match_names()
        .map(|name| title_similarity(title, name))
        .fold(0.0, f64::max);
    match (year, show.year) {
        (Some(q), Some(c)) if q != c => (base - 0.01).max(0.0),
        _ => base,
    }
}

/// Title from the enclosing release folder, for files named only "S01E01.mkv"
pub(super) fn folder_title(path: &Path, roots: &[PathBuf]) -> Option<String> {
    for dir in path.ancestors().skip(1).take(2) {
        if roots.iter().any(|r| r == dir) {
            return None;
        }
        let name = dir.file_name()?.to_str()?;
        if SEASON_DIR_RE.is_match(name) {
            continue;
        }
        let title = clean_title(&FOLDER_TAIL_RE.replace(name, ""));
        if !title.is_empty() {
            return Some(title);
        }
    }
    None
}

impl Pipeline {
    pub(super) async fn process_tv(
        &self,
        ctx: &RunContext,
        path: &Path,
        candidate: TvCandidate,
        progress: &RunProgress,
    ) -> Result<Route, PipelineError> {
        let title = if candidate.title.trim().is_empty() {
            folder_title(path, &ctx.cleanup_roots)
                .ok_or_else(|| PipelineError::ParseFailure(file_name_of(path)))?
        } else {
            candidate.title.clone()
        };

        // Match against the catalog, falling back to auto-import
        let shows = self.db.shows().list_all().await?;
        let matched = find_best_match(&shows, CATALOG_MATCH_THRESHOLD, |s| {
            show_score(s, &title, candidate.year)
        })
        .map(|m| (m.item.clone(), m.score));

        let mut imported_from: Option<&'static str> = None;
        let show = match matched {
            Some((show, score)) => {
                debug!(title = %title, show = %show.name, score, "Matched show");
                progress.report(path, Stage::Matched, format!("matched show '{}'", show.name));
                show
            }
            None => {
                progress.report(path, Stage::Matched, format!("no catalog show for '{}'", title));
                let (show, source) = self.import_show(ctx, &title, candidate.year).await?;
                progress.report(
                    path,
                    Stage::AutoImportAttempted,
                    format!("imported '{}' from {}", show.name, source),
                );
                imported_from = Some(source);
                show
            }
        };

        let show_folder = show
            .folder_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| PipelineError::MissingFolder {
                kind: MediaKind::Show,
                name: show.name.clone(),
            })?;

        // Every episode in the range; gaps in the catalog are not fatal
        let season = candidate.season as i32;
        let mut episodes: Vec<EpisodeRecord> = Vec::new();
        for number in candidate.episode_numbers() {
            match self.db.episodes().get_by_number(show.id, season, number as i32).await? {
                Some(ep) => episodes.push(ep),
                None => debug!(
                    show = %show.name,
                    season,
                    episode = number,
                    "Episode not in catalog, placing file anyway"
                ),
            }
        }
        let driving = episodes
            .iter()
            .find(|e| e.episode == candidate.episode as i32)
            .cloned();

        let values = TemplateValues {
            show: Some(show.name.clone()),
            year: show.year,
            season: Some(candidate.season),
            episode: Some(candidate.episode),
            episode_end: candidate.episode_end,
            title: driving.as_ref().and_then(|e| e.title.clone()),
            quality: candidate.quality.clone(),
            edition: None,
        };
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let dest = episode_destination(
            &show_folder,
            &show.season_naming_template,
            &show.episode_naming_template,
            &values,
            &extension,
        );
        let media_ref = format!("show:{}/S{:02}E{:02}", show.id, candidate.season, candidate.episode);
        let ids: Vec<Uuid> = episodes.iter().map(|e| e.id).collect();

        // Status is re-read right before acting
        let current = match &driving {
            Some(ep) => self.db.episodes().get_by_id(ep.id).await?,
            None => None,
        };
        let existing = match &current {
            Some(ep) if !ep.file_status.is_missing() => claim_is_live(ep.file_path.as_deref()).await,
            _ => None,
        };
        let existing = match existing {
            Some(p) => Some(p),
            None => unclaimed_occupant(path, &dest).await,
        };

        let Some(existing) = existing else {
            progress.report(path, Stage::Decided, "new file");
            self.install_episode(ctx, path, &dest, ids).await?;

            let (action, details) = match imported_from {
                Some(source) => (
                    PipelineAction::AutoImport,
                    format!("imported '{}' from {}; placed at {}", show.name, source, dest.display()),
                ),
                None => (
                    PipelineAction::MovedToLibrary,
                    format!("placed at {}", dest.display()),
                ),
            };
            return Ok(Route::Library {
                dest,
                action,
                media_ref,
                details,
            });
        };

        progress.report(path, Stage::Decided, format!("duplicate of {}", existing.display()));
        let comparison = self.compare_quality(ctx, &existing, path).await?;
        progress.report(path, Stage::QualityCompared, comparison.as_str());

        match comparison {
            Comparison::NewBetter => {
                let replaced = self.displace_existing(ctx, &existing, &show.name).await?;

                if let Err(e) = self.install_episode(ctx, path, &dest, ids.clone()).await {
                    // The old file is already out; release the claims on it
                    for id in &ids {
                        if let Err(release) = self.db.episodes().mark_missing(*id).await {
                            warn!(episode_id = %id, error = %release, "Failed to release episode after aborted upgrade");
                        }
                    }
                    return Err(e);
                }

                info!(show = %show.name, dest = %dest.display(), "Upgraded episode");
                Ok(Route::Library {
                    details: format!(
                        "upgraded {}; previous copy moved to {}",
                        dest.display(),
                        replaced.display()
                    ),
                    dest,
                    action: PipelineAction::QualityUpgrade,
                    media_ref,
                })
            }
            Comparison::ExistingBetter | Comparison::Equal => Ok(Route::Issues {
                reason: IssueReason::Duplicate,
                media_ref: Some(media_ref),
                details: format!(
                    "library copy {} is {}",
                    existing.display(),
                    if comparison == Comparison::Equal { "of equal quality" } else { "better" }
                ),
            }),
        }
    }

    async fn install_episode(
        &self,
        ctx: &RunContext,
        src: &Path,
        dest: &Path,
        episode_ids: Vec<Uuid>,
    ) -> Result<(), PipelineError> {
        let repo = self.db.episodes();
        let dest_str = dest.to_string_lossy().to_string();
        self.install(ctx, src, dest, move || async move {
            for id in episode_ids {
                repo.mark_found(id, &dest_str).await?;
            }
            Ok::<_, anyhow::Error>(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_folder_title_skips_season_dirs() {
        let roots = vec![PathBuf::from("/watch")];
        assert_eq!(
            folder_title(Path::new("/watch/Breaking.Bad.S01.1080p/Season 1/S01E01.mkv"), &roots),
            Some("Breaking Bad".to_string())
        );
        assert_eq!(
            folder_title(Path::new("/watch/The Office/S02E03.mkv"), &roots),
            Some("The Office".to_string())
        );
    }

    fn show(name: &str, year: Option<i32>) -> ShowRecord {
        ShowRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            aliases: vec![],
            year,
            overview: None,
            folder_path: None,
            season_naming_template: String::new(),
            episode_naming_template: String::new(),
            metadata_source: "manual".to_string(),
            remote_id: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_show_year_only_breaks_ties() {
        // A release-year mismatch must not sink a containment match
        let office = show("The Office US", Some(2005));
        assert!(show_score(&office, "The Office", Some(2001)) >= CATALOG_MATCH_THRESHOLD);

        let shows = vec![show("Doctor Who", Some(1963)), show("Doctor Who", Some(2005))];
        let best = find_best_match(&shows, CATALOG_MATCH_THRESHOLD, |s| show_score(s, "Doctor Who", Some(2005)))
            .unwrap();
        assert_eq!(best.item.year, Some(2005));
    }

    #[test]
    fn test_folder_title_stops_at_root() {
        let roots = vec![PathBuf::from("/watch")];
        assert_eq!(folder_title(Path::new("/watch/S01E01.mkv"), &roots), None);
        assert_eq!(folder_title(Path::new("/watch/Season 2/S02E01.mkv"), &roots), None);
    }
}
