//! Movie flow: the episode flow without seasons or episode ranges

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{
    MediaKind, Pipeline, PipelineError, Route, RunContext, RunProgress, Stage, claim_is_live,
    unclaimed_occupant,
};
use crate::db::{MovieRecord, PipelineAction};
use crate::services::file_mover::create_dir_all_inherit;
use crate::services::filename_parser::MovieCandidate;
use crate::services::organizer::{IssueReason, TemplateValues, media_folder_name, movie_destination};
use crate::services::quality_evaluator::Comparison;
use crate::services::text_utils::{CATALOG_MATCH_THRESHOLD, find_best_match, movie_similarity};

/// Title/year score, with a small nudge towards the matching edition
pub(super) fn movie_score(movie: &MovieRecord, candidate: &MovieCandidate) -> f64 {
    let base = movie_similarity(&candidate.title, candidate.year, &movie.title, movie.year);
    let same_edition = match (&movie.edition, &candidate.edition) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        (None, None) => true,
        _ => false,
    };
    if same_edition { base } else { (base - 0.01).max(0.0) }
}

impl Pipeline {
    pub(super) async fn process_movie(
        &self,
        ctx: &RunContext,
        path: &Path,
        candidate: MovieCandidate,
        progress: &RunProgress,
    ) -> Result<Route, PipelineError> {
        let movies = self.db.movies().list_all().await?;
        let matched = find_best_match(&movies, CATALOG_MATCH_THRESHOLD, |m| movie_score(m, &candidate))
            .map(|m| (m.item.clone(), m.score));

        let mut imported_from: Option<&'static str> = None;
        let mut movie = match matched {
            Some((movie, score)) => {
                debug!(title = %candidate.title, movie = %movie.title, score, "Matched movie");
                progress.report(path, Stage::Matched, format!("matched movie '{}'", movie.title));
                movie
            }
            None => {
                progress.report(
                    path,
                    Stage::Matched,
                    format!("no catalog movie for '{}'", candidate.title),
                );
                let (movie, source) = self.import_movie(ctx, &candidate).await?;
                progress.report(
                    path,
                    Stage::AutoImportAttempted,
                    format!("imported '{}' from {}", movie.title, source),
                );
                imported_from = Some(source);
                movie
            }
        };

        // Movies without a folder get one under the first movies library root
        if movie.folder_path.as_deref().is_none_or(|p| p.trim().is_empty()) {
            let root = ctx.movie_roots.first().ok_or_else(|| PipelineError::MissingFolder {
                kind: MediaKind::Movie,
                name: movie.title.clone(),
            })?;
            let folder = root.join(media_folder_name(&movie.title, movie.year));
            create_dir_all_inherit(&folder).await?;
            let folder_str = folder.to_string_lossy().to_string();
            self.db.movies().set_folder_path(movie.id, &folder_str).await?;
            movie.folder_path = Some(folder_str);
        }
        let movie_folder = PathBuf::from(movie.folder_path.clone().unwrap_or_default());

        let values = TemplateValues {
            title: Some(movie.title.clone()),
            year: movie.year,
            edition: movie.edition.clone().or_else(|| candidate.edition.clone()),
            quality: candidate.quality.clone(),
            ..Default::default()
        };
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let dest = movie_destination(&movie_folder, &ctx.settings.movie_naming_template, &values, &extension);
        let media_ref = format!("movie:{}", movie.id);

        // Status is re-read right before acting
        let current = self.db.movies().get_by_id(movie.id).await?;
        let existing = match &current {
            Some(m) if !m.file_status.is_missing() => claim_is_live(m.file_path.as_deref()).await,
            _ => None,
        };
        let existing = match existing {
            Some(p) => Some(p),
            None => unclaimed_occupant(path, &dest).await,
        };

        let Some(existing) = existing else {
            progress.report(path, Stage::Decided, "new file");
            self.install_movie(ctx, path, &dest, &movie).await?;

            let (action, details) = match imported_from {
                Some(source) => (
                    PipelineAction::AutoImport,
                    format!("imported '{}' from {}; placed at {}", movie.title, source, dest.display()),
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
                let replaced = self.displace_existing(ctx, &existing, &movie.title).await?;

                if let Err(e) = self.install_movie(ctx, path, &dest, &movie).await {
                    if let Err(release) = self.db.movies().mark_missing(movie.id).await {
                        warn!(movie_id = %movie.id, error = %release, "Failed to release movie after aborted upgrade");
                    }
                    return Err(e);
                }

                info!(movie = %movie.title, dest = %dest.display(), "Upgraded movie");
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

    async fn install_movie(
        &self,
        ctx: &RunContext,
        src: &Path,
        dest: &Path,
        movie: &MovieRecord,
    ) -> Result<(), PipelineError> {
        let repo = self.db.movies();
        let id = movie.id;
        let dest_str = dest.to_string_lossy().to_string();
        self.install(ctx, src, dest, move || async move { repo.mark_found(id, &dest_str).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FileStatus;
    use uuid::Uuid;

    fn record(title: &str, year: Option<i32>, edition: Option<&str>) -> MovieRecord {
        MovieRecord {
            id: Uuid::new_v4(),
            title: title.to_string(),
            year,
            folder_path: None,
            edition: edition.map(String::from),
            file_path: None,
            file_status: FileStatus::Missing,
            metadata_source: None,
            remote_id: None,
            matched_at: None,
        }
    }

    fn candidate(title: &str, year: Option<i32>, edition: Option<&str>) -> MovieCandidate {
        MovieCandidate {
            title: title.to_string(),
            year,
            quality: None,
            source: None,
            release_group: None,
            edition: edition.map(String::from),
        }
    }

    #[test]
    fn test_year_separates_remakes() {
        let dune_84 = record("Dune", Some(1984), None);
        let dune_21 = record("Dune", Some(2021), None);
        let c = candidate("Dune", Some(2021), None);
        assert!(movie_score(&dune_21, &c) > movie_score(&dune_84, &c));
        assert!(movie_score(&dune_84, &c) >= CATALOG_MATCH_THRESHOLD);
    }

    #[test]
    fn test_edition_breaks_ties() {
        let theatrical = record("Blade Runner", Some(1982), None);
        let final_cut = record("Blade Runner", Some(1982), Some("Final Cut"));
        let c = candidate("Blade Runner", Some(1982), Some("Final Cut"));

        let movies = vec![theatrical, final_cut];
        let best = find_best_match(&movies, CATALOG_MATCH_THRESHOLD, |m| movie_score(m, &c)).unwrap();
        assert_eq!(best.item.edition.as_deref(), Some("Final Cut"));
    }
}
