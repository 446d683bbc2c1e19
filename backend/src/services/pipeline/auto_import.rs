//! Auto-import: create catalog entries for unknown shows and movies
//!
//! Runs when a parsed title matches nothing in the catalog. Providers are
//! asked in the configured priority order and the first acceptable hit wins.
//! A show import has two phases: [`Pipeline::import_show`] creates the show,
//! its episodes and its folder, then [`Pipeline::reconcile_folder`] rescans
//! that folder and claims the episodes whose files are already there.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{MediaKind, Pipeline, PipelineError, RunContext};
use crate::db::{CreateEpisode, CreateMovie, CreateShow, MovieRecord, ShowRecord};
use crate::services::file_mover::create_dir_all_inherit;
use crate::services::file_utils::list_video_files;
use crate::services::filename_parser::{MovieCandidate, parse_tv};
use crate::services::metadata::{MetadataProvider, SEARCH_CANDIDATE_LIMIT, order_by_priority};
use crate::services::organizer::media_folder_name;
use crate::services::text_utils::{
    PROVIDER_FALLBACK_THRESHOLD, PROVIDER_MATCH_THRESHOLD, movie_similarity, normalize_title,
    title_similarity,
};

const NO_CREDENTIALS: &str = "no metadata provider has credentials configured";

/// Pick the provider hit to import
///
/// Among the top hits: an exact year match that clears the provider threshold
/// wins, then the best hit that clears it, then the single top hit if it
/// clears the last-resort threshold.
pub(super) fn select_candidate<'a, T>(
    results: &'a [T],
    year: Option<i32>,
    score: impl Fn(&T) -> f64,
    year_of: impl Fn(&T) -> Option<i32>,
) -> Option<&'a T> {
    let top = &results[..results.len().min(SEARCH_CANDIDATE_LIMIT)];
    let scored: Vec<(&T, f64)> = top.iter().map(|r| (r, score(r))).collect();

    let best_where = |keep: &dyn Fn(&T) -> bool| {
        scored
            .iter()
            .filter(|(r, s)| *s >= PROVIDER_MATCH_THRESHOLD && keep(*r))
            .fold(None::<(&T, f64)>, |best, &(r, s)| match best {
                Some((_, b)) if b >= s => best,
                _ => Some((r, s)),
            })
            .map(|(r, _)| r)
    };

    if let Some(y) = year {
        if let Some(hit) = best_where(&|r: &T| year_of(r) == Some(y)) {
            return Some(hit);
        }
    }
    if let Some(hit) = best_where(&|_: &T| true) {
        return Some(hit);
    }

    scored
        .first()
        .filter(|(_, s)| *s >= PROVIDER_FALLBACK_THRESHOLD)
        .map(|(r, _)| *r)
}

/// Library folder name without a trailing "(Year)"
fn folder_base_name(name: &str) -> &str {
    let trimmed = name.trim_end();
    match trimmed.rfind(" (") {
        Some(idx) if trimmed.ends_with(')') => {
            let inner = &trimmed[idx + 2..trimmed.len() - 1];
            if inner.len() == 4 && inner.chars().all(|c| c.is_ascii_digit()) {
                &trimmed[..idx]
            } else {
                trimmed
            }
        }
        _ => trimmed,
    }
}

/// An existing folder under `roots` whose name normalizes to the show's
async fn find_existing_folder(roots: &[PathBuf], show_name: &str) -> Option<PathBuf> {
    let wanted = normalize_title(show_name);
    for root in roots {
        let Ok(mut entries) = tokio::fs::read_dir(root).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if normalize_title(folder_base_name(&name)) == wanted || normalize_title(&name) == wanted {
                return Some(entry.path());
            }
        }
    }
    None
}

impl Pipeline {
    fn ordered_providers(&self, ctx: &RunContext) -> Vec<&Arc<dyn MetadataProvider>> {
        order_by_priority(&self.providers, &ctx.settings.metadata_provider_priority)
    }

    /// Phase 1 of a show import. Returns the show and the provider it came from.
    pub(super) async fn import_show(
        &self,
        ctx: &RunContext,
        title: &str,
        year: Option<i32>,
    ) -> Result<(ShowRecord, &'static str), PipelineError> {
        let mut any_credentials = false;

        for provider in self.ordered_providers(ctx) {
            if !provider.has_credentials() {
                debug!(provider = provider.name(), "Skipping provider without credentials");
                continue;
            }
            any_credentials = true;

            let mut results = match provider.search_shows(title, year).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(provider = provider.name(), title = %title, error = %e, "Show search failed");
                    continue;
                }
            };
            if results.is_empty() && year.is_some() {
                results = provider.search_shows(title, None).await.unwrap_or_else(|e| {
                    warn!(provider = provider.name(), title = %title, error = %e, "Show search without year failed");
                    Vec::new()
                });
            }

            let Some(hit) = select_candidate(&results, year, |r| title_similarity(title, &r.name), |r| r.year)
            else {
                debug!(provider = provider.name(), title = %title, "No acceptable show candidate");
                continue;
            };

            if let Some(existing) = self.db.shows().get_by_remote_id(provider.name(), &hit.remote_id).await? {
                info!(show = %existing.name, provider = provider.name(), "Reusing catalog show for provider match");
                return Ok((existing, provider.name()));
            }

            let details = match provider.get_show_with_episodes(&hit.remote_id).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(provider = provider.name(), remote_id = %hit.remote_id, error = %e, "Failed to fetch show details");
                    continue;
                }
            };

            let folder = self.library_folder_for_show(ctx, &details.name, details.year).await?;
            let show = self
                .db
                .shows()
                .create(CreateShow {
                    name: details.name.clone(),
                    aliases: details.aliases.clone(),
                    year: details.year,
                    overview: details.overview.clone(),
                    folder_path: folder.as_ref().map(|f| f.to_string_lossy().to_string()),
                    season_naming_template: Some(ctx.settings.season_naming_template.clone()),
                    episode_naming_template: Some(ctx.settings.episode_naming_template.clone()),
                    metadata_source: provider.name().to_string(),
                    remote_id: Some(details.remote_id.clone()),
                })
                .await?;

            let episodes: Vec<CreateEpisode> = details
                .episodes
                .iter()
                .map(|e| CreateEpisode {
                    season: e.season,
                    episode: e.episode,
                    title: e.title.clone(),
                    air_date: e.air_date.clone(),
                })
                .collect();
            let created = self.db.episodes().create_batch(show.id, &episodes).await?;

            info!(
                show = %show.name,
                provider = provider.name(),
                remote_id = %details.remote_id,
                episodes = created,
                folder = ?show.folder_path,
                "Auto-imported show"
            );

            if let Err(e) = self.reconcile_folder(&show).await {
                warn!(show = %show.name, error = %e, "Failed to reconcile new show folder");
            }

            return Ok((show, provider.name()));
        }

        Err(PipelineError::MatchFailure {
            kind: MediaKind::Show,
            title: title.to_string(),
            details: if any_credentials {
                "no provider returned an acceptable match".to_string()
            } else {
                NO_CREDENTIALS.to_string()
            },
        })
    }

    /// Existing folder for the show under a TV root, else a new "<Name (Year)>" one
    async fn library_folder_for_show(
        &self,
        ctx: &RunContext,
        name: &str,
        year: Option<i32>,
    ) -> Result<Option<PathBuf>, PipelineError> {
        if let Some(existing) = find_existing_folder(&ctx.tv_roots, name).await {
            debug!(show = %name, folder = %existing.display(), "Reusing existing show folder");
            return Ok(Some(existing));
        }

        let Some(root) = ctx.tv_roots.first() else {
            warn!(show = %name, "No TV library folder configured for auto-import");
            return Ok(None);
        };

        let folder = root.join(media_folder_name(name, year));
        create_dir_all_inherit(&folder).await?;
        Ok(Some(folder))
    }

    /// Phase 2 of a show import: claim episodes whose files are already in
    /// the show folder. Returns how many were marked found.
    pub async fn reconcile_folder(&self, show: &ShowRecord) -> anyhow::Result<usize> {
        let Some(folder) = show.folder_path.as_deref().map(PathBuf::from) else {
            return Ok(0);
        };

        let files = tokio::task::spawn_blocking(move || list_video_files(&folder)).await?;
        let episodes = self.db.episodes();
        let mut marked = 0;

        for file in files {
            let Some(tv) = file_name(&file).and_then(|n| parse_tv(&n)) else {
                continue;
            };
            for number in tv.episode_numbers() {
                let Some(ep) = episodes.get_by_number(show.id, tv.season as i32, number as i32).await? else {
                    continue;
                };
                if ep.file_status.is_missing() {
                    episodes.mark_found(ep.id, &file.to_string_lossy()).await?;
                    marked += 1;
                }
            }
        }

        if marked > 0 {
            info!(show = %show.name, marked, "Claimed episodes already in the show folder");
        }
        Ok(marked)
    }

    /// Movie import: create the movie row and its folder
    pub(super) async fn import_movie(
        &self,
        ctx: &RunContext,
        candidate: &MovieCandidate,
    ) -> Result<(MovieRecord, &'static str), PipelineError> {
        let title = candidate.title.as_str();
        let year = candidate.year;
        let mut any_credentials = false;

        for provider in self.ordered_providers(ctx) {
            if !provider.has_credentials() {
                debug!(provider = provider.name(), "Skipping provider without credentials");
                continue;
            }
            any_credentials = true;

            let mut results = match provider.search_movies(title, year).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(provider = provider.name(), title = %title, error = %e, "Movie search failed");
                    continue;
                }
            };
            if results.is_empty() && year.is_some() {
                results = provider.search_movies(title, None).await.unwrap_or_else(|e| {
                    warn!(provider = provider.name(), title = %title, error = %e, "Movie search without year failed");
                    Vec::new()
                });
            }

            let Some(hit) = select_candidate(
                &results,
                year,
                |r| movie_similarity(title, year, &r.title, r.year),
                |r| r.year,
            ) else {
                debug!(provider = provider.name(), title = %title, "No acceptable movie candidate");
                continue;
            };

            if let Some(existing) = self.db.movies().get_by_remote_id(provider.name(), &hit.remote_id).await? {
                info!(movie = %existing.title, provider = provider.name(), "Reusing catalog movie for provider match");
                return Ok((existing, provider.name()));
            }

            let details = match provider.get_movie(&hit.remote_id).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(provider = provider.name(), remote_id = %hit.remote_id, error = %e, "Failed to fetch movie details");
                    continue;
                }
            };

            let folder = match ctx.movie_roots.first() {
                Some(root) => {
                    let folder = root.join(media_folder_name(&details.title, details.year));
                    create_dir_all_inherit(&folder).await?;
                    Some(folder.to_string_lossy().to_string())
                }
                None => None,
            };

            let movie = self
                .db
                .movies()
                .create(CreateMovie {
                    title: details.title.clone(),
                    year: details.year,
                    folder_path: folder,
                    edition: candidate.edition.clone(),
                    metadata_source: Some(provider.name().to_string()),
                    remote_id: Some(details.remote_id.clone()),
                })
                .await?;

            info!(
                movie = %movie.title,
                provider = provider.name(),
                remote_id = %details.remote_id,
                "Auto-imported movie"
            );
            return Ok((movie, provider.name()));
        }

        Err(PipelineError::MatchFailure {
            kind: MediaKind::Movie,
            title: title.to_string(),
            details: if any_credentials {
                "no provider returned an acceptable match".to_string()
            } else {
                NO_CREDENTIALS.to_string()
            },
        })
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::metadata::ShowSearchResult;
    use pretty_assertions::assert_eq;

    fn hit(name: &str, year: Option<i32>) -> ShowSearchResult {
        ShowSearchResult {
            remote_id: name.to_lowercase(),
            name: name.to_string(),
            year,
        }
    }

    fn pick<'a>(results: &'a [ShowSearchResult], title: &str, year: Option<i32>) -> Option<&'a str> {
        select_candidate(results, year, |r| title_similarity(title, &r.name), |r| r.year)
            .map(|r| r.name.as_str())
    }

    #[test]
    fn test_exact_year_preferred() {
        let results = vec![
            hit("Doctor Who", Some(1963)),
            hit("Doctor Who", Some(2005)),
        ];
        let chosen = select_candidate(&results, Some(2005), |r| title_similarity("Doctor Who", &r.name), |r| r.year)
            .unwrap();
        assert_eq!(chosen.year, Some(2005));
    }

    #[test]
    fn test_best_over_threshold_without_year() {
        let results = vec![hit("Chicago Med", None), hit("Chicago Fire", None)];
        assert_eq!(pick(&results, "Chicago Fire", None), Some("Chicago Fire"));
    }

    #[test]
    fn test_last_resort_only_on_top_hit() {
        // 2 of 5 words shared: 0.4, below the regular threshold
        let results = vec![hit("Alpha Beta Gamma Delta", None)];
        assert_eq!(pick(&results, "Alpha Beta Epsilon", None), Some("Alpha Beta Gamma Delta"));

        let results = vec![hit("Unrelated", None), hit("Alpha Beta Gamma Delta", None)];
        assert_eq!(pick(&results, "Alpha Beta Epsilon", None), None);
    }

    #[test]
    fn test_only_top_five_considered() {
        let mut results: Vec<_> = (0..5).map(|i| hit(&format!("Noise {i}"), None)).collect();
        results.push(hit("Severance", None));
        assert_eq!(pick(&results, "Severance", None), None);
    }

    #[test]
    fn test_folder_base_name() {
        assert_eq!(folder_base_name("Breaking Bad (2008)"), "Breaking Bad");
        assert_eq!(folder_base_name("The Office (US)"), "The Office (US)");
        assert_eq!(folder_base_name("Dark"), "Dark");
    }

    #[tokio::test]
    async fn test_find_existing_folder() {
        let dir = tempfile::TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("Law and Order (1990)")).await.unwrap();
        tokio::fs::write(dir.path().join("Dark"), b"not a dir").await.unwrap();

        let roots = vec![dir.path().to_path_buf()];
        assert_eq!(
            find_existing_folder(&roots, "Law & Order").await,
            Some(dir.path().join("Law and Order (1990)"))
        );
        assert_eq!(find_existing_folder(&roots, "Dark").await, None);
    }
}
