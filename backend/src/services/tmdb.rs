//! TMDB (The Movie Database) API client
//!
//! Base URL: https://api.themoviedb.org/3
//!
//! Rate limiting: TMDB allows ~40 requests per 10 seconds.
//! This client uses rate limiting and retry logic to handle this gracefully.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::metadata::{
    EpisodeDetails, MetadataProvider, MovieDetails, MovieSearchResult, ShowDetails,
    ShowSearchResult, year_from_date,
};
use super::rate_limiter::{RateLimitedClient, ResponseExt, RetryConfig, is_retryable, retry_async_when};

const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

/// TMDB API client with rate limiting and retry logic
pub struct TmdbClient {
    client: Arc<RateLimitedClient>,
    base_url: String,
    api_key: String,
    retry_config: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct Paged<T> {
    results: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbTvShow {
    pub id: i64,
    pub name: String,
    pub first_air_date: Option<String>,
    pub overview: Option<String>,
    #[serde(default)]
    pub seasons: Vec<TmdbSeasonSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbSeasonSummary {
    pub season_number: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbSeason {
    #[serde(default)]
    pub episodes: Vec<TmdbEpisode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbEpisode {
    pub season_number: i32,
    pub episode_number: i32,
    pub name: Option<String>,
    pub air_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbMovie {
    pub id: i64,
    pub title: String,
    pub release_date: Option<String>,
    pub overview: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TmdbAlternativeTitles {
    #[serde(default)]
    results: Vec<TmdbAlternativeTitle>,
}

#[derive(Debug, Clone, Deserialize)]
struct TmdbAlternativeTitle {
    title: String,
}

impl TmdbClient {
    pub fn new(api_key: String) -> Result<Self> {
        Ok(Self {
            client: Arc::new(RateLimitedClient::for_tmdb()?),
            base_url: TMDB_BASE_URL.to_string(),
            api_key,
            retry_config: RetryConfig {
                max_retries: 3,
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(10),
                multiplier: 2.0,
            },
        })
    }

    /// Check if the client has a valid API key configured
    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// GET `path` with the API key and `params`, retrying transient failures
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        operation: &str,
    ) -> Result<T> {
        if !self.has_api_key() {
            anyhow::bail!("TMDB API key not configured");
        }

        let url = format!("{}{}", self.base_url, path);
        let mut query: Vec<(&str, String)> = vec![("api_key", self.api_key.clone())];
        query.extend(params.iter().cloned());

        retry_async_when(
            || {
                let url = url.clone();
                let client = self.client.clone();
                let query = query.clone();
                async move {
                    let response = client.get_with_headers_and_query(&url, &[], &query).await?;

                    if response.is_rate_limited() {
                        warn!("TMDB rate limit hit, will retry");
                        anyhow::bail!("Rate limited (429)");
                    }
                    if response.status().as_u16() == 401 {
                        return Err(response.failure("tmdb", "API key is invalid"));
                    }
                    if response.status().as_u16() == 404 {
                        return Err(response.failure("tmdb", format!("not found: {}", url)));
                    }
                    if !response.status().is_success() {
                        return Err(response.failure("tmdb", url.clone()));
                    }

                    response
                        .json::<T>()
                        .await
                        .context("Failed to parse TMDB response")
                }
            },
            &self.retry_config,
            operation,
            is_retryable,
        )
        .await
    }

    async fn season(&self, show_id: &str, season_number: i32) -> Result<TmdbSeason> {
        self.get_json(
            &format!("/tv/{}/season/{}", show_id, season_number),
            &[],
            "tmdb_get_season",
        )
        .await
    }

    async fn alternative_titles(&self, show_id: &str) -> Vec<String> {
        match self
            .get_json::<TmdbAlternativeTitles>(
                &format!("/tv/{}/alternative_titles", show_id),
                &[],
                "tmdb_alternative_titles",
            )
            .await
        {
            Ok(alt) => alt.results.into_iter().map(|t| t.title).collect(),
            Err(e) => {
                debug!(show_id = %show_id, error = %e, "No alternative titles from TMDB");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl MetadataProvider for TmdbClient {
    fn name(&self) -> &'static str {
        "tmdb"
    }

    fn has_credentials(&self) -> bool {
        self.has_api_key()
    }

    async fn search_shows(&self, query: &str, year: Option<i32>) -> Result<Vec<ShowSearchResult>> {
        info!(query = %query, year = ?year, "Searching TMDB for show");

        let mut params = vec![("query", query.to_string()), ("include_adult", "false".to_string())];
        if let Some(y) = year {
            params.push(("first_air_date_year", y.to_string()));
        }

        let page: Paged<TmdbTvShow> = self.get_json("/search/tv", &params, "tmdb_search_tv").await?;
        debug!(count = page.results.len(), "TMDB show search returned results");

        Ok(page.results.into_iter().map(show_search_result).collect())
    }

    async fn get_show_with_episodes(&self, remote_id: &str) -> Result<ShowDetails> {
        let show: TmdbTvShow = self
            .get_json(&format!("/tv/{}", remote_id), &[], "tmdb_get_tv")
            .await?;

        let mut episodes = Vec::new();
        for summary in &show.seasons {
            match self.season(remote_id, summary.season_number).await {
                Ok(season) => episodes.extend(season.episodes.into_iter().map(episode_details)),
                Err(e) => warn!(
                    show_id = %remote_id,
                    season = summary.season_number,
                    error = %e,
                    "Failed to fetch TMDB season, continuing without it"
                ),
            }
        }

        let aliases = self.alternative_titles(remote_id).await;

        Ok(ShowDetails {
            remote_id: show.id.to_string(),
            year: year_from_date(show.first_air_date.as_deref()),
            name: show.name,
            overview: show.overview.filter(|o| !o.is_empty()),
            aliases,
            episodes,
        })
    }

    async fn search_movies(&self, query: &str, year: Option<i32>) -> Result<Vec<MovieSearchResult>> {
        info!(query = %query, year = ?year, "Searching TMDB for movie");

        let mut params = vec![("query", query.to_string()), ("include_adult", "false".to_string())];
        if let Some(y) = year {
            params.push(("year", y.to_string()));
        }

        let page: Paged<TmdbMovie> = self
            .get_json("/search/movie", &params, "tmdb_search_movies")
            .await?;
        debug!(count = page.results.len(), "TMDB movie search returned results");

        Ok(page
            .results
            .into_iter()
            .map(|m| MovieSearchResult {
                remote_id: m.id.to_string(),
                year: year_from_date(m.release_date.as_deref()),
                title: m.title,
            })
            .collect())
    }

    async fn get_movie(&self, remote_id: &str) -> Result<MovieDetails> {
        let movie: TmdbMovie = self
            .get_json(&format!("/movie/{}", remote_id), &[], "tmdb_get_movie")
            .await?;

        Ok(MovieDetails {
            remote_id: movie.id.to_string(),
            year: year_from_date(movie.release_date.as_deref()),
            title: movie.title,
            overview: movie.overview.filter(|o| !o.is_empty()),
        })
    }
}

fn show_search_result(show: TmdbTvShow) -> ShowSearchResult {
    ShowSearchResult {
        remote_id: show.id.to_string(),
        year: year_from_date(show.first_air_date.as_deref()),
        name: show.name,
    }
}

fn episode_details(ep: TmdbEpisode) -> EpisodeDetails {
    EpisodeDetails {
        season: ep.season_number,
        episode: ep.episode_number,
        title: ep.name.filter(|n| !n.is_empty()),
        air_date: ep.air_date.filter(|d| !d.is_empty()),
    }
}
