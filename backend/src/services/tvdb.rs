//! TheTVDB v4 API client
//!
//! Base URL: https://api4.thetvdb.com/v4
//!
//! Requests carry a bearer token obtained by POSTing the API key to `/login`.
//! The token is cached for the life of the client and refreshed once when the
//! API answers 401.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::metadata::{
    EpisodeDetails, MetadataProvider, MovieDetails, MovieSearchResult, ShowDetails,
    ShowSearchResult,
};
use super::rate_limiter::{RateLimitedClient, ResponseExt, RetryConfig, is_retryable, retry_async_when};

const TVDB_BASE_URL: &str = "https://api4.thetvdb.com/v4";
/// Safety net against a `links.next` loop
const MAX_EPISODE_PAGES: u32 = 50;

pub struct TvdbClient {
    client: Arc<RateLimitedClient>,
    base_url: String,
    api_key: String,
    token: Mutex<Option<String>>,
    retry_config: RetryConfig,
}

/// Every v4 response wraps its payload in `data`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    next: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TvdbSearchHit {
    pub tvdb_id: Option<String>,
    pub id: Option<String>,
    pub name: String,
    pub year: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl TvdbSearchHit {
    fn remote_id(&self) -> Option<String> {
        self.tvdb_id.clone().or_else(|| {
            // Search ids look like "series-81189"
            self.id
                .as_deref()
                .and_then(|id| id.rsplit('-').next())
                .map(String::from)
        })
    }

    fn year(&self) -> Option<i32> {
        self.year.as_deref().and_then(|y| y.parse().ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TvdbSeries {
    pub id: i64,
    pub name: String,
    pub year: Option<String>,
    pub overview: Option<String>,
    #[serde(default)]
    pub aliases: Vec<TvdbAlias>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TvdbAlias {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SeriesEpisodes {
    series: TvdbSeries,
    #[serde(default)]
    episodes: Vec<TvdbEpisode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TvdbEpisode {
    pub season_number: i32,
    pub number: i32,
    pub name: Option<String>,
    pub aired: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TvdbMovie {
    pub id: i64,
    pub name: String,
    pub year: Option<String>,
}

impl TvdbClient {
    pub fn new(api_key: String) -> Result<Self> {
        Ok(Self {
            client: Arc::new(RateLimitedClient::for_tvdb()?),
            base_url: TVDB_BASE_URL.to_string(),
            api_key,
            token: Mutex::new(None),
            retry_config: RetryConfig {
                max_retries: 3,
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(10),
                multiplier: 2.0,
            },
        })
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn token(&self) -> Result<String> {
        let cached = self.token.lock().clone();
        if let Some(token) = cached {
            return Ok(token);
        }

        debug!("Logging in to TheTVDB");
        let response = self
            .client
            .post_json(
                &format!("{}/login", self.base_url),
                &serde_json::json!({ "apikey": self.api_key }),
            )
            .await?;

        if !response.status().is_success() {
            return Err(response.failure("tvdb", "login failed"));
        }

        let login: Envelope<LoginData> = response
            .json()
            .await
            .context("Failed to parse TheTVDB login response")?;

        *self.token.lock() = Some(login.data.token.clone());
        Ok(login.data.token)
    }

    /// GET `path` with a bearer token, retrying transient failures
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        operation: &str,
    ) -> Result<Envelope<T>> {
        if !self.has_api_key() {
            anyhow::bail!("TheTVDB API key not configured");
        }

        let url = format!("{}{}", self.base_url, path);

        retry_async_when(
            || {
                let url = url.clone();
                async move {
                    let token = self.token().await?;
                    let auth = format!("Bearer {}", token);
                    let response = self
                        .client
                        .get_with_headers_and_query(&url, &[("Authorization", auth.as_str())], params)
                        .await?;

                    if response.status().as_u16() == 401 {
                        // Expired token; the retry logs in again
                        *self.token.lock() = None;
                        anyhow::bail!("TheTVDB token rejected");
                    }
                    if response.is_rate_limited() {
                        warn!("TheTVDB rate limit hit, will retry");
                        anyhow::bail!("Rate limited (429)");
                    }
                    if !response.status().is_success() {
                        return Err(response.failure("tvdb", url.clone()));
                    }

                    response
                        .json::<Envelope<T>>()
                        .await
                        .context("Failed to parse TheTVDB response")
                }
            },
            &self.retry_config,
            operation,
            is_retryable,
        )
        .await
    }

    async fn search(&self, query: &str, kind: &str, year: Option<i32>) -> Result<Vec<TvdbSearchHit>> {
        let mut params = vec![("query", query.to_string()), ("type", kind.to_string())];
        if let Some(y) = year {
            params.push(("year", y.to_string()));
        }
        let envelope: Envelope<Vec<TvdbSearchHit>> =
            self.get_json("/search", &params, "tvdb_search").await?;
        debug!(count = envelope.data.len(), kind = %kind, "TheTVDB search returned results");
        Ok(envelope.data)
    }
}

#[async_trait]
impl MetadataProvider for TvdbClient {
    fn name(&self) -> &'static str {
        "tvdb"
    }

    fn has_credentials(&self) -> bool {
        self.has_api_key()
    }

    async fn search_shows(&self, query: &str, year: Option<i32>) -> Result<Vec<ShowSearchResult>> {
        info!(query = %query, year = ?year, "Searching TheTVDB for show");
        let hits = self.search(query, "series", year).await?;
        Ok(hits.iter().filter_map(show_search_result).collect())
    }

    async fn get_show_with_episodes(&self, remote_id: &str) -> Result<ShowDetails> {
        let mut series: Option<TvdbSeries> = None;
        let mut episodes = Vec::new();

        for page in 0..MAX_EPISODE_PAGES {
            let envelope: Envelope<SeriesEpisodes> = self
                .get_json(
                    &format!("/series/{}/episodes/default", remote_id),
                    &[("page", page.to_string())],
                    "tvdb_series_episodes",
                )
                .await?;

            episodes.extend(envelope.data.episodes.into_iter().map(episode_details));
            series.get_or_insert(envelope.data.series);

            let has_next = envelope
                .links
                .and_then(|l| l.next)
                .is_some_and(|n| !n.is_null());
            if !has_next {
                break;
            }
        }

        let series = series.context("TheTVDB returned no series record")?;
        Ok(ShowDetails {
            remote_id: series.id.to_string(),
            year: series.year.as_deref().and_then(|y| y.parse().ok()),
            name: series.name,
            overview: series.overview.filter(|o| !o.is_empty()),
            aliases: series.aliases.into_iter().map(|a| a.name).collect(),
            episodes,
        })
    }

    async fn search_movies(&self, query: &str, year: Option<i32>) -> Result<Vec<MovieSearchResult>> {
        info!(query = %query, year = ?year, "Searching TheTVDB for movie");
        let hits = self.search(query, "movie", year).await?;
        Ok(hits
            .iter()
            .filter_map(|h| {
                Some(MovieSearchResult {
                    remote_id: h.remote_id()?,
                    title: h.name.clone(),
                    year: h.year(),
                })
            })
            .collect())
    }

    async fn get_movie(&self, remote_id: &str) -> Result<MovieDetails> {
        let envelope: Envelope<TvdbMovie> = self
            .get_json(&format!("/movies/{}", remote_id), &[], "tvdb_get_movie")
            .await?;
        let movie = envelope.data;

        Ok(MovieDetails {
            remote_id: movie.id.to_string(),
            year: movie.year.as_deref().and_then(|y| y.parse().ok()),
            title: movie.name,
            overview: None,
        })
    }
}

fn show_search_result(hit: &TvdbSearchHit) -> Option<ShowSearchResult> {
    Some(ShowSearchResult {
        remote_id: hit.remote_id()?,
        name: hit.name.clone(),
        year: hit.year(),
    })
}

fn episode_details(ep: TvdbEpisode) -> EpisodeDetails {
    EpisodeDetails {
        season: ep.season_number,
        episode: ep.number,
        title: ep.name.filter(|n| !n.is_empty()),
        air_date: ep.aired.filter(|d| !d.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_search_response() {
        let json = r#"{
            "status": "success",
            "data": [
                {"objectID": "series-81189", "id": "series-81189", "tvdb_id": "81189", "name": "Breaking Bad", "year": "2008"},
                {"id": "series-12345", "name": "Breaking Bad Reunion"}
            ]
        }"#;
        let envelope: Envelope<Vec<TvdbSearchHit>> = serde_json::from_str(json).unwrap();
        let results: Vec<_> = envelope.data.iter().filter_map(show_search_result).collect();

        assert_eq!(results[0].remote_id, "81189");
        assert_eq!(results[0].year, Some(2008));
        assert_eq!(results[1].remote_id, "12345");
        assert_eq!(results[1].year, None);
    }

    #[test]
    fn test_parse_episode_page() {
        let json = r#"{
            "data": {
                "series": {"id": 81189, "name": "Breaking Bad", "year": "2008", "aliases": [{"language": "eng", "name": "BB"}]},
                "episodes": [
                    {"seasonNumber": 1, "number": 1, "name": "Pilot", "aired": "2008-01-20"},
                    {"seasonNumber": 0, "number": 1, "name": null, "aired": null}
                ]
            },
            "links": {"prev": null, "self": "...", "next": null}
        }"#;
        let envelope: Envelope<SeriesEpisodes> = serde_json::from_str(json).unwrap();
        assert!(envelope.links.unwrap().next.is_none());
        assert_eq!(envelope.data.series.aliases[0].name, "BB");

        let eps: Vec<_> = envelope.data.episodes.into_iter().map(episode_details).collect();
        assert_eq!(eps[0].title.as_deref(), Some("Pilot"));
        assert_eq!(eps[1].season, 0);
    }

    #[tokio::test]
    async fn test_missing_key_fails_fast() {
        let client = TvdbClient::new(String::new()).unwrap();
        assert!(!client.has_credentials());
        assert!(client.search_movies("Dune", Some(2021)).await.is_err());
    }
}
