//! Unified metadata provider interface
//!
//! Auto-import asks providers, in the configured priority order, for a show or
//! movie matching a parsed title. Every provider maps its own API shapes onto
//! the types below so the pipeline never sees provider-specific JSON.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How many search hits auto-import considers per provider
pub const SEARCH_CANDIDATE_LIMIT: usize = 5;

/// Show search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowSearchResult {
    /// Provider-specific id, as text
    pub remote_id: String,
    pub name: String,
    pub year: Option<i32>,
}

/// Movie search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSearchResult {
    pub remote_id: String,
    pub title: String,
    pub year: Option<i32>,
}

/// Episode listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeDetails {
    pub season: i32,
    pub episode: i32,
    pub title: Option<String>,
    pub air_date: Option<String>,
}

/// Full show record with its episode list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowDetails {
    pub remote_id: String,
    pub name: String,
    pub year: Option<i32>,
    pub overview: Option<String>,
    pub aliases: Vec<String>,
    pub episodes: Vec<EpisodeDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieDetails {
    pub remote_id: String,
    pub title: String,
    pub year: Option<i32>,
    pub overview: Option<String>,
}

/// A source of show/movie metadata
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Stable identifier stored as a catalog entry's `metadata_source`
    fn name(&self) -> &'static str;

    /// False when the provider cannot be queried at all (e.g. no API key)
    fn has_credentials(&self) -> bool;

    async fn search_shows(&self, query: &str, year: Option<i32>) -> Result<Vec<ShowSearchResult>>;

    async fn get_show_with_episodes(&self, remote_id: &str) -> Result<ShowDetails>;

    async fn search_movies(&self, query: &str, year: Option<i32>) -> Result<Vec<MovieSearchResult>>;

    async fn get_movie(&self, remote_id: &str) -> Result<MovieDetails>;
}

/// Year from an ISO date such as "2008-01-20"
pub fn year_from_date(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

/// Order `providers` by the configured priority list; unlisted ones keep
/// their relative order at the end
pub fn order_by_priority<'a>(
    providers: &'a [std::sync::Arc<dyn MetadataProvider>],
    priority: &[String],
) -> Vec<&'a std::sync::Arc<dyn MetadataProvider>> {
    let mut ordered: Vec<_> = providers.iter().collect();
    ordered.sort_by_key(|p| {
        priority
            .iter()
            .position(|name| name.eq_ignore_ascii_case(p.name()))
            .unwrap_or(usize::MAX)
    });
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Named(&'static str);

    #[async_trait]
    impl MetadataProvider for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        fn has_credentials(&self) -> bool {
            true
        }
        async fn search_shows(&self, _: &str, _: Option<i32>) -> Result<Vec<ShowSearchResult>> {
            Ok(vec![])
        }
        async fn get_show_with_episodes(&self, _: &str) -> Result<ShowDetails> {
            anyhow::bail!("unused")
        }
        async fn search_movies(&self, _: &str, _: Option<i32>) -> Result<Vec<MovieSearchResult>> {
            Ok(vec![])
        }
        async fn get_movie(&self, _: &str) -> Result<MovieDetails> {
            anyhow::bail!("unused")
        }
    }

    #[test]
    fn test_year_from_date() {
        assert_eq!(year_from_date(Some("2008-01-20")), Some(2008));
        assert_eq!(year_from_date(Some("")), None);
        assert_eq!(year_from_date(None), None);
    }

    #[test]
    fn test_order_by_priority() {
        let providers: Vec<Arc<dyn MetadataProvider>> =
            vec![Arc::new(Named("tmdb")), Arc::new(Named("other")), Arc::new(Named("tvdb"))];
        let ordered = order_by_priority(&providers, &["tvdb".to_string(), "tmdb".to_string()]);
        let names: Vec<_> = ordered.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["tvdb", "tmdb", "other"]);
    }
}
