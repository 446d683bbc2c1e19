//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Process-level configuration loaded from environment variables.
/// Runtime policy (templates, issues layout, priorities) lives in the
/// settings table instead.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Watch folders from `WATCH_PATHS`, merged with enabled `watch` scan folders
    pub watch_paths: Vec<PathBuf>,

    /// Issues directory used when the `issues_folder` setting is unset
    pub issues_path: PathBuf,

    /// How long a file's size must hold still before it is processed
    pub settle_delay: Duration,

    /// ffprobe binary
    pub ffprobe_path: String,

    pub probe_timeout: Duration,

    /// TMDB API key
    pub tmdb_api_key: Option<String>,

    /// TheTVDB API key
    pub tvdb_api_key: Option<String>,

    /// Bound of the settled-file queue
    pub queue_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./data/intake.db".to_string())
                .into(),

            watch_paths: env::var("WATCH_PATHS")
                .map(|v| parse_path_list(&v))
                .unwrap_or_default(),

            issues_path: env::var("ISSUES_PATH")
                .unwrap_or_else(|_| "./data/issues".to_string())
                .into(),

            settle_delay: Duration::from_secs(
                env::var("SETTLE_DELAY_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("Invalid SETTLE_DELAY_SECS")?,
            ),

            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),

            probe_timeout: Duration::from_secs(
                env::var("PROBE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("Invalid PROBE_TIMEOUT_SECS")?,
            ),

            tmdb_api_key: non_empty_var("TMDB_API_KEY"),

            tvdb_api_key: non_empty_var("TVDB_API_KEY"),

            queue_capacity: env::var("QUEUE_CAPACITY")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("Invalid QUEUE_CAPACITY")?,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Comma-separated path list; blanks are dropped
pub fn parse_path_list(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}
