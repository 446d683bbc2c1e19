//! Application settings database operations
//!
//! Values are JSON documents keyed by name. The pipeline reads a fresh
//! [`PipelineSettings`] snapshot at the start of every file so edits take
//! effect without a restart.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::warn;

use crate::db::shows::{DEFAULT_EPISODE_TEMPLATE, DEFAULT_SEASON_TEMPLATE};
use crate::services::organizer::{DEFAULT_MOVIE_TEMPLATE, IssuesOrganization};
use crate::services::quality_evaluator::{QualityPriority, default_priorities};

pub const KEY_ISSUES_FOLDER: &str = "issues_folder";
pub const KEY_ISSUES_ORGANIZATION: &str = "issues_organization";
pub const KEY_COMPANION_EXTENSIONS: &str = "companion_extensions";
pub const KEY_QUALITY_PRIORITIES: &str = "quality_priorities";
pub const KEY_SEASON_TEMPLATE: &str = "season_naming_template";
pub const KEY_EPISODE_TEMPLATE: &str = "episode_naming_template";
pub const KEY_MOVIE_TEMPLATE: &str = "movie_naming_template";
pub const KEY_MIN_FILE_SIZE_MB: &str = "min_file_size_mb";
pub const KEY_AUTO_PURGE_DAYS: &str = "issues_auto_purge_days";
pub const KEY_PROVIDER_PRIORITY: &str = "metadata_provider_priority";
pub const KEY_CLEANUP_SOURCE_FOLDERS: &str = "cleanup_empty_source_folders";

pub const DEFAULT_COMPANION_EXTENSIONS: &[&str] =
    &["srt", "sub", "idx", "ass", "ssa", "vtt", "nfo", "jpg", "png"];

/// Snapshot of every setting the pipeline consults for one run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Overrides the configured issues directory when set
    pub issues_folder: Option<String>,
    pub issues_organization: IssuesOrganization,
    pub companion_extensions: Vec<String>,
    pub quality_priorities: Vec<QualityPriority>,
    /// Templates for shows created by auto-import
    pub season_naming_template: String,
    pub episode_naming_template: String,
    pub movie_naming_template: String,
    pub min_file_size_mb: u64,
    /// 0 disables the purge job
    pub issues_auto_purge_days: u32,
    pub metadata_provider_priority: Vec<String>,
    pub cleanup_empty_source_folders: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            issues_folder: None,
            issues_organization: IssuesOrganization::Date,
            companion_extensions: DEFAULT_COMPANION_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            quality_priorities: default_priorities(),
            season_naming_template: DEFAULT_SEASON_TEMPLATE.to_string(),
            episode_naming_template: DEFAULT_EPISODE_TEMPLATE.to_string(),
            movie_naming_template: DEFAULT_MOVIE_TEMPLATE.to_string(),
            min_file_size_mb: 0,
            issues_auto_purge_days: 0,
            metadata_provider_priority: vec!["tmdb".to_string(), "tvdb".to_string()],
            cleanup_empty_source_folders: true,
        }
    }
}

/// Settings repository for database operations
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the stored JSON text for a key
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM app_settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(raw,)| raw))
    }

    /// Get a setting value with a default. Malformed values fall back to the default.
    pub async fn get_or_default<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T> {
        let Some(raw) = self.get_raw(key).await? else {
            return Ok(default);
        };

        match serde_json::from_str(&raw) {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring malformed setting");
                Ok(default)
            }
        }
    }

    /// Insert or replace a setting
    pub async fn set<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        sqlx::query(
            r#"
            INSERT INTO app_settings (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(raw)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Read every pipeline setting, applying defaults for anything unset
    pub async fn load_pipeline_settings(&self) -> Result<PipelineSettings> {
        let d = PipelineSettings::default();

        Ok(PipelineSettings {
            issues_folder: self
                .get_or_default::<Option<String>>(KEY_ISSUES_FOLDER, None)
                .await?
                .filter(|s| !s.trim().is_empty()),
            issues_organization: self
                .get_or_default(KEY_ISSUES_ORGANIZATION, d.issues_organization)
                .await?,
            companion_extensions: self
                .get_or_default(KEY_COMPANION_EXTENSIONS, d.companion_extensions)
                .await?,
            quality_priorities: self
                .get_or_default(KEY_QUALITY_PRIORITIES, d.quality_priorities)
                .await?,
            season_naming_template: self
                .get_or_default(KEY_SEASON_TEMPLATE, d.season_naming_template)
                .await?,
            episode_naming_template: self
                .get_or_default(KEY_EPISODE_TEMPLATE, d.episode_naming_template)
                .await?,
            movie_naming_template: self
                .get_or_default(KEY_MOVIE_TEMPLATE, d.movie_naming_template)
                .await?,
            min_file_size_mb: self
                .get_or_default(KEY_MIN_FILE_SIZE_MB, d.min_file_size_mb)
                .await?,
            issues_auto_purge_days: self
                .get_or_default(KEY_AUTO_PURGE_DAYS, d.issues_auto_purge_days)
                .await?,
            metadata_provider_priority: self
                .get_or_default(KEY_PROVIDER_PRIORITY, d.metadata_provider_priority)
                .await?,
            cleanup_empty_source_folders: self
                .get_or_default(KEY_CLEANUP_SOURCE_FOLDERS, d.cleanup_empty_source_folders)
                .await?,
        })
    }
}
