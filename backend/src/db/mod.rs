//! Database connection and catalog repositories

pub mod episodes;
pub mod logs;
pub mod movies;
pub mod scan_folders;
pub mod settings;
pub mod shows;
pub mod sqlite_helpers;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{info, warn};

pub use episodes::{CreateEpisode, EpisodeRecord, EpisodeRepository, FileStatus};
pub use logs::{CreatePipelineLog, LogResult, PipelineAction, PipelineLogRecord, PipelineLogRepository};
pub use movies::{CreateMovie, MovieRecord, MovieRepository};
pub use scan_folders::{FolderType, ScanFolderRecord, ScanFolderRepository};
pub use settings::{PipelineSettings, SettingsRepository};
pub use shows::{CreateShow, ShowRecord, ShowRepository};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5)
    }

    /// Open (creating if needed) the SQLite file at `path`
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::get_max_connections())
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        info!(path = %path.display(), "Database connected");
        Ok(Self { pool })
    }

    /// Open with retries, for startup when the volume may not be mounted yet
    pub async fn connect_with_retry(path: &Path, attempts: u32, retry_interval: Duration) -> Result<Self> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::connect(path).await {
                Ok(db) => return Ok(db),
                Err(e) if attempt < attempts => {
                    warn!(
                        error = %e,
                        attempt = attempt,
                        retry_in_secs = retry_interval.as_secs(),
                        "Database connection failed, retrying"
                    );
                    tokio::time::sleep(retry_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Private in-memory database, migrated and ready to use
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // A single connection so every query sees the same memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a show repository
    pub fn shows(&self) -> ShowRepository {
        ShowRepository::new(self.pool.clone())
    }

    /// Get an episode repository
    pub fn episodes(&self) -> EpisodeRepository {
        EpisodeRepository::new(self.pool.clone())
    }

    /// Get a movies repository
    pub fn movies(&self) -> MovieRepository {
        MovieRepository::new(self.pool.clone())
    }

    /// Get a scan folder repository
    pub fn scan_folders(&self) -> ScanFolderRepository {
        ScanFolderRepository::new(self.pool.clone())
    }

    /// Get the pipeline log repository
    pub fn pipeline_logs(&self) -> PipelineLogRepository {
        PipelineLogRepository::new(self.pool.clone())
    }

    /// Get a settings repository
    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.pool.clone())
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_show_delete_cascades_to_episodes() {
        let db = Database::in_memory().await.unwrap();
        let show = db
            .shows()
            .create(CreateShow::manual("Severance", Some("/tv/Severance".into())))
            .await
            .unwrap();
        let inserted = db
            .episodes()
            .create_batch(
                show.id,
                &[
                    CreateEpisode { season: 1, episode: 1, title: Some("Good News About Hell".into()), air_date: None },
                    CreateEpisode { season: 1, episode: 2, title: None, air_date: None },
                ],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        assert!(db.shows().delete(show.id).await.unwrap());
        assert!(db.episodes().list_by_show(show.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_batch_skips_existing_numbers() {
        let db = Database::in_memory().await.unwrap();
        let show = db.shows().create(CreateShow::manual("Andor", None)).await.unwrap();
        let eps = [CreateEpisode { season: 1, episode: 1, title: None, air_date: None }];

        assert_eq!(db.episodes().create_batch(show.id, &eps).await.unwrap(), 1);
        assert_eq!(db.episodes().create_batch(show.id, &eps).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_found_sets_status_and_timestamp() {
        let db = Database::in_memory().await.unwrap();
        let show = db.shows().create(CreateShow::manual("Dark", None)).await.unwrap();
        db.episodes()
            .create_batch(show.id, &[CreateEpisode { season: 2, episode: 3, title: None, air_date: None }])
            .await
            .unwrap();

        let ep = db.episodes().get_by_number(show.id, 2, 3).await.unwrap().unwrap();
        assert_eq!(ep.file_status, FileStatus::Missing);

        db.episodes().mark_found(ep.id, "/tv/Dark/Season 02/x.mkv").await.unwrap();
        let ep = db.episodes().get_by_id(ep.id).await.unwrap().unwrap();
        assert_eq!(ep.file_status, FileStatus::Found);
        assert_eq!(ep.file_path.as_deref(), Some("/tv/Dark/Season 02/x.mkv"));
        assert!(ep.matched_at.is_some());
    }

    #[tokio::test]
    async fn test_settings_defaults_and_overrides() {
        let db = Database::in_memory().await.unwrap();
        let settings = db.settings().load_pipeline_settings().await.unwrap();
        assert_eq!(settings.min_file_size_mb, 0);
        assert!(settings.companion_extensions.contains(&"srt".to_string()));

        db.settings().set(settings::KEY_MIN_FILE_SIZE_MB, &50u64).await.unwrap();
        db.settings().set(settings::KEY_ISSUES_ORGANIZATION, &"flat").await.unwrap();
        let settings = db.settings().load_pipeline_settings().await.unwrap();
        assert_eq!(settings.min_file_size_mb, 50);
        assert_eq!(
            settings.issues_organization,
            crate::services::organizer::IssuesOrganization::Flat
        );
    }

    #[tokio::test]
    async fn test_malformed_setting_falls_back() {
        let db = Database::in_memory().await.unwrap();
        db.settings().set(settings::KEY_MIN_FILE_SIZE_MB, &"lots").await.unwrap();
        let settings = db.settings().load_pipeline_settings().await.unwrap();
        assert_eq!(settings.min_file_size_mb, 0);
    }
}
