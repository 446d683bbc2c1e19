//! Episode catalog repository

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::{
    datetime_to_str, decode_err, str_to_datetime_opt, str_to_uuid, uuid_to_str,
};

/// Whether a catalog entry currently owns a file on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Missing,
    Found,
    Renamed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Missing => "missing",
            FileStatus::Found => "found",
            FileStatus::Renamed => "renamed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missing" => Some(FileStatus::Missing),
            "found" => Some(FileStatus::Found),
            "renamed" => Some(FileStatus::Renamed),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FileStatus::Missing)
    }
}

/// Episode record from database
#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub id: Uuid,
    pub show_id: Uuid,
    pub season: i32,
    pub episode: i32,
    pub title: Option<String>,
    pub air_date: Option<String>,
    pub file_path: Option<String>,
    pub file_status: FileStatus,
    pub matched_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for EpisodeRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let show_id_str: String = row.try_get("show_id")?;
        let status_str: String = row.try_get("file_status")?;
        let matched_str: Option<String> = row.try_get("matched_at")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(decode_err)?,
            show_id: str_to_uuid(&show_id_str).map_err(decode_err)?,
            season: row.try_get("season")?,
            episode: row.try_get("episode")?,
            title: row.try_get("title")?,
            air_date: row.try_get("air_date")?,
            file_path: row.try_get("file_path")?,
            file_status: FileStatus::parse(&status_str).ok_or_else(|| {
                decode_err(anyhow::anyhow!("Unknown file_status '{}'", status_str))
            })?,
            matched_at: str_to_datetime_opt(matched_str.as_deref()).map_err(decode_err)?,
        })
    }
}

/// One episode in a batch insert
#[derive(Debug, Clone)]
pub struct CreateEpisode {
    pub season: i32,
    pub episode: i32,
    pub title: Option<String>,
    pub air_date: Option<String>,
}

const EPISODE_COLUMNS: &str =
    "id, show_id, season, episode, title, air_date, file_path, file_status, matched_at";

pub struct EpisodeRepository {
    pool: SqlitePool,
}

impl EpisodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get all episodes for a show
    pub async fn list_by_show(&self, show_id: Uuid) -> Result<Vec<EpisodeRecord>> {
        let records = sqlx::query_as::<_, EpisodeRecord>(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE show_id = ?1 ORDER BY season, episode"
        ))
        .bind(uuid_to_str(show_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<EpisodeRecord>> {
        let record = sqlx::query_as::<_, EpisodeRecord>(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE id = ?1"
        ))
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Find a specific episode by its number
    pub async fn get_by_number(
        &self,
        show_id: Uuid,
        season: i32,
        episode: i32,
    ) -> Result<Option<EpisodeRecord>> {
        let record = sqlx::query_as::<_, EpisodeRecord>(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE show_id = ?1 AND season = ?2 AND episode = ?3"
        ))
        .bind(uuid_to_str(show_id))
        .bind(season)
        .bind(episode)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Insert episodes for a show in one transaction; existing numbers are left alone
    pub async fn create_batch(&self, show_id: Uuid, episodes: &[CreateEpisode]) -> Result<usize> {
        if episodes.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut count = 0;

        for ep in episodes {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO episodes (id, show_id, season, episode, title, air_date, file_status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'missing')
                "#,
            )
            .bind(uuid_to_str(Uuid::new_v4()))
            .bind(uuid_to_str(show_id))
            .bind(ep.season)
            .bind(ep.episode)
            .bind(&ep.title)
            .bind(&ep.air_date)
            .execute(&mut *tx)
            .await?;
            count += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(count)
    }

    /// Record that an episode now owns `file_path`
    pub async fn mark_found(&self, id: Uuid, file_path: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE episodes
            SET file_path = ?2, file_status = 'found', matched_at = ?3, updated_at = datetime('now')
            WHERE id = ?1
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(file_path)
        .bind(datetime_to_str(chrono::Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Put an episode back to `missing` and forget its file
    pub async fn mark_missing(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE episodes
            SET file_path = NULL, file_status = 'missing', matched_at = NULL, updated_at = datetime('now')
            WHERE id = ?1
            "#,
        )
        .bind(uuid_to_str(id))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
