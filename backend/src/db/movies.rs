//! Movie catalog repository

use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::episodes::FileStatus;
use crate::db::sqlite_helpers::{
    datetime_to_str, decode_err, str_to_datetime_opt, str_to_uuid, uuid_to_str,
};

/// Movie record from database
#[derive(Debug, Clone)]
pub struct MovieRecord {
    pub id: Uuid,
    pub title: String,
    pub year: Option<i32>,
    pub folder_path: Option<String>,
    pub edition: Option<String>,
    pub file_path: Option<String>,
    pub file_status: FileStatus,
    pub metadata_source: Option<String>,
    pub remote_id: Option<String>,
    pub matched_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for MovieRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let status_str: String = row.try_get("file_status")?;
        let matched_str: Option<String> = row.try_get("matched_at")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(decode_err)?,
            title: row.try_get("title")?,
            year: row.try_get("year")?,
            folder_path: row.try_get("folder_path")?,
            edition: row.try_get("edition")?,
            file_path: row.try_get("file_path")?,
            file_status: FileStatus::parse(&status_str).ok_or_else(|| {
                decode_err(anyhow::anyhow!("Unknown file_status '{}'", status_str))
            })?,
            metadata_source: row.try_get("metadata_source")?,
            remote_id: row.try_get("remote_id")?,
            matched_at: str_to_datetime_opt(matched_str.as_deref()).map_err(decode_err)?,
        })
    }
}

/// Input for creating a movie
#[derive(Debug, Clone, Default)]
pub struct CreateMovie {
    pub title: String,
    pub year: Option<i32>,
    pub folder_path: Option<String>,
    pub edition: Option<String>,
    pub metadata_source: Option<String>,
    pub remote_id: Option<String>,
}

const MOVIE_COLUMNS: &str = "id, title, year, folder_path, edition, file_path, file_status, \
     metadata_source, remote_id, matched_at";

pub struct MovieRepository {
    pool: SqlitePool,
}

impl MovieRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_all(&self) -> Result<Vec<MovieRecord>> {
        let records = sqlx::query_as::<_, MovieRecord>(&format!(
            "SELECT {MOVIE_COLUMNS} FROM movies ORDER BY title, year"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<MovieRecord>> {
        let record = sqlx::query_as::<_, MovieRecord>(&format!(
            "SELECT {MOVIE_COLUMNS} FROM movies WHERE id = ?1"
        ))
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_by_remote_id(
        &self,
        metadata_source: &str,
        remote_id: &str,
    ) -> Result<Option<MovieRecord>> {
        let record = sqlx::query_as::<_, MovieRecord>(&format!(
            "SELECT {MOVIE_COLUMNS} FROM movies WHERE metadata_source = ?1 AND remote_id = ?2"
        ))
        .bind(metadata_source)
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn create(&self, input: CreateMovie) -> Result<MovieRecord> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO movies (id, title, year, folder_path, edition, file_status,
                                metadata_source, remote_id)
            VALUES (?1, ?2, ?3, ?4, ?5, 'missing', ?6, ?7)
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(&input.title)
        .bind(input.year)
        .bind(&input.folder_path)
        .bind(&input.edition)
        .bind(&input.metadata_source)
        .bind(&input.remote_id)
        .execute(&self.pool)
        .await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Movie {} vanished after insert", id))
    }

    pub async fn set_folder_path(&self, id: Uuid, folder_path: &str) -> Result<()> {
        sqlx::query("UPDATE movies SET folder_path = ?2, updated_at = datetime('now') WHERE id = ?1")
            .bind(uuid_to_str(id))
            .bind(folder_path)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Release a movie's file claim
    pub async fn mark_missing(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE movies
            SET file_path = NULL, file_status = 'missing', matched_at = NULL, updated_at = datetime('now')
            WHERE id = ?1
            "#,
        )
        .bind(uuid_to_str(id))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record that a movie now owns `file_path`
    pub async fn mark_found(&self, id: Uuid, file_path: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE movies
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
}
