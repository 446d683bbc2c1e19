//! Show catalog repository

use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::{
    decode_err, json_to_vec, str_to_datetime, str_to_uuid, uuid_to_str, vec_to_json,
};

pub const DEFAULT_SEASON_TEMPLATE: &str = "Season {season:02}";
pub const DEFAULT_EPISODE_TEMPLATE: &str = "{show} - S{season:02}E{episode:02} - {title}";

/// Show record from database
#[derive(Debug, Clone)]
pub struct ShowRecord {
    pub id: Uuid,
    pub name: String,
    pub aliases: Vec<String>,
    pub year: Option<i32>,
    pub overview: Option<String>,
    pub folder_path: Option<String>,
    pub season_naming_template: String,
    pub episode_naming_template: String,
    /// "manual", "tmdb" or "tvdb"
    pub metadata_source: String,
    pub remote_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ShowRecord {
    /// Name followed by every alias, in matching order
    pub fn match_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for ShowRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let aliases_str: String = row.try_get("aliases")?;
        let created_str: String = row.try_get("created_at")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(decode_err)?,
            name: row.try_get("name")?,
            aliases: json_to_vec(&aliases_str),
            year: row.try_get("year")?,
            overview: row.try_get("overview")?,
            folder_path: row.try_get("folder_path")?,
            season_naming_template: row.try_get("season_naming_template")?,
            episode_naming_template: row.try_get("episode_naming_template")?,
            metadata_source: row.try_get("metadata_source")?,
            remote_id: row.try_get("remote_id")?,
            created_at: str_to_datetime(&created_str).map_err(decode_err)?,
        })
    }
}

/// Input for creating a show
#[derive(Debug, Clone)]
pub struct CreateShow {
    pub name: String,
    pub aliases: Vec<String>,
    pub year: Option<i32>,
    pub overview: Option<String>,
    pub folder_path: Option<String>,
    pub season_naming_template: Option<String>,
    pub episode_naming_template: Option<String>,
    pub metadata_source: String,
    pub remote_id: Option<String>,
}

impl CreateShow {
    /// A manually catalogued show with default naming templates
    pub fn manual(name: impl Into<String>, folder_path: Option<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            year: None,
            overview: None,
            folder_path,
            season_naming_template: None,
            episode_naming_template: None,
            metadata_source: "manual".to_string(),
            remote_id: None,
        }
    }
}

const SHOW_COLUMNS: &str = "id, name, aliases, year, overview, folder_path, \
     season_naming_template, episode_naming_template, metadata_source, remote_id, created_at";

pub struct ShowRepository {
    pool: SqlitePool,
}

impl ShowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All shows, ordered by name
    pub async fn list_all(&self) -> Result<Vec<ShowRecord>> {
        let records = sqlx::query_as::<_, ShowRecord>(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<ShowRecord>> {
        let record = sqlx::query_as::<_, ShowRecord>(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows WHERE id = ?1"
        ))
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Look up a show by its provider identity
    pub async fn get_by_remote_id(
        &self,
        metadata_source: &str,
        remote_id: &str,
    ) -> Result<Option<ShowRecord>> {
        let record = sqlx::query_as::<_, ShowRecord>(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows WHERE metadata_source = ?1 AND remote_id = ?2"
        ))
        .bind(metadata_source)
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn exists_by_remote_id(&self, metadata_source: &str, remote_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM shows WHERE metadata_source = ?1 AND remote_id = ?2",
        )
        .bind(metadata_source)
        .bind(remote_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    pub async fn create(&self, input: CreateShow) -> Result<ShowRecord> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO shows (id, name, aliases, year, overview, folder_path,
                               season_naming_template, episode_naming_template,
                               metadata_source, remote_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(&input.name)
        .bind(vec_to_json(&input.aliases))
        .bind(input.year)
        .bind(&input.overview)
        .bind(&input.folder_path)
        .bind(
            input
                .season_naming_template
                .as_deref()
                .unwrap_or(DEFAULT_SEASON_TEMPLATE),
        )
        .bind(
            input
                .episode_naming_template
                .as_deref()
                .unwrap_or(DEFAULT_EPISODE_TEMPLATE),
        )
        .bind(&input.metadata_source)
        .bind(&input.remote_id)
        .execute(&self.pool)
        .await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Show {} vanished after insert", id))
    }

    pub async fn set_folder_path(&self, id: Uuid, folder_path: &str) -> Result<()> {
        sqlx::query("UPDATE shows SET folder_path = ?2, updated_at = datetime('now') WHERE id = ?1")
            .bind(uuid_to_str(id))
            .bind(folder_path)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete a show; episodes go with it
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM shows WHERE id = ?1")
            .bind(uuid_to_str(id))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
