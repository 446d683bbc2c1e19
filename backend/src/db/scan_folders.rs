//! Scan folder repository
//!
//! Scan folders are the roots the pipeline knows about: `watch` folders feed
//! the intake queue, `tv` and `movies` folders receive auto-imported titles.
//! Every enabled folder is also a boundary for empty-directory cleanup.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::{bool_to_int, decode_err, int_to_bool, str_to_uuid, uuid_to_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    Watch,
    Tv,
    Movies,
}

impl FolderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderType::Watch => "watch",
            FolderType::Tv => "tv",
            FolderType::Movies => "movies",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "watch" => Some(FolderType::Watch),
            "tv" => Some(FolderType::Tv),
            "movies" => Some(FolderType::Movies),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanFolderRecord {
    pub id: Uuid,
    pub path: String,
    pub folder_type: FolderType,
    pub enabled: bool,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for ScanFolderRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let type_str: String = row.try_get("folder_type")?;
        let enabled: i32 = row.try_get("enabled")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(decode_err)?,
            path: row.try_get("path")?,
            folder_type: FolderType::parse(&type_str).ok_or_else(|| {
                decode_err(anyhow::anyhow!("Unknown folder_type '{}'", type_str))
            })?,
            enabled: int_to_bool(enabled),
        })
    }
}

pub struct ScanFolderRepository {
    pool: SqlitePool,
}

impl ScanFolderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All enabled folders
    pub async fn list_enabled(&self) -> Result<Vec<ScanFolderRecord>> {
        let records = sqlx::query_as::<_, ScanFolderRecord>(
            "SELECT id, path, folder_type, enabled FROM scan_folders WHERE enabled = 1 ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Enabled folders of one type
    pub async fn list_by_type(&self, folder_type: FolderType) -> Result<Vec<ScanFolderRecord>> {
        let records = sqlx::query_as::<_, ScanFolderRecord>(
            r#"
            SELECT id, path, folder_type, enabled FROM scan_folders
            WHERE folder_type = ?1 AND enabled = 1
            ORDER BY path
            "#,
        )
        .bind(folder_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Register a folder, or re-enable it if the path is already known
    pub async fn upsert(&self, path: &str, folder_type: FolderType) -> Result<ScanFolderRecord> {
        sqlx::query(
            r#"
            INSERT INTO scan_folders (id, path, folder_type, enabled)
            VALUES (?1, ?2, ?3, 1)
            ON CONFLICT (path) DO UPDATE SET folder_type = excluded.folder_type, enabled = 1
            "#,
        )
        .bind(uuid_to_str(Uuid::new_v4()))
        .bind(path)
        .bind(folder_type.as_str())
        .execute(&self.pool)
        .await?;

        let record = sqlx::query_as::<_, ScanFolderRecord>(
            "SELECT id, path, folder_type, enabled FROM scan_folders WHERE path = ?1",
        )
        .bind(path)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE scan_folders SET enabled = ?2 WHERE id = ?1")
            .bind(uuid_to_str(id))
            .bind(bool_to_int(enabled))
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
