//! SQLite conversion helpers
//!
//! SQLite has no UUID, array or timestamp types. Catalog rows keep IDs as
//! TEXT, alias lists as JSON TEXT and timestamps as RFC3339 TEXT; these
//! helpers convert in both directions for the hand-written `FromRow` impls.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

// ============================================================================
// UUID
// ============================================================================

#[inline]
pub fn uuid_to_str(id: Uuid) -> String {
    id.to_string()
}

#[inline]
pub fn str_to_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| anyhow!("Invalid UUID '{}': {}", s, e))
}

// ============================================================================
// JSON arrays
// ============================================================================

/// Serialize a slice for a JSON TEXT column ("[]" on failure)
#[inline]
pub fn vec_to_json<T: Serialize>(v: &[T]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

/// Deserialize a JSON TEXT column, treating garbage as empty
#[inline]
pub fn json_to_vec<T: DeserializeOwned>(s: &str) -> Vec<T> {
    serde_json::from_str(s).unwrap_or_default()
}

// ============================================================================
// Timestamps
// ============================================================================

#[inline]
pub fn datetime_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse RFC3339, falling back to SQLite's `datetime('now')` format
pub fn str_to_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
                .map_err(|e| anyhow!("Invalid datetime '{}': {}", s, e))
        })
}

#[inline]
pub fn str_to_datetime_opt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match s {
        Some(s) if !s.is_empty() => Ok(Some(str_to_datetime(s)?)),
        _ => Ok(None),
    }
}

// ============================================================================
// Booleans
// ============================================================================

#[inline]
pub fn bool_to_int(b: bool) -> i32 {
    if b { 1 } else { 0 }
}

#[inline]
pub fn int_to_bool(i: i32) -> bool {
    i != 0
}

/// Wrap a conversion failure as a row decode error
pub fn decode_err(e: anyhow::Error) -> sqlx::Error {
    sqlx::Error::Decode(e.into())
}
