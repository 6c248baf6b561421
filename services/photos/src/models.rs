//! Relational records: users, photos, albums and album membership.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Processing status of a photo row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStatus {
    /// Row exists, consistency across stores not yet confirmed
    Uploading,
    /// Bytes stored and row confirmed
    Processed,
    /// Terminal orchestration error
    Failed,
}

impl PhotoStatus {
    pub const ALL: [PhotoStatus; 3] = [
        PhotoStatus::Uploading,
        PhotoStatus::Processed,
        PhotoStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStatus::Uploading => "uploading",
            PhotoStatus::Processed => "processed",
            PhotoStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown photo status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for PhotoStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(PhotoStatus::Uploading),
            "processed" => Ok(PhotoStatus::Processed),
            "failed" => Ok(PhotoStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Registered account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Photo row, the authoritative record of a photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: Uuid,
    pub user_id: i64,
    /// Object-store key of the original bytes
    pub storage_path: String,
    pub status: PhotoStatus,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Photo {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = status.parse().map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            storage_path: row.try_get("storage_path")?,
            status,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Named collection of photos owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Album {
    pub id: Uuid,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Album membership row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AlbumPhoto {
    pub id: Uuid,
    pub album_id: Uuid,
    pub photo_id: Uuid,
    pub added_at: DateTime<Utc>,
}

/// Insert parameters for a photo row
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub id: Uuid,
    pub user_id: i64,
    pub storage_path: String,
    pub status: PhotoStatus,
}

/// Partial update of a photo row
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotoChanges {
    pub storage_path: Option<String>,
    pub status: Option<PhotoStatus>,
}

impl PhotoChanges {
    pub fn status(status: PhotoStatus) -> Self {
        Self {
            storage_path: None,
            status: Some(status),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.storage_path.is_none() && self.status.is_none()
    }
}

/// Partial update of an album row
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlbumChanges {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl AlbumChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none()
    }
}

/// Partial update of a user row
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.password_hash.is_none()
    }
}

/// Pagination window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: i64,
    pub limit: i64,
}

impl Page {
    pub const MAX_LIMIT: i64 = 1000;

    pub fn new(skip: i64, limit: i64) -> Self {
        Self { skip, limit }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 100,
        }
    }
}

/// Per-status photo counts for one user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhotoCounts {
    pub total: i64,
    pub uploading: i64,
    pub processed: i64,
    pub failed: i64,
}
