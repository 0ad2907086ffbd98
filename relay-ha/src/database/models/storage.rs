//! Storage record database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One content item replicated onto one channel.
/// `(content_id, channel_id)` is unique.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct StorageRecordDbModel {
    pub id: String,
    pub content_id: String,
    /// Internal channel id (`channels.id`).
    pub channel_id: String,
    /// Provider message reference.
    pub message_id: i64,
    pub message_link: String,
    /// active, corrupted, missing or archived
    pub status: String,
    pub size_bytes: Option<i64>,
    /// Hex SHA-256 of the content bytes.
    pub checksum: Option<String>,
    pub verification_attempts: i64,
    pub consecutive_failures: i64,
    pub last_verified: Option<i64>,
    pub stored_at: i64,
}

impl StorageRecordDbModel {
    pub fn new(
        content_id: impl Into<String>,
        channel_id: impl Into<String>,
        message_id: i64,
        message_link: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_id: content_id.into(),
            channel_id: channel_id.into(),
            message_id,
            message_link: message_link.into(),
            status: StorageStatus::Active.as_str().to_string(),
            size_bytes: None,
            checksum: None,
            verification_attempts: 0,
            consecutive_failures: 0,
            last_verified: None,
            stored_at: crate::database::time::now_ms(),
        }
    }

    pub fn storage_status(&self) -> Option<StorageStatus> {
        StorageStatus::parse(&self.status)
    }
}

/// Replica status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StorageStatus {
    Active,
    Corrupted,
    Missing,
    Archived,
}

impl StorageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Corrupted => "corrupted",
            Self::Missing => "missing",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "corrupted" => Some(Self::Corrupted),
            "missing" => Some(Self::Missing),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}
