//! Health history database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One probe run against one channel.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChannelHealthLogDbModel {
    pub id: i64,
    pub channel_id: String,
    pub check_time: i64,
    /// healthy, degraded or failed
    pub status: String,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub health_score: Option<i64>,
    /// basic, upload, download or permissions
    pub test_type: String,
}

/// What kind of operation produced a health log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HealthTestType {
    Basic,
    Upload,
    Download,
    Permissions,
}

impl HealthTestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Permissions => "permissions",
        }
    }
}

/// New health log row, before the database assigns an id.
#[derive(Debug, Clone)]
pub struct NewChannelHealthLog {
    pub channel_id: String,
    pub status: String,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub health_score: Option<i64>,
    pub test_type: HealthTestType,
}

/// Overall health snapshot persisted on every monitor tick.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SystemHealthHistoryDbModel {
    pub id: i64,
    pub overall_status: String,
    pub message: String,
    /// JSON array of component names.
    pub critical_components: String,
    /// JSON array of component names.
    pub degraded_components: String,
    /// JSON object keyed by component name.
    pub components: String,
    pub check_time: i64,
}

/// Latest status blob per component.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SystemStatusDbModel {
    pub component: String,
    /// JSON blob.
    pub status_data: String,
    pub updated_at: i64,
}

/// Row counts of `system_health_history` by status inside a window.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize, PartialEq)]
pub struct HealthCounts {
    pub total_checks: i64,
    pub healthy_checks: i64,
    pub degraded_checks: i64,
    pub critical_checks: i64,
}
