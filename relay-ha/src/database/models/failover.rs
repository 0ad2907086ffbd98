//! Failover audit model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Append-only failover audit record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FailoverEventDbModel {
    pub id: String,
    /// channel or credential
    pub entity_type: String,
    pub failed_entity_id: String,
    pub replacement_entity_id: Option<String>,
    pub reason: String,
    pub files_affected: i64,
    pub success: bool,
    pub recovery_time_ms: Option<i64>,
    pub event_time: i64,
}

impl FailoverEventDbModel {
    pub fn new(
        entity: FailoverEntity,
        failed_entity_id: impl Into<String>,
        replacement_entity_id: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity_type: entity.as_str().to_string(),
            failed_entity_id: failed_entity_id.into(),
            success: replacement_entity_id.is_some(),
            replacement_entity_id,
            reason: reason.into(),
            files_affected: 0,
            recovery_time_ms: None,
            event_time: crate::database::time::now_ms(),
        }
    }

    pub fn with_files_affected(mut self, files: i64) -> Self {
        self.files_affected = files;
        self
    }

    pub fn with_recovery_time_ms(mut self, ms: i64) -> Self {
        self.recovery_time_ms = Some(ms);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailoverEntity {
    Channel,
    Credential,
}

impl FailoverEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Credential => "credential",
        }
    }
}

/// Aggregate failover statistics over a window.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize, PartialEq)]
pub struct FailoverStats {
    pub total_failovers: i64,
    pub successful_failovers: i64,
    pub avg_recovery_time_ms: Option<f64>,
}
