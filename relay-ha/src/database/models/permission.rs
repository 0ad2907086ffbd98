//! Channel permission models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Extra channel registered for permission verification.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChannelConfigDbModel {
    pub id: String,
    pub channel_id: String,
    pub channel_type: String,
    /// JSON array of capability names.
    pub required_permissions: Option<String>,
    pub status: String,
    pub created_at: i64,
}

impl ChannelConfigDbModel {
    pub fn new(
        channel_id: impl Into<String>,
        channel_type: impl Into<String>,
        required_permissions: &[&str],
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel_id.into(),
            channel_type: channel_type.into(),
            required_permissions: serde_json::to_string(required_permissions).ok(),
            status: "active".to_string(),
            created_at: crate::database::time::now_ms(),
        }
    }

    /// Decode the capability list; malformed JSON yields an empty list.
    pub fn permissions(&self) -> Vec<String> {
        self.required_permissions
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// One permission probe result.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PermissionTestResultDbModel {
    pub id: i64,
    pub channel_id: String,
    pub permission_type: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub identity: String,
    pub test_time: i64,
}

/// One synchronization pass across every credential.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PermissionSyncHistoryDbModel {
    pub id: i64,
    pub sync_time: i64,
    pub total_tokens: i64,
    pub successful_tokens: i64,
    pub failed_tokens: i64,
    pub results_data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_decode() {
        let cfg = ChannelConfigDbModel::new("@archive", "content_channel", &["send_messages"]);
        assert_eq!(cfg.permissions(), vec!["send_messages".to_string()]);

        let broken = ChannelConfigDbModel {
            required_permissions: Some("not json".into()),
            ..cfg
        };
        assert!(broken.permissions().is_empty());
    }
}
