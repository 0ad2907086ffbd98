//! Stored credential candidates.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Backup credential candidate kept in the datastore.
#[derive(Clone, FromRow, Serialize, Deserialize)]
pub struct CredentialDbModel {
    pub id: String,
    pub label: Option<String>,
    pub secret: String,
    pub app_id: i64,
    pub app_hash: String,
    /// Higher number = tried first.
    pub priority: i64,
    /// active or disabled
    pub status: String,
    pub created_at: i64,
}

impl CredentialDbModel {
    pub fn new(secret: impl Into<String>, app_id: i64, app_hash: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: None,
            secret: secret.into(),
            app_id,
            app_hash: app_hash.into(),
            priority: 0,
            status: "active".to_string(),
            created_at: crate::database::time::now_ms(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

impl std::fmt::Debug for CredentialDbModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialDbModel")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("secret", &"<redacted>")
            .field("app_id", &self.app_id)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .finish()
    }
}
