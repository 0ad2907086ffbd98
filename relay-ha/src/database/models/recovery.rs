//! Recovery package index model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Index row for a recovery package written to disk.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RecoveryPackageDbModel {
    pub package_id: String,
    pub checksum: String,
    /// JSON array of file paths.
    pub locations: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

impl RecoveryPackageDbModel {
    pub fn location_list(&self) -> Vec<String> {
        serde_json::from_str(&self.locations).unwrap_or_default()
    }
}
