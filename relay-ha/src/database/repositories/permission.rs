//! Permission verification repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{
    ChannelConfigDbModel, PermissionSyncHistoryDbModel, PermissionTestResultDbModel,
};
use crate::database::time::now_ms;

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn list_active_channel_configs(&self) -> Result<Vec<ChannelConfigDbModel>>;
    async fn create_channel_config(&self, config: &ChannelConfigDbModel) -> Result<()>;
    async fn insert_test_result(
        &self,
        channel_id: &str,
        permission_type: &str,
        success: bool,
        error_message: Option<&str>,
        identity: &str,
    ) -> Result<()>;
    async fn list_test_results(&self, channel_id: &str) -> Result<Vec<PermissionTestResultDbModel>>;
    async fn insert_sync_history(
        &self,
        total: i64,
        successful: i64,
        failed: i64,
        results_data: &str,
    ) -> Result<()>;
    async fn latest_sync(&self) -> Result<Option<PermissionSyncHistoryDbModel>>;
}

/// SQLx implementation of PermissionRepository.
pub struct SqlxPermissionRepository {
    pool: SqlitePool,
}

impl SqlxPermissionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionRepository for SqlxPermissionRepository {
    async fn list_active_channel_configs(&self) -> Result<Vec<ChannelConfigDbModel>> {
        let rows = sqlx::query_as::<_, ChannelConfigDbModel>(
            "SELECT * FROM channel_configs WHERE status = 'active' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_channel_config(&self, config: &ChannelConfigDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO channel_configs (id, channel_id, channel_type, required_permissions, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&config.id)
        .bind(&config.channel_id)
        .bind(&config.channel_type)
        .bind(&config.required_permissions)
        .bind(&config.status)
        .bind(config.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_test_result(
        &self,
        channel_id: &str,
        permission_type: &str,
        success: bool,
        error_message: Option<&str>,
        identity: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO permission_test_results (
                channel_id, permission_type, success, error_message, identity, test_time
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(channel_id)
        .bind(permission_type)
        .bind(success)
        .bind(error_message)
        .bind(identity)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_test_results(&self, channel_id: &str) -> Result<Vec<PermissionTestResultDbModel>> {
        let rows = sqlx::query_as::<_, PermissionTestResultDbModel>(
            "SELECT * FROM permission_test_results WHERE channel_id = ? ORDER BY id",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_sync_history(
        &self,
        total: i64,
        successful: i64,
        failed: i64,
        results_data: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO permission_sync_history (
                sync_time, total_tokens, successful_tokens, failed_tokens, results_data
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(now_ms())
        .bind(total)
        .bind(successful)
        .bind(failed)
        .bind(results_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_sync(&self) -> Result<Option<PermissionSyncHistoryDbModel>> {
        let row = sqlx::query_as::<_, PermissionSyncHistoryDbModel>(
            "SELECT * FROM permission_sync_history ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
