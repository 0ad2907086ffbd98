//! Health history repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{
    ChannelHealthLogDbModel, HealthCounts, NewChannelHealthLog, SystemHealthHistoryDbModel,
    SystemStatusDbModel,
};
use crate::database::time::now_ms;

/// Overall snapshot to persist, with components already serialized.
#[derive(Debug, Clone)]
pub struct NewSystemHealthSnapshot {
    pub overall_status: String,
    pub message: String,
    pub critical_components: String,
    pub degraded_components: String,
    pub components: String,
}

/// Health history repository trait.
#[async_trait]
pub trait HealthRepository: Send + Sync {
    async fn insert_channel_log(&self, log: &NewChannelHealthLog) -> Result<()>;
    async fn list_channel_logs(
        &self,
        channel_id: &str,
        limit: i64,
    ) -> Result<Vec<ChannelHealthLogDbModel>>;
    async fn insert_system_snapshot(&self, snapshot: &NewSystemHealthSnapshot) -> Result<i64>;
    /// Critical and degraded snapshots since `since_ms`, newest first.
    async fn list_problem_snapshots(
        &self,
        since_ms: i64,
        limit: i64,
    ) -> Result<Vec<SystemHealthHistoryDbModel>>;
    async fn health_counts(&self, since_ms: i64) -> Result<HealthCounts>;
    async fn upsert_system_status(&self, component: &str, status_data: &str) -> Result<()>;
    async fn get_system_status(&self, component: &str) -> Result<Option<SystemStatusDbModel>>;
}

/// SQLx implementation of HealthRepository.
pub struct SqlxHealthRepository {
    pool: SqlitePool,
}

impl SqlxHealthRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthRepository for SqlxHealthRepository {
    async fn insert_channel_log(&self, log: &NewChannelHealthLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO channel_health_logs (
                channel_id, check_time, status, response_time_ms,
                error_message, health_score, test_type
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.channel_id)
        .bind(now_ms())
        .bind(&log.status)
        .bind(log.response_time_ms)
        .bind(&log.error_message)
        .bind(log.health_score)
        .bind(log.test_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_channel_logs(
        &self,
        channel_id: &str,
        limit: i64,
    ) -> Result<Vec<ChannelHealthLogDbModel>> {
        let logs = sqlx::query_as::<_, ChannelHealthLogDbModel>(
            "SELECT * FROM channel_health_logs WHERE channel_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(channel_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    async fn insert_system_snapshot(&self, snapshot: &NewSystemHealthSnapshot) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO system_health_history (
                overall_status, message, critical_components,
                degraded_components, components, check_time
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.overall_status)
        .bind(&snapshot.message)
        .bind(&snapshot.critical_components)
        .bind(&snapshot.degraded_components)
        .bind(&snapshot.components)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_problem_snapshots(
        &self,
        since_ms: i64,
        limit: i64,
    ) -> Result<Vec<SystemHealthHistoryDbModel>> {
        let rows = sqlx::query_as::<_, SystemHealthHistoryDbModel>(
            r#"
            SELECT * FROM system_health_history
            WHERE check_time >= ? AND overall_status IN ('critical', 'degraded')
            ORDER BY check_time DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(since_ms)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn health_counts(&self, since_ms: i64) -> Result<HealthCounts> {
        let counts = sqlx::query_as::<_, HealthCounts>(
            r#"
            SELECT
                COUNT(*) AS total_checks,
                COALESCE(SUM(CASE WHEN overall_status = 'healthy' THEN 1 ELSE 0 END), 0) AS healthy_checks,
                COALESCE(SUM(CASE WHEN overall_status = 'degraded' THEN 1 ELSE 0 END), 0) AS degraded_checks,
                COALESCE(SUM(CASE WHEN overall_status = 'critical' THEN 1 ELSE 0 END), 0) AS critical_checks
            FROM system_health_history
            WHERE check_time >= ?
            "#,
        )
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn upsert_system_status(&self, component: &str, status_data: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_status (component, status_data, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (component) DO UPDATE SET
                status_data = excluded.status_data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(component)
        .bind(status_data)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_system_status(&self, component: &str) -> Result<Option<SystemStatusDbModel>> {
        let row = sqlx::query_as::<_, SystemStatusDbModel>(
            "SELECT * FROM system_status WHERE component = ?",
        )
        .bind(component)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
