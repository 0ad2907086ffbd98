//! Failover audit repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{FailoverEventDbModel, FailoverStats};
use crate::database::retry::retry_on_sqlite_busy;

/// Failover repository trait. Events are append-only.
#[async_trait]
pub trait FailoverRepository: Send + Sync {
    async fn insert_event(&self, event: &FailoverEventDbModel) -> Result<()>;
    /// Events since `since_ms`, newest first.
    async fn list_since(&self, since_ms: i64, limit: i64) -> Result<Vec<FailoverEventDbModel>>;
    async fn list_for_entity(&self, failed_entity_id: &str) -> Result<Vec<FailoverEventDbModel>>;
    async fn stats_since(&self, since_ms: i64) -> Result<FailoverStats>;
}

/// SQLx implementation of FailoverRepository.
pub struct SqlxFailoverRepository {
    pool: SqlitePool,
}

impl SqlxFailoverRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FailoverRepository for SqlxFailoverRepository {
    async fn insert_event(&self, event: &FailoverEventDbModel) -> Result<()> {
        retry_on_sqlite_busy("insert_failover_event", || async {
            sqlx::query(
                r#"
                INSERT INTO failover_events (
                    id, entity_type, failed_entity_id, replacement_entity_id, reason,
                    files_affected, success, recovery_time_ms, event_time
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.id)
            .bind(&event.entity_type)
            .bind(&event.failed_entity_id)
            .bind(&event.replacement_entity_id)
            .bind(&event.reason)
            .bind(event.files_affected)
            .bind(event.success)
            .bind(event.recovery_time_ms)
            .bind(event.event_time)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn list_since(&self, since_ms: i64, limit: i64) -> Result<Vec<FailoverEventDbModel>> {
        let events = sqlx::query_as::<_, FailoverEventDbModel>(
            "SELECT * FROM failover_events WHERE event_time >= ? ORDER BY event_time DESC LIMIT ?",
        )
        .bind(since_ms)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn list_for_entity(&self, failed_entity_id: &str) -> Result<Vec<FailoverEventDbModel>> {
        let events = sqlx::query_as::<_, FailoverEventDbModel>(
            "SELECT * FROM failover_events WHERE failed_entity_id = ? ORDER BY event_time",
        )
        .bind(failed_entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn stats_since(&self, since_ms: i64) -> Result<FailoverStats> {
        let stats = sqlx::query_as::<_, FailoverStats>(
            r#"
            SELECT
                COUNT(*) AS total_failovers,
                COALESCE(SUM(CASE WHEN success THEN 1 ELSE 0 END), 0) AS successful_failovers,
                AVG(recovery_time_ms) AS avg_recovery_time_ms
            FROM failover_events
            WHERE event_time >= ?
            "#,
        )
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}
