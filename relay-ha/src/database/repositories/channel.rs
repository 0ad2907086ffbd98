//! Channel registry repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{ChannelClass, ChannelDbModel, ChannelStatus};
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Health fields written back by a probe run.
#[derive(Debug, Clone)]
pub struct ChannelHealthUpdate {
    pub status: ChannelStatus,
    pub health_score: i64,
    pub response_time_ms: Option<i64>,
}

/// Channel repository trait.
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn get_channel(&self, id: &str) -> Result<ChannelDbModel>;
    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<ChannelDbModel>>;
    async fn list_channels(&self) -> Result<Vec<ChannelDbModel>>;
    /// Active and degraded channels, preferred first.
    async fn list_monitored(&self) -> Result<Vec<ChannelDbModel>>;
    /// Active channels with `health_score >= min_score`, ordered by
    /// priority ascending then health descending.
    async fn list_healthy(&self, min_score: i64) -> Result<Vec<ChannelDbModel>>;
    /// Best active channel of the given class, excluding one id.
    async fn best_of_class(
        &self,
        class: ChannelClass,
        exclude_id: &str,
    ) -> Result<Option<ChannelDbModel>>;
    async fn create_channel(&self, channel: &ChannelDbModel) -> Result<()>;
    async fn update_health(&self, id: &str, update: &ChannelHealthUpdate) -> Result<()>;
    async fn update_status(&self, id: &str, status: ChannelStatus) -> Result<()>;
    /// Add `delta` to the health score, clamped to 0..=100. Returns the new score.
    async fn adjust_health_score(&self, id: &str, delta: i64) -> Result<i64>;
    async fn update_success_rate(&self, id: &str, success_rate: f64) -> Result<()>;
    async fn increment_used_slots(&self, id: &str) -> Result<()>;
}

/// SQLx implementation of ChannelRepository.
pub struct SqlxChannelRepository {
    pool: SqlitePool,
}

impl SqlxChannelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelRepository for SqlxChannelRepository {
    async fn get_channel(&self, id: &str) -> Result<ChannelDbModel> {
        sqlx::query_as::<_, ChannelDbModel>("SELECT * FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Channel", id))
    }

    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<ChannelDbModel>> {
        let channel =
            sqlx::query_as::<_, ChannelDbModel>("SELECT * FROM channels WHERE external_id = ?")
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(channel)
    }

    async fn list_channels(&self) -> Result<Vec<ChannelDbModel>> {
        let channels = sqlx::query_as::<_, ChannelDbModel>(
            "SELECT * FROM channels ORDER BY priority ASC, health_score DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(channels)
    }

    async fn list_monitored(&self) -> Result<Vec<ChannelDbModel>> {
        let channels = sqlx::query_as::<_, ChannelDbModel>(
            r#"
            SELECT * FROM channels
            WHERE status IN ('active', 'degraded')
            ORDER BY priority ASC, health_score DESC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(channels)
    }

    async fn list_healthy(&self, min_score: i64) -> Result<Vec<ChannelDbModel>> {
        let channels = sqlx::query_as::<_, ChannelDbModel>(
            r#"
            SELECT * FROM channels
            WHERE status = 'active' AND health_score >= ?
            ORDER BY priority ASC, health_score DESC
            "#,
        )
        .bind(min_score)
        .fetch_all(&self.pool)
        .await?;
        Ok(channels)
    }

    async fn best_of_class(
        &self,
        class: ChannelClass,
        exclude_id: &str,
    ) -> Result<Option<ChannelDbModel>> {
        let channel = sqlx::query_as::<_, ChannelDbModel>(
            r#"
            SELECT * FROM channels
            WHERE channel_class = ? AND status = 'active' AND id != ?
            ORDER BY priority ASC, health_score DESC
            LIMIT 1
            "#,
        )
        .bind(class.as_str())
        .bind(exclude_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(channel)
    }

    async fn create_channel(&self, channel: &ChannelDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO channels (
                id, external_id, display_name, channel_class, status, priority,
                health_score, response_time_ms, success_rate, capacity_limit,
                used_slots, last_health_check, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&channel.id)
        .bind(&channel.external_id)
        .bind(&channel.display_name)
        .bind(&channel.channel_class)
        .bind(&channel.status)
        .bind(channel.priority)
        .bind(channel.health_score)
        .bind(channel.response_time_ms)
        .bind(channel.success_rate)
        .bind(channel.capacity_limit)
        .bind(channel.used_slots)
        .bind(channel.last_health_check)
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_health(&self, id: &str, update: &ChannelHealthUpdate) -> Result<()> {
        let now = now_ms();
        let result = sqlx::query(
            r#"
            UPDATE channels SET
                status = ?,
                health_score = MAX(0, MIN(100, ?)),
                response_time_ms = COALESCE(?, response_time_ms),
                last_health_check = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.health_score)
        .bind(update.response_time_ms)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Channel", id));
        }
        Ok(())
    }

    async fn update_status(&self, id: &str, status: ChannelStatus) -> Result<()> {
        let result = sqlx::query("UPDATE channels SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Channel", id));
        }
        Ok(())
    }

    async fn adjust_health_score(&self, id: &str, delta: i64) -> Result<i64> {
        let score: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE channels
            SET health_score = MAX(0, MIN(100, health_score + ?)), updated_at = ?
            WHERE id = ?
            RETURNING health_score
            "#,
        )
        .bind(delta)
        .bind(now_ms())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        score
            .map(|(s,)| s)
            .ok_or_else(|| Error::not_found("Channel", id))
    }

    async fn update_success_rate(&self, id: &str, success_rate: f64) -> Result<()> {
        sqlx::query("UPDATE channels SET success_rate = ?, updated_at = ? WHERE id = ?")
            .bind(success_rate)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_used_slots(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE channels SET used_slots = used_slots + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
