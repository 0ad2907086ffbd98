//! Storage record repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{StorageRecordDbModel, StorageStatus};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Storage record repository trait.
#[async_trait]
pub trait StorageRepository: Send + Sync {
    async fn get_record(&self, id: &str) -> Result<StorageRecordDbModel>;
    /// Insert a replica; an existing `(content_id, channel_id)` row is replaced in place
    /// and keeps its id. Returns the stored row.
    async fn upsert_record(&self, record: &StorageRecordDbModel) -> Result<StorageRecordDbModel>;
    async fn list_for_content(&self, content_id: &str) -> Result<Vec<StorageRecordDbModel>>;
    /// Active replicas whose channel is also active, best channel first.
    async fn list_active_replicas(&self, content_id: &str) -> Result<Vec<StorageRecordDbModel>>;
    async fn count_active_on_channel(&self, channel_id: &str) -> Result<i64>;
    /// Reset the failure streak after a successful check.
    async fn record_verification_success(&self, id: &str) -> Result<()>;
    /// Extend the stored failure streak by one, marking the record corrupted
    /// once it reaches `max_failures`. Returns the new streak and status.
    async fn record_verification_failure(
        &self,
        id: &str,
        max_failures: i64,
    ) -> Result<(i64, StorageStatus)>;
}

/// SQLx implementation of StorageRepository.
pub struct SqlxStorageRepository {
    pool: SqlitePool,
}

impl SqlxStorageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StorageRepository for SqlxStorageRepository {
    async fn get_record(&self, id: &str) -> Result<StorageRecordDbModel> {
        sqlx::query_as::<_, StorageRecordDbModel>("SELECT * FROM storage_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("StorageRecord", id))
    }

    async fn upsert_record(&self, record: &StorageRecordDbModel) -> Result<StorageRecordDbModel> {
        retry_on_sqlite_busy("upsert_storage_record", || async {
            let stored = sqlx::query_as::<_, StorageRecordDbModel>(
                r#"
                INSERT INTO storage_records (
                    id, content_id, channel_id, message_id, message_link, status,
                    size_bytes, checksum, verification_attempts, consecutive_failures,
                    last_verified, stored_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (content_id, channel_id) DO UPDATE SET
                    message_id = excluded.message_id,
                    message_link = excluded.message_link,
                    status = excluded.status,
                    size_bytes = excluded.size_bytes,
                    checksum = excluded.checksum,
                    verification_attempts = 0,
                    consecutive_failures = 0,
                    last_verified = NULL,
                    stored_at = excluded.stored_at
                RETURNING *
                "#,
            )
            .bind(&record.id)
            .bind(&record.content_id)
            .bind(&record.channel_id)
            .bind(record.message_id)
            .bind(&record.message_link)
            .bind(&record.status)
            .bind(record.size_bytes)
            .bind(&record.checksum)
            .bind(record.verification_attempts)
            .bind(record.consecutive_failures)
            .bind(record.last_verified)
            .bind(record.stored_at)
            .fetch_one(&self.pool)
            .await?;
            Ok(stored)
        })
        .await
    }

    async fn list_for_content(&self, content_id: &str) -> Result<Vec<StorageRecordDbModel>> {
        let records = sqlx::query_as::<_, StorageRecordDbModel>(
            "SELECT * FROM storage_records WHERE content_id = ? ORDER BY stored_at",
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_active_replicas(&self, content_id: &str) -> Result<Vec<StorageRecordDbModel>> {
        let records = sqlx::query_as::<_, StorageRecordDbModel>(
            r#"
            SELECT sr.* FROM storage_records sr
            JOIN channels c ON c.id = sr.channel_id
            WHERE sr.content_id = ? AND sr.status = 'active' AND c.status = 'active'
            ORDER BY c.priority ASC, c.health_score DESC
            "#,
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn count_active_on_channel(&self, channel_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM storage_records WHERE channel_id = ? AND status = 'active'",
        )
        .bind(channel_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn record_verification_success(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE storage_records SET
                verification_attempts = verification_attempts + 1,
                consecutive_failures = 0,
                status = 'active',
                last_verified = ?
            WHERE id = ?
            "#,
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("StorageRecord", id));
        }
        Ok(())
    }

    async fn record_verification_failure(
        &self,
        id: &str,
        max_failures: i64,
    ) -> Result<(i64, StorageStatus)> {
        let row: Option<(i64, String)> = sqlx::query_as(
            r#"
            UPDATE storage_records SET
                verification_attempts = verification_attempts + 1,
                consecutive_failures = consecutive_failures + 1,
                status = CASE
                    WHEN consecutive_failures + 1 >= ? THEN 'corrupted'
                    ELSE status
                END,
                last_verified = ?
            WHERE id = ?
            RETURNING consecutive_failures, status
            "#,
        )
        .bind(max_failures)
        .bind(now_ms())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let (failures, status) = row.ok_or_else(|| Error::not_found("StorageRecord", id))?;
        let status = StorageStatus::parse(&status)
            .ok_or_else(|| Error::Database(format!("unknown storage status '{status}'")))?;
        Ok((failures, status))
    }
}
