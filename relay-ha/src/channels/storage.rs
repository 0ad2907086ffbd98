//! Multi-channel storage manager.
//!
//! Replicates content onto the healthiest channels, resolves the best
//! replica on retrieval, verifies that replicas still exist and records
//! channel failovers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::provider::{ContentItem, ProviderSource, bounded};
use super::registry::{ChannelDescriptor, ChannelRegistry};
use crate::cache::{KeyValueCache, get_json, set_json_ex};
use crate::config::StorageConfig;
use crate::database::models::{
    ChannelStatus, FailoverEntity, FailoverEventDbModel, HealthTestType, NewChannelHealthLog,
    StorageRecordDbModel, StorageStatus,
};
use crate::database::repositories::{FailoverRepository, HealthRepository, StorageRepository};
use crate::notification::{NotificationEvent, NotificationService};
use crate::{Error, Result};

/// Lowercase hex SHA-256 of the content bytes.
pub fn content_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Rolling per-channel operation counters, cached at `channel_stats:{id}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub successes: u64,
    pub failures: u64,
    pub total: u64,
}

impl ChannelStats {
    pub fn record(&mut self, success: bool) {
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total += 1;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.successes as f64 / self.total as f64
    }
}

/// One channel that did not take a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationFailure {
    pub channel_id: String,
    pub error: String,
}

/// Result of a replicated store. At least one replica was written.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationOutcome {
    pub content_id: String,
    pub checksum: String,
    pub requested: usize,
    pub records: Vec<StorageRecordDbModel>,
    pub failures: Vec<ReplicationFailure>,
}

impl ReplicationOutcome {
    pub fn stored(&self) -> usize {
        self.records.len()
    }

    pub fn is_partial(&self) -> bool {
        self.records.len() < self.requested
    }
}

/// Result of checking that a replica still exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    Failed {
        consecutive_failures: i64,
        error: String,
    },
    /// The replica crossed the failure limit and is no longer served.
    Corrupted,
}

/// Result of a channel failover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FailoverOutcome {
    Completed {
        event_id: String,
        files_affected: i64,
        backup_channel_id: Option<String>,
    },
    /// Another failover for the same channel is running.
    AlreadyInProgress,
}

/// Multi-channel storage manager.
pub struct StorageManager {
    registry: Arc<ChannelRegistry>,
    records: Arc<dyn StorageRepository>,
    health_logs: Arc<dyn HealthRepository>,
    failovers: Arc<dyn FailoverRepository>,
    cache: Arc<dyn KeyValueCache>,
    providers: Arc<dyn ProviderSource>,
    notifications: Arc<NotificationService>,
    config: StorageConfig,
    failover_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StorageManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ChannelRegistry>,
        records: Arc<dyn StorageRepository>,
        health_logs: Arc<dyn HealthRepository>,
        failovers: Arc<dyn FailoverRepository>,
        cache: Arc<dyn KeyValueCache>,
        providers: Arc<dyn ProviderSource>,
        notifications: Arc<NotificationService>,
        config: StorageConfig,
    ) -> Self {
        Self {
            registry,
            records,
            health_logs,
            failovers,
            cache,
            providers,
            notifications,
            config,
            failover_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Replicate `content` onto up to `desired` healthy channels.
    ///
    /// Partial replication is a success. Zero stored replicas is an
    /// exhaustion error.
    #[instrument(skip(self, content), fields(content_id = %content.content_id))]
    pub async fn store_replicated(
        &self,
        content: &ContentItem,
        desired: usize,
    ) -> Result<ReplicationOutcome> {
        if desired == 0 {
            return Err(Error::validation("at least one replica must be requested"));
        }

        let targets: Vec<ChannelDescriptor> = self
            .registry
            .healthy_channels(self.config.failover_threshold)
            .await?
            .into_iter()
            .take(desired)
            .collect();
        if targets.is_empty() {
            return Err(Error::exhausted("no healthy channels available"));
        }

        let provider = self.providers.provider().await?;
        let checksum = content_checksum(&content.data);
        let mut outcome = ReplicationOutcome {
            content_id: content.content_id.clone(),
            checksum: checksum.clone(),
            requested: desired,
            records: Vec::with_capacity(targets.len()),
            failures: Vec::new(),
        };

        for channel in &targets {
            let started = Instant::now();
            let sent = bounded(
                "send_content",
                self.config.provider_timeout,
                provider.send_content(&channel.external_id, content),
            )
            .await;

            match sent {
                Ok(message) => {
                    let mut record = StorageRecordDbModel::new(
                        &content.content_id,
                        &channel.id,
                        message.message_id,
                        message.link,
                    );
                    record.size_bytes = Some(content.data.len() as i64);
                    record.checksum = Some(checksum.clone());
                    let record = self.records.upsert_record(&record).await?;
                    if let Err(e) = self.registry.record_usage(&channel.id).await {
                        warn!(channel_id = %channel.id, error = %e, "Failed to record channel usage");
                    }
                    self.record_operation(&channel.id, true).await;
                    debug!(channel_id = %channel.id, message_id = record.message_id, "Stored replica");
                    outcome.records.push(record);
                }
                Err(e) => {
                    let elapsed = started.elapsed().as_millis() as i64;
                    warn!(channel_id = %channel.id, error = %e, "Replica upload failed");
                    self.handle_storage_error(channel, &e.to_string(), Some(elapsed))
                        .await;
                    outcome.failures.push(ReplicationFailure {
                        channel_id: channel.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if outcome.records.is_empty() {
            return Err(Error::exhausted("no healthy channels available"));
        }
        if outcome.is_partial() {
            warn!(
                stored = outcome.stored(),
                requested = desired,
                "Content stored with fewer replicas than requested"
            );
        } else {
            info!(stored = outcome.stored(), "Content stored");
        }
        Ok(outcome)
    }

    /// Best active replica on an active channel.
    pub async fn retrieve(&self, content_id: &str) -> Result<StorageRecordDbModel> {
        self.retrieve_excluding(content_id, &[]).await
    }

    /// Best active replica, skipping channels that already failed the caller.
    pub async fn retrieve_excluding(
        &self,
        content_id: &str,
        excluded_channels: &[String],
    ) -> Result<StorageRecordDbModel> {
        let excluded: HashSet<&str> = excluded_channels.iter().map(String::as_str).collect();
        self.records
            .list_active_replicas(content_id)
            .await?
            .into_iter()
            .find(|r| !excluded.contains(r.channel_id.as_str()))
            .ok_or_else(|| Error::not_found("StorageRecord", content_id))
    }

    /// Best replica that passes an integrity check, falling through to
    /// alternatives on failure.
    pub async fn retrieve_verified(&self, content_id: &str) -> Result<StorageRecordDbModel> {
        let mut failed_channels = Vec::new();
        loop {
            let record = self.retrieve_excluding(content_id, &failed_channels).await?;
            match self.verify_integrity(&record).await? {
                VerificationOutcome::Verified => return Ok(record),
                outcome => {
                    debug!(record_id = %record.id, ?outcome, "Replica failed verification, trying next");
                    failed_channels.push(record.channel_id);
                }
            }
        }
    }

    /// Confirm that the provider still holds the replica.
    pub async fn verify_integrity(
        &self,
        record: &StorageRecordDbModel,
    ) -> Result<VerificationOutcome> {
        let channel = self.registry.get(&record.channel_id).await?;
        let provider = self.providers.provider().await?;
        let checked = bounded(
            "exists",
            self.config.provider_timeout,
            provider.exists(&channel.external_id, record.message_id),
        )
        .await;

        let error = match checked {
            Ok(true) => {
                self.records.record_verification_success(&record.id).await?;
                return Ok(VerificationOutcome::Verified);
            }
            Ok(false) => "message no longer exists".to_string(),
            Err(e) => e.to_string(),
        };

        // The streak lives in the row; `record` may be a stale copy.
        let (failures, status) = self
            .records
            .record_verification_failure(&record.id, self.config.max_verification_failures)
            .await?;
        if status == StorageStatus::Corrupted {
            warn!(
                record_id = %record.id,
                channel_id = %record.channel_id,
                failures,
                "Replica marked corrupted"
            );
            return Ok(VerificationOutcome::Corrupted);
        }

        Ok(VerificationOutcome::Failed {
            consecutive_failures: failures,
            error,
        })
    }

    /// Record a failover away from `channel_id`.
    ///
    /// The event and the number of affected replicas are recorded before
    /// returning; re-replication is left to later work.
    #[instrument(skip(self))]
    pub async fn trigger_failover(&self, channel_id: &str, reason: &str) -> Result<FailoverOutcome> {
        let lock = self
            .failover_locks
            .entry(channel_id.to_string())
            .or_default()
            .clone();
        let Ok(_guard) = lock.try_lock() else {
            info!(channel_id, "Failover already in progress");
            return Ok(FailoverOutcome::AlreadyInProgress);
        };

        let started = Instant::now();
        let channel = self.registry.get(channel_id).await?;
        if channel.status != ChannelStatus::Failed
            && channel.status.can_transition_to(ChannelStatus::Failed)
        {
            self.registry
                .transition(channel_id, ChannelStatus::Failed)
                .await?;
        }

        let files_affected = self.records.count_active_on_channel(channel_id).await?;
        let backup = if files_affected > 0 {
            self.registry.best_backup(channel_id).await?
        } else {
            None
        };
        let backup_channel_id = backup.map(|b| b.id);

        let mut event = FailoverEventDbModel::new(
            FailoverEntity::Channel,
            channel_id,
            backup_channel_id.clone(),
            reason,
        )
        .with_files_affected(files_affected)
        .with_recovery_time_ms(started.elapsed().as_millis() as i64);
        event.success = files_affected == 0 || backup_channel_id.is_some();
        self.failovers.insert_event(&event).await?;

        match &backup_channel_id {
            Some(backup) => info!(files_affected, backup = %backup, "Channel failover recorded"),
            None if files_affected > 0 => {
                warn!(files_affected, "Channel failed with no backup channel available")
            }
            None => info!("Channel failed with no replicas to redirect"),
        }

        self.notifications.notify(NotificationEvent::ChannelFailover {
            failed_channel_id: channel_id.to_string(),
            backup_channel_id: backup_channel_id.clone(),
            files_affected,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });

        Ok(FailoverOutcome::Completed {
            event_id: event.id,
            files_affected,
            backup_channel_id,
        })
    }

    /// Number of active replicas held by a channel.
    pub async fn active_replica_count(&self, channel_id: &str) -> Result<i64> {
        self.records.count_active_on_channel(channel_id).await
    }

    /// Cached rolling counters for a channel.
    pub async fn channel_stats(&self, channel_id: &str) -> Result<ChannelStats> {
        Ok(get_json(self.cache.as_ref(), &stats_key(channel_id))
            .await?
            .unwrap_or_default())
    }

    async fn handle_storage_error(
        &self,
        channel: &ChannelDescriptor,
        error: &str,
        response_time_ms: Option<i64>,
    ) {
        self.record_operation(&channel.id, false).await;

        let score = match self
            .registry
            .adjust_score(&channel.id, -self.config.storage_error_penalty)
            .await
        {
            Ok(score) => score,
            Err(e) => {
                warn!(channel_id = %channel.id, error = %e, "Failed to lower health score");
                return;
            }
        };

        let log = NewChannelHealthLog {
            channel_id: channel.id.clone(),
            status: ChannelStatus::Degraded.as_str().to_string(),
            response_time_ms,
            error_message: Some(error.to_string()),
            health_score: Some(score),
            test_type: HealthTestType::Upload,
        };
        if let Err(e) = self.health_logs.insert_channel_log(&log).await {
            warn!(channel_id = %channel.id, error = %e, "Failed to write health log");
        }

        if score < self.config.failover_threshold && channel.status == ChannelStatus::Active {
            match self
                .registry
                .transition(&channel.id, ChannelStatus::Degraded)
                .await
            {
                Ok(_) => warn!(channel_id = %channel.id, score, "Channel degraded after storage errors"),
                Err(e) => warn!(channel_id = %channel.id, error = %e, "Failed to degrade channel"),
            }
        }
    }

    async fn record_operation(&self, channel_id: &str, success: bool) {
        if let Err(e) = self.try_record_operation(channel_id, success).await {
            warn!(channel_id, error = %e, "Failed to update channel statistics");
        }
    }

    async fn try_record_operation(&self, channel_id: &str, success: bool) -> Result<()> {
        let key = stats_key(channel_id);
        let mut stats: ChannelStats = get_json(self.cache.as_ref(), &key)
            .await?
            .unwrap_or_default();
        stats.record(success);
        set_json_ex(self.cache.as_ref(), &key, &stats, self.config.stats_ttl).await?;

        if self.config.stats_persist_every > 0 && stats.total % self.config.stats_persist_every == 0
        {
            self.registry
                .update_success_rate(channel_id, stats.success_rate())
                .await?;
        }
        Ok(())
    }
}

fn stats_key(channel_id: &str) -> String {
    format!("channel_stats:{channel_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_checksum() {
        assert_eq!(
            content_checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_channel_stats() {
        let mut stats = ChannelStats::default();
        assert_eq!(stats.success_rate(), 1.0);
        stats.record(true);
        stats.record(true);
        stats.record(false);
        stats.record(true);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.failures, 1);
        assert!((stats.success_rate() - 0.75).abs() < f64::EPSILON);
    }
}
