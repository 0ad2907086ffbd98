//! Channel health monitor.
//!
//! Periodically probes monitored channels, scores them and writes the
//! result back to the registry. A channel that drops to failed hands its
//! replicas to the storage manager's failover.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::provider::{ChannelProvider, ProviderSource, bounded};
use super::registry::{ChannelDescriptor, ChannelRegistry};
use super::scoring::{HealthClass, ProbeOutcome, ProbeReport};
use super::storage::StorageManager;
use crate::cache::{KeyValueCache, set_json_ex};
use crate::config::ChannelHealthConfig;
use crate::database::models::{ChannelStatus, HealthTestType, NewChannelHealthLog};
use crate::database::repositories::HealthRepository;
use crate::notification::{NotificationEvent, NotificationService};
use crate::Result;

/// Cache key of the latest sweep statistics.
pub const MONITORING_STATS_KEY: &str = "monitoring_stats";

/// Outcome of checking one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCheck {
    pub channel_id: String,
    pub external_id: String,
    pub health_score: i64,
    pub class: HealthClass,
    pub previous_status: ChannelStatus,
    pub status: ChannelStatus,
    pub response_time_ms: Option<i64>,
    pub report: ProbeReport,
    pub checked_at: DateTime<Utc>,
}

/// Statistics of one sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SweepReport {
    pub total_monitored: usize,
    pub checked: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub failed: usize,
    /// Channels whose check errored before a score could be recorded.
    pub errors: usize,
    pub failovers_triggered: usize,
    pub duration_ms: u64,
}

/// Channel health monitor.
pub struct ChannelHealthMonitor {
    registry: Arc<ChannelRegistry>,
    health_logs: Arc<dyn HealthRepository>,
    cache: Arc<dyn KeyValueCache>,
    providers: Arc<dyn ProviderSource>,
    storage: Arc<StorageManager>,
    notifications: Arc<NotificationService>,
    config: ChannelHealthConfig,
    cursor: AtomicUsize,
}

impl ChannelHealthMonitor {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        health_logs: Arc<dyn HealthRepository>,
        cache: Arc<dyn KeyValueCache>,
        providers: Arc<dyn ProviderSource>,
        storage: Arc<StorageManager>,
        notifications: Arc<NotificationService>,
        config: ChannelHealthConfig,
    ) -> Self {
        Self {
            registry,
            health_logs,
            cache,
            providers,
            storage,
            notifications,
            config,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Probe one window of the monitored channels.
    #[instrument(skip(self))]
    pub async fn run_health_checks(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let channels = self.registry.list_monitored().await?;
        let cursor = self
            .cursor
            .fetch_add(self.config.max_channels_per_sweep, Ordering::Relaxed);
        let window = sweep_window(channels.len(), cursor, self.config.max_channels_per_sweep);

        let mut report = SweepReport {
            total_monitored: channels.len(),
            ..Default::default()
        };

        for (n, index) in window.into_iter().enumerate() {
            if n > 0 && !self.config.probe_spacing.is_zero() {
                tokio::time::sleep(self.config.probe_spacing).await;
            }
            let channel = &channels[index];
            match self.check_channel(channel).await {
                Ok(check) => {
                    report.checked += 1;
                    match check.class {
                        HealthClass::Healthy => report.healthy += 1,
                        HealthClass::Degraded => report.degraded += 1,
                        HealthClass::Failed => report.failed += 1,
                    }
                    if check.status == ChannelStatus::Failed
                        && check.previous_status != ChannelStatus::Failed
                        && self.fail_over(&check).await
                    {
                        report.failovers_triggered += 1;
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(channel_id = %channel.id, error = %e, "Channel health check failed");
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = set_json_ex(
            self.cache.as_ref(),
            MONITORING_STATS_KEY,
            &report,
            self.config.stats_ttl,
        )
        .await
        {
            warn!(error = %e, "Failed to cache monitoring stats");
        }

        info!(
            checked = report.checked,
            healthy = report.healthy,
            degraded = report.degraded,
            failed = report.failed,
            errors = report.errors,
            "Channel health sweep completed"
        );
        Ok(report)
    }

    /// Probe, score and record one channel.
    pub async fn check_channel(&self, channel: &ChannelDescriptor) -> Result<ChannelCheck> {
        let report = self.probe(channel).await;
        let policy = &self.config.scoring;
        let health_score = policy.score(&report);
        let class = policy.classify(health_score);

        let target = match class {
            HealthClass::Healthy => ChannelStatus::Active,
            HealthClass::Degraded => ChannelStatus::Degraded,
            HealthClass::Failed => ChannelStatus::Failed,
        };
        let status = if channel.status.can_transition_to(target) {
            target
        } else {
            channel.status
        };
        let response_time_ms = report.response_time.map(|d| d.as_millis() as i64);

        self.registry
            .record_health(&channel.id, status, health_score, response_time_ms)
            .await?;

        let errors = report.errors();
        let log = NewChannelHealthLog {
            channel_id: channel.id.clone(),
            status: class.as_ref().to_string(),
            response_time_ms,
            error_message: (!errors.is_empty()).then(|| errors.join("; ")),
            health_score: Some(health_score),
            test_type: HealthTestType::Basic,
        };
        if let Err(e) = self.health_logs.insert_channel_log(&log).await {
            warn!(channel_id = %channel.id, error = %e, "Failed to write health log");
        }

        let check = ChannelCheck {
            channel_id: channel.id.clone(),
            external_id: channel.external_id.clone(),
            health_score,
            class,
            previous_status: channel.status,
            status,
            response_time_ms,
            report,
            checked_at: Utc::now(),
        };

        if let Err(e) = set_json_ex(
            self.cache.as_ref(),
            &format!("channel_health:{}", channel.id),
            &check,
            self.config.health_cache_ttl,
        )
        .await
        {
            warn!(channel_id = %channel.id, error = %e, "Failed to cache channel health");
        }

        match class {
            HealthClass::Failed => self.alert_failed(&check, errors).await,
            HealthClass::Degraded => self.alert_degraded(&check).await,
            HealthClass::Healthy => {
                debug!(channel_id = %channel.id, health_score, "Channel healthy");
            }
        }
        Ok(check)
    }

    async fn probe(&self, channel: &ChannelDescriptor) -> ProbeReport {
        let started = Instant::now();
        let provider = match self.providers.provider().await {
            Ok(provider) => provider,
            Err(e) => return ProbeReport::inaccessible(e.to_string(), None),
        };
        let timeout = self.config.probe_timeout;
        let target = channel.external_id.as_str();

        if let Err(e) = bounded("describe", timeout, provider.describe(target)).await {
            return ProbeReport::inaccessible(e.to_string(), Some(started.elapsed()));
        }

        let send = send_probe(provider.as_ref(), target, timeout).await;

        let permissions = match bounded("membership", timeout, provider.self_membership(target)).await
        {
            Ok(membership) => {
                let missing = membership.missing(channel.class.required_capabilities());
                if missing.is_empty() {
                    ProbeOutcome::Passed
                } else {
                    let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
                    ProbeOutcome::Failed(format!("missing {}", names.join(", ")))
                }
            }
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        };

        ProbeReport {
            accessibility: ProbeOutcome::Passed,
            send,
            permissions,
            response_time: Some(started.elapsed()),
        }
    }

    async fn alert_failed(&self, check: &ChannelCheck, errors: Vec<String>) {
        let key = format!(
            "channel_alert:{}:{}",
            check.channel_id,
            check.checked_at.timestamp()
        );
        let alert = serde_json::json!({
            "channel_id": check.channel_id,
            "external_id": check.external_id,
            "health_score": check.health_score,
            "errors": errors,
            "timestamp": check.checked_at.to_rfc3339(),
        });
        if let Err(e) =
            set_json_ex(self.cache.as_ref(), &key, &alert, self.config.failure_alert_ttl).await
        {
            warn!(channel_id = %check.channel_id, error = %e, "Failed to cache channel alert");
        }
        error!(channel_id = %check.channel_id, ?errors, "Channel failed health check");
        self.notifications.notify(NotificationEvent::ChannelFailed {
            channel_id: check.channel_id.clone(),
            external_id: check.external_id.clone(),
            health_score: check.health_score,
            errors,
            timestamp: check.checked_at,
        });
    }

    async fn alert_degraded(&self, check: &ChannelCheck) {
        let key = format!(
            "channel_degraded:{}:{}",
            check.channel_id,
            check.checked_at.timestamp()
        );
        let alert = serde_json::json!({
            "channel_id": check.channel_id,
            "health_score": check.health_score,
            "timestamp": check.checked_at.to_rfc3339(),
        });
        if let Err(e) =
            set_json_ex(self.cache.as_ref(), &key, &alert, self.config.degraded_alert_ttl).await
        {
            warn!(channel_id = %check.channel_id, error = %e, "Failed to cache degraded alert");
        }
        warn!(channel_id = %check.channel_id, health_score = check.health_score, "Channel degraded");
        self.notifications.notify(NotificationEvent::ChannelDegraded {
            channel_id: check.channel_id.clone(),
            external_id: check.external_id.clone(),
            health_score: check.health_score,
            timestamp: check.checked_at,
        });
    }

    /// Hand a newly failed channel's replicas to the storage failover.
    async fn fail_over(&self, check: &ChannelCheck) -> bool {
        let replicas = match self.storage.active_replica_count(&check.channel_id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(channel_id = %check.channel_id, error = %e, "Failed to count replicas");
                return false;
            }
        };
        if replicas == 0 {
            return false;
        }
        let reason = format!("health check failed with score {}", check.health_score);
        match self.storage.trigger_failover(&check.channel_id, &reason).await {
            Ok(outcome) => {
                debug!(channel_id = %check.channel_id, ?outcome, "Failover triggered by health check");
                true
            }
            Err(e) => {
                error!(channel_id = %check.channel_id, error = %e, "Channel failover failed");
                false
            }
        }
    }

    /// Sweep until cancelled.
    ///
    /// Each sweep runs in its own task so a panic only costs one sweep.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval = ?self.config.sweep_interval,
            "Channel health monitor started"
        );
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let monitor = self.clone();
            let delay = match tokio::spawn(async move { monitor.run_health_checks().await }).await {
                Ok(Ok(_)) => self.config.sweep_interval,
                Ok(Err(e)) => {
                    error!(error = %e, "Channel health sweep failed");
                    self.config.error_retry
                }
                Err(e) => {
                    error!(error = %e, "Channel health sweep panicked");
                    self.config.error_retry
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Channel health monitor stopped");
    }
}

async fn send_probe(
    provider: &dyn ChannelProvider,
    channel: &str,
    timeout: std::time::Duration,
) -> ProbeOutcome {
    let text = format!("health check {}", Utc::now().timestamp());
    let message = match bounded("send", timeout, provider.send_ephemeral(channel, &text)).await {
        Ok(message) => message,
        Err(e) => return ProbeOutcome::Failed(e.to_string()),
    };
    match bounded("delete", timeout, provider.delete(channel, message.message_id)).await {
        Ok(()) => ProbeOutcome::Passed,
        Err(e) => ProbeOutcome::Failed(format!("sent but could not delete: {e}")),
    }
}

/// Indices probed this sweep: at most `max` channels starting at `cursor`,
/// wrapping around.
fn sweep_window(len: usize, cursor: usize, max: usize) -> Vec<usize> {
    if len == 0 || max == 0 {
        return Vec::new();
    }
    if len <= max {
        return (0..len).collect();
    }
    let start = cursor % len;
    (0..max).map(|i| (start + i) % len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, 25, vec![])]
    #[case(3, 7, 25, vec![0, 1, 2])]
    #[case(5, 0, 2, vec![0, 1])]
    #[case(5, 2, 2, vec![2, 3])]
    #[case(5, 4, 2, vec![4, 0])]
    #[case(5, 12, 3, vec![2, 3, 4])]
    fn test_sweep_window(
        #[case] len: usize,
        #[case] cursor: usize,
        #[case] max: usize,
        #[case] expected: Vec<usize>,
    ) {
        assert_eq!(sweep_window(len, cursor, max), expected);
    }
}
