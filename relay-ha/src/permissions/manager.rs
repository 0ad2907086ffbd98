//! Channel permission manager.
//!
//! Verifies that every credential holds the capabilities each configured
//! channel needs by actually exercising them: a short test message is
//! sent and deleted, and membership is inspected for management rights.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::types::{
    CapabilityTest, ChannelPermissionResult, ChannelRole, ChannelVerification, ConfiguredChannel,
    CredentialPermissionReport, PermissionStatus, PermissionSyncReport, TokenSyncResult,
};
use crate::cache::{KeyValueCache, set_json_ex};
use crate::channels::{Capability, ChannelProvider, bounded};
use crate::config::PermissionConfig;
use crate::credentials::{CredentialManager, ManagedCredential};
use crate::database::repositories::PermissionRepository;
use crate::notification::{NotificationEvent, NotificationService};
use crate::{Error, Result};

/// Cache key of the latest synchronization report.
pub const PERMISSION_SYNC_KEY: &str = "permission_sync_results";

const TEST_MESSAGE: &str = "permission check";

fn results_key(identity: &str) -> String {
    format!("permission_results:{identity}")
}

/// Test message that could not be deleted yet.
#[derive(Debug, Clone)]
struct PendingMessage {
    credential_id: String,
    channel_id: String,
    message_id: i64,
}

/// Channel permission manager.
pub struct PermissionManager {
    credentials: Arc<CredentialManager>,
    repo: Arc<dyn PermissionRepository>,
    cache: Arc<dyn KeyValueCache>,
    notifications: Arc<NotificationService>,
    config: PermissionConfig,
    verification: DashMap<String, ChannelVerification>,
    pending: Mutex<Vec<PendingMessage>>,
}

impl PermissionManager {
    pub fn new(
        credentials: Arc<CredentialManager>,
        repo: Arc<dyn PermissionRepository>,
        cache: Arc<dyn KeyValueCache>,
        notifications: Arc<NotificationService>,
        config: PermissionConfig,
    ) -> Self {
        Self {
            credentials,
            repo,
            cache,
            notifications,
            config,
            verification: DashMap::new(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Channels from settings followed by active registered channel rows.
    /// A channel listed twice keeps its first entry.
    pub async fn configured_channels(&self) -> Result<Vec<ConfiguredChannel>> {
        let mut channels = Vec::new();
        if let Some(id) = &self.config.log_channel {
            channels.push(ConfiguredChannel::for_role(id, ChannelRole::Log));
        }
        for id in &self.config.content_channels {
            channels.push(ConfiguredChannel::for_role(id, ChannelRole::Content));
        }
        if let Some(id) = &self.config.public_channel {
            channels.push(ConfiguredChannel::for_role(id, ChannelRole::Public));
        }
        if let Some(id) = &self.config.support_chat {
            channels.push(ConfiguredChannel::for_role(id, ChannelRole::Support));
        }
        for row in self.repo.list_active_channel_configs().await? {
            channels.push(ConfiguredChannel::from(&row));
        }

        let mut seen = HashSet::new();
        channels.retain(|c| seen.insert(c.channel_id.clone()));
        Ok(channels)
    }

    /// Test every configured channel with one credential.
    #[instrument(skip(self, credential), fields(credential = %credential.name()))]
    pub async fn setup_channel_permissions(
        &self,
        credential: &ManagedCredential,
    ) -> Result<CredentialPermissionReport> {
        let client = self.credentials.client_for(&credential.spec).await?;
        let identity = credential.name();
        let channels = self.configured_channels().await?;

        let mut results = Vec::with_capacity(channels.len());
        for channel in &channels {
            let result = self
                .test_channel(&credential.spec.id, &identity, client.as_ref(), channel)
                .await;
            self.record(&result).await;
            results.push(result);
        }

        let verified_channels = results.iter().filter(|r| r.verified()).count();
        let report = CredentialPermissionReport {
            credential_id: credential.spec.id.clone(),
            identity: identity.clone(),
            failed_channels: results.len() - verified_channels,
            verified_channels,
            channels: results,
        };

        if let Err(e) = set_json_ex(
            self.cache.as_ref(),
            &results_key(&identity),
            &report,
            self.config.results_ttl,
        )
        .await
        {
            warn!(error = %e, "Failed to cache permission results");
        }

        info!(
            verified = report.verified_channels,
            failed = report.failed_channels,
            "Channel permissions checked"
        );
        Ok(report)
    }

    /// Run the setup for every credential in the pool.
    #[instrument(skip(self))]
    pub async fn synchronize_permissions(&self) -> Result<PermissionSyncReport> {
        let credentials = self.credentials.all_credentials();
        let mut token_results = Vec::with_capacity(credentials.len());

        for credential in &credentials {
            let line = match self.setup_channel_permissions(credential).await {
                Ok(report) => TokenSyncResult {
                    credential_id: report.credential_id.clone(),
                    identity: report.identity.clone(),
                    success: report.success(),
                    verified_channels: report.verified_channels,
                    failed_channels: report.failed_channels,
                    error: None,
                },
                Err(e) => {
                    warn!(credential = %credential.name(), error = %e, "Permission setup failed");
                    TokenSyncResult {
                        credential_id: credential.spec.id.clone(),
                        identity: credential.name(),
                        success: false,
                        verified_channels: 0,
                        failed_channels: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            token_results.push(line);
        }

        let successful_tokens = token_results.iter().filter(|r| r.success).count();
        let report = PermissionSyncReport {
            total_tokens: token_results.len(),
            successful_tokens,
            failed_tokens: token_results.len() - successful_tokens,
            token_results,
            timestamp: Utc::now(),
        };

        if let Err(e) = set_json_ex(
            self.cache.as_ref(),
            PERMISSION_SYNC_KEY,
            &report,
            self.config.results_ttl,
        )
        .await
        {
            warn!(error = %e, "Failed to cache permission sync results");
        }
        self.repo
            .insert_sync_history(
                report.total_tokens as i64,
                report.successful_tokens as i64,
                report.failed_tokens as i64,
                &serde_json::to_string(&report.token_results)?,
            )
            .await?;

        info!(
            total = report.total_tokens,
            successful = report.successful_tokens,
            "Permission synchronization finished"
        );
        Ok(report)
    }

    /// Test one configured channel with the active credential.
    pub async fn verify_channel_access(&self, channel_id: &str) -> Result<ChannelPermissionResult> {
        let channel = self
            .configured_channels()
            .await?
            .into_iter()
            .find(|c| c.channel_id == channel_id)
            .ok_or_else(|| Error::not_found("Configured channel", channel_id))?;
        let active = self
            .credentials
            .active()
            .ok_or_else(|| Error::exhausted("no active credential"))?;
        let client = self.credentials.client_for(&active.spec).await?;

        let result = self
            .test_channel(&active.spec.id, &active.name(), client.as_ref(), &channel)
            .await;
        self.record(&result).await;
        Ok(result)
    }

    /// Last known verification of every configured channel.
    pub async fn get_permission_status(&self) -> Result<PermissionStatus> {
        let channels: Vec<ChannelVerification> = self
            .configured_channels()
            .await?
            .into_iter()
            .map(|channel| match self.verification.get(&channel.channel_id) {
                Some(known) => known.clone(),
                None => ChannelVerification {
                    channel_id: channel.channel_id,
                    role: channel.role,
                    verified: None,
                    identity: None,
                    missing: Vec::new(),
                    checked_at: None,
                },
            })
            .collect();

        Ok(PermissionStatus {
            total_channels: channels.len(),
            verified_channels: channels.iter().filter(|c| c.verified == Some(true)).count(),
            failed_channels: channels.iter().filter(|c| c.verified == Some(false)).count(),
            channels,
        })
    }

    /// Re-test the log and content channels with the active credential.
    pub async fn monitor_tick(&self) -> Result<usize> {
        let mut watched: Vec<String> = self.config.log_channel.iter().cloned().collect();
        watched.extend(self.config.content_channels.iter().cloned());

        let mut failed = 0;
        for channel_id in watched {
            match self.verify_channel_access(&channel_id).await {
                Ok(result) if result.verified() => {}
                Ok(_) => failed += 1,
                Err(e) => {
                    warn!(channel = %channel_id, error = %e, "Channel access check failed");
                    failed += 1;
                }
            }
        }
        Ok(failed)
    }

    /// Monitor until cancelled, then delete leftover test messages.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval = ?self.config.monitor_interval, "Permission monitoring started");
        loop {
            let manager = self.clone();
            match tokio::spawn(async move { manager.monitor_tick().await }).await {
                Ok(Ok(0)) => debug!("All watched channels verified"),
                Ok(Ok(failed)) => warn!(failed, "Watched channels failing permission checks"),
                Ok(Err(e)) => error!(error = %e, "Permission monitoring tick failed"),
                Err(e) => error!(error = %e, "Permission monitoring tick panicked"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.monitor_interval) => {}
            }
        }
        let cleaned = self.cleanup_test_messages().await;
        info!(cleaned, "Permission monitoring stopped");
    }

    /// Delete test messages left behind by failed deletes.
    pub async fn cleanup_test_messages(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return 0;
        }

        let credentials = self.credentials.all_credentials();
        let mut cleaned = 0;
        for message in pending {
            let Some(credential) = credentials
                .iter()
                .find(|c| c.spec.id == message.credential_id)
            else {
                continue;
            };
            let deleted = match self.credentials.client_for(&credential.spec).await {
                Ok(client) => {
                    bounded(
                        "delete",
                        self.config.probe_timeout,
                        client.delete(&message.channel_id, message.message_id),
                    )
                    .await
                }
                Err(e) => Err(e),
            };
            match deleted {
                Ok(()) => cleaned += 1,
                Err(e) => debug!(
                    channel = %message.channel_id,
                    message_id = message.message_id,
                    error = %e,
                    "Test message cleanup failed"
                ),
            }
        }
        cleaned
    }

    pub fn pending_test_messages(&self) -> usize {
        self.pending.lock().len()
    }

    async fn test_channel(
        &self,
        credential_id: &str,
        identity: &str,
        client: &dyn ChannelProvider,
        channel: &ConfiguredChannel,
    ) -> ChannelPermissionResult {
        let limit = self.config.probe_timeout;
        let channel_id = channel.channel_id.as_str();
        let needs = |c: Capability| channel.required.contains(&c);
        let mut tests = BTreeMap::new();

        let sent = if needs(Capability::SendMessages) || needs(Capability::DeleteMessages) {
            let sent = bounded("send", limit, client.send_ephemeral(channel_id, TEST_MESSAGE)).await;
            if needs(Capability::SendMessages) {
                tests.insert(
                    Capability::SendMessages,
                    match &sent {
                        Ok(_) => CapabilityTest::passed(),
                        Err(e) => CapabilityTest::failed(e.to_string()),
                    },
                );
            }
            sent.ok()
        } else {
            None
        };

        if let Some(message) = sent {
            let deleted = bounded("delete", limit, client.delete(channel_id, message.message_id)).await;
            if let Err(e) = &deleted {
                self.pending.lock().push(PendingMessage {
                    credential_id: credential_id.to_string(),
                    channel_id: channel_id.to_string(),
                    message_id: message.message_id,
                });
                debug!(channel = %channel_id, error = %e, "Test message kept for cleanup");
            }
            if needs(Capability::DeleteMessages) {
                tests.insert(
                    Capability::DeleteMessages,
                    match deleted {
                        Ok(()) => CapabilityTest::passed(),
                        Err(e) => CapabilityTest::failed(e.to_string()),
                    },
                );
            }
        } else if needs(Capability::DeleteMessages) {
            tests.insert(
                Capability::DeleteMessages,
                CapabilityTest::failed("no test message to delete"),
            );
        }

        if needs(Capability::ManageMessages) {
            let test = match bounded("membership", limit, client.self_membership(channel_id)).await {
                Ok(membership) if membership.missing(&[Capability::ManageMessages]).is_empty() => {
                    CapabilityTest::passed()
                }
                Ok(_) => CapabilityTest::failed("manage_messages not granted"),
                Err(e) => CapabilityTest::failed(e.to_string()),
            };
            tests.insert(Capability::ManageMessages, test);
        }

        ChannelPermissionResult {
            channel_id: channel.channel_id.clone(),
            role: channel.role.clone(),
            identity: identity.to_string(),
            tests,
            checked_at: Utc::now(),
        }
    }

    /// Persist test rows, update verification state and alert on gaps.
    async fn record(&self, result: &ChannelPermissionResult) {
        for (capability, test) in &result.tests {
            if let Err(e) = self
                .repo
                .insert_test_result(
                    &result.channel_id,
                    capability.as_ref(),
                    test.success,
                    test.error.as_deref(),
                    &result.identity,
                )
                .await
            {
                warn!(channel = %result.channel_id, error = %e, "Failed to store permission test");
            }
        }

        let missing = result.missing();
        self.verification.insert(
            result.channel_id.clone(),
            ChannelVerification {
                channel_id: result.channel_id.clone(),
                role: result.role.clone(),
                verified: Some(missing.is_empty()),
                identity: Some(result.identity.clone()),
                missing: missing.clone(),
                checked_at: Some(result.checked_at),
            },
        );

        if !missing.is_empty() {
            warn!(
                channel = %result.channel_id,
                identity = %result.identity,
                missing = ?missing,
                "Channel permissions missing"
            );
            self.notifications.notify(NotificationEvent::PermissionIssue {
                channel_id: result.channel_id.clone(),
                identity: result.identity.clone(),
                missing: missing.iter().map(ToString::to_string).collect(),
                timestamp: Utc::now(),
            });
        }
    }
}
