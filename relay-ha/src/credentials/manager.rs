//! Credential pool manager.
//!
//! Holds one active credential and an ordered list of backups, health-checks
//! them and fails over when the active one keeps erroring. The pool itself
//! sits behind a synchronous lock that is never held across an await; the
//! failover path is serialized by its own async mutex.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::types::{
    CredentialCheck, CredentialFailover, CredentialPoolStatus, CredentialSpec, CredentialStatus,
    CredentialSummary, ManagedCredential,
};
use crate::cache::{KeyValueCache, set_json_ex};
use crate::channels::{ChannelProvider, ChannelRegistry, ProviderConnector, ProviderSource, bounded};
use crate::config::CredentialConfig;
use crate::database::models::{FailoverEntity, FailoverEventDbModel};
use crate::database::repositories::{CredentialRepository, FailoverRepository, HealthRepository};
use crate::notification::{NotificationEvent, NotificationService};
use crate::{Error, Result};

/// Cache key of the published pool status.
pub const POOL_STATUS_KEY: &str = "bot_tokens_status";

/// `system_status` component the pool status is stored under.
pub const POOL_STATUS_COMPONENT: &str = "bot_tokens";

/// Channel access ratio at or above which a passing credential is healthy.
const HEALTHY_ACCESS_RATIO: f64 = 0.8;

#[derive(Default)]
struct Pool {
    active: Option<ManagedCredential>,
    backups: Vec<ManagedCredential>,
}

impl Pool {
    fn get_mut(&mut self, id: &str) -> Option<&mut ManagedCredential> {
        if let Some(active) = self.active.as_mut().filter(|c| c.spec.id == id) {
            return Some(active);
        }
        self.backups.iter_mut().find(|c| c.spec.id == id)
    }
}

/// Credential pool manager.
pub struct CredentialManager {
    connector: Arc<dyn ProviderConnector>,
    candidates: Arc<dyn CredentialRepository>,
    failovers: Arc<dyn FailoverRepository>,
    status_store: Arc<dyn HealthRepository>,
    cache: Arc<dyn KeyValueCache>,
    registry: Arc<ChannelRegistry>,
    notifications: Arc<NotificationService>,
    config: CredentialConfig,
    pool: RwLock<Pool>,
    clients: DashMap<String, Arc<dyn ChannelProvider>>,
    failover_lock: Mutex<()>,
    /// Set once an exhausted failover has been reported; cleared when a
    /// credential recovers or a promotion succeeds.
    exhausted: AtomicBool,
    monitoring: AtomicBool,
}

impl CredentialManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: Arc<dyn ProviderConnector>,
        candidates: Arc<dyn CredentialRepository>,
        failovers: Arc<dyn FailoverRepository>,
        status_store: Arc<dyn HealthRepository>,
        cache: Arc<dyn KeyValueCache>,
        registry: Arc<ChannelRegistry>,
        notifications: Arc<NotificationService>,
        config: CredentialConfig,
    ) -> Self {
        Self {
            connector,
            candidates,
            failovers,
            status_store,
            cache,
            registry,
            notifications,
            config,
            pool: RwLock::new(Pool::default()),
            clients: DashMap::new(),
            failover_lock: Mutex::new(()),
            exhausted: AtomicBool::new(false),
            monitoring: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    /// Primary credential from configuration followed by stored backups.
    pub async fn load_candidates(&self) -> Result<Vec<CredentialSpec>> {
        let mut candidates: Vec<CredentialSpec> = self.config.primary.iter().cloned().collect();
        for row in self.candidates.list_candidates().await? {
            let spec = CredentialSpec::from(row);
            if candidates.iter().any(|c| c.secret == spec.secret) {
                debug!(credential = %spec.display_name(), "Skipping duplicate credential");
                continue;
            }
            candidates.push(spec);
        }
        Ok(candidates)
    }

    /// Load candidates and build the pool.
    pub async fn initialize(&self) -> Result<usize> {
        let candidates = self.load_candidates().await?;
        self.initialize_all(candidates).await
    }

    /// Validate every candidate with an identity check. The first valid one
    /// becomes active, the rest are backups in load order.
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn initialize_all(&self, candidates: Vec<CredentialSpec>) -> Result<usize> {
        let mut valid = Vec::with_capacity(candidates.len());
        for spec in candidates {
            let started = Instant::now();
            let identity = match self.client_for(&spec).await {
                Ok(client) => {
                    bounded("whoami", self.config.probe_timeout, client.whoami()).await
                }
                Err(e) => Err(e),
            };
            match identity {
                Ok(identity) => {
                    info!(credential = %identity.label(), "Credential validated");
                    let mut managed = ManagedCredential::new(spec);
                    managed.status = CredentialStatus::Healthy;
                    managed.identity = Some(identity);
                    managed.response_time_ms = Some(started.elapsed().as_millis() as u64);
                    managed.last_check = Some(Utc::now());
                    valid.push(managed);
                }
                Err(e) => {
                    warn!(credential = %spec.display_name(), error = %e, "Dropping invalid credential");
                    self.clients.remove(&spec.id);
                }
            }
        }

        if valid.is_empty() {
            return Err(Error::bootstrap("no valid credentials"));
        }

        let count = valid.len();
        let mut iter = valid.into_iter();
        {
            let mut pool = self.pool.write();
            pool.active = iter.next();
            pool.backups = iter.collect();
        }
        self.exhausted.store(false, Ordering::SeqCst);
        info!(count, "Credential pool initialized");
        Ok(count)
    }

    /// Identity check plus a bounded sample of channel accessibility checks.
    pub async fn check_credential(&self, spec: &CredentialSpec) -> CredentialCheck {
        let started = Instant::now();
        let client = match self.client_for(spec).await {
            Ok(client) => client,
            Err(e) => {
                return CredentialCheck::Failed {
                    error: e.to_string(),
                };
            }
        };

        let identity = match bounded("whoami", self.config.probe_timeout, client.whoami()).await {
            Ok(identity) => identity,
            Err(e) => {
                self.clients.remove(&spec.id);
                return CredentialCheck::Failed {
                    error: e.to_string(),
                };
            }
        };
        let response_time_ms = started.elapsed().as_millis() as u64;

        let sample: Vec<String> = match self.registry.list_monitored().await {
            Ok(channels) => channels
                .into_iter()
                .take(self.config.channel_sample_size)
                .map(|c| c.external_id)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to load channel sample");
                Vec::new()
            }
        };
        let mut reachable = 0usize;
        for channel in &sample {
            match bounded("describe", self.config.probe_timeout, client.describe(channel)).await {
                Ok(_) => reachable += 1,
                Err(e) => debug!(channel = %channel, error = %e, "Sample channel unreachable"),
            }
        }
        let channel_access_ratio = if sample.is_empty() {
            1.0
        } else {
            reachable as f64 / sample.len() as f64
        };

        CredentialCheck::Passed {
            identity,
            response_time_ms,
            channel_access_ratio,
        }
    }

    /// Check a pooled credential and fold the result into its state.
    pub async fn health_check(&self, credential_id: &str) -> Result<CredentialCheck> {
        let spec = self
            .find(credential_id)
            .map(|c| c.spec)
            .ok_or_else(|| Error::not_found("Credential", credential_id))?;
        let check = self.check_credential(&spec).await;
        self.apply_check(credential_id, &check);
        Ok(check)
    }

    /// Check the active credential and fail over once it reaches the error
    /// threshold. Returns the failover result when one ran.
    pub async fn check_active(&self) -> Result<Option<CredentialFailover>> {
        let Some(active) = self.active() else {
            return Err(Error::exhausted("no active credential"));
        };
        let check = self.health_check(&active.spec.id).await?;
        match &check {
            CredentialCheck::Failed { error } => {
                warn!(credential = %active.name(), error = %error, "Active credential check failed");
            }
            CredentialCheck::Passed { .. } => self.exhausted.store(false, Ordering::SeqCst),
        }

        let errors = self.active().map(|c| c.consecutive_errors).unwrap_or(0);
        if errors >= self.config.max_consecutive_errors {
            return self.failover_to_backup().await.map(Some);
        }
        Ok(None)
    }

    /// Fail over if the active credential has reached the error threshold.
    pub async fn failover_to_backup(&self) -> Result<CredentialFailover> {
        self.perform_failover("consecutive health check failures", true)
            .await
    }

    /// Fail over regardless of the error count.
    pub async fn force_failover(&self, reason: &str) -> Result<CredentialFailover> {
        self.perform_failover(reason, false).await
    }

    #[instrument(skip(self))]
    async fn perform_failover(
        &self,
        reason: &str,
        require_threshold: bool,
    ) -> Result<CredentialFailover> {
        let _guard = self.failover_lock.lock().await;
        let started = Instant::now();

        let (failed, backups) = {
            let pool = self.pool.read();
            let Some(active) = pool.active.clone() else {
                return Err(Error::exhausted("no active credential"));
            };
            (active, pool.backups.clone())
        };

        if require_threshold && failed.consecutive_errors < self.config.max_consecutive_errors {
            return Ok(CredentialFailover::NotNeeded {
                consecutive_errors: failed.consecutive_errors,
                threshold: self.config.max_consecutive_errors,
            });
        }

        let failed_name = failed.name();
        warn!(credential = %failed_name, reason, "Starting credential failover");
        if let Some(active) = self.pool.write().active.as_mut() {
            active.status = CredentialStatus::Failed;
        }

        for candidate in backups {
            let check = self.check_credential(&candidate.spec).await;
            self.apply_check(&candidate.spec.id, &check);
            if !check.passed() {
                debug!(credential = %candidate.name(), "Backup failed its live check");
                continue;
            }

            let promoted_name = {
                let mut pool = self.pool.write();
                let Some(position) = pool
                    .backups
                    .iter()
                    .position(|c| c.spec.id == candidate.spec.id)
                else {
                    continue;
                };
                let promoted = pool.backups.remove(position);
                let name = promoted.name();
                if let Some(old) = pool.active.replace(promoted) {
                    pool.backups.push(old);
                }
                name
            };

            self.exhausted.store(false, Ordering::SeqCst);
            let event = FailoverEventDbModel::new(
                FailoverEntity::Credential,
                &failed.spec.id,
                Some(candidate.spec.id.clone()),
                reason,
            )
            .with_recovery_time_ms(started.elapsed().as_millis() as i64);
            if let Err(e) = self.failovers.insert_event(&event).await {
                warn!(error = %e, "Failed to record credential failover");
            }

            info!(from = %failed_name, to = %promoted_name, "Credential failover completed");
            self.notifications
                .notify(NotificationEvent::CredentialFailover {
                    failed_identity: failed_name.clone(),
                    new_identity: promoted_name.clone(),
                    timestamp: Utc::now(),
                });
            self.publish_status().await;
            return Ok(CredentialFailover::Promoted {
                from: failed_name,
                to: promoted_name,
            });
        }

        let reason_text = "no backup available".to_string();
        if self.exhausted.swap(true, Ordering::SeqCst) {
            debug!(credential = %failed_name, "Credential pool still exhausted");
            return Ok(CredentialFailover::Exhausted {
                failed: failed_name,
                reason: reason_text,
            });
        }
        let event = FailoverEventDbModel::new(FailoverEntity::Credential, &failed.spec.id, None, reason)
            .with_recovery_time_ms(started.elapsed().as_millis() as i64);
        if let Err(e) = self.failovers.insert_event(&event).await {
            warn!(error = %e, "Failed to record credential failover");
        }
        error!(credential = %failed_name, "Credential failover exhausted every backup");
        self.notifications
            .notify(NotificationEvent::CredentialsExhausted {
                failed_identity: failed_name.clone(),
                reason: reason_text.clone(),
                timestamp: Utc::now(),
            });
        self.publish_status().await;
        Ok(CredentialFailover::Exhausted {
            failed: failed_name,
            reason: reason_text,
        })
    }

    /// One monitoring tick: check the active credential, re-check failed
    /// backups and publish the pool status.
    pub async fn monitor_tick(&self) -> Result<CredentialPoolStatus> {
        if let Some(result) = self.check_active().await? {
            info!(?result, "Credential failover ran during monitoring");
        }

        let stale: Vec<String> = self
            .pool
            .read()
            .backups
            .iter()
            .filter(|c| !c.is_usable())
            .map(|c| c.spec.id.clone())
            .collect();
        for id in stale {
            let check = self.health_check(&id).await?;
            if check.passed() {
                info!(credential_id = %id, "Backup credential recovered");
                self.exhausted.store(false, Ordering::SeqCst);
            }
        }

        self.publish_status().await;
        Ok(self.get_current_status())
    }

    /// Monitor until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.monitoring.store(true, Ordering::SeqCst);
        info!(interval = ?self.config.check_interval, "Credential monitoring started");
        loop {
            if let Err(e) = self.monitor_tick().await {
                error!(error = %e, "Credential monitoring tick failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.check_interval) => {}
            }
        }
        self.monitoring.store(false, Ordering::SeqCst);
        info!("Credential monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> Option<ManagedCredential> {
        self.pool.read().active.clone()
    }

    pub fn backups(&self) -> Vec<ManagedCredential> {
        self.pool.read().backups.clone()
    }

    /// Active credential first, then backups in order.
    pub fn all_credentials(&self) -> Vec<ManagedCredential> {
        let pool = self.pool.read();
        pool.active
            .iter()
            .chain(pool.backups.iter())
            .cloned()
            .collect()
    }

    pub fn get_current_status(&self) -> CredentialPoolStatus {
        let pool = self.pool.read();
        let backups: Vec<CredentialSummary> =
            pool.backups.iter().map(CredentialSummary::from).collect();
        CredentialPoolStatus {
            active: pool.active.as_ref().map(CredentialSummary::from),
            backup_count: backups.len(),
            healthy_backups: pool.backups.iter().filter(|c| c.is_usable()).count(),
            backups,
            monitoring: self.is_monitoring(),
            timestamp: Utc::now(),
        }
    }

    /// Provider client for a specific credential.
    pub async fn client_for(&self, spec: &CredentialSpec) -> Result<Arc<dyn ChannelProvider>> {
        if let Some(client) = self.clients.get(&spec.id) {
            return Ok(client.clone());
        }
        let client = bounded(
            "connect",
            self.config.probe_timeout,
            self.connector.connect(spec),
        )
        .await?;
        self.clients.insert(spec.id.clone(), client.clone());
        Ok(client)
    }

    /// Drop every cached client.
    pub fn disconnect_all(&self) {
        self.clients.clear();
    }

    async fn publish_status(&self) {
        let status = self.get_current_status();
        if let Err(e) =
            set_json_ex(self.cache.as_ref(), POOL_STATUS_KEY, &status, self.config.status_ttl).await
        {
            warn!(error = %e, "Failed to cache credential status");
        }
        let stored = match serde_json::to_string(&status) {
            Ok(json) => self
                .status_store
                .upsert_system_status(POOL_STATUS_COMPONENT, &json)
                .await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = stored {
            warn!(error = %e, "Failed to store credential status");
        }
    }

    fn find(&self, id: &str) -> Option<ManagedCredential> {
        let pool = self.pool.read();
        pool.active
            .iter()
            .chain(pool.backups.iter())
            .find(|c| c.spec.id == id)
            .cloned()
    }

    fn apply_check(&self, id: &str, check: &CredentialCheck) {
        if let Some(credential) = self.pool.write().get_mut(id) {
            credential.apply(check, HEALTHY_ACCESS_RATIO);
        }
    }
}

#[async_trait]
impl ProviderSource for CredentialManager {
    async fn provider(&self) -> Result<Arc<dyn ChannelProvider>> {
        let Some(active) = self.active() else {
            return Err(Error::exhausted("no active credential"));
        };
        self.client_for(&active.spec).await
    }
}
