//! Disaster recovery manager.
//!
//! Builds checksummed recovery packages and replays them through a staged
//! recovery procedure. Only the first step (configuration restore) can
//! abort the procedure; the final health verification decides the outcome.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use super::mask::{is_masked, is_sensitive_name, mask_value};
use super::package::{
    CacheSnapshot, ChannelPermissionSnapshot, ConfigFileSnapshot, CredentialSnapshot,
    DatabaseSnapshot, EnvironmentSnapshot, RecoveryPackage, SystemConfigSnapshot, package_file_name,
    package_id_for,
};
use super::scripts::DeploymentScripts;
use crate::cache::KeyValueCache;
use crate::channels::{ChannelRegistry, bounded};
use crate::config::{EnvSource, RecoveryConfig};
use crate::credentials::CredentialManager;
use crate::database::models::RecoveryPackageDbModel;
use crate::database::repositories::RecoveryPackageRepository;
use crate::database::time::now_ms;
use crate::database::{self, DbPool};
use crate::health::{ComponentProbe, SystemHealthSnapshot};
use crate::notification::{NotificationEvent, NotificationService};
use crate::permissions::PermissionManager;
use crate::{Error, Result};

/// A package together with the files it was written to.
#[derive(Debug, Clone, Serialize)]
pub struct SavedPackage {
    pub package: RecoveryPackage,
    pub locations: Vec<PathBuf>,
}

/// Outcome of one recovery step.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStep {
    pub step: u8,
    pub name: &'static str,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
}

/// Outcome of a recovery run.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub package_id: String,
    pub success: bool,
    pub steps: Vec<RecoveryStep>,
    pub health: Option<SystemHealthSnapshot>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl RecoveryReport {
    fn new(package_id: &str) -> Self {
        Self {
            package_id: package_id.to_string(),
            success: false,
            steps: Vec::new(),
            health: None,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    fn push(&mut self, step: u8, name: &'static str, started: Instant, result: &Result<String>) {
        let (success, message) = match result {
            Ok(message) => {
                info!(step, name, %message, "Recovery step completed");
                (true, message.clone())
            }
            Err(e) => {
                warn!(step, name, error = %e, "Recovery step failed");
                self.errors.push(format!("{name}: {e}"));
                (false, e.to_string())
            }
        };
        self.steps.push(RecoveryStep {
            step,
            name,
            success,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }
}

/// Disaster recovery manager.
pub struct RecoveryManager {
    env: Arc<dyn EnvSource + Send + Sync>,
    pool: DbPool,
    cache: Arc<dyn KeyValueCache>,
    registry: Arc<ChannelRegistry>,
    credentials: Arc<CredentialManager>,
    packages: Arc<dyn RecoveryPackageRepository>,
    probes: Vec<Arc<dyn ComponentProbe>>,
    notifications: Arc<NotificationService>,
    config: RecoveryConfig,
    permissions: OnceLock<Arc<PermissionManager>>,
}

impl RecoveryManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        env: Arc<dyn EnvSource + Send + Sync>,
        pool: DbPool,
        cache: Arc<dyn KeyValueCache>,
        registry: Arc<ChannelRegistry>,
        credentials: Arc<CredentialManager>,
        packages: Arc<dyn RecoveryPackageRepository>,
        probes: Vec<Arc<dyn ComponentProbe>>,
        notifications: Arc<NotificationService>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            env,
            pool,
            cache,
            registry,
            credentials,
            packages,
            probes,
            notifications,
            config,
            permissions: OnceLock::new(),
        }
    }

    /// The permission component starts after this manager; attach it once
    /// it exists.
    pub fn attach_permissions(&self, permissions: Arc<PermissionManager>) {
        if self.permissions.set(permissions).is_err() {
            warn!("Permission component already attached");
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Create the backup locations.
    pub async fn initialize(&self) -> Result<()> {
        let mut usable = 0;
        for location in &self.config.backup_locations {
            match tokio::fs::create_dir_all(location).await {
                Ok(()) => usable += 1,
                Err(e) => warn!(location = %location.display(), error = %e, "Backup location unavailable"),
            }
        }
        if usable == 0 {
            return Err(Error::config("no usable backup location"));
        }
        info!(locations = usable, "Recovery manager initialized");
        Ok(())
    }

    /// Snapshot, seal and persist a package to every backup location.
    #[instrument(skip(self))]
    pub async fn create_recovery_package(&self) -> Result<SavedPackage> {
        let started = Instant::now();
        let mut package = self.build_package().await?;
        package.seal()?;

        let locations = package.save_to(&self.config.backup_locations).await?;
        let retention = chrono::Duration::from_std(self.config.package_retention)
            .map_err(|e| Error::config(format!("package retention out of range: {e}")))?;
        let index = RecoveryPackageDbModel {
            package_id: package.package_id.clone(),
            checksum: package.checksum.clone().unwrap_or_default(),
            locations: serde_json::to_string(
                &locations.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            )?,
            created_at: now_ms(),
            expires_at: Some(now_ms() + retention.num_milliseconds()),
        };
        self.packages.upsert_package(&index).await?;

        info!(
            package_id = %package.package_id,
            locations = locations.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Recovery package created"
        );
        Ok(SavedPackage { package, locations })
    }

    /// Gather every section of a package. The result is not sealed.
    pub async fn build_package(&self) -> Result<RecoveryPackage> {
        let now = Utc::now();
        Ok(RecoveryPackage {
            timestamp: now,
            package_id: package_id_for(now),
            environment_variables: self.snapshot_environment(),
            database_config: self.snapshot_database().await,
            channel_permissions: self.snapshot_channels().await,
            bot_tokens: self.snapshot_credentials(),
            redis_state: self.snapshot_cache().await,
            deployment_scripts: DeploymentScripts::generate(&self.config.recovery_env_file),
            system_configuration: self.snapshot_system_config().await,
            checksum: None,
        })
    }

    /// Index rows of saved packages, newest first.
    pub async fn list_packages(&self) -> Result<Vec<RecoveryPackageDbModel>> {
        self.packages.list_packages().await
    }

    /// Load a package by file path, or by id from any backup location.
    pub async fn load_package(&self, reference: &str) -> Result<RecoveryPackage> {
        let direct = Path::new(reference);
        if tokio::fs::try_exists(direct).await.unwrap_or(false) {
            return RecoveryPackage::load(direct).await;
        }

        let file_name = package_file_name(reference);
        let mut candidates: Vec<PathBuf> = self
            .config
            .backup_locations
            .iter()
            .map(|location| location.join(&file_name))
            .collect();
        if let Some(row) = self.packages.get_package(reference).await? {
            candidates.extend(row.location_list().into_iter().map(PathBuf::from));
        }

        for path in candidates {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            match RecoveryPackage::load(&path).await {
                Ok(package) => return Ok(package),
                Err(e) => warn!(path = %path.display(), error = %e, "Unreadable recovery package copy"),
            }
        }
        Err(Error::not_found("Recovery package", reference))
    }

    /// Verify the package and replay it.
    ///
    /// A checksum problem aborts before anything is touched and is returned
    /// as an integrity error. Every other failure is reported in the
    /// returned [`RecoveryReport`].
    #[instrument(skip(self, package), fields(package_id = %package.package_id))]
    pub async fn execute_recovery(&self, package: &RecoveryPackage) -> Result<RecoveryReport> {
        let started = Instant::now();
        if let Err(e) = package.verify() {
            error!(error = %e, "Recovery aborted before any change");
            self.notify_failure(&package.package_id, &e.to_string());
            return Err(e);
        }

        info!("Starting recovery");
        let mut report = RecoveryReport::new(&package.package_id);

        let step_started = Instant::now();
        let restored = self.restore_configuration(package).await;
        report.push(1, "restore_configuration", step_started, &restored);
        if restored.is_err() {
            report.duration_ms = started.elapsed().as_millis() as u64;
            self.notify_failure(&package.package_id, &report.errors.join("; "));
            return Ok(report);
        }

        let result = self.step("verify_datastore", self.verify_datastore()).await;
        report.push(2, "verify_datastore", result.1, &result.0);
        let result = self.step("restore_cache", self.restore_cache(package)).await;
        report.push(3, "restore_cache", result.1, &result.0);
        let result = self.step("verify_credentials", self.verify_credentials()).await;
        report.push(4, "verify_credentials", result.1, &result.0);
        let result = self.step("resync_permissions", self.resync_permissions()).await;
        report.push(5, "resync_permissions", result.1, &result.0);
        let result = self.step("install_scripts", self.install_scripts(package)).await;
        report.push(6, "install_scripts", result.1, &result.0);

        let step_started = Instant::now();
        let health = self.verify_health().await;
        let verdict = if health.critical_components.is_empty() {
            Ok(format!("overall status {}", health.overall))
        } else {
            Err(Error::Other(format!(
                "critical components after recovery: {:?}",
                health.critical_components
            )))
        };
        report.push(7, "verify_health", step_started, &verdict);
        report.success = verdict.is_ok();
        report.health = Some(health);
        report.duration_ms = started.elapsed().as_millis() as u64;

        if report.success {
            info!(duration_ms = report.duration_ms, "Recovery completed");
            self.notifications.notify(NotificationEvent::RecoverySucceeded {
                package_id: package.package_id.clone(),
                duration_ms: report.duration_ms,
                timestamp: Utc::now(),
            });
        } else {
            error!(errors = ?report.errors, "Recovery finished with critical components");
            self.notify_failure(&package.package_id, &report.errors.join("; "));
        }
        Ok(report)
    }

    async fn step<F>(&self, name: &str, fut: F) -> (Result<String>, Instant)
    where
        F: Future<Output = Result<String>>,
    {
        let started = Instant::now();
        (bounded(name, self.config.recovery_timeout, fut).await, started)
    }

    fn notify_failure(&self, package_id: &str, reason: &str) {
        self.notifications.notify(NotificationEvent::RecoveryFailed {
            package_id: package_id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Step 1: write the recovery env file. Masked values are taken from
    /// the current environment, or left out when it has none.
    async fn restore_configuration(&self, package: &RecoveryPackage) -> Result<String> {
        let variables = &package.environment_variables.variables;
        if variables.is_empty() {
            return Err(Error::config("package carries no configuration"));
        }

        let mut lines = Vec::with_capacity(variables.len());
        let mut omitted = Vec::new();
        for (name, value) in variables {
            if is_masked(value) {
                match self.env.text(name) {
                    Some(current) => lines.push(format!("{name}={current}")),
                    None => omitted.push(name.clone()),
                }
            } else {
                lines.push(format!("{name}={value}"));
            }
        }

        let path = &self.config.recovery_env_file;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut body = lines.join("\n");
        body.push('\n');
        tokio::fs::write(path, body).await?;

        if !omitted.is_empty() {
            warn!(variables = ?omitted, "Masked variables missing from the environment were omitted");
        }
        Ok(format!(
            "{} variables written to {} ({} omitted)",
            lines.len(),
            path.display(),
            omitted.len()
        ))
    }

    async fn verify_datastore(&self) -> Result<String> {
        let latency = database::ping(&self.pool).await?;
        Ok(format!("datastore reachable in {}ms", latency.as_millis()))
    }

    async fn restore_cache(&self, package: &RecoveryPackage) -> Result<String> {
        let keys = &package.redis_state.critical_keys;
        let mut restored = 0;
        for (key, value) in keys {
            let ttl = package
                .redis_state
                .key_ttls_secs
                .get(key)
                .map(|secs| Duration::from_secs(*secs))
                .unwrap_or(self.config.restored_cache_ttl);
            match self.cache.set_ex(key, value, ttl).await {
                Ok(()) => restored += 1,
                Err(e) => warn!(key = %key, error = %e, "Failed to restore cache key"),
            }
        }
        if restored < keys.len() {
            return Err(Error::cache(format!("restored {restored} of {} keys", keys.len())));
        }
        Ok(format!("{restored} cache keys restored"))
    }

    async fn verify_credentials(&self) -> Result<String> {
        let active = self
            .credentials
            .active()
            .ok_or_else(|| Error::exhausted("no active credential"))?;
        let check = self.credentials.health_check(&active.spec.id).await?;
        if check.passed() {
            Ok(format!("active credential {} verified", active.name()))
        } else {
            Err(Error::provider("whoami", format!("active credential {} failed", active.name())))
        }
    }

    async fn resync_permissions(&self) -> Result<String> {
        let permissions = self
            .permissions
            .get()
            .ok_or_else(|| Error::Other("permission component not attached".into()))?;
        let report = permissions.synchronize_permissions().await?;
        Ok(format!(
            "{} of {} credentials synchronized",
            report.successful_tokens, report.total_tokens
        ))
    }

    async fn install_scripts(&self, package: &RecoveryPackage) -> Result<String> {
        let written = package
            .deployment_scripts
            .install(&self.config.scripts_dir)
            .await?;
        Ok(format!(
            "{} scripts written to {}",
            written.len(),
            self.config.scripts_dir.display()
        ))
    }

    /// Step 7: one pass over every probe.
    async fn verify_health(&self) -> SystemHealthSnapshot {
        let started = Instant::now();
        let components = join_all(self.probes.iter().map(|p| p.check())).await;
        SystemHealthSnapshot::from_components(components, started.elapsed())
    }

    fn snapshot_environment(&self) -> EnvironmentSnapshot {
        let variables = self
            .config
            .critical_env_vars
            .iter()
            .filter_map(|name| {
                let value = self.env.text(name)?;
                let value = if is_sensitive_name(name) {
                    mask_value(&value)
                } else {
                    value
                };
                Some((name.clone(), value))
            })
            .collect();
        EnvironmentSnapshot {
            variables,
            backup_time: Utc::now(),
        }
    }

    async fn snapshot_database(&self) -> DatabaseSnapshot {
        let url = self.env.text("DATABASE_URL").unwrap_or_default();
        let mut snapshot = DatabaseSnapshot {
            database_url: mask_value(&url),
            tables: Vec::new(),
            critical_data: BTreeMap::new(),
            error: None,
            backup_time: Utc::now(),
        };

        match database::list_tables(&self.pool).await {
            Ok(tables) => snapshot.tables = tables,
            Err(e) => {
                warn!(error = %e, "Failed to list tables for recovery package");
                snapshot.error = Some(e.to_string());
            }
        }
        match self.registry.list().await {
            Ok(channels) => {
                let rows: Vec<_> = channels
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "external_id": c.external_id,
                            "class": c.class,
                            "status": c.status,
                            "priority": c.priority,
                            "health_score": c.health_score,
                        })
                    })
                    .collect();
                snapshot.critical_data.insert("channels".into(), json!(rows));
            }
            Err(e) => {
                warn!(error = %e, "Failed to snapshot channels");
                snapshot.error.get_or_insert_with(|| e.to_string());
            }
        }
        snapshot
    }

    async fn snapshot_channels(&self) -> ChannelPermissionSnapshot {
        let mut snapshot = ChannelPermissionSnapshot {
            configured_channels: Vec::new(),
            error: None,
            backup_time: Utc::now(),
        };
        match self.permissions.get() {
            Some(permissions) => match permissions.configured_channels().await {
                Ok(channels) => snapshot.configured_channels = channels,
                Err(e) => snapshot.error = Some(e.to_string()),
            },
            None => snapshot.error = Some("permission component not attached".into()),
        }
        snapshot
    }

    fn snapshot_credentials(&self) -> CredentialSnapshot {
        let status = self.credentials.get_current_status();
        CredentialSnapshot {
            primary_configured: self.env.text("BOT_TOKEN").is_some(),
            api_credentials_configured: self.env.text("API_ID").is_some()
                && self.env.text("API_HASH").is_some(),
            active: status.active.as_ref().map(|a| a.name.clone()),
            masked_secrets: self
                .credentials
                .all_credentials()
                .iter()
                .map(|c| mask_value(&c.spec.secret))
                .collect(),
            backup_count: status.backup_count,
            healthy_backups: status.healthy_backups,
            backup_time: Utc::now(),
        }
    }

    async fn snapshot_cache(&self) -> CacheSnapshot {
        let mut snapshot = CacheSnapshot {
            critical_keys: BTreeMap::new(),
            key_ttls_secs: BTreeMap::new(),
            truncated: false,
            error: None,
            backup_time: Utc::now(),
        };

        'patterns: for pattern in &self.config.critical_cache_patterns {
            let keys = match self.cache.keys(pattern).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Failed to list cache keys");
                    snapshot.error.get_or_insert_with(|| e.to_string());
                    continue;
                }
            };
            for key in keys {
                if snapshot.critical_keys.len() >= self.config.max_cache_keys {
                    snapshot.truncated = true;
                    break 'patterns;
                }
                // List-valued keys are skipped; only plain values are restorable.
                if let Ok(Some(value)) = self.cache.get(&key).await {
                    if let Ok(Some(ttl)) = self.cache.ttl(&key).await {
                        snapshot.key_ttls_secs.insert(key.clone(), ttl.as_secs().max(1));
                    }
                    snapshot.critical_keys.insert(key, value);
                }
            }
        }
        if snapshot.truncated {
            warn!(limit = self.config.max_cache_keys, "Cache snapshot truncated");
        }
        snapshot
    }

    async fn snapshot_system_config(&self) -> SystemConfigSnapshot {
        let mut files = Vec::new();
        for path in &self.config.system_config_files {
            if let Ok(content) = tokio::fs::read_to_string(path).await {
                files.push(ConfigFileSnapshot {
                    path: path.display().to_string(),
                    content,
                });
            }
        }
        SystemConfigSnapshot {
            files,
            backup_time: Utc::now(),
        }
    }
}
