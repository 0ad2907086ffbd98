//! Runtime configuration.
//!
//! Every component has its own config struct with defaults matching the
//! production deployment. `RelayConfig::from_env` applies overrides from
//! the process environment (after `.env` has been loaded by the binary).

mod env;

pub use env::{EnvSource, ProcessEnv};

use std::path::PathBuf;
use std::time::Duration;

use crate::Result;
use crate::channels::ScoringPolicy;
use crate::credentials::CredentialSpec;
use crate::database::MaintenanceConfig;

const HOUR: Duration = Duration::from_secs(3600);

/// Channel health monitor settings.
#[derive(Debug, Clone)]
pub struct ChannelHealthConfig {
    pub sweep_interval: Duration,
    /// Sleep after a sweep that failed as a whole.
    pub error_retry: Duration,
    pub probe_timeout: Duration,
    /// Pause between two channels within one sweep.
    pub probe_spacing: Duration,
    pub max_channels_per_sweep: usize,
    pub health_cache_ttl: Duration,
    pub failure_alert_ttl: Duration,
    pub degraded_alert_ttl: Duration,
    pub stats_ttl: Duration,
    pub scoring: ScoringPolicy,
}

impl Default for ChannelHealthConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            error_retry: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            probe_spacing: Duration::from_secs(1),
            max_channels_per_sweep: 25,
            health_cache_ttl: Duration::from_secs(600),
            failure_alert_ttl: Duration::from_secs(86_400),
            degraded_alert_ttl: HOUR,
            stats_ttl: HOUR,
            scoring: ScoringPolicy::default(),
        }
    }
}

/// Multi-channel storage settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Minimum health score for a channel to receive new replicas.
    pub failover_threshold: i64,
    pub default_replicas: usize,
    /// Consecutive verification failures before a replica is corrupted.
    pub max_verification_failures: i64,
    /// Persist the rolling success rate every N operations.
    pub stats_persist_every: u64,
    pub stats_ttl: Duration,
    /// Health score deducted on a storage error.
    pub storage_error_penalty: i64,
    pub provider_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            failover_threshold: 50,
            default_replicas: 3,
            max_verification_failures: 3,
            stats_persist_every: 10,
            stats_ttl: HOUR,
            storage_error_penalty: 20,
            provider_timeout: Duration::from_secs(60),
        }
    }
}

/// Credential pool settings.
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub check_interval: Duration,
    /// Consecutive failed checks before the active credential fails over.
    pub max_consecutive_errors: u32,
    pub channel_sample_size: usize,
    pub probe_timeout: Duration,
    pub status_ttl: Duration,
    /// Credential from `BOT_TOKEN` / `API_ID` / `API_HASH`.
    pub primary: Option<CredentialSpec>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            max_consecutive_errors: 5,
            channel_sample_size: 3,
            probe_timeout: Duration::from_secs(15),
            status_ttl: HOUR,
            primary: None,
        }
    }
}

/// Warning and critical thresholds for aggregated metrics.
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub cpu_warning: f64,
    pub cpu_critical: f64,
    pub memory_warning: f64,
    pub memory_critical: f64,
    pub disk_warning: f64,
    pub disk_critical: f64,
    pub datastore_latency_warning: Duration,
    pub datastore_latency_critical: Duration,
    pub cache_latency_warning: Duration,
    pub cache_latency_critical: Duration,
    /// Percent of channels reachable.
    pub channel_access_healthy: f64,
    pub channel_access_degraded: f64,
    /// Healthy backups over total backups.
    pub backup_ratio_healthy: f64,
    pub backup_ratio_degraded: f64,
    /// Active credential errors below this are degraded, at or above critical.
    pub credential_errors_critical: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu_warning: 80.0,
            cpu_critical: 95.0,
            memory_warning: 85.0,
            memory_critical: 95.0,
            disk_warning: 90.0,
            disk_critical: 98.0,
            datastore_latency_warning: Duration::from_secs(5),
            datastore_latency_critical: Duration::from_secs(10),
            cache_latency_warning: Duration::from_secs(1),
            cache_latency_critical: Duration::from_secs(3),
            channel_access_healthy: 90.0,
            channel_access_degraded: 70.0,
            backup_ratio_healthy: 0.8,
            backup_ratio_degraded: 0.5,
            credential_errors_critical: 3,
        }
    }
}

/// System health monitor settings.
#[derive(Debug, Clone)]
pub struct SystemHealthConfig {
    pub tick_interval: Duration,
    /// Minimum spacing between two rounds of emergency handlers.
    pub emergency_cooldown: Duration,
    pub thresholds: HealthThresholds,
    pub snapshot_ttl: Duration,
    pub history_len: usize,
    /// Filesystem whose usage counts as the disk metric.
    pub disk_path: PathBuf,
}

impl Default for SystemHealthConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            emergency_cooldown: Duration::from_secs(300),
            thresholds: HealthThresholds::default(),
            snapshot_ttl: Duration::from_secs(300),
            history_len: 100,
            disk_path: PathBuf::from("."),
        }
    }
}

/// Disaster recovery settings.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub backup_locations: Vec<PathBuf>,
    pub scripts_dir: PathBuf,
    pub recovery_env_file: PathBuf,
    pub critical_env_vars: Vec<String>,
    pub critical_cache_patterns: Vec<String>,
    pub max_cache_keys: usize,
    /// Lifetime of restored cache keys that had no expiry when snapshotted.
    pub restored_cache_ttl: Duration,
    pub package_retention: Duration,
    pub recovery_timeout: Duration,
    pub system_config_files: Vec<PathBuf>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backup_locations: vec![PathBuf::from("config/backups"), PathBuf::from("./backups")],
            scripts_dir: PathBuf::from("./recovery_scripts"),
            recovery_env_file: PathBuf::from(".env.recovery"),
            critical_env_vars: [
                "BOT_TOKEN",
                "API_ID",
                "API_HASH",
                "ADMINS",
                "DATABASE_URL",
                "REDIS_HOST",
                "REDIS_PORT",
                "REDIS_PASSWORD",
                "LOG_CHANNEL",
                "CONTENT_CHANNELS",
                "PUBLIC_CHANNEL",
                "SUPPORT_CHAT_ID",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            critical_cache_patterns: [
                "bot_tokens_status",
                "system_health*",
                "admin_notifications*",
                "channel_health*",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_cache_keys: 500,
            restored_cache_ttl: Duration::from_secs(3600),
            package_retention: Duration::from_secs(7 * 24 * 3600),
            recovery_timeout: Duration::from_secs(300),
            system_config_files: vec![
                PathBuf::from("logging.toml"),
                PathBuf::from("docker-compose.yml"),
                PathBuf::from("Cargo.toml"),
            ],
        }
    }
}

/// Channel permission component settings.
#[derive(Debug, Clone)]
pub struct PermissionConfig {
    pub monitor_interval: Duration,
    pub log_channel: Option<String>,
    pub content_channels: Vec<String>,
    pub public_channel: Option<String>,
    pub support_chat: Option<String>,
    pub results_ttl: Duration,
    pub probe_timeout: Duration,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(300),
            log_channel: None,
            content_channels: Vec::new(),
            public_channel: None,
            support_chat: None,
            results_ttl: HOUR,
            probe_timeout: Duration::from_secs(15),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub package_interval: Duration,
    pub package_retry: Duration,
    pub cleanup_interval: Duration,
    pub cleanup_retry: Duration,
    /// How often expired cache entries are purged.
    pub cache_purge_interval: Duration,
    pub shutdown_timeout: Duration,
    pub retention: MaintenanceConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            package_interval: 6 * HOUR,
            package_retry: HOUR,
            cleanup_interval: 24 * HOUR,
            cleanup_retry: HOUR,
            cache_purge_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            retention: MaintenanceConfig::default(),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub database_url: String,
    pub log_dir: PathBuf,
    pub channel_health: ChannelHealthConfig,
    pub storage: StorageConfig,
    pub credentials: CredentialConfig,
    pub system_health: SystemHealthConfig,
    pub recovery: RecoveryConfig,
    pub permissions: PermissionConfig,
    pub service: ServiceConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:relay-ha.db?mode=rwc".to_string(),
            log_dir: PathBuf::from("logs"),
            channel_health: ChannelHealthConfig::default(),
            storage: StorageConfig::default(),
            credentials: CredentialConfig::default(),
            system_health: SystemHealthConfig::default(),
            recovery: RecoveryConfig::default(),
            permissions: PermissionConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `DATABASE_URL`, `LOG_DIR`
    /// - `BOT_TOKEN`, `API_ID`, `API_HASH`: primary credential
    /// - `LOG_CHANNEL`, `CONTENT_CHANNELS`, `PUBLIC_CHANNEL`, `SUPPORT_CHAT_ID`
    /// - `CHANNEL_HEALTH_INTERVAL_SECS`, `SYSTEM_HEALTH_INTERVAL_SECS`,
    ///   `CREDENTIAL_CHECK_INTERVAL_SECS`, `EMERGENCY_COOLDOWN_SECS`
    /// - `CREDENTIAL_MAX_ERRORS`, `FAILOVER_THRESHOLD`, `HEALTHY_SCORE_THRESHOLD`
    /// - `RECOVERY_PACKAGE_INTERVAL_HOURS`, `CLEANUP_INTERVAL_HOURS`
    /// - `BACKUP_LOCATIONS` (comma separated), `RECOVERY_SCRIPTS_DIR`
    pub fn from_env() -> Result<Self> {
        Self::from_source(&env::ProcessEnv)
    }

    pub fn from_source(env: &dyn EnvSource) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env.text("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = env.text("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        config.credentials.primary = primary_credential(env)?;
        if let Some(secs) = env.number::<u64>("CREDENTIAL_CHECK_INTERVAL_SECS")? {
            config.credentials.check_interval = Duration::from_secs(secs);
        }
        if let Some(max) = env.number::<u32>("CREDENTIAL_MAX_ERRORS")? {
            config.credentials.max_consecutive_errors = max;
        }

        if let Some(secs) = env.number::<u64>("CHANNEL_HEALTH_INTERVAL_SECS")? {
            config.channel_health.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(threshold) = env.number::<i64>("HEALTHY_SCORE_THRESHOLD")? {
            config.channel_health.scoring.healthy_threshold = threshold;
        }
        if let Some(threshold) = env.number::<i64>("FAILOVER_THRESHOLD")? {
            config.storage.failover_threshold = threshold;
        }

        if let Some(secs) = env.number::<u64>("SYSTEM_HEALTH_INTERVAL_SECS")? {
            config.system_health.tick_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env.number::<u64>("EMERGENCY_COOLDOWN_SECS")? {
            config.system_health.emergency_cooldown = Duration::from_secs(secs);
        }

        if let Some(hours) = env.number::<u64>("RECOVERY_PACKAGE_INTERVAL_HOURS")? {
            config.service.package_interval = HOUR * hours as u32;
        }
        if let Some(hours) = env.number::<u64>("CLEANUP_INTERVAL_HOURS")? {
            config.service.cleanup_interval = HOUR * hours as u32;
        }

        if let Some(locations) = env.text("BACKUP_LOCATIONS") {
            let parsed: Vec<PathBuf> = locations
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
            if !parsed.is_empty() {
                config.recovery.backup_locations = parsed;
            }
        }
        if let Some(dir) = env.text("RECOVERY_SCRIPTS_DIR") {
            config.recovery.scripts_dir = PathBuf::from(dir);
        }

        config.permissions.log_channel = env.text("LOG_CHANNEL");
        config.permissions.content_channels = env
            .text("CONTENT_CHANNELS")
            .map(|v| v.split_whitespace().map(String::from).collect())
            .unwrap_or_default();
        config.permissions.public_channel = env.text("PUBLIC_CHANNEL");
        config.permissions.support_chat = env.text("SUPPORT_CHAT_ID");

        Ok(config)
    }
}

fn primary_credential(env: &dyn EnvSource) -> Result<Option<CredentialSpec>> {
    let Some(token) = env.text("BOT_TOKEN") else {
        return Ok(None);
    };
    let app_id = env.number::<i64>("API_ID")?.unwrap_or_default();
    let app_hash = env.text("API_HASH").unwrap_or_default();
    Ok(Some(
        CredentialSpec::new("primary", token, app_id, app_hash).with_label("primary"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.channel_health.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.channel_health.scoring.healthy_threshold, 70);
        assert_eq!(config.storage.failover_threshold, 50);
        assert_eq!(config.credentials.max_consecutive_errors, 5);
        assert_eq!(config.system_health.emergency_cooldown, Duration::from_secs(300));
        assert_eq!(config.service.package_interval, Duration::from_secs(6 * 3600));
        assert_eq!(config.recovery.backup_locations.len(), 2);
    }

    #[test]
    fn test_env_overrides() {
        let env = source(&[
            ("BOT_TOKEN", "123456:ABCDEFGHIJ"),
            ("API_ID", "42"),
            ("API_HASH", "hash"),
            ("CONTENT_CHANNELS", "-1001 -1002  @archive"),
            ("FAILOVER_THRESHOLD", "40"),
            ("BACKUP_LOCATIONS", "/a, /b"),
        ]);
        let config = RelayConfig::from_source(&env).unwrap();

        let primary = config.credentials.primary.unwrap();
        assert_eq!(primary.app_id, 42);
        assert_eq!(config.permissions.content_channels.len(), 3);
        assert_eq!(config.storage.failover_threshold, 40);
        assert_eq!(
            config.recovery.backup_locations,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let env = source(&[("CREDENTIAL_MAX_ERRORS", "five")]);
        let err = RelayConfig::from_source(&env).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
