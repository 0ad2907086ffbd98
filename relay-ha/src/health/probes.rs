//! Component probes.
//!
//! Each probe reports the health of one component. Probes never fail: an
//! error while probing becomes a critical component status.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::types::{Component, ComponentHealth, HealthStatus, Metric, format_bytes};
use crate::cache::KeyValueCache;
use crate::channels::ChannelRegistry;
use crate::config::HealthThresholds;
use crate::credentials::CredentialManager;
use crate::database::models::ChannelStatus;
use crate::database::{self, DbPool};

/// Reports the health of one component.
#[async_trait]
pub trait ComponentProbe: Send + Sync {
    fn component(&self) -> Component;
    async fn check(&self) -> ComponentHealth;
}

/// Active credential error count and backup availability.
pub struct CredentialProbe {
    manager: Arc<CredentialManager>,
    thresholds: HealthThresholds,
}

impl CredentialProbe {
    pub fn new(manager: Arc<CredentialManager>, thresholds: HealthThresholds) -> Self {
        Self {
            manager,
            thresholds,
        }
    }
}

#[async_trait]
impl ComponentProbe for CredentialProbe {
    fn component(&self) -> Component {
        Component::Credentials
    }

    async fn check(&self) -> ComponentHealth {
        let status = self.manager.get_current_status();
        let Some(active) = status.active else {
            return ComponentHealth::critical(Component::Credentials, "no active credential");
        };

        let errors = active.consecutive_errors;
        let critical = self.thresholds.credential_errors_critical;
        let error_status = if errors == 0 {
            HealthStatus::Healthy
        } else if errors < critical {
            HealthStatus::Degraded
        } else {
            HealthStatus::Critical
        };
        let error_metric = Metric {
            name: "active_errors".into(),
            value: errors as f64,
            status: error_status,
            warning: Some(1.0),
            critical: Some(critical as f64),
            unit: None,
        };

        let backup_metric = if status.backup_count == 0 {
            Metric {
                status: HealthStatus::Degraded,
                ..Metric::info("backup_ratio", 0.0)
            }
        } else {
            Metric::floor(
                "backup_ratio",
                status.healthy_backups as f64 / status.backup_count as f64,
                self.thresholds.backup_ratio_healthy,
                self.thresholds.backup_ratio_degraded,
            )
        };

        let mut health =
            ComponentHealth::from_metrics(Component::Credentials, vec![error_metric, backup_metric]);
        health.consecutive_errors = errors;
        if active.last_error.is_some() {
            health.last_error = active.last_error;
        }
        health
    }
}

/// Share of registered channels that are reachable.
pub struct ChannelSetProbe {
    registry: Arc<ChannelRegistry>,
    thresholds: HealthThresholds,
}

impl ChannelSetProbe {
    pub fn new(registry: Arc<ChannelRegistry>, thresholds: HealthThresholds) -> Self {
        Self {
            registry,
            thresholds,
        }
    }
}

#[async_trait]
impl ComponentProbe for ChannelSetProbe {
    fn component(&self) -> Component {
        Component::Channels
    }

    async fn check(&self) -> ComponentHealth {
        let started = Instant::now();
        let channels = match self.registry.list().await {
            Ok(channels) => channels,
            Err(e) => return ComponentHealth::critical(Component::Channels, e.to_string()),
        };
        let in_service: Vec<_> = channels
            .iter()
            .filter(|c| c.status != ChannelStatus::Maintenance)
            .collect();
        if in_service.is_empty() {
            return ComponentHealth::unknown(Component::Channels, "no channels in service");
        }

        let accessible = in_service.iter().filter(|c| c.status.is_monitored()).count();
        let accessible_pct = accessible as f64 / in_service.len() as f64 * 100.0;
        let average_score = in_service.iter().map(|c| c.health_score).sum::<i64>() as f64
            / in_service.len() as f64;

        ComponentHealth::from_metrics(
            Component::Channels,
            vec![
                Metric::floor(
                    "accessible_pct",
                    accessible_pct,
                    self.thresholds.channel_access_healthy,
                    self.thresholds.channel_access_degraded,
                )
                .with_unit("%"),
                Metric::info("average_health_score", average_score),
                Metric::info("total_channels", in_service.len() as f64),
            ],
        )
        .with_duration(started.elapsed())
    }
}

/// Datastore round-trip latency.
pub struct DatastoreProbe {
    pool: DbPool,
    thresholds: HealthThresholds,
}

impl DatastoreProbe {
    pub fn new(pool: DbPool, thresholds: HealthThresholds) -> Self {
        Self { pool, thresholds }
    }
}

#[async_trait]
impl ComponentProbe for DatastoreProbe {
    fn component(&self) -> Component {
        Component::Datastore
    }

    async fn check(&self) -> ComponentHealth {
        match database::ping(&self.pool).await {
            Ok(latency) => ComponentHealth::from_metrics(
                Component::Datastore,
                vec![
                    Metric::ceiling(
                        "latency_ms",
                        latency.as_secs_f64() * 1000.0,
                        self.thresholds.datastore_latency_warning.as_secs_f64() * 1000.0,
                        self.thresholds.datastore_latency_critical.as_secs_f64() * 1000.0,
                    )
                    .with_unit("ms"),
                ],
            )
            .with_duration(latency),
            Err(e) => ComponentHealth::critical(Component::Datastore, e.to_string()),
        }
    }
}

/// Cache round-trip latency.
pub struct CacheProbe {
    cache: Arc<dyn KeyValueCache>,
    thresholds: HealthThresholds,
}

impl CacheProbe {
    pub fn new(cache: Arc<dyn KeyValueCache>, thresholds: HealthThresholds) -> Self {
        Self { cache, thresholds }
    }
}

#[async_trait]
impl ComponentProbe for CacheProbe {
    fn component(&self) -> Component {
        Component::Cache
    }

    async fn check(&self) -> ComponentHealth {
        let started = Instant::now();
        match self.cache.ping().await {
            Ok(()) => {
                let latency = started.elapsed();
                ComponentHealth::from_metrics(
                    Component::Cache,
                    vec![
                        Metric::ceiling(
                            "latency_ms",
                            latency.as_secs_f64() * 1000.0,
                            self.thresholds.cache_latency_warning.as_secs_f64() * 1000.0,
                            self.thresholds.cache_latency_critical.as_secs_f64() * 1000.0,
                        )
                        .with_unit("ms"),
                    ],
                )
                .with_duration(latency)
            }
            Err(e) => ComponentHealth::critical(Component::Cache, e.to_string()),
        }
    }
}

/// CPU, memory and disk usage of the host.
pub struct HostProbe {
    system: Mutex<System>,
    disk_path: PathBuf,
    thresholds: HealthThresholds,
}

impl HostProbe {
    pub fn new(disk_path: impl Into<PathBuf>, thresholds: HealthThresholds) -> Self {
        Self {
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            )),
            disk_path: disk_path.into(),
            thresholds,
        }
    }

    /// Metric for a filesystem with `available` of `total` bytes free.
    pub fn disk_metric(&self, available: u64, total: u64) -> Metric {
        let used_pct = if total == 0 {
            0.0
        } else {
            (1.0 - available as f64 / total as f64) * 100.0
        };
        Metric::ceiling(
            "disk_pct",
            used_pct,
            self.thresholds.disk_warning,
            self.thresholds.disk_critical,
        )
        .with_unit("%")
    }
}

#[async_trait]
impl ComponentProbe for HostProbe {
    fn component(&self) -> Component {
        Component::Resources
    }

    async fn check(&self) -> ComponentHealth {
        let started = Instant::now();
        let (cpu_usage, memory_pct) = {
            let mut system = self.system.lock().await;
            system.refresh_cpu_all();
            system.refresh_memory();

            let total_mem = system.total_memory();
            let memory_pct = if total_mem > 0 {
                system.used_memory() as f64 / total_mem as f64 * 100.0
            } else {
                0.0
            };
            (system.global_cpu_usage() as f64, memory_pct)
        };

        let mut metrics = vec![
            Metric::ceiling(
                "cpu_pct",
                cpu_usage,
                self.thresholds.cpu_warning,
                self.thresholds.cpu_critical,
            )
            .with_unit("%"),
            Metric::ceiling(
                "memory_pct",
                memory_pct,
                self.thresholds.memory_warning,
                self.thresholds.memory_critical,
            )
            .with_unit("%"),
        ];

        let path = self.disk_path.clone();
        let disk = match tokio::task::spawn_blocking(move || disk_space(&path)).await {
            Ok(disk) => disk,
            Err(e) => {
                warn!(error = %e, "Disk space task failed");
                None
            }
        };
        match disk {
            Some((available, total)) => {
                debug!(
                    path = %self.disk_path.display(),
                    available = %format_bytes(available),
                    "Disk space checked"
                );
                metrics.push(self.disk_metric(available, total));
            }
            None => debug!(path = %self.disk_path.display(), "No filesystem found for disk check"),
        }

        ComponentHealth::from_metrics(Component::Resources, metrics).with_duration(started.elapsed())
    }
}

/// Available and total bytes of the filesystem holding `path`.
fn disk_space(path: &Path) -> Option<(u64, u64)> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| (d.available_space(), d.total_space()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(50, 100, HealthStatus::Healthy)]
    #[case(8, 100, HealthStatus::Degraded)]
    #[case(1, 100, HealthStatus::Critical)]
    fn test_disk_metric(#[case] available: u64, #[case] total: u64, #[case] expected: HealthStatus) {
        let probe = HostProbe::new(".", HealthThresholds::default());
        assert_eq!(probe.disk_metric(available, total).status, expected);
    }

    #[tokio::test]
    async fn test_datastore_probe_healthy() {
        let pool = crate::database::init_pool("sqlite::memory:").await.unwrap();
        let probe = DatastoreProbe::new(pool, HealthThresholds::default());
        let health = probe.check().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.metric("latency_ms").is_some());
    }

    #[tokio::test]
    async fn test_host_probe_reports_usage() {
        let dir = tempfile::tempdir().unwrap();
        let probe = HostProbe::new(dir.path(), HealthThresholds::default());
        let health = probe.check().await;
        assert_eq!(health.component, Component::Resources);
        assert!(health.metric("cpu_pct").is_some());
        assert!(health.metric("memory_pct").is_some());
        assert!(health.check_duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_cache_probe_healthy() {
        let probe = CacheProbe::new(
            Arc::new(crate::cache::MemoryCache::new()),
            HealthThresholds::default(),
        );
        assert_eq!(probe.check().await.status, HealthStatus::Healthy);
    }
}
