//! Disaster recovery service.
//!
//! Wires every component together in dependency order, owns the background
//! loops and exposes the operator surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::KeyValueCache;
use crate::channels::{
    ChannelDescriptor, ChannelHealthMonitor, ChannelRegistry, ProviderConnector, ProviderSource,
    StorageManager,
};
use crate::config::{EnvSource, RelayConfig};
use crate::credentials::{CredentialFailover, CredentialManager, CredentialPoolStatus};
use crate::database::models::{
    FailoverEventDbModel, FailoverStats, RecoveryPackageDbModel, SystemHealthHistoryDbModel,
};
use crate::database::repositories::{
    FailoverRepository, HealthRepository, SqlxChannelRepository, SqlxCredentialRepository,
    SqlxFailoverRepository, SqlxHealthRepository, SqlxPermissionRepository,
    SqlxRecoveryPackageRepository, SqlxStorageRepository,
};
use crate::database::time::now_ms;
use crate::database::{self, CleanupReport, DbPool, MaintenanceScheduler};
use crate::health::{
    CacheProbe, CacheReconnectHandler, ChannelSetProbe, Component, ComponentProbe,
    CredentialFailoverHandler, CredentialProbe, DatastoreProbe, DatastoreReconnectHandler,
    EmergencyRegistry, HealthTick, HostProbe, PermissionResyncHandler, ResourceAlertHandler,
    SystemHealthMonitor, SystemHealthSnapshot,
};
use crate::notification::{
    ADMIN_NOTIFICATIONS_KEY, CacheNotificationSink, NotificationEvent, NotificationService,
    NotificationServiceConfig, NotificationStats, TracingNotificationSink,
};
use crate::permissions::{PermissionManager, PermissionStatus, PermissionSyncReport};
use crate::recovery::{RecoveryManager, RecoveryPackage, RecoveryReport, SavedPackage};
use crate::{Error, Result};

const HOUR_MS: i64 = 3_600_000;

/// Rows returned per list in [`RecentEvents`].
const RECENT_EVENTS_LIMIT: i64 = 50;

/// Combined status of every component.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub timestamp: DateTime<Utc>,
    pub health: Option<SystemHealthSnapshot>,
    pub credentials: CredentialPoolStatus,
    pub permissions: Option<PermissionStatus>,
    pub channels: Vec<ChannelDescriptor>,
    pub recent_packages: Vec<RecoveryPackageDbModel>,
    pub background_tasks_running: bool,
}

/// Result of an on-demand health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckReport {
    #[serde(flatten)]
    pub tick: HealthTick,
    pub permissions: Option<PermissionSyncReport>,
    pub permission_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentEvents {
    pub window_hours: u32,
    pub failovers: Vec<FailoverEventDbModel>,
    pub health_issues: Vec<SystemHealthHistoryDbModel>,
    pub notifications: Vec<serde_json::Value>,
}

/// Share of health snapshots per status inside a window.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Availability {
    pub window_hours: u32,
    pub total_checks: i64,
    pub healthy_pct: f64,
    pub degraded_pct: f64,
    pub critical_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub availability: Availability,
    pub failovers: FailoverStats,
    pub credentials: CredentialPoolStatus,
    pub notifications: NotificationStats,
}

/// External collaborators the service cannot build itself.
pub struct ServiceDeps {
    pub connector: Arc<dyn ProviderConnector>,
    pub cache: Arc<dyn KeyValueCache>,
    pub env: Arc<dyn EnvSource + Send + Sync>,
}

/// Top-level HA/DR orchestrator.
pub struct DisasterRecoveryService {
    config: RelayConfig,
    pool: DbPool,
    cache: Arc<dyn KeyValueCache>,
    notifications: Arc<NotificationService>,
    registry: Arc<ChannelRegistry>,
    credentials: Arc<CredentialManager>,
    recovery: Arc<RecoveryManager>,
    permissions: Arc<PermissionManager>,
    storage: Arc<StorageManager>,
    channel_monitor: Arc<ChannelHealthMonitor>,
    system_health: Arc<SystemHealthMonitor>,
    maintenance: Arc<MaintenanceScheduler>,
    health_store: Arc<dyn HealthRepository>,
    failovers: Arc<dyn FailoverRepository>,
    recovery_lock: Mutex<()>,
    cancellation_token: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl DisasterRecoveryService {
    /// Build and initialize every component in dependency order.
    ///
    /// Any failure tears down whatever was already opened.
    #[instrument(skip_all)]
    pub async fn initialize(config: RelayConfig, deps: ServiceDeps) -> Result<Self> {
        info!("Initializing disaster recovery service");

        let pool = database::init_pool(&config.database_url).await?;
        let cache = deps.cache;
        let opened = async {
            database::run_migrations(&pool).await?;
            cache.ping().await
        }
        .await;
        if let Err(e) = opened {
            return Err(teardown(&pool, None, e).await);
        }
        info!("Datastore and cache connected");

        let notifications = Arc::new(
            NotificationService::new(NotificationServiceConfig::default())
                .with_sink(Arc::new(CacheNotificationSink::new(cache.clone())))
                .with_sink(Arc::new(TracingNotificationSink)),
        );

        let health_store: Arc<dyn HealthRepository> =
            Arc::new(SqlxHealthRepository::new(pool.clone()));
        let failovers: Arc<dyn FailoverRepository> =
            Arc::new(SqlxFailoverRepository::new(pool.clone()));
        let registry = Arc::new(ChannelRegistry::new(Arc::new(SqlxChannelRepository::new(
            pool.clone(),
        ))));

        let credentials = Arc::new(CredentialManager::new(
            deps.connector,
            Arc::new(SqlxCredentialRepository::new(pool.clone())),
            failovers.clone(),
            health_store.clone(),
            cache.clone(),
            registry.clone(),
            notifications.clone(),
            config.credentials.clone(),
        ));
        match credentials.initialize().await {
            Ok(valid) => info!(valid, "Credential pool initialized"),
            Err(e) => return Err(teardown(&pool, Some(&credentials), e).await),
        }

        let thresholds = config.system_health.thresholds.clone();
        let recovery = Arc::new(RecoveryManager::new(
            deps.env,
            pool.clone(),
            cache.clone(),
            registry.clone(),
            credentials.clone(),
            Arc::new(SqlxRecoveryPackageRepository::new(pool.clone())),
            vec![
                Arc::new(DatastoreProbe::new(pool.clone(), thresholds.clone()))
                    as Arc<dyn ComponentProbe>,
                Arc::new(CacheProbe::new(cache.clone(), thresholds.clone())),
                Arc::new(CredentialProbe::new(credentials.clone(), thresholds.clone())),
            ],
            notifications.clone(),
            config.recovery.clone(),
        ));
        if let Err(e) = recovery.initialize().await {
            return Err(teardown(&pool, Some(&credentials), e).await);
        }

        let permissions = Arc::new(PermissionManager::new(
            credentials.clone(),
            Arc::new(SqlxPermissionRepository::new(pool.clone())),
            cache.clone(),
            notifications.clone(),
            config.permissions.clone(),
        ));
        recovery.attach_permissions(permissions.clone());
        match permissions.get_permission_status().await {
            Ok(status) => info!(channels = status.total_channels, "Permission component initialized"),
            Err(e) => return Err(teardown(&pool, Some(&credentials), e).await),
        }

        let providers: Arc<dyn ProviderSource> = credentials.clone();
        let storage = Arc::new(StorageManager::new(
            registry.clone(),
            Arc::new(SqlxStorageRepository::new(pool.clone())),
            health_store.clone(),
            failovers.clone(),
            cache.clone(),
            providers.clone(),
            notifications.clone(),
            config.storage.clone(),
        ));
        let channel_monitor = Arc::new(ChannelHealthMonitor::new(
            registry.clone(),
            health_store.clone(),
            cache.clone(),
            providers,
            storage.clone(),
            notifications.clone(),
            config.channel_health.clone(),
        ));

        let mut emergency = EmergencyRegistry::new(config.system_health.emergency_cooldown);
        emergency.register(
            Component::Credentials,
            Arc::new(CredentialFailoverHandler::new(credentials.clone())),
        );
        emergency.register(
            Component::Datastore,
            Arc::new(DatastoreReconnectHandler::new(pool.clone())),
        );
        emergency.register(Component::Cache, Arc::new(CacheReconnectHandler::new(cache.clone())));
        emergency.register(
            Component::Channels,
            Arc::new(PermissionResyncHandler::new(permissions.clone())),
        );
        emergency.register(Component::Resources, Arc::new(ResourceAlertHandler));

        let system_health = Arc::new(SystemHealthMonitor::new(
            vec![
                Arc::new(CredentialProbe::new(credentials.clone(), thresholds.clone()))
                    as Arc<dyn ComponentProbe>,
                Arc::new(ChannelSetProbe::new(registry.clone(), thresholds.clone())),
                Arc::new(DatastoreProbe::new(pool.clone(), thresholds.clone())),
                Arc::new(CacheProbe::new(cache.clone(), thresholds.clone())),
                Arc::new(HostProbe::new(
                    config.system_health.disk_path.clone(),
                    thresholds,
                )),
            ],
            emergency,
            health_store.clone(),
            cache.clone(),
            notifications.clone(),
            config.system_health.clone(),
        ));

        match system_health.tick().await {
            Ok(tick) => info!(status = %tick.snapshot.overall, "Initial health check completed"),
            Err(e) => return Err(teardown(&pool, Some(&credentials), e).await),
        }

        let maintenance = Arc::new(MaintenanceScheduler::new(
            pool.clone(),
            config.service.retention.clone(),
        ));

        notifications.notify(NotificationEvent::SystemStartup {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        });
        info!("Disaster recovery service initialized");

        Ok(Self {
            config,
            pool,
            cache,
            notifications,
            registry,
            credentials,
            recovery,
            permissions,
            storage,
            channel_monitor,
            system_health,
            maintenance,
            health_store,
            failovers,
            recovery_lock: Mutex::new(()),
            cancellation_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Start every monitoring and maintenance loop. Calling twice is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let token = &self.cancellation_token;

        self.tracker
            .spawn(self.credentials.clone().run(token.child_token()));
        self.tracker
            .spawn(self.channel_monitor.clone().run(token.child_token()));
        self.tracker
            .spawn(self.permissions.clone().run(token.child_token()));
        self.tracker
            .spawn(self.system_health.clone().run(token.child_token()));
        self.tracker.spawn(package_loop(
            self.recovery.clone(),
            token.child_token(),
            self.config.service.package_interval,
            self.config.service.package_retry,
        ));
        self.tracker.spawn(cleanup_loop(
            self.maintenance.clone(),
            token.child_token(),
            self.config.service.cleanup_interval,
            self.config.service.cleanup_retry,
        ));
        self.tracker.spawn(cache_purge_loop(
            self.cache.clone(),
            token.child_token(),
            self.config.service.cache_purge_interval,
        ));
        info!("Background tasks started");
    }

    pub async fn get_system_status(&self) -> Result<SystemStatus> {
        let permissions = match self.permissions.get_permission_status().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "Permission status unavailable");
                None
            }
        };
        let mut recent_packages = self.recovery.list_packages().await?;
        recent_packages.truncate(5);

        Ok(SystemStatus {
            timestamp: Utc::now(),
            health: self.system_health.latest(),
            credentials: self.credentials.get_current_status(),
            permissions,
            channels: self.registry.list().await?,
            recent_packages,
            background_tasks_running: self.started.load(Ordering::SeqCst)
                && !self.cancellation_token.is_cancelled(),
        })
    }

    /// Run one full health tick plus a permission synchronization.
    pub async fn force_health_check(&self) -> Result<HealthCheckReport> {
        let tick = self.system_health.tick().await?;
        let (permissions, permission_error) = match self.permissions.synchronize_permissions().await
        {
            Ok(report) => (Some(report), None),
            Err(e) => {
                warn!(error = %e, "Permission synchronization failed during health check");
                (None, Some(e.to_string()))
            }
        };
        Ok(HealthCheckReport {
            tick,
            permissions,
            permission_error,
        })
    }

    pub async fn create_recovery_package(&self) -> Result<SavedPackage> {
        self.recovery.create_recovery_package().await
    }

    /// Load a package by path or id.
    pub async fn load_recovery_package(&self, reference: &str) -> Result<RecoveryPackage> {
        self.recovery.load_package(reference).await
    }

    /// Replay a package. Concurrent recoveries queue behind each other.
    pub async fn execute_recovery(&self, package: &RecoveryPackage) -> Result<RecoveryReport> {
        let _guard = self.recovery_lock.lock().await;
        self.recovery.execute_recovery(package).await
    }

    pub async fn trigger_credential_failover(&self) -> Result<CredentialFailover> {
        self.credentials.force_failover("manual failover requested").await
    }

    pub async fn sync_channel_permissions(&self) -> Result<PermissionSyncReport> {
        self.permissions.synchronize_permissions().await
    }

    /// Failovers, health problems and operator notifications of the last
    /// `hours` hours.
    pub async fn get_recent_events(&self, hours: u32) -> Result<RecentEvents> {
        let since = now_ms() - i64::from(hours) * HOUR_MS;
        let failovers = self.failovers.list_since(since, RECENT_EVENTS_LIMIT).await?;
        let health_issues = self
            .health_store
            .list_problem_snapshots(since, RECENT_EVENTS_LIMIT)
            .await?;
        let notifications: Vec<serde_json::Value> = self
            .cache
            .list_range(ADMIN_NOTIFICATIONS_KEY, 0, RECENT_EVENTS_LIMIT as isize - 1)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read admin notifications");
                Vec::new()
            })
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect();

        Ok(RecentEvents {
            window_hours: hours,
            failovers,
            health_issues,
            notifications,
        })
    }

    pub async fn get_performance_metrics(&self) -> Result<PerformanceMetrics> {
        let now = now_ms();
        let counts = self.health_store.health_counts(now - 24 * HOUR_MS).await?;
        let pct = |n: i64| {
            if counts.total_checks == 0 {
                0.0
            } else {
                n as f64 / counts.total_checks as f64 * 100.0
            }
        };
        let availability = Availability {
            window_hours: 24,
            total_checks: counts.total_checks,
            healthy_pct: pct(counts.healthy_checks),
            degraded_pct: pct(counts.degraded_checks),
            critical_pct: pct(counts.critical_checks),
        };

        Ok(PerformanceMetrics {
            availability,
            failovers: self.failovers.stats_since(now - 7 * 24 * HOUR_MS).await?,
            credentials: self.credentials.get_current_status(),
            notifications: self.notifications.stats(),
        })
    }

    /// Delete expired history rows and recovery package index entries.
    pub async fn run_cleanup(&self) -> Result<CleanupReport> {
        self.maintenance.run_cleanup().await
    }

    /// Shut down with the configured timeout.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(self.config.service.shutdown_timeout)
            .await
    }

    /// Cancel the loops, wait for them, then close connections in reverse
    /// dependency order.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!(timeout = ?timeout, "Shutting down disaster recovery service");
        self.notifications.notify(NotificationEvent::SystemShutdown {
            reason: "shutdown requested".to_string(),
            timestamp: Utc::now(),
        });

        self.cancellation_token.cancel();
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!("Shutdown timeout reached before background tasks finished");
        }

        // The permission loop cleans up after itself when it was running.
        if !self.started.load(Ordering::SeqCst) {
            let cleaned = self.permissions.cleanup_test_messages().await;
            debug!(cleaned, "Test messages cleaned up");
        }

        let _guard = self.recovery_lock.lock().await;
        self.notifications.flush().await;
        self.credentials.disconnect_all();
        self.pool.close().await;

        info!("Disaster recovery service stopped");
        Ok(())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn channel_monitor(&self) -> &Arc<ChannelHealthMonitor> {
        &self.channel_monitor
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.permissions
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    pub fn system_health(&self) -> &Arc<SystemHealthMonitor> {
        &self.system_health
    }
}

/// Undo a partial initialization and hand the error back.
async fn teardown(pool: &DbPool, credentials: Option<&Arc<CredentialManager>>, e: Error) -> Error {
    error!(error = %e, "Initialization failed; tearing down");
    if let Some(credentials) = credentials {
        credentials.disconnect_all();
    }
    pool.close().await;
    e
}

/// Create a recovery package every `interval`, retrying sooner on failure.
async fn package_loop(
    recovery: Arc<RecoveryManager>,
    cancel: CancellationToken,
    interval: Duration,
    retry: Duration,
) {
    info!(interval = ?interval, "Recovery package loop started");
    loop {
        let manager = recovery.clone();
        let delay = match tokio::spawn(async move { manager.create_recovery_package().await }).await
        {
            Ok(Ok(saved)) => {
                info!(package_id = %saved.package.package_id, "Scheduled recovery package created");
                interval
            }
            Ok(Err(e)) => {
                error!(error = %e, "Scheduled recovery package failed");
                retry
            }
            Err(e) => {
                error!(error = %e, "Recovery package task panicked");
                retry
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    info!("Recovery package loop stopped");
}

/// Delete expired rows every `interval`, retrying sooner on failure.
async fn cleanup_loop(
    maintenance: Arc<MaintenanceScheduler>,
    cancel: CancellationToken,
    interval: Duration,
    retry: Duration,
) {
    info!(interval = ?interval, "Cleanup loop started");
    let mut delay = interval;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        let scheduler = maintenance.clone();
        delay = match tokio::spawn(async move { scheduler.run_cleanup().await }).await {
            Ok(Ok(report)) => {
                info!(removed = report.total(), "Scheduled cleanup finished");
                interval
            }
            Ok(Err(e)) => {
                error!(error = %e, "Scheduled cleanup failed");
                retry
            }
            Err(e) => {
                error!(error = %e, "Cleanup task panicked");
                retry
            }
        };
    }
    info!("Cleanup loop stopped");
}

/// Purge expired cache entries every `interval`.
async fn cache_purge_loop(
    cache: Arc<dyn KeyValueCache>,
    cancel: CancellationToken,
    interval: Duration,
) {
    debug!(interval = ?interval, "Cache purge loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        match cache.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Expired cache entries purged"),
            Err(e) => warn!(error = %e, "Cache purge failed"),
        }
    }
    debug!("Cache purge loop stopped");
}
