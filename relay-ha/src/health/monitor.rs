//! System health monitor.
//!
//! Polls every component probe on a fixed tick, aggregates one overall
//! status, persists it and runs emergency handlers when it is critical.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::emergency::{EmergencyDispatch, EmergencyRegistry};
use super::probes::ComponentProbe;
use super::types::{Component, ComponentHealth, HealthStatus, SystemHealthSnapshot};
use crate::cache::{KeyValueCache, set_json_ex};
use crate::config::SystemHealthConfig;
use crate::database::repositories::{HealthRepository, NewSystemHealthSnapshot};
use crate::notification::{NotificationEvent, NotificationService};
use crate::Result;

/// Cache key of the latest snapshot.
pub const SYSTEM_HEALTH_KEY: &str = "system_health";

/// Result of one monitoring tick.
#[derive(Debug, Clone, Serialize)]
pub struct HealthTick {
    pub snapshot: SystemHealthSnapshot,
    pub emergency: EmergencyDispatch,
}

#[derive(Default)]
struct ErrorTrack {
    consecutive: u32,
    last_error: Option<String>,
}

/// System health monitor.
pub struct SystemHealthMonitor {
    probes: Vec<Arc<dyn ComponentProbe>>,
    emergency: EmergencyRegistry,
    store: Arc<dyn HealthRepository>,
    cache: Arc<dyn KeyValueCache>,
    notifications: Arc<NotificationService>,
    config: SystemHealthConfig,
    history: Mutex<VecDeque<SystemHealthSnapshot>>,
    errors: Mutex<HashMap<Component, ErrorTrack>>,
}

impl SystemHealthMonitor {
    pub fn new(
        probes: Vec<Arc<dyn ComponentProbe>>,
        emergency: EmergencyRegistry,
        store: Arc<dyn HealthRepository>,
        cache: Arc<dyn KeyValueCache>,
        notifications: Arc<NotificationService>,
        config: SystemHealthConfig,
    ) -> Self {
        Self {
            probes,
            emergency,
            store,
            cache,
            notifications,
            config,
            history: Mutex::new(VecDeque::new()),
            errors: Mutex::new(HashMap::new()),
        }
    }

    /// Poll every probe concurrently and aggregate.
    pub async fn check_all(&self) -> SystemHealthSnapshot {
        let started = Instant::now();
        let results = join_all(self.probes.iter().map(|probe| async move {
            let probe_started = Instant::now();
            let mut health = probe.check().await;
            if health.check_duration_ms.is_none() {
                health = health.with_duration(probe_started.elapsed());
            }
            health
        }))
        .await;

        let components = {
            let mut errors = self.errors.lock();
            results
                .into_iter()
                .map(|mut health| {
                    let track = errors.entry(health.component).or_default();
                    if health.status == HealthStatus::Critical {
                        track.consecutive += 1;
                        track.last_error = health.last_error.clone().or(health.message.clone());
                    } else {
                        track.consecutive = 0;
                    }
                    health.consecutive_errors = health.consecutive_errors.max(track.consecutive);
                    if health.last_error.is_none() {
                        health.last_error = track.last_error.clone();
                    }
                    health
                })
                .collect::<Vec<ComponentHealth>>()
        };

        SystemHealthSnapshot::from_components(components, started.elapsed())
    }

    /// One tick: check, persist, notify and dispatch emergencies.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<HealthTick> {
        let snapshot = self.check_all().await;
        // The datastore may be the critical component itself.
        if let Err(e) = self.persist(&snapshot).await {
            warn!(error = %e, "Failed to persist system health snapshot");
        }

        let emergency = match snapshot.overall {
            HealthStatus::Critical => {
                error!(components = ?snapshot.critical_components, "System health critical");
                self.notifications.notify(NotificationEvent::SystemCritical {
                    components: names(&snapshot.critical_components),
                    message: snapshot.message.clone(),
                    timestamp: Utc::now(),
                });
                self.emergency.dispatch(&snapshot).await
            }
            HealthStatus::Degraded => {
                warn!(components = ?snapshot.degraded_components, "System health degraded");
                self.notifications.notify(NotificationEvent::SystemDegraded {
                    components: names(&snapshot.degraded_components),
                    message: snapshot.message.clone(),
                    timestamp: Utc::now(),
                });
                EmergencyDispatch::NotCritical
            }
            _ => {
                debug!(status = %snapshot.overall, "System health checked");
                EmergencyDispatch::NotCritical
            }
        };

        Ok(HealthTick {
            snapshot,
            emergency,
        })
    }

    async fn persist(&self, snapshot: &SystemHealthSnapshot) -> Result<()> {
        {
            let mut history = self.history.lock();
            history.push_back(snapshot.clone());
            while history.len() > self.config.history_len {
                history.pop_front();
            }
        }

        let row = NewSystemHealthSnapshot {
            overall_status: snapshot.overall.as_str().to_string(),
            message: snapshot.message.clone(),
            critical_components: serde_json::to_string(&snapshot.critical_components)?,
            degraded_components: serde_json::to_string(&snapshot.degraded_components)?,
            components: serde_json::to_string(&snapshot.components)?,
        };
        self.store.insert_system_snapshot(&row).await?;

        for (component, health) in &snapshot.components {
            let data = serde_json::to_string(health)?;
            if let Err(e) = self.store.upsert_system_status(component.as_ref(), &data).await {
                warn!(component = %component, error = %e, "Failed to store component status");
            }
        }

        if let Err(e) = set_json_ex(
            self.cache.as_ref(),
            SYSTEM_HEALTH_KEY,
            snapshot,
            self.config.snapshot_ttl,
        )
        .await
        {
            warn!(error = %e, "Failed to cache system health");
        }
        Ok(())
    }

    pub fn latest(&self) -> Option<SystemHealthSnapshot> {
        self.history.lock().back().cloned()
    }

    /// Rolling in-memory history, oldest first.
    pub fn history(&self) -> Vec<SystemHealthSnapshot> {
        self.history.lock().iter().cloned().collect()
    }

    /// Tick until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval = ?self.config.tick_interval, "System health monitor started");
        loop {
            let monitor = self.clone();
            match tokio::spawn(async move { monitor.tick().await }).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(error = %e, "System health tick failed"),
                Err(e) => error!(error = %e, "System health tick panicked"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.tick_interval) => {}
            }
        }
        info!("System health monitor stopped");
    }
}

fn names(components: &[Component]) -> Vec<String> {
    components.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, get_json};
    use crate::database::repositories::SqlxHealthRepository;
    use crate::database::{init_pool, run_migrations};
    use crate::health::emergency::MockEmergencyHandler;
    use crate::health::probes::DatastoreProbe;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedProbe(Component, HealthStatus);

    #[async_trait]
    impl ComponentProbe for FixedProbe {
        fn component(&self) -> Component {
            self.0
        }

        async fn check(&self) -> ComponentHealth {
            match self.1 {
                HealthStatus::Critical => ComponentHealth::critical(self.0, "down"),
                HealthStatus::Degraded => ComponentHealth::degraded(self.0, "slow"),
                _ => ComponentHealth::healthy(self.0),
            }
        }
    }

    async fn monitor(
        probes: Vec<Arc<dyn ComponentProbe>>,
        emergency: EmergencyRegistry,
    ) -> (SystemHealthMonitor, Arc<MemoryCache>, Arc<SqlxHealthRepository>) {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = Arc::new(SqlxHealthRepository::new(pool));
        let cache = Arc::new(MemoryCache::new());
        let monitor = SystemHealthMonitor::new(
            probes,
            emergency,
            store.clone(),
            cache.clone(),
            Arc::new(NotificationService::disabled()),
            SystemHealthConfig::default(),
        );
        (monitor, cache, store)
    }

    #[tokio::test]
    async fn test_two_critical_ticks_dispatch_once() {
        let mut handler = MockEmergencyHandler::new();
        handler.expect_name().return_const("failover".to_string());
        handler
            .expect_handle()
            .times(1)
            .returning(|_| Ok("promoted".into()));
        let mut emergency = EmergencyRegistry::new(Duration::from_secs(300));
        emergency.register(Component::Credentials, Arc::new(handler));

        let (monitor, _, _) = monitor(
            vec![
                Arc::new(FixedProbe(Component::Credentials, HealthStatus::Critical)),
                Arc::new(FixedProbe(Component::Datastore, HealthStatus::Healthy)),
            ],
            emergency,
        )
        .await;

        let first = monitor.tick().await.unwrap();
        assert!(matches!(first.emergency, EmergencyDispatch::Dispatched { .. }));
        let second = monitor.tick().await.unwrap();
        assert!(matches!(second.emergency, EmergencyDispatch::CoolingDown { .. }));

        let credentials = second
            .snapshot
            .component(Component::Credentials)
            .unwrap();
        assert_eq!(credentials.consecutive_errors, 2);
    }

    #[tokio::test]
    async fn test_datastore_outage_still_dispatches() {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let mut handler = MockEmergencyHandler::new();
        handler.expect_name().return_const("reconnect".to_string());
        handler
            .expect_handle()
            .times(1)
            .returning(|_| Ok("reconnected".into()));
        let mut emergency = EmergencyRegistry::new(Duration::from_secs(300));
        emergency.register(Component::Datastore, Arc::new(handler));

        let monitor = SystemHealthMonitor::new(
            vec![Arc::new(DatastoreProbe::new(
                pool.clone(),
                crate::config::HealthThresholds::default(),
            )) as Arc<dyn ComponentProbe>],
            emergency,
            Arc::new(SqlxHealthRepository::new(pool.clone())),
            Arc::new(MemoryCache::new()),
            Arc::new(NotificationService::disabled()),
            SystemHealthConfig::default(),
        );
        pool.close().await;

        let tick = monitor.tick().await.unwrap();
        assert_eq!(tick.snapshot.overall, HealthStatus::Critical);
        match tick.emergency {
            EmergencyDispatch::Dispatched { outcomes } => {
                assert_eq!(outcomes.len(), 1);
                assert_eq!(outcomes[0].component, Component::Datastore);
                assert!(outcomes[0].success);
            }
            other => panic!("unexpected dispatch: {other:?}"),
        }
        assert_eq!(monitor.history().len(), 1);
    }

    #[tokio::test]
    async fn test_tick_persists_snapshot() {
        let (monitor, cache, store) = monitor(
            vec![
                Arc::new(FixedProbe(Component::Channels, HealthStatus::Degraded)),
                Arc::new(FixedProbe(Component::Cache, HealthStatus::Healthy)),
            ],
            EmergencyRegistry::new(Duration::from_secs(300)),
        )
        .await;

        let tick = monitor.tick().await.unwrap();
        assert_eq!(tick.snapshot.overall, HealthStatus::Degraded);
        assert!(matches!(tick.emergency, EmergencyDispatch::NotCritical));

        let cached: Option<SystemHealthSnapshot> =
            get_json(cache.as_ref(), SYSTEM_HEALTH_KEY).await.unwrap();
        assert_eq!(cached.unwrap().overall, HealthStatus::Degraded);

        let problems = store.list_problem_snapshots(0, 10).await.unwrap();
        assert_eq!(problems.len(), 1);
        assert!(store.get_system_status("channels").await.unwrap().is_some());
        assert_eq!(monitor.history().len(), 1);
    }
}
