//! Notification service.
//!
//! Fans events out to every configured sink. Delivery is fire-and-forget:
//! a failing sink is logged and counted, never reported to the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::events::{NotificationEvent, NotificationPriority};
use super::sink::NotificationSink;

/// Configuration for the notification service.
#[derive(Debug, Clone)]
pub struct NotificationServiceConfig {
    pub enabled: bool,
    /// Events below this priority are dropped.
    pub min_priority: NotificationPriority,
}

impl Default for NotificationServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_priority: NotificationPriority::Low,
        }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationStats {
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Notification service.
pub struct NotificationService {
    config: NotificationServiceConfig,
    sinks: Vec<Arc<dyn NotificationSink>>,
    tracker: TaskTracker,
    counters: Arc<Counters>,
}

impl NotificationService {
    pub fn new(config: NotificationServiceConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
            tracker: TaskTracker::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Service that drops everything.
    pub fn disabled() -> Self {
        Self::new(NotificationServiceConfig {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Queue an event for delivery and return immediately.
    pub fn notify(&self, event: NotificationEvent) {
        if !self.config.enabled || self.sinks.is_empty() {
            return;
        }
        if event.priority() < self.config.min_priority {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(event_type = event.event_type(), "Notification below minimum priority");
            return;
        }

        let payload = event.to_payload();
        for sink in &self.sinks {
            let sink = sink.clone();
            let payload = payload.clone();
            let counters = self.counters.clone();
            self.tracker.spawn(async move {
                match sink.deliver(&payload).await {
                    Ok(()) => {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            sink = sink.sink_type(),
                            event_type = %payload.event_type,
                            "Failed to dispatch notification: {}",
                            e
                        );
                    }
                }
            });
        }
    }

    /// Wait until every queued delivery has finished.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub fn stats(&self) -> NotificationStats {
        NotificationStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{KeyValueCache, MemoryCache};
    use crate::notification::sink::{ADMIN_NOTIFICATIONS_KEY, CacheNotificationSink};
    use crate::notification::events::NotificationPayload;
    use async_trait::async_trait;
    use chrono::Utc;

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn sink_type(&self) -> &'static str {
            "failing"
        }

        async fn deliver(&self, _payload: &NotificationPayload) -> crate::Result<()> {
            Err(crate::Error::Other("sink down".into()))
        }
    }

    fn degraded_event() -> NotificationEvent {
        NotificationEvent::SystemDegraded {
            components: vec!["cache".into()],
            message: "slow".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_notify_pushes_to_cache_and_tolerates_failing_sink() {
        let cache = Arc::new(MemoryCache::new());
        let service = NotificationService::new(NotificationServiceConfig::default())
            .with_sink(Arc::new(FailingSink))
            .with_sink(Arc::new(CacheNotificationSink::new(cache.clone())));

        service.notify(degraded_event());
        service.flush().await;

        let stats = service.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);

        let entries = cache.list_range(ADMIN_NOTIFICATIONS_KEY, 0, -1).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("system_degraded"));
    }

    #[tokio::test]
    async fn test_min_priority_filter() {
        let cache = Arc::new(MemoryCache::new());
        let service = NotificationService::new(NotificationServiceConfig {
            enabled: true,
            min_priority: NotificationPriority::High,
        })
        .with_sink(Arc::new(CacheNotificationSink::new(cache.clone())));

        service.notify(degraded_event());
        service.flush().await;

        assert_eq!(service.stats().dropped, 1);
        assert!(cache.list_range(ADMIN_NOTIFICATIONS_KEY, 0, -1).await.unwrap().is_empty());
    }
}
