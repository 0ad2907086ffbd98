//! Notification sinks.

use std::sync::Arc;

use async_trait::async_trait;

use super::events::NotificationPayload;
use crate::Result;
use crate::cache::KeyValueCache;

/// Cache list holding the most recent operator notifications.
pub const ADMIN_NOTIFICATIONS_KEY: &str = "admin_notifications";

/// Maximum entries kept in the admin notification list.
const ADMIN_NOTIFICATIONS_LIMIT: isize = 100;

/// Trait for notification sinks.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Get the sink type name.
    fn sink_type(&self) -> &'static str;

    /// Deliver one payload.
    async fn deliver(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Pushes payloads onto the `admin_notifications` cache list, newest first.
pub struct CacheNotificationSink {
    cache: Arc<dyn KeyValueCache>,
}

impl CacheNotificationSink {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl NotificationSink for CacheNotificationSink {
    fn sink_type(&self) -> &'static str {
        "cache"
    }

    async fn deliver(&self, payload: &NotificationPayload) -> Result<()> {
        let raw = serde_json::to_string(payload)?;
        self.cache.list_push(ADMIN_NOTIFICATIONS_KEY, &raw).await?;
        self.cache
            .list_trim(ADMIN_NOTIFICATIONS_KEY, 0, ADMIN_NOTIFICATIONS_LIMIT - 1)
            .await
    }
}

/// Writes payloads to the log at a level matching their severity.
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    fn sink_type(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, payload: &NotificationPayload) -> Result<()> {
        use super::events::NotificationPriority::*;
        match payload.severity {
            Critical => tracing::error!(
                event_type = %payload.event_type,
                "{}: {}",
                payload.title,
                payload.message
            ),
            High => tracing::warn!(
                event_type = %payload.event_type,
                "{}: {}",
                payload.title,
                payload.message
            ),
            Normal | Low => tracing::info!(
                event_type = %payload.event_type,
                "{}: {}",
                payload.title,
                payload.message
            ),
        }
        Ok(())
    }
}
