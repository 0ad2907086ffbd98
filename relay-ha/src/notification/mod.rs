//! Notification system.
//!
//! Operator alerts for channel, credential, health and recovery events.
//! Sinks:
//! - Admin notification list in the key-value cache
//! - Log output

pub mod events;
pub mod service;
pub mod sink;

pub use events::{NotificationEvent, NotificationPayload, NotificationPriority};
pub use service::{NotificationService, NotificationServiceConfig, NotificationStats};
pub use sink::{
    ADMIN_NOTIFICATIONS_KEY, CacheNotificationSink, NotificationSink, TracingNotificationSink,
};
