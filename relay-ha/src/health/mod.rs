//! System health.
//!
//! Component probes feed a periodic monitor that aggregates one overall
//! status and runs emergency handlers for critical components.

pub mod emergency;
pub mod monitor;
pub mod probes;
pub mod types;

pub use emergency::{
    CacheReconnectHandler, CredentialFailoverHandler, DatastoreReconnectHandler,
    EmergencyDispatch, EmergencyHandler, EmergencyRegistry, HandlerOutcome,
    PermissionResyncHandler, ResourceAlertHandler,
};
pub use monitor::{HealthTick, SYSTEM_HEALTH_KEY, SystemHealthMonitor};
pub use probes::{
    CacheProbe, ChannelSetProbe, ComponentProbe, CredentialProbe, DatastoreProbe, HostProbe,
};
pub use types::{Component, ComponentHealth, HealthStatus, Metric, SystemHealthSnapshot, format_bytes};
