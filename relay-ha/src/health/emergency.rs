//! Emergency handlers.
//!
//! When the system turns critical, the handler registered for each critical
//! component runs. All handlers share one cooldown so repeated critical
//! ticks cannot cause failover flapping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use super::types::{Component, ComponentHealth, HealthStatus, SystemHealthSnapshot};
use crate::Result;
use crate::cache::KeyValueCache;
use crate::credentials::{CredentialFailover, CredentialManager};
use crate::database::{self, DbPool};
use crate::permissions::PermissionManager;

/// Reacts to one critical component.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmergencyHandler: Send + Sync {
    fn name(&self) -> String;
    /// Returns a short description of what was done.
    async fn handle(&self, health: &ComponentHealth) -> Result<String>;
}

/// Result of one handler invocation.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerOutcome {
    pub component: Component,
    pub handler: String,
    pub success: bool,
    pub message: String,
}

/// What an emergency dispatch did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EmergencyDispatch {
    /// Overall status was not critical.
    NotCritical,
    /// A previous dispatch is still inside the cooldown window.
    CoolingDown { remaining_ms: u64 },
    Dispatched { outcomes: Vec<HandlerOutcome> },
}

/// Registry of `(component, handler)` pairs with a shared cooldown.
pub struct EmergencyRegistry {
    handlers: Vec<(Component, Arc<dyn EmergencyHandler>)>,
    cooldown: Duration,
    last_dispatch: Mutex<Option<Instant>>,
}

impl EmergencyRegistry {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            handlers: Vec::new(),
            cooldown,
            last_dispatch: Mutex::new(None),
        }
    }

    pub fn register(&mut self, component: Component, handler: Arc<dyn EmergencyHandler>) {
        self.handlers.push((component, handler));
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Run the handlers of every critical component, unless cooling down.
    pub async fn dispatch(&self, snapshot: &SystemHealthSnapshot) -> EmergencyDispatch {
        if snapshot.overall != HealthStatus::Critical {
            return EmergencyDispatch::NotCritical;
        }

        {
            let mut last = self.last_dispatch.lock();
            if let Some(at) = *last {
                let elapsed = at.elapsed();
                if elapsed < self.cooldown {
                    let remaining = self.cooldown - elapsed;
                    warn!(
                        remaining_secs = remaining.as_secs(),
                        "System critical; emergency handlers cooling down"
                    );
                    return EmergencyDispatch::CoolingDown {
                        remaining_ms: remaining.as_millis() as u64,
                    };
                }
            }
            *last = Some(Instant::now());
        }

        let mut outcomes = Vec::new();
        for component in &snapshot.critical_components {
            let Some(health) = snapshot.component(*component) else {
                continue;
            };
            for (_, handler) in self.handlers.iter().filter(|(c, _)| c == component) {
                let name = handler.name();
                let outcome = match handler.handle(health).await {
                    Ok(message) => {
                        info!(component = %component, handler = %name, %message, "Emergency handler ran");
                        HandlerOutcome {
                            component: *component,
                            handler: name,
                            success: true,
                            message,
                        }
                    }
                    Err(e) => {
                        error!(component = %component, handler = %name, error = %e, "Emergency handler failed");
                        HandlerOutcome {
                            component: *component,
                            handler: name,
                            success: false,
                            message: e.to_string(),
                        }
                    }
                };
                outcomes.push(outcome);
            }
        }
        EmergencyDispatch::Dispatched { outcomes }
    }
}

/// Credential failure: promote a backup credential.
pub struct CredentialFailoverHandler {
    manager: Arc<CredentialManager>,
}

impl CredentialFailoverHandler {
    pub fn new(manager: Arc<CredentialManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EmergencyHandler for CredentialFailoverHandler {
    fn name(&self) -> String {
        "credential_failover".into()
    }

    async fn handle(&self, _health: &ComponentHealth) -> Result<String> {
        let result = self
            .manager
            .force_failover("credential pool critical")
            .await?;
        Ok(match result {
            CredentialFailover::Promoted { from, to } => format!("promoted {to} over {from}"),
            CredentialFailover::Exhausted { reason, .. } => format!("failover exhausted: {reason}"),
            CredentialFailover::NotNeeded { .. } => "failover not needed".into(),
        })
    }
}

/// Datastore failure: acquire a fresh connection.
pub struct DatastoreReconnectHandler {
    pool: DbPool,
}

impl DatastoreReconnectHandler {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmergencyHandler for DatastoreReconnectHandler {
    fn name(&self) -> String {
        "datastore_reconnect".into()
    }

    async fn handle(&self, _health: &ComponentHealth) -> Result<String> {
        let latency = database::ping(&self.pool).await?;
        Ok(format!("datastore reachable in {}ms", latency.as_millis()))
    }
}

/// Cache failure: reconnect attempt.
pub struct CacheReconnectHandler {
    cache: Arc<dyn KeyValueCache>,
}

impl CacheReconnectHandler {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl EmergencyHandler for CacheReconnectHandler {
    fn name(&self) -> String {
        "cache_reconnect".into()
    }

    async fn handle(&self, _health: &ComponentHealth) -> Result<String> {
        self.cache.ping().await?;
        Ok("cache reachable".into())
    }
}

/// Channel failure: resynchronize channel permissions.
pub struct PermissionResyncHandler {
    permissions: Arc<PermissionManager>,
}

impl PermissionResyncHandler {
    pub fn new(permissions: Arc<PermissionManager>) -> Self {
        Self { permissions }
    }
}

#[async_trait]
impl EmergencyHandler for PermissionResyncHandler {
    fn name(&self) -> String {
        "permission_resync".into()
    }

    async fn handle(&self, _health: &ComponentHealth) -> Result<String> {
        let report = self.permissions.synchronize_permissions().await?;
        Ok(format!(
            "{} of {} credentials synchronized",
            report.successful_tokens, report.total_tokens
        ))
    }
}

/// Resource exhaustion: nothing to automate.
pub struct ResourceAlertHandler;

#[async_trait]
impl EmergencyHandler for ResourceAlertHandler {
    fn name(&self) -> String {
        "resource_alert".into()
    }

    async fn handle(&self, health: &ComponentHealth) -> Result<String> {
        let detail = health.message.clone().unwrap_or_default();
        error!(detail = %detail, "Host resources critical");
        Ok(format!("logged: {detail}"))
    }
}
