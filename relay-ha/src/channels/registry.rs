//! Channel registry.
//!
//! Durable record of known delivery channels. Channels are registered by an
//! operator, mutated by the health monitor and failover routines, and never
//! deleted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::models::{ChannelClass, ChannelDbModel, ChannelStatus};
use crate::database::repositories::{ChannelHealthUpdate, ChannelRepository};
use crate::{Error, Result};

/// Typed view of a channel row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub id: String,
    pub external_id: String,
    pub display_name: Option<String>,
    pub class: ChannelClass,
    pub status: ChannelStatus,
    pub priority: i64,
    pub health_score: i64,
    pub response_time_ms: Option<i64>,
    pub success_rate: f64,
    pub capacity_limit: Option<i64>,
    pub used_slots: i64,
    pub last_health_check: Option<i64>,
}

impl TryFrom<ChannelDbModel> for ChannelDescriptor {
    type Error = Error;

    fn try_from(row: ChannelDbModel) -> Result<Self> {
        let class = ChannelClass::parse(&row.channel_class).ok_or_else(|| {
            Error::Database(format!(
                "channel {} has unknown class '{}'",
                row.id, row.channel_class
            ))
        })?;
        let status = ChannelStatus::parse(&row.status).ok_or_else(|| {
            Error::Database(format!("channel {} has unknown status '{}'", row.id, row.status))
        })?;
        Ok(Self {
            id: row.id,
            external_id: row.external_id,
            display_name: row.display_name,
            class,
            status,
            priority: row.priority,
            health_score: row.health_score,
            response_time_ms: row.response_time_ms,
            success_rate: row.success_rate,
            capacity_limit: row.capacity_limit,
            used_slots: row.used_slots,
            last_health_check: row.last_health_check,
        })
    }
}

/// Operator request to register a channel.
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub external_id: String,
    pub display_name: Option<String>,
    pub class: ChannelClass,
    pub priority: i64,
    pub health_score: i64,
    pub capacity_limit: Option<i64>,
}

impl NewChannel {
    pub fn new(external_id: impl Into<String>, class: ChannelClass, priority: i64) -> Self {
        Self {
            external_id: external_id.into(),
            display_name: None,
            class,
            priority,
            health_score: 100,
            capacity_limit: None,
        }
    }

    pub fn with_health_score(mut self, score: i64) -> Self {
        self.health_score = score;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.external_id.trim().is_empty() {
            return Err(Error::validation("channel identifier must not be empty"));
        }
        if !(0..=100).contains(&self.health_score) {
            return Err(Error::validation(format!(
                "health score {} is outside 0..=100",
                self.health_score
            )));
        }
        if self.priority < 0 {
            return Err(Error::validation("priority must not be negative"));
        }
        if self.capacity_limit.is_some_and(|c| c < 0) {
            return Err(Error::validation("capacity limit must not be negative"));
        }
        Ok(())
    }
}

/// Channel registry over the datastore.
pub struct ChannelRegistry {
    repo: Arc<dyn ChannelRepository>,
}

impl ChannelRegistry {
    pub fn new(repo: Arc<dyn ChannelRepository>) -> Self {
        Self { repo }
    }

    pub async fn register(&self, request: NewChannel) -> Result<ChannelDescriptor> {
        request.validate()?;
        if self
            .repo
            .get_by_external_id(&request.external_id)
            .await?
            .is_some()
        {
            return Err(Error::validation(format!(
                "channel {} is already registered",
                request.external_id
            )));
        }

        let mut row = ChannelDbModel::new(&request.external_id, request.class, request.priority);
        row.display_name = request.display_name;
        row.health_score = request.health_score;
        row.capacity_limit = request.capacity_limit;
        self.repo.create_channel(&row).await?;

        info!(
            channel_id = %row.id,
            external_id = %row.external_id,
            class = %request.class,
            "Registered channel"
        );
        row.try_into()
    }

    pub async fn get(&self, id: &str) -> Result<ChannelDescriptor> {
        self.repo.get_channel(id).await?.try_into()
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<ChannelDescriptor>> {
        self.repo
            .get_by_external_id(external_id)
            .await?
            .map(ChannelDescriptor::try_from)
            .transpose()
    }

    pub async fn list(&self) -> Result<Vec<ChannelDescriptor>> {
        collect(self.repo.list_channels().await?)
    }

    /// Channels the health monitor sweeps.
    pub async fn list_monitored(&self) -> Result<Vec<ChannelDescriptor>> {
        collect(self.repo.list_monitored().await?)
    }

    /// Active channels scoring at least `min_score`, preferred first.
    pub async fn healthy_channels(&self, min_score: i64) -> Result<Vec<ChannelDescriptor>> {
        collect(self.repo.list_healthy(min_score).await?)
    }

    /// Best active backup-class channel other than `exclude_id`.
    pub async fn best_backup(&self, exclude_id: &str) -> Result<Option<ChannelDescriptor>> {
        self.repo
            .best_of_class(ChannelClass::Backup, exclude_id)
            .await?
            .map(ChannelDescriptor::try_from)
            .transpose()
    }

    pub async fn record_health(
        &self,
        id: &str,
        status: ChannelStatus,
        health_score: i64,
        response_time_ms: Option<i64>,
    ) -> Result<()> {
        self.repo
            .update_health(
                id,
                &ChannelHealthUpdate {
                    status,
                    health_score,
                    response_time_ms,
                },
            )
            .await
    }

    /// Move a channel to `target`, rejecting transitions the lifecycle forbids.
    pub async fn transition(&self, id: &str, target: ChannelStatus) -> Result<ChannelDescriptor> {
        let current = self.get(id).await?;
        if !current.status.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: current.status.to_string(),
                to: target.to_string(),
            });
        }
        if current.status != target {
            self.repo.update_status(id, target).await?;
            info!(channel_id = %id, from = %current.status, to = %target, "Channel status changed");
        }
        Ok(ChannelDescriptor {
            status: target,
            ..current
        })
    }

    pub async fn adjust_score(&self, id: &str, delta: i64) -> Result<i64> {
        self.repo.adjust_health_score(id, delta).await
    }

    pub async fn update_success_rate(&self, id: &str, success_rate: f64) -> Result<()> {
        self.repo.update_success_rate(id, success_rate).await
    }

    pub async fn record_usage(&self, id: &str) -> Result<()> {
        self.repo.increment_used_slots(id).await
    }
}

fn collect(rows: Vec<ChannelDbModel>) -> Result<Vec<ChannelDescriptor>> {
    rows.into_iter().map(ChannelDescriptor::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::SqlxChannelRepository;
    use crate::database::{init_pool, run_migrations};

    async fn registry() -> ChannelRegistry {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        ChannelRegistry::new(Arc::new(SqlxChannelRepository::new(pool)))
    }

    #[tokio::test]
    async fn test_register_validates_input() {
        let registry = registry().await;
        let err = registry
            .register(NewChannel::new("-100", ChannelClass::Primary, 1).with_health_score(101))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = registry
            .register(NewChannel::new(" ", ChannelClass::Primary, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let registry = registry().await;
        registry
            .register(NewChannel::new("-100", ChannelClass::Primary, 1))
            .await
            .unwrap();
        let err = registry
            .register(NewChannel::new("-100", ChannelClass::Backup, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_healthy_channels_ordering() {
        let registry = registry().await;
        let a = registry
            .register(NewChannel::new("a", ChannelClass::Primary, 1).with_health_score(100))
            .await
            .unwrap();
        let b = registry
            .register(NewChannel::new("b", ChannelClass::Primary, 2).with_health_score(90))
            .await
            .unwrap();
        registry
            .register(NewChannel::new("c", ChannelClass::Primary, 3).with_health_score(10))
            .await
            .unwrap();

        let healthy = registry.healthy_channels(50).await.unwrap();
        let ids: Vec<_> = healthy.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_transition_rules() {
        let registry = registry().await;
        let channel = registry
            .register(NewChannel::new("x", ChannelClass::Backup, 1))
            .await
            .unwrap();

        let failed = registry
            .transition(&channel.id, ChannelStatus::Failed)
            .await
            .unwrap();
        assert_eq!(failed.status, ChannelStatus::Failed);

        let err = registry
            .transition(&channel.id, ChannelStatus::Degraded)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_adjust_score_clamps() {
        let registry = registry().await;
        let channel = registry
            .register(NewChannel::new("x", ChannelClass::Backup, 1).with_health_score(10))
            .await
            .unwrap();
        assert_eq!(registry.adjust_score(&channel.id, -20).await.unwrap(), 0);
        assert_eq!(registry.adjust_score(&channel.id, 500).await.unwrap(), 100);
    }
}
