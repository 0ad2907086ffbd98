//! Channel database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Delivery channel database model.
/// One row per external channel; rows are never deleted, only transitioned.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChannelDbModel {
    pub id: String,
    /// Provider-side identifier (numeric id or `@handle`).
    pub external_id: String,
    pub display_name: Option<String>,
    /// primary, backup or archive
    pub channel_class: String,
    /// active, degraded, failed or maintenance
    pub status: String,
    /// Lower number = preferred.
    pub priority: i64,
    /// 0..=100
    pub health_score: i64,
    pub response_time_ms: Option<i64>,
    /// Rolling success rate in percent.
    pub success_rate: f64,
    pub capacity_limit: Option<i64>,
    pub used_slots: i64,
    /// Unix epoch milliseconds (UTC) of the last probe.
    pub last_health_check: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChannelDbModel {
    pub fn new(external_id: impl Into<String>, class: ChannelClass, priority: i64) -> Self {
        let now = crate::database::time::now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            external_id: external_id.into(),
            display_name: None,
            channel_class: class.as_str().to_string(),
            status: ChannelStatus::Active.as_str().to_string(),
            priority,
            health_score: 100,
            response_time_ms: None,
            success_rate: 100.0,
            capacity_limit: None,
            used_slots: 0,
            last_health_check: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Channel class.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChannelClass {
    Primary,
    Backup,
    Archive,
}

impl ChannelClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
            Self::Archive => "archive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(Self::Primary),
            "backup" => Some(Self::Backup),
            "archive" => Some(Self::Archive),
            _ => None,
        }
    }
}

/// Channel operational status.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Serving reads and writes.
    Active,
    /// Still probed, no longer selected for new replicas.
    Degraded,
    /// Out of rotation until an operator or a later probe restores it.
    Failed,
    /// Taken out by an operator; not probed.
    Maintenance,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "degraded" => Some(Self::Degraded),
            "failed" => Some(Self::Failed),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }

    /// Whether the health monitor sweeps channels in this status.
    pub fn is_monitored(&self) -> bool {
        matches!(self, Self::Active | Self::Degraded)
    }

    pub fn can_transition_to(&self, target: ChannelStatus) -> bool {
        use ChannelStatus::*;
        match (self, target) {
            (a, b) if *a == b => true,
            // Probes move channels between the three runtime states.
            (Active | Degraded, Active | Degraded | Failed) => true,
            // A failed channel only comes back through an explicit reactivation.
            (Failed, Active) => true,
            (_, Maintenance) => true,
            (Maintenance, Active) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_new() {
        let channel = ChannelDbModel::new("-1001234", ChannelClass::Backup, 2);
        assert_eq!(channel.channel_class, "backup");
        assert_eq!(channel.status, "active");
        assert_eq!(channel.health_score, 100);
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ChannelStatus::Active,
            ChannelStatus::Degraded,
            ChannelStatus::Failed,
            ChannelStatus::Maintenance,
        ] {
            assert_eq!(ChannelStatus::parse(status.as_str()), Some(status));
            assert_eq!(status.to_string(), status.as_str());
        }
    }

    #[test]
    fn test_status_transitions() {
        assert!(ChannelStatus::Active.can_transition_to(ChannelStatus::Failed));
        assert!(ChannelStatus::Degraded.can_transition_to(ChannelStatus::Active));
        assert!(!ChannelStatus::Failed.can_transition_to(ChannelStatus::Degraded));
        assert!(!ChannelStatus::Maintenance.can_transition_to(ChannelStatus::Failed));
    }
}
