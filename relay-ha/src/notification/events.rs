//! Notification events.
//!
//! Defines the operator-facing events raised by the HA/DR components and
//! their priority levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority level for notifications.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    /// Informational only.
    Low,
    #[default]
    Normal,
    High,
    /// Requires immediate operator attention.
    Critical,
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Events that can trigger notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationEvent {
    // ========== Channel Events ==========
    /// A channel scored 0 and was taken out of rotation.
    ChannelFailed {
        channel_id: String,
        external_id: String,
        health_score: i64,
        errors: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    /// A channel scored below the healthy threshold.
    ChannelDegraded {
        channel_id: String,
        external_id: String,
        health_score: i64,
        timestamp: DateTime<Utc>,
    },
    /// Replicas on a failed channel were redirected.
    ChannelFailover {
        failed_channel_id: String,
        backup_channel_id: Option<String>,
        files_affected: i64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // ========== Credential Events ==========
    /// A backup credential was promoted.
    CredentialFailover {
        failed_identity: String,
        new_identity: String,
        timestamp: DateTime<Utc>,
    },
    /// Every backup credential failed its live check.
    CredentialsExhausted {
        failed_identity: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A credential lacks capabilities on a configured channel.
    PermissionIssue {
        channel_id: String,
        identity: String,
        missing: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    // ========== System Events ==========
    SystemDegraded {
        components: Vec<String>,
        message: String,
        timestamp: DateTime<Utc>,
    },
    SystemCritical {
        components: Vec<String>,
        message: String,
        timestamp: DateTime<Utc>,
    },
    RecoverySucceeded {
        package_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    RecoveryFailed {
        package_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    SystemStartup {
        version: String,
        timestamp: DateTime<Utc>,
    },
    SystemShutdown {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl NotificationEvent {
    /// Get the priority of this event.
    pub fn priority(&self) -> NotificationPriority {
        match self {
            Self::ChannelFailed { .. } => NotificationPriority::Critical,
            Self::ChannelDegraded { .. } => NotificationPriority::Normal,
            Self::ChannelFailover {
                backup_channel_id, ..
            } => {
                if backup_channel_id.is_some() {
                    NotificationPriority::High
                } else {
                    NotificationPriority::Critical
                }
            }

            Self::CredentialFailover { .. } => NotificationPriority::High,
            Self::CredentialsExhausted { .. } => NotificationPriority::Critical,
            Self::PermissionIssue { .. } => NotificationPriority::High,

            Self::SystemDegraded { .. } => NotificationPriority::Normal,
            Self::SystemCritical { .. } => NotificationPriority::Critical,
            Self::RecoverySucceeded { .. } => NotificationPriority::High,
            Self::RecoveryFailed { .. } => NotificationPriority::Critical,
            Self::SystemStartup { .. } => NotificationPriority::Low,
            Self::SystemShutdown { .. } => NotificationPriority::Normal,
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ChannelFailed { .. } => "channel_failure",
            Self::ChannelDegraded { .. } => "channel_degraded",
            Self::ChannelFailover { .. } => "channel_failover",
            Self::CredentialFailover { .. } => "failover_success",
            Self::CredentialsExhausted { .. } => "critical_failure",
            Self::PermissionIssue { .. } => "permission_issue",
            Self::SystemDegraded { .. } => "system_degraded",
            Self::SystemCritical { .. } => "system_critical",
            Self::RecoverySucceeded { .. } => "recovery_success",
            Self::RecoveryFailed { .. } => "recovery_failure",
            Self::SystemStartup { .. } => "system_startup",
            Self::SystemShutdown { .. } => "system_shutdown",
        }
    }

    /// Get a human-readable title for this event.
    pub fn title(&self) -> String {
        match self {
            Self::ChannelFailed { external_id, .. } => format!("Channel {external_id} failed"),
            Self::ChannelDegraded { external_id, .. } => {
                format!("Channel {external_id} degraded")
            }
            Self::ChannelFailover {
                failed_channel_id, ..
            } => format!("Failover from channel {failed_channel_id}"),
            Self::CredentialFailover { .. } => "Credential failover succeeded".to_string(),
            Self::CredentialsExhausted { .. } => "No backup credential available".to_string(),
            Self::PermissionIssue { channel_id, .. } => {
                format!("Missing permissions on {channel_id}")
            }
            Self::SystemDegraded { .. } => "System degraded".to_string(),
            Self::SystemCritical { .. } => "System critical".to_string(),
            Self::RecoverySucceeded { package_id, .. } => format!("Recovery from {package_id} succeeded"),
            Self::RecoveryFailed { package_id, .. } => format!("Recovery from {package_id} failed"),
            Self::SystemStartup { version, .. } => format!("relay-ha v{version} started"),
            Self::SystemShutdown { .. } => "relay-ha stopping".to_string(),
        }
    }

    /// Get a detailed description of this event.
    pub fn description(&self) -> String {
        match self {
            Self::ChannelFailed {
                health_score,
                errors,
                ..
            } => {
                if errors.is_empty() {
                    format!("Health score {health_score}.")
                } else {
                    format!("Health score {health_score}. Errors: {}", errors.join("; "))
                }
            }
            Self::ChannelDegraded { health_score, .. } => {
                format!("Health score dropped to {health_score}.")
            }
            Self::ChannelFailover {
                backup_channel_id,
                files_affected,
                reason,
                ..
            } => match backup_channel_id {
                Some(backup) => {
                    format!("{files_affected} item(s) redirected to {backup}. Reason: {reason}")
                }
                None => format!(
                    "{files_affected} item(s) affected and no backup channel is available. Reason: {reason}"
                ),
            },
            Self::CredentialFailover {
                failed_identity,
                new_identity,
                ..
            } => format!("Switched from {failed_identity} to {new_identity}."),
            Self::CredentialsExhausted {
                failed_identity,
                reason,
                ..
            } => format!(
                "Credential {failed_identity} failed and every backup failed its live check: {reason}. Manual intervention required."
            ),
            Self::PermissionIssue {
                identity, missing, ..
            } => format!("{identity} is missing: {}", missing.join(", ")),
            Self::SystemDegraded {
                components,
                message,
                ..
            }
            | Self::SystemCritical {
                components,
                message,
                ..
            } => format!("{message} Components: {}", components.join(", ")),
            Self::RecoverySucceeded { duration_ms, .. } => {
                format!("Recovery completed in {duration_ms} ms.")
            }
            Self::RecoveryFailed { reason, .. } => reason.clone(),
            Self::SystemStartup { .. } => "Monitoring started.".to_string(),
            Self::SystemShutdown { reason, .. } => reason.clone(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ChannelFailed { timestamp, .. }
            | Self::ChannelDegraded { timestamp, .. }
            | Self::ChannelFailover { timestamp, .. }
            | Self::CredentialFailover { timestamp, .. }
            | Self::CredentialsExhausted { timestamp, .. }
            | Self::PermissionIssue { timestamp, .. }
            | Self::SystemDegraded { timestamp, .. }
            | Self::SystemCritical { timestamp, .. }
            | Self::RecoverySucceeded { timestamp, .. }
            | Self::RecoveryFailed { timestamp, .. }
            | Self::SystemStartup { timestamp, .. }
            | Self::SystemShutdown { timestamp, .. } => *timestamp,
        }
    }

    /// Flatten into the payload handed to sinks.
    pub fn to_payload(&self) -> NotificationPayload {
        NotificationPayload {
            event_type: self.event_type().to_string(),
            title: self.title(),
            message: self.description(),
            severity: self.priority(),
            timestamp: self.timestamp(),
        }
    }
}

/// Structured alert as seen by operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub title: String,
    pub message: String,
    pub severity: NotificationPriority,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(NotificationPriority::Critical > NotificationPriority::High);
        assert!(NotificationPriority::High > NotificationPriority::Normal);
        assert!(NotificationPriority::Normal > NotificationPriority::Low);
    }

    #[test]
    fn test_failover_priority_depends_on_backup() {
        let with_backup = NotificationEvent::ChannelFailover {
            failed_channel_id: "a".into(),
            backup_channel_id: Some("b".into()),
            files_affected: 3,
            reason: "probe".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(with_backup.priority(), NotificationPriority::High);

        let without = NotificationEvent::ChannelFailover {
            failed_channel_id: "a".into(),
            backup_channel_id: None,
            files_affected: 3,
            reason: "probe".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(without.priority(), NotificationPriority::Critical);
        assert!(without.description().contains("no backup"));
    }

    #[test]
    fn test_payload_shape() {
        let event = NotificationEvent::CredentialsExhausted {
            failed_identity: "relay_bot".into(),
            reason: "all backups failed".into(),
            timestamp: Utc::now(),
        };
        let payload = event.to_payload();
        assert_eq!(payload.event_type, "critical_failure");
        assert_eq!(payload.severity, NotificationPriority::Critical);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "critical_failure");
        assert_eq!(json["severity"], "critical");
    }
}
