//! Core credential types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::Identity;
use crate::database::models::CredentialDbModel;

/// One access identity for the service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSpec {
    pub id: String,
    pub label: Option<String>,
    /// Opaque secret (bot token).
    #[serde(skip_serializing)]
    pub secret: String,
    pub app_id: i64,
    #[serde(skip_serializing)]
    pub app_hash: String,
}

impl CredentialSpec {
    pub fn new(
        id: impl Into<String>,
        secret: impl Into<String>,
        app_id: i64,
        app_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: None,
            secret: secret.into(),
            app_id,
            app_hash: app_hash.into(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Short, non-secret name for logs.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) => format!("{label} ({})", crate::recovery::mask_value(&self.secret)),
            None => crate::recovery::mask_value(&self.secret),
        }
    }
}

impl std::fmt::Debug for CredentialSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSpec")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("secret", &crate::recovery::mask_value(&self.secret))
            .field("app_id", &self.app_id)
            .finish()
    }
}

impl From<CredentialDbModel> for CredentialSpec {
    fn from(row: CredentialDbModel) -> Self {
        Self {
            id: row.id,
            label: row.label,
            secret: row.secret,
            app_id: row.app_id,
            app_hash: row.app_hash,
        }
    }
}

/// Credential health state.
///
/// `unknown -> healthy <-> degraded -> failed`; a successful check brings a
/// failed credential back to healthy or degraded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Failed,
}

/// Outcome of one live check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CredentialCheck {
    Passed {
        identity: Identity,
        response_time_ms: u64,
        /// Share of sampled channels that could be described, 0.0..=1.0.
        channel_access_ratio: f64,
    },
    Failed {
        error: String,
    },
}

impl CredentialCheck {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

/// A credential together with its runtime health.
#[derive(Debug, Clone, Serialize)]
pub struct ManagedCredential {
    pub spec: CredentialSpec,
    pub status: CredentialStatus,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
    pub identity: Option<Identity>,
    pub response_time_ms: Option<u64>,
    pub channel_access_ratio: Option<f64>,
}

impl ManagedCredential {
    pub fn new(spec: CredentialSpec) -> Self {
        Self {
            spec,
            status: CredentialStatus::Unknown,
            consecutive_errors: 0,
            last_error: None,
            last_check: None,
            identity: None,
            response_time_ms: None,
            channel_access_ratio: None,
        }
    }

    /// Fold a check result into the runtime state.
    pub fn apply(&mut self, check: &CredentialCheck, healthy_ratio: f64) {
        self.last_check = Some(Utc::now());
        match check {
            CredentialCheck::Passed {
                identity,
                response_time_ms,
                channel_access_ratio,
            } => {
                self.consecutive_errors = 0;
                self.last_error = None;
                self.identity = Some(identity.clone());
                self.response_time_ms = Some(*response_time_ms);
                self.channel_access_ratio = Some(*channel_access_ratio);
                self.status = if *channel_access_ratio >= healthy_ratio {
                    CredentialStatus::Healthy
                } else {
                    CredentialStatus::Degraded
                };
            }
            CredentialCheck::Failed { error } => {
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                self.last_error = Some(error.clone());
                self.status = CredentialStatus::Failed;
            }
        }
    }

    /// Identity label if known, masked secret otherwise.
    pub fn name(&self) -> String {
        self.identity
            .as_ref()
            .map(Identity::label)
            .unwrap_or_else(|| self.spec.display_name())
    }

    pub fn is_usable(&self) -> bool {
        matches!(
            self.status,
            CredentialStatus::Healthy | CredentialStatus::Degraded
        )
    }
}

/// Non-secret view of one credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialSummary {
    pub id: String,
    pub name: String,
    pub status: CredentialStatus,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub response_time_ms: Option<u64>,
    pub channel_access_ratio: Option<f64>,
}

impl From<&ManagedCredential> for CredentialSummary {
    fn from(c: &ManagedCredential) -> Self {
        Self {
            id: c.spec.id.clone(),
            name: c.name(),
            status: c.status,
            consecutive_errors: c.consecutive_errors,
            last_error: c.last_error.clone(),
            response_time_ms: c.response_time_ms,
            channel_access_ratio: c.channel_access_ratio,
        }
    }
}

/// Pool status as published to the cache and `system_status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialPoolStatus {
    pub active: Option<CredentialSummary>,
    pub backups: Vec<CredentialSummary>,
    pub backup_count: usize,
    pub healthy_backups: usize,
    pub monitoring: bool,
    pub timestamp: DateTime<Utc>,
}

/// Result of a failover attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CredentialFailover {
    /// A backup passed its live check and is now active.
    Promoted { from: String, to: String },
    /// Every backup failed its live check; the failed credential stays active.
    Exhausted { failed: String, reason: String },
    /// The active credential has not reached the error threshold.
    NotNeeded { consecutive_errors: u32, threshold: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            id: 1,
            username: Some("relay".into()),
            display_name: "Relay".into(),
        }
    }

    #[test]
    fn test_apply_success_resets_errors() {
        let mut c = ManagedCredential::new(CredentialSpec::new("a", "123456789:secret", 1, "h"));
        c.apply(
            &CredentialCheck::Failed {
                error: "timeout".into(),
            },
            0.8,
        );
        c.apply(
            &CredentialCheck::Failed {
                error: "timeout".into(),
            },
            0.8,
        );
        assert_eq!(c.consecutive_errors, 2);
        assert_eq!(c.status, CredentialStatus::Failed);

        c.apply(
            &CredentialCheck::Passed {
                identity: identity(),
                response_time_ms: 120,
                channel_access_ratio: 0.5,
            },
            0.8,
        );
        assert_eq!(c.consecutive_errors, 0);
        assert_eq!(c.status, CredentialStatus::Degraded);
        assert_eq!(c.name(), "@relay");
    }

    #[test]
    fn test_debug_masks_secret() {
        let spec = CredentialSpec::new("a", "123456789:ABCDEFGHIJKLMNOP", 1, "h");
        let rendered = format!("{spec:?}");
        assert!(!rendered.contains("ABCDEFGHIJKLMNOP"));
        assert!(rendered.contains("1234"));
    }
}
