//! Channel permission types.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::Capability;
use crate::database::models::ChannelConfigDbModel;

/// Why the service needs a channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Log,
    Content,
    Public,
    Support,
}

impl ChannelRole {
    pub fn required_capabilities(&self) -> Vec<Capability> {
        match self {
            Self::Log | Self::Support => {
                vec![Capability::SendMessages, Capability::DeleteMessages]
            }
            Self::Content => vec![
                Capability::SendMessages,
                Capability::DeleteMessages,
                Capability::ManageMessages,
            ],
            Self::Public => vec![Capability::SendMessages],
        }
    }
}

/// A channel the permission component verifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredChannel {
    pub channel_id: String,
    /// Role name; one of the built-in roles or a registered channel type.
    pub role: String,
    pub required: Vec<Capability>,
}

impl ConfiguredChannel {
    pub fn for_role(channel_id: impl Into<String>, role: ChannelRole) -> Self {
        Self {
            channel_id: channel_id.into(),
            role: role.to_string(),
            required: role.required_capabilities(),
        }
    }
}

impl From<&ChannelConfigDbModel> for ConfiguredChannel {
    fn from(row: &ChannelConfigDbModel) -> Self {
        let mut required: Vec<Capability> = row
            .permissions()
            .iter()
            .filter_map(|name| Capability::from_str(name).ok())
            .collect();
        if required.is_empty() {
            required = ChannelRole::from_str(&row.channel_type)
                .map(|role| role.required_capabilities())
                .unwrap_or_else(|_| vec![Capability::SendMessages]);
        }
        Self {
            channel_id: row.channel_id.clone(),
            role: row.channel_type.clone(),
            required,
        }
    }
}

/// Result of testing one capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityTest {
    pub success: bool,
    pub error: Option<String>,
}

impl CapabilityTest {
    pub fn passed() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Capability tests of one credential on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPermissionResult {
    pub channel_id: String,
    pub role: String,
    pub identity: String,
    pub tests: BTreeMap<Capability, CapabilityTest>,
    pub checked_at: DateTime<Utc>,
}

impl ChannelPermissionResult {
    pub fn verified(&self) -> bool {
        self.tests.values().all(|t| t.success)
    }

    pub fn missing(&self) -> Vec<Capability> {
        self.tests
            .iter()
            .filter(|(_, t)| !t.success)
            .map(|(c, _)| *c)
            .collect()
    }
}

/// Setup results of one credential across every configured channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialPermissionReport {
    pub credential_id: String,
    pub identity: String,
    pub channels: Vec<ChannelPermissionResult>,
    pub verified_channels: usize,
    pub failed_channels: usize,
}

impl CredentialPermissionReport {
    pub fn success(&self) -> bool {
        self.failed_channels == 0
    }
}

/// Per-credential line of a synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSyncResult {
    pub credential_id: String,
    pub identity: String,
    pub success: bool,
    pub verified_channels: usize,
    pub failed_channels: usize,
    pub error: Option<String>,
}

/// Result of synchronizing permissions across every credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSyncReport {
    pub total_tokens: usize,
    pub successful_tokens: usize,
    pub failed_tokens: usize,
    pub token_results: Vec<TokenSyncResult>,
    pub timestamp: DateTime<Utc>,
}

/// Last known verification of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelVerification {
    pub channel_id: String,
    pub role: String,
    pub verified: Option<bool>,
    pub identity: Option<String>,
    pub missing: Vec<Capability>,
    pub checked_at: Option<DateTime<Utc>>,
}

/// Verification status across every configured channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionStatus {
    pub total_channels: usize,
    pub verified_channels: usize,
    pub failed_channels: usize,
    pub channels: Vec<ChannelVerification>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_channel_from_row() {
        let row = ChannelConfigDbModel::new("-1001", "archive", &["send_messages", "bogus"]);
        let channel = ConfiguredChannel::from(&row);
        assert_eq!(channel.required, vec![Capability::SendMessages]);

        let row = ChannelConfigDbModel::new("-1002", "content", &[]);
        assert_eq!(ConfiguredChannel::from(&row).required.len(), 3);
    }

    #[test]
    fn test_result_missing() {
        let mut tests = BTreeMap::new();
        tests.insert(Capability::SendMessages, CapabilityTest::passed());
        tests.insert(Capability::DeleteMessages, CapabilityTest::failed("forbidden"));
        let result = ChannelPermissionResult {
            channel_id: "-1".into(),
            role: "log".into(),
            identity: "@relay".into(),
            tests,
            checked_at: Utc::now(),
        };
        assert!(!result.verified());
        assert_eq!(result.missing(), vec![Capability::DeleteMessages]);
    }
}
