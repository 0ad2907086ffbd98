//! Recovery package document.
//!
//! A package is a single JSON document. Its checksum is the hex SHA-256 of
//! the canonical (sorted keys, compact) serialization of every other field.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::scripts::DeploymentScripts;
use crate::permissions::ConfiguredChannel;
use crate::{Error, Result};

/// Configuration values, sensitive ones masked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub variables: BTreeMap<String, String>,
    pub backup_time: DateTime<Utc>,
}

/// Datastore layout plus the rows needed to rebuild routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    /// Masked connection string.
    pub database_url: String,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub critical_data: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub backup_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPermissionSnapshot {
    #[serde(default)]
    pub configured_channels: Vec<ConfiguredChannel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub backup_time: DateTime<Utc>,
}

/// Credential pool shape. Secrets never leave the process unmasked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSnapshot {
    pub primary_configured: bool,
    pub api_credentials_configured: bool,
    pub active: Option<String>,
    pub masked_secrets: Vec<String>,
    pub backup_count: usize,
    pub healthy_backups: usize,
    pub backup_time: DateTime<Utc>,
}

/// Subset of cache keys matching the critical patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    #[serde(default)]
    pub critical_keys: BTreeMap<String, String>,
    /// Remaining lifetime of each key at snapshot time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_ttls_secs: BTreeMap<String, u64>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub backup_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFileSnapshot {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfigSnapshot {
    #[serde(default)]
    pub files: Vec<ConfigFileSnapshot>,
    pub backup_time: DateTime<Utc>,
}

/// Checksummed point-in-time snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPackage {
    pub timestamp: DateTime<Utc>,
    pub package_id: String,
    pub environment_variables: EnvironmentSnapshot,
    pub database_config: DatabaseSnapshot,
    pub channel_permissions: ChannelPermissionSnapshot,
    pub bot_tokens: CredentialSnapshot,
    pub redis_state: CacheSnapshot,
    pub deployment_scripts: DeploymentScripts,
    pub system_configuration: SystemConfigSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// `recovery_%Y%m%d_%H%M%S` in UTC.
pub fn package_id_for(at: DateTime<Utc>) -> String {
    format!("recovery_{}", at.format("%Y%m%d_%H%M%S"))
}

pub fn package_file_name(package_id: &str) -> String {
    format!("recovery_package_{package_id}.json")
}

impl RecoveryPackage {
    /// Hash over every field except the checksum.
    pub fn compute_checksum(&self) -> Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("checksum");
        }
        let canonical = serde_json::to_string(&canonicalize(value))?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Recompute and store the checksum.
    pub fn seal(&mut self) -> Result<()> {
        self.checksum = Some(self.compute_checksum()?);
        Ok(())
    }

    /// Fail unless the stored checksum matches a fresh recomputation.
    /// A package without a checksum is rejected.
    pub fn verify(&self) -> Result<()> {
        let stored = self
            .checksum
            .as_deref()
            .ok_or_else(|| Error::integrity(format!("package {} has no checksum", self.package_id)))?;
        let computed = self.compute_checksum()?;
        if stored != computed {
            return Err(Error::integrity(format!(
                "checksum mismatch for package {}",
                self.package_id
            )));
        }
        Ok(())
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json(&raw)
    }

    /// Write `recovery_package_{id}.json` into every location.
    /// Fails only when no location could be written.
    pub async fn save_to(&self, locations: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let body = self.to_pretty_json()?;
        let file_name = package_file_name(&self.package_id);
        let mut written = Vec::new();
        for location in locations {
            let path = location.join(&file_name);
            let result = async {
                tokio::fs::create_dir_all(location).await?;
                tokio::fs::write(&path, &body).await
            }
            .await;
            match result {
                Ok(()) => {
                    debug!(path = %path.display(), "Recovery package written");
                    written.push(path);
                }
                Err(e) => warn!(location = %location.display(), error = %e, "Failed to write recovery package"),
            }
        }
        if written.is_empty() {
            return Err(Error::Other(format!(
                "recovery package {} could not be written to any location",
                self.package_id
            )));
        }
        Ok(written)
    }
}

/// Rebuild every object with sorted keys.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_package() -> RecoveryPackage {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 5).unwrap();
        RecoveryPackage {
            timestamp: at,
            package_id: package_id_for(at),
            environment_variables: EnvironmentSnapshot {
                variables: [
                    ("BOT_TOKEN".to_string(), "1234*****wxyz".to_string()),
                    ("LOG_CHANNEL".to_string(), "-100123".to_string()),
                ]
                .into_iter()
                .collect(),
                backup_time: at,
            },
            database_config: DatabaseSnapshot {
                database_url: "sqli********y.db".into(),
                tables: vec!["channels".into()],
                critical_data: BTreeMap::new(),
                error: None,
                backup_time: at,
            },
            channel_permissions: ChannelPermissionSnapshot {
                configured_channels: Vec::new(),
                error: None,
                backup_time: at,
            },
            bot_tokens: CredentialSnapshot {
                primary_configured: true,
                api_credentials_configured: true,
                active: Some("@relay".into()),
                masked_secrets: vec!["1234*****wxyz".into()],
                backup_count: 0,
                healthy_backups: 0,
                backup_time: at,
            },
            redis_state: CacheSnapshot {
                critical_keys: [("system_health".to_string(), "{}".to_string())]
                    .into_iter()
                    .collect(),
                key_ttls_secs: BTreeMap::new(),
                truncated: false,
                error: None,
                backup_time: at,
            },
            deployment_scripts: DeploymentScripts::generate(Path::new(".env.recovery")),
            system_configuration: SystemConfigSnapshot {
                files: Vec::new(),
                backup_time: at,
            },
            checksum: None,
        }
    }

    #[test]
    fn test_package_id_format() {
        let package = sample_package();
        assert_eq!(package.package_id, "recovery_20250601_123005");
        assert_eq!(
            package_file_name(&package.package_id),
            "recovery_package_recovery_20250601_123005.json"
        );
    }

    #[test]
    fn test_seal_then_verify() {
        let mut package = sample_package();
        package.seal().unwrap();
        assert!(package.verify().is_ok());
        assert_eq!(package.compute_checksum().unwrap(), package.checksum.clone().unwrap());
    }

    #[test]
    fn test_tampering_is_detected() {
        let mut package = sample_package();
        package.seal().unwrap();
        package
            .redis_state
            .critical_keys
            .insert("bot_tokens_status".into(), "forged".into());
        assert!(matches!(package.verify(), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_missing_checksum_rejected() {
        let package = sample_package();
        assert!(matches!(package.verify(), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_checksum_survives_json() {
        let mut package = sample_package();
        package.seal().unwrap();
        let parsed = RecoveryPackage::from_json(&package.to_pretty_json().unwrap()).unwrap();
        assert!(parsed.verify().is_ok());
    }

    #[tokio::test]
    async fn test_save_to_skips_unwritable_location() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();

        let mut package = sample_package();
        package.seal().unwrap();
        let written = package
            .save_to(&[blocker.join("nested"), dir.path().join("ok")])
            .await
            .unwrap();
        assert_eq!(written.len(), 1);
        let loaded = RecoveryPackage::load(&written[0]).await.unwrap();
        assert_eq!(loaded, package);

        let err = package.save_to(&[blocker.join("nested")]).await;
        assert!(err.is_err());
    }
}
