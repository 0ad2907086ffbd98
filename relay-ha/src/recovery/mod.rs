//! Disaster recovery.
//!
//! Recovery packages snapshot configuration and state into one checksummed
//! JSON document that can later be replayed to redeploy the service.

mod manager;
mod mask;
mod package;
mod scripts;

pub use manager::{RecoveryManager, RecoveryReport, RecoveryStep, SavedPackage};
pub use mask::{is_masked, is_sensitive_name, mask_value};
pub use package::{
    CacheSnapshot, ChannelPermissionSnapshot, ConfigFileSnapshot, CredentialSnapshot,
    DatabaseSnapshot, EnvironmentSnapshot, RecoveryPackage, SystemConfigSnapshot,
    package_file_name, package_id_for,
};
pub use scripts::DeploymentScripts;
