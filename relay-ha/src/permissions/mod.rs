//! Channel permission verification.

mod manager;
mod types;

pub use manager::{PERMISSION_SYNC_KEY, PermissionManager};
pub use types::{
    CapabilityTest, ChannelPermissionResult, ChannelRole, ChannelVerification, ConfiguredChannel,
    CredentialPermissionReport, PermissionStatus, PermissionSyncReport, TokenSyncResult,
};
