//! Credential management.
//!
//! - [`CredentialSpec`]: one access identity
//! - [`ManagedCredential`]: a credential with its runtime health
//! - [`CredentialManager`]: the active/backup pool, health checks and failover

mod manager;
mod types;

pub use manager::{CredentialManager, POOL_STATUS_COMPONENT, POOL_STATUS_KEY};
pub use types::{
    CredentialCheck, CredentialFailover, CredentialPoolStatus, CredentialSpec, CredentialStatus,
    CredentialSummary, ManagedCredential,
};
