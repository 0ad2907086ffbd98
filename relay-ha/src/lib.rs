//! relay-ha: high-availability and disaster-recovery core for a
//! multi-channel content relay.
//!
//! - [`channels`]: channel registry, health monitoring and replicated storage
//! - [`credentials`]: active/backup credential pool with failover
//! - [`health`]: system-wide health aggregation and emergency handlers
//! - [`permissions`]: channel capability verification
//! - [`recovery`]: checksummed recovery packages and staged recovery
//! - [`services`]: the orchestrator tying everything together

pub mod cache;
pub mod channels;
pub mod config;
pub mod credentials;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod notification;
pub mod permissions;
pub mod recovery;
pub mod services;

pub use error::{Error, Result};
