//! Delivery channels.
//!
//! - `registry`: durable channel descriptors
//! - `scoring`: probe outcomes to health scores
//! - `health_monitor`: periodic probing
//! - `storage`: replicated content storage and channel failover
//! - `provider`: the messaging platform seam
//! - `loopback`: in-process provider for the standalone binary

pub mod health_monitor;
pub mod loopback;
pub mod provider;
pub mod registry;
pub mod scoring;
pub mod storage;

pub use health_monitor::{ChannelCheck, ChannelHealthMonitor, MONITORING_STATS_KEY, SweepReport};
pub use loopback::LoopbackConnector;
pub use provider::{
    Capability, ChannelInfo, ChannelProvider, ContentItem, FixedProvider, Identity, Membership,
    MessageRef, ProviderConnector, ProviderSource, bounded,
};
pub use registry::{ChannelDescriptor, ChannelRegistry, NewChannel};
pub use scoring::{HealthClass, ProbeOutcome, ProbeReport, ScoringPolicy};
pub use storage::{
    ChannelStats, FailoverOutcome, ReplicationFailure, ReplicationOutcome, StorageManager,
    VerificationOutcome, content_checksum,
};
