//! Service layer.
//!
//! The disaster recovery service owns every component and its lifecycle.

pub mod container;

pub use container::{
    Availability, DisasterRecoveryService, HealthCheckReport, PerformanceMetrics, RecentEvents,
    ServiceDeps, SystemStatus,
};
