//! Health types.
//!
//! Component health with named metrics, and the aggregated system snapshot.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health status of a component or the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }

    /// Aggregation precedence: critical > degraded > healthy > unknown.
    fn rank(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Healthy => 1,
            Self::Degraded => 2,
            Self::Critical => 3,
        }
    }

    /// Worst status of the set; unknown when the set is empty.
    pub fn aggregate<I: IntoIterator<Item = HealthStatus>>(statuses: I) -> Self {
        statuses
            .into_iter()
            .max_by_key(HealthStatus::rank)
            .unwrap_or_default()
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitored components.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Credentials,
    Channels,
    Datastore,
    Cache,
    Resources,
}

/// One measured value with its evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub status: HealthStatus,
    pub warning: Option<f64>,
    pub critical: Option<f64>,
    pub unit: Option<String>,
}

impl Metric {
    /// Metric where larger values are worse (usage, latency).
    pub fn ceiling(name: impl Into<String>, value: f64, warning: f64, critical: f64) -> Self {
        let status = if value >= critical {
            HealthStatus::Critical
        } else if value >= warning {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self {
            name: name.into(),
            value,
            status,
            warning: Some(warning),
            critical: Some(critical),
            unit: None,
        }
    }

    /// Metric where smaller values are worse (ratios, availability).
    pub fn floor(name: impl Into<String>, value: f64, healthy_min: f64, degraded_min: f64) -> Self {
        let status = if value >= healthy_min {
            HealthStatus::Healthy
        } else if value >= degraded_min {
            HealthStatus::Degraded
        } else {
            HealthStatus::Critical
        };
        Self {
            name: name.into(),
            value,
            status,
            warning: Some(healthy_min),
            critical: Some(degraded_min),
            unit: None,
        }
    }

    /// Informational metric that does not affect the component status.
    pub fn info(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            status: HealthStatus::Unknown,
            warning: None,
            critical: None,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Health of a single component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: Component,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub metrics: Vec<Metric>,
    /// Consecutive ticks this component was critical.
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub last_check: DateTime<Utc>,
    pub check_duration_ms: Option<u64>,
}

impl ComponentHealth {
    fn with_status(component: Component, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            component,
            status,
            message,
            metrics: Vec::new(),
            consecutive_errors: 0,
            last_error: None,
            last_check: Utc::now(),
            check_duration_ms: None,
        }
    }

    pub fn healthy(component: Component) -> Self {
        Self::with_status(component, HealthStatus::Healthy, None)
    }

    pub fn degraded(component: Component, message: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Degraded, Some(message.into()))
    }

    pub fn critical(component: Component, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut health = Self::with_status(component, HealthStatus::Critical, Some(message.clone()));
        health.last_error = Some(message);
        health
    }

    pub fn unknown(component: Component, message: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Unknown, Some(message.into()))
    }

    /// Status derived from the metrics; informational metrics are ignored.
    pub fn from_metrics(component: Component, metrics: Vec<Metric>) -> Self {
        let status = HealthStatus::aggregate(metrics.iter().map(|m| m.status));
        let failing: Vec<String> = metrics
            .iter()
            .filter(|m| matches!(m.status, HealthStatus::Degraded | HealthStatus::Critical))
            .map(|m| format!("{} {} ({:.1})", m.name, m.status, m.value))
            .collect();
        let message = (!failing.is_empty()).then(|| failing.join(", "));
        let mut health = Self::with_status(component, status, message.clone());
        if status == HealthStatus::Critical {
            health.last_error = message;
        }
        health.metrics = metrics;
        health
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.check_duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

/// Aggregated health of every component at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthSnapshot {
    pub overall: HealthStatus,
    pub message: String,
    pub components: BTreeMap<Component, ComponentHealth>,
    pub critical_components: Vec<Component>,
    pub degraded_components: Vec<Component>,
    pub timestamp: DateTime<Utc>,
    pub check_duration_ms: u64,
}

impl SystemHealthSnapshot {
    pub fn from_components(components: Vec<ComponentHealth>, duration: Duration) -> Self {
        let overall = HealthStatus::aggregate(components.iter().map(|c| c.status));
        let components: BTreeMap<Component, ComponentHealth> =
            components.into_iter().map(|c| (c.component, c)).collect();
        let with_status = |status| -> Vec<Component> {
            components
                .values()
                .filter(|c| c.status == status)
                .map(|c| c.component)
                .collect()
        };
        let critical_components = with_status(HealthStatus::Critical);
        let degraded_components = with_status(HealthStatus::Degraded);

        let message = match overall {
            HealthStatus::Healthy => "All components healthy".to_string(),
            HealthStatus::Degraded => format!("Degraded: {}", join(&degraded_components)),
            HealthStatus::Critical => format!("Critical: {}", join(&critical_components)),
            HealthStatus::Unknown => "No component reported a status".to_string(),
        };

        Self {
            overall,
            message,
            components,
            critical_components,
            degraded_components,
            timestamp: Utc::now(),
            check_duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn component(&self, component: Component) -> Option<&ComponentHealth> {
        self.components.get(&component)
    }
}

fn join(components: &[Component]) -> String {
    components
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format bytes into human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(vec![], HealthStatus::Unknown)]
    #[case(vec![HealthStatus::Unknown, HealthStatus::Healthy], HealthStatus::Healthy)]
    #[case(vec![HealthStatus::Healthy, HealthStatus::Degraded], HealthStatus::Degraded)]
    #[case(vec![HealthStatus::Degraded, HealthStatus::Critical, HealthStatus::Healthy], HealthStatus::Critical)]
    fn test_aggregate(#[case] statuses: Vec<HealthStatus>, #[case] expected: HealthStatus) {
        assert_eq!(HealthStatus::aggregate(statuses), expected);
    }

    #[rstest]
    #[case(50.0, HealthStatus::Healthy)]
    #[case(80.0, HealthStatus::Degraded)]
    #[case(96.0, HealthStatus::Critical)]
    fn test_ceiling_metric(#[case] value: f64, #[case] expected: HealthStatus) {
        assert_eq!(Metric::ceiling("cpu", value, 80.0, 95.0).status, expected);
    }

    #[rstest]
    #[case(95.0, HealthStatus::Healthy)]
    #[case(75.0, HealthStatus::Degraded)]
    #[case(10.0, HealthStatus::Critical)]
    fn test_floor_metric(#[case] value: f64, #[case] expected: HealthStatus) {
        assert_eq!(Metric::floor("access", value, 90.0, 70.0).status, expected);
    }

    #[test]
    fn test_from_metrics_ignores_info() {
        let health = ComponentHealth::from_metrics(
            Component::Channels,
            vec![
                Metric::floor("accessible_pct", 95.0, 90.0, 70.0),
                Metric::info("average_score", 12.0),
            ],
        );
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.message.is_none());
    }

    #[test]
    fn test_snapshot_lists_problem_components() {
        let snapshot = SystemHealthSnapshot::from_components(
            vec![
                ComponentHealth::healthy(Component::Datastore),
                ComponentHealth::degraded(Component::Channels, "slow"),
                ComponentHealth::critical(Component::Credentials, "no active credential"),
            ],
            Duration::from_millis(5),
        );
        assert_eq!(snapshot.overall, HealthStatus::Critical);
        assert_eq!(snapshot.critical_components, vec![Component::Credentials]);
        assert_eq!(snapshot.degraded_components, vec![Component::Channels]);
        assert_eq!(snapshot.message, "Critical: credentials");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
