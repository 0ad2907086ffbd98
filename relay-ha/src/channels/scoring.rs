//! Channel health scoring.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Passed,
    Failed(String),
    /// The probe was skipped.
    NotRun,
}

impl ProbeOutcome {
    pub fn from_result<T, E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Passed,
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcomes of one probe run against one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub accessibility: ProbeOutcome,
    pub send: ProbeOutcome,
    pub permissions: ProbeOutcome,
    pub response_time: Option<Duration>,
}

impl ProbeReport {
    /// Report for a channel that could not be described.
    pub fn inaccessible(error: impl Into<String>, response_time: Option<Duration>) -> Self {
        Self {
            accessibility: ProbeOutcome::Failed(error.into()),
            send: ProbeOutcome::NotRun,
            permissions: ProbeOutcome::NotRun,
            response_time,
        }
    }

    pub fn errors(&self) -> Vec<String> {
        [
            ("accessibility", &self.accessibility),
            ("send", &self.send),
            ("permissions", &self.permissions),
        ]
        .into_iter()
        .filter_map(|(name, outcome)| outcome.error().map(|e| format!("{name}: {e}")))
        .collect()
    }
}

/// Health classification derived from a score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HealthClass {
    Healthy,
    Degraded,
    Failed,
}

/// Weights and thresholds turning probe outcomes into a 0..=100 score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    /// Scores at or above this are healthy.
    pub healthy_threshold: i64,
    pub very_slow: Duration,
    pub accessibility_penalty: i64,
    pub send_penalty: i64,
    pub permission_penalty: i64,
    pub very_slow_penalty: i64,
    /// Applied above half of `very_slow`.
    pub slow_penalty: i64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            healthy_threshold: 70,
            very_slow: Duration::from_millis(30_000),
            accessibility_penalty: 50,
            send_penalty: 30,
            permission_penalty: 20,
            very_slow_penalty: 30,
            slow_penalty: 15,
        }
    }
}

impl ScoringPolicy {
    /// Score a probe report.
    ///
    /// Probes that did not run are neutral, except after an accessibility
    /// failure: those count as failed, so an unreachable channel scores 0.
    pub fn score(&self, report: &ProbeReport) -> i64 {
        let inaccessible = report.accessibility.is_failed();
        let counts_as_failed =
            |outcome: &ProbeOutcome| outcome.is_failed() || (inaccessible && *outcome == ProbeOutcome::NotRun);

        let mut score = 100;
        if inaccessible {
            score -= self.accessibility_penalty;
        }
        if counts_as_failed(&report.send) {
            score -= self.send_penalty;
        }
        if counts_as_failed(&report.permissions) {
            score -= self.permission_penalty;
        }
        if let Some(elapsed) = report.response_time {
            if elapsed > self.very_slow {
                score -= self.very_slow_penalty;
            } else if elapsed > self.very_slow / 2 {
                score -= self.slow_penalty;
            }
        }
        score.clamp(0, 100)
    }

    pub fn classify(&self, score: i64) -> HealthClass {
        if score >= self.healthy_threshold {
            HealthClass::Healthy
        } else if score > 0 {
            HealthClass::Degraded
        } else {
            HealthClass::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn report(
        accessibility: ProbeOutcome,
        send: ProbeOutcome,
        permissions: ProbeOutcome,
        ms: Option<u64>,
    ) -> ProbeReport {
        ProbeReport {
            accessibility,
            send,
            permissions,
            response_time: ms.map(Duration::from_millis),
        }
    }

    fn failed() -> ProbeOutcome {
        ProbeOutcome::Failed("x".into())
    }

    #[rstest]
    #[case(report(ProbeOutcome::Passed, ProbeOutcome::Passed, ProbeOutcome::Passed, Some(200)), 100)]
    #[case(report(ProbeOutcome::Passed, failed(), ProbeOutcome::Passed, None), 70)]
    #[case(report(ProbeOutcome::Passed, ProbeOutcome::Passed, failed(), None), 80)]
    #[case(report(ProbeOutcome::Passed, failed(), failed(), None), 50)]
    #[case(report(ProbeOutcome::Passed, ProbeOutcome::Passed, ProbeOutcome::Passed, Some(20_000)), 85)]
    #[case(report(ProbeOutcome::Passed, ProbeOutcome::Passed, ProbeOutcome::Passed, Some(31_000)), 70)]
    #[case(report(ProbeOutcome::Passed, ProbeOutcome::NotRun, ProbeOutcome::NotRun, None), 100)]
    #[case(report(failed(), ProbeOutcome::NotRun, ProbeOutcome::NotRun, None), 0)]
    #[case(report(failed(), ProbeOutcome::NotRun, ProbeOutcome::NotRun, Some(40_000)), 0)]
    fn test_score(#[case] report: ProbeReport, #[case] expected: i64) {
        assert_eq!(ScoringPolicy::default().score(&report), expected);
    }

    #[rstest]
    #[case(100, HealthClass::Healthy)]
    #[case(70, HealthClass::Healthy)]
    #[case(69, HealthClass::Degraded)]
    #[case(1, HealthClass::Degraded)]
    #[case(0, HealthClass::Failed)]
    fn test_classify(#[case] score: i64, #[case] expected: HealthClass) {
        assert_eq!(ScoringPolicy::default().classify(score), expected);
    }

    #[test]
    fn test_score_is_always_in_range() {
        let harsh = ScoringPolicy {
            accessibility_penalty: 90,
            send_penalty: 90,
            ..Default::default()
        };
        let r = report(failed(), failed(), failed(), Some(60_000));
        assert_eq!(harsh.score(&r), 0);
    }

    #[test]
    fn test_report_errors() {
        let r = ProbeReport::inaccessible("chat not found", None);
        assert_eq!(r.errors(), vec!["accessibility: chat not found".to_string()]);
    }
}
