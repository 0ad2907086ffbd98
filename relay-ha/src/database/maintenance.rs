//! Database maintenance operations.
//!
//! Retention cleanup for the history tables:
//! - System health history
//! - Channel health logs
//! - Permission test results
//! - Failover events
//! - Expired recovery package index rows

use crate::database::DbPool;
use crate::database::time::{days_ago_ms, now_ms};
use serde::Serialize;
use std::time::Instant;

/// Retention windows, in days.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub health_history_retention_days: u64,
    pub permission_results_retention_days: u64,
    pub failover_events_retention_days: u64,
    pub channel_logs_retention_days: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            health_history_retention_days: 7,
            permission_results_retention_days: 3,
            failover_events_retention_days: 30,
            channel_logs_retention_days: 7,
        }
    }
}

/// Rows removed per table by one cleanup pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub system_health_history: u64,
    pub channel_health_logs: u64,
    pub permission_test_results: u64,
    pub failover_events: u64,
    pub recovery_packages: u64,
    pub duration_ms: u64,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.system_health_history
            + self.channel_health_logs
            + self.permission_test_results
            + self.failover_events
            + self.recovery_packages
    }
}

/// Database maintenance scheduler.
///
/// Scheduling itself is owned by the service loop; this type only knows
/// what to delete.
pub struct MaintenanceScheduler {
    pool: DbPool,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(pool: DbPool, config: MaintenanceConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Run every retention task and report what was removed.
    pub async fn run_cleanup(&self) -> Result<CleanupReport, crate::Error> {
        let start = Instant::now();
        tracing::info!("Starting database cleanup");

        let mut report = CleanupReport {
            system_health_history: self
                .delete_before(
                    "DELETE FROM system_health_history WHERE check_time < ?",
                    self.config.health_history_retention_days,
                )
                .await?,
            permission_test_results: self
                .delete_before(
                    "DELETE FROM permission_test_results WHERE test_time < ?",
                    self.config.permission_results_retention_days,
                )
                .await?,
            failover_events: self
                .delete_before(
                    "DELETE FROM failover_events WHERE event_time < ?",
                    self.config.failover_events_retention_days,
                )
                .await?,
            channel_health_logs: self
                .delete_before(
                    "DELETE FROM channel_health_logs WHERE check_time < ?",
                    self.config.channel_logs_retention_days,
                )
                .await?,
            recovery_packages: self.cleanup_expired_packages().await?,
            duration_ms: 0,
        };
        report.duration_ms = start.elapsed().as_millis() as u64;

        if report.total() > 0 {
            tracing::info!(
                removed = report.total(),
                duration_ms = report.duration_ms,
                "Database cleanup completed"
            );
        } else {
            tracing::debug!("Database cleanup found nothing to remove");
        }
        Ok(report)
    }

    async fn delete_before(&self, sql: &str, retention_days: u64) -> Result<u64, crate::Error> {
        let result = sqlx::query(sql)
            .bind(days_ago_ms(retention_days))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Remove index rows of recovery packages past their expiry.
    pub async fn cleanup_expired_packages(&self) -> Result<u64, crate::Error> {
        let result = sqlx::query(
            "DELETE FROM recovery_packages WHERE expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_pool, run_migrations};

    #[test]
    fn test_default_config() {
        let config = MaintenanceConfig::default();
        assert_eq!(config.health_history_retention_days, 7);
        assert_eq!(config.permission_results_retention_days, 3);
        assert_eq!(config.failover_events_retention_days, 30);
        assert_eq!(config.channel_logs_retention_days, 7);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_rows() {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        for check_time in [days_ago_ms(10), now_ms()] {
            sqlx::query(
                "INSERT INTO system_health_history (overall_status, message, check_time) VALUES ('healthy', 'ok', ?)",
            )
            .bind(check_time)
            .execute(&pool)
            .await
            .unwrap();
        }
        sqlx::query(
            "INSERT INTO recovery_packages (package_id, checksum, locations, created_at, expires_at) VALUES ('old', 'x', '[]', 0, 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let scheduler = MaintenanceScheduler::new(pool.clone(), MaintenanceConfig::default());
        let report = scheduler.run_cleanup().await.unwrap();

        assert_eq!(report.system_health_history, 1);
        assert_eq!(report.recovery_packages, 1);
        assert_eq!(report.total(), 2);

        let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM system_health_history")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
