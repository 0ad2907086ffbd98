//! Retry helpers for database writes.

use rand::random;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

/// Backoff policy for SQLite lock contention.
#[derive(Debug, Clone, Copy)]
pub struct BusyRetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BusyRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl BusyRetryPolicy {
    /// Delay before retry number `attempt` (zero based), with up to 25% jitter.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let shift = attempt.min(32) as u32;
        let capped_ms = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let jitter_ms = random::<u64>() % (capped_ms / 4 + 1);
        Duration::from_millis((capped_ms + jitter_ms).min(max_ms))
    }
}

pub(crate) fn is_sqlite_busy_error(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    let sqlx::Error::Database(db_err) = sqlx_err else {
        let msg = sqlx_err.to_string().to_ascii_lowercase();
        return msg.contains("database is locked") || msg.contains("database is busy");
    };

    let code = db_err.code().map(Cow::into_owned);
    if matches!(code.as_deref(), Some("5") | Some("6")) {
        return true;
    }

    let msg = db_err.message().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

/// Run `op`, retrying with the default policy while SQLite reports a lock.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_policy(op_name, BusyRetryPolicy::default(), op).await
}

pub async fn retry_with_policy<T, F, Fut>(
    op_name: &'static str,
    policy: BusyRetryPolicy,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_sqlite_busy_error(&err) || attempt >= policy.max_retries {
                    return Err(err);
                }

                let delay = policy.delay_for(attempt);
                debug!(
                    "SQLite busy during {}, retrying in {:?} (attempt {}/{})",
                    op_name,
                    delay,
                    attempt + 1,
                    policy.max_retries
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
