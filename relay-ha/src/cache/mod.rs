//! Ephemeral key-value cache.
//!
//! Fast status lookups and the short-lived admin notification queue live
//! here. Everything stored is disposable: losing the cache costs freshness,
//! never correctness.

mod memory;

pub use memory::MemoryCache;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;

/// Shape of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CacheValueKind {
    String,
    List,
}

/// Redis-like key-value cache.
///
/// List operations follow Redis semantics: `list_push` prepends, ranges are
/// inclusive and negative indices count from the tail.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// Increment an integer value, creating it at 0 first.
    async fn incr(&self, key: &str) -> Result<i64>;
    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Prepend to a list. Returns the new length.
    async fn list_push(&self, key: &str, value: &str) -> Result<usize>;
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;
    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<()>;
    /// Keys matching a glob pattern (`*` and `?`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
    async fn kind(&self, key: &str) -> Result<Option<CacheValueKind>>;
    /// Remaining time to live; `None` for missing or persistent keys.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
    async fn ping(&self) -> Result<()>;
    /// Drop expired entries eagerly. Returns how many were removed.
    ///
    /// Backends that expire keys on their own keep the default.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Read and decode a JSON value. Undecodable values read as absent.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn KeyValueCache,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = cache.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::debug!(key, error = %e, "Discarding undecodable cache value");
            Ok(None)
        }
    }
}

/// Encode a value as JSON and store it with a TTL.
pub async fn set_json_ex<T: Serialize + ?Sized>(
    cache: &dyn KeyValueCache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    cache.set_ex(key, &raw, ttl).await
}

/// Glob match supporting `*` (any run) and `?` (one character).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("system_health*", "system_health", true)]
    #[case("system_health*", "system_health_snapshot", true)]
    #[case("channel_health*", "channel_health:42", true)]
    #[case("bot_tokens_status", "bot_tokens_status", true)]
    #[case("bot_tokens_status", "bot_tokens_status_old", false)]
    #[case("channel_?:1", "channel_a:1", true)]
    #[case("*:alert", "channel:1:alert", true)]
    #[case("admin_*", "system_admin", false)]
    fn test_glob_match(#[case] pattern: &str, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(glob_match(pattern, text), expected);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let cache = MemoryCache::new();
        set_json_ex(&cache, "k", &vec![1, 2, 3], Duration::from_secs(60))
            .await
            .unwrap();
        let value: Option<Vec<i32>> = get_json(&cache, "k").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));

        cache.set("bad", "{").await.unwrap();
        let bad: Option<Vec<i32>> = get_json(&cache, "bad").await.unwrap();
        assert!(bad.is_none());
    }
}
