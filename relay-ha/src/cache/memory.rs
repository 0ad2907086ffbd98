//! In-process cache backed by `DashMap`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheValueKind, KeyValueCache, glob_match};
use crate::{Error, Result};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Thread-safe TTL cache.
///
/// Expired entries are dropped lazily on access and by `cleanup_expired`.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all expired entries. Returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }

    fn live(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.clone())
    }

    fn wrong_type(key: &str) -> Error {
        Error::cache(format!("value at '{key}' has the wrong type"))
    }
}

/// Resolve Redis-style inclusive bounds against a length.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.live(key).map(|e| e.value) {
            None => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s)),
            Some(Value::List(_)) => Err(Self::wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheEntry::new(Value::Text(value.to_string()), None),
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheEntry::new(Value::Text(value.to_string()), Some(ttl)),
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        if self.live(key).is_none() {
            self.entries.remove(key);
        }
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(Value::Text("0".to_string()), None));
        let Value::Text(current) = &entry.value else {
            return Err(Self::wrong_type(key));
        };
        let next = current
            .parse::<i64>()
            .map_err(|_| Error::cache(format!("value at '{key}' is not an integer")))?
            + 1;
        entry.value = Value::Text(next.to_string());
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired()))
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize> {
        if self.live(key).is_none() {
            self.entries.remove(key);
        }
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(Value::List(VecDeque::new()), None));
        let Value::List(list) = &mut entry.value else {
            return Err(Self::wrong_type(key));
        };
        list.push_front(value.to_string());
        Ok(list.len())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        match self.live(key).map(|e| e.value) {
            None => Ok(Vec::new()),
            Some(Value::Text(_)) => Err(Self::wrong_type(key)),
            Some(Value::List(list)) => Ok(resolve_range(list.len(), start, stop)
                .map(|(s, e)| list.range(s..=e).cloned().collect())
                .unwrap_or_default()),
        }
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(());
        };
        let Value::List(list) = &mut entry.value else {
            return Err(Self::wrong_type(key));
        };
        *list = match resolve_range(list.len(), start, stop) {
            Some((s, e)) => list.range(s..=e).cloned().collect(),
            None => VecDeque::new(),
        };
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.is_expired() && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn kind(&self, key: &str) -> Result<Option<CacheValueKind>> {
        Ok(self.live(key).map(|e| match e.value {
            Value::Text(_) => CacheValueKind::String,
            Value::List(_) => CacheValueKind::List,
        }))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        Ok(self.cleanup_expired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let cache = MemoryCache::new();
        cache.set("a", "1").await.unwrap();
        cache
            .set_ex("b", "2", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(cache.get("b").await.unwrap().as_deref(), Some("2"));
        assert!(cache.ttl("b").await.unwrap().is_some());
        assert!(cache.ttl("a").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("b").await.unwrap().is_none());
        assert_eq!(cache.cleanup_expired(), 0);
    }

    #[tokio::test]
    async fn test_purge_drops_unread_keys() {
        let cache = MemoryCache::new();
        let shared: &dyn KeyValueCache = &cache;
        for ts in 0..3 {
            shared
                .set_ex(&format!("channel_alert:c1:{ts}"), "{}", Duration::from_millis(10))
                .await
                .unwrap();
        }
        shared.set("bot_tokens_status", "{}").await.unwrap();
        assert_eq!(shared.purge_expired().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(shared.purge_expired().await.unwrap(), 3);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_incr() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr("n").await.unwrap(), 1);
        assert_eq!(cache.incr("n").await.unwrap(), 2);
        cache.set("s", "abc").await.unwrap();
        assert!(cache.incr("s").await.is_err());
    }

    #[tokio::test]
    async fn test_list_operations() {
        let cache = MemoryCache::new();
        for i in 0..5 {
            cache.list_push("q", &i.to_string()).await.unwrap();
        }
        assert_eq!(
            cache.list_range("q", 0, 2).await.unwrap(),
            vec!["4", "3", "2"]
        );
        assert_eq!(cache.list_range("q", 0, -1).await.unwrap().len(), 5);

        cache.list_trim("q", 0, 1).await.unwrap();
        assert_eq!(cache.list_range("q", 0, -1).await.unwrap(), vec!["4", "3"]);

        assert!(cache.get("q").await.is_err());
        assert_eq!(
            cache.kind("q").await.unwrap(),
            Some(CacheValueKind::List)
        );
    }

    #[tokio::test]
    async fn test_keys_and_delete() {
        let cache = MemoryCache::new();
        cache.set("channel_health:1", "x").await.unwrap();
        cache.set("channel_health:2", "x").await.unwrap();
        cache.set("other", "x").await.unwrap();

        let keys = cache.keys("channel_health*").await.unwrap();
        assert_eq!(keys, vec!["channel_health:1", "channel_health:2"]);

        assert!(cache.delete("other").await.unwrap());
        assert!(!cache.delete("other").await.unwrap());
    }

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(5, 0, -1), Some((0, 4)));
        assert_eq!(resolve_range(5, 1, 100), Some((1, 4)));
        assert_eq!(resolve_range(5, -2, -1), Some((3, 4)));
        assert_eq!(resolve_range(0, 0, -1), None);
        assert_eq!(resolve_range(3, 2, 1), None);
    }
}
