//! Key-value store boundary.
//!
//! All conversation state lives behind this trait. `RedisKv` is the
//! production backend; `MemoryKv` backs tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;

#[derive(Debug, Clone, thiserror::Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("key {0} holds the wrong value type")]
    WrongType(String),
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        KvError::Unavailable(err.to_string())
    }
}

/// Capability interface over the store: plain string values, Redis-style
/// lists, and a single-page key scan. `lrange` bounds are inclusive and
/// may be negative (counted from the end), matching Redis.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    async fn rpush(&self, key: &str, value: &str) -> Result<u64, KvError>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, KvError>;
    async fn scan(&self, pattern: &str, count: usize) -> Result<Vec<String>, KvError>;
}

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    List(Vec<String>),
}

#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Entry>>,
}

/// Supports the `prefix*` glob shape used by the index scan; anything else
/// is matched literally.
fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

fn resolve_index(index: isize, len: usize) -> isize {
    if index < 0 {
        index + len as isize
    } else {
        index
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(Entry::Str(value)) => Ok(Some(value.clone())),
            Some(Entry::List(_)) => Err(KvError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry::Str(value.to_string()));
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let mut entries = self.entries.write().await;
        match entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(vec![]))
        {
            Entry::List(items) => {
                items.push(value.to_string());
                Ok(items.len() as u64)
            }
            Entry::Str(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, KvError> {
        let entries = self.entries.read().await;
        let items = match entries.get(key) {
            Some(Entry::List(items)) => items,
            Some(Entry::Str(_)) => return Err(KvError::WrongType(key.to_string())),
            None => return Ok(vec![]),
        };
        let len = items.len();
        if len == 0 {
            return Ok(vec![]);
        }
        let start = resolve_index(start, len).max(0) as usize;
        let stop = resolve_index(stop, len);
        if stop < 0 {
            return Ok(vec![]);
        }
        let stop = (stop as usize).min(len - 1);
        if start > stop {
            return Ok(vec![]);
        }
        Ok(items[start..=stop].to_vec())
    }

    async fn scan(&self, pattern: &str, count: usize) -> Result<Vec<String>, KvError> {
        let entries = self.entries.read().await;
        Ok(entries
            .keys()
            .filter(|key| pattern_matches(pattern, key))
            .take(count)
            .cloned()
            .collect())
    }
}

pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let mut conn = self.manager.clone();
        let len: i64 = conn.rpush(key, value).await?;
        Ok(len as u64)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, KvError> {
        let mut conn = self.manager.clone();
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn scan(&self, pattern: &str, count: usize) -> Result<Vec<String>, KvError> {
        let mut conn = self.manager.clone();
        let (_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(0)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_and_set_round_trip() {
        let kv = MemoryKv::default();
        assert_eq!(kv.get("missing").await.unwrap(), None);
        kv.set("a", "1").await.unwrap();
        kv.set("a", "2").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn rpush_appends_in_order() {
        let kv = MemoryKv::default();
        assert_eq!(kv.rpush("list", "one").await.unwrap(), 1);
        assert_eq!(kv.rpush("list", "two").await.unwrap(), 2);
        let items = kv.lrange("list", 0, -1).await.unwrap();
        assert_eq!(items, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn lrange_bounds() {
        let kv = MemoryKv::default();
        for value in ["a", "b", "c", "d"] {
            kv.rpush("list", value).await.unwrap();
        }
        assert_eq!(kv.lrange("list", 1, 2).await.unwrap(), vec!["b", "c"]);
        assert_eq!(kv.lrange("list", 0, 99).await.unwrap().len(), 4);
        assert!(kv.lrange("list", 9, 12).await.unwrap().is_empty());
        assert!(kv.lrange("absent", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mixed_types_are_rejected() {
        let kv = MemoryKv::default();
        kv.set("s", "value").await.unwrap();
        assert!(matches!(
            kv.rpush("s", "x").await,
            Err(KvError::WrongType(_))
        ));
        kv.rpush("l", "x").await.unwrap();
        assert!(matches!(kv.get("l").await, Err(KvError::WrongType(_))));
    }

    #[tokio::test]
    async fn scan_filters_by_prefix() {
        let kv = MemoryKv::default();
        kv.set("support:index:a@b.com", "{}").await.unwrap();
        kv.set("support:index:c@d.com", "{}").await.unwrap();
        kv.set("other:key", "{}").await.unwrap();
        let mut keys = kv.scan("support:index:*", 100).await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "support:index:a@b.com".to_string(),
                "support:index:c@d.com".to_string()
            ]
        );
        assert_eq!(kv.scan("support:index:*", 1).await.unwrap().len(), 1);
    }
}
