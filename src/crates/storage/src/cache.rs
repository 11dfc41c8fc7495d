//! Live-state cache.
//!
//! The [`Cache`] trait covers the primitives this engine needs: string KV
//! with TTL, JSON helpers layered on top, and a list primitive with a
//! blocking pop for the execution queue. [`MemoryCache`] is the in-process
//! implementation used in tests and single-node deployments; an external
//! backend implements the same trait for multi-process runs.
//!
//! Cache failures are treated as non-fatal by callers: a cache write after a
//! durable write is logged and skipped, and the state is rebuilt on the next
//! load.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

use crate::error::Result;

/// Default TTL for cache records (1 hour).
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Key/value + list cache surface.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Read a key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a key with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key; returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Existence probe.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Push onto the head of a list.
    async fn lpush(&self, key: &str, value: &str) -> Result<()>;

    /// Pop from the tail of a list, waiting up to `timeout` for an element.
    async fn brpop(&self, key: &str, timeout: Duration) -> Result<Option<String>>;

    /// Read a key as JSON.
    async fn get_json(&self, key: &str) -> Result<Option<Value>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Write a key as JSON.
    async fn set_json(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()> {
        self.set(key, &value.to_string(), ttl).await
    }
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-process cache: a concurrent KV map with lazy TTL expiry plus
/// mutex-guarded lists with a notify-based blocking pop.
#[derive(Default)]
pub struct MemoryCache {
    kv: DashMap<String, Entry>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    list_notify: Notify,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.kv.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Expired entries are collected on read.
        self.kv.remove_if(key, |_, entry| entry.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.kv.remove(key).is_some();
        let in_list = self.lists.lock().await.remove(key).is_some();
        Ok(existed || in_list)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.lists
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        self.list_notify.notify_waiters();
        Ok(())
    }

    async fn brpop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut lists = self.lists.lock().await;
                if let Some(list) = lists.get_mut(key) {
                    if let Some(value) = list.pop_back() {
                        return Ok(Some(value));
                    }
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::select! {
                _ = self.list_notify.notified() => {}
                _ = tokio::time::sleep(remaining) => return Ok(None),
            }
        }
    }
}
