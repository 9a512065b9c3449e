//! Time-bounded cache
//!
//! A small keyed cache whose entries expire after a fixed TTL. Expiry is
//! checked on read against an injected `Clock`; there is no background task.
//! Build one explicitly and drop it, or call `clear()`, to tear it down.

use crate::utils::time::Clock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

/// A cached value with its insertion time
#[derive(Debug, Clone)]
struct CachedValue<V> {
    value: V,
    fetched_at: u64,
}

pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CachedValue<V>>>,
    ttl_secs: u64,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_secs,
            clock,
        }
    }

    /// Get a live entry. Expired entries read as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.read().ok()?;
        entries
            .get(key)
            .filter(|cached| now.saturating_sub(cached.fetched_at) < self.ttl_secs)
            .map(|cached| cached.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let fetched_at = self.clock.now();
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, CachedValue { value, fetched_at });
        }
    }

    /// Return the live entry for `key`, or compute, store and return a fresh one
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = fetch().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Drop every entry
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}
