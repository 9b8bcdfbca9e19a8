//! Definition and briefing cache.
//!
//! Key/value store for parsed definitions and rendered briefing text with
//! TTL-based expiry and explicit prefix invalidation. Expiry is checked
//! lazily on read; a background sweeper bounds memory growth between reads.
//! The cache tracks approximate byte size of stored values and evicts
//! oldest entries first when a put would exceed the configured budget.
//!
//! Invalidation is a point-in-time operation: after `invalidate(prefix)`
//! returns, no subsequent `get` for a matching key returns a
//! pre-invalidation value, even if that value has not yet expired by TTL.

#[cfg(test)]
mod tests;

use crate::definition::AgentDefinition;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// A cached value: either a parsed definition or rendered briefing text.
#[derive(Debug, Clone)]
pub enum CacheValue {
    /// A parsed agent definition.
    Definition(Arc<AgentDefinition>),
    /// Rendered briefing or instruction text.
    Text(String),
}

impl CacheValue {
    /// Approximate byte size of the value, used for budget accounting.
    fn approx_size(&self) -> usize {
        match self {
            CacheValue::Definition(def) => serde_json::to_vec(def.as_ref())
                .map(|bytes| bytes.len())
                .unwrap_or(1024),
            CacheValue::Text(text) => text.len(),
        }
    }
}

struct Entry {
    value: CacheValue,
    created: Instant,
    ttl: Duration,
    size: usize,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.created) >= self.ttl
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, Entry>,
    bytes: usize,
}

impl CacheInner {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.bytes = self.bytes.saturating_sub(entry.size);
        Some(entry)
    }

    /// Evict oldest entries until `needed` additional bytes fit the budget.
    fn evict_for(&mut self, needed: usize, budget: usize) {
        while self.bytes + needed > budget && !self.entries.is_empty() {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.created)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// Counters describing the cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Live entries (including not-yet-swept expired ones).
    pub entries: usize,
    /// Approximate bytes held.
    pub bytes: usize,
}

/// Concurrent TTL cache with prefix invalidation and a byte budget.
///
/// Cheap to clone; clones share the same storage.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<RwLock<CacheInner>>,
    default_ttl: Duration,
    budget_bytes: usize,
}

impl Cache {
    /// Create a cache with the given default TTL and byte budget.
    pub fn new(default_ttl: Duration, budget_bytes: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner::default())),
            default_ttl,
            budget_bytes,
        }
    }

    /// Get a value. Returns `None` on miss or when the entry's TTL has
    /// elapsed; expired entries are removed on the spot.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let now = Instant::now();
        {
            let inner = self.inner.read();
            match inner.entries.get(key) {
                Some(entry) if !entry.expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: upgrade to a write lock to drop it. Another reader may
        // have raced us here; remove is idempotent.
        self.inner.write().remove(key);
        None
    }

    /// Insert a value with the default TTL.
    pub fn put(&self, key: impl Into<String>, value: CacheValue) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    /// Insert a value with an explicit TTL, evicting oldest entries first
    /// if the byte budget would be exceeded.
    pub fn put_with_ttl(&self, key: impl Into<String>, value: CacheValue, ttl: Duration) {
        let key = key.into();
        let size = value.approx_size();

        let mut inner = self.inner.write();
        inner.remove(&key);

        if size > self.budget_bytes {
            debug!(key = %key, size, "cache refuses oversized value");
            return;
        }

        inner.evict_for(size, self.budget_bytes);
        inner.bytes += size;
        inner.entries.insert(
            key,
            Entry {
                value,
                created: Instant::now(),
                ttl,
                size,
            },
        );
    }

    /// Remove every entry whose key starts with `prefix`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut inner = self.inner.write();
        let matching: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &matching {
            inner.remove(key);
        }
        matching.len()
    }

    /// Remove all entries.
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.bytes = 0;
    }

    /// Remove expired entries. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Current cache counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        CacheStats {
            entries: inner.entries.len(),
            bytes: inner.bytes,
        }
    }

    /// Start the background sweeper. The returned handle stops the sweep
    /// thread when dropped.
    pub fn start_sweeper(&self, interval: Duration) -> CacheSweeper {
        let cache = self.clone();
        let (tx, rx) = mpsc::channel::<()>();

        let handle = std::thread::spawn(move || {
            loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!(removed, "cache sweep removed expired entries");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        CacheSweeper {
            stop: tx,
            handle: Some(handle),
        }
    }
}

/// Handle for the background sweep thread. Stops the thread on drop.
pub struct CacheSweeper {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
