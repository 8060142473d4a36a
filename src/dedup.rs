//! TTL-keyed deduplication cache (§4.2).
//!
//! Two independent instances are used by the engine with distinct TTLs and
//! key conventions (events-mode, faults-mode event-processor, and the
//! informer-path enricher) — see the open question in §9. They are never
//! shared; each owner constructs its own [`DedupCache`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// A mapping from string key to absolute expiry time, safe for concurrent
/// readers and writers via an internal mutex (critical sections here are a
/// single hash-map lookup/insert, so a blocking `std::sync::Mutex` is
/// appropriate rather than an async one).
pub struct DedupCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// IsDuplicate(key) — §4.2. Atomically: if an unexpired entry exists,
    /// returns `true` without mutation; otherwise inserts `now+TTL` and
    /// returns `false`.
    pub fn is_duplicate(&self, key: impl Into<String>) -> bool {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("dedup cache mutex poisoned");
        if let Some(expiry) = entries.get(&key)
            && *expiry > now
        {
            return true;
        }
        entries.insert(key, now + self.ttl);
        false
    }

    /// Deletes all expired entries. Intended to run on a ticker at an
    /// interval equal to the TTL, bounding memory use.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("dedup cache mutex poisoned");
        entries.retain(|_, expiry| *expiry > now);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("dedup cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns a background task that calls [`Self::sweep`] on a ticker at an
    /// interval equal to the TTL. The task holds only a weak-free `Arc` clone
    /// and runs for as long as the caller keeps it (or the cache) alive.
    pub fn spawn_sweeper(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = std::sync::Arc::clone(self);
        let interval = cache.ttl.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }
}

/// Builds the key convention for events-mode dedup: `<namespace>/<name>/<uid>/<resourceVersion>`.
pub fn event_dedup_key(namespace: &str, name: &str, uid: &str, resource_version: &str) -> String {
    format!("{namespace}/{name}/{uid}/{resource_version}")
}

/// Builds the key convention for faults-mode dedup: `<cluster>/<namespace>/<pod>/<reason>/<count>`.
pub fn fault_dedup_key(cluster: &str, namespace: &str, pod: &str, reason: &str, count: i32) -> String {
    format!("{cluster}/{namespace}/{pod}/{reason}/{count}")
}

/// Builds the key convention for the informer-path deduplication enricher:
/// `(faultType, resourceUID, containerName)`.
pub fn informer_dedup_key(fault_type: &str, resource_uid: &str, container: &str) -> String {
    format!("{fault_type}/{resource_uid}/{container}")
}
