//! Time-bounded cache of classification results.

use super::DeviceCandidate;
use crate::hardware::{PortDescriptor, PortIdentity};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct CacheEntry {
    candidate: DeviceCandidate,
    stored_at: Instant,
}

/// Classification results keyed by port identity (path, vendor id, product id).
///
/// An entry is fresh for `ttl` after it was stored; stale entries are dropped on lookup.
pub struct ClassificationCache {
    ttl: Duration,
    entries: Mutex<HashMap<PortIdentity, CacheEntry>>,
}

impl ClassificationCache {
    /// Empty cache whose entries stay fresh for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh entry for the port's identity. Drops a stale one.
    pub async fn get(&self, port: &PortDescriptor) -> Option<DeviceCandidate> {
        let key = port.identity();
        let mut entries = self.entries.lock().await;
        let fresh = entries
            .get(&key)
            .map(|entry| entry.stored_at.elapsed() < self.ttl)?;
        if fresh {
            entries.get(&key).map(|entry| entry.candidate.clone())
        } else {
            entries.remove(&key);
            None
        }
    }

    /// Stores `candidate`, replacing any entry for the same identity.
    pub async fn insert(&self, candidate: DeviceCandidate) {
        let key = candidate.port.identity();
        self.entries.lock().await.insert(
            key,
            CacheEntry {
                candidate,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Number of stored entries, stale ones included.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(path: &str) -> DeviceCandidate {
        DeviceCandidate::unknown(PortDescriptor::new(path), Some("no reply".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ClassificationCache::new(Duration::from_secs(30));
        cache.insert(candidate("/dev/ttyUSB0")).await;
        let port = PortDescriptor::new("/dev/ttyUSB0");

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.get(&port).await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&port).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_key_includes_usb_ids() {
        let cache = ClassificationCache::new(Duration::from_secs(30));
        cache.insert(candidate("/dev/ttyUSB0")).await;

        let replugged = PortDescriptor::new("/dev/ttyUSB0").with_usb_ids(0x0403, 0x6001);
        assert!(cache.get(&replugged).await.is_none());
        assert_eq!(cache.len().await, 1);
    }
}
