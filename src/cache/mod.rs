//! In-memory response cache
//!
//! Memoizes upstream answers (body + status) keyed by request URL. The cache
//! is bounded in both entry count and total byte footprint, evicts in LRU
//! order, and expires entries lazily on read. It is authoritative for
//! neither content nor status.

use bytes::Bytes;
use lru::LruCache;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct CacheEntry {
    body: Bytes,
    status: u16,
    expires_at: Instant,
}

struct CacheInner {
    entries: LruCache<String, CacheEntry>,
    total_bytes: usize,
}

pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    max_keys: usize,
    max_bytes: usize,
}

impl ResponseCache {
    pub fn new(max_keys: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            max_keys,
            max_bytes,
        }
    }

    /// Live hit returns the memoized body and status and promotes the entry
    /// to most-recently-used. An expired entry is removed and reported as a
    /// miss.
    pub async fn get(&self, key: &str) -> Option<(Bytes, u16)> {
        let mut inner = self.inner.lock().await;

        let live = match inner.entries.get(key) {
            Some(entry) => entry.expires_at > Instant::now(),
            None => return None,
        };

        if !live {
            if let Some(entry) = inner.entries.pop(key) {
                inner.total_bytes -= entry.body.len();
            }
            return None;
        }

        inner
            .entries
            .get(key)
            .map(|entry| (entry.body.clone(), entry.status))
    }

    /// Store an entry and evict from the LRU end until both bounds hold.
    /// A zero TTL is a no-op.
    pub async fn put(&self, key: &str, body: Bytes, ttl: Duration, status: u16) {
        if ttl.is_zero() {
            return;
        }

        let mut inner = self.inner.lock().await;

        if let Some(old) = inner.entries.pop(key) {
            inner.total_bytes -= old.body.len();
        }

        inner.total_bytes += body.len();
        inner.entries.push(
            key.to_string(),
            CacheEntry {
                body,
                status,
                expires_at: Instant::now() + ttl,
            },
        );

        while inner.total_bytes > self.max_bytes || inner.entries.len() > self.max_keys {
            match inner.entries.pop_lru() {
                Some((_, entry)) => inner.total_bytes -= entry.body.len(),
                None => break,
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn total_bytes(&self) -> usize {
        self.inner.lock().await.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn body(len: usize) -> Bytes {
        Bytes::from(vec![0u8; len])
    }

    #[tokio::test]
    async fn bounds_hold_after_every_put() {
        let cache = ResponseCache::new(5, 100);

        // sizes vary enough to trip the byte bound before the key bound
        let mut size = 7usize;
        for i in 0..50 {
            size = (size * 31 + 17) % 60 + 1;
            cache.put(&format!("key-{i}"), body(size), TTL, 200).await;
            assert!(cache.len().await <= 5);
            assert!(cache.total_bytes().await <= 100);
        }
    }

    #[tokio::test]
    async fn oversized_entry_is_evicted_immediately() {
        let cache = ResponseCache::new(10, 64);
        cache.put("big", body(65), TTL, 200).await;
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.total_bytes().await, 0);
    }

    #[tokio::test]
    async fn get_promotes_to_most_recently_used() {
        let cache = ResponseCache::new(2, 1024);
        cache.put("a", body(1), TTL, 200).await;
        cache.put("b", body(1), TTL, 200).await;

        assert!(cache.get("a").await.is_some());

        // "b" is now the LRU entry and goes first
        cache.put("c", body(1), TTL, 200).await;
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn replacing_a_key_updates_byte_accounting() {
        let cache = ResponseCache::new(10, 1024);
        cache.put("k", body(100), TTL, 200).await;
        cache.put("k", body(10), TTL, 200).await;
        assert_eq!(cache.total_bytes().await, 10);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_releases_bytes() {
        let cache = ResponseCache::new(10, 1024);
        cache
            .put("k", body(42), Duration::from_millis(30), 200)
            .await;
        assert!(cache.get("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.total_bytes().await, 0);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn zero_ttl_is_a_no_op() {
        let cache = ResponseCache::new(10, 1024);
        cache.put("k", body(1), Duration::ZERO, 200).await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[test]
    fn status_is_memoized_with_the_body() {
        tokio_test::block_on(async {
            let cache = ResponseCache::new(10, 1024);
            cache.put("k", Bytes::from_static(b"x"), TTL, 404).await;
            let (body, status) = cache.get("k").await.unwrap();
            assert_eq!(&body[..], b"x");
            assert_eq!(status, 404);
        });
    }
}
