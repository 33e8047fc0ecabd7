use std::{hash::Hash, num::NonZeroUsize, time::Duration};

use lru::LruCache;
use tokio::{sync::Mutex, time::Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
	pub size: usize,
	pub capacity: usize,
	pub hits: u64,
	pub misses: u64,
}

struct Entry<V> {
	value: V,
	expires_at: Instant,
}

struct Inner<K: Hash + Eq, V> {
	entries: LruCache<K, Entry<V>>,
	hits: u64,
	misses: u64,
}

/// Bounded in-process cache with LRU eviction and per-entry TTL. All
/// mutations, including the stats accessor, take the async lock.
pub struct TtlLruCache<K: Hash + Eq, V: Clone> {
	inner: Mutex<Inner<K, V>>,
	default_ttl: Duration,
	capacity: usize,
}
impl<K: Hash + Eq, V: Clone> TtlLruCache<K, V> {
	pub fn new(capacity: usize, default_ttl: Duration) -> Self {
		let bounded = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");

		Self {
			inner: Mutex::new(Inner { entries: LruCache::new(bounded), hits: 0, misses: 0 }),
			default_ttl,
			capacity: bounded.get(),
		}
	}

	/// Returns only non-expired entries; a hit refreshes LRU recency.
	pub async fn get(&self, key: &K) -> Option<V> {
		let mut guard = self.inner.lock().await;
		let inner = &mut *guard;
		let now = Instant::now();
		let expired = matches!(inner.entries.peek(key), Some(entry) if entry.expires_at <= now);

		if expired {
			inner.entries.pop(key);
			inner.misses += 1;

			return None;
		}

		match inner.entries.get(key) {
			Some(entry) => {
				let value = entry.value.clone();

				inner.hits += 1;

				Some(value)
			},
			None => {
				inner.misses += 1;

				None
			},
		}
	}

	pub async fn insert(&self, key: K, value: V) {
		self.insert_with_ttl(key, value, self.default_ttl).await;
	}

	pub async fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
		let mut inner = self.inner.lock().await;

		inner.entries.put(key, Entry { value, expires_at: Instant::now() + ttl });
	}

	pub async fn remove(&self, key: &K) -> bool {
		self.inner.lock().await.entries.pop(key).is_some()
	}

	pub async fn clear(&self) {
		self.inner.lock().await.entries.clear();
	}

	pub async fn stats(&self) -> CacheStats {
		let inner = self.inner.lock().await;

		CacheStats {
			size: inner.entries.len(),
			capacity: self.capacity,
			hits: inner.hits,
			misses: inner.misses,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn returns_inserted_value() {
		let cache = TtlLruCache::new(4, Duration::from_secs(300));

		cache.insert("key".to_string(), 42).await;

		assert_eq!(cache.get(&"key".to_string()).await, Some(42));
	}

	#[tokio::test(start_paused = true)]
	async fn expired_entries_are_not_returned() {
		let cache = TtlLruCache::new(4, Duration::from_secs(300));

		cache.insert("key".to_string(), 1).await;

		tokio::time::advance(Duration::from_secs(301)).await;

		assert_eq!(cache.get(&"key".to_string()).await, None);

		let stats = cache.stats().await;

		assert_eq!(stats.size, 0);
	}

	#[tokio::test]
	async fn overflow_evicts_the_least_recently_used_key() {
		let cache = TtlLruCache::new(2, Duration::from_secs(300));

		cache.insert("a", 1).await;
		cache.insert("b", 2).await;

		// Touch "a" so "b" becomes the LRU victim.
		assert_eq!(cache.get(&"a").await, Some(1));

		cache.insert("c", 3).await;

		assert_eq!(cache.get(&"b").await, None);
		assert_eq!(cache.get(&"a").await, Some(1));
		assert_eq!(cache.get(&"c").await, Some(3));
	}

	#[tokio::test]
	async fn stats_track_hits_and_misses() {
		let cache = TtlLruCache::new(2, Duration::from_secs(300));

		cache.insert("a", 1).await;

		let _ = cache.get(&"a").await;
		let _ = cache.get(&"missing").await;

		let stats = cache.stats().await;

		assert_eq!(stats.hits, 1);
		assert_eq!(stats.misses, 1);
		assert_eq!(stats.size, 1);
		assert_eq!(stats.capacity, 2);
	}

	#[tokio::test(start_paused = true)]
	async fn per_entry_ttl_overrides_the_default() {
		let cache = TtlLruCache::new(4, Duration::from_secs(300));

		cache.insert_with_ttl("short", 1, Duration::from_secs(5)).await;
		cache.insert("long", 2).await;

		tokio::time::advance(Duration::from_secs(6)).await;

		assert_eq!(cache.get(&"short").await, None);
		assert_eq!(cache.get(&"long").await, Some(2));
	}
}
