//! Per-category sentence cache with LRU eviction, TTL expiry and
//! anti-repetition tracking.
//!
//! ## Buckets
//!
//! Every [`Category`] gets its own bucket: an `IndexMap` ordered from least to
//! most recently inserted/refreshed, capped at `capacity` entries. Overflow
//! evicts from the front. Reads never reorder a bucket.
//!
//! ## Recently surfaced
//!
//! Each bucket remembers which ids `get_random` has handed out. Random picks
//! prefer ids outside that set; once every live entry has been shown the set
//! is cleared and a new cycle starts. The set is trimmed to its newest
//! [`RECENT_KEEP`] ids once it grows past `min(capacity / 2, 20)`.
//!
//! ## Sharing
//!
//! [`TypeBucketCache`] is plain data with `&mut self` methods. [`SentenceCache`]
//! wraps it for concurrent use; no lock is held across a remote fetch.

use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    errors::Error,
    fetch::{fetch_with_retry, RetryPolicy, SentenceSource},
    persist::JsonFileStore,
    sentence::{Category, Sentence},
    Result,
};

const RECENT_CAP: usize = 20;
const RECENT_KEEP: usize = 10;
/// Upper bound on warmup fetches per category.
pub const WARMUP_PER_CATEGORY: usize = 10;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub sentence: Sentence,
    pub inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        age(now, self.inserted_at) < ttl
    }
}

#[derive(Clone, Debug, Default)]
struct Bucket {
    entries: IndexMap<u64, CacheEntry>,
    recent: IndexSet<u64>,
}

/// Hit/miss counters, persisted with the snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    #[serde(default)]
    pub cycle_resets: u64,
    #[serde(default)]
    pub last_cleanup: Option<DateTime<Utc>>,
}

impl CacheStats {
    /// Hit rate (0.0-1.0). Returns 0.0 if no lookups yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Serializable form of the whole cache.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub buckets: BTreeMap<Category, BucketSnapshot>,
    #[serde(default)]
    pub stats: CacheStats,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BucketSnapshot {
    /// Oldest first.
    pub entries: Vec<CacheEntry>,
    #[serde(default)]
    pub recently_surfaced: Vec<u64>,
}

#[derive(Debug)]
pub struct TypeBucketCache {
    capacity: usize,
    ttl: Duration,
    buckets: HashMap<Category, Bucket>,
    stats: CacheStats,
}

impl TypeBucketCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            buckets: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.cache_capacity, cfg.cache_ttl)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Total entries across all buckets (expired ones included until swept).
    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_len(&self, category: Category) -> usize {
        self.buckets
            .get(&category)
            .map(|b| b.entries.len())
            .unwrap_or(0)
    }

    pub fn recently_surfaced(&self, category: Category) -> Vec<u64> {
        self.buckets
            .get(&category)
            .map(|b| b.recent.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Insert or refresh `sentence`. Returns the bucket it landed in.
    pub fn put(&mut self, sentence: Sentence, category: Option<Category>) -> Category {
        self.put_at(sentence, category, Utc::now())
    }

    pub fn put_at(
        &mut self,
        sentence: Sentence,
        category: Option<Category>,
        now: DateTime<Utc>,
    ) -> Category {
        let key = Category::resolve(category, &sentence);
        let bucket = self.buckets.entry(key).or_default();

        let id = sentence.id;
        // Remove first so a refresh moves the entry to the back.
        bucket.entries.shift_remove(&id);
        bucket.entries.insert(
            id,
            CacheEntry {
                sentence,
                inserted_at: now,
            },
        );

        while bucket.entries.len() > self.capacity {
            if let Some((evicted, _)) = bucket.entries.shift_remove_index(0) {
                bucket.recent.shift_remove(&evicted);
                debug!(category = %key, id = evicted, "evicted least recently used sentence");
            }
        }
        key
    }

    /// Pick a random live sentence, avoiding recent repeats. `None` is a miss.
    pub fn get_random(&mut self, category: Option<Category>) -> Option<Sentence> {
        self.get_random_with(category, Utc::now(), &mut rand::thread_rng())
    }

    pub fn get_random_with<R: Rng + ?Sized>(
        &mut self,
        category: Option<Category>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Option<Sentence> {
        let key = category.unwrap_or(Category::Unclassified);
        let limit = (self.capacity / 2).min(RECENT_CAP);
        let ttl = self.ttl;

        let Some(bucket) = self.buckets.get_mut(&key) else {
            self.stats.misses += 1;
            return None;
        };

        let valid: Vec<u64> = bucket
            .entries
            .iter()
            .filter(|(_, e)| e.is_fresh(now, ttl))
            .map(|(id, _)| *id)
            .collect();
        if valid.is_empty() {
            self.stats.misses += 1;
            return None;
        }

        let unused: Vec<u64> = valid
            .iter()
            .copied()
            .filter(|id| !bucket.recent.contains(id))
            .collect();

        let mut reset = false;
        let chosen = if let Some(id) = unused.choose(rng) {
            *id
        } else {
            reset = true;
            debug!(category = %key, "every cached sentence shown, resetting cycle");
            bucket.recent.clear();
            self.stats.cycle_resets += 1;
            *valid.choose(rng)?
        };

        bucket.recent.shift_remove(&chosen);
        bucket.recent.insert(chosen);

        if !reset && valid.iter().all(|id| bucket.recent.contains(id)) {
            // Full cycle: start the next one, but never repeat the pick we just made.
            debug!(category = %key, "cycle complete after {} sentences", valid.len());
            bucket.recent.clear();
            bucket.recent.insert(chosen);
            self.stats.cycle_resets += 1;
        }

        if bucket.recent.len() > limit && bucket.recent.len() > RECENT_KEEP {
            let excess = bucket.recent.len() - RECENT_KEEP;
            bucket.recent.drain(..excess);
        }

        self.stats.hits += 1;
        bucket.entries.get(&chosen).map(|e| e.sentence.clone())
    }

    /// Drop expired entries and empty buckets. Returns the number removed.
    pub fn cleanup(&mut self) -> usize {
        self.cleanup_at(Utc::now())
    }

    pub fn cleanup_at(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let mut removed = 0usize;

        self.buckets.retain(|_, bucket| {
            let before = bucket.entries.len();
            bucket.entries.retain(|_, e| e.is_fresh(now, ttl));
            removed += before - bucket.entries.len();
            !bucket.entries.is_empty()
        });

        self.stats.last_cleanup = Some(now);
        debug!(
            removed,
            total = self.len(),
            hit_rate = %format!("{:.2}%", self.stats.hit_rate() * 100.0),
            "cache cleanup finished"
        );
        removed
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let buckets = self
            .buckets
            .iter()
            .map(|(category, bucket)| {
                (
                    *category,
                    BucketSnapshot {
                        entries: bucket.entries.values().cloned().collect(),
                        recently_surfaced: bucket.recent.iter().copied().collect(),
                    },
                )
            })
            .collect();

        CacheSnapshot {
            buckets,
            stats: self.stats.clone(),
        }
    }

    /// Replace all contents with `snapshot`, honoring the current capacity.
    pub fn restore(&mut self, snapshot: CacheSnapshot) {
        self.buckets.clear();
        for (category, snap) in snapshot.buckets {
            let mut bucket = Bucket::default();
            for entry in snap.entries {
                bucket.entries.shift_remove(&entry.sentence.id);
                bucket.entries.insert(entry.sentence.id, entry);
            }
            while bucket.entries.len() > self.capacity {
                bucket.entries.shift_remove_index(0);
            }
            bucket.recent = snap
                .recently_surfaced
                .into_iter()
                .filter(|id| bucket.entries.contains_key(id))
                .collect();
            if bucket.recent.len() > RECENT_KEEP {
                let excess = bucket.recent.len() - RECENT_KEEP;
                bucket.recent.drain(..excess);
            }
            if !bucket.entries.is_empty() {
                self.buckets.insert(category, bucket);
            }
        }
        self.stats = snapshot.stats;
    }
}

fn age(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

#[derive(Clone, Debug, Default)]
pub struct WarmupReport {
    pub loaded: BTreeMap<Category, usize>,
    pub failed: Vec<Category>,
}

/// Concurrency-safe handle around [`TypeBucketCache`].
pub struct SentenceCache {
    inner: Mutex<TypeBucketCache>,
    warming: AtomicBool,
}

struct WarmupGuard<'a>(&'a AtomicBool);

impl Drop for WarmupGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SentenceCache {
    pub fn new(cache: TypeBucketCache) -> Self {
        Self {
            inner: Mutex::new(cache),
            warming: AtomicBool::new(false),
        }
    }

    pub async fn put(&self, sentence: Sentence, category: Option<Category>) -> Category {
        self.inner.lock().await.put(sentence, category)
    }

    pub async fn get_random(&self, category: Option<Category>) -> Option<Sentence> {
        self.inner.lock().await.get_random(category)
    }

    pub async fn cleanup(&self) -> usize {
        self.inner.lock().await.cleanup()
    }

    pub async fn stats(&self) -> (CacheStats, usize) {
        let c = self.inner.lock().await;
        (c.stats().clone(), c.len())
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        self.inner.lock().await.snapshot()
    }

    pub async fn restore(&self, snapshot: CacheSnapshot) {
        self.inner.lock().await.restore(snapshot);
    }

    /// Persist a snapshot through the crash-safe store.
    pub async fn save(&self, store: &JsonFileStore) -> Result<()> {
        let snapshot = self.snapshot().await;
        store.save(&snapshot)?;
        info!(path = %store.path().display(), "cache snapshot saved");
        Ok(())
    }

    /// Restore from disk. A missing or corrupt snapshot leaves the cache empty.
    pub async fn load(&self, store: &JsonFileStore) -> bool {
        match store.load::<CacheSnapshot>() {
            Some(snapshot) => {
                self.restore(snapshot).await;
                let (_, len) = self.stats().await;
                info!(entries = len, "cache snapshot restored");
                true
            }
            None => {
                warn!(path = %store.path().display(), "no usable cache snapshot, starting empty");
                self.restore(CacheSnapshot::default()).await;
                false
            }
        }
    }

    /// Prefill buckets from the remote source.
    ///
    /// Issues up to `min(10, capacity)` fetches per category. A failing
    /// category is logged and skipped. Only one warmup runs at a time.
    pub async fn warmup(
        &self,
        source: &dyn SentenceSource,
        categories: &[Category],
        policy: RetryPolicy,
    ) -> Result<WarmupReport> {
        if self.warming.swap(true, Ordering::SeqCst) {
            return Err(Error::WarmupInProgress);
        }
        let _guard = WarmupGuard(&self.warming);

        let per_category = {
            let c = self.inner.lock().await;
            WARMUP_PER_CATEGORY.min(c.capacity())
        };

        let mut report = WarmupReport::default();
        for &category in categories {
            let mut loaded = 0usize;
            for _ in 0..per_category {
                match fetch_with_retry(source, Some(category), policy).await {
                    Ok(sentence) => {
                        self.put(sentence, Some(category)).await;
                        loaded += 1;
                    }
                    Err(e) => {
                        error!(category = %category, "cache warmup failed: {e}");
                        report.failed.push(category);
                        break;
                    }
                }
            }
            if loaded > 0 {
                info!(category = %category, loaded, "cache warmup done");
            }
            report.loaded.insert(category, loaded);
        }
        Ok(report)
    }
}
