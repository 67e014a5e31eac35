//! Memoized completions keyed on a request fingerprint.
//!
//! [`CompletionCache`] maps `sha256(prompt | model | temperature)` to the
//! completion text the backend produced for it. Entries expire after a TTL
//! and, when the cache grows past its ceiling, the least-hit entries are
//! evicted in bulk.
//!
//! # Expiry
//!
//! Expired entries are removed in two places: lazily when [`get`](CompletionCache::get)
//! finds one, and by the periodic sweep started with
//! [`spawn_sweeper`](CompletionCache::spawn_sweeper). The sweep bounds memory
//! for fingerprints that are never looked up again.
//!
//! # Eviction order
//!
//! Ascending hit count, then oldest entry first, then fingerprint. The last
//! key only matters for entries inserted at the same instant and keeps the
//! order deterministic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::telemetry;

/// Fraction of entries dropped when the cache overflows.
const EVICTION_FRACTION: f64 = 0.2;

/// Shortest sweep period; `tokio::time::interval` rejects zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the completion cache.
///
/// ```rust
/// # use muninn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(500)
///     .ttl(Duration::from_secs(15 * 60));
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before eviction. Default: 1,000.
    pub max_entries: usize,
    /// Age after which an entry is no longer served. Default: 60 minutes.
    #[serde(rename = "ttl_secs", with = "duration_secs")]
    pub ttl: Duration,
    /// Interval of the background expiry sweep. Default: 5 minutes.
    #[serde(rename = "sweep_interval_secs", with = "duration_secs")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the time-to-live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the background sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Repair values the cache cannot run with: at least one entry and a
    /// sweep interval of at least one second.
    pub fn normalize(&mut self) {
        self.max_entries = self.max_entries.max(1);
        self.sweep_interval = self.sweep_interval.max(MIN_SWEEP_INTERVAL);
    }
}

/// A single memoized completion.
#[derive(Debug, Clone)]
struct CacheEntry {
    completion: String,
    created_at: Instant,
    hit_count: u64,
    model: String,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.created_at) > ttl
    }
}

/// Read-only view of cache contents for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    /// Sum of hit counters over live entries.
    pub total_hits: u64,
    pub average_hits_per_entry: f64,
    /// Age of the oldest entry, `None` when empty.
    pub oldest_entry_age: Option<Duration>,
    /// Age of the newest entry, `None` when empty.
    pub newest_entry_age: Option<Duration>,
}

/// In-memory completion cache with TTL expiry and hit-count eviction.
///
/// All methods take `&self`; the map sits behind a mutex so lookups, inserts
/// and the background sweep can run from different tasks.
#[derive(Debug)]
pub struct CompletionCache {
    config: CacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CompletionCache {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up the completion for a request.
    ///
    /// Returns `None` on a miss or when the entry is older than the TTL; an
    /// expired entry is removed as part of the lookup. A hit bumps the
    /// entry's hit counter.
    pub fn get(&self, prompt: &str, model: &str, temperature: f32) -> Option<String> {
        let key = fingerprint(prompt, model, temperature);
        let now = Instant::now();
        let mut entries = self.lock_entries();

        let expired = match entries.get_mut(&key) {
            None => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                return None;
            }
            Some(entry) if !entry.is_expired(now, self.config.ttl) => {
                entry.hit_count += 1;
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                debug!(
                    model = %entry.model,
                    hits = entry.hit_count,
                    prompt = preview(prompt),
                    "completion cache hit"
                );
                return Some(entry.completion.clone());
            }
            Some(_) => true,
        };

        if expired {
            entries.remove(&key);
            metrics::counter!(telemetry::CACHE_REMOVALS_TOTAL, "reason" => "expired").increment(1);
        }
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        None
    }

    /// Store (or replace) the completion for a request.
    ///
    /// The entry starts with a fresh timestamp and zero hits. Inserting past
    /// `max_entries` triggers eviction.
    pub fn set(&self, prompt: &str, model: &str, temperature: f32, completion: impl Into<String>) {
        let key = fingerprint(prompt, model, temperature);
        let mut entries = self.lock_entries();
        entries.insert(
            key,
            CacheEntry {
                completion: completion.into(),
                created_at: Instant::now(),
                hit_count: 0,
                model: model.to_owned(),
            },
        );

        if entries.len() > self.config.max_entries {
            let removed = evict(&mut entries, self.config.max_entries);
            metrics::counter!(telemetry::CACHE_REMOVALS_TOTAL, "reason" => "evicted")
                .increment(removed as u64);
            info!(removed, "completion cache trimmed");
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.lock_entries().clear();
        info!("completion cache cleared");
    }

    /// Remove all entries older than the TTL. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now, ttl));
        let removed = before - entries.len();

        if removed > 0 {
            metrics::counter!(telemetry::CACHE_REMOVALS_TOTAL, "reason" => "expired")
                .increment(removed as u64);
            info!(removed, "completion cache swept expired entries");
        }
        removed
    }

    /// Start the periodic expiry sweep on the current tokio runtime.
    ///
    /// The task holds only a weak reference and exits once the cache is
    /// dropped. Abort the returned handle to stop it earlier. A zero sweep
    /// interval is treated as one second.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval.max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep_expired();
                    }
                    None => break,
                }
            }
        })
    }

    /// Number of entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size, hit and age figures. Does not touch hit counters or expiry.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.lock_entries();
        let total_hits = entries.values().map(|e| e.hit_count).sum();
        let oldest = entries.values().map(|e| e.created_at).min();
        let newest = entries.values().map(|e| e.created_at).max();

        CacheStats {
            size: entries.len(),
            max_size: self.config.max_entries,
            total_hits,
            average_hits_per_entry: total_hits as f64 / entries.len().max(1) as f64,
            oldest_entry_age: oldest.map(|t| now.duration_since(t)),
            newest_entry_age: newest.map(|t| now.duration_since(t)),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CompletionCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Compute the cache key for a request.
///
/// SHA-256 over `"{prompt}|{model}|{temperature}"`, hex encoded. Prompts are
/// normalized to `\n` line endings first so the same buffer content hits the
/// same entry regardless of the editor's line-ending setting. Unlike
/// `DefaultHasher`, the digest is stable across processes.
pub fn fingerprint(prompt: &str, model: &str, temperature: f32) -> String {
    let prompt = normalize_prompt(prompt);
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(b"|");
    hasher.update(model.as_bytes());
    hasher.update(b"|");
    hasher.update(temperature.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize_prompt(prompt: &str) -> std::borrow::Cow<'_, str> {
    if prompt.contains("\r\n") {
        prompt.replace("\r\n", "\n").into()
    } else {
        prompt.into()
    }
}

/// Drop the least-hit entries so that the map is back under `max_entries`.
///
/// Removes `max(20% of len, len - max_entries)` entries.
fn evict(entries: &mut HashMap<String, CacheEntry>, max_entries: usize) -> usize {
    let len = entries.len();
    let overflow = len.saturating_sub(max_entries);
    let fraction = (len as f64 * EVICTION_FRACTION).floor() as usize;
    let to_remove = fraction.max(overflow);

    let mut order: Vec<(u64, Instant, String)> = entries
        .iter()
        .map(|(key, e)| (e.hit_count, e.created_at, key.clone()))
        .collect();
    order.sort_unstable();

    for (_, _, key) in order.into_iter().take(to_remove) {
        entries.remove(&key);
    }
    to_remove.min(len)
}

/// First 50 characters of a prompt, for log lines.
fn preview(prompt: &str) -> &str {
    match prompt.char_indices().nth(50) {
        Some((idx, _)) => &prompt[..idx],
        None => prompt,
    }
}

/// Serde adapter storing a [`Duration`] as integer seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
