//! TTL cache of partition existence.
//!
//! Sparse tile grids mean many covering tiles have no partition. Probing
//! storage for each one is slow, so positive and negative answers are kept
//! for a while and shared by every query on the process.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt as _};

use crate::probe::TileProbe;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Default maximum number of cached paths.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// Outcome of resolving a candidate file list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Paths confirmed to exist, in input order.
    pub existing: Vec<String>,
    /// Paths confirmed missing (or unprobeable), in input order.
    pub missing: Vec<String>,
    /// Answers served from cache.
    pub cache_hits: usize,
}

/// Thread-safe existence cache with TTL and size bound.
#[derive(Debug)]
pub struct TileExistenceCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<BTreeMap<String, (bool, Instant)>>,
}

impl Default for TileExistenceCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl TileExistenceCache {
    /// Creates an empty cache.
    #[must_use]
    pub const fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Cached answer for a path, if present and fresh.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match entries.get(path) {
            Some(&(exists, at)) if at.elapsed() < self.ttl => Some(exists),
            Some(_) => {
                entries.remove(path);
                None
            }
            None => None,
        }
    }

    /// Records an answer, evicting the oldest entries when full.
    pub fn insert(&self, path: &str, exists: bool) {
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(path.to_string(), (exists, Instant::now()));

        while entries.len() > self.max_entries {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            entries.remove(&oldest);
        }
    }

    /// Forgets the cached answers for `paths`, so the next lookup probes
    /// storage again.
    pub fn invalidate(&self, paths: &[String]) {
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for path in paths {
            entries.remove(path);
        }
    }

    /// Drops every cached answer.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    /// Number of cached entries (fresh or stale).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves which of `paths` exist.
    ///
    /// Cached answers are used directly; the rest are probed with at most
    /// `max_in_flight` probes outstanding. Probe errors are logged and
    /// reported as missing without being cached.
    pub async fn probe_all(
        &self,
        paths: &[String],
        probe: &dyn TileProbe,
        max_in_flight: usize,
    ) -> ProbeReport {
        let mut answers: BTreeMap<&str, bool> = BTreeMap::new();
        let mut uncached: Vec<&str> = Vec::new();
        let mut cache_hits = 0;

        for path in paths {
            match self.get(path) {
                Some(exists) => {
                    answers.insert(path, exists);
                    cache_hits += 1;
                }
                None => uncached.push(path),
            }
        }

        if !uncached.is_empty() {
            log::debug!(
                "Probing {} partitions ({cache_hits} cached, concurrency={max_in_flight})",
                uncached.len()
            );
        }

        let results: Vec<(&str, std::io::Result<bool>)> = stream::iter(uncached.into_iter().map(
            |path| async move { (path, probe.exists(path).await) },
        ))
        .buffer_unordered(max_in_flight.max(1))
        .collect()
        .await;

        for (path, result) in results {
            match result {
                Ok(exists) => {
                    self.insert(path, exists);
                    answers.insert(path, exists);
                }
                Err(e) => {
                    log::warn!("Existence probe failed for {path}: {e}");
                    answers.insert(path, false);
                }
            }
        }

        let mut report = ProbeReport {
            cache_hits,
            ..ProbeReport::default()
        };
        for path in paths {
            if answers.get(path.as_str()).copied().unwrap_or(false) {
                report.existing.push(path.clone());
            } else {
                report.missing.push(path.clone());
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct FakeProbe {
        existing: BTreeSet<String>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeProbe {
        fn new(existing: &[&str]) -> Self {
            Self {
                existing: existing.iter().map(|s| (*s).to_string()).collect(),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TileProbe for FakeProbe {
        async fn exists(&self, path: &str) -> std::io::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if path.contains("broken") {
                return Err(std::io::Error::other("boom"));
            }
            Ok(self.existing.contains(path))
        }
    }

    fn paths(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn splits_existing_and_missing_in_input_order() {
        let cache = TileExistenceCache::default();
        let probe = FakeProbe::new(&["c", "a"]);
        let report = cache.probe_all(&paths(&["a", "b", "c", "d"]), &probe, 4).await;
        assert_eq!(report.existing, paths(&["a", "c"]));
        assert_eq!(report.missing, paths(&["b", "d"]));
        assert_eq!(report.cache_hits, 0);
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let cache = TileExistenceCache::default();
        let probe = FakeProbe::new(&["a"]);
        let list = paths(&["a", "b"]);
        cache.probe_all(&list, &probe, 2).await;
        let report = cache.probe_all(&list, &probe, 2).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.cache_hits, 2);
        assert_eq!(report.existing, paths(&["a"]));
    }

    #[tokio::test]
    async fn expired_entries_are_reprobed() {
        let cache = TileExistenceCache::new(Duration::from_millis(1), 10);
        let probe = FakeProbe::new(&["a"]);
        cache.probe_all(&paths(&["a"]), &probe, 1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.probe_all(&paths(&["a"]), &probe, 1).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn in_flight_probes_are_bounded() {
        let cache = TileExistenceCache::default();
        let probe = FakeProbe::new(&[]);
        let list: Vec<String> = (0..20).map(|i| format!("tile-{i}")).collect();
        cache.probe_all(&list, &probe, 3).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 20);
        assert!(probe.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn probe_errors_count_as_missing_and_are_not_cached() {
        let cache = TileExistenceCache::default();
        let probe = FakeProbe::new(&[]);
        let report = cache.probe_all(&paths(&["broken"]), &probe, 1).await;
        assert_eq!(report.missing, paths(&["broken"]));
        assert!(cache.get("broken").is_none());
    }

    #[tokio::test]
    async fn invalidated_paths_are_reprobed() {
        let cache = TileExistenceCache::default();
        let probe = FakeProbe::new(&["a"]);
        let list = paths(&["a", "b"]);
        cache.probe_all(&list, &probe, 2).await;
        cache.invalidate(&paths(&["a"]));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(false));

        let report = cache.probe_all(&list, &probe, 2).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.cache_hits, 1);
        assert_eq!(report.existing, paths(&["a"]));
    }

    #[test]
    fn evicts_oldest_when_full() {
        let cache = TileExistenceCache::new(DEFAULT_TTL, 2);
        cache.insert("a", true);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b", false);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c", true);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(false));
        assert_eq!(cache.get("c"), Some(true));
    }
}
