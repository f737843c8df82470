//! In-process cache of parsed sample tables, extracted stream payloads,
//! session summaries, and activity/athlete pairs.
//!
//! One mutex protects all maps. Entries expire after a TTL; a background
//! sweeper drops expired entries every five minutes and then evicts the
//! oldest entries whenever the cache grows past its size limit. This cache
//! is the only cross-request shared state in the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{ActivityRecord, AthleteProfile, Resolution, SessionSummary};
use crate::sample_table::{SampleTable, StreamKind, StreamPayload};

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default combined size limit across the stream and session maps
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Sweeper wake interval
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Loader invoked on cache misses
pub trait StreamLoader: Send + Sync {
    /// Parse (or fetch and parse) the activity's recording
    fn load_sample_table(&self, activity_id: i64) -> Result<Option<SampleTable>>;

    /// Session summary for the activity's recording
    fn load_session(&self, activity_id: i64, fit_url: &str) -> Result<Option<SessionSummary>>;

    /// Activity row plus owning athlete
    fn load_activity_athlete(
        &self,
        activity_id: i64,
    ) -> Result<Option<(ActivityRecord, AthleteProfile)>>;
}

enum StreamEntry {
    Raw(Arc<SampleTable>),
    Extracted(Arc<Vec<StreamPayload>>),
}

#[derive(Default)]
struct CacheState {
    streams: HashMap<String, StreamEntry>,
    sessions: HashMap<String, Option<SessionSummary>>,
    athletes: HashMap<String, Option<(ActivityRecord, AthleteProfile)>>,
    timestamps: HashMap<String, Instant>,
}

impl CacheState {
    fn is_fresh(&self, key: &str, ttl: Duration, now: Instant) -> bool {
        self.timestamps
            .get(key)
            .map_or(false, |ts| now.duration_since(*ts) <= ttl)
    }

    fn remove(&mut self, key: &str) {
        self.streams.remove(key);
        self.sessions.remove(key);
        self.athletes.remove(key);
        self.timestamps.remove(key);
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub stream_cache_size: usize,
    pub session_cache_size: usize,
    pub athlete_cache_size: usize,
    pub total_cache_entries: usize,
    pub max_cache_size: usize,
    pub cache_ttl_secs: u64,
}

/// TTL + LRU cache of parsed streams, shared across request threads
pub struct StreamCache {
    state: Mutex<CacheState>,
    ttl: Duration,
    max_entries: usize,
    loader: Arc<dyn StreamLoader>,
    sweeper_stop: AtomicBool,
}

impl StreamCache {
    pub fn new(loader: Arc<dyn StreamLoader>) -> Self {
        Self::with_limits(loader, DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_limits(loader: Arc<dyn StreamLoader>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            ttl,
            max_entries,
            loader,
            sweeper_stop: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        // a poisoned mutex only means a panic mid-insert; the maps stay usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Full-resolution parsed table for the activity
    pub fn get_raw(&self, activity_id: i64) -> Result<Option<Arc<SampleTable>>> {
        let key = format!("{}_raw", activity_id);
        let now = Instant::now();
        {
            let state = self.lock();
            if state.is_fresh(&key, self.ttl, now) {
                if let Some(StreamEntry::Raw(table)) = state.streams.get(&key) {
                    return Ok(Some(Arc::clone(table)));
                }
            }
        }

        let loaded = self.loader.load_sample_table(activity_id)?.map(Arc::new);
        if let Some(table) = &loaded {
            let mut state = self.lock();
            state
                .streams
                .insert(key.clone(), StreamEntry::Raw(Arc::clone(table)));
            state.timestamps.insert(key, now);
        }
        Ok(loaded)
    }

    /// Extracted stream payloads for the requested keys at a resolution
    pub fn get_streams(
        &self,
        activity_id: i64,
        keys: &[StreamKind],
        resolution: Resolution,
    ) -> Result<Arc<Vec<StreamPayload>>> {
        let mut sorted: Vec<&'static str> = keys.iter().map(|k| k.wire_name()).collect();
        sorted.sort_unstable();
        let key = format!("{}_{}_{}", activity_id, resolution, sorted.join(","));
        let now = Instant::now();
        {
            let state = self.lock();
            if state.is_fresh(&key, self.ttl, now) {
                if let Some(StreamEntry::Extracted(payloads)) = state.streams.get(&key) {
                    return Ok(Arc::clone(payloads));
                }
            }
        }

        let table = self.get_raw(activity_id)?;
        let payloads: Vec<StreamPayload> = match table {
            Some(table) => keys
                .iter()
                .filter_map(|kind| table.get_stream(*kind, resolution))
                .collect(),
            None => Vec::new(),
        };
        let payloads = Arc::new(payloads);
        let mut state = self.lock();
        state
            .streams
            .insert(key.clone(), StreamEntry::Extracted(Arc::clone(&payloads)));
        state.timestamps.insert(key, now);
        Ok(payloads)
    }

    /// Session summary, cached even when absent
    pub fn get_session(&self, activity_id: i64, fit_url: &str) -> Result<Option<SessionSummary>> {
        let key = format!("session_{}", activity_id);
        let now = Instant::now();
        {
            let state = self.lock();
            if state.is_fresh(&key, self.ttl, now) {
                if let Some(cached) = state.sessions.get(&key) {
                    return Ok(cached.clone());
                }
            }
        }

        let loaded = self.loader.load_session(activity_id, fit_url)?;
        let mut state = self.lock();
        state.sessions.insert(key.clone(), loaded.clone());
        state.timestamps.insert(key, now);
        Ok(loaded)
    }

    /// Activity/athlete pair for the activity
    pub fn get_athlete(
        &self,
        activity_id: i64,
    ) -> Result<Option<(ActivityRecord, AthleteProfile)>> {
        let key = format!("athlete_{}", activity_id);
        let now = Instant::now();
        {
            let state = self.lock();
            if state.is_fresh(&key, self.ttl, now) {
                if let Some(cached) = state.athletes.get(&key) {
                    return Ok(cached.clone());
                }
            }
        }

        let loaded = self.loader.load_activity_athlete(activity_id)?;
        let mut state = self.lock();
        state.athletes.insert(key.clone(), loaded.clone());
        state.timestamps.insert(key, now);
        Ok(loaded)
    }

    /// Drop cached entries for one activity, or everything
    pub fn invalidate(&self, activity_id: Option<i64>) {
        let mut state = self.lock();
        match activity_id {
            None => {
                state.streams.clear();
                state.sessions.clear();
                state.athletes.clear();
                state.timestamps.clear();
                info!("stream cache cleared");
            }
            Some(id) => {
                let prefix = format!("{}_", id);
                let keys: Vec<String> = state
                    .timestamps
                    .keys()
                    .filter(|k| {
                        k.starts_with(&prefix)
                            || **k == format!("session_{}", id)
                            || **k == format!("athlete_{}", id)
                    })
                    .cloned()
                    .collect();
                for key in keys {
                    state.remove(&key);
                }
                debug!(activity_id = id, "stream cache invalidated");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            stream_cache_size: state.streams.len(),
            session_cache_size: state.sessions.len(),
            athlete_cache_size: state.athletes.len(),
            total_cache_entries: state.timestamps.len(),
            max_cache_size: self.max_entries,
            cache_ttl_secs: self.ttl.as_secs(),
        }
    }

    /// One sweep pass: expired entries first, then the oldest entries until
    /// the combined stream+session size is back under the limit.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let mut state = self.lock();

        let expired: Vec<String> = state
            .timestamps
            .iter()
            .filter(|(_, ts)| now.duration_since(**ts) > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }

        let total = state.streams.len() + state.sessions.len();
        if total > self.max_entries {
            let mut by_age: Vec<(String, Instant)> = state
                .timestamps
                .iter()
                .map(|(k, ts)| (k.clone(), *ts))
                .collect();
            by_age.sort_by_key(|(_, ts)| *ts);
            for (key, _) in by_age.into_iter().take(total - self.max_entries) {
                state.remove(&key);
            }
        }
        if !expired.is_empty() {
            debug!(expired = expired.len(), "stream cache sweep");
        }
    }

    /// Request sweeper shutdown; the running sweeper exits within a second
    pub fn stop_sweeper(&self) {
        self.sweeper_stop.store(true, Ordering::SeqCst);
    }

    fn sweeper_stopped(&self) -> bool {
        self.sweeper_stop.load(Ordering::SeqCst)
    }
}

/// Handle to a running sweeper thread
pub struct SweeperHandle {
    cache: Weak<StreamCache>,
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signal shutdown and join the thread
    pub fn stop(mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.stop_sweeper();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn the background sweeper for a shared cache. The thread holds only a
/// weak reference, so dropping the cache also ends the sweeper.
pub fn start_sweeper(cache: &Arc<StreamCache>, interval: Duration) -> SweeperHandle {
    let weak = Arc::downgrade(cache);
    let thread_weak = Weak::clone(&weak);
    let handle = std::thread::Builder::new()
        .name("stream-cache-sweeper".to_string())
        .spawn(move || loop {
            let mut slept = Duration::ZERO;
            while slept < interval {
                std::thread::sleep(Duration::from_secs(1).min(interval));
                slept += Duration::from_secs(1);
                match thread_weak.upgrade() {
                    Some(cache) if !cache.sweeper_stopped() => {}
                    _ => return,
                }
            }
            match thread_weak.upgrade() {
                Some(cache) if !cache.sweeper_stopped() => cache.cleanup_expired(),
                _ => return,
            }
        })
        .expect("spawn sweeper thread");
    SweeperHandle {
        cache: weak,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingLoader {
        table_loads: AtomicUsize,
        session_loads: AtomicUsize,
    }

    impl CountingLoader {
        fn new() -> Self {
            Self {
                table_loads: AtomicUsize::new(0),
                session_loads: AtomicUsize::new(0),
            }
        }
    }

    impl StreamLoader for CountingLoader {
        fn load_sample_table(&self, activity_id: i64) -> Result<Option<SampleTable>> {
            self.table_loads.fetch_add(1, Ordering::SeqCst);
            if activity_id == 404 {
                return Ok(None);
            }
            Ok(Some(SampleTable {
                time: (0..60).collect(),
                power: vec![200; 60],
                ..Default::default()
            }))
        }

        fn load_session(&self, _activity_id: i64, _fit_url: &str) -> Result<Option<SessionSummary>> {
            self.session_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Some(SessionSummary {
                total_distance: Some(42000.0),
                ..Default::default()
            }))
        }

        fn load_activity_athlete(
            &self,
            activity_id: i64,
        ) -> Result<Option<(ActivityRecord, AthleteProfile)>> {
            Ok(Some((
                ActivityRecord::new(activity_id),
                AthleteProfile::new(1),
            )))
        }
    }

    fn cache_with(ttl: Duration, max: usize) -> (Arc<StreamCache>, Arc<CountingLoader>) {
        let loader = Arc::new(CountingLoader::new());
        let cache = Arc::new(StreamCache::with_limits(
            Arc::clone(&loader) as Arc<dyn StreamLoader>,
            ttl,
            max,
        ));
        (cache, loader)
    }

    #[test]
    fn test_raw_table_cached() {
        let (cache, loader) = cache_with(Duration::from_secs(60), 10);
        cache.get_raw(1).unwrap().unwrap();
        cache.get_raw(1).unwrap().unwrap();
        assert_eq!(loader.table_loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_table_not_cached() {
        let (cache, loader) = cache_with(Duration::from_secs(60), 10);
        assert!(cache.get_raw(404).unwrap().is_none());
        assert!(cache.get_raw(404).unwrap().is_none());
        assert_eq!(loader.table_loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ttl_expiry_reloads() {
        let (cache, loader) = cache_with(Duration::from_millis(10), 10);
        cache.get_raw(1).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        cache.get_raw(1).unwrap();
        assert_eq!(loader.table_loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_get_streams_extracts_and_caches() {
        let (cache, loader) = cache_with(Duration::from_secs(60), 10);
        let payloads = cache
            .get_streams(1, &[StreamKind::Power, StreamKind::HeartRate], Resolution::High)
            .unwrap();
        // heart rate column is empty in the stub table
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].stream_type, "watts");

        cache
            .get_streams(1, &[StreamKind::Power, StreamKind::HeartRate], Resolution::High)
            .unwrap();
        assert_eq!(loader.table_loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_session_cached() {
        let (cache, loader) = cache_with(Duration::from_secs(60), 10);
        cache.get_session(1, "file:///a.fit").unwrap();
        cache.get_session(1, "file:///a.fit").unwrap();
        assert_eq!(loader.session_loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidate_single_activity() {
        let (cache, loader) = cache_with(Duration::from_secs(60), 10);
        cache.get_raw(1).unwrap();
        cache.get_raw(2).unwrap();
        cache.get_session(1, "u").unwrap();
        cache.invalidate(Some(1));

        cache.get_raw(1).unwrap();
        cache.get_raw(2).unwrap();
        // activity 1 reloaded, activity 2 still cached
        assert_eq!(loader.table_loads.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats().session_cache_size, 0);
    }

    #[test]
    fn test_sweep_evicts_expired_then_oldest() {
        let (cache, _) = cache_with(Duration::from_secs(60), 2);
        for id in 1..=4 {
            cache.get_raw(id).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        cache.cleanup_expired();

        let stats = cache.stats();
        assert_eq!(stats.stream_cache_size, 2);
        // activity 1 was the oldest entry
        let state = cache.lock();
        assert!(!state.streams.contains_key("1_raw"));
        assert!(state.streams.contains_key("4_raw"));
    }

    #[test]
    fn test_sweeper_thread_stops() {
        let (cache, _) = cache_with(Duration::from_secs(60), 10);
        let handle = start_sweeper(&cache, Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(20));
        handle.stop();
    }

    #[test]
    fn test_stats_shape() {
        let (cache, _) = cache_with(Duration::from_secs(60), 10);
        cache.get_raw(1).unwrap();
        cache.get_session(1, "u").unwrap();
        let stats = cache.stats();
        assert_eq!(stats.stream_cache_size, 1);
        assert_eq!(stats.session_cache_size, 1);
        assert_eq!(stats.total_cache_entries, 2);
        assert_eq!(stats.max_cache_size, 10);
    }
}
