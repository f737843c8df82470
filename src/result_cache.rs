//! On-disk result cache for assembled activity responses, indexed in
//! tb_activity_cache.
//!
//! Files live at `<cache_dir>/<activity_id>_<cache_key>.json` and hold the
//! composite response verbatim. At most one active index row exists per
//! activity; storing under a new key supersedes older keys. Invalidation
//! marks rows inactive and deletes files best-effort.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::database::Database;

/// Cache manager for one cache directory
#[derive(Debug, Clone)]
pub struct ResultCache {
    cache_dir: PathBuf,
}

impl ResultCache {
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache key: md5 hex of `activity_{id}_` plus the sorted `k=v&...`
    /// string over the recognized parameters (resolution, keys).
    pub fn generate_key(
        &self,
        activity_id: i64,
        resolution: Option<&str>,
        keys: Option<&str>,
    ) -> String {
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(keys) = keys {
            params.push(("keys", keys));
        }
        if let Some(resolution) = resolution {
            params.push(("resolution", resolution));
        }
        params.sort_by_key(|(k, _)| *k);
        let param_str: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let cache_input = format!("activity_{}_{}", activity_id, param_str.join("&"));
        format!("{:x}", md5::compute(cache_input.as_bytes()))
    }

    fn file_path(&self, activity_id: i64, cache_key: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}_{}.json", activity_id, cache_key))
    }

    /// Look up the active index row and read the file's JSON document.
    /// `None` when the row is missing, the file is absent, or unreadable.
    pub fn get_cache(&self, db: &mut Database, activity_id: i64, cache_key: &str) -> Option<Value> {
        let row = db.get_active_cache_row(activity_id, cache_key).ok()??;
        let raw = match fs::read_to_string(&row.file_path) {
            Ok(raw) => raw,
            Err(_) => {
                warn!(activity_id, file = %row.file_path, "cache file missing");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                info!(activity_id, cache_key, "result cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(activity_id, error = %e, "unreadable cache file");
                None
            }
        }
    }

    /// Serialize the response to disk and upsert the activity's index row.
    /// Returns false (after logging) on any failure; the response itself is
    /// unaffected.
    pub fn set_cache(
        &self,
        db: &mut Database,
        activity_id: i64,
        cache_key: &str,
        data: &Value,
        metadata: Option<&Value>,
    ) -> bool {
        let mut write = || -> crate::error::Result<()> {
            fs::create_dir_all(&self.cache_dir)?;
            let path = self.file_path(activity_id, cache_key);
            let body = serde_json::to_vec_pretty(data).map_err(std::io::Error::other)?;
            fs::write(&path, &body)?;

            let metadata_str = metadata.map(|m| m.to_string());
            db.upsert_cache_row(
                activity_id,
                cache_key,
                &path.to_string_lossy(),
                body.len() as i64,
                metadata_str.as_deref(),
                Utc::now().naive_utc(),
            )?;
            Ok(())
        };
        match write() {
            Ok(()) => {
                debug!(activity_id, cache_key, "result cache stored");
                true
            }
            Err(e) => {
                warn!(activity_id, error = %e, "result cache write failed");
                false
            }
        }
    }

    /// Deactivate every index row for the activity and delete the files
    /// best-effort.
    pub fn invalidate(&self, db: &mut Database, activity_id: i64) -> bool {
        match db.deactivate_cache_rows(activity_id, Utc::now().naive_utc()) {
            Ok(rows) => {
                for row in rows {
                    let _ = fs::remove_file(&row.file_path);
                }
                info!(activity_id, "result cache invalidated");
                true
            }
            Err(e) => {
                warn!(activity_id, error = %e, "result cache invalidation failed");
                false
            }
        }
    }

    /// Invalidate the whole cache
    pub fn invalidate_all(&self, db: &mut Database) -> bool {
        match db.deactivate_all_cache_rows(Utc::now().naive_utc()) {
            Ok(rows) => {
                for row in rows {
                    let _ = fs::remove_file(&row.file_path);
                }
                info!("result cache fully invalidated");
                true
            }
            Err(e) => {
                warn!(error = %e, "result cache invalidation failed");
                false
            }
        }
    }

    /// Extract a single metric from the latest active composite document
    /// (used by per-metric endpoints to avoid re-analysis)
    pub fn get_cached_metric(
        &self,
        db: &mut Database,
        activity_id: i64,
        metric_name: &str,
    ) -> Option<Value> {
        let row = db.latest_active_cache_row(activity_id).ok()??;
        let raw = fs::read_to_string(&row.file_path).ok()?;
        let document: Value = serde_json::from_str(&raw).ok()?;
        let metric = document.get(metric_name)?;
        if metric.is_null() {
            return None;
        }
        debug!(activity_id, metric_name, "metric cache hit");
        Some(metric.clone())
    }

    /// Whether a usable cached document exists for the activity
    pub fn has_cache(&self, db: &mut Database, activity_id: i64) -> bool {
        db.latest_active_cache_row(activity_id)
            .ok()
            .flatten()
            .map_or(false, |row| Path::new(&row.file_path).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ResultCache, Database) {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path());
        let db = Database::in_memory().unwrap();
        (dir, cache, db)
    }

    #[test]
    fn test_generate_key_is_md5_of_sorted_params() {
        let (_dir, cache, _db) = setup();
        let key = cache.generate_key(7, Some("high"), Some("watts,heartrate"));
        let expected = format!(
            "{:x}",
            md5::compute("activity_7_keys=watts,heartrate&resolution=high".as_bytes())
        );
        assert_eq!(key, expected);

        // omitted params vanish from the digest input
        let bare = cache.generate_key(7, None, None);
        assert_eq!(bare, format!("{:x}", md5::compute("activity_7_".as_bytes())));
        assert_ne!(key, bare);
    }

    #[test]
    fn test_cache_roundtrip() {
        let (_dir, cache, mut db) = setup();
        let payload = json!({"a": 1});
        assert!(cache.set_cache(&mut db, 1, "k1", &payload, None));
        assert_eq!(cache.get_cache(&mut db, 1, "k1"), Some(payload));

        assert!(cache.invalidate(&mut db, 1));
        assert_eq!(cache.get_cache(&mut db, 1, "k1"), None);
        assert!(!cache.file_path(1, "k1").exists());
    }

    #[test]
    fn test_get_cache_null_when_file_deleted_underneath() {
        let (_dir, cache, mut db) = setup();
        cache.set_cache(&mut db, 2, "k", &json!({"x": true}), None);
        fs::remove_file(cache.file_path(2, "k")).unwrap();
        assert_eq!(cache.get_cache(&mut db, 2, "k"), None);
    }

    #[test]
    fn test_new_key_supersedes_old() {
        let (_dir, cache, mut db) = setup();
        cache.set_cache(&mut db, 3, "old", &json!({"v": 1}), None);
        cache.set_cache(&mut db, 3, "new", &json!({"v": 2}), None);
        assert_eq!(cache.get_cache(&mut db, 3, "old"), None);
        assert_eq!(cache.get_cache(&mut db, 3, "new"), Some(json!({"v": 2})));
    }

    #[test]
    fn test_get_cached_metric() {
        let (_dir, cache, mut db) = setup();
        let composite = json!({
            "overall": {"distance": 42.5},
            "power": {"normalized_power": 231},
            "temp": null,
        });
        cache.set_cache(&mut db, 4, "k", &composite, None);

        assert_eq!(
            cache.get_cached_metric(&mut db, 4, "power"),
            Some(json!({"normalized_power": 231}))
        );
        // null sections read as absent
        assert_eq!(cache.get_cached_metric(&mut db, 4, "temp"), None);
        assert_eq!(cache.get_cached_metric(&mut db, 4, "zones"), None);
        assert_eq!(cache.get_cached_metric(&mut db, 99, "power"), None);
    }

    #[test]
    fn test_invalidate_all() {
        let (_dir, cache, mut db) = setup();
        cache.set_cache(&mut db, 1, "a", &json!(1), None);
        cache.set_cache(&mut db, 2, "b", &json!(2), None);
        assert!(cache.invalidate_all(&mut db));
        assert!(!cache.has_cache(&mut db, 1));
        assert!(!cache.has_cache(&mut db, 2));
    }

    #[test]
    fn test_has_cache() {
        let (_dir, cache, mut db) = setup();
        assert!(!cache.has_cache(&mut db, 5));
        cache.set_cache(&mut db, 5, "k", &json!({}), None);
        assert!(cache.has_cache(&mut db, 5));
    }
}
