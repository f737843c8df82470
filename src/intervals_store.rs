//! File store for per-activity interval analysis results
//! (`<dir>/<activity_id>.json`). The intervals endpoint serves these files;
//! absence means no prior analysis was saved.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct IntervalsStore {
    dir: PathBuf,
}

impl IntervalsStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn file_path(&self, activity_id: i64) -> PathBuf {
        self.dir.join(format!("{}.json", activity_id))
    }

    /// Persist an intervals response document
    pub fn save<T: Serialize>(&self, activity_id: i64, response: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_vec_pretty(response).map_err(std::io::Error::other)?;
        fs::write(self.file_path(activity_id), body)?;
        debug!(activity_id, "intervals saved");
        Ok(())
    }

    /// Load a previously saved document; `None` when absent or unreadable
    pub fn load<T: DeserializeOwned>(&self, activity_id: i64) -> Option<T> {
        let path = self.file_path(activity_id);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(activity_id, error = %e, "unreadable intervals file");
                None
            }
        }
    }

    /// Delete the stored document; succeeds when already absent
    pub fn delete(&self, activity_id: i64) -> Result<()> {
        let path = self.file_path(activity_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn exists(&self, activity_id: i64) -> bool {
        self.file_path(activity_id).exists()
    }
}
