//! Athlete personal records: top-3 slots per power window, longest ride,
//! max elevation gain, and the on-disk best-power curve file.
//!
//! Record updates are idempotent: promotion requires a strictly greater
//! value, so re-running the same activity never shifts ranks, and the
//! curve merge is an element-wise max.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::SegmentRecord;
use crate::power::RECORD_WINDOWS;

/// Three record slots, each holding (value, source activity id)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopThree {
    pub first: Option<(i64, i64)>,
    pub second: Option<(i64, i64)>,
    pub third: Option<(i64, i64)>,
}

impl TopThree {
    /// Try to place `value` into the slots. On improvement at rank R the
    /// lower ranks shift down. Returns `(rank, previous_value)` when the
    /// value entered the top-3. Ties never displace the first-seen holder,
    /// and a value this activity already holds is a no-op so re-running an
    /// analysis cannot double-count.
    pub fn promote(&mut self, value: i64, activity_id: i64) -> Option<(u8, Option<i64>)> {
        if [self.first, self.second, self.third]
            .iter()
            .any(|slot| *slot == Some((value, activity_id)))
        {
            return None;
        }
        let beats = |slot: &Option<(i64, i64)>| slot.map_or(true, |(v, _)| value > v);

        if beats(&self.first) {
            let prev = self.first.map(|(v, _)| v);
            self.third = self.second;
            self.second = self.first;
            self.first = Some((value, activity_id));
            Some((1, prev))
        } else if beats(&self.second) {
            let prev = self.second.map(|(v, _)| v);
            self.third = self.second;
            self.second = Some((value, activity_id));
            Some((2, prev))
        } else if beats(&self.third) {
            let prev = self.third.map(|(v, _)| v);
            self.third = Some((value, activity_id));
            Some((3, prev))
        } else {
            None
        }
    }
}

/// All record slots stored for one athlete
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerRecordsRow {
    pub athlete_id: i64,

    /// Keyed by record window name ("5s" .. "60m")
    pub powers: HashMap<String, TopThree>,
    pub longest_ride: TopThree,
    pub max_elevation: TopThree,
}

impl PowerRecordsRow {
    pub fn new(athlete_id: i64) -> Self {
        Self {
            athlete_id,
            powers: RECORD_WINDOWS
                .iter()
                .map(|(name, _)| (name.to_string(), TopThree::default()))
                .collect(),
            longest_ride: TopThree::default(),
            max_elevation: TopThree::default(),
        }
    }
}

fn segment_record(
    name: String,
    value: i64,
    rank: u8,
    activity_id: i64,
    record_type: &str,
    unit: &str,
    prev: Option<i64>,
) -> SegmentRecord {
    SegmentRecord {
        segment_name: name,
        current_value: value,
        rank,
        activity_id,
        record_type: record_type.to_string(),
        unit: unit.to_string(),
        previous_record: prev,
        improvement: prev.map_or(value, |p| value - p),
    }
}

/// Apply this activity's per-window bests to the athlete's record row.
/// Returns the promotions for response surfacing.
pub fn update_best_powers(
    row: &mut PowerRecordsRow,
    best_powers: &[(&str, i64)],
    activity_id: i64,
) -> Vec<SegmentRecord> {
    let mut promotions = Vec::new();
    for (interval, value) in best_powers {
        let Some(top) = row.powers.get_mut(*interval) else {
            continue;
        };
        if let Some((rank, prev)) = top.promote(*value, activity_id) {
            promotions.push(segment_record(
                format!("best_power_{}", interval),
                *value,
                rank,
                activity_id,
                "power",
                "W",
                prev,
            ));
        }
    }
    promotions
}

/// Top-3 update for ride distance in meters
pub fn update_longest_ride(
    row: &mut PowerRecordsRow,
    distance_m: i64,
    activity_id: i64,
) -> Option<SegmentRecord> {
    row.longest_ride.promote(distance_m, activity_id).map(|(rank, prev)| {
        segment_record(
            "longest_ride".to_string(),
            distance_m,
            rank,
            activity_id,
            "distance",
            "m",
            prev,
        )
    })
}

/// Top-3 update for elevation gain in meters
pub fn update_max_elevation_gain(
    row: &mut PowerRecordsRow,
    elevation_m: i64,
    activity_id: i64,
) -> Option<SegmentRecord> {
    row.max_elevation.promote(elevation_m, activity_id).map(|(rank, prev)| {
        segment_record(
            "max_elevation_gain".to_string(),
            elevation_m,
            rank,
            activity_id,
            "elevation",
            "m",
            prev,
        )
    })
}

/// Element-wise max merge of a stored curve with one activity's curve,
/// extended to the longer length (missing indices count as 0)
pub fn merge_curves(existing: &[i64], activity_curve: &[i64]) -> Vec<i64> {
    let m = existing.len().max(activity_curve.len());
    (0..m)
        .map(|i| {
            let a = existing.get(i).copied().unwrap_or(0);
            let b = activity_curve.get(i).copied().unwrap_or(0);
            a.max(b)
        })
        .collect()
}

/// On-disk payload of a per-athlete best-curve document
#[derive(Debug, Serialize, Deserialize)]
struct BestCurveDocument {
    athlete_id: i64,
    updated_at: String,
    best_curve: Vec<i64>,
}

/// File-backed store for per-athlete best-power curves
/// (`<base>/<athlete_id>.json`). Writes go through a temp file + rename so
/// concurrent readers never observe a torn document.
#[derive(Debug, Clone)]
pub struct BestCurveStore {
    base_dir: PathBuf,
}

impl BestCurveStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn file_path(&self, athlete_id: i64) -> PathBuf {
        self.base_dir.join(format!("{}.json", athlete_id))
    }

    /// Load the stored curve; `None` when the athlete has no history or the
    /// file does not parse.
    pub fn load(&self, athlete_id: i64) -> Option<Vec<i64>> {
        let path = self.file_path(athlete_id);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<BestCurveDocument>(&raw) {
            Ok(doc) if !doc.best_curve.is_empty() => Some(doc.best_curve),
            Ok(_) => None,
            Err(e) => {
                warn!(athlete_id, error = %e, "unreadable best-curve document");
                None
            }
        }
    }

    /// Overwrite the stored curve atomically
    pub fn save(&self, athlete_id: i64, curve: &[i64]) -> Result<()> {
        fs::create_dir_all(&self.base_dir)?;
        let doc = BestCurveDocument {
            athlete_id,
            updated_at: Utc::now().to_rfc3339(),
            best_curve: curve.to_vec(),
        };
        let path = self.file_path(athlete_id);
        let tmp = self.base_dir.join(format!(".{}.json.tmp", athlete_id));
        fs::write(&tmp, serde_json::to_vec(&doc).map_err(std::io::Error::other)?)?;
        fs::rename(&tmp, &path)?;
        debug!(athlete_id, length = curve.len(), "best-curve saved");
        Ok(())
    }

    /// Merge one activity's curve into the stored curve and persist.
    /// Returns the merged curve.
    pub fn update_with_activity_curve(
        &self,
        athlete_id: i64,
        activity_curve: &[i64],
    ) -> Result<Vec<i64>> {
        let existing = self.load(athlete_id).unwrap_or_default();
        let merged = merge_curves(&existing, activity_curve);
        self.save(athlete_id, &merged)?;
        Ok(merged)
    }
}
