//! Activity service: the single entry point orchestrating ingest, metric
//! assembly, interval detection, personal records, training-load rollup,
//! and both cache tiers.
//!
//! The service itself is stateless across requests; the stream cache is the
//! only shared in-memory state and every database method commits per call.
//! Side effects of one analysis run land in a fixed order: sample table,
//! personal records, best-curve file, activity TSS, athlete rollup, result
//! cache. Failures in the record/rollup/cache steps are logged and never
//! abort the response.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::database::Database;
use crate::derived;
use crate::error::{AnalyticsError, Result};
use crate::ftp::estimate_ftp;
use crate::ingest::native::NativeIngest;
use crate::ingest::provider::{self, ProviderTransport};
use crate::ingest::{ActivitySource, UploadFetcher};
use crate::intervals::{
    detect_intervals, summarize_window, IntervalDetectionResult, IntervalSummary,
};
use crate::intervals_store::IntervalsStore;
use crate::metrics::{assemble_metrics, AllActivityData, MetricInputs};
use crate::models::{
    ActivityRecord, AthleteProfile, BestPowerCurveRecord, Resolution, SessionSummary,
};
use crate::pmc;
use crate::power::best_powers_from_curve;
use crate::records::{self, BestCurveStore};
use crate::result_cache::ResultCache;
use crate::sample_table::{SampleTable, StreamKind, StreamPayload};
use crate::stream_cache::{start_sweeper, StreamCache, StreamLoader, SweeperHandle, SWEEP_INTERVAL};
use crate::zones::{
    analyze_heartrate_zones, analyze_heartrate_zones_lthr, analyze_power_zones, ZoneData,
};

/// Stream names never exposed through the streams endpoints
const HIDDEN_STREAMS: [&str; 3] = ["left_right_balance", "position_lat", "position_long"];

/// Request for a full analysis
#[derive(Debug, Clone)]
pub struct AllDataRequest {
    pub activity_id: i64,

    /// Raw comma-separated stream keys as supplied by the caller; `None`
    /// means the default full set
    pub keys: Option<String>,
    pub resolution: Resolution,
}

impl AllDataRequest {
    pub fn new(activity_id: i64) -> Self {
        Self {
            activity_id,
            keys: None,
            resolution: Resolution::High,
        }
    }
}

/// One interval in the wire response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalItem {
    pub start: i64,
    pub end: i64,
    pub duration: i64,
    pub classification: String,
    pub average_power: f64,
    pub peak_power: f64,
    pub normalized_power: f64,
    pub intensity_factor: f64,
    pub power_ratio: f64,
    pub time_above_95: f64,
    pub time_above_106: f64,
    pub time_above_120: f64,
    pub time_above_150: f64,
    pub heart_rate_avg: Option<f64>,
    pub heart_rate_max: Option<i64>,
    pub heart_rate_slope: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Full intervals response persisted per activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalsResponse {
    pub duration: i64,
    pub ftp: f64,
    pub items: Vec<IntervalItem>,
}

/// Reduced interval form for the simple endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleInterval {
    pub start: i64,
    pub end: i64,
    pub duration: i64,
    pub classification: String,
    pub avg_power: f64,
    pub power_ratio: f64,
}

/// Per-metric endpoint names
pub const METRIC_NAMES: [&str; 10] = [
    "overall",
    "power",
    "heartrate",
    "cadence",
    "speed",
    "altitude",
    "temp",
    "training_effect",
    "best_power",
    "zones",
];

/// Loader bridging the stream cache to the native ingest and repositories
struct CacheLoader {
    db: Arc<Mutex<Database>>,
    ingest: NativeIngest,
}

impl CacheLoader {
    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StreamLoader for CacheLoader {
    fn load_sample_table(&self, activity_id: i64) -> Result<Option<SampleTable>> {
        let (activity, athlete) = {
            let mut db = self.db();
            let Some(activity) = db.get_activity(activity_id)? else {
                return Ok(None);
            };
            let athlete = match activity.athlete_id {
                Some(id) => db.get_athlete(id)?,
                None => None,
            };
            (activity, athlete)
        };
        let Some(url) = activity.upload_fit_url.as_deref() else {
            return Ok(None);
        };
        let (mut table, _session) = self.ingest.load_from_url(url)?;
        derived::enrich(&mut table, athlete.as_ref());
        Ok(Some(table))
    }

    fn load_session(&self, _activity_id: i64, fit_url: &str) -> Result<Option<SessionSummary>> {
        let (_table, session) = self.ingest.load_from_url(fit_url)?;
        Ok(session)
    }

    fn load_activity_athlete(
        &self,
        activity_id: i64,
    ) -> Result<Option<(ActivityRecord, AthleteProfile)>> {
        let mut db = self.db();
        let Some(pair) = db.get_activity_athlete(activity_id)? else {
            return Ok(None);
        };
        Ok(Some(pair))
    }
}

/// Long-lived service value; create once at startup, share behind an Arc
pub struct ActivityService {
    db: Arc<Mutex<Database>>,
    stream_cache: Arc<StreamCache>,
    result_cache: ResultCache,
    intervals_store: IntervalsStore,
    best_curves: BestCurveStore,
    config: Mutex<AppConfig>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl ActivityService {
    pub fn new(config: AppConfig, db: Database, fetcher: Arc<dyn UploadFetcher>) -> Arc<Self> {
        let db = Arc::new(Mutex::new(db));
        let loader = Arc::new(CacheLoader {
            db: Arc::clone(&db),
            ingest: NativeIngest::new(fetcher),
        });
        let stream_cache = Arc::new(StreamCache::with_limits(
            loader,
            Duration::from_secs(config.stream_cache_ttl_secs),
            config.stream_cache_max_entries,
        ));
        Arc::new(Self {
            db,
            stream_cache,
            result_cache: ResultCache::new(&config.cache_dir),
            intervals_store: IntervalsStore::new(config.intervals_dir()),
            best_curves: BestCurveStore::new(config.best_power_dir()),
            config: Mutex::new(config),
            sweeper: Mutex::new(None),
        })
    }

    /// Start the stream-cache sweeper. Call once after construction.
    pub fn init(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if sweeper.is_none() {
            *sweeper = Some(start_sweeper(&self.stream_cache, SWEEP_INTERVAL));
        }
    }

    /// Drain the sweeper on shutdown
    pub fn shutdown(&self) {
        let handle = {
            let mut sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
            sweeper.take()
        };
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cache_enabled(&self) -> bool {
        self.config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cache_enabled
    }

    // ---- cache administration ----

    pub fn cache_status(&self) -> Value {
        let enabled = self.cache_enabled();
        let stats = self.stream_cache.stats();
        serde_json::json!({
            "cache_enabled": enabled,
            "stream_cache": stats,
        })
    }

    pub fn set_cache_enabled(&self, enabled: bool) -> Result<bool> {
        let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        config.set_cache_enabled(enabled)?;
        Ok(config.cache_enabled)
    }

    /// Invalidate one activity's caches, or everything
    pub fn invalidate_cache(&self, activity_id: Option<i64>) -> bool {
        self.stream_cache.invalidate(activity_id);
        let mut db = self.db();
        match activity_id {
            Some(id) => self.result_cache.invalidate(&mut db, id),
            None => self.result_cache.invalidate_all(&mut db),
        }
    }

    // ---- source resolution ----

    fn resolve_activity(&self, activity_id: i64) -> Result<ActivityRecord> {
        let mut db = self.db();
        if let Some(activity) = db.get_activity(activity_id)? {
            return Ok(activity);
        }
        if let Some(activity) = db.get_activity_by_external_id(activity_id)? {
            return Ok(activity);
        }
        Err(AnalyticsError::NotFound(format!("activity {}", activity_id)))
    }

    fn athlete_for(&self, activity: &ActivityRecord) -> Result<Option<AthleteProfile>> {
        match activity.athlete_id {
            Some(id) => Ok(self.db().get_athlete(id)?),
            None => Ok(None),
        }
    }

    // ---- full analysis ----

    /// Full analysis of one activity. A provider transport selects the
    /// provider source; otherwise the native recording is used. Returns
    /// `None` when the athlete has no FTP and no best-curve history to
    /// estimate one from.
    pub fn get_all_data(
        &self,
        request: &AllDataRequest,
        provider: Option<&dyn ProviderTransport>,
    ) -> Result<Option<Value>> {
        let cache_key = self.result_cache.generate_key(
            request.activity_id,
            Some(request.resolution.as_str()),
            request.keys.as_deref(),
        );
        if self.cache_enabled() {
            let mut db = self.db();
            if let Some(cached) = self.result_cache.get_cache(&mut db, request.activity_id, &cache_key)
            {
                return Ok(Some(cached));
            }
        }

        let activity = self.resolve_activity(request.activity_id)?;
        let athlete = self.athlete_for(&activity)?;

        let source = if provider.is_some() {
            ActivitySource::Provider
        } else {
            ActivitySource::Native
        };
        info!(activity_id = activity.id, source = ?source, "analysis started");

        let prepared = match provider {
            Some(transport) => self.prepare_provider(&activity, athlete, transport)?,
            None => match self.prepare_native(&activity, athlete)? {
                Some(prepared) => prepared,
                None => return Ok(None),
            },
        };

        let composite = self.analyze(&activity, prepared, request)?;
        let document = serde_json::to_value(&composite)
            .map_err(|e| AnalyticsError::Internal(e.to_string()))?;

        if self.cache_enabled() {
            let mut db = self.db();
            self.result_cache
                .set_cache(&mut db, activity.id, &cache_key, &document, None);
        }
        Ok(Some(document))
    }

    fn prepare_provider(
        &self,
        activity: &ActivityRecord,
        athlete: Option<AthleteProfile>,
        transport: &dyn ProviderTransport,
    ) -> Result<PreparedActivity> {
        let external_id = activity.external_id.unwrap_or(activity.id);
        let fetch = provider::fetch_full(transport, external_id, None)?;

        // adopt provider thresholds for this run only
        let mut athlete = athlete.unwrap_or_else(|| {
            AthleteProfile::new(activity.athlete_id.unwrap_or_default())
        });
        if athlete.effective_ftp().is_none() {
            athlete.ftp = fetch.athlete.ftp;
        }
        if athlete.max_heartrate.is_none() {
            athlete.max_heartrate = fetch.athlete.max_heartrate.map(|v| v as i64);
        }
        if athlete.weight.is_none() {
            athlete.weight = fetch.athlete.weight;
        }

        let mut table = fetch.table;
        derived::enrich(&mut table, Some(&athlete));

        Ok(PreparedActivity {
            table: Arc::new(table),
            session: Some(fetch.activity.to_session_summary()),
            athlete,
            weighted_average_watts: fetch.activity.weighted_average_watts,
        })
    }

    fn prepare_native(
        &self,
        activity: &ActivityRecord,
        athlete: Option<AthleteProfile>,
    ) -> Result<Option<PreparedActivity>> {
        let mut athlete =
            athlete.unwrap_or_else(|| AthleteProfile::new(activity.athlete_id.unwrap_or_default()));

        let mut estimated_ftp = false;
        if athlete.effective_ftp().is_none() {
            let curve = self.best_curves.load(athlete.id);
            let estimate = estimate_ftp(curve.as_deref());
            match estimate.rounded_ftp() {
                Some(ftp) => {
                    info!(
                        athlete_id = athlete.id,
                        ftp,
                        confidence = %estimate.confidence,
                        "ftp estimated from best-curve history"
                    );
                    athlete.ftp = Some(ftp);
                    estimated_ftp = true;
                }
                // first activity, no history: the caller reports "not
                // enough history"
                None => return Ok(None),
            }
        }

        let Some(table) = self.stream_cache.get_raw(activity.id)? else {
            return Err(AnalyticsError::NotFound(format!(
                "no recording for activity {}",
                activity.id
            )));
        };

        // the cached table was enriched against the stored profile; an
        // estimated FTP means its W' columns were built without one
        let table = if estimated_ftp {
            let mut owned = (*table).clone();
            owned.w_balance.clear();
            derived::enrich(&mut owned, Some(&athlete));
            Arc::new(owned)
        } else {
            table
        };

        let session = match activity.upload_fit_url.as_deref() {
            Some(url) => self.stream_cache.get_session(activity.id, url)?,
            None => None,
        };

        Ok(Some(PreparedActivity {
            table,
            session,
            athlete,
            weighted_average_watts: None,
        }))
    }

    /// Steps 5-11 of the analysis flow, shared by both sources
    fn analyze(
        &self,
        activity: &ActivityRecord,
        prepared: PreparedActivity,
        request: &AllDataRequest,
    ) -> Result<AllActivityData> {
        let PreparedActivity {
            table,
            session,
            athlete,
            weighted_average_watts,
        } = prepared;

        let inputs = MetricInputs {
            table: table.as_ref(),
            session: session.as_ref(),
            athlete: Some(&athlete),
            weighted_average_watts,
        };
        let mut composite = assemble_metrics(&inputs);

        // efficiency factor write-back is best-effort
        if let Some(heartrate) = &composite.heartrate {
            if activity.efficiency_factor != heartrate.efficiency_index {
                if let Err(e) = self
                    .db()
                    .update_activity_efficiency_factor(activity.id, heartrate.efficiency_index)
                {
                    warn!(activity_id = activity.id, error = %e, "efficiency factor write failed");
                }
            }
        }

        composite.zones = self.compute_zones(&table, &athlete);
        composite.streams = Some(self.extract_streams(&table, request)?);

        // interval detection runs on full-resolution power
        let detection = detect_intervals(
            &table.time,
            &table.power,
            athlete.effective_ftp(),
            if table.heart_rate.is_empty() {
                None
            } else {
                Some(table.heart_rate.as_slice())
            },
            effective_lthr(&athlete),
            athlete.max_heartrate.map(|v| v as f64),
            None,
        );
        if !detection.intervals.is_empty() {
            let response = build_interval_response(&detection, &table, &athlete);
            if let Err(e) = self.intervals_store.save(activity.id, &response) {
                warn!(activity_id = activity.id, error = %e, "intervals save failed");
            }
        }

        // personal records and the best-curve file are best-effort
        self.merge_personal_records(activity, &athlete, &table, session.as_ref(), &mut composite);

        // this activity's TSS, then the athlete rollup
        let tss = composite.overall.as_ref().and_then(|o| o.training_load);
        if let Some(tss) = tss.filter(|t| *t > 0) {
            if activity.tss != Some(tss) {
                if let Err(e) = self.db().update_activity_tss(activity.id, tss) {
                    warn!(activity_id = activity.id, error = %e, "tss write failed");
                }
            }
        }
        let reference = activity
            .start_date
            .unwrap_or_else(|| Utc::now().naive_utc());
        match pmc::update_athlete_status(&mut self.db(), athlete.id, reference) {
            Ok(rollup) => {
                if let Some(overall) = composite.overall.as_mut() {
                    overall.status = Some(rollup.tsb);
                }
            }
            Err(e) => warn!(athlete_id = athlete.id, error = %e, "rollup failed"),
        }

        Ok(composite)
    }

    fn compute_zones(&self, table: &SampleTable, athlete: &AthleteProfile) -> Option<Vec<ZoneData>> {
        let mut zones = Vec::new();
        if let Some(ftp) = athlete.effective_ftp() {
            let buckets = analyze_power_zones(&table.power, ftp);
            if !buckets.is_empty() {
                zones.push(ZoneData {
                    distribution_buckets: buckets,
                    zone_type: "power".to_string(),
                });
            }
        }
        let hr_buckets = match effective_lthr(athlete) {
            Some(lthr) => analyze_heartrate_zones_lthr(&table.heart_rate, lthr as i64),
            None => match athlete.max_heartrate {
                Some(max_hr) => analyze_heartrate_zones(&table.heart_rate, max_hr),
                None => Vec::new(),
            },
        };
        if !hr_buckets.is_empty() {
            zones.push(ZoneData {
                distribution_buckets: hr_buckets,
                zone_type: "heartrate".to_string(),
            });
        }
        if zones.is_empty() {
            None
        } else {
            Some(zones)
        }
    }

    fn extract_streams(
        &self,
        table: &SampleTable,
        request: &AllDataRequest,
    ) -> Result<Vec<StreamPayload>> {
        let kinds = match &request.keys {
            Some(raw) => parse_stream_keys(raw)?,
            None => table
                .available_streams()
                .into_iter()
                .filter(|k| !HIDDEN_STREAMS.contains(&k.wire_name()))
                .collect(),
        };
        Ok(kinds
            .into_iter()
            .filter_map(|kind| table.get_stream(kind, request.resolution))
            .collect())
    }

    fn merge_personal_records(
        &self,
        activity: &ActivityRecord,
        athlete: &AthleteProfile,
        table: &SampleTable,
        session: Option<&SessionSummary>,
        composite: &mut AllActivityData,
    ) {
        let best_powers: Vec<(&'static str, i64)> = best_powers_from_curve(&table.best_power);
        if !best_powers.is_empty() {
            composite.best_powers = Some(
                best_powers
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect::<BTreeMap<String, i64>>(),
            );
        }

        let result = (|| -> Result<()> {
            let mut segment_records = Vec::new();
            {
                let mut db = self.db();
                let mut row = db.get_or_create_power_records(athlete.id)?;
                segment_records.extend(records::update_best_powers(
                    &mut row,
                    &best_powers,
                    activity.id,
                ));

                let distance_m = table.distance.last().copied().unwrap_or(0.0) as i64;
                if distance_m > 0 {
                    segment_records
                        .extend(records::update_longest_ride(&mut row, distance_m, activity.id));
                }
                let elevation_m = session
                    .and_then(|s| s.total_ascent)
                    .unwrap_or_else(|| crate::altitude::elevation_gain(&table.altitude) as i64);
                if elevation_m > 0 {
                    segment_records.extend(records::update_max_elevation_gain(
                        &mut row,
                        elevation_m,
                        activity.id,
                    ));
                }
                db.save_power_records(&row)?;
            }

            if !table.best_power.is_empty() {
                let merged = self
                    .best_curves
                    .update_with_activity_curve(athlete.id, &table.best_power)?;
                composite.best_power_record = Some(BestPowerCurveRecord {
                    athlete_id: athlete.id,
                    length: merged.len(),
                    best_curve: merged,
                });
            }

            if !segment_records.is_empty() {
                composite.segment_records = Some(segment_records);
            }
            Ok(())
        })();
        if let Err(e) = result {
            warn!(activity_id = activity.id, error = %e, "personal records update failed");
        }
    }

    // ---- per-metric endpoints ----

    /// One metric section, reading from the cached composite unless a
    /// recalculation is forced
    pub fn get_metric(
        &self,
        activity_id: i64,
        metric: &str,
        force_recalculate: bool,
        provider: Option<&dyn ProviderTransport>,
    ) -> Result<Value> {
        if !METRIC_NAMES.contains(&metric) {
            return Err(AnalyticsError::BadRequest(format!(
                "unknown metric: {}",
                metric
            )));
        }
        let section = if metric == "best_power" {
            "best_powers"
        } else {
            metric
        };

        if !force_recalculate {
            let mut db = self.db();
            if let Some(value) = self.result_cache.get_cached_metric(&mut db, activity_id, section)
            {
                return Ok(value);
            }
        }

        let document = self
            .get_all_data(&AllDataRequest::new(activity_id), provider)?
            .ok_or_else(|| {
                AnalyticsError::NotFound(format!("no analysis available for {}", activity_id))
            })?;
        document
            .get(section)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| {
                AnalyticsError::NotFound(format!("{} data for activity {}", metric, activity_id))
            })
    }

    /// Zone buckets for one source stream
    pub fn get_zones(&self, activity_id: i64, zone_type: &str) -> Result<ZoneData> {
        if !matches!(zone_type, "power" | "heartrate") {
            return Err(AnalyticsError::BadRequest(format!(
                "unknown zone type: {}",
                zone_type
            )));
        }
        let zones = self.get_metric(activity_id, "zones", false, None)?;
        let zones: Vec<ZoneData> = serde_json::from_value(zones)
            .map_err(|e| AnalyticsError::Internal(e.to_string()))?;
        zones
            .into_iter()
            .find(|z| z.zone_type == zone_type)
            .ok_or_else(|| {
                AnalyticsError::NotFound(format!(
                    "{} zones for activity {}",
                    zone_type, activity_id
                ))
            })
    }

    // ---- streams endpoints ----

    /// Stream names with non-trivial data
    pub fn available_streams(&self, activity_id: i64) -> Result<Vec<String>> {
        let Some(table) = self.stream_cache.get_raw(activity_id)? else {
            return Err(AnalyticsError::NotFound(format!(
                "no recording for activity {}",
                activity_id
            )));
        };
        Ok(table
            .available_streams()
            .into_iter()
            .map(|k| k.wire_name().to_string())
            .filter(|name| !HIDDEN_STREAMS.contains(&name.as_str()))
            .collect())
    }

    /// One stream payload
    pub fn get_stream(
        &self,
        activity_id: i64,
        key: &str,
        resolution: Resolution,
    ) -> Result<StreamPayload> {
        let kind = StreamKind::from_wire(key)?;
        let payloads = self
            .stream_cache
            .get_streams(activity_id, &[kind], resolution)?;
        payloads.first().cloned().ok_or_else(|| {
            AnalyticsError::NotFound(format!("stream {} for activity {}", key, activity_id))
        })
    }

    /// Multiple stream payloads in one call
    pub fn get_multi_streams(
        &self,
        activity_id: i64,
        keys: &[String],
        resolution: Resolution,
    ) -> Result<Vec<StreamPayload>> {
        let kinds: Vec<StreamKind> = keys
            .iter()
            .map(|k| StreamKind::from_wire(k))
            .collect::<Result<_>>()?;
        Ok(self
            .stream_cache
            .get_streams(activity_id, &kinds, resolution)?
            .as_ref()
            .clone())
    }

    // ---- intervals endpoints ----

    /// Saved intervals for an activity; NotFound when no prior analysis
    /// persisted them
    pub fn get_intervals(&self, activity_id: i64) -> Result<IntervalsResponse> {
        self.intervals_store.load(activity_id).ok_or_else(|| {
            AnalyticsError::NotFound(format!("no intervals saved for activity {}", activity_id))
        })
    }

    /// Reduced interval form, two decimals on the power fields
    pub fn get_intervals_simple(&self, activity_id: i64) -> Result<Vec<SimpleInterval>> {
        let response = self.get_intervals(activity_id)?;
        Ok(response
            .items
            .iter()
            .map(|item| SimpleInterval {
                start: item.start,
                end: item.end,
                duration: item.duration,
                classification: item.classification.clone(),
                avg_power: (item.average_power * 100.0).round() / 100.0,
                power_ratio: (item.power_ratio * 100.0).round() / 100.0,
            })
            .collect())
    }

    /// Detect intervals from the native recording right now, persisting the
    /// result
    pub fn detect_and_save_intervals(&self, activity_id: i64) -> Result<IntervalsResponse> {
        let activity = self.resolve_activity(activity_id)?;
        let athlete = self
            .athlete_for(&activity)?
            .unwrap_or_else(|| AthleteProfile::new(0));
        let Some(table) = self.stream_cache.get_raw(activity.id)? else {
            return Err(AnalyticsError::NotFound(format!(
                "no recording for activity {}",
                activity.id
            )));
        };
        let detection = detect_intervals(
            &table.time,
            &table.power,
            athlete.effective_ftp(),
            if table.heart_rate.is_empty() {
                None
            } else {
                Some(table.heart_rate.as_slice())
            },
            effective_lthr(&athlete),
            athlete.max_heartrate.map(|v| v as f64),
            None,
        );
        let response = build_interval_response(&detection, &table, &athlete);
        self.intervals_store.save(activity.id, &response)?;
        Ok(response)
    }

    /// Rollup for an arbitrary day (daily-state endpoint)
    pub fn update_daily_state(
        &self,
        athlete_id: i64,
        date: chrono::NaiveDate,
    ) -> Result<crate::models::DailyState> {
        pmc::update_daily_state(&mut self.db(), athlete_id, date, Utc::now().naive_utc())
    }
}

impl Drop for ActivityService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct PreparedActivity {
    table: Arc<SampleTable>,
    session: Option<SessionSummary>,
    athlete: AthleteProfile,
    weighted_average_watts: Option<i64>,
}

/// LTHR applies only when threshold zoning is active
fn effective_lthr(athlete: &AthleteProfile) -> Option<f64> {
    if athlete.is_threshold_active {
        athlete.threshold_heartrate.map(|v| v as f64)
    } else {
        None
    }
}

/// Parse a comma-separated key list, rejecting unknown names. `latlng`
/// expands into the latitude/longitude pair.
pub fn parse_stream_keys(raw: &str) -> Result<Vec<StreamKind>> {
    let mut kinds = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part == "latlng" {
            kinds.push(StreamKind::Latitude);
            kinds.push(StreamKind::Longitude);
            continue;
        }
        kinds.push(StreamKind::from_wire(part)?);
    }
    Ok(kinds)
}

fn summary_to_item(summary: &IntervalSummary, timeline: &[i64]) -> IntervalItem {
    let (start, end) = if timeline.is_empty() {
        (summary.start, summary.end)
    } else {
        let n = timeline.len() as i64;
        let start_idx = summary.start.clamp(0, n - 1) as usize;
        let end_idx = summary.end.clamp(start_idx as i64 + 1, n) as usize;
        (timeline[start_idx], timeline[end_idx - 1] + 1)
    };
    IntervalItem {
        start,
        end,
        duration: (end - start).max(summary.duration()),
        classification: summary.classification.as_str().to_string(),
        average_power: summary.average_power,
        peak_power: summary.peak_power,
        normalized_power: summary.normalized_power,
        intensity_factor: summary.intensity_factor,
        power_ratio: summary.power_ratio,
        time_above_95: summary.time_above_95,
        time_above_106: summary.time_above_106,
        time_above_120: summary.time_above_120,
        time_above_150: summary.time_above_150,
        heart_rate_avg: summary.heart_rate_avg,
        heart_rate_max: summary.heart_rate_max,
        heart_rate_slope: summary.heart_rate_slope,
        metadata: summary.metadata.clone(),
    }
}

/// Assemble the wire response: final intervals plus summarized repeat
/// blocks, sorted by start
pub fn build_interval_response(
    detection: &IntervalDetectionResult,
    table: &SampleTable,
    athlete: &AthleteProfile,
) -> IntervalsResponse {
    let timeline = &table.time;
    let mut items: Vec<IntervalItem> = detection
        .intervals
        .iter()
        .map(|summary| summary_to_item(summary, timeline))
        .collect();

    let hr = if table.heart_rate.is_empty() {
        None
    } else {
        Some(table.heart_rate.as_slice())
    };
    for block in &detection.repeats {
        let start_idx = timeline.partition_point(|t| *t < block.start) as i64;
        let end_idx = timeline.partition_point(|t| *t < block.end) as i64;
        let mut summary = summarize_window(
            &table.power,
            hr,
            detection.ftp,
            start_idx,
            end_idx,
            effective_lthr(athlete),
            athlete.max_heartrate.map(|v| v as f64),
        );
        summary.classification = block.classification();
        summary.metadata.insert(
            "cycles".to_string(),
            serde_json::to_value(&block.cycles).unwrap_or(Value::Null),
        );
        let mut item = summary_to_item(&summary, timeline);
        item.start = block.start;
        item.end = block.end;
        item.duration = block.end - block.start;
        items.push(item);
    }
    items.sort_by_key(|item| item.start);

    IntervalsResponse {
        duration: detection.duration,
        ftp: detection.ftp,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_keys() {
        let kinds = parse_stream_keys("watts, heartrate,latlng").unwrap();
        assert_eq!(
            kinds,
            vec![
                StreamKind::Power,
                StreamKind::HeartRate,
                StreamKind::Latitude,
                StreamKind::Longitude,
            ]
        );
        assert!(parse_stream_keys("watts,bogus").is_err());
    }

    #[test]
    fn test_build_interval_response_sorted() {
        let power = vec![150i64; 300];
        let timestamps: Vec<i64> = (0..300).collect();
        let detection = detect_intervals(
            &timestamps,
            &power,
            Some(250.0),
            None,
            None,
            None,
            None,
        );
        let table = SampleTable {
            time: timestamps,
            power,
            ..Default::default()
        };
        let response = build_interval_response(&detection, &table, &AthleteProfile::new(1));
        assert!(!response.items.is_empty());
        for pair in response.items.windows(2) {
            assert!(pair[0].start <= pair[1].start);
        }
        assert_eq!(response.ftp, 250.0);
    }
}
