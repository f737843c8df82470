//! Provider stream ingest: decode the provider's JSON payloads into a
//! [`SampleTable`], upsampling low-resolution streams onto a per-second
//! timeline.
//!
//! The HTTP client itself is an external collaborator behind
//! [`ProviderTransport`]; each transport call must carry a 10 s default
//! timeout. This module owns everything after the bytes arrive.

use chrono::NaiveDateTime;
use serde_json::Value;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::models::Resolution;
use crate::sample_table::SampleTable;

/// Streams requested from the provider for a full analysis
pub const FULL_STREAM_KEYS: [&str; 11] = [
    "time",
    "distance",
    "latlng",
    "altitude",
    "velocity_smooth",
    "heartrate",
    "cadence",
    "watts",
    "temp",
    "moving",
    "grade_smooth",
];

/// Average inter-sample spacing beyond which a stream counts as
/// low-resolution, in seconds
const LOW_RESOLUTION_SPACING: f64 = 5.0;

/// External provider client interface. Implementations sit outside the
/// core (OAuth refresh, HTTP, JSON shapes) and surface non-200 responses
/// as [`IngestError::ProviderStatus`].
pub trait ProviderTransport: Send + Sync {
    /// `GET /activities/{id}`
    fn get_activity(&self, external_id: i64) -> Result<Value>;

    /// `GET /activities/{id}/streams?keys=...&resolution=...`
    fn get_streams(&self, external_id: i64, keys: &[&str], resolution: Resolution)
        -> Result<Value>;

    /// `GET /athlete`
    fn get_athlete(&self) -> Result<Value>;
}

/// Activity-level fields consumed by the metric assemblers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderActivity {
    pub external_id: i64,
    pub moving_time: i64,
    pub elapsed_time: i64,
    pub distance: Option<f64>,
    pub average_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub total_elevation_gain: Option<f64>,
    pub elev_high: Option<f64>,
    pub elev_low: Option<f64>,
    pub average_watts: Option<f64>,
    pub max_watts: Option<i64>,
    pub weighted_average_watts: Option<i64>,
    pub calories: Option<f64>,
    pub average_heartrate: Option<f64>,
    pub max_heartrate: Option<i64>,
    pub start_date: Option<NaiveDateTime>,
    pub sport_type: String,
}

impl ProviderActivity {
    /// The provider activity document is itself a set of pre-aggregated
    /// totals; expose it in the shape the metric assemblers prefer.
    pub fn to_session_summary(&self) -> crate::models::SessionSummary {
        crate::models::SessionSummary {
            total_distance: self.distance,
            total_timer_time: Some(self.moving_time),
            total_elapsed_time: Some(self.elapsed_time),
            avg_speed: self.average_speed,
            max_speed: self.max_speed,
            total_ascent: self.total_elevation_gain.map(|v| v as i64),
            total_descent: None,
            avg_heart_rate: self.average_heartrate.map(|v| v as i64),
            max_heart_rate: self.max_heartrate,
            avg_power: self.average_watts.map(|v| v as i64),
            max_power: self.max_watts,
            avg_cadence: None,
            max_cadence: None,
            max_altitude: self.elev_high.map(|v| v as i64),
            total_calories: self.calories.map(|v| v as i64),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.sport_type.to_ascii_lowercase().as_str(),
            "run" | "trail_run" | "virtual_run"
        )
    }
}

/// Athlete fields adopted from the provider when the local profile is
/// incomplete
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderAthlete {
    pub ftp: Option<f64>,
    pub max_heartrate: Option<f64>,
    pub lthr: Option<f64>,
    pub weight: Option<f64>,
}

/// Everything one full provider fetch yields
#[derive(Debug, Clone)]
pub struct ProviderFetch {
    pub activity: ProviderActivity,
    pub athlete: ProviderAthlete,
    pub table: SampleTable,
    pub resolution: Resolution,
}

/// Resolution the provider is asked for: medium for long activities to
/// stay under the provider's point cap
pub fn choose_resolution(moving_time_seconds: i64) -> Resolution {
    if moving_time_seconds > 10000 {
        Resolution::Medium
    } else {
        Resolution::High
    }
}

/// Fetch activity + streams + athlete and adapt them into a sample table
pub fn fetch_full(
    transport: &dyn ProviderTransport,
    external_id: i64,
    resolution_override: Option<Resolution>,
) -> Result<ProviderFetch> {
    let activity_json = transport.get_activity(external_id)?;
    let activity = decode_activity(external_id, &activity_json)?;

    let resolution = resolution_override.unwrap_or_else(|| choose_resolution(activity.moving_time));
    let mut streams = transport.get_streams(external_id, &FULL_STREAM_KEYS, resolution)?;

    if is_low_resolution(&streams) {
        streams = upsample_low_resolution(streams, activity.moving_time);
    }
    let table = decode_streams(&streams, activity.is_running())?;

    let athlete_json = transport.get_athlete()?;
    let athlete = decode_athlete(&athlete_json);

    debug!(
        external_id,
        samples = table.len(),
        resolution = %resolution,
        "provider fetch complete"
    );
    Ok(ProviderFetch {
        activity,
        athlete,
        table,
        resolution,
    })
}

fn get_f64(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

fn get_i64(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

/// Decode the activity document; `moving_time` is required because the
/// upsampler and TSS both hinge on it.
pub fn decode_activity(external_id: i64, json: &Value) -> Result<ProviderActivity> {
    let moving_time = get_i64(json, "moving_time").ok_or(IngestError::MissingField {
        field: "moving_time".to_string(),
    })?;
    let start_date = json
        .get("start_date")
        .and_then(Value::as_str)
        .and_then(parse_provider_datetime);

    Ok(ProviderActivity {
        external_id,
        moving_time,
        elapsed_time: get_i64(json, "elapsed_time").unwrap_or(moving_time),
        distance: get_f64(json, "distance"),
        average_speed: get_f64(json, "average_speed"),
        max_speed: get_f64(json, "max_speed"),
        total_elevation_gain: get_f64(json, "total_elevation_gain"),
        elev_high: get_f64(json, "elev_high"),
        elev_low: get_f64(json, "elev_low"),
        average_watts: get_f64(json, "average_watts"),
        max_watts: get_i64(json, "max_watts"),
        weighted_average_watts: get_i64(json, "weighted_average_watts"),
        calories: get_f64(json, "calories"),
        average_heartrate: get_f64(json, "average_heartrate"),
        max_heartrate: get_i64(json, "max_heartrate"),
        start_date,
        sport_type: json
            .get("sport_type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    })
}

/// Provider timestamps come as ISO8601 with a trailing Z
fn parse_provider_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S").ok()
}

pub fn decode_athlete(json: &Value) -> ProviderAthlete {
    ProviderAthlete {
        ftp: get_f64(json, "ftp"),
        max_heartrate: get_f64(json, "max_heartrate"),
        lthr: get_f64(json, "lthr"),
        weight: get_f64(json, "weight"),
    }
}

fn stream_data<'a>(streams: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    streams.get(key)?.get("data")?.as_array()
}

/// A stream is low resolution when its first few time deltas average more
/// than five seconds
pub fn is_low_resolution(streams: &Value) -> bool {
    let Some(time) = stream_data(streams, "time") else {
        return false;
    };
    if time.len() <= 1 {
        return false;
    }
    let mut deltas = Vec::new();
    for pair in time.windows(2).take(4) {
        if let (Some(a), Some(b)) = (pair[0].as_f64(), pair[1].as_f64()) {
            let delta = b - a;
            if delta > 0.0 {
                deltas.push(delta);
            }
        }
    }
    if deltas.is_empty() {
        return false;
    }
    deltas.iter().sum::<f64>() / deltas.len() as f64 > LOW_RESOLUTION_SPACING
}

fn upsample_series(data: &[Value], target_size: usize) -> Vec<Value> {
    if data.is_empty() || data.len() >= target_size {
        return data.to_vec();
    }
    let step = data.len() as f64 / target_size as f64;
    (0..target_size)
        .map(|i| {
            let idx = ((i as f64 * step) as usize).min(data.len() - 1);
            data[idx].clone()
        })
        .collect()
}

/// Zero-order-hold every stream to `moving_time + 1` points. Skipped
/// entirely when `moving_time` is not positive (aborted activities report
/// zero; the no-op keeps their streams untouched).
pub fn upsample_low_resolution(streams: Value, moving_time_seconds: i64) -> Value {
    if moving_time_seconds <= 0 {
        return streams;
    }
    let target_size = (moving_time_seconds + 1) as usize;
    let Value::Object(map) = streams else {
        return streams;
    };
    let mut out = serde_json::Map::new();
    for (key, item) in map {
        let upsampled = match item.get("data").and_then(Value::as_array) {
            Some(data) => {
                let up = upsample_series(data, target_size);
                let mut entry = item.as_object().cloned().unwrap_or_default();
                entry.insert("original_size".to_string(), Value::from(data.len()));
                entry.insert("upsampled_size".to_string(), Value::from(up.len()));
                entry.insert("data".to_string(), Value::Array(up));
                Value::Object(entry)
            }
            None => item,
        };
        out.insert(key, upsampled);
    }
    Value::Object(out)
}

fn to_i64_series(data: &[Value]) -> Vec<i64> {
    data.iter()
        .map(|v| v.as_f64().map(|f| f as i64).unwrap_or(0))
        .collect()
}

fn to_f64_series(data: &[Value]) -> Vec<f64> {
    data.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect()
}

/// Adapt the keyed stream document into a sample table. Running cadence is
/// doubled (the provider reports single-leg steps); `latlng` pairs split
/// into the latitude/longitude columns.
pub fn decode_streams(streams: &Value, is_running: bool) -> Result<SampleTable> {
    if !streams.is_object() {
        return Err(IngestError::InvalidStream {
            stream: "streams".to_string(),
            reason: "expected keyed stream object".to_string(),
        }
        .into());
    }

    let mut table = SampleTable::default();
    if let Some(data) = stream_data(streams, "time") {
        table.time = to_i64_series(data);
        table.elapsed_time = table.time.clone();
    }
    if let Some(data) = stream_data(streams, "distance") {
        table.distance = to_f64_series(data);
    }
    if let Some(data) = stream_data(streams, "altitude") {
        table.altitude = to_f64_series(data);
    }
    if let Some(data) = stream_data(streams, "velocity_smooth") {
        table.speed = to_f64_series(data);
    }
    if let Some(data) = stream_data(streams, "heartrate") {
        table.heart_rate = to_i64_series(data);
    }
    if let Some(data) = stream_data(streams, "cadence") {
        table.cadence = to_i64_series(data);
        if is_running {
            for c in table.cadence.iter_mut() {
                *c *= 2;
            }
        }
    }
    if let Some(data) = stream_data(streams, "watts") {
        table.power = to_i64_series(data);
    }
    if let Some(data) = stream_data(streams, "temp") {
        table.temperature = to_f64_series(data);
    }
    if let Some(data) = stream_data(streams, "moving") {
        table.moving = data
            .iter()
            .map(|v| match v {
                Value::Bool(b) => *b as i64,
                other => other.as_i64().unwrap_or(0),
            })
            .collect();
    }
    if let Some(data) = stream_data(streams, "grade_smooth") {
        table.grade_smooth = to_f64_series(data);
    }
    if let Some(data) = stream_data(streams, "latlng") {
        for pair in data {
            match pair.as_array() {
                Some(p) if p.len() >= 2 => {
                    table.latitude.push(p[0].as_f64().unwrap_or(0.0));
                    table.longitude.push(p[1].as_f64().unwrap_or(0.0));
                }
                _ => {
                    table.latitude.push(0.0);
                    table.longitude.push(0.0);
                }
            }
        }
    }
    Ok(table)
}
