//! Canonical per-second, time-aligned columnar representation of one
//! activity's streams.
//!
//! A table is constructed by exactly one ingest (provider or native), then
//! enriched once with derived columns, after which it is treated as
//! read-only. Every non-empty column has the same length as the sample
//! count.

use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};
use crate::models::Resolution;

/// All stream columns a table may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Time,
    Distance,
    Altitude,
    Cadence,
    HeartRate,
    Speed,
    Latitude,
    Longitude,
    Power,
    Temperature,
    Moving,
    GradeSmooth,
    BestPower,
    PowerHrRatio,
    ElapsedTime,
    Torque,
    Spi,
    WBalance,
    Vam,
}

impl StreamKind {
    /// Name used in wire payloads (the client vocabulary)
    pub fn wire_name(self) -> &'static str {
        match self {
            StreamKind::Time => "time",
            StreamKind::Distance => "distance",
            StreamKind::Altitude => "altitude",
            StreamKind::Cadence => "cadence",
            StreamKind::HeartRate => "heartrate",
            StreamKind::Speed => "speed",
            StreamKind::Latitude => "latitude",
            StreamKind::Longitude => "longitude",
            StreamKind::Power => "watts",
            StreamKind::Temperature => "temp",
            StreamKind::Moving => "moving",
            StreamKind::GradeSmooth => "grade_smooth",
            StreamKind::BestPower => "best_power",
            StreamKind::PowerHrRatio => "power_hr_ratio",
            StreamKind::ElapsedTime => "elapsed_time",
            StreamKind::Torque => "torque",
            StreamKind::Spi => "spi",
            StreamKind::WBalance => "w_balance",
            StreamKind::Vam => "vam",
        }
    }

    /// Parse a caller-supplied stream key. Accepts both the wire vocabulary
    /// (`watts`, `heartrate`, `temp`, `velocity_smooth`) and internal column
    /// names (`power`, `heart_rate`, `temperature`).
    pub fn from_wire(key: &str) -> Result<Self> {
        match key.trim() {
            "time" | "timestamp" => Ok(StreamKind::Time),
            "distance" => Ok(StreamKind::Distance),
            "altitude" => Ok(StreamKind::Altitude),
            "cadence" => Ok(StreamKind::Cadence),
            "heartrate" | "heart_rate" => Ok(StreamKind::HeartRate),
            "speed" | "velocity_smooth" => Ok(StreamKind::Speed),
            "latitude" => Ok(StreamKind::Latitude),
            "longitude" => Ok(StreamKind::Longitude),
            "watts" | "power" => Ok(StreamKind::Power),
            "temp" | "temperature" => Ok(StreamKind::Temperature),
            "moving" => Ok(StreamKind::Moving),
            "grade_smooth" => Ok(StreamKind::GradeSmooth),
            "best_power" => Ok(StreamKind::BestPower),
            "power_hr_ratio" => Ok(StreamKind::PowerHrRatio),
            "elapsed_time" => Ok(StreamKind::ElapsedTime),
            "torque" => Ok(StreamKind::Torque),
            "spi" => Ok(StreamKind::Spi),
            "w_balance" => Ok(StreamKind::WBalance),
            "vam" => Ok(StreamKind::Vam),
            other => Err(AnalyticsError::BadRequest(format!(
                "unknown stream key: {}",
                other
            ))),
        }
    }
}

/// Column values carried by a stream payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamValues {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl StreamValues {
    pub fn len(&self) -> usize {
        match self {
            StreamValues::Int(v) => v.len(),
            StreamValues::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One stream as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamPayload {
    #[serde(rename = "type")]
    pub stream_type: String,
    pub data: StreamValues,
    pub series_type: String,
    pub original_size: usize,
    pub resolution: Resolution,
}

/// Columnar container of one activity's samples plus derived columns.
///
/// Empty vectors mean the column is absent. Base columns are filled by an
/// ingest; derived columns by [`crate::derived`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleTable {
    /// Seconds from activity start, strictly increasing from 0
    pub time: Vec<i64>,

    /// Cumulative distance in meters, non-decreasing
    pub distance: Vec<f64>,

    /// Altitude in meters
    pub altitude: Vec<f64>,

    /// Pedal cadence in rpm
    pub cadence: Vec<i64>,

    /// Heart rate in bpm
    pub heart_rate: Vec<i64>,

    /// Speed in m/s
    pub speed: Vec<f64>,

    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,

    /// Power in watts
    pub power: Vec<i64>,

    /// Temperature in Celsius
    pub temperature: Vec<f64>,

    /// Provider moving flag (1 = moving)
    pub moving: Vec<i64>,

    /// Provider smoothed grade in percent
    pub grade_smooth: Vec<f64>,

    /// Best average power for each window length 1..=n
    pub best_power: Vec<i64>,

    /// Watts per bpm, two decimals
    pub power_hr_ratio: Vec<f64>,

    /// Cumulative moving seconds (pauses removed)
    pub elapsed_time: Vec<i64>,

    /// Torque in N·m
    pub torque: Vec<i64>,

    /// Watts per revolution, two decimals
    pub spi: Vec<f64>,

    /// W' balance in kJ, one decimal
    pub w_balance: Vec<f64>,

    /// Vertical ascent rate in m/h
    pub vam: Vec<i64>,
}

fn any_nonzero_i(v: &[i64]) -> bool {
    v.iter().any(|x| *x != 0)
}

fn any_nonzero_f(v: &[f64]) -> bool {
    v.iter().any(|x| *x != 0.0)
}

impl SampleTable {
    /// Number of samples in the table
    pub fn len(&self) -> usize {
        if !self.time.is_empty() {
            return self.time.len();
        }
        self.power
            .len()
            .max(self.heart_rate.len())
            .max(self.distance.len())
            .max(self.speed.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Columns that actually carry data, honoring the dependency rules:
    /// `power_hr_ratio` needs power and heart rate, `spi`/`torque` need
    /// power and cadence, `w_balance` needs power, `vam` needs altitude,
    /// `best_power` needs power. Axis columns (time, distance,
    /// elapsed_time) are not listed.
    pub fn available_streams(&self) -> Vec<StreamKind> {
        let has_power = any_nonzero_i(&self.power);
        let has_hr = any_nonzero_i(&self.heart_rate);
        let has_cadence = any_nonzero_i(&self.cadence);
        let has_altitude = any_nonzero_f(&self.altitude);

        let mut available = Vec::new();
        if has_altitude {
            available.push(StreamKind::Altitude);
        }
        if has_cadence {
            available.push(StreamKind::Cadence);
        }
        if has_hr {
            available.push(StreamKind::HeartRate);
        }
        if any_nonzero_f(&self.speed) {
            available.push(StreamKind::Speed);
        }
        if any_nonzero_f(&self.latitude) {
            available.push(StreamKind::Latitude);
        }
        if any_nonzero_f(&self.longitude) {
            available.push(StreamKind::Longitude);
        }
        if has_power {
            available.push(StreamKind::Power);
        }
        if any_nonzero_f(&self.temperature) {
            available.push(StreamKind::Temperature);
        }
        if any_nonzero_i(&self.moving) {
            available.push(StreamKind::Moving);
        }
        if any_nonzero_f(&self.grade_smooth) {
            available.push(StreamKind::GradeSmooth);
        }
        if has_power && any_nonzero_i(&self.best_power) {
            available.push(StreamKind::BestPower);
        }
        if has_power && has_hr && any_nonzero_f(&self.power_hr_ratio) {
            available.push(StreamKind::PowerHrRatio);
        }
        if has_power && has_cadence {
            available.push(StreamKind::Torque);
            available.push(StreamKind::Spi);
        }
        if has_power && any_nonzero_f(&self.w_balance) {
            available.push(StreamKind::WBalance);
        }
        if has_altitude && any_nonzero_i(&self.vam) {
            available.push(StreamKind::Vam);
        }
        available
    }

    /// Extract one stream at the requested resolution.
    ///
    /// Returns `None` when the column is empty. `best_power` is never
    /// downsampled. Speed payloads are converted to km/h with one decimal.
    pub fn get_stream(&self, kind: StreamKind, resolution: Resolution) -> Option<StreamPayload> {
        let (values, series_type) = match kind {
            StreamKind::Time => (StreamValues::Int(self.time.clone()), "time"),
            StreamKind::Distance => (StreamValues::Float(self.distance.clone()), "distance"),
            StreamKind::Altitude => (StreamValues::Float(self.altitude.clone()), "time"),
            StreamKind::Cadence => (StreamValues::Int(self.cadence.clone()), "time"),
            StreamKind::HeartRate => (StreamValues::Int(self.heart_rate.clone()), "time"),
            StreamKind::Speed => (
                StreamValues::Float(
                    self.speed
                        .iter()
                        .map(|v| (v * 3.6 * 10.0).round() / 10.0)
                        .collect(),
                ),
                "time",
            ),
            StreamKind::Latitude => (StreamValues::Float(self.latitude.clone()), "time"),
            StreamKind::Longitude => (StreamValues::Float(self.longitude.clone()), "time"),
            StreamKind::Power => (StreamValues::Int(self.power.clone()), "time"),
            StreamKind::Temperature => (StreamValues::Float(self.temperature.clone()), "time"),
            StreamKind::Moving => (StreamValues::Int(self.moving.clone()), "time"),
            StreamKind::GradeSmooth => (StreamValues::Float(self.grade_smooth.clone()), "time"),
            StreamKind::BestPower => (StreamValues::Int(self.best_power.clone()), "time"),
            StreamKind::PowerHrRatio => {
                (StreamValues::Float(self.power_hr_ratio.clone()), "time")
            }
            StreamKind::ElapsedTime => (StreamValues::Int(self.elapsed_time.clone()), "time"),
            StreamKind::Torque => (StreamValues::Int(self.torque.clone()), "time"),
            StreamKind::Spi => (StreamValues::Float(self.spi.clone()), "time"),
            StreamKind::WBalance => (StreamValues::Float(self.w_balance.clone()), "time"),
            StreamKind::Vam => (StreamValues::Int(self.vam.clone()), "time"),
        };

        if values.is_empty() {
            return None;
        }
        let original_size = values.len();

        // best_power always ships at full resolution
        let (data, effective_resolution) = if kind == StreamKind::BestPower {
            (values, Resolution::High)
        } else {
            (resample(values, resolution), resolution)
        };

        Some(StreamPayload {
            stream_type: kind.wire_name().to_string(),
            data,
            series_type: series_type.to_string(),
            original_size,
            resolution: effective_resolution,
        })
    }

    /// Moving seconds of the activity (falls back to the sample count)
    pub fn moving_seconds(&self) -> i64 {
        self.elapsed_time
            .last()
            .copied()
            .unwrap_or_else(|| self.len() as i64)
    }
}

/// Keep `fraction` of the points at a regular stride, truncated to the
/// target length. High resolution returns the data as stored.
fn resample(values: StreamValues, resolution: Resolution) -> StreamValues {
    if resolution == Resolution::High {
        return values;
    }
    match values {
        StreamValues::Int(v) => StreamValues::Int(resample_vec(v, resolution)),
        StreamValues::Float(v) => StreamValues::Float(resample_vec(v, resolution)),
    }
}

fn resample_vec<T: Copy>(data: Vec<T>, resolution: Resolution) -> Vec<T> {
    let n = data.len();
    if n == 0 {
        return data;
    }
    let target = ((n as f64 * resolution.sample_fraction()) as usize).max(1);
    let step = (n / target).max(1);
    data.into_iter()
        .step_by(step)
        .take(target)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_power_hr() -> SampleTable {
        SampleTable {
            time: (0..100).collect(),
            power: vec![200; 100],
            heart_rate: vec![140; 100],
            cadence: vec![90; 100],
            ..Default::default()
        }
    }

    #[test]
    fn test_available_streams_dependency_rules() {
        let mut table = table_with_power_hr();
        table.power_hr_ratio = vec![1.43; 100];
        table.w_balance = vec![20.0; 100];
        table.vam = vec![100; 100];

        let available = table.available_streams();
        assert!(available.contains(&StreamKind::Power));
        assert!(available.contains(&StreamKind::HeartRate));
        assert!(available.contains(&StreamKind::PowerHrRatio));
        assert!(available.contains(&StreamKind::Torque));
        assert!(available.contains(&StreamKind::Spi));
        assert!(available.contains(&StreamKind::WBalance));
        // vam requires altitude data, which is absent
        assert!(!available.contains(&StreamKind::Vam));
        // axis columns never listed
        assert!(!available.contains(&StreamKind::Time));
    }

    #[test]
    fn test_available_streams_requires_nonzero() {
        let table = SampleTable {
            time: (0..10).collect(),
            power: vec![0; 10],
            ..Default::default()
        };
        assert!(table.available_streams().is_empty());
    }

    #[test]
    fn test_ratio_absent_without_heart_rate() {
        let mut table = table_with_power_hr();
        table.heart_rate = vec![0; 100];
        table.power_hr_ratio = vec![1.0; 100];
        let available = table.available_streams();
        assert!(!available.contains(&StreamKind::PowerHrRatio));
    }

    #[test]
    fn test_resample_medium_keeps_quarter() {
        let table = SampleTable {
            time: (0..1000).collect(),
            power: (0..1000).collect(),
            ..Default::default()
        };
        let payload = table
            .get_stream(StreamKind::Power, Resolution::Medium)
            .unwrap();
        assert_eq!(payload.data.len(), 250);
        assert_eq!(payload.original_size, 1000);
        match payload.data {
            StreamValues::Int(v) => {
                assert_eq!(v[0], 0);
                assert_eq!(v[1], 4);
            }
            _ => panic!("power stream must be integer"),
        }
    }

    #[test]
    fn test_resample_low_keeps_one_in_twenty() {
        let table = SampleTable {
            time: (0..1000).collect(),
            power: vec![5; 1000],
            ..Default::default()
        };
        let payload = table.get_stream(StreamKind::Power, Resolution::Low).unwrap();
        assert_eq!(payload.data.len(), 50);
    }

    #[test]
    fn test_best_power_never_downsampled() {
        let mut table = table_with_power_hr();
        table.best_power = (1..=100).rev().collect();
        let payload = table
            .get_stream(StreamKind::BestPower, Resolution::Low)
            .unwrap();
        assert_eq!(payload.data.len(), 100);
        assert_eq!(payload.resolution, Resolution::High);
    }

    #[test]
    fn test_speed_payload_in_kmh() {
        let table = SampleTable {
            time: vec![0, 1],
            speed: vec![10.0, 2.5],
            ..Default::default()
        };
        let payload = table.get_stream(StreamKind::Speed, Resolution::High).unwrap();
        assert_eq!(payload.data, StreamValues::Float(vec![36.0, 9.0]));
    }

    #[test]
    fn test_unknown_wire_key_rejected() {
        assert!(StreamKind::from_wire("wattage").is_err());
        assert_eq!(StreamKind::from_wire("watts").unwrap(), StreamKind::Power);
        assert_eq!(
            StreamKind::from_wire("velocity_smooth").unwrap(),
            StreamKind::Speed
        );
    }
}
