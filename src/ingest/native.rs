//! Native binary recording ingest.
//!
//! The `fitparser` crate does the low-level decode; this module adapts its
//! record and session messages into a [`SampleTable`] and
//! [`SessionSummary`]. Columns stay length-aligned by carrying defaults for
//! fields a record omits.

use std::sync::Arc;

use fitparser::profile::MesgNum;
use fitparser::{FitDataRecord, Value as FitValue};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::ingest::UploadFetcher;
use crate::models::SessionSummary;
use crate::sample_table::SampleTable;

/// Gaps longer than this between records count as pauses, in seconds
const PAUSE_GAP_SECONDS: i64 = 10;

/// Semicircle to degree conversion for position fields
const SEMICIRCLE_SCALE: f64 = 180.0 / 2147483648.0;

/// One decoded record message, in SI units
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordRow {
    /// Seconds since the epoch of the recording device
    pub timestamp: i64,
    pub distance: Option<f64>,
    pub altitude: Option<f64>,
    pub cadence: Option<i64>,
    pub heart_rate: Option<i64>,
    pub speed: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub power: Option<i64>,
    pub temperature: Option<f64>,
}

/// Decoder for native recordings
pub struct NativeIngest {
    fetcher: Arc<dyn UploadFetcher>,
}

impl NativeIngest {
    pub fn new(fetcher: Arc<dyn UploadFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch the recording at `url` and decode it
    pub fn load_from_url(&self, url: &str) -> Result<(SampleTable, Option<SessionSummary>)> {
        let bytes = self.fetcher.fetch(url)?;
        self.parse_bytes(&bytes)
    }

    /// Decode recording bytes into a sample table and optional session
    /// summary
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<(SampleTable, Option<SessionSummary>)> {
        let mut reader = std::io::Cursor::new(bytes);
        let records: Vec<FitDataRecord> =
            fitparser::from_reader(&mut reader).map_err(|e| IngestError::Corrupted {
                reason: format!("{:?}", e),
            })?;

        let mut rows: Vec<RecordRow> = Vec::new();
        let mut session: Option<SessionSummary> = None;
        for record in &records {
            match record.kind() {
                MesgNum::Record => {
                    if let Some(row) = decode_record(record) {
                        rows.push(row);
                    }
                }
                MesgNum::Session => {
                    let summary = decode_session(record);
                    if !summary.is_empty() {
                        session = Some(summary);
                    }
                }
                _ => {}
            }
        }
        debug!(records = rows.len(), has_session = session.is_some(), "recording decoded");
        Ok((build_table(rows), session))
    }
}

fn field_f64(value: &FitValue) -> Option<f64> {
    match value {
        FitValue::SInt8(v) => Some(*v as f64),
        FitValue::UInt8(v) => Some(*v as f64),
        FitValue::SInt16(v) => Some(*v as f64),
        FitValue::UInt16(v) => Some(*v as f64),
        FitValue::SInt32(v) => Some(*v as f64),
        FitValue::UInt32(v) => Some(*v as f64),
        FitValue::SInt64(v) => Some(*v as f64),
        FitValue::UInt64(v) => Some(*v as f64),
        FitValue::UInt8z(v) => Some(*v as f64),
        FitValue::UInt16z(v) => Some(*v as f64),
        FitValue::UInt32z(v) => Some(*v as f64),
        FitValue::UInt64z(v) => Some(*v as f64),
        FitValue::Float32(v) => Some(*v as f64),
        FitValue::Float64(v) => Some(*v),
        FitValue::Timestamp(ts) => Some(ts.timestamp() as f64),
        _ => None,
    }
}

fn decode_record(record: &FitDataRecord) -> Option<RecordRow> {
    let mut row = RecordRow::default();
    let mut has_timestamp = false;
    for field in record.fields() {
        let Some(value) = field_f64(field.value()) else {
            continue;
        };
        match field.name() {
            "timestamp" => {
                row.timestamp = value as i64;
                has_timestamp = true;
            }
            "distance" => row.distance = Some(value),
            "altitude" | "enhanced_altitude" => row.altitude = Some(value),
            "cadence" => row.cadence = Some(value as i64),
            "heart_rate" => row.heart_rate = Some(value as i64),
            "speed" | "enhanced_speed" => row.speed = Some(value),
            "position_lat" => row.latitude = Some(value * SEMICIRCLE_SCALE),
            "position_long" => row.longitude = Some(value * SEMICIRCLE_SCALE),
            "power" => row.power = Some(value as i64),
            "temperature" => row.temperature = Some(value),
            _ => {}
        }
    }
    if has_timestamp {
        Some(row)
    } else {
        warn!("record message without timestamp skipped");
        None
    }
}

fn decode_session(record: &FitDataRecord) -> SessionSummary {
    let mut summary = SessionSummary::default();
    for field in record.fields() {
        let Some(value) = field_f64(field.value()) else {
            continue;
        };
        match field.name() {
            "total_distance" => summary.total_distance = Some(value),
            "total_timer_time" => summary.total_timer_time = Some(value as i64),
            "total_elapsed_time" => summary.total_elapsed_time = Some(value as i64),
            "avg_speed" | "enhanced_avg_speed" => summary.avg_speed = Some(value),
            "max_speed" | "enhanced_max_speed" => summary.max_speed = Some(value),
            "total_ascent" => summary.total_ascent = Some(value as i64),
            "total_descent" => summary.total_descent = Some(value as i64),
            "avg_heart_rate" => summary.avg_heart_rate = Some(value as i64),
            "max_heart_rate" => summary.max_heart_rate = Some(value as i64),
            "avg_power" => summary.avg_power = Some(value as i64),
            "max_power" => summary.max_power = Some(value as i64),
            "avg_cadence" => summary.avg_cadence = Some(value as i64),
            "max_cadence" => summary.max_cadence = Some(value as i64),
            "max_altitude" | "enhanced_max_altitude" => {
                summary.max_altitude = Some(value as i64)
            }
            "total_calories" => summary.total_calories = Some(value as i64),
            _ => {}
        }
    }
    summary
}

/// Assemble time-aligned columns from decoded records. Missing values fall
/// back to the previous sample (distance/altitude) or zero, keeping every
/// column the same length. The elapsed-time column accumulates moving
/// seconds, treating long gaps as pauses.
pub fn build_table(mut rows: Vec<RecordRow>) -> SampleTable {
    if rows.is_empty() {
        return SampleTable::default();
    }
    rows.sort_by_key(|r| r.timestamp);
    let t0 = rows[0].timestamp;

    let mut table = SampleTable::default();
    let mut last_distance = 0.0;
    let mut last_altitude = 0.0;
    let mut elapsed = 0i64;
    let mut prev_ts = t0;

    for row in &rows {
        let t = row.timestamp - t0;
        table.time.push(t);

        let dt = row.timestamp - prev_ts;
        if dt > 0 {
            elapsed += if dt <= PAUSE_GAP_SECONDS { dt } else { 1 };
        }
        prev_ts = row.timestamp;
        table.elapsed_time.push(elapsed);

        last_distance = row.distance.unwrap_or(last_distance);
        table.distance.push(last_distance);
        last_altitude = row.altitude.unwrap_or(last_altitude);
        table.altitude.push(last_altitude);

        table.cadence.push(row.cadence.unwrap_or(0));
        table.heart_rate.push(row.heart_rate.unwrap_or(0));
        table.speed.push(row.speed.unwrap_or(0.0));
        table.latitude.push(row.latitude.unwrap_or(0.0));
        table.longitude.push(row.longitude.unwrap_or(0.0));
        table.power.push(row.power.unwrap_or(0));
        table.temperature.push(row.temperature.unwrap_or(0.0));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::LocalFileFetcher;

    fn row(ts: i64, power: i64, hr: i64) -> RecordRow {
        RecordRow {
            timestamp: ts,
            power: Some(power),
            heart_rate: Some(hr),
            distance: Some(ts as f64 * 8.0),
            speed: Some(8.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_table_aligns_columns() {
        let rows: Vec<RecordRow> = (0..60).map(|i| row(1000 + i, 200, 145)).collect();
        let table = build_table(rows);
        assert_eq!(table.len(), 60);
        assert_eq!(table.time[0], 0);
        assert_eq!(table.time[59], 59);
        for col_len in [
            table.power.len(),
            table.heart_rate.len(),
            table.distance.len(),
            table.speed.len(),
            table.altitude.len(),
            table.elapsed_time.len(),
        ] {
            assert_eq!(col_len, 60);
        }
    }

    #[test]
    fn test_build_table_carries_missing_values_forward() {
        let mut rows = vec![row(0, 200, 140), row(1, 210, 141)];
        rows.push(RecordRow {
            timestamp: 2,
            ..Default::default()
        });
        let table = build_table(rows);
        // distance carries forward, power falls back to zero
        assert_eq!(table.distance[2], 8.0);
        assert_eq!(table.power[2], 0);
    }

    #[test]
    fn test_elapsed_time_skips_pauses() {
        let mut rows: Vec<RecordRow> = (0..10).map(|i| row(i, 200, 140)).collect();
        // 5-minute pause, then 10 more seconds of riding
        rows.extend((0..10).map(|i| row(300 + i, 200, 140)));
        let table = build_table(rows);
        let total = *table.elapsed_time.last().unwrap();
        // 9 + 1 (gap counts one second) + 9
        assert_eq!(total, 19);
        assert_eq!(*table.time.last().unwrap(), 309);
    }

    #[test]
    fn test_build_table_sorts_by_timestamp() {
        let rows = vec![row(5, 220, 150), row(3, 210, 149), row(4, 215, 148)];
        let table = build_table(rows);
        assert_eq!(table.time, vec![0, 1, 2]);
        assert_eq!(table.power, vec![210, 215, 220]);
    }

    #[test]
    fn test_parse_garbage_is_corrupted_error() {
        let ingest = NativeIngest::new(Arc::new(LocalFileFetcher));
        let err = ingest.parse_bytes(b"definitely not a fit file").unwrap_err();
        assert!(matches!(
            err,
            crate::error::AnalyticsError::Ingest(IngestError::Corrupted { .. })
        ));
    }
}
