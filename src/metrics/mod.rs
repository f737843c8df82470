//! Per-domain metric assembly and the composite activity response.
//!
//! Each submodule turns the sample table (plus the optional session
//! summary) into one response section; [`assemble_metrics`] runs them all.
//! Sections come back `None` when their source stream is absent, never as
//! an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{AthleteProfile, BestPowerCurveRecord, SegmentRecord, SessionSummary};
use crate::sample_table::{SampleTable, StreamPayload};
use crate::zones::ZoneData;

pub mod altitude;
pub mod cadence;
pub mod heartrate;
pub mod overall;
pub mod power;
pub mod speed;
pub mod temperature;
pub mod training_effect;

pub use altitude::AltitudeInfo;
pub use cadence::CadenceInfo;
pub use heartrate::HeartRateInfo;
pub use overall::OverallInfo;
pub use power::PowerInfo;
pub use speed::SpeedInfo;
pub use temperature::TemperatureInfo;
pub use training_effect::TrainingEffectInfo;

/// Composite response for one activity analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllActivityData {
    pub overall: Option<OverallInfo>,
    pub power: Option<PowerInfo>,
    pub heartrate: Option<HeartRateInfo>,
    pub cadence: Option<CadenceInfo>,
    pub speed: Option<SpeedInfo>,
    pub training_effect: Option<TrainingEffectInfo>,
    pub altitude: Option<AltitudeInfo>,
    pub temp: Option<TemperatureInfo>,
    pub zones: Option<Vec<ZoneData>>,
    pub streams: Option<Vec<StreamPayload>>,
    pub best_powers: Option<BTreeMap<String, i64>>,
    pub segment_records: Option<Vec<SegmentRecord>>,
    pub best_power_record: Option<BestPowerCurveRecord>,
}

/// Inputs shared by every metric assembler
#[derive(Debug, Clone, Copy)]
pub struct MetricInputs<'a> {
    pub table: &'a SampleTable,
    pub session: Option<&'a SessionSummary>,
    pub athlete: Option<&'a AthleteProfile>,

    /// Provider-reported weighted average power, absent for native rides
    pub weighted_average_watts: Option<i64>,
}

impl<'a> MetricInputs<'a> {
    pub fn new(table: &'a SampleTable) -> Self {
        Self {
            table,
            session: None,
            athlete: None,
            weighted_average_watts: None,
        }
    }

    pub fn ftp(&self) -> Option<f64> {
        self.athlete.and_then(AthleteProfile::effective_ftp)
    }

    /// Moving seconds, preferring the session's timer time
    pub fn moving_seconds(&self) -> i64 {
        self.session
            .and_then(|s| s.total_timer_time)
            .unwrap_or_else(|| self.table.moving_seconds())
    }
}

/// Run every per-domain assembler over the inputs. The composite carries
/// `None` for domains whose source data is missing; zones, streams, and
/// record sections are attached by the service.
pub fn assemble_metrics(inputs: &MetricInputs<'_>) -> AllActivityData {
    AllActivityData {
        overall: overall::compute_overall_info(inputs),
        power: power::compute_power_info(inputs),
        heartrate: heartrate::compute_heartrate_info(inputs),
        cadence: cadence::compute_cadence_info(inputs),
        speed: speed::compute_speed_info(inputs),
        training_effect: training_effect::compute_training_effect_info(inputs),
        altitude: altitude::compute_altitude_info(inputs),
        temp: temperature::compute_temperature_info(inputs),
        ..Default::default()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A plausible one-hour ride with every base stream populated
    pub fn ride_table() -> SampleTable {
        let n = 3600usize;
        let mut table = SampleTable {
            time: (0..n as i64).collect(),
            elapsed_time: (0..n as i64).collect(),
            ..Default::default()
        };
        for i in 0..n {
            let surge = if (600..660).contains(&i) { 180 } else { 0 };
            table.power.push(190 + surge + (i % 7) as i64);
            table.heart_rate.push(135 + (i % 9) as i64);
            table.cadence.push(88 + (i % 5) as i64);
            table.speed.push(8.0 + (i % 3) as f64 * 0.2);
            table.distance.push(i as f64 * 8.2);
            table.altitude.push(200.0 + (i as f64 / 40.0).sin() * 30.0);
            table.temperature.push(18.0 + (i % 4) as f64 * 0.5);
        }
        table
    }

    pub fn ride_athlete() -> AthleteProfile {
        AthleteProfile {
            ftp: Some(250.0),
            w_prime: Some(20000.0),
            max_heartrate: Some(190),
            threshold_heartrate: Some(165),
            weight: Some(70.0),
            ..AthleteProfile::new(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{ride_athlete, ride_table};
    use super::*;

    #[test]
    fn test_assemble_full_ride() {
        let table = ride_table();
        let athlete = ride_athlete();
        let mut inputs = MetricInputs::new(&table);
        inputs.athlete = Some(&athlete);

        let data = assemble_metrics(&inputs);
        assert!(data.overall.is_some());
        assert!(data.power.is_some());
        assert!(data.heartrate.is_some());
        assert!(data.cadence.is_some());
        assert!(data.speed.is_some());
        assert!(data.training_effect.is_some());
        assert!(data.altitude.is_some());
        assert!(data.temp.is_some());
        // attached later by the service
        assert!(data.zones.is_none());
        assert!(data.streams.is_none());
    }

    #[test]
    fn test_assemble_empty_table_yields_null_sections() {
        let table = SampleTable::default();
        let inputs = MetricInputs::new(&table);
        let data = assemble_metrics(&inputs);
        assert!(data.power.is_none());
        assert!(data.heartrate.is_none());
        assert!(data.speed.is_none());
        assert!(data.altitude.is_none());
        assert!(data.temp.is_none());
        assert!(data.training_effect.is_none());
    }

    #[test]
    fn test_composite_serializes_with_nulls() {
        let data = AllActivityData::default();
        let value = serde_json::to_value(&data).unwrap();
        assert!(value.get("overall").unwrap().is_null());
        assert!(value.get("temp").unwrap().is_null());
    }
}
