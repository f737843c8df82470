//! Overall ride summary: distance, time, speed, climb, power, calories.

use serde::{Deserialize, Serialize};

use crate::altitude::elevation_gain;
use crate::metrics::MetricInputs;
use crate::timeutil::format_time;
use crate::training_effect::{
    calculate_training_load, estimate_calories_with_heartrate, estimate_calories_with_power,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallInfo {
    /// Kilometers, two decimals
    pub distance: Option<f64>,
    pub moving_time: Option<String>,

    /// km/h, one decimal
    pub average_speed: Option<f64>,
    pub elevation_gain: Option<i64>,
    pub avg_power: Option<i64>,
    pub calories: Option<i64>,

    /// This activity's TSS; written back by the service
    pub training_load: Option<i64>,

    /// Athlete TSB after the rollup; filled by the service
    pub status: Option<i64>,
    pub avg_heartrate: Option<i64>,
    pub max_altitude: Option<i64>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub fn compute_overall_info(inputs: &MetricInputs<'_>) -> Option<OverallInfo> {
    let table = inputs.table;
    let session = inputs.session;
    if table.is_empty() && session.is_none() {
        return None;
    }

    let distance = session
        .and_then(|s| s.total_distance)
        .or_else(|| {
            table
                .distance
                .iter()
                .copied()
                .fold(None, |max: Option<f64>, v| {
                    Some(max.map_or(v, |m| m.max(v)))
                })
        })
        .map(|m| round2(m / 1000.0));

    let moving_seconds = inputs.moving_seconds();

    let average_speed = session.and_then(|s| s.avg_speed).map(|v| round1(v * 3.6)).or_else(|| {
        if table.speed.is_empty() {
            None
        } else {
            let mean = table.speed.iter().sum::<f64>() / table.speed.len() as f64;
            Some(round1(mean * 3.6))
        }
    });

    let elev_gain = session.and_then(|s| s.total_ascent).or_else(|| {
        if table.altitude.is_empty() {
            None
        } else {
            Some(elevation_gain(&table.altitude) as i64)
        }
    });

    let avg_power = session.and_then(|s| s.avg_power).or_else(|| {
        let valid: Vec<i64> = table.power.iter().copied().filter(|p| *p > 0).collect();
        if valid.is_empty() {
            None
        } else {
            Some(valid.iter().sum::<i64>() / valid.len() as i64)
        }
    });

    let training_load = match (inputs.ftp(), avg_power) {
        (Some(ftp), Some(power)) if moving_seconds > 0 => {
            Some(calculate_training_load(power, ftp, moving_seconds))
        }
        _ => None,
    };

    let avg_heartrate = session.and_then(|s| s.avg_heart_rate).or_else(|| {
        if table.heart_rate.is_empty() {
            None
        } else {
            Some(table.heart_rate.iter().sum::<i64>() / table.heart_rate.len() as i64)
        }
    });

    let max_altitude = session.and_then(|s| s.max_altitude).or_else(|| {
        table
            .altitude
            .iter()
            .copied()
            .fold(None, |max: Option<f64>, v| {
                Some(max.map_or(v, |m| m.max(v)))
            })
            .map(|m| m as i64)
    });

    let weight = inputs
        .athlete
        .and_then(|a| a.weight)
        .unwrap_or(70.0);
    let calories = session.and_then(|s| s.total_calories).or_else(|| {
        avg_power
            .and_then(|p| estimate_calories_with_power(p, moving_seconds))
            .or_else(|| {
                avg_heartrate
                    .and_then(|hr| estimate_calories_with_heartrate(hr, moving_seconds, weight))
            })
    });

    Some(OverallInfo {
        distance,
        moving_time: Some(format_time(moving_seconds)),
        average_speed,
        elevation_gain: elev_gain,
        avg_power,
        calories,
        training_load,
        status: None,
        avg_heartrate,
        max_altitude,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::{ride_athlete, ride_table};
    use crate::models::SessionSummary;

    #[test]
    fn test_overall_from_streams() {
        let table = ride_table();
        let athlete = ride_athlete();
        let mut inputs = MetricInputs::new(&table);
        inputs.athlete = Some(&athlete);

        let info = compute_overall_info(&inputs).unwrap();
        assert_eq!(info.distance, Some(29.51));
        assert_eq!(info.moving_time.as_deref(), Some("59:59"));
        assert!(info.avg_power.unwrap() > 190);
        assert!(info.training_load.unwrap() > 0);
        assert!(info.calories.unwrap() > 0);
        assert_eq!(info.status, None);
    }

    #[test]
    fn test_overall_prefers_session_totals() {
        let table = ride_table();
        let session = SessionSummary {
            total_distance: Some(50000.0),
            total_timer_time: Some(7200),
            avg_speed: Some(7.0),
            total_ascent: Some(900),
            avg_power: Some(210),
            avg_heart_rate: Some(150),
            max_altitude: Some(1800),
            total_calories: Some(1400),
            ..Default::default()
        };
        let mut inputs = MetricInputs::new(&table);
        inputs.session = Some(&session);

        let info = compute_overall_info(&inputs).unwrap();
        assert_eq!(info.distance, Some(50.0));
        assert_eq!(info.moving_time.as_deref(), Some("2:00:00"));
        assert_eq!(info.average_speed, Some(25.2));
        assert_eq!(info.elevation_gain, Some(900));
        assert_eq!(info.avg_power, Some(210));
        assert_eq!(info.avg_heartrate, Some(150));
        assert_eq!(info.max_altitude, Some(1800));
        assert_eq!(info.calories, Some(1400));
    }

    #[test]
    fn test_overall_none_without_any_data() {
        let table = crate::sample_table::SampleTable::default();
        let inputs = MetricInputs::new(&table);
        assert!(compute_overall_info(&inputs).is_none());
    }
}
