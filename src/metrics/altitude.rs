//! Altitude metric section: climb, descent, grade, uphill/downhill
//! distance.

use serde::{Deserialize, Serialize};

use crate::altitude::{
    elevation_gain, max_grade_percent, total_descent, uphill_downhill_distance_km,
};
use crate::metrics::MetricInputs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AltitudeInfo {
    pub elevation_gain: i64,
    pub max_altitude: i64,

    /// Percent, one decimal
    pub max_grade: f64,
    pub total_descent: i64,
    pub min_altitude: i64,

    /// km, two decimals
    pub uphill_distance: f64,
    pub downhill_distance: f64,
}

pub fn compute_altitude_info(inputs: &MetricInputs<'_>) -> Option<AltitudeInfo> {
    let table = inputs.table;
    if table.altitude.is_empty() {
        return None;
    }
    let session = inputs.session;
    let altitude = &table.altitude;

    let gain = session
        .and_then(|s| s.total_ascent)
        .unwrap_or_else(|| elevation_gain(altitude) as i64);
    let descent = session
        .and_then(|s| s.total_descent)
        .unwrap_or_else(|| total_descent(altitude));

    // prefer the provider's smoothed grade stream when it exists
    let max_grade = if table.grade_smooth.is_empty() {
        max_grade_percent(altitude, &table.distance)
    } else {
        let max = table
            .grade_smooth
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        (max * 10.0).round() / 10.0
    };

    let max_altitude = altitude.iter().copied().fold(f64::NEG_INFINITY, f64::max) as i64;
    let min_altitude = altitude.iter().copied().fold(f64::INFINITY, f64::min) as i64;
    let (uphill, downhill) = uphill_downhill_distance_km(altitude, &table.distance);

    Some(AltitudeInfo {
        elevation_gain: gain,
        max_altitude,
        max_grade,
        total_descent: descent,
        min_altitude,
        uphill_distance: uphill,
        downhill_distance: downhill,
    })
}
