//! Speed metric section: averages, time breakdown, coasting.

use serde::{Deserialize, Serialize};

use crate::metrics::MetricInputs;
use crate::timeutil::format_time;

/// Below ~1 km/h the rider is effectively stopped, in m/s
const COASTING_SPEED_MPS: f64 = 1.0 / 3.6;

/// Below this power the rider is coasting even while rolling, in watts
const COASTING_POWER_W: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedInfo {
    /// km/h, one decimal
    pub avg_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub moving_time: String,
    pub total_time: String,
    pub pause_time: String,
    pub coasting_time: String,
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub fn compute_speed_info(inputs: &MetricInputs<'_>) -> Option<SpeedInfo> {
    let table = inputs.table;
    if table.speed.is_empty() {
        return None;
    }
    let session = inputs.session;

    let avg_speed = session.and_then(|s| s.avg_speed).map(|v| round1(v * 3.6)).or_else(|| {
        let mean = table.speed.iter().sum::<f64>() / table.speed.len() as f64;
        Some(round1(mean * 3.6))
    });
    let max_speed = session.and_then(|s| s.max_speed).map(|v| round1(v * 3.6)).or_else(|| {
        table
            .speed
            .iter()
            .copied()
            .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))
            .map(|m| round1(m * 3.6))
    });

    let moving_seconds = inputs.moving_seconds();
    let total_seconds = session
        .and_then(|s| s.total_elapsed_time)
        .or_else(|| table.time.last().copied())
        .unwrap_or(moving_seconds);
    let pause_seconds = (total_seconds - moving_seconds).max(0);

    let mut coasting_seconds = 0i64;
    for (i, &speed) in table.speed.iter().enumerate() {
        let slow = speed < COASTING_SPEED_MPS;
        let soft_pedaling = table
            .power
            .get(i)
            .map_or(false, |p| *p < COASTING_POWER_W);
        if slow || soft_pedaling {
            coasting_seconds += 1;
        }
    }

    Some(SpeedInfo {
        avg_speed,
        max_speed,
        moving_time: format_time(moving_seconds),
        total_time: format_time(total_seconds),
        pause_time: format_time(pause_seconds),
        coasting_time: format_time(coasting_seconds),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionSummary;
    use crate::sample_table::SampleTable;

    #[test]
    fn test_speed_info_from_streams() {
        let mut table = SampleTable {
            time: (0..100).collect(),
            elapsed_time: (0..100).collect(),
            speed: vec![10.0; 100],
            power: vec![200; 100],
            ..Default::default()
        };
        // ten samples of freewheeling
        for i in 0..10 {
            table.power[i] = 0;
        }
        let inputs = MetricInputs::new(&table);
        let info = compute_speed_info(&inputs).unwrap();
        assert_eq!(info.avg_speed, Some(36.0));
        assert_eq!(info.max_speed, Some(36.0));
        assert_eq!(info.coasting_time, "10s");
        assert_eq!(info.pause_time, "0s");
    }

    #[test]
    fn test_speed_info_session_pause_time() {
        let table = SampleTable {
            time: (0..100).collect(),
            speed: vec![8.0; 100],
            ..Default::default()
        };
        let session = SessionSummary {
            avg_speed: Some(8.0),
            max_speed: Some(14.0),
            total_timer_time: Some(3600),
            total_elapsed_time: Some(3900),
            ..Default::default()
        };
        let mut inputs = MetricInputs::new(&table);
        inputs.session = Some(&session);
        let info = compute_speed_info(&inputs).unwrap();
        assert_eq!(info.avg_speed, Some(28.8));
        assert_eq!(info.max_speed, Some(50.4));
        assert_eq!(info.moving_time, "1:00:00");
        assert_eq!(info.total_time, "1:05:00");
        assert_eq!(info.pause_time, "5:00");
    }

    #[test]
    fn test_speed_none_without_stream() {
        let table = SampleTable::default();
        let inputs = MetricInputs::new(&table);
        assert!(compute_speed_info(&inputs).is_none());
    }
}
