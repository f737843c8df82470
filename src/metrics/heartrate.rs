//! Heart-rate metric section: averages plus power/HR coupling metrics.

use serde::{Deserialize, Serialize};

use crate::heartrate::{
    decoupling_rate, efficiency_index, filter_hr_smooth, hr_lag_seconds, recovery_rate,
};
use crate::metrics::MetricInputs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateInfo {
    pub avg_heartrate: Option<i64>,
    pub max_heartrate: Option<i64>,
    pub heartrate_recovery_rate: i64,
    pub heartrate_lag: Option<i64>,
    pub efficiency_index: Option<f64>,
    pub decoupling_rate: Option<String>,
}

pub fn compute_heartrate_info(inputs: &MetricInputs<'_>) -> Option<HeartRateInfo> {
    let table = inputs.table;
    if table.heart_rate.is_empty() {
        return None;
    }
    let valid = filter_hr_smooth(&table.heart_rate);
    if valid.is_empty() {
        return None;
    }
    let session = inputs.session;

    let avg_heartrate = session
        .and_then(|s| s.avg_heart_rate)
        .unwrap_or_else(|| valid.iter().sum::<i64>() / valid.len() as i64);
    let max_heartrate = session
        .and_then(|s| s.max_heart_rate)
        .unwrap_or_else(|| *valid.iter().max().expect("non-empty"));

    let has_power = table.power.iter().any(|p| *p > 0);
    let (recovery, lag, efficiency, decoupling) = if has_power {
        (
            recovery_rate(&table.heart_rate, 60),
            hr_lag_seconds(&table.power, &table.heart_rate),
            efficiency_index(&table.power, &table.heart_rate),
            decoupling_rate(&table.power, &table.heart_rate),
        )
    } else {
        (0, None, None, None)
    };

    Some(HeartRateInfo {
        avg_heartrate: Some(avg_heartrate),
        max_heartrate: Some(max_heartrate),
        heartrate_recovery_rate: recovery,
        heartrate_lag: lag,
        efficiency_index: efficiency,
        decoupling_rate: decoupling,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::ride_table;
    use crate::sample_table::SampleTable;

    #[test]
    fn test_heartrate_with_power() {
        let table = ride_table();
        let inputs = MetricInputs::new(&table);
        let info = compute_heartrate_info(&inputs).unwrap();
        assert!(info.avg_heartrate.unwrap() >= 135);
        assert!(info.max_heartrate.unwrap() <= 144);
        assert!(info.efficiency_index.is_some());
        assert!(info.decoupling_rate.is_some());
    }

    #[test]
    fn test_heartrate_without_power_uses_defaults() {
        let table = SampleTable {
            time: (0..100).collect(),
            heart_rate: vec![150; 100],
            ..Default::default()
        };
        let inputs = MetricInputs::new(&table);
        let info = compute_heartrate_info(&inputs).unwrap();
        assert_eq!(info.heartrate_recovery_rate, 0);
        assert_eq!(info.heartrate_lag, None);
        assert_eq!(info.efficiency_index, None);
        assert_eq!(info.decoupling_rate, None);
    }

    #[test]
    fn test_heartrate_none_when_all_invalid() {
        let table = SampleTable {
            time: (0..10).collect(),
            heart_rate: vec![0, 5, 250, 0, 0, 0, 0, 0, 0, 300],
            ..Default::default()
        };
        let inputs = MetricInputs::new(&table);
        assert!(compute_heartrate_info(&inputs).is_none());
    }
}
