//! Temperature metric section.

use serde::{Deserialize, Serialize};

use crate::metrics::MetricInputs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureInfo {
    pub min_temp: i64,
    pub avg_temp: i64,
    pub max_temp: i64,
}

pub fn compute_temperature_info(inputs: &MetricInputs<'_>) -> Option<TemperatureInfo> {
    let temps = &inputs.table.temperature;
    if temps.is_empty() {
        return None;
    }
    let min = temps.iter().copied().fold(f64::INFINITY, f64::min);
    let max = temps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = temps.iter().sum::<f64>() / temps.len() as f64;
    Some(TemperatureInfo {
        min_temp: min.round() as i64,
        avg_temp: avg.round() as i64,
        max_temp: max.round() as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_table::SampleTable;

    #[test]
    fn test_temperature_info() {
        let table = SampleTable {
            time: (0..4).collect(),
            temperature: vec![17.4, 18.0, 21.6, 19.0],
            ..Default::default()
        };
        let inputs = MetricInputs::new(&table);
        let info = compute_temperature_info(&inputs).unwrap();
        assert_eq!(info.min_temp, 17);
        assert_eq!(info.avg_temp, 19);
        assert_eq!(info.max_temp, 22);
    }

    #[test]
    fn test_temperature_none_without_stream() {
        let table = SampleTable::default();
        let inputs = MetricInputs::new(&table);
        assert!(compute_temperature_info(&inputs).is_none());
    }
}
