//! Training-effect metric section: aerobic/anaerobic effect, primary
//! benefit, training load, carbohydrate use.

use serde::{Deserialize, Serialize};

use crate::metrics::MetricInputs;
use crate::training_effect::{
    aerobic_effect, anaerobic_effect, benefit_inputs, calculate_training_load,
    primary_training_benefit,
};

/// Kilocalories per gram of carbohydrate burn used for the estimate
const KCAL_PER_CARB_G: f64 = 4.138;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingEffectInfo {
    pub primary_training_benefit: String,
    pub secondary_benefits: Vec<String>,
    pub aerobic_effect: f64,
    pub anaerobic_effect: f64,
    pub training_load: Option<i64>,

    /// Grams
    pub carbohydrate_consumption: Option<i64>,
}

pub fn compute_training_effect_info(inputs: &MetricInputs<'_>) -> Option<TrainingEffectInfo> {
    let table = inputs.table;
    let power = &table.power;
    if power.is_empty() {
        return None;
    }
    let ftp = inputs.ftp()?;

    let aerobic = aerobic_effect(power, ftp);
    let anaerobic = anaerobic_effect(power, ftp);
    let (zone_distribution, zone_times) = benefit_inputs(power, ftp);

    let max_power = inputs
        .session
        .and_then(|s| s.max_power)
        .unwrap_or_else(|| power.iter().copied().max().unwrap_or(0));
    let duration_min = (power.len() as f64 / 60.0).round() as i64;

    let (primary, secondary) = primary_training_benefit(
        &zone_distribution,
        &zone_times,
        duration_min,
        aerobic,
        anaerobic,
        ftp,
        max_power,
    );

    let moving_seconds = inputs.moving_seconds();
    let avg_power = {
        let valid: Vec<i64> = power.iter().copied().filter(|p| *p > 0).collect();
        inputs
            .session
            .and_then(|s| s.avg_power)
            .or_else(|| {
                if valid.is_empty() {
                    None
                } else {
                    Some(valid.iter().sum::<i64>() / valid.len() as i64)
                }
            })
    };
    let training_load = avg_power
        .filter(|p| *p > 0 && moving_seconds > 0)
        .map(|p| calculate_training_load(p, ftp, moving_seconds));

    let carbohydrate = inputs
        .session
        .and_then(|s| s.total_calories)
        .map(|kcal| (kcal as f64 / KCAL_PER_CARB_G) as i64);

    Some(TrainingEffectInfo {
        primary_training_benefit: primary,
        secondary_benefits: secondary,
        aerobic_effect: aerobic,
        anaerobic_effect: anaerobic,
        training_load,
        carbohydrate_consumption: carbohydrate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::{ride_athlete, ride_table};
    use crate::models::SessionSummary;
    use crate::sample_table::SampleTable;
    use crate::training_effect::TOO_SHORT_LABEL;

    #[test]
    fn test_training_effect_for_ride() {
        let table = ride_table();
        let athlete = ride_athlete();
        let mut inputs = MetricInputs::new(&table);
        inputs.athlete = Some(&athlete);

        let info = compute_training_effect_info(&inputs).unwrap();
        assert!(info.aerobic_effect > 0.5);
        assert!(info.training_load.unwrap() > 0);
        assert!(!info.primary_training_benefit.is_empty());
    }

    #[test]
    fn test_training_effect_requires_ftp() {
        let table = ride_table();
        let inputs = MetricInputs::new(&table);
        assert!(compute_training_effect_info(&inputs).is_none());
    }

    #[test]
    fn test_short_ride_label() {
        let table = SampleTable {
            time: (0..120).collect(),
            power: vec![200; 120],
            ..Default::default()
        };
        let athlete = ride_athlete();
        let mut inputs = MetricInputs::new(&table);
        inputs.athlete = Some(&athlete);
        let info = compute_training_effect_info(&inputs).unwrap();
        assert_eq!(info.primary_training_benefit, TOO_SHORT_LABEL);
    }

    #[test]
    fn test_carbohydrate_from_session_calories() {
        let table = ride_table();
        let athlete = ride_athlete();
        let session = SessionSummary {
            total_calories: Some(827),
            ..Default::default()
        };
        let mut inputs = MetricInputs::new(&table);
        inputs.athlete = Some(&athlete);
        inputs.session = Some(&session);
        let info = compute_training_effect_info(&inputs).unwrap();
        assert_eq!(info.carbohydrate_consumption, Some(199));
    }
}
