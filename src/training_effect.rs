//! Training load, aerobic/anaerobic effect, calorie estimates, and the
//! primary-training-benefit ruleset.

use crate::power::normalized_power;
use crate::zones::{power_zone_percentages, power_zone_times};

/// Training Stress Score from average power: `IF^2 * hours * 100` with
/// `IF = avg_power / ftp`. Returns 0 when any input is invalid.
pub fn calculate_training_load(avg_power: i64, ftp: f64, duration_seconds: i64) -> i64 {
    if ftp <= 0.0 || avg_power <= 0 || duration_seconds <= 0 {
        return 0;
    }
    let intensity_factor = avg_power as f64 / ftp;
    let duration_hours = duration_seconds as f64 / 3600.0;
    (intensity_factor * intensity_factor * duration_hours * 100.0) as i64
}

/// Calorie estimate from power: watt-hours plus a small basal component
pub fn estimate_calories_with_power(avg_power: i64, duration_seconds: i64) -> Option<i64> {
    if avg_power <= 0 || duration_seconds <= 0 {
        return None;
    }
    let power_calories = avg_power as f64 * duration_seconds as f64 / 3600.0;
    let bmr_calories = 1.2 * duration_seconds as f64 / 60.0;
    Some((power_calories + bmr_calories) as i64)
}

/// Keytel-style calorie estimate from heart rate
pub fn estimate_calories_with_heartrate(
    avg_heartrate: i64,
    duration_seconds: i64,
    weight_kg: f64,
) -> Option<i64> {
    if avg_heartrate <= 0 || duration_seconds <= 0 {
        return None;
    }
    let per_minute = (0.6309 * avg_heartrate as f64 + 0.1988 * weight_kg + 6.0 - 55.0969) / 4.184;
    Some((duration_seconds as f64 / 60.0 * per_minute).round() as i64)
}

/// Aerobic effect: `min(5.0, IF * hours + 0.5)` with NP-based IF, one
/// decimal. Zero when FTP is invalid.
pub fn aerobic_effect(power: &[i64], ftp: f64) -> f64 {
    if ftp <= 0.0 {
        return 0.0;
    }
    let np = normalized_power(power) as f64;
    let intensity_factor = np / ftp;
    let value = intensity_factor * power.len() as f64 / 3600.0 + 0.5;
    (value.min(5.0) * 10.0).round() / 10.0
}

/// Anaerobic effect from the 30-second peak and work above FTP:
/// `min(4.0, 0.1 * peak30/FTP + 0.05 * capacity_kJ)`, one decimal.
pub fn anaerobic_effect(power: &[i64], ftp: f64) -> f64 {
    if power.len() < 30 || ftp <= 0.0 {
        return 0.0;
    }
    let window = 30usize;
    let mut sum: i64 = power[..window].iter().sum();
    let mut max_avg = sum as f64 / window as f64;
    for i in window..power.len() {
        sum += power[i] - power[i - window];
        let avg = sum as f64 / window as f64;
        if avg > max_avg {
            max_avg = avg;
        }
    }
    let capacity: f64 = power
        .iter()
        .map(|p| (*p as f64 - ftp).max(0.0))
        .sum::<f64>()
        / 1000.0;
    let value = (0.1 * (max_avg / ftp) + 0.05 * capacity).min(4.0);
    (value * 10.0).round() / 10.0
}

/// Short-circuit label when the ride is too short to judge
pub const TOO_SHORT_LABEL: &str = "时间过短, 无法判断";

struct BenefitRule {
    name: &'static str,
    required: usize,
}

/// Classify the primary training benefit of a ride from its zone
/// distribution and effect scores. Returns the winning rule name plus any
/// further matched rules as secondary benefits. Rides under five minutes
/// return the too-short label; no match returns "Mixed".
pub fn primary_training_benefit(
    zone_distribution: &[f64],
    zone_times: &[i64],
    duration_min: i64,
    aerobic: f64,
    anaerobic: f64,
    ftp: f64,
    max_power: i64,
) -> (String, Vec<String>) {
    if duration_min < 5 {
        return (TOO_SHORT_LABEL.to_string(), Vec::new());
    }

    // 1-based zone accessors so the rules read like the zone chart
    let zd = |i: usize| zone_distribution.get(i - 1).copied().unwrap_or(0.0);
    let zt = |i: usize| zone_times.get(i - 1).copied().unwrap_or(0);

    let ae_to_ne = aerobic / (anaerobic + 0.001);
    let intensity_ratio = if ftp > 0.0 {
        max_power as f64 / ftp
    } else {
        0.0
    };

    let rules: [(BenefitRule, Vec<bool>); 7] = [
        (
            BenefitRule { name: "Recovery", required: 3 },
            vec![
                zd(1) > 85.0,
                aerobic < 1.5,
                anaerobic < 0.5,
                duration_min < 90,
            ],
        ),
        (
            BenefitRule { name: "Endurance (LSD)", required: 4 },
            vec![
                zd(2) > 60.0,
                aerobic > 2.5,
                anaerobic < 1.0,
                duration_min >= 90,
                ae_to_ne > 3.0,
            ],
        ),
        (
            BenefitRule { name: "Tempo", required: 4 },
            vec![
                zd(3) > 40.0,
                zd(4) < 30.0,
                aerobic > 2.0,
                anaerobic < 1.5,
                ae_to_ne > 1.5,
            ],
        ),
        (
            BenefitRule { name: "Threshold", required: 4 },
            vec![
                zd(4) > 35.0,
                zd(5) < 25.0,
                aerobic > 3.0,
                anaerobic > 1.0,
                ae_to_ne > 1.0 && ae_to_ne < 2.5,
            ],
        ),
        (
            BenefitRule { name: "VO2Max Intervals", required: 4 },
            vec![
                zd(5) > 25.0,
                zt(5) > 8 * 60,
                anaerobic > 2.5,
                intensity_ratio > 1.3,
                ae_to_ne < 1.5,
            ],
        ),
        (
            BenefitRule { name: "Anaerobic Intervals", required: 4 },
            vec![
                zd(6) > 15.0,
                anaerobic > 3.0,
                intensity_ratio > 1.5,
                ae_to_ne < 1.0,
                zt(6) > 3 * 60,
            ],
        ),
        (
            BenefitRule { name: "Sprint Training", required: 4 },
            vec![
                zd(7) > 8.0,
                anaerobic > 3.5,
                intensity_ratio > 1.8,
                zt(7) > 60,
                ae_to_ne < 0.5,
            ],
        ),
    ];

    let mut matched: Vec<&'static str> = Vec::new();
    for (rule, conditions) in &rules {
        let hits = conditions.iter().filter(|c| **c).count();
        if hits >= rule.required {
            matched.push(rule.name);
        }
    }

    match matched.split_first() {
        None => ("Mixed".to_string(), Vec::new()),
        Some((first, rest)) => (
            first.to_string(),
            rest.iter().map(|s| s.to_string()).collect(),
        ),
    }
}

/// Zone percentages and times for the benefit ruleset, derived from power
pub fn benefit_inputs(power: &[i64], ftp: f64) -> (Vec<f64>, Vec<i64>) {
    (
        power_zone_percentages(power, ftp),
        power_zone_times(power, ftp),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_load() {
        // IF = 1.0 for one hour = 100 TSS
        assert_eq!(calculate_training_load(250, 250.0, 3600), 100);
        // IF = 0.8 for one hour = 64 TSS
        assert_eq!(calculate_training_load(200, 250.0, 3600), 64);
        assert_eq!(calculate_training_load(0, 250.0, 3600), 0);
        assert_eq!(calculate_training_load(200, 0.0, 3600), 0);
        assert_eq!(calculate_training_load(200, 250.0, 0), 0);
    }

    #[test]
    fn test_aerobic_effect_flat_hour() {
        let power = vec![200i64; 3600];
        // IF = 1.0 over one hour -> 1.0 + 0.5
        assert_eq!(aerobic_effect(&power, 200.0), 1.5);
        assert_eq!(aerobic_effect(&power, 0.0), 0.0);
    }

    #[test]
    fn test_aerobic_effect_capped() {
        let power = vec![400i64; 4 * 3600];
        assert_eq!(aerobic_effect(&power, 200.0), 5.0);
    }

    #[test]
    fn test_anaerobic_effect() {
        // steady sub-threshold riding has almost no anaerobic effect
        let power = vec![150i64; 600];
        let effect = anaerobic_effect(&power, 250.0);
        assert!(effect < 0.5, "effect={}", effect);

        // repeated surges over FTP drive it up
        let mut surgy = vec![150i64; 600];
        for chunk in surgy.chunks_mut(60).step_by(2) {
            chunk.fill(450);
        }
        assert!(anaerobic_effect(&surgy, 250.0) > effect);
    }

    #[test]
    fn test_anaerobic_effect_needs_30s() {
        assert_eq!(anaerobic_effect(&[400; 20], 250.0), 0.0);
    }

    #[test]
    fn test_calories_with_power() {
        assert_eq!(estimate_calories_with_power(200, 3600), Some(272));
        assert_eq!(estimate_calories_with_power(0, 3600), None);
    }

    #[test]
    fn test_calories_with_heartrate() {
        let kcal = estimate_calories_with_heartrate(150, 3600, 70.0).unwrap();
        assert!(kcal > 500 && kcal < 900, "kcal={}", kcal);
    }

    #[test]
    fn test_benefit_too_short() {
        let (label, secondary) =
            primary_training_benefit(&[0.0; 7], &[0; 7], 3, 1.0, 0.5, 250.0, 300);
        assert_eq!(label, TOO_SHORT_LABEL);
        assert!(secondary.is_empty());
    }

    #[test]
    fn test_benefit_recovery() {
        let mut zd = vec![0.0; 7];
        zd[0] = 95.0;
        let (label, _) = primary_training_benefit(&zd, &[0; 7], 45, 1.0, 0.2, 250.0, 180);
        assert_eq!(label, "Recovery");
    }

    #[test]
    fn test_benefit_endurance() {
        let mut zd = vec![0.0; 7];
        zd[1] = 75.0;
        let (label, _) = primary_training_benefit(&zd, &[0; 7], 150, 3.0, 0.5, 250.0, 220);
        assert_eq!(label, "Endurance (LSD)");
    }

    #[test]
    fn test_benefit_mixed_when_nothing_matches() {
        let zd = vec![20.0, 20.0, 15.0, 15.0, 10.0, 10.0, 10.0];
        let (label, _) = primary_training_benefit(&zd, &[600; 7], 60, 2.0, 2.0, 250.0, 400);
        assert_eq!(label, "Mixed");
    }

    #[test]
    fn test_benefit_first_match_wins_rest_secondary() {
        // satisfy both Recovery and (artificially) nothing else; secondary empty
        let mut zd = vec![0.0; 7];
        zd[0] = 90.0;
        let (label, secondary) =
            primary_training_benefit(&zd, &[0; 7], 30, 0.8, 0.1, 250.0, 150);
        assert_eq!(label, "Recovery");
        assert!(secondary.is_empty());
    }
}
