//! Heart-rate filters and power/heart-rate coupling metrics.

use crate::power::normalized_power;

/// Physiological validity window for heart-rate samples, in bpm
const HR_MIN: i64 = 30;
const HR_MAX: i64 = 220;

/// Largest plausible beat-to-beat jump; bigger deltas are sensor spikes
const SPIKE_DELTA: i64 = 50;

/// Drop invalid heart-rate samples: nulls (encoded as <=0), readings outside
/// 30..=220 bpm, and spikes that differ from the previous valid sample by
/// more than 50 bpm.
pub fn filter_hr_smooth(heartrate: &[i64]) -> Vec<i64> {
    let mut filtered: Vec<i64> = Vec::with_capacity(heartrate.len());
    for &hr in heartrate {
        if hr <= 0 || hr < HR_MIN || hr > HR_MAX {
            continue;
        }
        if let Some(&last) = filtered.last() {
            if (hr - last).abs() > SPIKE_DELTA {
                continue;
            }
        }
        filtered.push(hr);
    }
    filtered
}

/// Maximum drop over a sliding window of `window` seconds, as a
/// non-negative integer. Returns 0 when there are not enough valid samples.
pub fn recovery_rate(heartrate: &[i64], window: usize) -> i64 {
    let valid = filter_hr_smooth(heartrate);
    if valid.len() < window + 1 {
        return 0;
    }
    let mut max_drop = 0i64;
    for i in 0..valid.len() - window {
        let drop = valid[i] - valid[i + window];
        if drop > max_drop {
            max_drop = drop;
        }
    }
    max_drop
}

/// Normalized power over the mean valid heart rate, two decimals.
/// `None` when either input has no valid samples.
pub fn efficiency_index(power: &[i64], heartrate: &[i64]) -> Option<f64> {
    let valid_power: Vec<i64> = power.iter().copied().filter(|p| *p > 0).collect();
    if valid_power.is_empty() {
        return None;
    }
    let np = normalized_power(&valid_power) as f64;
    let valid_hr = filter_hr_smooth(heartrate);
    if valid_hr.is_empty() {
        return None;
    }
    let avg_hr = valid_hr.iter().sum::<i64>() as f64 / valid_hr.len() as f64;
    if avg_hr <= 0.0 {
        return None;
    }
    Some(((np / avg_hr) * 100.0).round() / 100.0)
}

/// Aerobic decoupling: power/HR ratio of the first half against the second
/// half, formatted `"X.Y%"`. Results with magnitude above 30% are treated
/// as spurious and reported as `None`.
pub fn decoupling_rate(power: &[i64], heartrate: &[i64]) -> Option<String> {
    let m = power.len().min(heartrate.len());
    if m < 10 {
        return None;
    }
    let mid = m / 2;

    let ratio = |pp: &[i64], hh: &[i64]| -> f64 {
        if hh.is_empty() {
            return 0.0;
        }
        let avg_p = if pp.is_empty() {
            0.0
        } else {
            pp.iter().sum::<i64>() as f64 / pp.len() as f64
        };
        let avg_h = hh.iter().sum::<i64>() as f64 / hh.len() as f64;
        if avg_h > 0.0 {
            avg_p / avg_h
        } else {
            0.0
        }
    };

    let r1 = ratio(&power[..mid], &heartrate[..mid]);
    let r2 = ratio(&power[mid..m], &heartrate[mid..m]);
    if r1 > 0.0 && r2 > 0.0 {
        let dec = (r1 - r2) / r1 * 100.0;
        if dec.abs() > 30.0 {
            return None;
        }
        return Some(format!("{}%", (dec * 10.0).round() / 10.0));
    }
    None
}

/// Lag between power surges and heart-rate response via cross-correlation of
/// the mean-centered series. Returns `|lag|` seconds only when the peak
/// correlation reaches 0.3·n, else `None`.
pub fn hr_lag_seconds(power: &[i64], heartrate: &[i64]) -> Option<i64> {
    let m = power.len().min(heartrate.len());
    if m == 0 {
        return None;
    }
    let pa: Vec<f64> = power[..m].iter().map(|p| *p as f64).collect();
    let ha: Vec<f64> = heartrate[..m].iter().map(|h| *h as f64).collect();
    let p_mean = pa.iter().sum::<f64>() / m as f64;
    let h_mean = ha.iter().sum::<f64>() / m as f64;
    let pa: Vec<f64> = pa.iter().map(|v| v - p_mean).collect();
    let ha: Vec<f64> = ha.iter().map(|v| v - h_mean).collect();

    // full cross-correlation: lag index k in 0..2m-1 maps to shift k-(m-1)
    let mut best_corr = f64::NEG_INFINITY;
    let mut best_lag = 0i64;
    for k in 0..(2 * m - 1) {
        let shift = k as i64 - (m as i64 - 1);
        let mut corr = 0.0;
        for i in 0..m {
            let j = i as i64 - shift;
            if j >= 0 && (j as usize) < m {
                corr += pa[i] * ha[j as usize];
            }
        }
        if corr > best_corr {
            best_corr = corr;
            best_lag = shift;
        }
    }

    if best_corr < 0.3 * m as f64 {
        return None;
    }
    Some(best_lag.abs())
}
