//! Power analysis primitives: normalized power, best-power window scans,
//! the full best-power curve, and W' bookkeeping.
//!
//! The curve scan is the hot path of the whole engine; it uses prefix sums
//! so the inner step per window length is a single subtraction over
//! contiguous memory.

/// Fixed record windows tracked for personal bests, in seconds
pub const RECORD_WINDOWS: [(&str, usize); 13] = [
    ("5s", 5),
    ("15s", 15),
    ("30s", 30),
    ("1m", 60),
    ("2m", 120),
    ("3m", 180),
    ("5m", 300),
    ("10m", 600),
    ("15m", 900),
    ("20m", 1200),
    ("30m", 1800),
    ("45m", 2700),
    ("60m", 3600),
];

/// Normalized power: 30-second rolling mean (window shorter at the start
/// until full), fourth power, mean, fourth root, rounded to the nearest
/// integer watt.
pub fn normalized_power(powers: &[i64]) -> i64 {
    normalized_power_windowed(powers, 30)
}

/// Normalized power with an explicit rolling window
pub fn normalized_power_windowed(powers: &[i64], window: usize) -> i64 {
    if powers.is_empty() || window == 0 {
        return 0;
    }
    let mut sum = 0.0;
    let mut mean_fourth_acc = 0.0;
    for (i, p) in powers.iter().enumerate() {
        sum += *p as f64;
        if i >= window {
            sum -= powers[i - window] as f64;
        }
        let len = (i + 1).min(window);
        let rolling = sum / len as f64;
        mean_fourth_acc += rolling.powi(4);
    }
    let mean_fourth = mean_fourth_acc / powers.len() as f64;
    mean_fourth.powf(0.25).round() as i64
}

/// Maximum arithmetic mean of any contiguous window of `window` samples.
/// Returns 0 when the series is shorter than the window.
pub fn best_avg_over_window(powers: &[i64], window: usize) -> i64 {
    if window == 0 || powers.len() < window {
        return 0;
    }
    let mut sum: i64 = powers[..window].iter().sum();
    let mut max = sum;
    for i in window..powers.len() {
        sum += powers[i] - powers[i - window];
        if sum > max {
            max = sum;
        }
    }
    (max as f64 / window as f64).round() as i64
}

/// Best average power for every window length 1..=n.
///
/// Prefix-sum formulation: for window w the candidate sums are
/// `prefix[i+w] - prefix[i]`, so each length costs one linear pass.
pub fn best_power_curve(powers: &[i64]) -> Vec<i64> {
    let n = powers.len();
    if n == 0 {
        return Vec::new();
    }
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0;
    for p in powers {
        acc += *p as f64;
        prefix.push(acc);
    }

    let mut best = vec![0i64; n];
    for window in 1..=n {
        let mut max_sum = f64::NEG_INFINITY;
        for i in 0..=(n - window) {
            let s = prefix[i + window] - prefix[i];
            if s > max_sum {
                max_sum = s;
            }
        }
        best[window - 1] = (max_sum / window as f64).round() as i64;
    }
    best
}

/// Per-window bests for the fixed record set, read from a best-power curve.
/// Windows longer than the curve are omitted.
pub fn best_powers_from_curve(curve: &[i64]) -> Vec<(&'static str, i64)> {
    RECORD_WINDOWS
        .iter()
        .filter(|(_, sec)| curve.len() >= *sec)
        .map(|(name, sec)| (*name, curve[sec - 1]))
        .collect()
}

/// Work above FTP in kJ (truncated)
pub fn work_above_ftp(powers: &[i64], ftp: f64) -> i64 {
    if powers.is_empty() || ftp <= 0.0 {
        return 0;
    }
    let surplus: f64 = powers
        .iter()
        .map(|p| (*p as f64 - ftp).max(0.0))
        .sum();
    (surplus / 1000.0) as i64
}

/// Drop from the initial W' balance to its minimum, one decimal kJ.
/// `None` when the series is empty.
pub fn w_balance_decline(w_balance: &[f64]) -> Option<f64> {
    let first = *w_balance.first()?;
    let min = w_balance.iter().copied().fold(f64::INFINITY, f64::min);
    Some(((first - min) * 10.0).round() / 10.0)
}
