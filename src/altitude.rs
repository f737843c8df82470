//! Altitude filters and aggregates: elevation gain, total descent, grade,
//! uphill/downhill distance.

/// Altitude readings outside this window are sensor noise, in meters
const ALT_MAX: f64 = 5000.0;
const ALT_MIN: f64 = -500.0;

/// One-sample altitude jumps larger than this are glitches
const GLITCH_DELTA: f64 = 100.0;

/// Window width in samples for grade and uphill/downhill scans
const GRADE_POINTS: usize = 5;

/// Minimum horizontal travel over the window for a valid grade reading
const MIN_DISTANCE_INTERVAL: f64 = 50.0;

/// Sum of positive successive deltas after filtering out-of-range readings
/// and single-sample glitches.
pub fn elevation_gain(altitude: &[f64]) -> f64 {
    let mut filtered: Vec<f64> = Vec::with_capacity(altitude.len());
    for &alt in altitude {
        if alt > ALT_MAX || alt < ALT_MIN {
            continue;
        }
        if let Some(&last) = filtered.last() {
            if (alt - last).abs() > GLITCH_DELTA {
                continue;
            }
        }
        filtered.push(alt);
    }
    if filtered.len() < 2 {
        return 0.0;
    }
    filtered
        .windows(2)
        .map(|w| (w[1] - w[0]).max(0.0))
        .sum()
}

/// Total descent: walk the series detecting strictly-decreasing runs and sum
/// `(run_start - run_min)` over all runs, including a trailing unclosed run.
pub fn total_descent(altitude: &[f64]) -> i64 {
    if altitude.is_empty() {
        return 0;
    }
    let mut total = 0.0;
    let mut descending = false;
    let mut start_alt = altitude[0];
    let mut min_alt = altitude[0];
    for i in 1..altitude.len() {
        let prev = altitude[i - 1];
        let curr = altitude[i];
        if curr < prev {
            if !descending {
                descending = true;
                start_alt = prev;
                min_alt = curr;
            } else if curr < min_alt {
                min_alt = curr;
            }
        } else if descending {
            total += start_alt - min_alt;
            descending = false;
        }
    }
    if descending {
        total += start_alt - min_alt;
    }
    total as i64
}

/// Maximum absolute grade over a five-point window, in percent with two
/// decimals. Readings require 50 m < Δdist < 1000 m and |grade| <= 50%.
pub fn max_grade_percent(altitude: &[f64], distance: &[f64]) -> f64 {
    if altitude.is_empty() || distance.is_empty() {
        return 0.0;
    }
    let n = altitude.len().min(distance.len());
    let mut max_grade = 0.0f64;
    for i in GRADE_POINTS..n {
        let delta_alt = altitude[i] - altitude[i - GRADE_POINTS];
        let delta_dist = distance[i] - distance[i - GRADE_POINTS];
        if delta_dist > MIN_DISTANCE_INTERVAL && delta_dist < 1000.0 {
            let g = delta_alt / delta_dist * 100.0;
            if g.abs() <= 50.0 && g.abs() > max_grade {
                max_grade = g.abs();
            }
        }
    }
    (max_grade * 100.0).round() / 100.0
}

/// Uphill and downhill distance in km with two decimals, accumulated over
/// the same five-point window when the altitude delta exceeds +-1 m.
pub fn uphill_downhill_distance_km(altitude: &[f64], distance: &[f64]) -> (f64, f64) {
    if altitude.is_empty() || distance.is_empty() {
        return (0.0, 0.0);
    }
    let n = altitude.len().min(distance.len());
    let mut uphill = 0.0;
    let mut downhill = 0.0;
    for i in GRADE_POINTS..n {
        let delta_alt = altitude[i] - altitude[i - GRADE_POINTS];
        let delta_dist = distance[i] - distance[i - GRADE_POINTS];
        if delta_dist > MIN_DISTANCE_INTERVAL {
            if delta_alt > 1.0 {
                uphill += delta_dist;
            } else if delta_alt < -1.0 {
                downhill += delta_dist;
            }
        }
    }
    (
        (uphill / 1000.0 * 100.0).round() / 100.0,
        (downhill / 1000.0 * 100.0).round() / 100.0,
    )
}
