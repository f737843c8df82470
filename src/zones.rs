//! Zone distributions for power and heart rate.
//!
//! Power uses the seven-band Coggan model relative to FTP. Heart rate uses
//! five max-HR bands, or five LTHR bands when the athlete has threshold
//! zoning active. Samples <= 0 are excluded from the denominator.

use serde::{Deserialize, Serialize};

use crate::timeutil::format_time;

/// One zone bucket as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneBucket {
    pub min: i64,

    /// Upper bound in watts/bpm, -1 for the open-ended last band
    pub max: i64,

    /// Time in zone, formatted
    pub time: String,

    /// Share of valid samples, formatted "X.Y%"
    pub percentage: String,
}

/// Zone buckets for one source stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneData {
    pub distribution_buckets: Vec<ZoneBucket>,
    #[serde(rename = "type")]
    pub zone_type: String,
}

/// Power zone boundaries as fractions of FTP
const POWER_ZONE_BOUNDS: [f64; 6] = [0.55, 0.75, 0.90, 1.05, 1.20, 1.50];

/// Max-HR zone boundaries
const MAX_HR_BOUNDS: [f64; 4] = [0.60, 0.70, 0.80, 0.90];

/// LTHR zone boundaries
const LTHR_BOUNDS: [f64; 4] = [0.85, 0.90, 0.95, 1.00];

fn percentage(time_in_zone: i64, total: i64) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", time_in_zone as f64 / total as f64 * 100.0)
}

/// Band edges `(min, max)` with `max == None` meaning open-ended
fn band_edges(threshold: f64, bounds: &[f64], open_last: bool, last_max: Option<i64>) -> Vec<(i64, Option<i64>)> {
    let mut edges = Vec::with_capacity(bounds.len() + 1);
    let mut lower = 0i64;
    for b in bounds {
        let upper = (threshold * b) as i64;
        edges.push((lower, Some(upper)));
        lower = upper;
    }
    if open_last {
        edges.push((lower, None));
    } else {
        edges.push((lower, last_max));
    }
    edges
}

fn bucketize(samples: &[i64], edges: &[(i64, Option<i64>)]) -> Vec<ZoneBucket> {
    let mut zone_times = vec![0i64; edges.len()];
    let mut valid = 0i64;
    for &s in samples {
        if s <= 0 {
            continue;
        }
        valid += 1;
        let mut assigned = false;
        for (i, (min, max)) in edges.iter().enumerate() {
            let in_band = match max {
                Some(max) => s >= *min && s < *max,
                None => s >= *min,
            };
            if in_band {
                zone_times[i] += 1;
                assigned = true;
                break;
            }
        }
        if !assigned {
            // above every bounded band: attribute to the top zone
            if let Some((min, _)) = edges.last() {
                if s >= *min {
                    *zone_times.last_mut().unwrap() += 1;
                }
            }
        }
    }

    edges
        .iter()
        .zip(zone_times.iter())
        .map(|((min, max), t)| ZoneBucket {
            min: *min,
            max: max.unwrap_or(-1),
            time: format_time(*t),
            percentage: percentage(*t, valid),
        })
        .collect()
}

/// Seven-band power distribution relative to FTP. Empty when power data is
/// absent or FTP is not positive.
pub fn analyze_power_zones(power: &[i64], ftp: f64) -> Vec<ZoneBucket> {
    if power.is_empty() || ftp <= 0.0 {
        return Vec::new();
    }
    let edges = band_edges(ftp, &POWER_ZONE_BOUNDS, true, None);
    bucketize(power, &edges)
}

/// Five-band heart-rate distribution against max HR
pub fn analyze_heartrate_zones(heartrate: &[i64], max_hr: i64) -> Vec<ZoneBucket> {
    if heartrate.is_empty() || max_hr <= 0 {
        return Vec::new();
    }
    let edges = band_edges(max_hr as f64, &MAX_HR_BOUNDS, false, Some(max_hr));
    bucketize(heartrate, &edges)
}

/// Five-band heart-rate distribution against LTHR, last band open-ended
pub fn analyze_heartrate_zones_lthr(heartrate: &[i64], lthr: i64) -> Vec<ZoneBucket> {
    if heartrate.is_empty() || lthr <= 0 {
        return Vec::new();
    }
    let edges = band_edges(lthr as f64, &LTHR_BOUNDS, true, None);
    bucketize(heartrate, &edges)
}

/// Per-band percentages as plain floats, indexed Z1..Z7
pub fn power_zone_percentages(power: &[i64], ftp: f64) -> Vec<f64> {
    analyze_power_zones(power, ftp)
        .iter()
        .map(|z| z.percentage.trim_end_matches('%').parse().unwrap_or(0.0))
        .collect()
}

/// Per-band times in seconds, indexed Z1..Z7
pub fn power_zone_times(power: &[i64], ftp: f64) -> Vec<i64> {
    analyze_power_zones(power, ftp)
        .iter()
        .map(|z| crate::timeutil::parse_time_str(&z.time))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_zone_percentages_sum_to_100() {
        // 60 s @200, 60 s @260, 30 s @300 with FTP 250
        let mut power = vec![200i64; 60];
        power.extend(vec![260i64; 60]);
        power.extend(vec![300i64; 30]);
        let percentages = power_zone_percentages(&power, 250.0);
        assert_eq!(percentages.len(), 7);
        let total: f64 = percentages.iter().sum();
        assert!((total - 100.0).abs() < 0.5, "total={}", total);
        // 200/250 = 0.80 falls in Z3 (0.75..0.90): the largest share
        let z3 = percentages[2];
        assert!(percentages.iter().all(|p| *p <= z3), "{:?}", percentages);
    }

    #[test]
    fn test_power_zone_boundaries() {
        let buckets = analyze_power_zones(&[100], 200.0);
        assert_eq!(buckets.len(), 7);
        assert_eq!(buckets[0].min, 0);
        assert_eq!(buckets[0].max, 110);
        assert_eq!(buckets[1].max, 150);
        assert_eq!(buckets[6].max, -1);
    }

    #[test]
    fn test_power_zones_empty_without_ftp() {
        assert!(analyze_power_zones(&[100, 200], 0.0).is_empty());
        assert!(analyze_power_zones(&[], 250.0).is_empty());
    }

    #[test]
    fn test_zero_samples_dropped_from_denominator() {
        let mut power = vec![0i64; 50];
        power.extend(vec![100i64; 50]);
        let buckets = analyze_power_zones(&power, 200.0);
        // all valid samples in Z1
        assert_eq!(buckets[0].percentage, "100.0%");
        assert_eq!(buckets[0].time, "50s");
    }

    #[test]
    fn test_heartrate_zones_max_hr() {
        let buckets = analyze_heartrate_zones(&[100, 150, 185], 190);
        assert_eq!(buckets.len(), 5);
        assert_eq!(buckets[0].max, 114);
        assert_eq!(buckets[4].max, 190);
        // 185 lands in the top band even though it is below max
        assert_eq!(buckets[4].time, "1s");
    }

    #[test]
    fn test_heartrate_above_max_goes_to_top_band() {
        let buckets = analyze_heartrate_zones(&[195], 190);
        assert_eq!(buckets[4].time, "1s");
    }

    #[test]
    fn test_lthr_zones() {
        let buckets = analyze_heartrate_zones_lthr(&[140, 160, 170], 165);
        assert_eq!(buckets.len(), 5);
        assert_eq!(buckets[0].max, 140);
        assert_eq!(buckets[4].max, -1);
        // 170 >= LTHR lands in the open band
        assert_eq!(buckets[4].time, "1s");
    }

    #[test]
    fn test_power_zone_times_roundtrip() {
        let power = vec![100i64; 90];
        let times = power_zone_times(&power, 200.0);
        assert_eq!(times[0], 90);
        assert_eq!(times.iter().sum::<i64>(), 90);
    }
}
