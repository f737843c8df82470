//! Interval detection for cycling activities.
//!
//! A multi-stage pipeline over 1 Hz power (heart rate optional): resample to
//! a uniform timeline, split fast/slow moving-average channels against a
//! rolling-median baseline, segment with hysteresis, overlay sprint
//! overrides, merge and tune boundaries, fill the remainder by intensity
//! ratio, classify, then repaint the whole timeline into contiguous
//! intervals. Alternating Z2/Z1 repeat blocks are detected separately.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use statrs::statistics::Statistics;

/// Configuration knobs controlling the detection pipeline
#[derive(Debug, Clone)]
pub struct IntervalDetectionConfig {
    /// 5-9 s moving average (fast channel)
    pub fast_window: usize,
    /// 25-35 s moving average (slow channel)
    pub slow_window: usize,
    /// rolling median window for the baseline
    pub baseline_window: usize,
    pub start_hysteresis: usize,
    pub stop_hysteresis: usize,
    pub merge_gap: i64,
    pub merge_ratio_delta: f64,
    pub sprint_ratio: f64,
    pub sprint_duration: usize,
    pub sprint_peak_ratio: f64,
    pub sprint_peak_duration: usize,
    pub zero_fill_window: usize,
}

impl Default for IntervalDetectionConfig {
    fn default() -> Self {
        Self {
            fast_window: 7,
            slow_window: 30,
            baseline_window: 150,
            start_hysteresis: 5,
            stop_hysteresis: 9,
            merge_gap: 10,
            merge_ratio_delta: 0.10,
            sprint_ratio: 1.5,
            sprint_duration: 6,
            sprint_peak_ratio: 1.8,
            sprint_peak_duration: 3,
            zero_fill_window: 3,
        }
    }
}

/// Interval classifications ordered by intensity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Recovery,
    Endurance,
    Tempo,
    Threshold,
    Vo2max,
    Anaerobic,
    Sprint,
    #[serde(rename = "z2-z1-repeats")]
    Z2Z1Repeats,
    Unclassified,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Recovery => "recovery",
            Classification::Endurance => "endurance",
            Classification::Tempo => "tempo",
            Classification::Threshold => "threshold",
            Classification::Vo2max => "vo2max",
            Classification::Anaerobic => "anaerobic",
            Classification::Sprint => "sprint",
            Classification::Z2Z1Repeats => "z2-z1-repeats",
            Classification::Unclassified => "unclassified",
        }
    }

    /// Paint priority: higher intensity wins when intervals overlap
    fn priority(self) -> i8 {
        match self {
            Classification::Recovery => 0,
            Classification::Endurance => 1,
            Classification::Tempo => 2,
            Classification::Threshold => 3,
            Classification::Vo2max => 4,
            Classification::Anaerobic => 5,
            Classification::Sprint => 6,
            _ => -1,
        }
    }

    /// Zone label for a power/FTP ratio
    fn from_ratio(ratio: f64) -> Self {
        if ratio >= 1.21 {
            Classification::Anaerobic
        } else if ratio >= 1.06 {
            Classification::Vo2max
        } else if ratio >= 0.95 {
            Classification::Threshold
        } else if ratio >= 0.76 {
            Classification::Tempo
        } else if ratio >= 0.56 {
            Classification::Endurance
        } else {
            Classification::Recovery
        }
    }
}

/// Per-interval statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalSummary {
    pub start: i64,
    pub end: i64,
    pub classification: Classification,
    pub average_power: f64,
    pub peak_power: f64,
    pub normalized_power: f64,
    pub intensity_factor: f64,
    pub power_ratio: f64,
    pub time_above_95: f64,
    pub time_above_106: f64,
    pub time_above_120: f64,
    pub time_above_150: f64,
    pub heart_rate_avg: Option<f64>,
    pub heart_rate_max: Option<i64>,
    pub heart_rate_slope: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl IntervalSummary {
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// One work/rest leg of a repeat cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatLeg {
    pub start: i64,
    pub end: i64,
    pub avg_ratio: f64,
}

/// One Z2/Z1 cycle inside a repeat block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatCycle {
    pub work: RepeatLeg,
    pub rest: RepeatLeg,
}

/// A block of alternating Z2/Z1 repeats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatBlock {
    pub start: i64,
    pub end: i64,
    pub cycles: Vec<RepeatCycle>,
}

impl RepeatBlock {
    pub fn classification(&self) -> Classification {
        Classification::Z2Z1Repeats
    }
}

/// Full result of one detection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalDetectionResult {
    pub duration: i64,
    pub ftp: f64,
    pub intervals: Vec<IntervalSummary>,
    pub repeats: Vec<RepeatBlock>,
}

impl IntervalDetectionResult {
    fn empty(ftp: f64) -> Self {
        Self {
            duration: 0,
            ftp,
            intervals: Vec::new(),
            repeats: Vec::new(),
        }
    }
}

/// Detect intervals covering the whole activity.
///
/// Never fails: an invalid FTP or an empty power series yields an empty
/// result.
pub fn detect_intervals(
    timestamps: &[i64],
    power: &[i64],
    ftp: Option<f64>,
    heart_rate: Option<&[i64]>,
    lthr: Option<f64>,
    hr_max: Option<f64>,
    config: Option<IntervalDetectionConfig>,
) -> IntervalDetectionResult {
    let ftp = match ftp {
        Some(f) if f > 0.0 => f,
        _ => return IntervalDetectionResult::empty(0.0),
    };
    let cfg = config.unwrap_or_default();

    let (ts, pw, hr) = prepare_inputs(timestamps, power, heart_rate, &cfg);
    if pw.is_empty() {
        return IntervalDetectionResult::empty(ftp);
    }
    let n = pw.len();
    let duration = ts.last().copied().unwrap_or(n as i64);

    let fast = moving_average(&pw, cfg.fast_window);
    let slow = moving_average(&pw, cfg.slow_window);
    let baseline = rolling_median(&slow, cfg.baseline_window);
    let theta = compute_theta(&fast, &baseline, ftp);

    let mut segments = segment_intervals(&fast, &slow, &baseline, theta, ftp, &cfg);
    segments.extend(detect_sprint_overrides(&pw, ftp, &cfg));
    let candidates = merge_and_adjust_segments(segments, &pw, &slow, ftp, &cfg);
    let ratio_segments = detect_ratio_segments(&slow, &candidates, ftp);

    let mut summaries: Vec<IntervalSummary> = candidates
        .iter()
        .filter(|(s, e)| e - s >= 3)
        .map(|&(s, e)| {
            summarize_interval(s as i64, e as i64, &pw, hr.as_deref(), ftp, lthr, hr_max)
        })
        .map(|summary| classify_interval(summary, ftp))
        .collect();
    for &(start, end, label) in &ratio_segments {
        let mut summary = summarize_interval(start, end, &pw, hr.as_deref(), ftp, lthr, hr_max);
        summary.classification = label;
        summary
            .metadata
            .insert("source".to_string(), Value::String("ratio".to_string()));
        summaries.push(summary);
    }

    // paint every sample with the highest-priority covering interval
    let mut coverage: Vec<Option<Classification>> = vec![None; n];
    for summary in &summaries {
        let label = summary.classification;
        if label.priority() < 0 {
            continue;
        }
        let s = summary.start.max(0) as usize;
        let e = (summary.end as usize).min(n);
        for slot in coverage.iter_mut().take(e).skip(s) {
            let overwrite = match slot {
                None => true,
                Some(current) => label.priority() >= current.priority(),
            };
            if overwrite {
                *slot = Some(label);
            }
        }
    }
    for (idx, slot) in coverage.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(Classification::from_ratio(pw[idx] / ftp));
        }
    }

    let runs = build_segments_from_coverage(&coverage);
    let runs = simplify_segments(runs, 60);

    let intervals: Vec<IntervalSummary> = runs
        .into_iter()
        .map(|(start, end, label)| {
            let mut summary =
                summarize_interval(start, end, &pw, hr.as_deref(), ftp, lthr, hr_max);
            summary.classification = label;
            summary
        })
        .collect();

    let repeats = detect_z2_z1_repeats(&pw, ftp, &ts);

    IntervalDetectionResult {
        duration,
        ftp,
        intervals,
        repeats,
    }
}

/// Summarize an arbitrary window of the power series (used for repeat
/// blocks and ad-hoc window queries).
pub fn summarize_window(
    power: &[i64],
    heart_rate: Option<&[i64]>,
    ftp: f64,
    start: i64,
    end: i64,
    lthr: Option<f64>,
    hr_max: Option<f64>,
) -> IntervalSummary {
    let pw: Vec<f64> = power.iter().map(|p| *p as f64).collect();
    let hr: Option<Vec<f64>> = heart_rate.map(|h| h.iter().map(|v| *v as f64).collect());
    let n = pw.len() as i64;
    let start = start.clamp(0, n);
    let end = end.clamp(start, n);
    summarize_interval(start, end, &pw, hr.as_deref(), ftp, lthr, hr_max)
}

// ---- preparation ----

fn prepare_inputs(
    timestamps: &[i64],
    power: &[i64],
    heart_rate: Option<&[i64]>,
    cfg: &IntervalDetectionConfig,
) -> (Vec<i64>, Vec<f64>, Option<Vec<f64>>) {
    if timestamps.is_empty() || power.is_empty() {
        return (Vec::new(), Vec::new(), None);
    }

    let mut order: Vec<usize> = (0..timestamps.len()).collect();
    order.sort_by_key(|&i| timestamps[i]);
    let ts: Vec<i64> = order.iter().map(|&i| timestamps[i]).collect();
    let pw_raw: Vec<f64> = order
        .iter()
        .take(power.len())
        .filter_map(|&i| power.get(i).map(|p| *p as f64))
        .collect();

    let regular =
        ts.len() == pw_raw.len() && ts.windows(2).all(|w| w[1] - w[0] <= 1);
    let (timeline, mut pw_series) = if regular {
        (ts.clone(), pw_raw.clone())
    } else {
        resample_to_1hz(&ts, &pw_raw)
    };

    for v in pw_series.iter_mut() {
        *v = v.clamp(0.0, 1600.0);
    }
    let pw_series = fill_short_zero_gaps(pw_series, cfg.zero_fill_window);

    let hr_series = heart_rate.and_then(|hr| {
        if hr.is_empty() {
            return None;
        }
        let raw: Vec<f64> = order
            .iter()
            .take(hr.len())
            .filter_map(|&i| hr.get(i).map(|v| *v as f64))
            .collect();
        if raw.len() == timeline.len() {
            Some(raw)
        } else {
            Some(resample_auxiliary(&timeline, &ts, &raw))
        }
    });

    (timeline, pw_series, hr_series)
}

/// Zero-order hold resample onto a 1 Hz timeline
fn resample_to_1hz(timestamps: &[i64], series: &[f64]) -> (Vec<i64>, Vec<f64>) {
    if timestamps.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let start = timestamps[0];
    let end = *timestamps.last().unwrap();
    let mapping: HashMap<i64, f64> = timestamps
        .iter()
        .zip(series.iter())
        .map(|(&t, &v)| (t, v))
        .collect();
    let mut timeline = Vec::with_capacity((end - start + 1) as usize);
    let mut filled = Vec::with_capacity(timeline.capacity());
    let mut last = 0.0;
    for sec in start..=end {
        if let Some(&v) = mapping.get(&sec) {
            last = v;
        }
        timeline.push(sec);
        filled.push(last);
    }
    (timeline, filled)
}

fn resample_auxiliary(target_ts: &[i64], original_ts: &[i64], values: &[f64]) -> Vec<f64> {
    let mapping: HashMap<i64, f64> = original_ts
        .iter()
        .zip(values.iter())
        .map(|(&t, &v)| (t, v))
        .collect();
    let mut filled = Vec::with_capacity(target_ts.len());
    let mut last: Option<f64> = None;
    for sec in target_ts {
        if let Some(&v) = mapping.get(sec) {
            last = Some(v);
        }
        filled.push(last.unwrap_or(0.0));
    }
    filled
}

/// Fill dropout gaps of up to `max_len` zero samples with neighbor values
fn fill_short_zero_gaps(mut series: Vec<f64>, max_len: usize) -> Vec<f64> {
    let mut zero_start: Option<usize> = None;
    for idx in 0..series.len() {
        if series[idx] <= 1e-6 {
            if zero_start.is_none() {
                zero_start = Some(idx);
            }
        } else {
            if let Some(start) = zero_start {
                let length = idx - start;
                if length > 0 && length <= max_len {
                    let fill_val = if start > 0 {
                        series[start - 1]
                    } else {
                        series[idx]
                    };
                    for v in series.iter_mut().take(idx).skip(start) {
                        *v = fill_val;
                    }
                }
            }
            zero_start = None;
        }
    }
    series
}

// ---- channels ----

/// Centered moving average with edge padding, output length preserved
fn moving_average(series: &[f64], window: usize) -> Vec<f64> {
    let n = series.len();
    if window <= 1 || n < window {
        return series.to_vec();
    }
    let pad_left = window / 2;
    let pad_right = window - 1 - pad_left;
    let mut padded = Vec::with_capacity(n + pad_left + pad_right);
    padded.extend(std::iter::repeat(series[0]).take(pad_left));
    padded.extend_from_slice(series);
    padded.extend(std::iter::repeat(series[n - 1]).take(pad_right));

    let mut out = Vec::with_capacity(n);
    let mut sum: f64 = padded[..window].iter().sum();
    out.push(sum / window as f64);
    for i in window..padded.len() {
        sum += padded[i] - padded[i - window];
        out.push(sum / window as f64);
    }
    out
}

/// Rolling median with edge padding, output length preserved
fn rolling_median(series: &[f64], window: usize) -> Vec<f64> {
    let n = series.len();
    if n == 0 {
        return Vec::new();
    }
    if window <= 1 {
        return series.to_vec();
    }
    let half = window / 2;
    let mut padded = Vec::with_capacity(n + 2 * half);
    padded.extend(std::iter::repeat(series[0]).take(half));
    padded.extend_from_slice(series);
    padded.extend(std::iter::repeat(series[n - 1]).take(half));

    let mut scratch = vec![0.0f64; window];
    let mut out = Vec::with_capacity(n);
    for idx in 0..n {
        scratch.copy_from_slice(&padded[idx..idx + window]);
        scratch.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = if window % 2 == 1 {
            scratch[window / 2]
        } else {
            (scratch[window / 2 - 1] + scratch[window / 2]) / 2.0
        };
        out.push(median);
    }
    out
}

fn compute_theta(fast: &[f64], baseline: &[f64], ftp: f64) -> f64 {
    let residual: Vec<f64> = fast
        .iter()
        .zip(baseline.iter())
        .map(|(f, b)| f - b)
        .collect();
    let sigma = if residual.is_empty() {
        0.0
    } else {
        residual.iter().population_std_dev()
    };
    (0.2 * ftp).max(0.75 * sigma)
}

// ---- segmentation ----

/// Hysteresis walk over `E = fast - (baseline + theta)`: five consecutive
/// positive samples open a segment; nine consecutive samples below -0.5
/// theta with the slow channel under 0.85 FTP close it.
fn segment_intervals(
    fast: &[f64],
    slow: &[f64],
    baseline: &[f64],
    theta: f64,
    ftp: f64,
    cfg: &IntervalDetectionConfig,
) -> Vec<(usize, usize)> {
    if fast.is_empty() {
        return Vec::new();
    }
    let mut segments = Vec::new();
    let mut start_idx: Option<usize> = None;
    let mut pos_count = 0usize;
    let mut neg_count = 0usize;

    for idx in 0..fast.len() {
        let e = fast[idx] - (baseline[idx] + theta);
        let ratio = slow[idx] / ftp;
        match start_idx {
            None => {
                if e > 0.0 {
                    pos_count += 1;
                    if pos_count >= cfg.start_hysteresis {
                        start_idx = Some(idx + 1 - cfg.start_hysteresis);
                        neg_count = 0;
                    }
                } else {
                    pos_count = 0;
                }
            }
            Some(start) => {
                if e < -0.5 * theta && ratio < 0.85 {
                    neg_count += 1;
                    if neg_count >= cfg.stop_hysteresis {
                        let end_idx = idx + 1 - cfg.stop_hysteresis;
                        if end_idx > start {
                            segments.push((start, end_idx));
                        }
                        start_idx = None;
                        pos_count = 0;
                        neg_count = 0;
                    }
                } else {
                    neg_count = 0;
                }
            }
        }
    }
    if let Some(start) = start_idx {
        segments.push((start, fast.len() - 1));
    }
    segments
}

/// Sprint overrides: a sample at 1.5 FTP opens a scan that extends while
/// power stays above 0.8 FTP; the segment is kept when it holds >= 6
/// samples at 1.5 FTP or >= 3 samples at 1.8 FTP.
fn detect_sprint_overrides(
    power: &[f64],
    ftp: f64,
    cfg: &IntervalDetectionConfig,
) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let n = power.len();
    let mut idx = 0usize;
    while idx < n {
        if power[idx] >= cfg.sprint_ratio * ftp {
            let start = idx;
            let mut high_counter = 0usize;
            let mut peak_counter = 0usize;
            while idx < n && power[idx] >= 0.8 * ftp {
                if power[idx] >= cfg.sprint_ratio * ftp {
                    high_counter += 1;
                }
                if power[idx] >= cfg.sprint_peak_ratio * ftp {
                    peak_counter += 1;
                }
                idx += 1;
            }
            if high_counter >= cfg.sprint_duration || peak_counter >= cfg.sprint_peak_duration {
                segments.push((start, idx));
            }
        } else {
            idx += 1;
        }
    }
    segments
}

/// Merge near-adjacent segments of similar power, then nudge both
/// endpoints up to four samples toward a local minimum of the slow channel.
fn merge_and_adjust_segments(
    mut segments: Vec<(usize, usize)>,
    power: &[f64],
    slow: &[f64],
    ftp: f64,
    cfg: &IntervalDetectionConfig,
) -> Vec<(usize, usize)> {
    if segments.is_empty() {
        return Vec::new();
    }
    segments.sort_by_key(|s| s.0);

    let segment_mean = |start: usize, end: usize| -> f64 {
        if end > start {
            power[start..end].iter().sum::<f64>() / (end - start) as f64
        } else {
            0.0
        }
    };

    let mut merged: Vec<(usize, usize)> = Vec::new();
    let (mut curr_start, mut curr_end) = segments[0];
    for &(start, end) in &segments[1..] {
        let gap = start as i64 - curr_end as i64;
        let mean_curr = segment_mean(curr_start, curr_end);
        let mean_next = segment_mean(start, end);
        if gap < cfg.merge_gap && (mean_curr - mean_next).abs() <= cfg.merge_ratio_delta * ftp {
            curr_end = curr_end.max(end);
        } else {
            merged.push((curr_start, curr_end));
            curr_start = start;
            curr_end = end;
        }
    }
    merged.push((curr_start, curr_end));

    merged
        .into_iter()
        .map(|(start, end)| {
            let adjusted_start = tune_boundary(start as i64, -1, slow, 4).max(0) as usize;
            let adjusted_end = (tune_boundary(end as i64, 1, slow, 4).max(0) as usize)
                .min(power.len());
            (adjusted_start, adjusted_end)
        })
        .collect()
}

fn tune_boundary(index: i64, direction: i64, reference: &[f64], window: i64) -> i64 {
    let mut candidate = index;
    let mut ref_val = if index >= 0 && (index as usize) < reference.len() {
        Some(reference[index as usize])
    } else {
        None
    };
    for offset in 1..=window {
        let test_idx = index + direction * offset;
        if test_idx >= 0 && (test_idx as usize) < reference.len() {
            let test_val = reference[test_idx as usize];
            if ref_val.map_or(true, |r| test_val < r) {
                ref_val = Some(test_val);
                candidate = test_idx;
            }
        }
    }
    candidate
}

// ---- ratio fill ----

const RATIO_FILL_BANDS: [(Classification, f64, f64); 6] = [
    (Classification::Anaerobic, 1.21, f64::INFINITY),
    (Classification::Vo2max, 1.06, 1.20),
    (Classification::Threshold, 0.95, 1.05),
    (Classification::Tempo, 0.76, 0.94),
    (Classification::Endurance, 0.56, 0.75),
    (Classification::Recovery, 0.0, 0.55),
];

/// Classify still-uncovered stretches via the slow channel, highest
/// intensity first, filling holes of up to five samples.
fn detect_ratio_segments(
    slow: &[f64],
    existing: &[(usize, usize)],
    ftp: f64,
) -> Vec<(i64, i64, Classification)> {
    if slow.is_empty() || ftp <= 0.0 {
        return Vec::new();
    }
    let mut unavailable = vec![false; slow.len()];
    for &(start, end) in existing {
        for flag in unavailable.iter_mut().take(end.min(slow.len())).skip(start) {
            *flag = true;
        }
    }

    let eps = 0.01;
    let mut segments = Vec::new();
    for &(label, lower, upper) in &RATIO_FILL_BANDS {
        let mut mask: Vec<bool> = slow
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let ratio = v / ftp;
                !unavailable[i] && ratio >= lower - eps && ratio <= upper + eps
            })
            .collect();
        if !mask.iter().any(|&m| m) {
            continue;
        }
        mask = fill_short_false(mask, 5);
        for (start, end) in iter_mask_segments(&mask, 1) {
            segments.push((start as i64, end as i64, label));
            for flag in unavailable.iter_mut().take(end).skip(start) {
                *flag = true;
            }
        }
    }
    segments
}

fn fill_short_false(mut mask: Vec<bool>, max_gap: usize) -> Vec<bool> {
    let mut gap_start: Option<usize> = None;
    for idx in 0..mask.len() {
        if !mask[idx] {
            if gap_start.is_none() {
                gap_start = Some(idx);
            }
        } else {
            if let Some(start) = gap_start {
                if idx - start <= max_gap {
                    for v in mask.iter_mut().take(idx).skip(start) {
                        *v = true;
                    }
                }
            }
            gap_start = None;
        }
    }
    if let Some(start) = gap_start {
        if mask.len() - start <= max_gap {
            for v in mask.iter_mut().skip(start) {
                *v = true;
            }
        }
    }
    mask
}

fn iter_mask_segments(mask: &[bool], min_length: usize) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, &val) in mask.iter().enumerate() {
        match (val, start) {
            (true, None) => start = Some(idx),
            (false, Some(s)) => {
                if idx - s >= min_length {
                    segments.push((s, idx));
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        if mask.len() - s >= min_length {
            segments.push((s, mask.len()));
        }
    }
    segments
}

// ---- coverage and cleanup ----

fn build_segments_from_coverage(
    coverage: &[Option<Classification>],
) -> Vec<(i64, i64, Classification)> {
    let mut segments = Vec::new();
    let n = coverage.len();
    let mut idx = 0usize;
    while idx < n {
        let label = coverage[idx].unwrap_or(Classification::Recovery);
        let start = idx;
        idx += 1;
        while idx < n && coverage[idx].unwrap_or(Classification::Recovery) == label {
            idx += 1;
        }
        segments.push((start as i64, idx as i64, label));
    }
    segments
}

/// Merge runs shorter than `min_length` into the longer neighbor until
/// stable. Sprint runs are exempt: a real sprint is rarely a minute long
/// and must survive as its own interval.
fn simplify_segments(
    segments: Vec<(i64, i64, Classification)>,
    min_length: i64,
) -> Vec<(i64, i64, Classification)> {
    if segments.is_empty() {
        return segments;
    }
    let mut merged = merge_adjacent_same_class(segments);

    let keep = |seg: &(i64, i64, Classification)| {
        seg.1 - seg.0 >= min_length || seg.2 == Classification::Sprint
    };

    let mut changed = true;
    while changed && merged.len() > 1 {
        changed = false;
        let mut i = 0usize;
        while i < merged.len() {
            if keep(&merged[i]) || merged.len() == 1 {
                i += 1;
                continue;
            }
            changed = true;
            let (start, end, _) = merged[i];
            if i == 0 {
                let (_, next_end, next_label) = merged[1];
                merged[1] = (start, next_end, next_label);
                merged.remove(0);
            } else if i == merged.len() - 1 {
                let (prev_start, _, prev_label) = merged[i - 1];
                merged[i - 1] = (prev_start, end, prev_label);
                merged.pop();
            } else {
                let (prev_start, prev_end, prev_label) = merged[i - 1];
                let (next_start, next_end, next_label) = merged[i + 1];
                let prev_len = prev_end - prev_start;
                let next_len = next_end - next_start;
                if prev_len >= next_len {
                    merged[i - 1] = (prev_start, end, prev_label);
                    merged.remove(i);
                    i = i.saturating_sub(1);
                } else {
                    merged[i + 1] = (start, next_end, next_label);
                    merged.remove(i);
                }
            }
            merged = merge_adjacent_same_class(merged);
        }
    }
    merged
}

fn merge_adjacent_same_class(
    segments: Vec<(i64, i64, Classification)>,
) -> Vec<(i64, i64, Classification)> {
    let mut merged: Vec<(i64, i64, Classification)> = Vec::with_capacity(segments.len());
    for (start, end, label) in segments {
        match merged.last_mut() {
            Some((_, last_end, last_label)) if *last_label == label => {
                *last_end = end;
            }
            _ => merged.push((start, end, label)),
        }
    }
    merged
}

// ---- summaries and classification ----

fn summarize_interval(
    start: i64,
    end: i64,
    power: &[f64],
    heart_rate: Option<&[f64]>,
    ftp: f64,
    lthr: Option<f64>,
    hr_max: Option<f64>,
) -> IntervalSummary {
    let duration = end - start;
    let s = start.max(0) as usize;
    let e = (end.max(0) as usize).min(power.len());
    let slice = if s < e { &power[s..e] } else { &[][..] };

    if duration <= 0 || slice.is_empty() {
        return IntervalSummary {
            start,
            end,
            classification: Classification::Recovery,
            average_power: 0.0,
            peak_power: 0.0,
            normalized_power: 0.0,
            intensity_factor: 0.0,
            power_ratio: 0.0,
            time_above_95: 0.0,
            time_above_106: 0.0,
            time_above_120: 0.0,
            time_above_150: 0.0,
            heart_rate_avg: None,
            heart_rate_max: None,
            heart_rate_slope: None,
            metadata: HashMap::new(),
        };
    }

    let avg_power = slice.iter().sum::<f64>() / slice.len() as f64;
    let peak_power = slice.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let norm_power = window_normalized_power(slice);
    let intensity = norm_power / ftp;
    let ratio = avg_power / ftp;
    let (t95, t106, t120, t150) = time_above_thresholds(slice, ftp);

    let mut hr_avg = None;
    let mut hr_max_val = None;
    let mut hr_slope = None;
    let mut hr_slice: Option<&[f64]> = None;
    if let Some(hr) = heart_rate {
        if hr.len() >= e {
            let sl = &hr[s..e];
            hr_slice = Some(sl);
            let valid: Vec<f64> = sl.iter().copied().filter(|v| *v > 0.0).collect();
            if !valid.is_empty() {
                hr_avg = Some(valid.iter().sum::<f64>() / valid.len() as f64);
                hr_max_val = Some(valid.iter().copied().fold(f64::NEG_INFINITY, f64::max) as i64);
                hr_slope = Some((valid[valid.len() - 1] - valid[0]) / duration as f64);
            }
        }
    }

    let mut metadata = HashMap::new();
    if let (Some(lthr), Some(sl)) = (lthr, hr_slice) {
        if lthr > 0.0 {
            let over = sl.iter().filter(|v| **v >= lthr).count();
            metadata.insert(
                "time_over_lthr".to_string(),
                Value::from(over as f64 / duration as f64),
            );
        }
    }
    if let (Some(hr_max), Some(avg)) = (hr_max, hr_avg) {
        if hr_max > 0.0 {
            metadata.insert("hr_percent_max".to_string(), Value::from(avg / hr_max));
        }
    }

    IntervalSummary {
        start,
        end,
        classification: Classification::Unclassified,
        average_power: avg_power,
        peak_power,
        normalized_power: norm_power,
        intensity_factor: intensity,
        power_ratio: ratio,
        time_above_95: t95,
        time_above_106: t106,
        time_above_120: t120,
        time_above_150: t150,
        heart_rate_avg: hr_avg,
        heart_rate_max: hr_max_val,
        heart_rate_slope: hr_slope,
        metadata,
    }
}

/// Normalized power of a window: plain mean below 30 samples, otherwise the
/// fourth-root-of-mean-fourth over the centered 30 s moving average.
fn window_normalized_power(series: &[f64]) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let window = 30usize;
    if series.len() <= window {
        return series.iter().sum::<f64>() / series.len() as f64;
    }
    let moving = moving_average(series, window);
    let mean_fourth =
        moving.iter().map(|v| v.max(0.0).powi(4)).sum::<f64>() / moving.len() as f64;
    mean_fourth.powf(0.25)
}

fn time_above_thresholds(series: &[f64], ftp: f64) -> (f64, f64, f64, f64) {
    if series.is_empty() || ftp <= 0.0 {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let duration = series.len() as f64;
    let count = |threshold: f64| {
        series.iter().filter(|p| **p / ftp > threshold).count() as f64 / duration
    };
    (count(0.95), count(1.06), count(1.20), count(1.50))
}

fn classify_interval(mut summary: IntervalSummary, ftp: f64) -> IntervalSummary {
    if summary.classification != Classification::Unclassified {
        return summary;
    }
    let dur = summary.duration();
    let ratio = summary.power_ratio;
    let peak_ratio = summary.peak_power / ftp;
    let sustained_over_150 = summary.time_above_150 * dur as f64 >= 6.0;

    summary.classification = if (peak_ratio >= 1.8 && dur >= 3)
        || (ratio >= 1.6 && (3..=15).contains(&dur))
        || (sustained_over_150 && dur <= 40 && ratio >= 1.3)
    {
        Classification::Sprint
    } else if ratio >= 1.21 || summary.time_above_120 >= 0.70 {
        Classification::Anaerobic
    } else if ratio >= 1.06 || summary.time_above_106 >= 0.60 {
        Classification::Vo2max
    } else if ratio >= 0.95 || summary.time_above_95 >= 0.70 {
        Classification::Threshold
    } else if ratio >= 0.76 {
        Classification::Tempo
    } else if ratio >= 0.56 {
        Classification::Endurance
    } else {
        Classification::Recovery
    };
    summary
}

// ---- Z2/Z1 repeats ----

/// Detect chains of alternating Z2/Z1 legs (each >= 60 s, inter-leg gap
/// <= 60 s). A chain of at least two full pairs qualifies when both legs'
/// duration CVs stay under 0.25 and the mean ratio gap is at least 0.10.
fn detect_z2_z1_repeats(power: &[f64], ftp: f64, timestamps: &[i64]) -> Vec<RepeatBlock> {
    if power.is_empty() || ftp <= 0.0 {
        return Vec::new();
    }
    let ratios: Vec<f64> = power.iter().map(|p| p / ftp).collect();
    let segments = extract_ratio_segments(&ratios, timestamps);
    let mut blocks = Vec::new();
    let mut idx = 0usize;

    while idx + 3 < segments.len() {
        if segments[idx].2 != RepeatZone::Z2 {
            idx += 1;
            continue;
        }
        let mut group: Vec<&RatioSegment> = Vec::new();
        let mut j = idx;
        while j < segments.len() {
            let seg = &segments[j];
            match group.last() {
                None => {
                    if seg.2 != RepeatZone::Z2 {
                        break;
                    }
                    group.push(seg);
                }
                Some(last) => {
                    let expected = if last.2 == RepeatZone::Z2 {
                        RepeatZone::Z1
                    } else {
                        RepeatZone::Z2
                    };
                    if seg.2 != expected || seg.0 - last.1 > 60 {
                        break;
                    }
                    group.push(seg);
                }
            }
            j += 1;
        }

        let pairs = group.len() / 2;
        if pairs >= 2 {
            let z2_durations: Vec<f64> = group
                .iter()
                .filter(|s| s.2 == RepeatZone::Z2)
                .map(|s| (s.1 - s.0) as f64)
                .collect();
            let z1_durations: Vec<f64> = group
                .iter()
                .filter(|s| s.2 == RepeatZone::Z1)
                .map(|s| (s.1 - s.0) as f64)
                .collect();
            if !z2_durations.is_empty() && !z1_durations.is_empty() {
                let cv_z2 = coefficient_of_variation(&z2_durations);
                let cv_z1 = coefficient_of_variation(&z1_durations);
                let avg_ratio = |zone: RepeatZone| {
                    let vals: Vec<f64> = group
                        .iter()
                        .filter(|s| s.2 == zone)
                        .map(|s| s.3)
                        .collect();
                    vals.iter().sum::<f64>() / vals.len() as f64
                };
                let ratio_z2 = avg_ratio(RepeatZone::Z2);
                let ratio_z1 = avg_ratio(RepeatZone::Z1);
                if cv_z2 <= 0.25 && cv_z1 <= 0.25 && ratio_z2 - ratio_z1 >= 0.10 {
                    let cycles = group
                        .chunks(2)
                        .filter(|c| c.len() == 2)
                        .map(|c| RepeatCycle {
                            work: RepeatLeg {
                                start: c[0].0,
                                end: c[0].1,
                                avg_ratio: c[0].3,
                            },
                            rest: RepeatLeg {
                                start: c[1].0,
                                end: c[1].1,
                                avg_ratio: c[1].3,
                            },
                        })
                        .collect();
                    blocks.push(RepeatBlock {
                        start: group[0].0,
                        end: group[group.len() - 1].1,
                        cycles,
                    });
                    idx = j;
                    continue;
                }
            }
        }
        idx += 1;
    }
    blocks
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepeatZone {
    Z1,
    Z2,
}

/// (start_time, end_time, zone, avg_ratio)
type RatioSegment = (i64, i64, RepeatZone, f64);

/// Greedy zone runs: a Z2 run opens at ratio 0.60-0.75 and extends while
/// 0.58-0.78; a Z1 run opens at 0.40-0.55 and extends while 0.38-0.60.
/// Runs shorter than 60 s are discarded.
fn extract_ratio_segments(ratios: &[f64], timestamps: &[i64]) -> Vec<RatioSegment> {
    let mut segments = Vec::new();
    let n = ratios.len();
    let mut idx = 0usize;
    while idx < n {
        let ratio = ratios[idx];
        let zone = if (0.60..=0.75).contains(&ratio) {
            Some(RepeatZone::Z2)
        } else if (0.40..=0.55).contains(&ratio) {
            Some(RepeatZone::Z1)
        } else {
            None
        };
        let Some(zone) = zone else {
            idx += 1;
            continue;
        };
        let start_idx = idx;
        while idx < n {
            let in_zone = match zone {
                RepeatZone::Z2 => (0.58..=0.78).contains(&ratios[idx]),
                RepeatZone::Z1 => (0.38..=0.60).contains(&ratios[idx]),
            };
            if !in_zone {
                break;
            }
            idx += 1;
        }
        let end_idx = idx;
        if end_idx > start_idx {
            let duration = timestamps[end_idx - 1] - timestamps[start_idx] + 1;
            if duration >= 60 {
                let avg_ratio = ratios[start_idx..end_idx].iter().sum::<f64>()
                    / (end_idx - start_idx) as f64;
                segments.push((
                    timestamps[start_idx],
                    timestamps[end_idx - 1] + 1,
                    zone,
                    avg_ratio,
                ));
            }
        }
    }
    segments
}

fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::INFINITY;
    }
    let mean = values.iter().mean();
    if mean == 0.0 {
        return f64::INFINITY;
    }
    values.iter().population_std_dev() / mean
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(power: Vec<i64>, ftp: f64) -> IntervalDetectionResult {
        let timestamps: Vec<i64> = (0..power.len() as i64).collect();
        detect_intervals(&timestamps, &power, Some(ftp), None, None, None, None)
    }

    fn assert_partition(result: &IntervalDetectionResult, n: i64) {
        assert!(!result.intervals.is_empty());
        assert_eq!(result.intervals[0].start, 0);
        assert_eq!(result.intervals.last().unwrap().end, n);
        for pair in result.intervals.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap in partition");
        }
    }

    #[test]
    fn test_invalid_ftp_yields_empty_result() {
        let result = detect(vec![200; 300], 0.0);
        assert_eq!(result.duration, 0);
        assert_eq!(result.ftp, 0.0);
        assert!(result.intervals.is_empty());
        assert!(result.repeats.is_empty());
    }

    #[test]
    fn test_empty_power_yields_empty_result() {
        let result = detect_intervals(&[], &[], Some(250.0), None, None, None, None);
        assert_eq!(result.duration, 0);
        assert!(result.intervals.is_empty());
    }

    #[test]
    fn test_steady_ride_is_single_interval() {
        let result = detect(vec![150; 600], 250.0);
        assert_partition(&result, 600);
        assert_eq!(result.intervals.len(), 1);
        assert_eq!(result.intervals[0].classification, Classification::Endurance);
    }

    #[test]
    fn test_single_sprint_detected() {
        // 300 s at 150 W with samples 120..135 at 420 W, FTP 250
        let mut power = vec![150i64; 300];
        for p in power.iter_mut().take(135).skip(120) {
            *p = 420;
        }
        let result = detect(power, 250.0);

        let sprint: Vec<&IntervalSummary> = result
            .intervals
            .iter()
            .filter(|i| i.classification == Classification::Sprint)
            .collect();
        assert_eq!(sprint.len(), 1, "intervals: {:?}", result.intervals);
        assert!(sprint[0].start <= 120 && sprint[0].end >= 135);

        for interval in &result.intervals {
            if interval.classification != Classification::Sprint {
                assert!(
                    matches!(
                        interval.classification,
                        Classification::Recovery | Classification::Endurance
                    ),
                    "unexpected class {:?}",
                    interval.classification
                );
            }
        }
        assert_partition(&result, 300);
    }

    #[test]
    fn test_z2_z1_repeats_detected() {
        // two cycles of 300 s @0.65 FTP / 100 s @0.50 FTP, FTP 220
        let work = (220.0 * 0.65) as i64;
        let rest = (220.0 * 0.50) as i64;
        let mut power = Vec::new();
        for _ in 0..2 {
            power.extend(vec![work; 300]);
            power.extend(vec![rest; 100]);
        }
        let result = detect(power, 220.0);
        assert_eq!(result.repeats.len(), 1, "repeats: {:?}", result.repeats);
        assert!(result.repeats[0].cycles.len() >= 2);
        let cycle = &result.repeats[0].cycles[0];
        assert!(cycle.work.avg_ratio > cycle.rest.avg_ratio);
    }

    #[test]
    fn test_irregular_timestamps_resampled() {
        // 5-second sampling gets zero-order-held to 1 Hz
        let timestamps: Vec<i64> = (0..60).map(|i| i * 5).collect();
        let power = vec![160i64; 60];
        let result =
            detect_intervals(&timestamps, &power, Some(250.0), None, None, None, None);
        assert_eq!(result.duration, 295);
        assert!(!result.intervals.is_empty());
        assert_eq!(result.intervals.last().unwrap().end, 296);
    }

    #[test]
    fn test_zero_gap_filled() {
        let mut power = vec![200i64; 120];
        power[50] = 0;
        power[51] = 0;
        let result = detect(power, 250.0);
        // short dropouts must not split the ride
        assert_eq!(result.intervals.len(), 1);
    }

    #[test]
    fn test_short_runs_merged_into_neighbors() {
        // 30 s tempo bump inside a long endurance ride is absorbed
        let mut power = vec![140i64; 600];
        for p in power.iter_mut().take(330).skip(300) {
            *p = 180;
        }
        let result = detect(power, 250.0);
        for interval in &result.intervals {
            let dur = interval.duration();
            assert!(
                dur >= 60 || interval.classification == Classification::Sprint,
                "short non-sprint interval: {:?}",
                interval
            );
        }
    }

    #[test]
    fn test_interval_summary_fields() {
        let mut power = vec![150i64; 300];
        for p in power.iter_mut().take(135).skip(120) {
            *p = 420;
        }
        let timestamps: Vec<i64> = (0..300).collect();
        let hr = vec![140i64; 300];
        let result = detect_intervals(
            &timestamps,
            &power,
            Some(250.0),
            Some(&hr),
            Some(160.0),
            Some(190.0),
            None,
        );
        let sprint = result
            .intervals
            .iter()
            .find(|i| i.classification == Classification::Sprint)
            .unwrap();
        assert!(sprint.average_power > 250.0);
        assert!(sprint.peak_power >= 420.0);
        assert!(sprint.power_ratio > 1.0);
        assert_eq!(sprint.heart_rate_avg, Some(140.0));
        assert!(sprint.metadata.contains_key("hr_percent_max"));
    }

    #[test]
    fn test_summarize_window() {
        let power = vec![200i64; 120];
        let summary = summarize_window(&power, None, 250.0, 30, 90, None, None);
        assert_eq!(summary.start, 30);
        assert_eq!(summary.end, 90);
        assert_eq!(summary.average_power, 200.0);
    }

    #[test]
    fn test_classify_thresholds() {
        let base = |ratio: f64, dur: i64| IntervalSummary {
            start: 0,
            end: dur,
            classification: Classification::Unclassified,
            average_power: ratio * 250.0,
            peak_power: ratio * 250.0,
            normalized_power: ratio * 250.0,
            intensity_factor: ratio,
            power_ratio: ratio,
            time_above_95: 0.0,
            time_above_106: 0.0,
            time_above_120: 0.0,
            time_above_150: 0.0,
            heart_rate_avg: None,
            heart_rate_max: None,
            heart_rate_slope: None,
            metadata: HashMap::new(),
        };
        assert_eq!(
            classify_interval(base(1.25, 120), 250.0).classification,
            Classification::Anaerobic
        );
        assert_eq!(
            classify_interval(base(1.10, 120), 250.0).classification,
            Classification::Vo2max
        );
        assert_eq!(
            classify_interval(base(1.0, 120), 250.0).classification,
            Classification::Threshold
        );
        assert_eq!(
            classify_interval(base(0.8, 120), 250.0).classification,
            Classification::Tempo
        );
        assert_eq!(
            classify_interval(base(0.6, 120), 250.0).classification,
            Classification::Endurance
        );
        assert_eq!(
            classify_interval(base(0.3, 120), 250.0).classification,
            Classification::Recovery
        );
        // short very hard efforts are sprints
        assert_eq!(
            classify_interval(base(1.7, 10), 250.0).classification,
            Classification::Sprint
        );
    }

    #[test]
    fn test_moving_average_preserves_length() {
        let series: Vec<f64> = (0..100).map(|i| i as f64).collect();
        assert_eq!(moving_average(&series, 7).len(), 100);
        assert_eq!(moving_average(&series, 1).len(), 100);
        let short = vec![1.0, 2.0];
        assert_eq!(moving_average(&short, 7), short);
    }

    #[test]
    fn test_rolling_median_flat() {
        let series = vec![5.0; 50];
        assert_eq!(rolling_median(&series, 15), series);
    }

    #[test]
    fn test_fill_short_zero_gaps() {
        let series = vec![100.0, 0.0, 0.0, 100.0, 0.0, 0.0, 0.0, 0.0, 100.0];
        let filled = fill_short_zero_gaps(series, 3);
        assert_eq!(filled[1], 100.0);
        assert_eq!(filled[2], 100.0);
        // the 4-sample gap stays zero
        assert_eq!(filled[5], 0.0);
    }
}
