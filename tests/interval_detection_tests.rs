//! Interval detection properties on synthetic rides: full coverage,
//! minimum interval lengths, sprint survival, and repeat blocks.

use velometrics::intervals::{detect_intervals, Classification, IntervalDetectionResult};

fn detect(power: &[i64], ftp: f64) -> IntervalDetectionResult {
    let timestamps: Vec<i64> = (0..power.len() as i64).collect();
    detect_intervals(&timestamps, power, Some(ftp), None, None, None, None)
}

/// Deterministic pseudo-random series for noisy-ride tests
fn noisy_ride(len: usize, base: i64, spread: i64) -> Vec<i64> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            base + ((state >> 33) % (2 * spread as u64 + 1)) as i64 - spread
        })
        .collect()
}

fn assert_covers(result: &IntervalDetectionResult, n: i64) {
    assert!(!result.intervals.is_empty());
    assert_eq!(result.intervals[0].start, 0, "first interval starts at 0");
    assert_eq!(
        result.intervals.last().unwrap().end,
        n,
        "last interval ends at the series length"
    );
    for pair in result.intervals.windows(2) {
        assert_eq!(
            pair[0].end, pair[1].start,
            "intervals must be contiguous: {:?} then {:?}",
            pair[0].classification, pair[1].classification
        );
    }
}

#[test]
fn coverage_partition_on_noisy_endurance_ride() {
    let power = noisy_ride(3600, 170, 25);
    let result = detect(&power, 250.0);
    assert_covers(&result, 3600);
}

#[test]
fn minimum_length_except_sprints() {
    let mut power = noisy_ride(1800, 160, 20);
    // two sprints and one sustained threshold block
    for p in power.iter_mut().take(312).skip(300) {
        *p = 460;
    }
    for p in power.iter_mut().take(1210).skip(1200) {
        *p = 480;
    }
    for p in power.iter_mut().take(900).skip(600) {
        *p = 245;
    }
    let result = detect(&power, 250.0);
    assert_covers(&result, 1800);
    for interval in &result.intervals {
        assert!(
            interval.duration() >= 60 || interval.classification == Classification::Sprint,
            "short non-sprint interval {:?} [{}, {})",
            interval.classification,
            interval.start,
            interval.end
        );
    }
    assert!(result
        .intervals
        .iter()
        .any(|i| i.classification == Classification::Sprint));
}

#[test]
fn sprint_scenario_exact_window() {
    // a lone 15-second burst inside a steady ride
    let mut power = vec![150i64; 300];
    for p in power.iter_mut().take(135).skip(120) {
        *p = 420;
    }
    let result = detect(&power, 250.0);
    assert_covers(&result, 300);

    let sprints: Vec<_> = result
        .intervals
        .iter()
        .filter(|i| i.classification == Classification::Sprint)
        .collect();
    assert_eq!(sprints.len(), 1);
    assert!(sprints[0].start <= 120);
    assert!(sprints[0].end >= 135);
    for interval in &result.intervals {
        if interval.classification != Classification::Sprint {
            assert!(matches!(
                interval.classification,
                Classification::Recovery | Classification::Endurance
            ));
        }
    }
}

#[test]
fn z2_z1_repeat_scenario() {
    // paired Z2/Z1 legs of equal length at FTP 220
    let ftp = 220.0;
    let work = (ftp * 0.65) as i64;
    let rest = (ftp * 0.50) as i64;
    let mut power = Vec::new();
    for _ in 0..2 {
        power.extend(vec![work; 300]);
        power.extend(vec![rest; 100]);
    }
    let result = detect(&power, ftp);
    assert!(!result.repeats.is_empty());
    let block = &result.repeats[0];
    assert!(block.cycles.len() >= 2);
    for cycle in &block.cycles {
        assert!(cycle.work.avg_ratio - cycle.rest.avg_ratio >= 0.10);
        assert!(cycle.work.end - cycle.work.start >= 60);
        assert!(cycle.rest.end - cycle.rest.start >= 60);
    }
}

#[test]
fn irregular_legs_do_not_form_repeats() {
    // wildly varying leg lengths blow the duration-CV gate
    let ftp = 220.0;
    let work = (ftp * 0.65) as i64;
    let rest = (ftp * 0.50) as i64;
    let mut power = Vec::new();
    for (w_len, r_len) in [(300usize, 100usize), (80, 400)] {
        power.extend(vec![work; w_len]);
        power.extend(vec![rest; r_len]);
    }
    let result = detect(&power, ftp);
    assert!(result.repeats.is_empty());
}

#[test]
fn empty_and_invalid_inputs() {
    let result = detect(&[], 250.0);
    assert_eq!(result.duration, 0);
    assert!(result.intervals.is_empty());

    let result = detect(&vec![200; 600], 0.0);
    assert_eq!(result.ftp, 0.0);
    assert!(result.intervals.is_empty());
    assert!(result.repeats.is_empty());
}

#[test]
fn all_zero_power_is_single_recovery_block() {
    let result = detect(&vec![0; 600], 250.0);
    assert_covers(&result, 600);
    assert_eq!(result.intervals.len(), 1);
    assert_eq!(result.intervals[0].classification, Classification::Recovery);
}

#[test]
fn power_clipped_to_sane_ceiling() {
    // a 9999 W spike clips to 1600 W and still registers as a sprint peak,
    // not as garbage
    let mut power = vec![150i64; 600];
    for p in power.iter_mut().take(310).skip(300) {
        *p = 9999;
    }
    let result = detect(&power, 250.0);
    assert_covers(&result, 600);
    let peak = result
        .intervals
        .iter()
        .map(|i| i.peak_power)
        .fold(f64::NEG_INFINITY, f64::max);
    assert!(peak <= 1600.0);
}

#[test]
fn detection_is_deterministic() {
    let power = noisy_ride(2400, 200, 60);
    let a = detect(&power, 250.0);
    let b = detect(&power, 250.0);
    assert_eq!(a, b);
}
