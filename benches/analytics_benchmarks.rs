use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use velometrics::intervals::detect_intervals;
use velometrics::power::{best_power_curve, normalized_power};
use velometrics::zones::analyze_power_zones;

/// Performance benchmarks for the analytics engine
///
/// The best-power curve is the hot path: quadratic arithmetic over the
/// whole ride, required to stay in contiguous-memory prefix-sum form.

fn synthetic_power(len: usize) -> Vec<i64> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    (0..len)
        .map(|i| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let noise = ((state >> 33) % 60) as i64;
            let surge = if (i / 300) % 2 == 1 { 120 } else { 0 };
            140 + noise + surge
        })
        .collect()
}

fn bench_best_power_curve(c: &mut Criterion) {
    let mut group = c.benchmark_group("Best Power Curve");
    for &size in &[600usize, 1800, 3600] {
        let power = synthetic_power(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("best_power_curve", size), &power, |b, power| {
            b.iter(|| best_power_curve(black_box(power)));
        });
    }
    group.finish();
}

fn bench_normalized_power(c: &mut Criterion) {
    let mut group = c.benchmark_group("Normalized Power");
    for &size in &[3600usize, 14400] {
        let power = synthetic_power(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("normalized_power", size), &power, |b, power| {
            b.iter(|| normalized_power(black_box(power)));
        });
    }
    group.finish();
}

fn bench_interval_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("Interval Detection");
    group.sample_size(20);
    for &size in &[1800usize, 3600] {
        let power = synthetic_power(size);
        let timestamps: Vec<i64> = (0..size as i64).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(
            BenchmarkId::new("detect_intervals", size),
            &(timestamps, power),
            |b, (timestamps, power)| {
                b.iter(|| {
                    detect_intervals(
                        black_box(timestamps),
                        black_box(power),
                        Some(250.0),
                        None,
                        None,
                        None,
                        None,
                    )
                });
            },
        );
    }
    group.finish();
}

fn bench_zone_analysis(c: &mut Criterion) {
    let power = synthetic_power(3600);
    c.bench_function("power_zones_3600", |b| {
        b.iter(|| analyze_power_zones(black_box(&power), black_box(250.0)));
    });
}

criterion_group!(
    benches,
    bench_best_power_curve,
    bench_normalized_power,
    bench_interval_detection,
    bench_zone_analysis
);
criterion_main!(benches);
