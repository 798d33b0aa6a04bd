use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use walkwithme::elevation::{build_profile, smooth_elevations, DifficultyThresholds};
use walkwithme::geometry::{decode_geometry, destination_point, encode_geometry, simplify, ENGINE_PRECISION};
use walkwithme::models::{GeoPoint, RouteGeometry};

/// Wavy walk of `n` points, roughly 10 m apart.
fn wavy_path(n: usize) -> Vec<GeoPoint> {
    let start = GeoPoint::new(45.9306, 4.5779);
    (0..n)
        .map(|i| {
            let along = destination_point(start, i as f64 * 10.0, 60.0);
            destination_point(along, (i as f64 / 7.0).sin() * 15.0, 150.0)
        })
        .collect()
}

fn benchmark_polyline(c: &mut Criterion) {
    let mut group = c.benchmark_group("polyline");
    for n in [100, 1_000, 10_000] {
        let points = wavy_path(n);
        let encoded = encode_geometry(&points, ENGINE_PRECISION);
        group.bench_with_input(BenchmarkId::new("decode", n), &encoded, |b, encoded| {
            b.iter(|| decode_geometry(black_box(encoded), ENGINE_PRECISION))
        });
        group.bench_with_input(BenchmarkId::new("encode", n), &points, |b, points| {
            b.iter(|| encode_geometry(black_box(points), ENGINE_PRECISION))
        });
    }
    group.finish();
}

fn benchmark_simplify(c: &mut Criterion) {
    let mut group = c.benchmark_group("simplify");
    for tolerance in [2.0, 8.0, 25.0] {
        let geometry = RouteGeometry::new(wavy_path(5_000));
        group.bench_with_input(BenchmarkId::from_parameter(tolerance), &geometry, |b, geometry| {
            b.iter(|| simplify(black_box(geometry), tolerance))
        });
    }
    group.finish();
}

fn benchmark_profile(c: &mut Criterion) {
    let points = wavy_path(2_000);
    let samples: Vec<f64> = (0..points.len())
        .map(|i| 300.0 + (i as f64 / 40.0).sin() * 60.0)
        .collect();
    let thresholds = DifficultyThresholds::default();

    c.bench_function("smooth_elevations_2000", |b| {
        b.iter(|| smooth_elevations(black_box(&samples)))
    });
    c.bench_function("build_profile_2000", |b| {
        b.iter(|| build_profile(black_box(&points), samples.clone(), &thresholds))
    });
}

criterion_group!(benches, benchmark_polyline, benchmark_simplify, benchmark_profile);
criterion_main!(benches);
