use criterion::{black_box, criterion_group, criterion_main, Criterion};
use locator_core::types::{Fingerprint, LocatedFingerprint, RadioSource, Reading};
use locator_core::FingerprintPositionEstimator;
use nalgebra::Vector2;
use radio_models::{PathLossModel, Transmitter};
use std::sync::Arc;

fn make_world(
    n_sources: usize,
    grid: usize,
    extent: f64,
) -> (Vec<LocatedFingerprint<2>>, Fingerprint<2>) {
    let model = PathLossModel::new(2.0, 2.4e9);
    let txs: Vec<Transmitter<2>> = (0..n_sources)
        .map(|i| {
            let angle = i as f64 * std::f64::consts::TAU / n_sources as f64;
            let pos = Vector2::new(
                extent * (0.5 + 0.35 * angle.cos()),
                extent * (0.5 + 0.35 * angle.sin()),
            );
            Transmitter::new(format!("ap-{i}"), pos, -5.0, model)
        })
        .collect();
    let sources: Vec<Arc<RadioSource<2>>> = txs
        .iter()
        .map(|t| RadioSource::new(t.identifier.clone(), t.model.frequency_hz as u64).into_shared())
        .collect();

    let fingerprint_at = |pos: Vector2<f64>| {
        Fingerprint::from_readings(
            txs.iter()
                .zip(&sources)
                .map(|(t, s)| Reading::new(s.clone(), t.rssi_at_position(&pos))),
        )
        .unwrap()
    };

    let mut db = Vec::new();
    for gx in 0..grid {
        for gy in 0..grid {
            let pos = Vector2::new(
                extent * gx as f64 / (grid - 1) as f64,
                extent * gy as f64 / (grid - 1) as f64,
            );
            db.push(LocatedFingerprint::new(fingerprint_at(pos), pos));
        }
    }
    let query = fingerprint_at(Vector2::new(extent * 0.43, extent * 0.57));
    (db, query)
}

fn bench_estimate(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate");

    for (n_sources, grid) in [(3, 10), (8, 15), (16, 20)] {
        let (db, query) = make_world(n_sources, grid, 40.0);
        group.bench_function(format!("{n_sources}_sources_{}_fps", grid * grid), |b| {
            b.iter(|| {
                let mut est = FingerprintPositionEstimator::<2>::new();
                est.set_located_fingerprints(db.clone()).unwrap();
                est.set_fingerprint(query.clone()).unwrap();
                black_box(est.estimate().unwrap().position)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_estimate);
criterion_main!(benches);
