//! Benchmarks for error-term solving and trace correction

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::arr2;
use num_complex::Complex64;
use oh4vna_core::calibration::{
    apply_correction, compute_error_terms, CalibrationKit, CalibrationMethod, OnePortTerms,
    RawTrace, StandardKind, StandardMeasurements, StandardSlot,
};
use oh4vna_core::coupler::CouplerModel;
use oh4vna_core::frequency::{Frequency, FrequencyUnit, SweepType};
use oh4vna_core::math::transforms::Tolerance;
use oh4vna_core::Network;

const SOL: CalibrationMethod = CalibrationMethod::OnePort { port: 1 };

fn sweep(npoints: usize) -> Frequency {
    Frequency::new(1.0, 6000.0, npoints, FrequencyUnit::MHz, SweepType::Linear).unwrap()
}

fn terms() -> OnePortTerms {
    OnePortTerms {
        directivity: Complex64::new(0.05, -0.01),
        source_match: Complex64::new(0.1, 0.04),
        reflection_tracking: Complex64::new(0.9, -0.2),
    }
}

fn raw_reflection(sweep: &Frequency, actual: Complex64) -> RawTrace {
    let m = terms().distort(actual, Tolerance::default()).unwrap();
    RawTrace::from_network(Network::constant(sweep.clone(), &arr2(&[[m]])).unwrap())
}

fn measurements(sweep: &Frequency) -> StandardMeasurements {
    let mut m = StandardMeasurements::new();
    for (kind, g) in [
        (StandardKind::Short, Complex64::new(-1.0, 0.0)),
        (StandardKind::Open, Complex64::new(1.0, 0.0)),
        (StandardKind::Load, Complex64::new(0.0, 0.0)),
    ] {
        m.insert(StandardSlot::reflect(kind, 1).unwrap(), raw_reflection(sweep, g));
    }
    m
}

fn bench_compute_error_terms(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_error_terms");
    let kit = CalibrationKit::ideal_osl();

    for npoints in [11, 201, 1001, 10001].iter() {
        let sweep = sweep(*npoints);
        let m = measurements(&sweep);
        group.bench_with_input(BenchmarkId::new("sol", npoints), npoints, |b, _| {
            b.iter(|| {
                black_box(compute_error_terms(&m, &kit, SOL, &sweep).unwrap())
            })
        });
    }

    group.finish();
}

fn bench_apply_correction(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_correction");
    let kit = CalibrationKit::ideal_osl();

    for npoints in [11, 201, 1001, 10001].iter() {
        let sweep = sweep(*npoints);
        let record = compute_error_terms(&measurements(&sweep), &kit, SOL, &sweep).unwrap();
        let raw = raw_reflection(&sweep, Complex64::new(0.3, -0.2));
        group.bench_with_input(BenchmarkId::new("sol", npoints), npoints, |b, _| {
            b.iter(|| black_box(apply_correction(&raw, &record).unwrap()))
        });
    }

    group.finish();
}

fn bench_coupler(c: &mut Criterion) {
    let mut group = c.benchmark_group("coupler_three_port");
    let coupler = CouplerModel::default();
    let dut = arr2(&[
        [Complex64::new(0.2, 0.1), Complex64::new(0.6, -0.2)],
        [Complex64::new(0.6, -0.2), Complex64::new(-0.1, 0.05)],
    ]);

    for npoints in [201, 1001].iter() {
        let raw = RawTrace::from_network(Network::constant(sweep(*npoints), &dut).unwrap());
        group.bench_with_input(BenchmarkId::from_parameter(npoints), npoints, |b, _| {
            b.iter(|| {
                let three_port = coupler.simulate_three_port_response(&raw, Tolerance::default());
                black_box(three_port.unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compute_error_terms, bench_apply_correction, bench_coupler);
criterion_main!(benches);
