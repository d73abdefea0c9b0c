//! Calibrate and measure through the orchestrator, against the simulator
//! and an on-disk repository.

use approx::assert_abs_diff_eq;
use ndarray::arr2;
use num_complex::Complex64;
use oh4vna_core::calibration::{CalibrationKit, CalibrationMethod, OnePortTerms};
use oh4vna_core::frequency::{Frequency, FrequencyUnit};
use oh4vna_core::instrument::{
    CancelToken, Device, InstrumentContext, SimulatedErrorModel, SimulatedVna, StandardFixtures,
    SweepConfig,
};
use oh4vna_core::measurement::{Correction, MeasurementOrchestrator, MeasurementRequest};
use oh4vna_core::persistence::{CalibrationState, FileRepository, Repository};
use oh4vna_core::MeasurementError;

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn sweep() -> SweepConfig {
    SweepConfig::new(Frequency::from_f(vec![1.0, 2.0, 3.0], FrequencyUnit::GHz).unwrap())
}

/// Port 1 with only a directivity error
fn leaky_port() -> SimulatedErrorModel {
    SimulatedErrorModel::ideal().with_port(
        1,
        OnePortTerms {
            directivity: c(0.05, 0.0),
            source_match: c(0.0, 0.0),
            reflection_tracking: c(1.0, 0.0),
        },
    )
}

#[test]
fn test_directivity_error_is_removed_from_matched_load() {
    let dir = tempfile::tempdir().unwrap();
    let repository = FileRepository::open(dir.path()).unwrap();
    let kit = repository.ensure_default_kit().unwrap();

    let vna = SimulatedVna::new().with_error_model(leaky_port());
    let device = vna.device_slot();
    let ctx = InstrumentContext::new(vna);
    let conn = ctx.connect().unwrap();
    let orchestrator = MeasurementOrchestrator::new(repository);
    let cancel = CancelToken::new();

    let mut fixtures = StandardFixtures::new(device.clone(), kit.clone());
    let record = orchestrator
        .calibrate(
            &conn,
            &kit,
            CalibrationMethod::OnePort { port: 1 },
            &sweep(),
            &mut fixtures,
            &cancel,
        )
        .unwrap();

    device.attach(Device::Constant {
        s: arr2(&[[c(0.0, 0.0)]]),
        ports: vec![1],
    });

    let raw = orchestrator
        .measure(&conn, &MeasurementRequest::new(sweep(), vec![1]), &cancel)
        .unwrap();
    assert_eq!(raw.metadata.calibration, CalibrationState::Uncalibrated);
    for f in 0..3 {
        let g = raw.trace.network().s()[[f, 0, 0]];
        assert_abs_diff_eq!(g.re, 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(g.im, 0.0, epsilon = 1e-12);
    }

    let request =
        MeasurementRequest::new(sweep(), vec![1]).with_correction(Correction::Record(record.id()));
    let corrected = orchestrator.measure(&conn, &request, &cancel).unwrap();
    assert!(corrected.trace.is_corrected());
    for f in 0..3 {
        let g = corrected.trace.network().s()[[f, 0, 0]];
        assert!(g.norm() < 1e-6, "residual {} at point {}", g, f);
    }

    // everything survives a reopen of the repository
    let reopened = FileRepository::open(dir.path()).unwrap();
    let recent = reopened.list_measurements(10).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, corrected.metadata.id);
    assert_eq!(recent[0].calibration.calibration_id(), Some(record.id()));

    let stored = reopened.load_measurement(corrected.metadata.id).unwrap();
    assert_eq!(stored.network.frequency(), &sweep().frequency);
    assert!(stored.network.s()[[1, 0, 0]].norm() < 1e-6);

    let loaded = reopened.load_calibration_record(record.id()).unwrap();
    assert_eq!(loaded.id(), record.id());
    assert_eq!(loaded.kit(), &kit.reference());
    assert_eq!(loaded.standards_completed().len(), 3);
}

#[test]
fn test_active_calibration_follows_kit_and_sweep() {
    let vna = SimulatedVna::new().with_error_model(leaky_port());
    let device = vna.device_slot();
    let ctx = InstrumentContext::new(vna);
    let conn = ctx.connect().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = MeasurementOrchestrator::new(FileRepository::open(dir.path()).unwrap());
    let kit = CalibrationKit::ideal_osl();
    let cancel = CancelToken::new();

    let mut fixtures = StandardFixtures::new(device.clone(), kit.clone());
    orchestrator
        .calibrate(
            &conn,
            &kit,
            CalibrationMethod::OnePort { port: 1 },
            &sweep(),
            &mut fixtures,
            &cancel,
        )
        .unwrap();
    device.attach(Device::Constant {
        s: arr2(&[[c(0.5, 0.5)]]),
        ports: vec![1],
    });

    let active = Correction::Active(kit.reference());
    let same = MeasurementRequest::new(sweep(), vec![1]).with_correction(active.clone());
    let outcome = orchestrator.measure(&conn, &same, &cancel).unwrap();
    let g = outcome.trace.network().s()[[2, 0, 0]];
    assert_abs_diff_eq!(g.re, 0.5, epsilon = 1e-9);
    assert_abs_diff_eq!(g.im, 0.5, epsilon = 1e-9);

    // a wider sweep has no calibration, and nothing is stored for it
    let wider = Frequency::from_f(vec![1.0, 2.0, 3.0, 4.0], FrequencyUnit::GHz).unwrap();
    let request = MeasurementRequest::new(SweepConfig::new(wider), vec![1]).with_correction(active);
    let err = orchestrator.measure(&conn, &request, &cancel).unwrap_err();
    assert!(matches!(err, MeasurementError::NoCalibration(_)));
    assert_eq!(orchestrator.recent_measurements(10).unwrap().len(), 1);
}
