use approx::assert_relative_eq;
use ndarray::arr2;
use num_complex::Complex64;
use oh4vna_core::calibration::RawTrace;
use oh4vna_core::coupler::CouplerModel;
use oh4vna_core::frequency::{Frequency, FrequencyUnit, SweepType};
use oh4vna_core::math::transforms::Tolerance;
use oh4vna_core::network::Network;

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn sweep() -> Frequency {
    Frequency::new(1.0, 3.0, 3, FrequencyUnit::GHz, SweepType::Linear).unwrap()
}

fn two_port_raw() -> RawTrace {
    let dut = arr2(&[[c(0.2, 0.1), c(0.6, -0.2)], [c(0.6, -0.2), c(-0.1, 0.05)]]);
    RawTrace::from_network(Network::constant(sweep(), &dut).unwrap())
}

#[test]
fn test_zero_coupling_leaves_third_port_silent() {
    let coupler = CouplerModel {
        coupling_db: f64::INFINITY,
        ..CouplerModel::default()
    };
    let out = coupler
        .simulate_three_port_response(&two_port_raw(), Tolerance::default())
        .unwrap();
    assert_eq!(out.ports(), &[1, 2, 3]);
    let s = out.network().s();
    for f in 0..3 {
        for p in 0..2 {
            assert_eq!(s[[f, 2, p]], c(0.0, 0.0));
            assert_eq!(s[[f, p, 2]], c(0.0, 0.0));
        }
    }
}

#[test]
fn test_coupled_port_tracks_coupling_level() {
    let weak = CouplerModel {
        coupling_db: 30.0,
        ..CouplerModel::default()
    };
    let strong = CouplerModel {
        coupling_db: 10.0,
        ..CouplerModel::default()
    };
    let tol = Tolerance::default();
    let a = weak.simulate_three_port_response(&two_port_raw(), tol).unwrap();
    let b = strong.simulate_three_port_response(&two_port_raw(), tol).unwrap();
    for f in 0..3 {
        let ratio = b.network().s()[[f, 2, 0]].norm() / a.network().s()[[f, 2, 0]].norm();
        assert!(ratio > 5.0, "ratio {} at point {}", ratio, f);
    }
}

#[test]
fn test_matched_termination_exposes_leakage() {
    let coupler = CouplerModel::default();
    let tol = Tolerance::default();
    let load = Network::one_port(sweep(), c(0.0, 0.0));
    let fixture = coupler.terminated_two_port(&sweep(), &load, tol).unwrap();
    let intrinsic = coupler.three_port_network(&sweep());
    assert_eq!(fixture.nports(), 2);
    for f in 0..3 {
        let got = fixture.s()[[f, 1, 0]];
        let want = intrinsic.s()[[f, 2, 1]];
        assert_relative_eq!(got.re, want.re, epsilon = 1e-12);
        assert_relative_eq!(got.im, want.im, epsilon = 1e-12);
    }
}

#[test]
fn test_coupler_needs_two_port_trace() {
    let raw = RawTrace::from_network(Network::one_port(sweep(), c(0.1, 0.0)));
    assert!(CouplerModel::default()
        .simulate_three_port_response(&raw, Tolerance::default())
        .is_err());
}
