//! Network algebra tests
//!
//! Transfer-parameter conversion, cascading, de-embedding and the
//! singularity policy.

use approx::assert_relative_eq;
use ndarray::arr2;
use num_complex::Complex64;
use oh4vna_core::error::NetworkError;
use oh4vna_core::frequency::{Frequency, FrequencyUnit, SweepType};
use oh4vna_core::math::transforms::{s2t, t2s, Tolerance};
use oh4vna_core::network::{cascade_t, Network};

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn sweep() -> Frequency {
    Frequency::new(1.0, 3.0, 3, FrequencyUnit::GHz, SweepType::Linear).unwrap()
}

fn lossy_line() -> Network {
    Network::from_fn(sweep(), 2, |i, _| {
        let k = i as f64;
        arr2(&[
            [c(0.1, 0.02 * k), c(0.8, -0.1 * k)],
            [c(0.8, -0.1 * k), c(-0.05, 0.03)],
        ])
    })
    .unwrap()
}

fn assert_close(a: &Network, b: &Network, eps: f64) {
    assert_eq!(a.s().dim(), b.s().dim());
    for (x, y) in a.s().iter().zip(b.s().iter()) {
        assert_relative_eq!(x.re, y.re, epsilon = eps);
        assert_relative_eq!(x.im, y.im, epsilon = eps);
    }
}

#[test]
fn test_s_to_t_roundtrip() {
    let s = arr2(&[[c(0.2, -0.1), c(0.7, 0.3)], [c(0.6, 0.2), c(0.05, 0.4)]]);
    let tol = Tolerance::default();
    let back = t2s(&s2t(&s, tol).unwrap(), tol).unwrap();
    for (x, y) in s.iter().zip(back.iter()) {
        assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
        assert_relative_eq!(x.im, y.im, epsilon = 1e-12);
    }
}

#[test]
fn test_near_singular_transmission_is_rejected() {
    let s = arr2(&[[c(0.9, 0.0), c(1e-12, 0.0)], [c(1e-12, 0.0), c(0.9, 0.0)]]);
    let err = s2t(&s, Tolerance::default()).unwrap_err();
    assert!(matches!(err, NetworkError::Singular { term: "S21", .. }));

    // a tighter epsilon accepts the same network
    assert!(s2t(&s, Tolerance::new(1e-15)).is_ok());
}

#[test]
fn test_cascade_with_identity_is_noop() {
    let s = arr2(&[[c(0.2, -0.1), c(0.7, 0.3)], [c(0.6, 0.2), c(0.05, 0.4)]]);
    let tol = Tolerance::default();
    let t = s2t(&s, tol).unwrap();
    let thru = arr2(&[[c(0.0, 0.0), c(1.0, 0.0)], [c(1.0, 0.0), c(0.0, 0.0)]]);
    let identity = s2t(&thru, tol).unwrap();
    let out = cascade_t(&t, &identity);
    for (x, y) in t.iter().zip(out.iter()) {
        assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
        assert_relative_eq!(x.im, y.im, epsilon = 1e-12);
    }

    let line = lossy_line();
    let through = line.cascade(&Network::thru(sweep()), tol).unwrap();
    assert_close(&line, &through, 1e-12);
}

#[test]
fn test_cascade_order_matters() {
    let tol = Tolerance::default();
    let line = lossy_line();
    let pad = Network::constant(
        sweep(),
        &arr2(&[[c(0.3, 0.0), c(0.5, 0.0)], [c(0.5, 0.0), c(0.0, 0.0)]]),
    )
    .unwrap();
    let ab = line.cascade(&pad, tol).unwrap();
    let ba = pad.cascade(&line, tol).unwrap();
    assert!((ab.s()[[0, 0, 0]] - ba.s()[[0, 0, 0]]).norm() > 1e-3);
}

#[test]
fn test_deembed_recovers_device() {
    let tol = Tolerance::default();
    let fixture = lossy_line();
    let dut = Network::constant(
        sweep(),
        &arr2(&[[c(0.4, 0.1), c(0.3, -0.2)], [c(0.3, -0.2), c(-0.2, 0.1)]]),
    )
    .unwrap();
    let total = fixture.cascade(&dut, tol).unwrap();
    let recovered = total.deembed(&fixture, tol).unwrap();
    assert_close(&recovered, &dut, 1e-10);
}

#[test]
fn test_deembed_through_open_fixture_names_point() {
    let tol = Tolerance::default();
    let open = Network::constant(
        sweep(),
        &arr2(&[[c(1.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(1.0, 0.0)]]),
    )
    .unwrap();
    let err = lossy_line().deembed(&open, tol).unwrap_err();
    match err {
        NetworkError::Singular { point: Some(p), .. } => {
            assert_eq!(p.index, 0);
            assert_eq!(p.hz, 1e9);
        }
        other => panic!("expected a located singularity, got {:?}", other),
    }
}

#[test]
fn test_mismatched_sweeps_are_not_resampled() {
    let tol = Tolerance::default();
    let other = Frequency::new(1.0, 3.0, 5, FrequencyUnit::GHz, SweepType::Linear).unwrap();
    let err = lossy_line().cascade(&Network::thru(other), tol).unwrap_err();
    assert!(matches!(err, NetworkError::SweepMismatch(_)));
}
