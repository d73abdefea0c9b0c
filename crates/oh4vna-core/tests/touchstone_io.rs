//! Touchstone round trips through the file system

use approx::assert_relative_eq;
use ndarray::arr2;
use num_complex::Complex64;
use oh4vna_core::frequency::{Frequency, FrequencyUnit, SweepType};
use oh4vna_core::network::Network;
use oh4vna_core::touchstone::SParamFormat;

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn two_port() -> Network {
    let sweep = Frequency::new(1.0, 3.0, 5, FrequencyUnit::GHz, SweepType::Linear).unwrap();
    Network::from_fn(sweep, 2, |i, _| {
        let k = i as f64 * 0.1;
        arr2(&[[c(0.1, k), c(0.7, -k)], [c(0.7, -k), c(-0.2, 0.05)]])
    })
    .unwrap()
    .with_name("line")
}

#[test]
fn test_every_format_survives_a_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let net = two_port();
    for format in [SParamFormat::RI, SParamFormat::MA, SParamFormat::DB] {
        let path = dir.path().join(format!("line_{:?}.{}", format, net.touchstone_extension()));
        net.write_touchstone(&path, format).unwrap();
        let back = Network::from_touchstone(&path).unwrap();
        assert_eq!(back.nports(), 2);
        assert_eq!(back.nfreq(), 5);
        for (a, b) in net.f().iter().zip(back.f()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
        for (a, b) in net.s().iter().zip(back.s().iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-6);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_content_with_comments_and_hz_unit() {
    let content = "! single load\n# HZ S RI R 50\n1000000000 0.01 0.0\n2000000000 0.02 -0.01\n";
    let net = Network::from_touchstone_content(content, 1).unwrap();
    assert_eq!(net.f(), &[1e9, 2e9]);
    assert_eq!(net.s()[[1, 0, 0]], c(0.02, -0.01));
    assert!(net.comments().iter().any(|line| line.contains("single load")));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Network::from_touchstone(dir.path().join("absent.s1p")).is_err());
}
