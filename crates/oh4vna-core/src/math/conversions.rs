//! dB, magnitude and phase forms of complex coefficients
//!
//! Phases are in degrees, as Touchstone files and instrument front panels
//! show them. A magnitude of zero maps to `-inf` dB and back.

use num_complex::Complex64;

/// `20 log10 |z|`
pub fn complex_2_db(z: Complex64) -> f64 {
    20.0 * z.norm().log10()
}

/// Phase of `z` in degrees, in `(-180, 180]`
pub fn complex_2_degree(z: Complex64) -> f64 {
    z.arg().to_degrees()
}

/// Linear magnitude of a level in dB; `-inf` gives exactly zero
pub fn db_2_mag(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Magnitude of a reflection with the given return loss in dB.
///
/// Return loss is a positive number, so 20 dB maps to 0.1.
pub fn return_loss_2_mag(return_loss_db: f64) -> f64 {
    db_2_mag(-return_loss_db)
}

/// Touchstone `MA` pair
pub fn magdeg_2_reim(mag: f64, deg: f64) -> Complex64 {
    Complex64::from_polar(mag, deg.to_radians())
}

/// Touchstone `DB` pair
pub fn dbdeg_2_reim(db: f64, deg: f64) -> Complex64 {
    magdeg_2_reim(db_2_mag(db), deg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_return_loss_of_coupler_ports() {
        assert_relative_eq!(return_loss_2_mag(26.0), 0.050118723362727, epsilon = 1e-12);
        assert_relative_eq!(return_loss_2_mag(20.0), 0.1, epsilon = 1e-15);
        assert_eq!(return_loss_2_mag(f64::INFINITY), 0.0);
    }

    #[test]
    fn test_db_of_complex() {
        assert_relative_eq!(complex_2_db(Complex64::new(0.06, 0.08)), -20.0, epsilon = 1e-10);
        assert_eq!(complex_2_db(Complex64::new(0.0, 0.0)), f64::NEG_INFINITY);
        let half_power = Complex64::new(db_2_mag(-3.0), 0.0);
        assert_relative_eq!(complex_2_db(half_power), -3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_touchstone_pairs() {
        let z = magdeg_2_reim(0.5, -90.0);
        assert_relative_eq!(z.re, 0.0, epsilon = 1e-12);
        assert_relative_eq!(z.im, -0.5, epsilon = 1e-12);
        assert_relative_eq!(complex_2_degree(z), -90.0, epsilon = 1e-10);

        let z = dbdeg_2_reim(-6.0, 180.0);
        assert_relative_eq!(z.re, -db_2_mag(-6.0), epsilon = 1e-12);
        assert_relative_eq!(z.im, 0.0, epsilon = 1e-12);
    }
}
