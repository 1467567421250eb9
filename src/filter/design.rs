//! Chebyshev Type II low-pass design as second-order sections.
//!
//! The analog prototype is built from the Chebyshev Type I poles for the
//! requested stopband attenuation, inverted so the equiripple band becomes
//! the stopband. Poles and zeros are scaled to the prewarped stopband edge,
//! mapped with the bilinear transform, paired into conjugate sections and
//! each section is normalised to unit gain at DC.

use crate::error::{DaqError, Result};
use biquad::Coefficients;
use num_complex::Complex64;
use std::f64::consts::PI;

/// Design an order-`order` Chebyshev Type II low-pass.
///
/// `stopband_hz` is the edge where the attenuation first reaches
/// `attenuation_db`. Returns `ceil(order / 2)` sections.
pub fn chebyshev2_lowpass(
    order: usize,
    sample_rate: f64,
    stopband_hz: f64,
    attenuation_db: f64,
) -> Result<Vec<Coefficients<f64>>> {
    if order == 0 {
        return Err(DaqError::FilterDesign("order must be at least 1".to_string()));
    }
    if sample_rate.is_nan() || sample_rate <= 0.0 {
        return Err(DaqError::FilterDesign(format!(
            "sample rate {sample_rate} Hz is not positive"
        )));
    }
    if stopband_hz.is_nan() || stopband_hz <= 0.0 || stopband_hz >= sample_rate / 2.0 {
        return Err(DaqError::FilterDesign(format!(
            "stopband {stopband_hz} Hz must lie between 0 and Nyquist ({} Hz)",
            sample_rate / 2.0
        )));
    }
    if attenuation_db.is_nan() || attenuation_db <= 0.0 {
        return Err(DaqError::FilterDesign(format!(
            "attenuation {attenuation_db} dB is not positive"
        )));
    }

    let n = order as f64;
    let epsilon = 1.0 / (10f64.powf(attenuation_db / 10.0) - 1.0).sqrt();
    let mu = (1.0 / epsilon).asinh() / n;

    let fs2 = 2.0 * sample_rate;
    let warped = fs2 * (PI * stopband_hz / sample_rate).tan();
    let bilinear = |s: Complex64| (fs2 + s) / (fs2 - s);

    let mut sections = Vec::with_capacity(order.div_ceil(2));
    for k in 0..order / 2 {
        let theta = PI * (2 * k + 1) as f64 / (2.0 * n);
        let type1 = Complex64::new(-mu.sinh() * theta.sin(), mu.cosh() * theta.cos());
        let pole = bilinear(warped / type1);
        let zero = bilinear(Complex64::new(0.0, warped / theta.cos()));
        let b = [1.0, -2.0 * zero.re, zero.norm_sqr()];
        let a = [1.0, -2.0 * pole.re, pole.norm_sqr()];
        sections.push(normalise(b, a));
    }

    if order % 2 == 1 {
        // Real pole; its zero sits at infinity and maps to Nyquist.
        let pole = bilinear(Complex64::new(-warped / mu.sinh(), 0.0)).re;
        sections.push(normalise([1.0, 1.0, 0.0], [1.0, -pole, 0.0]));
    }

    Ok(sections)
}

fn normalise(b: [f64; 3], a: [f64; 3]) -> Coefficients<f64> {
    let gain = (a[0] + a[1] + a[2]) / (b[0] + b[1] + b[2]);
    Coefficients {
        a1: a[1] / a[0],
        a2: a[2] / a[0],
        b0: b[0] * gain / a[0],
        b1: b[1] * gain / a[0],
        b2: b[2] * gain / a[0],
    }
}

/// Magnitude response of a cascade at `freq_hz`.
pub fn magnitude(sections: &[Coefficients<f64>], sample_rate: f64, freq_hz: f64) -> f64 {
    let w = 2.0 * PI * freq_hz / sample_rate;
    let z1 = Complex64::from_polar(1.0, -w);
    let z2 = z1 * z1;
    sections
        .iter()
        .map(|c| {
            let num = c.b0 + c.b1 * z1 + c.b2 * z2;
            let den = 1.0 + c.a1 * z1 + c.a2 * z2;
            (num / den).norm()
        })
        .product()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(mag: f64) -> f64 {
        20.0 * mag.log10()
    }

    #[test]
    fn test_section_count() {
        assert_eq!(chebyshev2_lowpass(20, 6168.0, 550.0, 40.0).unwrap().len(), 10);
        assert_eq!(chebyshev2_lowpass(5, 6168.0, 550.0, 40.0).unwrap().len(), 3);
        assert_eq!(chebyshev2_lowpass(1, 6168.0, 550.0, 40.0).unwrap().len(), 1);
    }

    #[test]
    fn test_unit_dc_gain() {
        let sections = chebyshev2_lowpass(20, 6168.0, 550.0, 40.0).unwrap();
        assert!((magnitude(&sections, 6168.0, 0.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_stopband_attenuation() {
        let fs = 6168.0;
        let sections = chebyshev2_lowpass(20, fs, 550.0, 40.0).unwrap();
        for freq in [560.0, 700.0, 1000.0, 2000.0, 3000.0] {
            let level = db(magnitude(&sections, fs, freq));
            assert!(level < -39.0, "{freq} Hz only attenuated to {level} dB");
        }
    }

    #[test]
    fn test_passband_is_flat() {
        let fs = 6168.0;
        let sections = chebyshev2_lowpass(20, fs, 550.0, 40.0).unwrap();
        let level = db(magnitude(&sections, fs, 100.0));
        assert!(level.abs() < 0.5, "passband at {level} dB");
    }

    #[test]
    fn test_poles_inside_unit_circle() {
        let sections = chebyshev2_lowpass(20, 1542.0, 550.0, 40.0).unwrap();
        for c in sections {
            // Stable iff |a2| < 1 and |a1| < 1 + a2.
            assert!(c.a2.abs() < 1.0);
            assert!(c.a1.abs() < 1.0 + c.a2);
        }
    }

    #[test]
    fn test_rejects_stopband_past_nyquist() {
        let err = chebyshev2_lowpass(20, 1000.0, 550.0, 40.0).unwrap_err();
        assert!(matches!(err, DaqError::FilterDesign(_)));
        assert!(chebyshev2_lowpass(0, 1000.0, 100.0, 40.0).is_err());
        assert!(chebyshev2_lowpass(4, 1000.0, 100.0, 0.0).is_err());
    }
}
