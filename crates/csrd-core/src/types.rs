//! Core sample types
//!
//! Every stage of the pipeline works on complex baseband I/Q samples in
//! `f64` precision. Multi-antenna waveforms are stored antenna-major: one
//! `Vec<IQSample>` column per antenna, all columns the same length.
//!
//! ```text
//!   antenna 0: [s0, s1, s2, ... sN-1]
//!   antenna 1: [s0, s1, s2, ... sN-1]
//!   ...
//! ```

use num_complex::Complex64;

/// A single I/Q sample point
pub type IQSample = Complex64;

/// A buffer of I/Q samples for one antenna
pub type IQBuffer = Vec<IQSample>;

/// Samples for every antenna, indexed `[antenna][time]`
pub type AntennaSamples = Vec<IQBuffer>;

/// Raw bits, one bit per byte (values 0 or 1)
pub type BitStream = Vec<u8>;

/// Boltzmann constant (J/K)
pub const BOLTZMANN: f64 = 1.380_649e-23;

/// Reference temperature for thermal noise (K)
pub const T0_KELVIN: f64 = 290.0;

/// Helper functions for working with complex samples
pub mod complex_ops {
    use super::IQSample;

    /// Mean power `E[|x|^2]` of a sample buffer, 0 for an empty buffer
    pub fn mean_power(samples: &[IQSample]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().map(|s| s.norm_sqr()).sum::<f64>() / samples.len() as f64
    }

    /// Root-mean-square amplitude
    pub fn rms(samples: &[IQSample]) -> f64 {
        mean_power(samples).sqrt()
    }

    /// Scale every sample by a real factor in place
    pub fn scale(samples: &mut [IQSample], factor: f64) {
        for s in samples.iter_mut() {
            *s *= factor;
        }
    }

    /// Convert power in dBm (1 ohm reference) to watts
    pub fn dbm_to_watts(dbm: f64) -> f64 {
        10f64.powf((dbm - 30.0) / 10.0)
    }

    /// Convert power in watts to dBm (1 ohm reference)
    pub fn watts_to_dbm(watts: f64) -> f64 {
        10.0 * watts.max(1e-300).log10() + 30.0
    }

    /// Convert decibels to a linear power ratio
    pub fn db_to_linear(db: f64) -> f64 {
        10f64.powf(db / 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::complex_ops::*;
    use super::*;

    #[test]
    fn test_mean_power() {
        let samples = vec![IQSample::new(1.0, 0.0), IQSample::new(0.0, 1.0)];
        assert!((mean_power(&samples) - 1.0).abs() < 1e-12);
        assert_eq!(mean_power(&[]), 0.0);
    }

    #[test]
    fn test_dbm_conversion() {
        assert!((dbm_to_watts(30.0) - 1.0).abs() < 1e-12);
        assert!((watts_to_dbm(0.001) - 0.0).abs() < 1e-9);
        assert!((db_to_linear(10.0) - 10.0).abs() < 1e-12);
    }
}
