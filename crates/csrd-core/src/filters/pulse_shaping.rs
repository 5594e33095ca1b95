//! Pulse Shaping Filters
//!
//! Linear-phase Nyquist filters applied after upsampling the symbol stream by
//! `samples_per_symbol`. Both designs span `span * sps + 1` taps and are
//! normalised to unit energy.
//!
//! ## Group delay and output length
//!
//! [`PulseShapingFilter::shape`] zero-stuffs `N` symbols to `N * sps` samples,
//! convolves with the filter, then drops the first `span * sps / 2` samples
//! (the filter group delay) and keeps exactly `N * sps` samples. The filter
//! tail after the last symbol is discarded, so a 1000-symbol burst at 4
//! samples per symbol always yields 4000 samples.
//!
//! ```text
//!   zero-stuffed:  a0 0 0 0 a1 0 0 0 ...
//!   convolved:     [ delay | N*sps samples kept | tail ]
//! ```

use crate::types::IQSample;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Raised-cosine family shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PulseShape {
    /// Raised cosine (Nyquist at the transmitter alone)
    Normal,
    /// Root raised cosine (Nyquist after a matched receive filter)
    Sqrt,
}

impl Default for PulseShape {
    fn default() -> Self {
        PulseShape::Sqrt
    }
}

/// Trait for pulse shaping filters
pub trait PulseShapingFilter: std::fmt::Debug + Send + Sync {
    /// Get the filter coefficients (impulse response)
    fn coefficients(&self) -> &[f64];

    /// Roll-off factor
    fn rolloff(&self) -> f64;

    /// Get the filter length in samples
    fn length(&self) -> usize {
        self.coefficients().len()
    }

    /// Get the filter delay in samples
    fn delay(&self) -> usize {
        self.length() / 2
    }

    /// Full linear convolution of complex samples with the filter
    fn filter(&self, input: &[IQSample]) -> Vec<IQSample> {
        let coeffs = self.coefficients();
        let n = coeffs.len();

        if input.is_empty() || n == 0 {
            return vec![];
        }

        let mut output = vec![IQSample::new(0.0, 0.0); input.len() + n - 1];
        for (i, &x) in input.iter().enumerate() {
            if x.re == 0.0 && x.im == 0.0 {
                continue;
            }
            for (j, &h) in coeffs.iter().enumerate() {
                output[i + j] += x * h;
            }
        }

        output
    }

    /// Upsample `symbols` by `sps`, filter, and compensate the group delay.
    ///
    /// Output length is exactly `symbols.len() * sps`. The gain of `sqrt(sps)`
    /// keeps a unit-power constellation at unit average output power.
    fn shape(&self, symbols: &[IQSample], sps: usize) -> Vec<IQSample> {
        let sps = sps.max(1);
        let out_len = symbols.len() * sps;
        if out_len == 0 {
            return vec![];
        }

        let mut upsampled = vec![IQSample::new(0.0, 0.0); out_len];
        for (i, &s) in symbols.iter().enumerate() {
            upsampled[i * sps] = s;
        }

        let gain = (sps as f64).sqrt();
        let delay = self.delay();
        let filtered = self.filter(&upsampled);
        filtered
            .into_iter()
            .skip(delay)
            .take(out_len)
            .map(|s| s * gain)
            .collect()
    }
}

/// Raised Cosine Filter
///
/// Nyquist filter that achieves zero ISI at optimal sampling points.
/// Characterized by the roll-off factor α (0 to 1).
#[derive(Debug, Clone)]
pub struct RaisedCosineFilter {
    coefficients: Vec<f64>,
    rolloff: f64,
}

impl RaisedCosineFilter {
    /// Create a new Raised Cosine filter
    ///
    /// # Arguments
    /// - `rolloff`: Roll-off factor α (clamped to 0..=1)
    /// - `span_symbols`: Filter length in symbols
    /// - `samples_per_symbol`: Oversampling factor
    pub fn new(rolloff: f64, span_symbols: usize, samples_per_symbol: usize) -> Self {
        let rolloff = rolloff.clamp(0.0, 1.0);
        let sps = samples_per_symbol.max(1);
        let length = span_symbols.max(1) * sps + 1;
        let delay = (length - 1) / 2;
        let ts = 1.0 / sps as f64;

        let mut coefficients: Vec<f64> = (0..length)
            .map(|i| {
                let t = (i as f64 - delay as f64) * ts;
                if t.abs() < 1e-10 {
                    1.0
                } else if rolloff > 0.0 && (1.0 - (2.0 * rolloff * t).abs()).abs() < 1e-10 {
                    // t = ±1/(2α)
                    (PI / 4.0) * sinc(1.0 / (2.0 * rolloff))
                } else {
                    sinc(t) * (PI * rolloff * t).cos() / (1.0 - (2.0 * rolloff * t).powi(2))
                }
            })
            .collect();

        normalize_energy(&mut coefficients);
        Self {
            coefficients,
            rolloff,
        }
    }
}

impl PulseShapingFilter for RaisedCosineFilter {
    fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    fn rolloff(&self) -> f64 {
        self.rolloff
    }
}

/// Root Raised Cosine Filter
#[derive(Debug, Clone)]
pub struct RootRaisedCosineFilter {
    coefficients: Vec<f64>,
    rolloff: f64,
}

impl RootRaisedCosineFilter {
    /// Create a new Root Raised Cosine filter
    ///
    /// # Arguments
    /// - `rolloff`: Roll-off factor α (clamped to 0..=1)
    /// - `span_symbols`: Filter length in symbols
    /// - `samples_per_symbol`: Oversampling factor
    pub fn new(rolloff: f64, span_symbols: usize, samples_per_symbol: usize) -> Self {
        let rolloff = rolloff.clamp(0.0, 1.0);
        let sps = samples_per_symbol.max(1);
        let length = span_symbols.max(1) * sps + 1;
        let delay = (length - 1) / 2;
        let ts = 1.0 / sps as f64;

        let mut coefficients: Vec<f64> = (0..length)
            .map(|i| {
                let t = (i as f64 - delay as f64) * ts;
                if t.abs() < 1e-10 {
                    1.0 - rolloff + 4.0 * rolloff / PI
                } else if rolloff > 0.0 && ((4.0 * rolloff * t).abs() - 1.0).abs() < 1e-10 {
                    // t = ±1/(4α)
                    let term1 = (1.0 + 2.0 / PI) * (PI / (4.0 * rolloff)).sin();
                    let term2 = (1.0 - 2.0 / PI) * (PI / (4.0 * rolloff)).cos();
                    rolloff / 2.0_f64.sqrt() * (term1 + term2)
                } else {
                    let pi_t = PI * t;
                    let four_alpha_t = 4.0 * rolloff * t;
                    let num = (pi_t * (1.0 - rolloff)).sin()
                        + four_alpha_t * (pi_t * (1.0 + rolloff)).cos();
                    let denom = pi_t * (1.0 - four_alpha_t.powi(2));
                    if denom.abs() > 1e-10 {
                        num / denom
                    } else {
                        0.0
                    }
                }
            })
            .collect();

        normalize_energy(&mut coefficients);
        Self {
            coefficients,
            rolloff,
        }
    }
}

impl PulseShapingFilter for RootRaisedCosineFilter {
    fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    fn rolloff(&self) -> f64 {
        self.rolloff
    }
}

/// Build the pulse-shaping filter for a shape/roll-off/span triple.
pub fn design_pulse(
    shape: PulseShape,
    rolloff: f64,
    span_symbols: usize,
    samples_per_symbol: usize,
) -> Box<dyn PulseShapingFilter> {
    match shape {
        PulseShape::Normal => Box::new(RaisedCosineFilter::new(
            rolloff,
            span_symbols,
            samples_per_symbol,
        )),
        PulseShape::Sqrt => Box::new(RootRaisedCosineFilter::new(
            rolloff,
            span_symbols,
            samples_per_symbol,
        )),
    }
}

fn normalize_energy(coefficients: &mut [f64]) {
    let energy: f64 = coefficients.iter().map(|&x| x * x).sum();
    if energy > 1e-10 {
        let norm = energy.sqrt();
        for c in coefficients.iter_mut() {
            *c /= norm;
        }
    }
}

/// Sinc function: sin(πx)/(πx), with sinc(0) = 1
pub(crate) fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-10 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_lengths() {
        let rc = RaisedCosineFilter::new(0.35, 8, 4);
        assert_eq!(rc.length(), 8 * 4 + 1);
        assert_eq!(rc.delay(), 16);

        let rrc = RootRaisedCosineFilter::new(0.35, 6, 8);
        assert_eq!(rrc.length(), 6 * 8 + 1);
    }

    #[test]
    fn test_unit_energy() {
        for shape in [PulseShape::Normal, PulseShape::Sqrt] {
            let f = design_pulse(shape, 0.25, 8, 4);
            let e: f64 = f.coefficients().iter().map(|c| c * c).sum();
            assert!((e - 1.0).abs() < 1e-9, "{:?} energy {}", shape, e);
        }
    }

    #[test]
    fn test_rrc_symmetry() {
        let rrc = RootRaisedCosineFilter::new(0.35, 8, 4);
        let coeffs = rrc.coefficients();
        let n = coeffs.len();
        for i in 0..n / 2 {
            assert!(
                (coeffs[i] - coeffs[n - 1 - i]).abs() < 1e-10,
                "RRC should be symmetric"
            );
        }
    }

    #[test]
    fn test_rc_zero_isi() {
        // RC taps vanish at non-zero multiples of the symbol period
        let rc = RaisedCosineFilter::new(0.5, 6, 4);
        let c = rc.coefficients();
        let d = rc.delay();
        for k in 1..3 {
            assert!(c[d + 4 * k].abs() < 1e-9);
            assert!(c[d - 4 * k].abs() < 1e-9);
        }
    }

    #[test]
    fn test_shape_output_length_and_alignment() {
        let rc = RaisedCosineFilter::new(0.35, 8, 4);
        let symbols: Vec<IQSample> = (0..1000)
            .map(|i| IQSample::new(if i % 3 == 0 { 1.0 } else { -1.0 }, 0.0))
            .collect();
        let out = rc.shape(&symbols, 4);
        assert_eq!(out.len(), 4000);

        // With a raised cosine the symbol instants carry the symbols (scaled)
        let peak = rc.coefficients()[rc.delay()] * 2.0;
        for i in 10..20 {
            let expected = symbols[i].re * peak;
            assert!((out[i * 4].re - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sinc() {
        assert!((sinc(0.0) - 1.0).abs() < 1e-10);
        assert!(sinc(1.0).abs() < 1e-10);
    }
}
