//! Rational sample rate conversion
//!
//! The ratio `out / in` is approximated by `L / M` (searched up to a
//! denominator of 1000, then reduced by the GCD). Conversion is a polyphase
//! evaluation of a Hamming windowed-sinc prototype designed at the
//! upsampled rate `L * fs_in` with cutoff `0.5 / max(L, M)`.
//!
//! Each output sample `n` sits at upsampled index `n M + D`, where `D` is the
//! prototype group delay, so the output is time-aligned with the input and
//! has `ceil(len * L / M)` samples. Conversion is skipped entirely when the
//! two rates are equal.

use crate::error::{CsrdError, CsrdResult};
use crate::filters::design_lowpass;
use crate::types::IQSample;

/// Default prototype taps per polyphase branch
pub const DEFAULT_TAPS_PER_PHASE: usize = 24;

/// Relative tolerance under which two rates are considered equal
const RATE_TOLERANCE: f64 = 1e-9;

/// `true` when a conversion between the two rates does something
pub fn needs_resampling(input_rate: f64, output_rate: f64) -> bool {
    (input_rate - output_rate).abs() > RATE_TOLERANCE * input_rate.abs().max(output_rate.abs())
}

/// Rational resampler for complex baseband
#[derive(Debug, Clone)]
pub struct Resampler {
    interp: usize,
    decim: usize,
    input_rate: f64,
    output_rate: f64,
    prototype: Vec<f64>,
}

impl Resampler {
    pub fn new(input_rate: f64, output_rate: f64) -> CsrdResult<Self> {
        Self::with_taps(input_rate, output_rate, DEFAULT_TAPS_PER_PHASE)
    }

    pub fn with_taps(input_rate: f64, output_rate: f64, taps_per_phase: usize) -> CsrdResult<Self> {
        for (name, rate) in [("input_rate", input_rate), ("output_rate", output_rate)] {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(CsrdError::invalid_field(name, format!("must be positive, got {}", rate)));
            }
        }
        let (interp, decim) = find_rational(input_rate, output_rate);
        let taps_per_phase = taps_per_phase.max(4);
        let total_taps = interp.max(decim) * taps_per_phase + 1;
        let cutoff = 0.5 / interp.max(decim) as f64;
        let prototype: Vec<f64> = design_lowpass(total_taps, cutoff)
            .into_iter()
            .map(|t| t * interp as f64)
            .collect();

        tracing::debug!(input_rate, output_rate, interp, decim, taps = total_taps, "resampler designed");
        Ok(Self {
            interp,
            decim,
            input_rate,
            output_rate,
            prototype,
        })
    }

    pub fn interpolation(&self) -> usize {
        self.interp
    }

    pub fn decimation(&self) -> usize {
        self.decim
    }

    /// Rate actually produced, `input_rate * L / M`
    pub fn actual_output_rate(&self) -> f64 {
        self.input_rate * self.interp as f64 / self.decim as f64
    }

    pub fn output_rate(&self) -> f64 {
        self.output_rate
    }

    /// Output length for `input_len` samples
    pub fn output_len(&self, input_len: usize) -> usize {
        (input_len * self.interp).div_ceil(self.decim)
    }

    /// Convert one buffer
    pub fn process(&self, input: &[IQSample]) -> Vec<IQSample> {
        if self.interp == 1 && self.decim == 1 {
            return input.to_vec();
        }
        let l = self.interp as isize;
        let len = self.prototype.len() as isize;
        let delay = (len - 1) / 2;
        let n_in = input.len() as isize;

        (0..self.output_len(input.len()))
            .map(|n| {
                let u = n as isize * self.decim as isize + delay;
                // Input k contributes through tap u - k L, which must lie in 0..len
                let k_max = (u / l).min(n_in - 1);
                let k_min = ((u - len + 1) as f64 / l as f64).ceil().max(0.0) as isize;
                let mut acc = IQSample::new(0.0, 0.0);
                let mut k = k_min;
                while k <= k_max {
                    acc += input[k as usize] * self.prototype[(u - k * l) as usize];
                    k += 1;
                }
                acc
            })
            .collect()
    }

    /// Convert every antenna
    pub fn process_antennas(&self, antennas: &[Vec<IQSample>]) -> Vec<Vec<IQSample>> {
        antennas.iter().map(|a| self.process(a)).collect()
    }
}

/// Best `L / M` approximation of `output_rate / input_rate` with `M <= 1000`
pub fn find_rational(input_rate: f64, output_rate: f64) -> (usize, usize) {
    let ratio = output_rate / input_rate;
    let mut best = (1usize, 1usize);
    let mut best_error = f64::MAX;

    for m in 1..=1000usize {
        let l = (ratio * m as f64).round() as usize;
        if l == 0 {
            continue;
        }
        let error = (l as f64 / m as f64 - ratio).abs();
        if error < best_error {
            best_error = error;
            best = (l, m);
            if error < 1e-10 {
                break;
            }
        }
    }

    let g = gcd(best.0, best.1);
    (best.0 / g, best.1 / g)
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}
