//! FFT helpers and occupied-bandwidth estimation
//!
//! ## Occupied bandwidth
//!
//! The occupied bandwidth is the two-sided frequency span that contains
//! [`OBW_POWER_FRACTION`] of the total signal power, with equal power left
//! outside each edge:
//!
//! ```text
//!  PSD
//!   |        ______________
//!   |       /              \
//!   |  ____/                \____
//!   +-----|------------------|-----> f
//!       f_lo                f_hi
//!    (1-p)/2 below      (1-p)/2 above
//! ```
//!
//! The PSD is a Welch estimate (Hann window, 50% overlap) so the result is
//! stable for short bursts of random data.

use crate::filters::hann_window;
use crate::types::IQSample;
use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

/// Fraction of total power enclosed by the occupied bandwidth
pub const OBW_POWER_FRACTION: f64 = 0.999;

/// Default Welch segment length
const WELCH_SEGMENT: usize = 1024;

/// Forward/inverse FFT pair of a fixed size
#[derive(Clone)]
pub struct FftProcessor {
    size: usize,
    fft_forward: Arc<dyn Fft<f64>>,
    fft_inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for FftProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftProcessor")
            .field("size", &self.size)
            .finish()
    }
}

impl FftProcessor {
    /// Create a new FFT processor for the given size
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft_forward = planner.plan_fft_forward(size);
        let fft_inverse = planner.plan_fft_inverse(size);
        Self {
            size,
            fft_forward,
            fft_inverse,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Unnormalised forward FFT in place
    pub fn fft_inplace(&self, buffer: &mut [Complex64]) {
        assert_eq!(buffer.len(), self.size);
        self.fft_forward.process(buffer);
    }

    /// Forward FFT, zero-padding or truncating the input to the FFT size
    pub fn fft(&self, input: &[IQSample]) -> Vec<Complex64> {
        let mut buffer: Vec<Complex64> = input.iter().take(self.size).copied().collect();
        buffer.resize(self.size, Complex64::new(0.0, 0.0));
        self.fft_inplace(&mut buffer);
        buffer
    }

    /// Inverse FFT in place, scaled by 1/N
    pub fn ifft_inplace(&self, buffer: &mut [Complex64]) {
        assert_eq!(buffer.len(), self.size);
        self.fft_inverse.process(buffer);
        let scale = 1.0 / self.size as f64;
        for sample in buffer.iter_mut() {
            *sample *= scale;
        }
    }

    /// Inverse FFT scaled by 1/N
    pub fn ifft(&self, input: &[Complex64]) -> Vec<Complex64> {
        let mut buffer: Vec<Complex64> = input.iter().take(self.size).copied().collect();
        buffer.resize(self.size, Complex64::new(0.0, 0.0));
        self.ifft_inplace(&mut buffer);
        buffer
    }

    /// Unitary forward FFT (scaled by 1/sqrt(N))
    pub fn fft_unitary(&self, buffer: &mut [Complex64]) {
        self.fft_inplace(buffer);
        let scale = 1.0 / (self.size as f64).sqrt();
        buffer.iter_mut().for_each(|s| *s *= scale);
    }

    /// Unitary inverse FFT (scaled by 1/sqrt(N))
    pub fn ifft_unitary(&self, buffer: &mut [Complex64]) {
        assert_eq!(buffer.len(), self.size);
        self.fft_inverse.process(buffer);
        let scale = 1.0 / (self.size as f64).sqrt();
        buffer.iter_mut().for_each(|s| *s *= scale);
    }
}

/// Frequency (Hz) of FFT bin `k` for an `n`-point FFT, in `[-fs/2, fs/2)`
pub fn bin_frequency(k: usize, n: usize, sample_rate: f64) -> f64 {
    let k = if k >= n.div_ceil(2) { k as f64 - n as f64 } else { k as f64 };
    k * sample_rate / n as f64
}

/// Welch power spectral density, returned in natural FFT bin order.
///
/// Full segments overlap by 50%; an input shorter than one segment is
/// analysed as a single zero-padded segment.
pub fn welch_psd(samples: &[IQSample], segment: usize) -> Vec<f64> {
    let seg = segment.max(8);
    let fft = FftProcessor::new(seg);
    let window = hann_window(seg);
    let mut psd = vec![0.0; seg];

    if samples.is_empty() {
        return psd;
    }

    let hop = seg / 2;
    let mut count = 0usize;
    let mut accumulate = |chunk: &[IQSample]| {
        let mut buffer: Vec<Complex64> = chunk
            .iter()
            .zip(window.iter())
            .map(|(&s, &w)| s * w)
            .collect();
        buffer.resize(seg, Complex64::new(0.0, 0.0));
        fft.fft_inplace(&mut buffer);
        for (p, b) in psd.iter_mut().zip(buffer.iter()) {
            *p += b.norm_sqr();
        }
        count += 1;
    };

    if samples.len() < seg {
        accumulate(samples);
    } else {
        // Full segments only: a partial window would add a step discontinuity
        let mut start = 0usize;
        while start + seg <= samples.len() {
            accumulate(&samples[start..start + seg]);
            start += hop;
        }
    }

    let norm = count as f64;
    psd.iter_mut().for_each(|p| *p /= norm);
    psd
}

/// Two-sided occupied bandwidth of one antenna stream.
///
/// Returns `(lower_edge_hz, upper_edge_hz)`; `None` for an empty or
/// zero-power input.
pub fn occupied_band(samples: &[IQSample], sample_rate: f64) -> Option<(f64, f64)> {
    let segment = WELCH_SEGMENT.min(samples.len().next_power_of_two()).max(64);
    let psd = welch_psd(samples, segment);
    let n = psd.len();

    // Reorder to ascending frequency
    let half = n.div_ceil(2);
    let ordered: Vec<f64> = psd[half..].iter().chain(psd[..half].iter()).copied().collect();
    let total: f64 = ordered.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }

    let tail = (1.0 - OBW_POWER_FRACTION) / 2.0 * total;
    let bin_hz = sample_rate / n as f64;
    let first_freq = -((n - half) as f64) * bin_hz;

    let mut acc = 0.0;
    let mut lo_idx = 0;
    for (i, &p) in ordered.iter().enumerate() {
        acc += p;
        if acc > tail {
            lo_idx = i;
            break;
        }
    }
    let mut acc = 0.0;
    let mut hi_idx = n - 1;
    for (i, &p) in ordered.iter().enumerate().rev() {
        acc += p;
        if acc > tail {
            hi_idx = i;
            break;
        }
    }

    // Bin edges, not centres
    let lower = first_freq + lo_idx as f64 * bin_hz - bin_hz / 2.0;
    let upper = first_freq + hi_idx as f64 * bin_hz + bin_hz / 2.0;
    Some((lower.max(-sample_rate / 2.0), upper.min(sample_rate / 2.0)))
}

/// Occupied bandwidth (width in Hz) of one antenna stream
pub fn occupied_bandwidth(samples: &[IQSample], sample_rate: f64) -> f64 {
    occupied_band(samples, sample_rate).map_or(0.0, |(lo, hi)| hi - lo)
}

/// Occupied bandwidth across antennas: the widest single antenna wins
pub fn occupied_bandwidth_mimo(antennas: &[Vec<IQSample>], sample_rate: f64) -> f64 {
    antennas
        .iter()
        .map(|col| occupied_bandwidth(col, sample_rate))
        .fold(0.0, f64::max)
}

/// Bin index of the strongest component of an FFT output
pub fn peak_bin(spectrum: &[Complex64]) -> usize {
    spectrum
        .iter()
        .enumerate()
        .fold((0, f64::MIN), |acc, (i, s)| {
            let m = s.norm_sqr();
            if m > acc.1 {
                (i, m)
            } else {
                acc
            }
        })
        .0
}
