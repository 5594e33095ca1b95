//! Windowed-sinc low-pass prototypes

use super::pulse_shaping::sinc;
use std::f64::consts::PI;

/// Hamming window of `length` points
pub fn hamming_window(length: usize) -> Vec<f64> {
    if length <= 1 {
        return vec![1.0; length];
    }
    let m = (length - 1) as f64;
    (0..length)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / m).cos())
        .collect()
}

/// Periodic Hann window of `length` points (for spectral estimation)
pub fn hann_window(length: usize) -> Vec<f64> {
    (0..length)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / length as f64).cos())
        .collect()
}

/// Design a low-pass FIR using windowed-sinc (Hamming window).
///
/// `cutoff` is normalised to the sample rate (0..0.5). DC gain is 1.
pub fn design_lowpass(num_taps: usize, cutoff: f64) -> Vec<f64> {
    let n = num_taps.max(1);
    let m = (n - 1) as f64;
    let window = hamming_window(n);

    let mut taps: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64 - m / 2.0;
            2.0 * cutoff * sinc(2.0 * cutoff * x) * window[i]
        })
        .collect();

    let sum: f64 = taps.iter().sum();
    if sum.abs() > 1e-12 {
        for t in taps.iter_mut() {
            *t /= sum;
        }
    }
    taps
}

/// Taps that delay a band-limited signal by `delay` samples (may be
/// fractional). Tap `k` corresponds to a lag of `k` samples; the filter
/// covers lags `0..=floor(delay) + half_width`.
pub fn fractional_delay_taps(delay: f64, half_width: usize) -> Vec<f64> {
    let delay = delay.max(0.0);
    let integer = delay.floor() as usize;
    let frac = delay - integer as f64;

    if frac < 1e-9 {
        let mut taps = vec![0.0; integer + 1];
        taps[integer] = 1.0;
        return taps;
    }

    let first = integer.saturating_sub(half_width);
    let last = integer + half_width + 1;
    let span = (last - first) as f64;

    let mut taps = vec![0.0; last + 1];
    for (k, tap) in taps.iter_mut().enumerate().skip(first) {
        let x = k as f64 - delay;
        let pos = (k - first) as f64 / span;
        let w = 0.54 - 0.46 * (2.0 * PI * pos).cos();
        *tap = sinc(x) * w;
    }
    let sum: f64 = taps.iter().sum();
    if sum.abs() > 1e-12 {
        for t in taps.iter_mut() {
            *t /= sum;
        }
    }
    taps
}
