//! Oscillator phase noise synthesised from an L(f) mask
//!
//! The mask is a table of (offset Hz, level dBc/Hz) points, interpolated
//! linearly in level against log frequency and held flat outside the table.
//! A phase trajectory is generated by shaping complex white Gaussian noise
//! in the frequency domain:
//!
//! ```text
//!   Φ[k] = sqrt(L(|f_k|) Δf) W[k],   W ~ CN(0, 1),   Φ[0] = 0
//!   φ[n] = √2 Re{ Σ_k Φ[k] e^{j2πkn/N} }
//! ```
//!
//! so the variance of φ equals the mask integrated over `[-fs/2, fs/2)`.
//! All antennas share one oscillator and therefore one trajectory.

use crate::error::{CsrdError, CsrdResult};
use crate::spectrum::{bin_frequency, FftProcessor};
use crate::types::IQSample;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Smallest FFT used for synthesis
const MIN_FFT: usize = 64;

/// Level-vs-offset table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseNoiseMask {
    /// Offsets from the carrier (Hz), strictly increasing and positive
    pub offsets_hz: Vec<f64>,
    /// L(f) at each offset (dBc/Hz)
    pub levels_dbc_hz: Vec<f64>,
}

impl PhaseNoiseMask {
    pub fn new(offsets_hz: Vec<f64>, levels_dbc_hz: Vec<f64>) -> Self {
        Self {
            offsets_hz,
            levels_dbc_hz,
        }
    }

    pub fn validate(&self) -> CsrdResult<()> {
        if self.offsets_hz.is_empty() {
            return Err(CsrdError::MissingField("phase_noise.offsets_hz".into()));
        }
        if self.offsets_hz.len() != self.levels_dbc_hz.len() {
            return Err(CsrdError::InconsistentConfiguration(format!(
                "phase noise mask has {} offsets but {} levels",
                self.offsets_hz.len(),
                self.levels_dbc_hz.len()
            )));
        }
        if self.offsets_hz[0] <= 0.0 || self.offsets_hz.windows(2).any(|w| w[1] <= w[0]) {
            return Err(CsrdError::invalid_field(
                "phase_noise.offsets_hz",
                "offsets must be positive and strictly increasing",
            ));
        }
        Ok(())
    }

    /// L(f) in dBc/Hz at `offset_hz`
    pub fn evaluate(&self, offset_hz: f64) -> f64 {
        let offset = offset_hz.abs().max(1e-3);
        let (offsets, levels) = (&self.offsets_hz, &self.levels_dbc_hz);
        if offsets.is_empty() {
            return -200.0;
        }
        if offset <= offsets[0] {
            return levels[0];
        }
        let last = offsets.len() - 1;
        if offset >= offsets[last] {
            return levels[last];
        }
        for i in 0..last {
            if offset >= offsets[i] && offset <= offsets[i + 1] {
                let t = (offset / offsets[i]).ln() / (offsets[i + 1] / offsets[i]).ln();
                return levels[i] + (levels[i + 1] - levels[i]) * t;
            }
        }
        levels[last]
    }

    /// Phase variance (rad²) the mask implies at a given sample rate,
    /// integrated on an `n`-point grid
    pub fn integrated_variance(&self, sample_rate: f64, n: usize) -> f64 {
        let df = sample_rate / n as f64;
        (1..n)
            .map(|k| 10f64.powf(self.evaluate(bin_frequency(k, n, sample_rate)) / 10.0) * df)
            .sum()
    }
}

/// Phase noise configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseNoiseConfig {
    pub mask: PhaseNoiseMask,
    /// Fixed seed; when absent the owning front end supplies one
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Seeded phase noise generator
#[derive(Debug, Clone)]
pub struct PhaseNoise {
    mask: PhaseNoiseMask,
    sample_rate: f64,
    seed: u64,
    rng: StdRng,
}

impl PhaseNoise {
    pub fn new(mask: PhaseNoiseMask, sample_rate: f64, seed: u64) -> CsrdResult<Self> {
        mask.validate()?;
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(CsrdError::invalid_field("sample_rate", "must be positive"));
        }
        Ok(Self {
            mask,
            sample_rate,
            seed,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn mask(&self) -> &PhaseNoiseMask {
        &self.mask
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Change the rate the mask is evaluated at
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    /// Phase trajectory of `num_samples` points (radians)
    pub fn generate(&mut self, num_samples: usize) -> Vec<f64> {
        if num_samples == 0 {
            return Vec::new();
        }
        let n = num_samples.next_power_of_two().max(MIN_FFT);
        let df = self.sample_rate / n as f64;
        // Normal(0, 1/√2) per component gives E|W|² = 1
        let normal = match Normal::new(0.0, std::f64::consts::FRAC_1_SQRT_2) {
            Ok(normal) => normal,
            Err(_) => return vec![0.0; num_samples],
        };

        let mut spectrum: Vec<IQSample> = (0..n)
            .map(|k| {
                let w = IQSample::new(normal.sample(&mut self.rng), normal.sample(&mut self.rng));
                if k == 0 {
                    return IQSample::new(0.0, 0.0);
                }
                let level = self.mask.evaluate(bin_frequency(k, n, self.sample_rate));
                w * (10f64.powf(level / 10.0) * df).sqrt()
            })
            .collect();

        // ifft scales by 1/N; undo it to get the plain sum
        FftProcessor::new(n).ifft_inplace(&mut spectrum);
        let scale = std::f64::consts::SQRT_2 * n as f64;
        spectrum
            .iter()
            .take(num_samples)
            .map(|z| z.re * scale)
            .collect()
    }

    /// Rotate every antenna by one shared phase trajectory
    pub fn apply(&mut self, antennas: &mut [Vec<IQSample>]) {
        let len = antennas.iter().map(Vec::len).max().unwrap_or(0);
        let phase = self.generate(len);
        for antenna in antennas.iter_mut() {
            for (s, &phi) in antenna.iter_mut().zip(phase.iter()) {
                *s *= IQSample::from_polar(1.0, phi);
            }
        }
    }

    /// Restart the noise sequence from the seed
    pub fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask() -> PhaseNoiseMask {
        PhaseNoiseMask::new(vec![1e3, 1e4, 1e5], vec![-80.0, -100.0, -120.0])
    }

    #[test]
    fn test_mask_log_interpolation() {
        let m = mask();
        assert_eq!(m.evaluate(10.0), -80.0);
        assert_eq!(m.evaluate(1e6), -120.0);
        assert!((m.evaluate(10f64.powf(3.5)) - (-90.0)).abs() < 1e-9);
        assert!((m.evaluate(-1e4) - (-100.0)).abs() < 1e-9);
    }

    #[test]
    fn test_mask_validation() {
        assert!(mask().validate().is_ok());
        assert!(PhaseNoiseMask::new(vec![1e3, 1e4], vec![-80.0]).validate().is_err());
        assert!(PhaseNoiseMask::new(vec![1e4, 1e3], vec![-80.0, -90.0]).validate().is_err());
        assert!(PhaseNoiseMask::new(vec![], vec![]).validate().is_err());
    }

    #[test]
    fn test_flat_mask_variance() {
        let fs = 1e6;
        let flat = PhaseNoiseMask::new(vec![1.0], vec![-100.0]);
        let mut pn = PhaseNoise::new(flat.clone(), fs, 7).unwrap();
        let phase = pn.generate(1 << 16);
        let var = phase.iter().map(|p| p * p).sum::<f64>() / phase.len() as f64;
        let expected = flat.integrated_variance(fs, 1 << 16);
        assert!((expected - 1e-4).abs() < 1e-6);
        assert!((var / expected - 1.0).abs() < 0.1, "var {} expected {}", var, expected);
    }

    #[test]
    fn test_apply_preserves_envelope_and_is_shared() {
        let mut pn = PhaseNoise::new(mask(), 1e6, 3).unwrap();
        let mut antennas = vec![vec![IQSample::new(1.0, 0.0); 500]; 2];
        pn.apply(&mut antennas);
        for (a, b) in antennas[0].iter().zip(antennas[1].iter()) {
            assert!((a.norm() - 1.0).abs() < 1e-12);
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_reset_repeats_sequence() {
        let mut pn = PhaseNoise::new(mask(), 1e6, 5).unwrap();
        let a = pn.generate(300);
        let b = pn.generate(300);
        pn.reset();
        let c = pn.generate(300);
        assert_eq!(a, c);
        assert_ne!(a, b);
    }
}
