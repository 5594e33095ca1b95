//! Additive white Gaussian noise
//!
//! Noise power is set from the measured input power and the target SNR:
//!
//! ```text
//! N = P_signal / 10^(SNR/10)        σ² per I/Q component = N / 2
//! ```
//!
//! A silent input has no power to measure; unit noise power is used instead
//! and a warning is logged.

use csrd_core::types::{complex_ops, IQSample};
use csrd_core::{CsrdError, CsrdResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AwgnConfig {
    pub snr_db: f64,
}

impl AwgnConfig {
    pub fn validate(&self) -> CsrdResult<()> {
        if !self.snr_db.is_finite() {
            return Err(CsrdError::invalid_parameter("snr_db", "must be finite"));
        }
        Ok(())
    }
}

/// Seeded AWGN source
#[derive(Debug, Clone)]
pub struct Awgn {
    snr_db: f64,
    rng: StdRng,
}

impl Awgn {
    pub fn new(config: AwgnConfig, seed: u64) -> CsrdResult<Self> {
        config.validate()?;
        Ok(Self {
            snr_db: config.snr_db,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn snr_db(&self) -> f64 {
        self.snr_db
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Noise power for a measured signal power, with the silent-input fallback
    pub fn noise_power_for(&self, signal_power: f64) -> f64 {
        if signal_power > 0.0 && signal_power.is_finite() {
            signal_power / complex_ops::db_to_linear(self.snr_db)
        } else {
            tracing::warn!(snr_db = self.snr_db, "zero-power input to AWGN, using unit noise variance");
            1.0
        }
    }

    /// Add noise in place; returns the noise power used (W)
    pub fn apply(&mut self, antennas: &mut [Vec<IQSample>]) -> CsrdResult<f64> {
        let total: usize = antennas.iter().map(Vec::len).sum();
        let power = if total == 0 {
            0.0
        } else {
            antennas
                .iter()
                .map(|a| a.iter().map(|s| s.norm_sqr()).sum::<f64>())
                .sum::<f64>()
                / total as f64
        };
        let noise_power = self.noise_power_for(power);
        let normal = Normal::new(0.0, (noise_power / 2.0).sqrt())
            .map_err(|e| CsrdError::invalid_parameter("snr_db", e.to_string()))?;
        for antenna in antennas.iter_mut() {
            for s in antenna.iter_mut() {
                *s += IQSample::new(normal.sample(&mut self.rng), normal.sample(&mut self.rng));
            }
        }
        Ok(noise_power)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian(n: usize, seed: u64) -> Vec<IQSample> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, std::f64::consts::FRAC_1_SQRT_2).unwrap();
        (0..n)
            .map(|_| IQSample::new(normal.sample(&mut rng), normal.sample(&mut rng)))
            .collect()
    }

    #[test]
    fn test_snr_accuracy() {
        let clean = gaussian(1_000_000, 1);
        let mut noisy = vec![clean.clone()];
        let mut awgn = Awgn::new(AwgnConfig { snr_db: 10.0 }, 2).unwrap();
        awgn.apply(&mut noisy).unwrap();

        let signal_power = complex_ops::mean_power(&clean);
        let noise_power = clean
            .iter()
            .zip(noisy[0].iter())
            .map(|(c, n)| (n - c).norm_sqr())
            .sum::<f64>()
            / clean.len() as f64;
        let snr = 10.0 * (signal_power / noise_power).log10();
        assert!((snr - 10.0).abs() < 0.5, "measured SNR {} dB", snr);
    }

    #[test]
    fn test_silent_input_uses_unit_variance() {
        let mut buf = vec![vec![IQSample::new(0.0, 0.0); 100_000]];
        let mut awgn = Awgn::new(AwgnConfig { snr_db: 20.0 }, 3).unwrap();
        let used = awgn.apply(&mut buf).unwrap();
        assert_eq!(used, 1.0);
        let measured = complex_ops::mean_power(&buf[0]);
        assert!((measured - 1.0).abs() < 0.02, "noise power {}", measured);
    }

    #[test]
    fn test_reseed_repeats() {
        let clean = vec![vec![IQSample::new(1.0, 0.0); 64]];
        let mut awgn = Awgn::new(AwgnConfig { snr_db: 5.0 }, 9).unwrap();
        let mut a = clean.clone();
        awgn.apply(&mut a).unwrap();
        awgn.reseed(9);
        let mut b = clean.clone();
        awgn.apply(&mut b).unwrap();
        assert_eq!(a, b);
    }
}
