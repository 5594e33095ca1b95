//! MIMO multipath fading
//!
//! Each (path, tx, rx) triple gets its own sum-of-sinusoids fading process
//! (Zheng–Xiao model, Clarke Doppler spectrum). Paths are delayed with
//! windowed-sinc fractional delay taps and weighted by their average gains.
//!
//! ```text
//!  x_t ─► delay τ_p ─► × a_p · g_{p,t,r}(t) ─┐
//!                                             Σ over p, t ─► / √T ─► (+ AWGN) ─► y_r
//! ```
//!
//! Fading time keeps running across steps, so consecutive frames see a
//! continuous channel. The first path carries the line-of-sight component
//! when Rician fading is selected.

use super::awgn::{Awgn, AwgnConfig};
use csrd_core::filters::fractional_delay_taps;
use csrd_core::types::{AntennaSamples, IQSample};
use csrd_core::{CsrdError, CsrdResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const DEFAULT_SINUSOIDS: usize = 16;
const DELAY_HALF_WIDTH: usize = 8;

fn default_sinusoids() -> usize {
    DEFAULT_SINUSOIDS
}

fn default_true() -> bool {
    true
}

/// Small-scale fading distribution
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "distribution", rename_all = "snake_case")]
pub enum FadingDistribution {
    #[default]
    Rayleigh,
    Rician {
        /// Line-of-sight to scattered power ratio (linear)
        k_factor: f64,
        #[serde(default)]
        los_doppler_hz: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MimoFadingConfig {
    /// Path delays (s)
    pub path_delays: Vec<f64>,
    pub average_path_gains_db: Vec<f64>,
    #[serde(default)]
    pub max_doppler_hz: f64,
    #[serde(default)]
    pub fading: FadingDistribution,
    /// Scale path gains to unit total power
    #[serde(default = "default_true")]
    pub normalize_path_gains: bool,
    /// Receiver noise after fading
    #[serde(default)]
    pub snr_db: Option<f64>,
    #[serde(default = "default_sinusoids")]
    pub num_sinusoids: usize,
}

impl MimoFadingConfig {
    /// Single-path Rayleigh channel
    pub fn flat(max_doppler_hz: f64) -> Self {
        Self {
            path_delays: vec![0.0],
            average_path_gains_db: vec![0.0],
            max_doppler_hz,
            fading: FadingDistribution::Rayleigh,
            normalize_path_gains: true,
            snr_db: None,
            num_sinusoids: DEFAULT_SINUSOIDS,
        }
    }

    pub fn validate(&self, sample_rate: f64) -> CsrdResult<()> {
        if self.path_delays.len() != self.average_path_gains_db.len() {
            return Err(CsrdError::InconsistentConfiguration(format!(
                "{} path delays but {} path gains",
                self.path_delays.len(),
                self.average_path_gains_db.len()
            )));
        }
        if self.path_delays.is_empty() {
            return Err(CsrdError::MissingField("path_delays".into()));
        }
        if self.path_delays.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(CsrdError::invalid_parameter("path_delays", "delays must be finite and non-negative"));
        }
        if self.average_path_gains_db.iter().any(|g| !g.is_finite()) {
            return Err(CsrdError::invalid_parameter("average_path_gains_db", "gains must be finite"));
        }
        if !self.max_doppler_hz.is_finite() || self.max_doppler_hz < 0.0 {
            return Err(CsrdError::invalid_parameter("max_doppler_hz", "must be finite and non-negative"));
        }
        if let FadingDistribution::Rician { k_factor, los_doppler_hz } = self.fading {
            if !k_factor.is_finite() || k_factor < 0.0 || !los_doppler_hz.is_finite() {
                return Err(CsrdError::invalid_parameter("k_factor", "must be finite and non-negative"));
            }
        }
        if self.num_sinusoids == 0 {
            return Err(CsrdError::invalid_parameter("num_sinusoids", "must be at least 1"));
        }
        if let Some(snr) = self.snr_db {
            AwgnConfig { snr_db: snr }.validate()?;
        }
        if self.max_doppler_hz > sample_rate / 10.0 {
            tracing::warn!(
                max_doppler_hz = self.max_doppler_hz,
                sample_rate,
                "Doppler shift exceeds sample_rate / 10, fading may be unstable"
            );
        }
        Ok(())
    }

    /// Linear amplitude per path
    fn path_amplitudes(&self) -> Vec<f64> {
        let mut amps: Vec<f64> = self
            .average_path_gains_db
            .iter()
            .map(|g| 10f64.powf(g / 20.0))
            .collect();
        if self.normalize_path_gains {
            let total: f64 = amps.iter().map(|a| a * a).sum();
            if total > 0.0 {
                let norm = total.sqrt();
                amps.iter_mut().for_each(|a| *a /= norm);
            }
        }
        amps
    }
}

/// One sum-of-sinusoids fading process with unit mean power
#[derive(Debug, Clone)]
struct SosFader {
    in_phase: Vec<(f64, f64)>,
    quadrature: Vec<(f64, f64)>,
    scale: f64,
    los: Option<(f64, f64, f64)>,
}

impl SosFader {
    fn new<R: Rng + ?Sized>(n: usize, max_doppler: f64, los: Option<(f64, f64)>, rng: &mut R) -> Self {
        let theta = rng.gen_range(-PI..PI);
        let mut in_phase = Vec::with_capacity(n);
        let mut quadrature = Vec::with_capacity(n);
        for k in 1..=n {
            let alpha = (2.0 * PI * k as f64 - PI + theta) / (4.0 * n as f64);
            in_phase.push((max_doppler * alpha.cos(), rng.gen_range(-PI..PI)));
            quadrature.push((max_doppler * alpha.sin(), rng.gen_range(-PI..PI)));
        }
        // g = (g_c + j g_s) / √2 with E[g_c²] = E[g_s²] = 1
        let scale = (2.0 / n as f64).sqrt() / std::f64::consts::SQRT_2;
        let los = los.map(|(k, f)| (k, f, rng.gen_range(-PI..PI)));
        Self {
            in_phase,
            quadrature,
            scale,
            los,
        }
    }

    fn gain(&self, t: f64) -> IQSample {
        let sum = |terms: &[(f64, f64)]| -> f64 {
            terms.iter().map(|&(f, phi)| (2.0 * PI * f * t + phi).cos()).sum()
        };
        let scattered = IQSample::new(sum(&self.in_phase), sum(&self.quadrature)) * self.scale;
        match self.los {
            None => scattered,
            Some((k, f_los, phi)) => {
                let los = IQSample::from_polar((k / (k + 1.0)).sqrt(), 2.0 * PI * f_los * t + phi);
                los + scattered * (1.0 / (k + 1.0)).sqrt()
            }
        }
    }
}

/// Configured fading channel
#[derive(Debug, Clone)]
pub struct MimoFading {
    config: MimoFadingConfig,
    sample_rate: f64,
    num_tx: usize,
    num_rx: usize,
    amplitudes: Vec<f64>,
    taps: Vec<Vec<f64>>,
    /// Indexed `[path][tx][rx]`, flattened
    faders: Vec<SosFader>,
    elapsed: u64,
    awgn: Option<Awgn>,
    seed: u64,
}

impl MimoFading {
    pub fn new(
        config: MimoFadingConfig,
        sample_rate: f64,
        num_tx: usize,
        num_rx: usize,
        seed: u64,
    ) -> CsrdResult<Self> {
        config.validate(sample_rate)?;
        if num_tx == 0 || num_rx == 0 {
            return Err(CsrdError::invalid_parameter("antennas", "need at least one tx and one rx antenna"));
        }
        let amplitudes = config.path_amplitudes();
        let taps = config
            .path_delays
            .iter()
            .map(|d| fractional_delay_taps(d * sample_rate, DELAY_HALF_WIDTH))
            .collect();
        let awgn = config
            .snr_db
            .map(|snr_db| Awgn::new(AwgnConfig { snr_db }, seed.wrapping_add(1)))
            .transpose()?;
        let mut channel = Self {
            config,
            sample_rate,
            num_tx,
            num_rx,
            amplitudes,
            taps,
            faders: Vec::new(),
            elapsed: 0,
            awgn,
            seed,
        };
        channel.draw_faders();
        Ok(channel)
    }

    fn draw_faders(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let count = self.config.path_delays.len() * self.num_tx * self.num_rx;
        self.faders = (0..count)
            .map(|i| {
                let first_path = i < self.num_tx * self.num_rx;
                let los = match self.config.fading {
                    FadingDistribution::Rician { k_factor, los_doppler_hz } if first_path => {
                        Some((k_factor, los_doppler_hz))
                    }
                    _ => None,
                };
                SosFader::new(self.config.num_sinusoids, self.config.max_doppler_hz, los, &mut rng)
            })
            .collect();
    }

    pub fn config(&self) -> &MimoFadingConfig {
        &self.config
    }

    pub fn num_rx(&self) -> usize {
        self.num_rx
    }

    /// Seconds of channel time consumed so far
    pub fn elapsed(&self) -> f64 {
        self.elapsed as f64 / self.sample_rate
    }

    /// Reseed the additive noise only; fading continues
    pub fn reseed_noise(&mut self, seed: u64) {
        if let Some(awgn) = self.awgn.as_mut() {
            awgn.reseed(seed);
        }
    }

    /// Restart fading time and every random stream from `seed`
    pub fn reset(&mut self, seed: u64) {
        self.seed = seed;
        self.elapsed = 0;
        self.draw_faders();
        if let Some(awgn) = self.awgn.as_mut() {
            awgn.reseed(seed.wrapping_add(1));
        }
    }

    /// Fade one block of `[tx][time]` samples into `[rx][time]`
    pub fn process(&mut self, input: &[Vec<IQSample>]) -> CsrdResult<AntennaSamples> {
        if input.len() != self.num_tx {
            return Err(CsrdError::AntennaMismatch {
                expected: self.num_tx,
                actual: input.len(),
            });
        }
        let n = input.first().map_or(0, Vec::len);
        let mut output = vec![vec![IQSample::new(0.0, 0.0); n]; self.num_rx];
        let t0 = self.elapsed;
        let antenna_norm = 1.0 / (self.num_tx as f64).sqrt();

        for (p, taps) in self.taps.iter().enumerate() {
            let amp = self.amplitudes[p] * antenna_norm;
            for (t, x) in input.iter().enumerate() {
                let delayed = convolve_truncated(x, taps);
                for (r, y) in output.iter_mut().enumerate() {
                    let fader = &self.faders[(p * self.num_tx + t) * self.num_rx + r];
                    for (i, (out, d)) in y.iter_mut().zip(delayed.iter()).enumerate() {
                        let time = (t0 + i as u64) as f64 / self.sample_rate;
                        *out += *d * fader.gain(time) * amp;
                    }
                }
            }
        }
        self.elapsed += n as u64;

        if let Some(awgn) = self.awgn.as_mut() {
            awgn.apply(&mut output)?;
        }
        Ok(output)
    }
}

/// Causal FIR, output the same length as the input
fn convolve_truncated(x: &[IQSample], taps: &[f64]) -> Vec<IQSample> {
    (0..x.len())
        .map(|i| {
            taps.iter()
                .enumerate()
                .take(i + 1)
                .fold(IQSample::new(0.0, 0.0), |acc, (k, &h)| acc + x[i - k] * h)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use csrd_core::types::complex_ops;

    #[test]
    fn test_mismatched_paths_rejected() {
        let cfg = MimoFadingConfig {
            path_delays: vec![0.0, 1e-6],
            average_path_gains_db: vec![0.0],
            ..MimoFadingConfig::flat(10.0)
        };
        assert!(matches!(
            MimoFading::new(cfg, 1e6, 1, 1, 0),
            Err(CsrdError::InconsistentConfiguration(_))
        ));
    }

    #[test]
    fn test_rayleigh_mean_power() {
        let fs = 1e4;
        let mut ch = MimoFading::new(MimoFadingConfig::flat(100.0), fs, 1, 1, 5).unwrap();
        let input = vec![vec![IQSample::new(1.0, 0.0); 200_000]];
        let out = ch.process(&input).unwrap();
        let p = complex_ops::mean_power(&out[0]);
        assert!(p > 0.7 && p < 1.3, "mean fading power {}", p);
        assert!((ch.elapsed() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_integer_path_delay() {
        let fs = 1e6;
        let cfg = MimoFadingConfig {
            path_delays: vec![3e-6],
            ..MimoFadingConfig::flat(0.0)
        };
        let mut ch = MimoFading::new(cfg, fs, 1, 1, 8).unwrap();
        let mut impulse = vec![IQSample::new(0.0, 0.0); 16];
        impulse[0] = IQSample::new(1.0, 0.0);
        let out = ch.process(&[impulse]).unwrap();
        let peak = out[0]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 3);
        assert!(out[0][0].norm() < 1e-12);
    }

    #[test]
    fn test_antenna_shape_and_mismatch() {
        let mut ch = MimoFading::new(MimoFadingConfig::flat(5.0), 1e5, 2, 3, 1).unwrap();
        let input = vec![vec![IQSample::new(1.0, 0.0); 100]; 2];
        let out = ch.process(&input).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|a| a.len() == 100));
        assert!(matches!(
            ch.process(&input[..1]),
            Err(CsrdError::AntennaMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_rician_strong_los_is_nearly_constant() {
        let cfg = MimoFadingConfig {
            fading: FadingDistribution::Rician {
                k_factor: 1000.0,
                los_doppler_hz: 0.0,
            },
            ..MimoFadingConfig::flat(50.0)
        };
        let mut ch = MimoFading::new(cfg, 1e4, 1, 1, 2).unwrap();
        let out = ch.process(&[vec![IQSample::new(1.0, 0.0); 5000]]).unwrap();
        assert!(out[0].iter().all(|s| (s.norm() - 1.0).abs() < 0.2));
    }

    #[test]
    fn test_reset_reproduces_and_time_continues() {
        let mut ch = MimoFading::new(MimoFadingConfig::flat(30.0), 1e4, 1, 1, 4).unwrap();
        let x = vec![vec![IQSample::new(1.0, 0.0); 500]];
        let a = ch.process(&x).unwrap();
        let b = ch.process(&x).unwrap();
        assert_ne!(a, b);
        ch.reset(4);
        assert_eq!(ch.process(&x).unwrap(), a);
    }
}
