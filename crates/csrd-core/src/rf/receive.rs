//! Receive RF front end
//!
//! ```text
//!   frame ─► resample ─► tune (−offset) ─► thermal noise kTBF ─► amplifier
//!         ─► phase noise ─► DC offset ─► IQ imbalance ─► AGC ─► Signal
//! ```
//!
//! Thermal noise uses the receiver's full sample rate as the noise bandwidth
//! and is only added when a noise figure is configured.

use super::impairments::{DcOffset, IqImbalance};
use super::nonlinearity::Amplifier;
use super::phase_noise::{PhaseNoise, PhaseNoiseConfig};
use super::resample::{needs_resampling, Resampler};
use super::translate::FrequencyTranslator;
use crate::error::{CsrdError, CsrdResult};
use crate::signal::Signal;
use crate::types::{complex_ops, IQSample, BOLTZMANN, T0_KELVIN};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Automatic gain control: scale each antenna to a target RMS amplitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Agc {
    pub target_rms: f64,
}

impl Default for Agc {
    fn default() -> Self {
        Self { target_rms: 1.0 }
    }
}

impl Agc {
    fn apply(&self, samples: &mut [IQSample]) {
        let rms = complex_ops::rms(samples);
        if rms > 0.0 {
            complex_ops::scale(samples, self.target_rms / rms);
        }
    }
}

/// Unconfigured receive front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxFrontEndSpec {
    /// Receiver sample rate (Hz)
    pub sample_rate: f64,
    /// Receiver centre relative to the frame's baseband centre (Hz)
    #[serde(default)]
    pub tuning_offset: f64,
    #[serde(default)]
    pub noise_figure_db: Option<f64>,
    #[serde(default)]
    pub amplifier: Option<Amplifier>,
    #[serde(default)]
    pub phase_noise: Option<PhaseNoiseConfig>,
    #[serde(default)]
    pub dc_offset: Option<DcOffset>,
    #[serde(default)]
    pub iq_imbalance: Option<IqImbalance>,
    #[serde(default)]
    pub agc: Option<Agc>,
    #[serde(default)]
    pub seed: u64,
}

impl RxFrontEndSpec {
    /// A receiver that only resamples and tunes
    pub fn ideal(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            tuning_offset: 0.0,
            noise_figure_db: None,
            amplifier: None,
            phase_noise: None,
            dc_offset: None,
            iq_imbalance: None,
            agc: None,
            seed: 0,
        }
    }

    pub fn with_noise_figure(mut self, noise_figure_db: f64) -> Self {
        self.noise_figure_db = Some(noise_figure_db);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn setup(self) -> CsrdResult<RxFrontEnd> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(CsrdError::invalid_field(
                "receive.sample_rate",
                format!("must be positive, got {}", self.sample_rate),
            ));
        }
        if !self.tuning_offset.is_finite() {
            return Err(CsrdError::invalid_field("receive.tuning_offset", "must be finite"));
        }
        if let Some(nf) = self.noise_figure_db {
            if !nf.is_finite() || nf < 0.0 {
                return Err(CsrdError::invalid_field(
                    "receive.noise_figure_db",
                    format!("must be non-negative, got {}", nf),
                ));
            }
        }
        if let Some(agc) = &self.agc {
            if !(agc.target_rms.is_finite() && agc.target_rms > 0.0) {
                return Err(CsrdError::invalid_field("receive.agc.target_rms", "must be positive"));
            }
        }
        if let Some(amp) = &self.amplifier {
            amp.validate()?;
        }
        let phase_noise = match &self.phase_noise {
            Some(cfg) => Some(PhaseNoise::new(
                cfg.mask.clone(),
                self.sample_rate,
                cfg.seed.unwrap_or(self.seed.wrapping_add(1)),
            )?),
            None => None,
        };
        let rng = StdRng::seed_from_u64(self.seed);
        Ok(RxFrontEnd {
            spec: self,
            phase_noise,
            rng,
        })
    }
}

/// Configured receive front end
#[derive(Debug, Clone)]
pub struct RxFrontEnd {
    spec: RxFrontEndSpec,
    phase_noise: Option<PhaseNoise>,
    rng: StdRng,
}

impl RxFrontEnd {
    pub fn spec(&self) -> &RxFrontEndSpec {
        &self.spec
    }

    /// Thermal noise power over the receiver bandwidth (W)
    pub fn thermal_noise_watts(&self) -> Option<f64> {
        self.spec
            .noise_figure_db
            .map(|nf| BOLTZMANN * T0_KELVIN * self.spec.sample_rate * complex_ops::db_to_linear(nf))
    }

    fn add_thermal_noise(&mut self, antennas: &mut [Vec<IQSample>], power: f64) -> CsrdResult<()> {
        let normal = Normal::new(0.0, (power / 2.0).sqrt())
            .map_err(|e| CsrdError::invalid_parameter("noise_figure_db", e.to_string()))?;
        for antenna in antennas.iter_mut() {
            for s in antenna.iter_mut() {
                *s += IQSample::new(normal.sample(&mut self.rng), normal.sample(&mut self.rng));
            }
        }
        Ok(())
    }

    pub fn process(&mut self, input: &Signal) -> CsrdResult<Signal> {
        input.validate()?;
        let fs = self.spec.sample_rate;

        let mut samples = if needs_resampling(input.sample_rate, fs) {
            Resampler::new(input.sample_rate, fs)?.process_antennas(&input.samples)
        } else {
            input.samples.clone()
        };

        FrequencyTranslator::new(-self.spec.tuning_offset, fs).process_antennas(&mut samples);

        let noise = self.thermal_noise_watts();
        if let Some(power) = noise {
            self.add_thermal_noise(&mut samples, power)?;
        }
        if let Some(amp) = &self.spec.amplifier {
            samples.iter_mut().for_each(|a| amp.apply(a));
        }
        if let Some(pn) = self.phase_noise.as_mut() {
            pn.apply(&mut samples);
        }
        if let Some(dc) = &self.spec.dc_offset {
            samples.iter_mut().for_each(|a| dc.apply(a));
        }
        if let Some(iq) = &self.spec.iq_imbalance {
            samples.iter_mut().for_each(|a| iq.apply(a));
        }
        if let Some(agc) = &self.spec.agc {
            samples.iter_mut().for_each(|a| agc.apply(a));
        }

        let mut output = input.clone();
        let bandwidth = output.ensure_bandwidth(None);
        output.samples = samples;
        output.sample_rate = fs;
        output.carrier_frequency = input.carrier_frequency - self.spec.tuning_offset;
        output.bandwidth = Some(bandwidth.clamp_to(fs));
        output.set_metadata(
            "rf_rx",
            serde_json::json!({
                "config": serde_json::to_value(&self.spec).unwrap_or(serde_json::Value::Null),
                "thermal_noise_dbm": noise.map(complex_ops::watts_to_dbm),
                "input_sample_rate": input.sample_rate,
            }),
        );
        Ok(output)
    }

    pub fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.spec.seed);
        if let Some(pn) = self.phase_noise.as_mut() {
            pn.reset();
        }
    }

    pub fn release(self) -> RxFrontEndSpec {
        self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(n: usize, fs: f64) -> Signal {
        Signal::single(vec![IQSample::new(0.0, 0.0); n], fs)
    }

    #[test]
    fn test_thermal_noise_floor() {
        let fs = 10e6;
        let mut rx = RxFrontEndSpec::ideal(fs).with_noise_figure(6.0).setup().unwrap();
        let out = rx.process(&silence(200_000, fs)).unwrap();
        let expected = BOLTZMANN * T0_KELVIN * fs * complex_ops::db_to_linear(6.0);
        let measured = out.mean_power();
        let err_db = 10.0 * (measured / expected).log10();
        assert!(err_db.abs() < 0.1, "noise error {} dB", err_db);
        assert!(out.metadata["rf_rx"]["thermal_noise_dbm"].is_number());
    }

    #[test]
    fn test_resample_and_tune() {
        let fs_in = 2e6;
        let tone: Vec<IQSample> = (0..2000)
            .map(|i| IQSample::from_polar(1.0, 2.0 * std::f64::consts::PI * 300e3 * i as f64 / fs_in))
            .collect();
        let input = Signal::single(tone, fs_in).with_carrier(300e3);
        let mut spec = RxFrontEndSpec::ideal(1e6);
        spec.tuning_offset = 300e3;
        let out = rx_process(spec, &input);
        assert_eq!(out.sample_rate, 1e6);
        assert_eq!(out.len(), 1000);
        assert!(out.carrier_frequency.abs() < 1e-9);
        // Tuned to DC: the steady-state samples barely rotate
        let mid = &out.samples[0][400..600];
        let drift = (mid[199] * mid[0].conj()).arg().abs();
        assert!(drift < 0.05, "residual rotation {}", drift);
    }

    fn rx_process(spec: RxFrontEndSpec, input: &Signal) -> Signal {
        spec.setup().unwrap().process(input).unwrap()
    }

    #[test]
    fn test_agc_sets_rms() {
        let mut spec = RxFrontEndSpec::ideal(1e6);
        spec.agc = Some(Agc { target_rms: 0.5 });
        let input = Signal::single(vec![IQSample::new(3.0, -1.0); 500], 1e6);
        let out = rx_process(spec, &input);
        assert!((complex_ops::rms(&out.samples[0]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reset_repeats_noise() {
        let mut rx = RxFrontEndSpec::ideal(1e6)
            .with_noise_figure(3.0)
            .with_seed(9)
            .setup()
            .unwrap();
        let a = rx.process(&silence(256, 1e6)).unwrap();
        let b = rx.process(&silence(256, 1e6)).unwrap();
        assert_ne!(a.samples, b.samples);
        rx.reset();
        let c = rx.process(&silence(256, 1e6)).unwrap();
        assert_eq!(a.samples, c.samples);
    }

    #[test]
    fn test_negative_noise_figure_rejected() {
        assert!(RxFrontEndSpec::ideal(1e6).with_noise_figure(-1.0).setup().is_err());
    }
}
