//! Transmit RF front end
//!
//! ```text
//!   TxFrontEndSpec ──setup()──► TxFrontEnd ──release()──► TxFrontEndSpec
//!                                   │
//!             Signal ─► IQ imbalance ─► DC offset ─► phase noise ─► amplifier
//!                         ─► frequency translation ─► resample ─► power ─► Signal
//! ```
//!
//! `TxFrontEndSpec` is plain data and can be edited freely; a configured front end
//! owns its generators and can only be reset or released. Translation runs at
//! the higher of the input and output rates: when the output rate is higher
//! the resampler runs first so that an offset beyond the modulator's own
//! Nyquist band is not aliased.

use super::impairments::{DcOffset, IqImbalance};
use super::nonlinearity::Amplifier;
use super::phase_noise::{PhaseNoise, PhaseNoiseConfig};
use super::power::normalize_power;
use super::resample::{needs_resampling, Resampler};
use super::translate::FrequencyTranslator;
use crate::error::{CsrdError, CsrdResult};
use crate::signal::Signal;
use crate::types::AntennaSamples;
use serde::{Deserialize, Serialize};

/// Unconfigured transmit front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxFrontEndSpec {
    /// Output sample rate (Hz)
    pub sample_rate: f64,
    /// Carrier offset applied by translation (Hz)
    pub frequency_offset: f64,
    /// Total output power across antennas (dBm)
    pub target_power_dbm: f64,
    #[serde(default)]
    pub iq_imbalance: Option<IqImbalance>,
    #[serde(default)]
    pub dc_offset: Option<DcOffset>,
    #[serde(default)]
    pub phase_noise: Option<PhaseNoiseConfig>,
    #[serde(default)]
    pub amplifier: Option<Amplifier>,
    /// Seed for stochastic stages without their own
    #[serde(default)]
    pub seed: u64,
}

impl TxFrontEndSpec {
    /// An ideal front end: only translation, resampling and power
    pub fn ideal(sample_rate: f64, frequency_offset: f64, target_power_dbm: f64) -> Self {
        Self {
            sample_rate,
            frequency_offset,
            target_power_dbm,
            iq_imbalance: None,
            dc_offset: None,
            phase_noise: None,
            amplifier: None,
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate and build every stage. Errors here are configuration errors.
    pub fn setup(self) -> CsrdResult<TxFrontEnd> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(CsrdError::invalid_field(
                "transmit.sample_rate",
                format!("must be positive, got {}", self.sample_rate),
            ));
        }
        if !self.frequency_offset.is_finite() || !self.target_power_dbm.is_finite() {
            return Err(CsrdError::invalid_field(
                "transmit.frequency_offset",
                "offset and target power must be finite",
            ));
        }
        if let Some(amp) = &self.amplifier {
            amp.validate()?;
        }
        let phase_noise = match &self.phase_noise {
            Some(cfg) => Some(PhaseNoise::new(
                cfg.mask.clone(),
                self.sample_rate,
                cfg.seed.unwrap_or(self.seed),
            )?),
            None => None,
        };
        tracing::debug!(
            sample_rate = self.sample_rate,
            offset = self.frequency_offset,
            power_dbm = self.target_power_dbm,
            "transmit front end configured"
        );
        Ok(TxFrontEnd {
            spec: self,
            phase_noise,
            resampler: None,
        })
    }
}

/// Configured transmit front end
#[derive(Debug, Clone)]
pub struct TxFrontEnd {
    spec: TxFrontEndSpec,
    phase_noise: Option<PhaseNoise>,
    resampler: Option<(f64, Resampler)>,
}

impl TxFrontEnd {
    pub fn spec(&self) -> &TxFrontEndSpec {
        &self.spec
    }

    /// Resample to the output rate, reusing the previous design when the
    /// input rate has not changed
    fn resample(&mut self, samples: AntennaSamples, input_rate: f64) -> CsrdResult<AntennaSamples> {
        if !needs_resampling(input_rate, self.spec.sample_rate) {
            return Ok(samples);
        }
        let cached = matches!(&self.resampler, Some((rate, _)) if *rate == input_rate);
        if !cached {
            self.resampler = Some((input_rate, Resampler::new(input_rate, self.spec.sample_rate)?));
        }
        Ok(match &self.resampler {
            Some((_, r)) => r.process_antennas(&samples),
            None => samples,
        })
    }

    /// Run the impairment chain over one signal
    pub fn process(&mut self, input: &Signal) -> CsrdResult<Signal> {
        input.validate()?;
        let in_rate = input.sample_rate;
        let out_rate = self.spec.sample_rate;
        let mut samples = input.samples.clone();

        if let Some(iq) = &self.spec.iq_imbalance {
            samples.iter_mut().for_each(|a| iq.apply(a));
        }
        if let Some(dc) = &self.spec.dc_offset {
            samples.iter_mut().for_each(|a| dc.apply(a));
        }
        if let Some(pn) = self.phase_noise.as_mut() {
            pn.set_sample_rate(in_rate);
            pn.apply(&mut samples);
        }
        if let Some(amp) = &self.spec.amplifier {
            samples.iter_mut().for_each(|a| amp.apply(a));
        }

        let upsampling = out_rate > in_rate && needs_resampling(in_rate, out_rate);
        if upsampling {
            samples = self.resample(samples, in_rate)?;
            FrequencyTranslator::new(self.spec.frequency_offset, out_rate).process_antennas(&mut samples);
        } else {
            FrequencyTranslator::new(self.spec.frequency_offset, in_rate).process_antennas(&mut samples);
            samples = self.resample(samples, in_rate)?;
        }

        let report = normalize_power(&mut samples, self.spec.target_power_dbm, out_rate);

        let mut output = input.clone();
        let bandwidth = output.ensure_bandwidth(None);
        let (lo, hi) = bandwidth.edges();
        let half = out_rate / 2.0;
        if self.spec.frequency_offset + hi > half || self.spec.frequency_offset + lo < -half {
            tracing::warn!(
                offset = self.spec.frequency_offset,
                bandwidth = bandwidth.width(),
                sample_rate = out_rate,
                "translated signal extends beyond the output Nyquist band"
            );
        }

        output.samples = samples;
        output.sample_rate = out_rate;
        output.carrier_frequency = input.carrier_frequency + self.spec.frequency_offset;
        output.bandwidth = Some(bandwidth.clamp_to(out_rate));
        output.set_metadata(
            "rf_tx",
            serde_json::json!({
                "config": serde_json::to_value(&self.spec).unwrap_or(serde_json::Value::Null),
                "power": serde_json::to_value(report).unwrap_or(serde_json::Value::Null),
                "input_sample_rate": in_rate,
            }),
        );
        Ok(output)
    }

    /// Restart stochastic stages from their seeds
    pub fn reset(&mut self) {
        if let Some(pn) = self.phase_noise.as_mut() {
            pn.reset();
        }
    }

    /// Drop configured state and hand back the editable spec
    pub fn release(self) -> TxFrontEndSpec {
        self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rf::nonlinearity::{Nonlinearity, NonlinearityMethod};
    use crate::rf::phase_noise::PhaseNoiseMask;
    use crate::signal::Bandwidth;
    use crate::spectrum::{occupied_band, peak_bin, FftProcessor};
    use crate::types::{complex_ops, IQSample};

    fn baseband(n: usize, fs: f64) -> Signal {
        let samples: Vec<IQSample> = (0..n)
            .map(|i| IQSample::from_polar(1.0, 2.0 * std::f64::consts::PI * 10e3 * i as f64 / fs))
            .collect();
        Signal::single(samples, fs).with_bandwidth(Bandwidth::Scalar(20e3))
    }

    fn impaired(fs_out: f64) -> TxFrontEndSpec {
        TxFrontEndSpec {
            iq_imbalance: Some(IqImbalance::new(0.5, 2.0)),
            dc_offset: Some(DcOffset::new(-30.0, 0.0)),
            phase_noise: Some(PhaseNoiseConfig {
                mask: PhaseNoiseMask::new(vec![1e3, 1e5], vec![-90.0, -120.0]),
                seed: Some(3),
            }),
            amplifier: Some(Amplifier::new(
                Nonlinearity::default_for(NonlinearityMethod::Saleh),
                6.0,
            )),
            ..TxFrontEndSpec::ideal(fs_out, 200e3, 0.0)
        }
    }

    #[test]
    fn test_power_rate_and_carrier() {
        let mut tx = impaired(1e6).setup().unwrap();
        let out = tx.process(&baseband(4000, 1e6)).unwrap();
        assert_eq!(out.sample_rate, 1e6);
        assert_eq!(out.len(), 4000);
        assert!((out.carrier_frequency - 200e3).abs() < 1e-9);
        let p = complex_ops::watts_to_dbm(out.mean_power());
        assert!(p.abs() < 1e-6, "power {} dBm", p);
        assert!(out.metadata.contains_key("rf_tx"));
    }

    #[test]
    fn test_upsampled_offset_beyond_input_nyquist() {
        // 250 kHz input cannot hold a 2 MHz offset; translation runs at 8 MHz
        let mut tx = TxFrontEndSpec::ideal(8e6, 2e6, -10.0).setup().unwrap();
        let out = tx.process(&baseband(1000, 250e3)).unwrap();
        assert_eq!(out.len(), 32000);
        let n = 32768;
        let spectrum = FftProcessor::new(n).fft(&out.samples[0]);
        let peak_hz = peak_bin(&spectrum) as f64 * 8e6 / n as f64;
        assert!((peak_hz - 2.01e6).abs() < 2.0 * 8e6 / n as f64, "peak {}", peak_hz);
        let (lo, hi) = occupied_band(&out.samples[0], 8e6).unwrap();
        assert!(lo > 1.8e6 && hi < 2.2e6, "band {}..{}", lo, hi);
    }

    #[test]
    fn test_missing_sample_rate_is_named() {
        let mut tx = TxFrontEndSpec::ideal(1e6, 0.0, 0.0).setup().unwrap();
        let mut bad = baseband(100, 1e6);
        bad.sample_rate = 0.0;
        match tx.process(&bad) {
            Err(CsrdError::InvalidField { field, .. }) => assert_eq!(field, "sample_rate"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_amplifier_fails_at_setup() {
        let mut spec = TxFrontEndSpec::ideal(1e6, 0.0, 0.0);
        spec.amplifier = Some(Amplifier::new(
            Nonlinearity::Tanh {
                linear_gain_db: 0.0,
                saturation: -1.0,
            },
            0.0,
        ));
        assert!(spec.setup().is_err());
    }

    #[test]
    fn test_reset_reproduces_output_and_release_round_trips() {
        let spec = impaired(1e6);
        let mut tx = spec.clone().setup().unwrap();
        let input = baseband(2000, 1e6);
        let a = tx.process(&input).unwrap();
        tx.reset();
        let b = tx.process(&input).unwrap();
        assert_eq!(a.samples, b.samples);
        assert_eq!(tx.release(), spec);
    }
}
