//! Analog modulators: DSB-AM, DSB-SC-AM, SSB-AM, FM, PM
//!
//! The message is a real audio waveform sampled at the symbol rate. It is
//! interpolated to the output rate with a raised-cosine filter, rescaled to
//! unit peak, then modulated onto a complex baseband carrier:
//!
//! | mode   | baseband s[n]                        |
//! |--------|--------------------------------------|
//! | AM     | 1 + μ m[n]                           |
//! | DSB-SC | m[n]                                 |
//! | SSB    | m[n] ± j H{m}[n]                     |
//! | FM     | exp(j 2π Δf/fs Σ m[k])               |
//! | PM     | exp(j k_p m[n])                      |
//!
//! Outputs are normalised to unit average power. Analog schemes are single
//! antenna and ignore the modulation order.

use super::params::{pick, resolve, ParamSpec};
use super::{
    config_mismatch, Modulated, ModulationKind, Modulator, ModulatorConfig, ModulatorOverrides,
    ModulatorParams,
};
use crate::error::{CsrdError, CsrdResult};
use crate::filters::{PulseShapingFilter, RaisedCosineFilter};
use crate::message::{Message, MessagePayload};
use crate::signal::Bandwidth;
use crate::spectrum::{occupied_bandwidth, FftProcessor};
use crate::types::{complex_ops, IQSample};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Interpolation filter roll-off and span
const INTERP_ROLLOFF: f64 = 0.5;
const INTERP_SPAN: usize = 8;

/// Retained sideband for SSB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sideband {
    Upper,
    Lower,
}

/// Resolved analog configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AnalogConfig {
    /// Full-carrier AM with modulation index μ
    Am { modulation_index: f64 },
    DsbSc {},
    Ssb { sideband: Sideband },
    /// Peak deviation as a fraction of the message sample rate
    Fm { frequency_deviation: f64 },
    /// Peak phase deviation in radians
    Pm { phase_deviation: f64 },
}

impl AnalogConfig {
    fn kind(&self) -> ModulationKind {
        match self {
            AnalogConfig::Am { .. } => ModulationKind::DsbAm,
            AnalogConfig::DsbSc {} => ModulationKind::DsbScAm,
            AnalogConfig::Ssb { .. } => ModulationKind::SsbAm,
            AnalogConfig::Fm { .. } => ModulationKind::Fm,
            AnalogConfig::Pm { .. } => ModulationKind::Pm,
        }
    }
}

pub(crate) fn fill<R: Rng + ?Sized>(
    kind: ModulationKind,
    _params: &ModulatorParams,
    overrides: &ModulatorOverrides,
    rng: &mut R,
) -> CsrdResult<AnalogConfig> {
    Ok(match kind {
        ModulationKind::DsbAm => AnalogConfig::Am {
            modulation_index: resolve(
                "modulation_index",
                overrides.modulation_index.as_ref(),
                ParamSpec::range(0.3, 1.0),
                rng,
            )?,
        },
        ModulationKind::DsbScAm => AnalogConfig::DsbSc {},
        ModulationKind::SsbAm => AnalogConfig::Ssb {
            sideband: pick(
                "sideband",
                overrides.sideband.as_ref(),
                &[Sideband::Upper, Sideband::Lower],
                rng,
            )?,
        },
        ModulationKind::Fm => AnalogConfig::Fm {
            frequency_deviation: resolve(
                "frequency_deviation",
                overrides.frequency_deviation.as_ref(),
                ParamSpec::range(0.05, 0.2),
                rng,
            )?,
        },
        ModulationKind::Pm => AnalogConfig::Pm {
            phase_deviation: resolve(
                "phase_deviation",
                overrides.phase_deviation.as_ref(),
                ParamSpec::range(0.25, 1.5),
                rng,
            )?,
        },
        other => {
            return Err(CsrdError::unsupported("analog modulation", other.type_id()));
        }
    })
}

#[derive(Debug)]
pub struct AnalogModulator {
    kind: ModulationKind,
    params: ModulatorParams,
    config: AnalogConfig,
    interpolator: RaisedCosineFilter,
}

impl AnalogModulator {
    pub fn new(kind: ModulationKind, params: ModulatorParams, config: AnalogConfig) -> CsrdResult<Self> {
        params.validate(kind)?;
        if config.kind() != kind {
            return Err(CsrdError::InconsistentConfiguration(format!(
                "{} cannot use the {} analog configuration",
                kind,
                config.kind()
            )));
        }
        match config {
            AnalogConfig::Am { modulation_index } if !(0.0..=1.0).contains(&modulation_index) => {
                return Err(CsrdError::invalid_parameter(
                    "modulation_index",
                    "AM index must lie in [0, 1]",
                ))
            }
            AnalogConfig::Fm { frequency_deviation } if frequency_deviation <= 0.0 => {
                return Err(CsrdError::invalid_parameter(
                    "frequency_deviation",
                    "must be positive",
                ))
            }
            _ => {}
        }

        Ok(Self {
            kind,
            interpolator: RaisedCosineFilter::new(
                INTERP_ROLLOFF,
                INTERP_SPAN,
                params.samples_per_symbol,
            ),
            params,
            config,
        })
    }

    pub fn create(
        kind: ModulationKind,
        params: &ModulatorParams,
        config: &ModulatorConfig,
    ) -> CsrdResult<Box<dyn Modulator>> {
        match config {
            ModulatorConfig::Analog(c) => Ok(Box::new(Self::new(kind, *params, c.clone())?)),
            other => Err(config_mismatch(kind, other)),
        }
    }

    /// Audio at the output rate, peak-normalised to 1
    fn interpolate(&self, audio: &[f64]) -> Vec<f64> {
        let sps = self.params.samples_per_symbol;
        let complex: Vec<IQSample> = audio.iter().map(|&a| IQSample::new(a, 0.0)).collect();
        let mut m: Vec<f64> = if sps > 1 {
            self.interpolator.shape(&complex, sps).iter().map(|s| s.re).collect()
        } else {
            audio.to_vec()
        };
        let peak = m.iter().fold(0.0f64, |p, v| p.max(v.abs()));
        if peak > 0.0 {
            m.iter_mut().for_each(|v| *v /= peak);
        }
        m
    }
}

/// Analytic-style single sideband via an FFT Hilbert transform
pub fn single_sideband(message: &[f64], sideband: Sideband) -> Vec<IQSample> {
    let n = message.len();
    if n == 0 {
        return Vec::new();
    }
    let fft = FftProcessor::new(n);
    let mut spectrum: Vec<IQSample> = message.iter().map(|&m| IQSample::new(m, 0.0)).collect();
    fft.fft_inplace(&mut spectrum);

    // Bins 1..n/2 are positive frequencies; the Nyquist bin (even n) is kept
    let half = n / 2;
    for (k, bin) in spectrum.iter_mut().enumerate() {
        let positive = k >= 1 && (k < half || (n % 2 == 1 && k == half));
        let negative = k > half;
        let keep_double = match sideband {
            Sideband::Upper => positive,
            Sideband::Lower => negative,
        };
        let zero = match sideband {
            Sideband::Upper => negative,
            Sideband::Lower => positive,
        };
        if keep_double {
            *bin *= 2.0;
        } else if zero {
            *bin = IQSample::new(0.0, 0.0);
        }
    }
    fft.ifft_inplace(&mut spectrum);
    spectrum
}

impl Modulator for AnalogModulator {
    fn kind(&self) -> ModulationKind {
        self.kind
    }

    fn params(&self) -> &ModulatorParams {
        &self.params
    }

    fn config(&self) -> ModulatorConfig {
        ModulatorConfig::Analog(self.config.clone())
    }

    fn modulate(&self, message: &Message) -> CsrdResult<Modulated> {
        let audio = match &message.payload {
            MessagePayload::Audio(samples) => samples,
            other => {
                return Err(CsrdError::PayloadMismatch(format!(
                    "{} expects an audio message, got {}",
                    self.kind,
                    other.kind()
                )))
            }
        };
        if audio.is_empty() {
            return Err(CsrdError::EmptyInput(format!("{} message is empty", self.kind)));
        }

        let m = self.interpolate(audio);
        let fs = self.params.sample_rate;
        let mut samples: Vec<IQSample> = match self.config {
            AnalogConfig::Am { modulation_index } => m
                .iter()
                .map(|&v| IQSample::new(1.0 + modulation_index * v, 0.0))
                .collect(),
            AnalogConfig::DsbSc {} => m.iter().map(|&v| IQSample::new(v, 0.0)).collect(),
            AnalogConfig::Ssb { sideband } => single_sideband(&m, sideband),
            AnalogConfig::Fm { frequency_deviation } => {
                let deviation_hz = frequency_deviation * self.params.symbol_rate();
                let step = 2.0 * PI * deviation_hz / fs;
                let mut phase = 0.0f64;
                m.iter()
                    .map(|&v| {
                        phase = (phase + step * v) % (2.0 * PI);
                        IQSample::from_polar(1.0, phase)
                    })
                    .collect()
            }
            AnalogConfig::Pm { phase_deviation } => m
                .iter()
                .map(|&v| IQSample::from_polar(1.0, phase_deviation * v))
                .collect(),
        };

        let power = complex_ops::mean_power(&samples);
        if power > 0.0 {
            complex_ops::scale(&mut samples, 1.0 / power.sqrt());
        }

        Ok(Modulated {
            bandwidth: Bandwidth::Scalar(occupied_bandwidth(&samples, fs)),
            samples: vec![samples],
            symbol_rate: self.params.symbol_rate(),
            symbols_used: audio.len(),
        })
    }

    /// One audio sample per symbol period
    fn message_length_for(&self, num_symbols: usize) -> usize {
        num_symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AudioSource, MessageSource};
    use crate::spectrum::occupied_band;

    fn modulate(kind: ModulationKind, config: AnalogConfig) -> Modulated {
        let fs = 1e6;
        let m = AnalogModulator::new(kind, ModulatorParams::new(0, 8, fs), config).unwrap();
        let msg = AudioSource::new(3).generate(4096, fs / 8.0).unwrap();
        m.modulate(&msg).unwrap()
    }

    #[test]
    fn test_output_length_and_power() {
        let out = modulate(ModulationKind::DsbAm, AnalogConfig::Am { modulation_index: 0.8 });
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.samples[0].len(), 4096 * 8);
        let p = complex_ops::mean_power(&out.samples[0]);
        assert!((p - 1.0).abs() < 1e-9);
        assert_eq!(out.symbols_used, 4096);
    }

    #[test]
    fn test_am_envelope_never_negative() {
        let out = modulate(ModulationKind::DsbAm, AnalogConfig::Am { modulation_index: 1.0 });
        assert!(out.samples[0].iter().all(|s| s.re >= -1e-9 && s.im.abs() < 1e-12));
    }

    #[test]
    fn test_fm_and_pm_constant_envelope() {
        for (kind, config) in [
            (ModulationKind::Fm, AnalogConfig::Fm { frequency_deviation: 0.1 }),
            (ModulationKind::Pm, AnalogConfig::Pm { phase_deviation: 1.0 }),
        ] {
            let out = modulate(kind, config);
            let first = out.samples[0][0].norm();
            assert!(out.samples[0].iter().all(|s| (s.norm() - first).abs() < 1e-9));
        }
    }

    #[test]
    fn test_ssb_occupies_one_side() {
        let fs = 1e6;
        let upper = modulate(ModulationKind::SsbAm, AnalogConfig::Ssb { sideband: Sideband::Upper });
        let (lo, hi) = occupied_band(&upper.samples[0], fs).unwrap();
        assert!(hi > 0.0 && lo > -0.01 * fs, "upper band {}..{}", lo, hi);

        let lower = modulate(ModulationKind::SsbAm, AnalogConfig::Ssb { sideband: Sideband::Lower });
        let (lo, hi) = occupied_band(&lower.samples[0], fs).unwrap();
        assert!(lo < 0.0 && hi < 0.01 * fs, "lower band {}..{}", lo, hi);
    }

    #[test]
    fn test_config_kind_mismatch() {
        let err = AnalogModulator::new(
            ModulationKind::Fm,
            ModulatorParams::new(0, 4, 1e6),
            AnalogConfig::DsbSc {},
        )
        .unwrap_err();
        assert!(matches!(err, CsrdError::InconsistentConfiguration(_)));
    }

    #[test]
    fn test_bits_rejected() {
        let m = AnalogModulator::new(
            ModulationKind::DsbScAm,
            ModulatorParams::new(0, 4, 1e6),
            AnalogConfig::DsbSc {},
        )
        .unwrap();
        assert!(matches!(
            m.modulate(&Message::bits(vec![1, 0, 1], 1e5)),
            Err(CsrdError::PayloadMismatch(_))
        ));
    }

    #[test]
    fn test_config_serde_shape() {
        let c = ModulatorConfig::Analog(AnalogConfig::Fm { frequency_deviation: 0.1 });
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["family"], "analog");
        assert_eq!(json["mode"], "fm");
        let back: ModulatorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }
}
