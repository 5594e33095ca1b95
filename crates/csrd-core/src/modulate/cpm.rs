//! Continuous Phase Modulation: MSK, GMSK, GFSK, CPFSK
//!
//! CPM produces a constant-envelope signal whose phase is the running
//! integral of a shaped frequency pulse:
//!
//! ```text
//!   φ(t) = 2π h Σ a_k q(t - kT),   q(t) = ∫ g(τ) dτ,   q(LT) = 1/2
//! ```
//!
//! Symbols `a_k` come from the symmetric alphabet
//! `{-(M-1), ..., -1, +1, ..., M-1}`.
//!
//! | scheme | h        | pulse g(t)            | L      |
//! |--------|----------|-----------------------|--------|
//! | MSK    | 0.5      | rectangular           | 1      |
//! | GMSK   | 0.5      | Gaussian, BT 0.2..0.5 | 2..4   |
//! | GFSK   | 1.0      | Gaussian, BT 0.2..0.5 | 2..4   |
//! | CPFSK  | 0.5..1.0 | rectangular           | 1      |
//!
//! ## MSK precoding
//!
//! Non-differential MSK is the OQPSK-equivalent form and consumes bits in
//! I/Q pairs, so an odd-length bit vector is padded with one trailing zero.
//! Differential MSK maps each bit directly onto a frequency symbol and
//! accepts any length.

use super::constellation::{bits_per_symbol, bits_to_symbols, gray_to_binary};
use super::params::{resolve, ParamSpec};
use super::{
    config_mismatch, expect_bits, Modulated, ModulationKind, Modulator, ModulatorConfig,
    ModulatorOverrides, ModulatorParams,
};
use crate::error::{CsrdError, CsrdResult};
use crate::message::Message;
use crate::signal::Bandwidth;
use crate::spectrum::occupied_bandwidth;
use crate::types::IQSample;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Frequency pulse shape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CpmPulse {
    /// Rectangular (L-REC)
    Rectangular,
    /// Gaussian with bandwidth-time product `bt`
    Gaussian { bt: f64 },
}

/// Resolved CPM configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpmConfig {
    pub pulse: CpmPulse,
    pub modulation_index: f64,
    /// Pulse length L in symbols
    pub pulse_length: usize,
    /// MSK only: map bits directly (true) or through the OQPSK precoder
    pub differential: bool,
    pub initial_phase: f64,
}

pub(crate) fn fill<R: Rng + ?Sized>(
    kind: ModulationKind,
    _params: &ModulatorParams,
    overrides: &ModulatorOverrides,
    rng: &mut R,
) -> CsrdResult<CpmConfig> {
    let (index_default, gaussian) = match kind {
        ModulationKind::Msk => (ParamSpec::Fixed(0.5), false),
        ModulationKind::Gmsk => (ParamSpec::Fixed(0.5), true),
        ModulationKind::Gfsk => (ParamSpec::Fixed(1.0), true),
        _ => (ParamSpec::range(0.5, 1.0), false),
    };

    // MSK and GMSK are defined by h = 0.5; only CPFSK and GFSK accept overrides.
    // GMSK keeps the MSK deviation of +-symbol_rate/4; the Gaussian-shaped
    // unit-index variant is GFSK.
    let modulation_index = match kind {
        ModulationKind::Msk | ModulationKind::Gmsk => 0.5,
        _ => resolve(
            "modulation_index",
            overrides.modulation_index.as_ref(),
            index_default,
            rng,
        )?,
    };

    let (pulse, pulse_length) = if gaussian {
        let bt = resolve(
            "bandwidth_time",
            overrides.bandwidth_time.as_ref(),
            ParamSpec::range(0.2, 0.5),
            rng,
        )?;
        let l = resolve(
            "pulse_length",
            overrides.pulse_length.as_ref(),
            ParamSpec::choices(vec![2, 3, 4]),
            rng,
        )?;
        (CpmPulse::Gaussian { bt }, l)
    } else {
        (CpmPulse::Rectangular, 1)
    };

    let initial_phase = resolve(
        "initial_phase",
        overrides.initial_phase.as_ref(),
        ParamSpec::Fixed(0.0),
        rng,
    )?;

    Ok(CpmConfig {
        pulse,
        modulation_index,
        pulse_length,
        differential: overrides.differential.unwrap_or(false),
        initial_phase,
    })
}

/// The symmetric CPM alphabet `{-(M-1), -(M-3), ..., M-1}`
pub fn cpm_alphabet(order: usize) -> Vec<i32> {
    let m = order as i32;
    (0..m).map(|i| 2 * i - (m - 1)).collect()
}

/// Continuous-phase modulator
#[derive(Debug, Clone)]
pub struct CpmModulator {
    kind: ModulationKind,
    params: ModulatorParams,
    config: CpmConfig,
    /// Frequency pulse g(t), sampled, summing to 1/2
    freq_pulse: Vec<f64>,
}

impl CpmModulator {
    pub fn new(kind: ModulationKind, params: ModulatorParams, config: CpmConfig) -> CsrdResult<Self> {
        params.validate(kind)?;
        validate_order(kind, params.order)?;
        if !(config.modulation_index.is_finite() && config.modulation_index > 0.0) {
            return Err(CsrdError::invalid_parameter(
                "modulation_index",
                "must be positive",
            ));
        }
        if config.pulse_length == 0 {
            return Err(CsrdError::invalid_parameter("pulse_length", "must be at least 1"));
        }
        if let CpmPulse::Gaussian { bt } = config.pulse {
            if !(bt > 0.0 && bt.is_finite()) {
                return Err(CsrdError::invalid_parameter("bandwidth_time", "must be positive"));
            }
        }

        let freq_pulse = frequency_pulse(&config, params.samples_per_symbol);
        Ok(Self {
            kind,
            params,
            config,
            freq_pulse,
        })
    }

    pub fn create(
        kind: ModulationKind,
        params: &ModulatorParams,
        config: &ModulatorConfig,
    ) -> CsrdResult<Box<dyn Modulator>> {
        match config {
            ModulatorConfig::Cpm(c) => Ok(Box::new(Self::new(kind, *params, c.clone())?)),
            other => Err(config_mismatch(kind, other)),
        }
    }

    /// Map bits to CPM symbols, applying the MSK precoder/padding rules
    pub fn map_bits(&self, bits: &[u8]) -> Vec<i32> {
        let order = self.params.order;
        if self.kind == ModulationKind::Msk {
            return if self.config.differential {
                bits.iter().map(|&b| if b & 1 == 1 { 1 } else { -1 }).collect()
            } else {
                msk_precode(bits)
            };
        }

        let k = cpm_bits_per_symbol(order);
        let alphabet = cpm_alphabet(order);
        bits_to_symbols(bits, k)
            .into_iter()
            .map(|v| alphabet[gray_to_binary(v).min(order - 1)])
            .collect()
    }

    /// Synthesize constant-envelope samples for a symbol sequence
    pub fn synthesize(&self, symbols: &[i32]) -> Vec<IQSample> {
        let sps = self.params.samples_per_symbol;
        let l = self.config.pulse_length;
        let h = self.config.modulation_index;
        let pulse_len = self.freq_pulse.len();
        let mut history = vec![0i32; l];
        let mut phase = self.config.initial_phase;
        let mut output = Vec::with_capacity(symbols.len() * sps);

        for &sym in symbols {
            history.rotate_left(1);
            history[l - 1] = sym;

            for k in 0..sps {
                let mut inst_freq = 0.0;
                for (si, &s) in history.iter().enumerate() {
                    let offset = (l - 1 - si) * sps + k;
                    if offset < pulse_len {
                        inst_freq += s as f64 * self.freq_pulse[offset];
                    }
                }
                phase += 2.0 * PI * h * inst_freq;
                if phase > PI {
                    phase -= 2.0 * PI * ((phase + PI) / (2.0 * PI)).floor();
                } else if phase < -PI {
                    phase += 2.0 * PI * ((PI - phase) / (2.0 * PI)).floor();
                }
                output.push(IQSample::from_polar(1.0, phase));
            }
        }
        output
    }
}

/// Bits per CPM symbol; orders that are not a power of two use the largest
/// power of two below them.
fn cpm_bits_per_symbol(order: usize) -> usize {
    if order.is_power_of_two() {
        bits_per_symbol(order).max(1)
    } else {
        (bits_per_symbol(order.next_power_of_two()) - 1).max(1)
    }
}

fn validate_order(kind: ModulationKind, order: usize) -> CsrdResult<()> {
    match kind {
        ModulationKind::Msk | ModulationKind::Gmsk if order != 2 => Err(CsrdError::invalid_order(
            kind.type_id(),
            order,
            "binary scheme requires order 2",
        )),
        ModulationKind::Gfsk if order < 2 || !order.is_power_of_two() => Err(
            CsrdError::invalid_order(kind.type_id(), order, "must be a power of two >= 2"),
        ),
        ModulationKind::Cpfsk if order < 2 => Err(CsrdError::invalid_order(
            kind.type_id(),
            order,
            "must be at least 2",
        )),
        _ => Ok(()),
    }
}

/// OQPSK-equivalent MSK precoder: α_n = (-1)^n · d_n · d_{n-1}, with a
/// trailing zero appended to odd-length input.
fn msk_precode(bits: &[u8]) -> Vec<i32> {
    let mut padded: Vec<u8> = bits.to_vec();
    if padded.len() % 2 == 1 {
        padded.push(0);
    }
    let mut prev = 1i32;
    padded
        .iter()
        .enumerate()
        .map(|(n, &b)| {
            let d = if b & 1 == 1 { 1 } else { -1 };
            let sign = if n % 2 == 0 { 1 } else { -1 };
            let alpha = sign * d * prev;
            prev = d;
            alpha
        })
        .collect()
}

/// Sampled frequency pulse g(t) over L symbols, normalised to area 1/2
fn frequency_pulse(config: &CpmConfig, sps: usize) -> Vec<f64> {
    let len = config.pulse_length * sps;
    let sps_f = sps as f64;
    let l = config.pulse_length as f64;

    let mut pulse: Vec<f64> = match config.pulse {
        CpmPulse::Rectangular => vec![1.0; len],
        CpmPulse::Gaussian { bt } => {
            let sigma = (2.0_f64.ln()).sqrt() / (2.0 * PI * bt);
            (0..len)
                .map(|i| {
                    // Gaussian-filtered rectangle: difference of Q functions
                    let t = (i as f64 + 0.5) / sps_f - l / 2.0;
                    let a = (t + 0.5) / (sigma * 2f64.sqrt());
                    let b = (t - 0.5) / (sigma * 2f64.sqrt());
                    0.5 * (erf(a) - erf(b))
                })
                .collect()
        }
    };

    let sum: f64 = pulse.iter().sum();
    if sum > 1e-12 {
        let scale = 0.5 / sum;
        pulse.iter_mut().for_each(|p| *p *= scale);
    }
    pulse
}

/// Error function (Abramowitz-Stegun 7.1.26, |ε| < 1.5e-7)
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

impl Modulator for CpmModulator {
    fn kind(&self) -> ModulationKind {
        self.kind
    }

    fn params(&self) -> &ModulatorParams {
        &self.params
    }

    fn config(&self) -> ModulatorConfig {
        ModulatorConfig::Cpm(self.config.clone())
    }

    fn modulate(&self, message: &Message) -> CsrdResult<Modulated> {
        let bits = expect_bits(message)?;
        let symbols = self.map_bits(bits);
        if symbols.is_empty() {
            return Err(CsrdError::EmptyInput(format!(
                "{} bits are not enough for one {} symbol",
                bits.len(),
                self.kind
            )));
        }

        let samples = self.synthesize(&symbols);
        let bandwidth = occupied_bandwidth(&samples, self.params.sample_rate);
        Ok(Modulated {
            samples: vec![samples],
            bandwidth: Bandwidth::Scalar(bandwidth),
            symbol_rate: self.params.symbol_rate(),
            symbols_used: symbols.len(),
        })
    }

    fn message_length_for(&self, num_symbols: usize) -> usize {
        num_symbols * cpm_bits_per_symbol(self.params.order)
    }
}
