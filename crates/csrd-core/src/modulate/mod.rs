//! Modulator framework
//!
//! Every modulation scheme implements the [`Modulator`] trait. A modulator
//! goes through exactly one configuration step and is then immutable:
//!
//! ```text
//!   ModulatorOverrides ──┐
//!   ModulatorParams ─────┼─► fill_defaults(rng) ─► ModulatorConfig ─► create() ─► Box<dyn Modulator>
//!   ModulationKind ──────┘                                                           │
//!                                                         Message ─► modulate() ─► Modulated
//! ```
//!
//! `fill_defaults` is the only place randomness enters: it draws every
//! unspecified field from its documented default range using the caller's
//! RNG. `modulate` is a pure function of the resolved configuration and the
//! message, so repeated calls never re-randomise anything.
//!
//! ## Families
//!
//! | family            | TypeIDs                               | output bandwidth       |
//! |-------------------|---------------------------------------|------------------------|
//! | linear            | PSK PAM ASK QAM APSK OOK              | occupied (scalar)      |
//! | continuous phase  | MSK GMSK GFSK CPFSK                   | occupied (scalar)      |
//! | multicarrier      | OFDM SCFDMA OTFS                      | edge offsets / scalar  |
//! | analog            | DSBAM DSBSCAM SSBAM FM PM             | occupied (scalar)      |

pub mod analog;
pub mod constellation;
pub mod cpm;
pub mod linear;
pub mod ofdm;
pub mod otfs;
pub mod params;
pub mod registry;
pub mod scfdma;

pub use analog::{AnalogConfig, AnalogModulator, Sideband};
pub use cpm::{CpmConfig, CpmModulator, CpmPulse};
pub use linear::{LinearConfig, LinearModulator};
pub use ofdm::{OfdmConfig, OfdmModulator};
pub use otfs::{OtfsConfig, OtfsModulator, OtfsPadding};
pub use params::{ParamSpec, RangeValue};
pub use registry::ModulatorRegistry;
pub use scfdma::{ScFdmaConfig, ScFdmaModulator};

use crate::error::{CsrdError, CsrdResult};
use crate::filters::PulseShape;
use crate::message::{Message, MessagePayload};
use crate::ostbc::{OstbcEncoder, OstbcRate};
use crate::signal::{Bandwidth, Signal};
use crate::types::{AntennaSamples, IQSample};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every modulation TypeID the generator can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModulationKind {
    Psk,
    Pam,
    Ask,
    Qam,
    Apsk,
    Ook,
    Msk,
    /// Gaussian MSK. Annotated with `modulation_index` 0.5, the MSK index;
    /// the unit-index Gaussian variant is `Gfsk`.
    Gmsk,
    Gfsk,
    Cpfsk,
    Ofdm,
    ScFdma,
    Otfs,
    DsbAm,
    DsbScAm,
    SsbAm,
    Fm,
    Pm,
}

/// Modulator family, which decides the configuration variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationFamily {
    Linear,
    ContinuousPhase,
    Ofdm,
    ScFdma,
    Otfs,
    Analog,
}

impl ModulationKind {
    pub const ALL: [ModulationKind; 18] = [
        ModulationKind::Psk,
        ModulationKind::Pam,
        ModulationKind::Ask,
        ModulationKind::Qam,
        ModulationKind::Apsk,
        ModulationKind::Ook,
        ModulationKind::Msk,
        ModulationKind::Gmsk,
        ModulationKind::Gfsk,
        ModulationKind::Cpfsk,
        ModulationKind::Ofdm,
        ModulationKind::ScFdma,
        ModulationKind::Otfs,
        ModulationKind::DsbAm,
        ModulationKind::DsbScAm,
        ModulationKind::SsbAm,
        ModulationKind::Fm,
        ModulationKind::Pm,
    ];

    /// Canonical TypeID used in configuration and annotations
    pub fn type_id(&self) -> &'static str {
        match self {
            ModulationKind::Psk => "PSK",
            ModulationKind::Pam => "PAM",
            ModulationKind::Ask => "ASK",
            ModulationKind::Qam => "QAM",
            ModulationKind::Apsk => "APSK",
            ModulationKind::Ook => "OOK",
            ModulationKind::Msk => "MSK",
            ModulationKind::Gmsk => "GMSK",
            ModulationKind::Gfsk => "GFSK",
            ModulationKind::Cpfsk => "CPFSK",
            ModulationKind::Ofdm => "OFDM",
            ModulationKind::ScFdma => "SCFDMA",
            ModulationKind::Otfs => "OTFS",
            ModulationKind::DsbAm => "DSBAM",
            ModulationKind::DsbScAm => "DSBSCAM",
            ModulationKind::SsbAm => "SSBAM",
            ModulationKind::Fm => "FM",
            ModulationKind::Pm => "PM",
        }
    }

    /// Parse a TypeID, ignoring case, dashes and underscores
    pub fn parse(name: &str) -> Option<Self> {
        let key = name.to_uppercase().replace(['-', '_', ' '], "");
        Self::ALL.iter().copied().find(|k| k.type_id() == key)
    }

    pub fn family(&self) -> ModulationFamily {
        match self {
            ModulationKind::Psk
            | ModulationKind::Pam
            | ModulationKind::Ask
            | ModulationKind::Qam
            | ModulationKind::Apsk
            | ModulationKind::Ook => ModulationFamily::Linear,
            ModulationKind::Msk
            | ModulationKind::Gmsk
            | ModulationKind::Gfsk
            | ModulationKind::Cpfsk => ModulationFamily::ContinuousPhase,
            ModulationKind::Ofdm => ModulationFamily::Ofdm,
            ModulationKind::ScFdma => ModulationFamily::ScFdma,
            ModulationKind::Otfs => ModulationFamily::Otfs,
            ModulationKind::DsbAm
            | ModulationKind::DsbScAm
            | ModulationKind::SsbAm
            | ModulationKind::Fm
            | ModulationKind::Pm => ModulationFamily::Analog,
        }
    }

    /// Whether the scheme consumes a bit payload
    pub fn is_digital(&self) -> bool {
        self.family() != ModulationFamily::Analog
    }

    /// Constant-envelope and analog schemes are single-antenna only
    pub fn max_antennas(&self) -> usize {
        match self.family() {
            ModulationFamily::ContinuousPhase | ModulationFamily::Analog => 1,
            _ => 4,
        }
    }
}

impl fmt::Display for ModulationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_id())
    }
}

/// Parameters fixed by the scenario for a modulator instance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModulatorParams {
    /// Modulation order M (ignored by analog schemes)
    pub order: usize,
    /// Oversampling factor
    pub samples_per_symbol: usize,
    /// Output sample rate (Hz)
    pub sample_rate: f64,
    /// Transmit antenna count
    pub num_tx_antennas: usize,
}

impl ModulatorParams {
    pub fn new(order: usize, samples_per_symbol: usize, sample_rate: f64) -> Self {
        Self {
            order,
            samples_per_symbol,
            sample_rate,
            num_tx_antennas: 1,
        }
    }

    pub fn with_antennas(mut self, num_tx_antennas: usize) -> Self {
        self.num_tx_antennas = num_tx_antennas;
        self
    }

    /// Channel symbol rate `sample_rate / samples_per_symbol`
    pub fn symbol_rate(&self) -> f64 {
        self.sample_rate / self.samples_per_symbol.max(1) as f64
    }

    /// Checks shared by every family
    pub fn validate(&self, kind: ModulationKind) -> CsrdResult<()> {
        if self.samples_per_symbol == 0 {
            return Err(CsrdError::invalid_parameter(
                "samples_per_symbol",
                "must be at least 1",
            ));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(CsrdError::invalid_field(
                "sample_rate",
                format!("must be positive, got {}", self.sample_rate),
            ));
        }
        if self.num_tx_antennas == 0 || self.num_tx_antennas > kind.max_antennas() {
            return Err(CsrdError::AntennaMismatch {
                expected: kind.max_antennas(),
                actual: self.num_tx_antennas,
            });
        }
        Ok(())
    }
}

/// Output of one `modulate` call
#[derive(Debug, Clone, PartialEq)]
pub struct Modulated {
    /// Baseband samples, `[antenna][time]`
    pub samples: AntennaSamples,
    /// Occupied bandwidth reported by the modulator
    pub bandwidth: Bandwidth,
    /// Rate at which message symbols were consumed (Hz)
    pub symbol_rate: f64,
    /// Message symbols actually used after truncation
    pub symbols_used: usize,
}

impl Modulated {
    /// Wrap into a [`Signal`] labelled with the modulation TypeID
    pub fn into_signal(self, sample_rate: f64, kind: ModulationKind) -> Signal {
        let mut signal = Signal::new(self.samples, sample_rate)
            .with_bandwidth(self.bandwidth)
            .with_modulation(kind.type_id());
        signal.set_metadata("symbol_rate", serde_json::json!(self.symbol_rate));
        signal.set_metadata("symbols_used", serde_json::json!(self.symbols_used));
        signal
    }
}

/// Resolved configuration, one variant per family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ModulatorConfig {
    Linear(LinearConfig),
    Cpm(CpmConfig),
    Ofdm(OfdmConfig),
    ScFdma(ScFdmaConfig),
    Otfs(OtfsConfig),
    Analog(AnalogConfig),
}

/// Optional per-field overrides from configuration files and segments.
///
/// Unset fields fall back to the documented default range of the family.
/// Unknown keys are rejected when deserialising.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModulatorOverrides {
    // Single-carrier pulse shaping
    pub rolloff: Option<ParamSpec<f64>>,
    pub span: Option<ParamSpec<usize>>,
    pub pulse_shape: Option<Vec<PulseShape>>,
    pub phase_offset: Option<ParamSpec<f64>>,
    pub ostbc_rate: Option<Vec<OstbcRate>>,

    // Continuous phase
    pub modulation_index: Option<ParamSpec<f64>>,
    pub bandwidth_time: Option<ParamSpec<f64>>,
    pub pulse_length: Option<ParamSpec<usize>>,
    pub differential: Option<bool>,
    pub initial_phase: Option<ParamSpec<f64>>,

    // Multicarrier
    pub fft_length: Option<ParamSpec<usize>>,
    pub cyclic_prefix_fraction: Option<ParamSpec<f64>>,
    pub left_guard: Option<ParamSpec<usize>>,
    pub right_guard: Option<ParamSpec<usize>>,
    pub dc_null: Option<bool>,
    pub pilot_spacing: Option<ParamSpec<usize>>,
    pub subcarrier_modulation: Option<Vec<SubcarrierModulation>>,
    pub num_data_subcarriers: Option<ParamSpec<usize>>,
    pub mapping_interval: Option<ParamSpec<usize>>,
    pub delay_length: Option<ParamSpec<usize>>,
    pub num_symbols: Option<ParamSpec<usize>>,
    pub padding: Option<Vec<OtfsPadding>>,
    pub pad_length: Option<ParamSpec<usize>>,

    // Analog
    pub frequency_deviation: Option<ParamSpec<f64>>,
    pub phase_deviation: Option<ParamSpec<f64>>,
    pub sideband: Option<Vec<Sideband>>,
}

impl ModulatorOverrides {
    /// Field-wise merge: every field set in `over` replaces this one
    pub fn merged_with(&self, over: &ModulatorOverrides) -> ModulatorOverrides {
        macro_rules! merge {
            ($($field:ident),*) => {
                ModulatorOverrides {
                    $($field: over.$field.clone().or_else(|| self.$field.clone()),)*
                }
            };
        }
        merge!(
            rolloff, span, pulse_shape, phase_offset, ostbc_rate, modulation_index,
            bandwidth_time, pulse_length, differential, initial_phase, fft_length,
            cyclic_prefix_fraction, left_guard, right_guard, dc_null, pilot_spacing,
            subcarrier_modulation, num_data_subcarriers, mapping_interval, delay_length,
            num_symbols, padding, pad_length, frequency_deviation, phase_deviation, sideband
        )
    }

    /// Cheap structural validation of every populated range
    pub fn validate(&self) -> CsrdResult<()> {
        macro_rules! check {
            ($($field:ident),*) => {
                $(if let Some(spec) = &self.$field {
                    spec.validate(stringify!($field))?;
                })*
            };
        }
        check!(
            rolloff, span, phase_offset, modulation_index, bandwidth_time, pulse_length,
            initial_phase, fft_length, cyclic_prefix_fraction, left_guard, right_guard,
            pilot_spacing, num_data_subcarriers, mapping_interval, delay_length, num_symbols,
            pad_length, frequency_deviation, phase_deviation
        );
        if let Some(spec) = &self.rolloff {
            if !spec.within(&0.0, &1.0) {
                return Err(CsrdError::invalid_parameter("rolloff", "must lie in [0, 1]"));
            }
        }
        Ok(())
    }
}

/// First-stage constellation used by the multicarrier schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubcarrierModulation {
    Psk,
    Qam,
}

impl SubcarrierModulation {
    /// Default choice for an order: BPSK for 2, QAM otherwise
    pub fn for_order(order: usize) -> Self {
        if order <= 2 {
            SubcarrierModulation::Psk
        } else {
            SubcarrierModulation::Qam
        }
    }

    pub fn constellation(&self, order: usize) -> CsrdResult<Vec<IQSample>> {
        match self {
            SubcarrierModulation::Psk => constellation::psk(order, 0.0),
            SubcarrierModulation::Qam => constellation::qam(order),
        }
    }
}

/// A configured modulator
pub trait Modulator: fmt::Debug + Send + Sync {
    fn kind(&self) -> ModulationKind;

    fn params(&self) -> &ModulatorParams;

    /// Resolved configuration, echoed into annotations
    fn config(&self) -> ModulatorConfig;

    /// Modulate one message. Pure with respect to configuration.
    fn modulate(&self, message: &Message) -> CsrdResult<Modulated>;

    /// Symbols per second consumed from the message
    fn symbol_rate(&self) -> f64 {
        self.params().symbol_rate()
    }

    /// Message elements needed to produce `num_symbols` channel symbols
    fn message_length_for(&self, num_symbols: usize) -> usize {
        let k = constellation::bits_per_symbol(self.params().order).max(1);
        num_symbols * k
    }
}

/// Draw a complete configuration for `kind` from `overrides` and the
/// family defaults.
pub fn fill_defaults<R: Rng + ?Sized>(
    kind: ModulationKind,
    params: &ModulatorParams,
    overrides: &ModulatorOverrides,
    rng: &mut R,
) -> CsrdResult<ModulatorConfig> {
    params.validate(kind)?;
    overrides.validate()?;
    Ok(match kind.family() {
        ModulationFamily::Linear => ModulatorConfig::Linear(linear::fill(kind, params, overrides, rng)?),
        ModulationFamily::ContinuousPhase => ModulatorConfig::Cpm(cpm::fill(kind, params, overrides, rng)?),
        ModulationFamily::Ofdm => ModulatorConfig::Ofdm(ofdm::fill(params, overrides, rng)?),
        ModulationFamily::ScFdma => ModulatorConfig::ScFdma(scfdma::fill(params, overrides, rng)?),
        ModulationFamily::Otfs => ModulatorConfig::Otfs(otfs::fill(params, overrides, rng)?),
        ModulationFamily::Analog => ModulatorConfig::Analog(analog::fill(kind, params, overrides, rng)?),
    })
}

/// Default OSTBC rate choice shared by the digital families
pub(crate) fn draw_ostbc_rate<R: Rng + ?Sized>(
    params: &ModulatorParams,
    overrides: &ModulatorOverrides,
    rng: &mut R,
) -> CsrdResult<OstbcRate> {
    if params.num_tx_antennas <= 2 {
        return Ok(OstbcRate::One);
    }
    params::pick(
        "ostbc_rate",
        overrides.ostbc_rate.as_ref(),
        &[OstbcRate::ThreeQuarters, OstbcRate::Half],
        rng,
    )
}

/// Message bits for whole transmission blocks of `slots_per_block` code
/// slots (an OFDM symbol, an OTFS frame, one channel symbol), never fewer
/// than one block. `num_symbols` counts data symbols.
pub(crate) fn block_message_length(
    ostbc: &OstbcEncoder,
    order: usize,
    num_symbols: usize,
    slots_per_block: usize,
) -> usize {
    let slots_per_block = slots_per_block.max(1);
    let blocks = (ostbc.slots_for_symbols(num_symbols) / slots_per_block).max(1);
    ostbc.symbols_for_slots(blocks * slots_per_block) * constellation::bits_per_symbol(order).max(1)
}

/// Bits required from the payload, or a typed mismatch error
pub(crate) fn expect_bits(message: &Message) -> CsrdResult<&[u8]> {
    match &message.payload {
        MessagePayload::Bits(bits) => Ok(bits),
        other => Err(CsrdError::PayloadMismatch(format!(
            "digital modulator expects bits, got {}",
            other.kind()
        ))),
    }
}

/// Shared check that the constructor received its own family's config
pub(crate) fn config_mismatch(kind: ModulationKind, config: &ModulatorConfig) -> CsrdError {
    let got = match config {
        ModulatorConfig::Linear(_) => "linear",
        ModulatorConfig::Cpm(_) => "cpm",
        ModulatorConfig::Ofdm(_) => "ofdm",
        ModulatorConfig::ScFdma(_) => "sc_fdma",
        ModulatorConfig::Otfs(_) => "otfs",
        ModulatorConfig::Analog(_) => "analog",
    };
    CsrdError::InconsistentConfiguration(format!(
        "{} cannot be built from a {} configuration",
        kind, got
    ))
}
