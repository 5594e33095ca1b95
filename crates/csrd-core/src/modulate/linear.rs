//! Linear single-carrier modulators: PSK, PAM, ASK, QAM, APSK, OOK
//!
//! ```text
//!  bits ─► group log2(M) ─► constellation ─► OSTBC (Nt > 1) ─► ↑sps + RC/RRC ─► [antenna][time]
//! ```
//!
//! Output length per antenna is `symbols_per_antenna * sps`; the pulse
//! shaping filter delay is removed as described in
//! [`crate::filters::pulse_shaping`].

use super::constellation::{self, bits_per_symbol, bits_to_symbols};
use super::params::{pick, resolve, ParamSpec};
use super::{
    block_message_length, config_mismatch, draw_ostbc_rate, expect_bits, Modulated, ModulationKind, Modulator,
    ModulatorConfig, ModulatorOverrides, ModulatorParams,
};
use crate::error::{CsrdError, CsrdResult};
use crate::filters::{design_pulse, PulseShape, PulseShapingFilter};
use crate::message::Message;
use crate::ostbc::{OstbcEncoder, OstbcRate};
use crate::signal::Bandwidth;
use crate::spectrum::occupied_bandwidth_mimo;
use crate::types::IQSample;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Resolved configuration of a linear modulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearConfig {
    pub pulse_shape: PulseShape,
    /// Roll-off factor β in [0, 1]
    pub rolloff: f64,
    /// Filter span in symbols
    pub span: usize,
    /// Constellation rotation (radians), PSK only
    pub phase_offset: f64,
    pub ostbc_rate: OstbcRate,
}

/// Default ranges: β ∈ [0.1, 0.5], span ∈ {4, 6, 8, 10}, PSK rotation
/// either 0 or π/M.
pub(crate) fn fill<R: Rng + ?Sized>(
    kind: ModulationKind,
    params: &ModulatorParams,
    overrides: &ModulatorOverrides,
    rng: &mut R,
) -> CsrdResult<LinearConfig> {
    let rolloff = resolve("rolloff", overrides.rolloff.as_ref(), ParamSpec::range(0.1, 0.5), rng)?;
    let span = resolve(
        "span",
        overrides.span.as_ref(),
        ParamSpec::choices(vec![4, 6, 8, 10]),
        rng,
    )?;
    let pulse_shape = pick("pulse_shape", overrides.pulse_shape.as_ref(), &[PulseShape::Sqrt], rng)?;
    let phase_offset = if kind == ModulationKind::Psk {
        let m = params.order.max(2) as f64;
        resolve(
            "phase_offset",
            overrides.phase_offset.as_ref(),
            ParamSpec::choices(vec![0.0, PI / m]),
            rng,
        )?
    } else {
        0.0
    };
    let ostbc_rate = draw_ostbc_rate(params, overrides, rng)?;

    Ok(LinearConfig {
        pulse_shape,
        rolloff,
        span,
        phase_offset,
        ostbc_rate,
    })
}

/// Build the unit-energy constellation for a linear scheme
pub fn linear_constellation(
    kind: ModulationKind,
    order: usize,
    phase_offset: f64,
) -> CsrdResult<Vec<IQSample>> {
    match kind {
        ModulationKind::Psk => constellation::psk(order, phase_offset),
        ModulationKind::Pam => constellation::pam(order),
        ModulationKind::Ask => constellation::ask(order),
        ModulationKind::Qam => constellation::qam(order),
        ModulationKind::Apsk => constellation::apsk(order),
        ModulationKind::Ook => constellation::ook(order),
        other => Err(CsrdError::InconsistentConfiguration(format!(
            "{} is not a linear modulation",
            other
        ))),
    }
}

/// Single-carrier linear modulator
#[derive(Debug)]
pub struct LinearModulator {
    kind: ModulationKind,
    params: ModulatorParams,
    config: LinearConfig,
    constellation: Vec<IQSample>,
    filter: Box<dyn PulseShapingFilter>,
    ostbc: OstbcEncoder,
}

impl LinearModulator {
    pub fn new(kind: ModulationKind, params: ModulatorParams, config: LinearConfig) -> CsrdResult<Self> {
        params.validate(kind)?;
        if !(0.0..=1.0).contains(&config.rolloff) {
            return Err(CsrdError::invalid_parameter("rolloff", "must lie in [0, 1]"));
        }
        if config.span == 0 {
            return Err(CsrdError::invalid_parameter("span", "must be at least 1"));
        }
        let constellation = linear_constellation(kind, params.order, config.phase_offset)?;
        let filter = design_pulse(
            config.pulse_shape,
            config.rolloff,
            config.span,
            params.samples_per_symbol,
        );
        let ostbc = OstbcEncoder::new(params.num_tx_antennas, config.ostbc_rate)?;

        Ok(Self {
            kind,
            params,
            config,
            constellation,
            filter,
            ostbc,
        })
    }

    /// Registry constructor
    pub fn create(
        kind: ModulationKind,
        params: &ModulatorParams,
        config: &ModulatorConfig,
    ) -> CsrdResult<Box<dyn Modulator>> {
        match config {
            ModulatorConfig::Linear(c) => Ok(Box::new(Self::new(kind, *params, c.clone())?)),
            other => Err(config_mismatch(kind, other)),
        }
    }

    /// Unit-energy constellation table, indexed by symbol value
    pub fn constellation(&self) -> &[IQSample] {
        &self.constellation
    }

    /// Map bits to constellation points (before OSTBC and shaping)
    pub fn map_bits(&self, bits: &[u8]) -> Vec<IQSample> {
        bits_to_symbols(bits, bits_per_symbol(self.params.order))
            .into_iter()
            .map(|v| self.constellation[v])
            .collect()
    }
}

impl Modulator for LinearModulator {
    fn kind(&self) -> ModulationKind {
        self.kind
    }

    fn params(&self) -> &ModulatorParams {
        &self.params
    }

    fn config(&self) -> ModulatorConfig {
        ModulatorConfig::Linear(self.config.clone())
    }

    fn modulate(&self, message: &Message) -> CsrdResult<Modulated> {
        let bits = expect_bits(message)?;
        let mut symbols = self.map_bits(bits);
        symbols.truncate(self.ostbc.usable_symbols(symbols.len()));
        if symbols.is_empty() {
            return Err(CsrdError::EmptyInput(format!(
                "{} bits are not enough for one {} block",
                bits.len(),
                self.kind
            )));
        }

        let sps = self.params.samples_per_symbol;
        let samples: Vec<Vec<IQSample>> = self
            .ostbc
            .encode(&symbols)
            .iter()
            .map(|stream| self.filter.shape(stream, sps))
            .collect();

        let bandwidth = occupied_bandwidth_mimo(&samples, self.params.sample_rate);
        Ok(Modulated {
            samples,
            bandwidth: Bandwidth::Scalar(bandwidth),
            symbol_rate: self.symbol_rate(),
            symbols_used: symbols.len(),
        })
    }

    /// Channel symbol rate scaled by the space-time code rate
    fn symbol_rate(&self) -> f64 {
        self.params.symbol_rate() * self.ostbc.code_rate()
    }

    /// Whole space-time code blocks only
    fn message_length_for(&self, num_symbols: usize) -> usize {
        block_message_length(&self.ostbc, self.params.order, num_symbols, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageSource, RandomBitSource};
    use crate::modulate::fill_defaults;
    use rand::{rngs::StdRng, SeedableRng};

    fn qam16(num_tx: usize) -> LinearModulator {
        let params = ModulatorParams::new(16, 4, 1e6).with_antennas(num_tx);
        let config = LinearConfig {
            pulse_shape: PulseShape::Sqrt,
            rolloff: 0.35,
            span: 8,
            phase_offset: 0.0,
            ostbc_rate: OstbcRate::ThreeQuarters,
        };
        LinearModulator::new(ModulationKind::Qam, params, config).unwrap()
    }

    #[test]
    fn test_qam16_length_and_bandwidth() {
        let modulator = qam16(1);
        let msg = RandomBitSource::new(1).generate(4000, 250e3).unwrap();
        let out = modulator.modulate(&msg).unwrap();

        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.samples[0].len(), 1000 * 4);
        assert_eq!(out.symbols_used, 1000);

        let expected = 250e3 * 1.35;
        let bw = out.bandwidth.width();
        assert!(
            (bw - expected).abs() / expected < 0.10,
            "bandwidth {} vs {}",
            bw,
            expected
        );
    }

    #[test]
    fn test_partial_symbol_truncated() {
        let modulator = qam16(1);
        let msg = Message::bits(vec![1; 4003], 250e3);
        let out = modulator.modulate(&msg).unwrap();
        assert_eq!(out.symbols_used, 1000);
        assert_eq!(out.samples[0].len(), 4000);
    }

    #[test]
    fn test_alamouti_output_shape() {
        let modulator = qam16(2);
        let msg = Message::bits(vec![0, 1, 1, 0].repeat(101), 250e3);
        let out = modulator.modulate(&msg).unwrap();
        assert_eq!(out.samples.len(), 2);
        // 101 symbols -> 100 usable for rate-1 Alamouti blocks of two
        assert_eq!(out.symbols_used, 100);
        assert_eq!(out.samples[0].len(), 400);
        assert_eq!(out.samples[1].len(), 400);
    }

    #[test]
    fn test_three_antennas_derate_symbol_rate() {
        let out = qam16(3)
            .modulate(&Message::bits(vec![1, 0].repeat(600), 250e3))
            .unwrap();
        assert!((out.symbol_rate - 250e3 * 0.75).abs() < 1e-6);
        assert_eq!(out.samples.len(), 3);
        // 300 symbols -> 100 blocks of 3 -> 400 slots -> 1600 samples
        assert_eq!(out.samples[0].len(), 1600);
    }

    #[test]
    fn test_invalid_order_fails_at_construction() {
        let params = ModulatorParams::new(12, 4, 1e6);
        let config = fill_defaults(
            ModulationKind::Qam,
            &params,
            &ModulatorOverrides::default(),
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap();
        match config {
            ModulatorConfig::Linear(c) => assert!(matches!(
                LinearModulator::new(ModulationKind::Qam, params, c),
                Err(CsrdError::InvalidOrder { .. })
            )),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_modulate_is_pure() {
        let modulator = qam16(1);
        let msg = RandomBitSource::new(3).generate(400, 250e3).unwrap();
        assert_eq!(modulator.modulate(&msg).unwrap(), modulator.modulate(&msg).unwrap());
    }

    #[test]
    fn test_default_ranges() {
        let params = ModulatorParams::new(8, 4, 1e6);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let c = fill(ModulationKind::Psk, &params, &ModulatorOverrides::default(), &mut rng).unwrap();
            assert!((0.1..=0.5).contains(&c.rolloff));
            assert!([4, 6, 8, 10].contains(&c.span));
            assert!(c.phase_offset == 0.0 || (c.phase_offset - PI / 8.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_audio_payload_rejected() {
        let modulator = qam16(1);
        let msg = Message::audio(vec![0.0; 100], 250e3);
        assert!(matches!(modulator.modulate(&msg), Err(CsrdError::PayloadMismatch(_))));
    }
}
