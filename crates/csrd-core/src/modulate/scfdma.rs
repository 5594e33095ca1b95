//! SC-FDMA (DFT-spread OFDM) modulator
//!
//! Each block of `M` constellation symbols is spread by a unitary `M`-point
//! DFT and mapped onto `M` of the `N` subcarriers, either contiguously
//! (localized, interval 1) or every `I`-th subcarrier (interleaved). The
//! mapped span is centred in the band; the remainder is guard.
//!
//! ```text
//!   M symbols ─► DFT(M) ─► map (interval I) ─► IFFT(N·sps) ─► CP
//! ```

use super::constellation::{bits_per_symbol, bits_to_symbols};
use super::ofdm::{draw_cp_length, GridSynthesizer};
use super::params::{pick, resolve, ParamSpec};
use super::{
    block_message_length, config_mismatch, draw_ostbc_rate, expect_bits, Modulated, ModulationKind, Modulator,
    ModulatorConfig, ModulatorOverrides, ModulatorParams, SubcarrierModulation,
};
use crate::error::{CsrdError, CsrdResult};
use crate::message::Message;
use crate::ostbc::{OstbcEncoder, OstbcRate};
use crate::spectrum::FftProcessor;
use crate::types::IQSample;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScFdmaConfig {
    pub fft_length: usize,
    pub cyclic_prefix_length: usize,
    /// DFT size `M`
    pub num_data_subcarriers: usize,
    /// Subcarrier interval `I` between mapped DFT outputs
    pub mapping_interval: usize,
    pub subcarrier_modulation: SubcarrierModulation,
    pub ostbc_rate: OstbcRate,
}

impl ScFdmaConfig {
    /// Subcarriers spanned by the mapping, first to last inclusive
    pub fn mapped_span(&self) -> usize {
        self.num_data_subcarriers.saturating_sub(1) * self.mapping_interval + 1
    }
}

pub(crate) fn fill<R: Rng + ?Sized>(
    params: &ModulatorParams,
    overrides: &ModulatorOverrides,
    rng: &mut R,
) -> CsrdResult<ScFdmaConfig> {
    let fft_length = resolve(
        "fft_length",
        overrides.fft_length.as_ref(),
        ParamSpec::choices(vec![128, 256, 512, 1024]),
        rng,
    )?;
    let cyclic_prefix_length = draw_cp_length(fft_length, overrides, rng)?;

    let num_data_subcarriers = match &overrides.num_data_subcarriers {
        Some(spec) => spec.draw("num_data_subcarriers", rng)?,
        None => (fft_length as f64 * rng.gen_range(0.5..0.85)).round() as usize,
    };

    // An interleaved default that does not fit falls back to localized
    let mapping_interval = match &overrides.mapping_interval {
        Some(spec) => spec.draw("mapping_interval", rng)?,
        None => {
            let drawn = ParamSpec::choices(vec![1usize, 2]).draw("mapping_interval", rng)?;
            if num_data_subcarriers.saturating_sub(1) * drawn + 1 > fft_length {
                1
            } else {
                drawn
            }
        }
    };

    Ok(ScFdmaConfig {
        fft_length,
        cyclic_prefix_length,
        num_data_subcarriers,
        mapping_interval,
        subcarrier_modulation: pick(
            "subcarrier_modulation",
            overrides.subcarrier_modulation.as_ref(),
            &[SubcarrierModulation::for_order(params.order)],
            rng,
        )?,
        ostbc_rate: draw_ostbc_rate(params, overrides, rng)?,
    })
}

#[derive(Debug, Clone)]
pub struct ScFdmaModulator {
    params: ModulatorParams,
    config: ScFdmaConfig,
    constellation: Vec<IQSample>,
    first_bin: usize,
    ostbc: OstbcEncoder,
    dft: FftProcessor,
    synth: GridSynthesizer,
}

impl ScFdmaModulator {
    pub fn new(params: ModulatorParams, config: ScFdmaConfig) -> CsrdResult<Self> {
        params.validate(ModulationKind::ScFdma)?;
        let n = config.fft_length;
        if n < 16 {
            return Err(CsrdError::invalid_parameter("fft_length", "must be at least 16"));
        }
        if config.num_data_subcarriers == 0 {
            return Err(CsrdError::invalid_parameter(
                "num_data_subcarriers",
                "must be at least 1",
            ));
        }
        if config.mapping_interval == 0 {
            return Err(CsrdError::invalid_parameter("mapping_interval", "must be at least 1"));
        }
        let span = config.mapped_span();
        if span > n {
            return Err(CsrdError::InconsistentConfiguration(format!(
                "{} subcarriers at interval {} span {} bins, more than the FFT length {}",
                config.num_data_subcarriers, config.mapping_interval, span, n
            )));
        }
        if config.cyclic_prefix_length > n {
            return Err(CsrdError::InconsistentConfiguration(format!(
                "cyclic prefix {} exceeds FFT length {}",
                config.cyclic_prefix_length, n
            )));
        }

        let constellation = config.subcarrier_modulation.constellation(params.order)?;
        let ostbc = OstbcEncoder::new(params.num_tx_antennas, config.ostbc_rate)?;
        let dft = FftProcessor::new(config.num_data_subcarriers);
        let synth = GridSynthesizer::new(n, params.samples_per_symbol, config.cyclic_prefix_length);

        Ok(Self {
            params,
            first_bin: (n - span) / 2,
            config,
            constellation,
            ostbc,
            dft,
            synth,
        })
    }

    pub fn create(
        kind: ModulationKind,
        params: &ModulatorParams,
        config: &ModulatorConfig,
    ) -> CsrdResult<Box<dyn Modulator>> {
        match config {
            ModulatorConfig::ScFdma(c) => Ok(Box::new(Self::new(*params, c.clone())?)),
            other => Err(config_mismatch(kind, other)),
        }
    }

    /// Output samples per SC-FDMA symbol (including the prefix)
    pub fn symbol_length(&self) -> usize {
        self.synth.symbol_length()
    }

    fn spread_block(&self, block: &[IQSample]) -> Vec<IQSample> {
        let mut spread = block.to_vec();
        self.dft.fft_unitary(&mut spread);

        let mut bins = vec![IQSample::new(0.0, 0.0); self.config.fft_length];
        for (i, value) in spread.into_iter().enumerate() {
            bins[self.first_bin + i * self.config.mapping_interval] = value;
        }
        self.synth.synthesize(&bins, self.config.num_data_subcarriers)
    }
}

impl Modulator for ScFdmaModulator {
    fn kind(&self) -> ModulationKind {
        ModulationKind::ScFdma
    }

    fn params(&self) -> &ModulatorParams {
        &self.params
    }

    fn config(&self) -> ModulatorConfig {
        ModulatorConfig::ScFdma(self.config.clone())
    }

    fn modulate(&self, message: &Message) -> CsrdResult<Modulated> {
        let bits = expect_bits(message)?;
        let mut symbols: Vec<IQSample> = bits_to_symbols(bits, bits_per_symbol(self.params.order))
            .into_iter()
            .map(|v| self.constellation[v])
            .collect();
        symbols.truncate(self.ostbc.usable_symbols(symbols.len()));

        let m = self.config.num_data_subcarriers;
        let streams = self.ostbc.encode(&symbols);
        let num_blocks = streams.first().map_or(0, Vec::len) / m;
        if num_blocks == 0 {
            return Err(CsrdError::EmptyInput(format!(
                "{} symbols cannot fill one SC-FDMA block of {}",
                symbols.len(),
                m
            )));
        }

        let samples = streams
            .iter()
            .map(|stream| {
                stream
                    .chunks_exact(m)
                    .take(num_blocks)
                    .flat_map(|block| self.spread_block(block))
                    .collect()
            })
            .collect();

        let span = self.config.mapped_span();
        let (k, t) = self.ostbc.block_size();
        Ok(Modulated {
            samples,
            bandwidth: self.synth.band_edges(
                self.first_bin,
                self.first_bin + span - 1,
                self.params.sample_rate,
            ),
            symbol_rate: self.symbol_rate(),
            symbols_used: (num_blocks * m) / t * k,
        })
    }

    fn symbol_rate(&self) -> f64 {
        let block_rate = self.params.sample_rate / self.symbol_length() as f64;
        block_rate * self.config.num_data_subcarriers as f64 * self.ostbc.code_rate()
    }

    /// Whole SC-FDMA blocks only
    fn message_length_for(&self, num_symbols: usize) -> usize {
        block_message_length(
            &self.ostbc,
            self.params.order,
            num_symbols,
            self.config.num_data_subcarriers,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageSource, RandomBitSource};
    use crate::modulate::{OfdmConfig, OfdmModulator};
    use crate::signal::Bandwidth;

    fn config(m: usize, interval: usize) -> ScFdmaConfig {
        ScFdmaConfig {
            fft_length: 256,
            cyclic_prefix_length: 16,
            num_data_subcarriers: m,
            mapping_interval: interval,
            subcarrier_modulation: SubcarrierModulation::Qam,
            ostbc_rate: OstbcRate::One,
        }
    }

    /// Mean over symbols of peak-to-average power, in dB
    fn mean_papr_db(samples: &[IQSample], symbol_len: usize) -> f64 {
        let paprs: Vec<f64> = samples
            .chunks_exact(symbol_len)
            .map(|s| {
                let powers: Vec<f64> = s.iter().map(|x| x.norm_sqr()).collect();
                let peak = powers.iter().cloned().fold(0.0, f64::max);
                let mean = powers.iter().sum::<f64>() / powers.len() as f64;
                10.0 * (peak / mean).log10()
            })
            .collect();
        paprs.iter().sum::<f64>() / paprs.len() as f64
    }

    #[test]
    fn test_length_and_band() {
        let fs = 2.56e6;
        let m = ScFdmaModulator::new(ModulatorParams::new(4, 2, fs), config(120, 1)).unwrap();
        let msg = RandomBitSource::new(1).generate(2 * 120 * 5, fs).unwrap();
        let out = m.modulate(&msg).unwrap();
        assert_eq!(out.samples[0].len(), 5 * (256 + 16) * 2);
        assert_eq!(out.symbols_used, 600);
        match out.bandwidth {
            Bandwidth::Offsets { lower, upper } => {
                let width = upper - lower;
                let spacing = fs / 512.0;
                assert!((width - 120.0 * spacing).abs() < 1e-6, "width {}", width);
                assert!(lower < 0.0 && upper > 0.0);
            }
            other => panic!("expected offsets, got {:?}", other),
        }
    }

    #[test]
    fn test_interleaved_span() {
        let c = config(100, 2);
        assert_eq!(c.mapped_span(), 199);
        assert!(ScFdmaModulator::new(ModulatorParams::new(4, 1, 1e6), c).is_ok());
        assert!(matches!(
            ScFdmaModulator::new(ModulatorParams::new(4, 1, 1e6), config(200, 2)),
            Err(CsrdError::InconsistentConfiguration(_))
        ));
    }

    #[test]
    fn test_lower_papr_than_ofdm() {
        let fs = 1e6;
        let sc = ScFdmaModulator::new(ModulatorParams::new(4, 4, fs), config(128, 1)).unwrap();
        let ofdm = OfdmModulator::new(
            ModulatorParams::new(4, 4, fs),
            OfdmConfig {
                fft_length: 256,
                cyclic_prefix_length: 16,
                left_guard: 64,
                right_guard: 63,
                dc_null: false,
                pilot_spacing: None,
                subcarrier_modulation: SubcarrierModulation::Qam,
                ostbc_rate: OstbcRate::One,
            },
        )
        .unwrap();

        let msg = RandomBitSource::new(9).generate(2 * 128 * 40, fs).unwrap();
        let sc_out = sc.modulate(&msg).unwrap();
        let ofdm_out = ofdm.modulate(&msg).unwrap();
        let sc_papr = mean_papr_db(&sc_out.samples[0], sc.symbol_length());
        let ofdm_papr = mean_papr_db(&ofdm_out.samples[0], ofdm.symbol_length());
        assert!(
            sc_papr + 1.0 < ofdm_papr,
            "SC-FDMA {:.2} dB vs OFDM {:.2} dB",
            sc_papr,
            ofdm_papr
        );
    }

    #[test]
    fn test_default_interval_falls_back() {
        use rand::{rngs::StdRng, SeedableRng};
        let params = ModulatorParams::new(4, 2, 1e6);
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let c = fill(&params, &ModulatorOverrides::default(), &mut rng).unwrap();
            assert!(c.mapped_span() <= c.fft_length);
            assert!(ScFdmaModulator::new(params, c).is_ok());
        }
    }
}
