//! OFDM modulator
//!
//! ```text
//!  bits ─► PSK/QAM ─► OSTBC ─► grid (guards, DC null, pilots) ─► IFFT(N·sps) ─► CP ─► [antenna][time]
//! ```
//!
//! ## Subcarrier grid
//!
//! Subcarriers are indexed in ascending frequency, `0..N`, with the DC
//! subcarrier at `N/2`:
//!
//! ```text
//!   | left guard | P d d d d P d d | DC | d d P d d d d P | right guard |
//!   0                              N/2                                  N
//! ```
//!
//! Oversampling by `samples_per_symbol` is done in the frequency domain by
//! zero-padding the IFFT to `N * sps` points, so the occupied subcarriers
//! keep a spacing of `fs / (N * sps)` and the cyclic prefix is `cp * sps`
//! samples. The reported bandwidth is the pair of edge offsets of the
//! outermost active subcarriers, which is asymmetric whenever the guard
//! bands are.

use super::params::{pick, resolve, ParamSpec};
use super::{
    block_message_length, config_mismatch, draw_ostbc_rate, expect_bits, Modulated, ModulationKind, Modulator,
    ModulatorConfig, ModulatorOverrides, ModulatorParams, SubcarrierModulation,
};
use super::constellation::{bits_per_symbol, bits_to_symbols};
use crate::error::{CsrdError, CsrdResult};
use crate::message::Message;
use crate::ostbc::{OstbcEncoder, OstbcRate};
use crate::signal::Bandwidth;
use crate::spectrum::FftProcessor;
use crate::types::IQSample;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// FFT lengths drawn when none is configured
pub const DEFAULT_FFT_LENGTHS: [usize; 5] = [128, 256, 512, 1024, 2048];

/// Cyclic prefix fractions drawn when none is configured
pub const DEFAULT_CP_FRACTIONS: [f64; 3] = [0.25, 0.125, 0.0625];

/// Resolved OFDM configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfdmConfig {
    pub fft_length: usize,
    /// Cyclic prefix length in subcarrier-rate samples (scaled by sps on output)
    pub cyclic_prefix_length: usize,
    pub left_guard: usize,
    pub right_guard: usize,
    pub dc_null: bool,
    /// Every `n`-th active subcarrier carries a pilot; `None` disables pilots
    pub pilot_spacing: Option<usize>,
    pub subcarrier_modulation: SubcarrierModulation,
    pub ostbc_rate: OstbcRate,
}

pub(crate) fn fill<R: Rng + ?Sized>(
    params: &ModulatorParams,
    overrides: &ModulatorOverrides,
    rng: &mut R,
) -> CsrdResult<OfdmConfig> {
    let fft_length = resolve(
        "fft_length",
        overrides.fft_length.as_ref(),
        ParamSpec::choices(DEFAULT_FFT_LENGTHS.to_vec()),
        rng,
    )?;
    let cyclic_prefix_length = draw_cp_length(fft_length, overrides, rng)?;

    // Guards are drawn independently per side, 4%..12% of the FFT length
    let guard_default = || ParamSpec::range(fft_length / 25, fft_length / 8);
    let left_guard = resolve("left_guard", overrides.left_guard.as_ref(), guard_default(), rng)?;
    let right_guard = resolve("right_guard", overrides.right_guard.as_ref(), guard_default(), rng)?;

    let spacing = resolve(
        "pilot_spacing",
        overrides.pilot_spacing.as_ref(),
        ParamSpec::choices(vec![0, 6, 8, 12]),
        rng,
    )?;
    let subcarrier_modulation = pick(
        "subcarrier_modulation",
        overrides.subcarrier_modulation.as_ref(),
        &[SubcarrierModulation::for_order(params.order)],
        rng,
    )?;

    Ok(OfdmConfig {
        fft_length,
        cyclic_prefix_length,
        left_guard,
        right_guard,
        dc_null: overrides.dc_null.unwrap_or(true),
        pilot_spacing: (spacing > 0).then_some(spacing),
        subcarrier_modulation,
        ostbc_rate: draw_ostbc_rate(params, overrides, rng)?,
    })
}

pub(crate) fn draw_cp_length<R: Rng + ?Sized>(
    fft_length: usize,
    overrides: &ModulatorOverrides,
    rng: &mut R,
) -> CsrdResult<usize> {
    let fraction = resolve(
        "cyclic_prefix_fraction",
        overrides.cyclic_prefix_fraction.as_ref(),
        ParamSpec::choices(DEFAULT_CP_FRACTIONS.to_vec()),
        rng,
    )?;
    if !(0.0..=1.0).contains(&fraction) {
        return Err(CsrdError::invalid_parameter(
            "cyclic_prefix_fraction",
            "must lie in [0, 1]",
        ));
    }
    Ok((fft_length as f64 * fraction).round() as usize)
}

/// Frequency-domain oversampled IFFT with cyclic prefix, shared by OFDM and
/// SC-FDMA.
#[derive(Debug, Clone)]
pub(crate) struct GridSynthesizer {
    fft_length: usize,
    oversampling: usize,
    cp_length: usize,
    ifft: FftProcessor,
}

impl GridSynthesizer {
    pub(crate) fn new(fft_length: usize, oversampling: usize, cp_length: usize) -> Self {
        let oversampling = oversampling.max(1);
        Self {
            fft_length,
            oversampling,
            cp_length,
            ifft: FftProcessor::new(fft_length * oversampling),
        }
    }

    /// Output samples per grid symbol
    pub(crate) fn symbol_length(&self) -> usize {
        (self.fft_length + self.cp_length) * self.oversampling
    }

    /// Synthesize one symbol from `fft_length` bins in ascending frequency
    /// order; `active` is the number of non-zero unit-power bins.
    pub(crate) fn synthesize(&self, bins: &[IQSample], active: usize) -> Vec<IQSample> {
        let n = self.fft_length;
        let big = n * self.oversampling;
        let mut buffer = vec![IQSample::new(0.0, 0.0); big];
        for (c, &value) in bins.iter().enumerate().take(n) {
            let offset = c as isize - (n / 2) as isize;
            let idx = offset.rem_euclid(big as isize) as usize;
            buffer[idx] = value;
        }
        self.ifft.ifft_unitary(&mut buffer);

        let scale = (big as f64 / active.max(1) as f64).sqrt();
        let cp = self.cp_length * self.oversampling;
        let mut symbol = Vec::with_capacity(big + cp);
        symbol.extend(buffer[big - cp..].iter().map(|s| s * scale));
        symbol.extend(buffer.iter().map(|s| s * scale));
        symbol
    }

    /// Edge offsets (Hz) of the band spanned by centred bins `first..=last`
    pub(crate) fn band_edges(&self, first: usize, last: usize, sample_rate: f64) -> Bandwidth {
        let spacing = sample_rate / (self.fft_length * self.oversampling) as f64;
        let half = (self.fft_length / 2) as f64;
        Bandwidth::Offsets {
            lower: (first as f64 - half - 0.5) * spacing,
            upper: (last as f64 - half + 0.5) * spacing,
        }
    }
}

/// Role of each subcarrier in the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubcarrierRole {
    Guard,
    Dc,
    Pilot,
    Data,
}

/// OFDM modulator
#[derive(Debug, Clone)]
pub struct OfdmModulator {
    params: ModulatorParams,
    config: OfdmConfig,
    constellation: Vec<IQSample>,
    layout: Vec<SubcarrierRole>,
    data_indices: Vec<usize>,
    active: usize,
    ostbc: OstbcEncoder,
    synth: GridSynthesizer,
}

impl OfdmModulator {
    pub fn new(params: ModulatorParams, config: OfdmConfig) -> CsrdResult<Self> {
        params.validate(ModulationKind::Ofdm)?;
        let layout = build_layout(&config)?;
        let constellation = config.subcarrier_modulation.constellation(params.order)?;
        let ostbc = OstbcEncoder::new(params.num_tx_antennas, config.ostbc_rate)?;

        let data_indices: Vec<usize> = layout
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == SubcarrierRole::Data)
            .map(|(i, _)| i)
            .collect();
        let active = layout
            .iter()
            .filter(|r| matches!(r, SubcarrierRole::Data | SubcarrierRole::Pilot))
            .count();
        let synth = GridSynthesizer::new(
            config.fft_length,
            params.samples_per_symbol,
            config.cyclic_prefix_length,
        );

        Ok(Self {
            params,
            config,
            constellation,
            layout,
            data_indices,
            active,
            ostbc,
            synth,
        })
    }

    pub fn create(
        kind: ModulationKind,
        params: &ModulatorParams,
        config: &ModulatorConfig,
    ) -> CsrdResult<Box<dyn Modulator>> {
        match config {
            ModulatorConfig::Ofdm(c) => Ok(Box::new(Self::new(*params, c.clone())?)),
            other => Err(config_mismatch(kind, other)),
        }
    }

    pub fn layout(&self) -> &[SubcarrierRole] {
        &self.layout
    }

    pub fn num_data_subcarriers(&self) -> usize {
        self.data_indices.len()
    }

    /// Output samples per OFDM symbol (including the prefix)
    pub fn symbol_length(&self) -> usize {
        self.synth.symbol_length()
    }

    fn bandwidth(&self) -> Bandwidth {
        let first = self
            .layout
            .iter()
            .position(|r| matches!(r, SubcarrierRole::Data | SubcarrierRole::Pilot))
            .unwrap_or(0);
        let last = self
            .layout
            .iter()
            .rposition(|r| matches!(r, SubcarrierRole::Data | SubcarrierRole::Pilot))
            .unwrap_or(self.layout.len().saturating_sub(1));
        self.synth.band_edges(first, last, self.params.sample_rate)
    }
}

/// Assign a role to every subcarrier, validating guard/DC/pilot sizing
fn build_layout(config: &OfdmConfig) -> CsrdResult<Vec<SubcarrierRole>> {
    let n = config.fft_length;
    if n < 16 {
        return Err(CsrdError::invalid_parameter("fft_length", "must be at least 16"));
    }
    if config.left_guard >= n / 2 || config.right_guard >= n / 2 {
        return Err(CsrdError::InconsistentConfiguration(format!(
            "guard bands ({}, {}) must each be smaller than half the FFT length {}",
            config.left_guard, config.right_guard, n
        )));
    }
    if config.cyclic_prefix_length > n {
        return Err(CsrdError::InconsistentConfiguration(format!(
            "cyclic prefix {} exceeds FFT length {}",
            config.cyclic_prefix_length, n
        )));
    }
    if config.pilot_spacing == Some(0) || config.pilot_spacing == Some(1) {
        return Err(CsrdError::invalid_parameter(
            "pilot_spacing",
            "must be at least 2 (omit to disable pilots)",
        ));
    }

    let mut layout = vec![SubcarrierRole::Data; n];
    for role in layout.iter_mut().take(config.left_guard) {
        *role = SubcarrierRole::Guard;
    }
    for role in layout.iter_mut().skip(n - config.right_guard) {
        *role = SubcarrierRole::Guard;
    }
    if config.dc_null {
        layout[n / 2] = SubcarrierRole::Dc;
    }
    if let Some(spacing) = config.pilot_spacing {
        let mut count = 0usize;
        for role in layout.iter_mut() {
            if *role == SubcarrierRole::Data {
                if count % spacing == 0 {
                    *role = SubcarrierRole::Pilot;
                }
                count += 1;
            }
        }
    }

    if !layout.contains(&SubcarrierRole::Data) {
        return Err(CsrdError::InconsistentConfiguration(
            "no data subcarriers left after guards, DC and pilots".into(),
        ));
    }
    Ok(layout)
}

impl Modulator for OfdmModulator {
    fn kind(&self) -> ModulationKind {
        ModulationKind::Ofdm
    }

    fn params(&self) -> &ModulatorParams {
        &self.params
    }

    fn config(&self) -> ModulatorConfig {
        ModulatorConfig::Ofdm(self.config.clone())
    }

    fn modulate(&self, message: &Message) -> CsrdResult<Modulated> {
        let bits = expect_bits(message)?;
        let mut symbols: Vec<IQSample> = bits_to_symbols(bits, bits_per_symbol(self.params.order))
            .into_iter()
            .map(|v| self.constellation[v])
            .collect();
        symbols.truncate(self.ostbc.usable_symbols(symbols.len()));

        let streams = self.ostbc.encode(&symbols);
        let slots = streams.first().map_or(0, Vec::len);
        let d = self.data_indices.len();
        let num_ofdm = slots / d;
        if num_ofdm == 0 {
            return Err(CsrdError::EmptyInput(format!(
                "{} symbols cannot fill one OFDM symbol of {} data subcarriers",
                symbols.len(),
                d
            )));
        }

        let pilot = IQSample::new(1.0, 0.0);
        let samples: Vec<Vec<IQSample>> = streams
            .iter()
            .map(|stream| {
                let mut out = Vec::with_capacity(num_ofdm * self.symbol_length());
                for chunk in stream.chunks_exact(d).take(num_ofdm) {
                    let mut bins = vec![IQSample::new(0.0, 0.0); self.config.fft_length];
                    for (role, bin) in self.layout.iter().zip(bins.iter_mut()) {
                        if *role == SubcarrierRole::Pilot {
                            *bin = pilot;
                        }
                    }
                    for (&idx, &value) in self.data_indices.iter().zip(chunk.iter()) {
                        bins[idx] = value;
                    }
                    out.extend(self.synth.synthesize(&bins, self.active));
                }
                out
            })
            .collect();

        let (k, t) = self.ostbc.block_size();
        let symbols_used = (num_ofdm * d) / t * k;
        Ok(Modulated {
            samples,
            bandwidth: self.bandwidth(),
            symbol_rate: self.symbol_rate(),
            symbols_used,
        })
    }

    /// Data symbols per second, net of prefix, guards, DC, pilots and code rate
    fn symbol_rate(&self) -> f64 {
        let ofdm_rate = self.params.sample_rate / self.symbol_length() as f64;
        ofdm_rate * self.data_indices.len() as f64 * self.ostbc.code_rate()
    }

    /// Whole OFDM symbols only
    fn message_length_for(&self, num_symbols: usize) -> usize {
        block_message_length(&self.ostbc, self.params.order, num_symbols, self.data_indices.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageSource, RandomBitSource};
    use crate::spectrum::{occupied_band, FftProcessor};

    fn config(fft_length: usize) -> OfdmConfig {
        OfdmConfig {
            fft_length,
            cyclic_prefix_length: fft_length / 4,
            left_guard: 6,
            right_guard: 10,
            dc_null: true,
            pilot_spacing: Some(8),
            subcarrier_modulation: SubcarrierModulation::Qam,
            ostbc_rate: OstbcRate::Half,
        }
    }

    #[test]
    fn test_layout_counts() {
        let m = OfdmModulator::new(ModulatorParams::new(16, 1, 1e6), config(64)).unwrap();
        let guards = m.layout().iter().filter(|r| **r == SubcarrierRole::Guard).count();
        let pilots = m.layout().iter().filter(|r| **r == SubcarrierRole::Pilot).count();
        assert_eq!(guards, 16);
        assert_eq!(m.layout()[32], SubcarrierRole::Dc);
        // 64 - 16 guards - 1 DC = 47 active, every 8th a pilot
        assert_eq!(pilots, 6);
        assert_eq!(m.num_data_subcarriers(), 41);
    }

    #[test]
    fn test_output_length_and_truncation() {
        let m = OfdmModulator::new(ModulatorParams::new(4, 2, 1e6), config(64)).unwrap();
        // 41 data carriers, 2 bits per symbol: 100 symbols fill 2 OFDM symbols
        let out = m.modulate(&Message::bits(vec![1, 0].repeat(100), 1e6)).unwrap();
        assert_eq!(out.samples[0].len(), 2 * (64 + 16) * 2);
        assert_eq!(out.symbols_used, 82);
    }

    #[test]
    fn test_cyclic_prefix_copies_tail() {
        let m = OfdmModulator::new(ModulatorParams::new(4, 1, 1e6), config(64)).unwrap();
        let msg = RandomBitSource::new(2).generate(82, 1e6).unwrap();
        let out = &m.modulate(&msg).unwrap().samples[0];
        for i in 0..16 {
            assert!((out[i] - out[64 + i]).norm() < 1e-12);
        }
    }

    #[test]
    fn test_asymmetric_bandwidth_offsets() {
        let fs = 1.28e6;
        let m = OfdmModulator::new(ModulatorParams::new(4, 1, fs), config(128)).unwrap();
        let msg = RandomBitSource::new(4).generate(2 * 110 * 20, fs).unwrap();
        let out = m.modulate(&msg).unwrap();
        let spacing = fs / 128.0;
        match out.bandwidth {
            Bandwidth::Offsets { lower, upper } => {
                assert!((lower - (6.0 - 64.0 - 0.5) * spacing).abs() < 1e-6);
                assert!((upper - (127.0 - 10.0 - 64.0 + 0.5) * spacing).abs() < 1e-6);
            }
            other => panic!("expected offsets, got {:?}", other),
        }
        // The measured spectrum agrees with the layout
        let (lo, hi) = occupied_band(&out.samples[0], fs).unwrap();
        assert!(lo > -64.0 * spacing && hi < 64.0 * spacing);
        assert!(hi > 0.0 && lo < 0.0);
    }

    #[test]
    fn test_subcarriers_recovered_by_fft() {
        let mut c = config(64);
        c.cyclic_prefix_length = 0;
        c.pilot_spacing = None;
        let m = OfdmModulator::new(ModulatorParams::new(4, 1, 1e6), c).unwrap();
        let msg = RandomBitSource::new(8).generate(2 * m.num_data_subcarriers(), 1e6).unwrap();
        let out = m.modulate(&msg).unwrap();
        let fft = FftProcessor::new(64);
        let spectrum = fft.fft(&out.samples[0]);
        // Guard bins (lowest frequencies) are empty, DC is empty
        assert!(spectrum[32].norm() < 1e-9); // -N/2 bin sits at index N/2
        assert!(spectrum[0].norm() < 1e-9);
        // A data bin carries energy
        assert!(spectrum[1].norm() > 1e-3);
    }

    #[test]
    fn test_inconsistent_guards_rejected() {
        let mut c = config(64);
        c.left_guard = 40;
        assert!(matches!(
            OfdmModulator::new(ModulatorParams::new(4, 1, 1e6), c),
            Err(CsrdError::InconsistentConfiguration(_))
        ));
        let mut c = config(64);
        c.pilot_spacing = Some(1);
        assert!(OfdmModulator::new(ModulatorParams::new(4, 1, 1e6), c).is_err());
    }

    #[test]
    fn test_unit_average_power() {
        let m = OfdmModulator::new(ModulatorParams::new(16, 2, 1e6), config(256)).unwrap();
        let msg = RandomBitSource::new(6).generate(4 * 220 * 10, 1e6).unwrap();
        let out = m.modulate(&msg).unwrap();
        let p = crate::types::complex_ops::mean_power(&out.samples[0]);
        assert!((p - 1.0).abs() < 0.1, "power {}", p);
    }

    #[test]
    fn test_message_length_fills_whole_ofdm_symbols_within_duration() {
        let m = OfdmModulator::new(ModulatorParams::new(16, 1, 1e6), config(64)).unwrap();
        // 41 data carriers over 80 samples per OFDM symbol
        assert!((m.symbol_rate() - 1e6 / 80.0 * 41.0).abs() < 1e-6);

        let duration = 1e-3;
        let n = (duration * m.symbol_rate()).floor() as usize;
        let bits = m.message_length_for(n);
        assert_eq!(bits, 12 * 41 * 4);
        let msg = RandomBitSource::new(8).generate(bits, 1e6).unwrap();
        let out = m.modulate(&msg).unwrap();
        assert_eq!(out.samples[0].len(), 12 * 80);
        assert!(out.samples[0].len() as f64 <= duration * 1e6);
    }

    #[test]
    fn test_message_length_never_below_one_ofdm_symbol() {
        let m = OfdmModulator::new(ModulatorParams::new(4, 1, 1e6), config(2048)).unwrap();
        let d = m.num_data_subcarriers();
        assert_eq!(m.message_length_for(1), d * 2);
        let msg = RandomBitSource::new(9).generate(m.message_length_for(1), 1e6).unwrap();
        assert_eq!(m.modulate(&msg).unwrap().samples[0].len(), m.symbol_length());
    }
}

