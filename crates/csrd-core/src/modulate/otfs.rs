//! OTFS modulator
//!
//! Symbols are placed on an `M x N` delay-Doppler grid (M delay bins, N
//! Doppler bins), column-major so each Doppler column holds `M` consecutive
//! symbols. The transmit chain is the textbook pair:
//!
//! ```text
//!   x[m,n] ─ ISFFT ─► X[k,l] ─ Heisenberg ─► s[m,l] ─ serialize + pad ─► RRC (sps > 1)
//!
//!   ISFFT:      FFT over delay (m → k), IFFT over Doppler (n → l)
//!   Heisenberg: IFFT over subcarriers (k → m) for each time slot l
//! ```
//!
//! All transforms are unitary, so [`OtfsModulator::demodulate`] inverts the
//! chain exactly on an ideal channel.
//!
//! ## Padding
//!
//! | scheme | where                          | frame length   |
//! |--------|--------------------------------|----------------|
//! | CP     | prefix per time slot (copy)    | (M + L) * N    |
//! | ZP     | zeros after each time slot     | (M + L) * N    |
//! | RCP    | one prefix per frame (copy)    | M * N + L      |
//! | RZP    | zeros after the frame          | M * N + L      |
//! | NONE   | -                              | M * N          |

use super::constellation::{bits_per_symbol, bits_to_symbols};
use super::params::{pick, resolve, ParamSpec};
use super::{
    block_message_length, config_mismatch, draw_ostbc_rate, expect_bits, Modulated, ModulationKind, Modulator,
    ModulatorConfig, ModulatorOverrides, ModulatorParams, SubcarrierModulation,
};
use crate::error::{CsrdError, CsrdResult};
use crate::filters::{design_pulse, PulseShape, PulseShapingFilter};
use crate::message::Message;
use crate::ostbc::{OstbcEncoder, OstbcRate};
use crate::signal::Bandwidth;
use crate::spectrum::{occupied_bandwidth_mimo, FftProcessor};
use crate::types::IQSample;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Guard scheme between OTFS time slots or frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OtfsPadding {
    Cp,
    Zp,
    Rcp,
    Rzp,
    None,
}

impl OtfsPadding {
    pub const ALL: [OtfsPadding; 5] = [
        OtfsPadding::Cp,
        OtfsPadding::Zp,
        OtfsPadding::Rcp,
        OtfsPadding::Rzp,
        OtfsPadding::None,
    ];

    /// Padded frame length for an `m x n` grid and pad length `pad`
    pub fn frame_length(&self, m: usize, n: usize, pad: usize) -> usize {
        match self {
            OtfsPadding::Cp | OtfsPadding::Zp => (m + pad) * n,
            OtfsPadding::Rcp | OtfsPadding::Rzp => m * n + pad,
            OtfsPadding::None => m * n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtfsConfig {
    /// Delay bins `M`
    pub delay_length: usize,
    /// Doppler bins `N`
    pub num_symbols: usize,
    pub padding: OtfsPadding,
    pub pad_length: usize,
    pub subcarrier_modulation: SubcarrierModulation,
    pub rolloff: f64,
    pub span: usize,
    pub ostbc_rate: OstbcRate,
}

pub(crate) fn fill<R: Rng + ?Sized>(
    params: &ModulatorParams,
    overrides: &ModulatorOverrides,
    rng: &mut R,
) -> CsrdResult<OtfsConfig> {
    let delay_length = resolve(
        "delay_length",
        overrides.delay_length.as_ref(),
        ParamSpec::choices(vec![64, 128, 256]),
        rng,
    )?;
    let num_symbols = resolve(
        "num_symbols",
        overrides.num_symbols.as_ref(),
        ParamSpec::choices(vec![8, 10, 14, 16]),
        rng,
    )?;
    let padding = pick("padding", overrides.padding.as_ref(), &OtfsPadding::ALL, rng)?;
    let pad_length = match &overrides.pad_length {
        Some(spec) => spec.draw("pad_length", rng)?,
        None => {
            let fraction = ParamSpec::choices(vec![1.0 / 16.0, 0.125, 0.25]).draw("pad_length", rng)?;
            (delay_length as f64 * fraction).round() as usize
        }
    };

    Ok(OtfsConfig {
        delay_length,
        num_symbols,
        padding,
        pad_length: if padding == OtfsPadding::None { 0 } else { pad_length },
        subcarrier_modulation: pick(
            "subcarrier_modulation",
            overrides.subcarrier_modulation.as_ref(),
            &[SubcarrierModulation::for_order(params.order)],
            rng,
        )?,
        rolloff: resolve("rolloff", overrides.rolloff.as_ref(), ParamSpec::range(0.1, 0.5), rng)?,
        span: resolve("span", overrides.span.as_ref(), ParamSpec::choices(vec![6, 8, 10]), rng)?,
        ostbc_rate: draw_ostbc_rate(params, overrides, rng)?,
    })
}

#[derive(Debug)]
pub struct OtfsModulator {
    params: ModulatorParams,
    config: OtfsConfig,
    constellation: Vec<IQSample>,
    ostbc: OstbcEncoder,
    delay_fft: FftProcessor,
    doppler_fft: FftProcessor,
    filter: Option<Box<dyn PulseShapingFilter>>,
}

impl OtfsModulator {
    pub fn new(params: ModulatorParams, config: OtfsConfig) -> CsrdResult<Self> {
        params.validate(ModulationKind::Otfs)?;
        let (m, n) = (config.delay_length, config.num_symbols);
        if m < 2 || n < 2 {
            return Err(CsrdError::invalid_parameter(
                "delay_length",
                format!("grid {}x{} must be at least 2x2", m, n),
            ));
        }
        match config.padding {
            OtfsPadding::Cp | OtfsPadding::Zp if config.pad_length > m => {
                return Err(CsrdError::InconsistentConfiguration(format!(
                    "per-slot pad {} exceeds delay length {}",
                    config.pad_length, m
                )))
            }
            OtfsPadding::Rcp | OtfsPadding::Rzp if config.pad_length > m * n => {
                return Err(CsrdError::InconsistentConfiguration(format!(
                    "frame pad {} exceeds frame size {}",
                    config.pad_length,
                    m * n
                )))
            }
            _ => {}
        }
        if !(0.0..=1.0).contains(&config.rolloff) {
            return Err(CsrdError::invalid_parameter("rolloff", "must lie in [0, 1]"));
        }

        let filter = if params.samples_per_symbol > 1 {
            Some(design_pulse(
                PulseShape::Sqrt,
                config.rolloff,
                config.span.max(2),
                params.samples_per_symbol,
            ))
        } else {
            None
        };

        Ok(Self {
            constellation: config.subcarrier_modulation.constellation(params.order)?,
            ostbc: OstbcEncoder::new(params.num_tx_antennas, config.ostbc_rate)?,
            delay_fft: FftProcessor::new(m),
            doppler_fft: FftProcessor::new(n),
            filter,
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
            ModulatorConfig::Otfs(c) => Ok(Box::new(Self::new(*params, c.clone())?)),
            other => Err(config_mismatch(kind, other)),
        }
    }

    /// Symbols per frame, `M * N`
    pub fn frame_symbols(&self) -> usize {
        self.config.delay_length * self.config.num_symbols
    }

    /// Padded frame length before pulse shaping
    pub fn frame_length(&self) -> usize {
        self.config.padding.frame_length(
            self.config.delay_length,
            self.config.num_symbols,
            self.config.pad_length,
        )
    }

    /// Delay-Doppler grid (column-major, `x[n * M + m]`) to unpadded time
    /// samples, slot after slot.
    pub fn grid_to_time(&self, grid: &[IQSample]) -> Vec<IQSample> {
        let (m, n) = (self.config.delay_length, self.config.num_symbols);
        let mut work = grid.to_vec();

        // ISFFT, delay axis
        for column in work.chunks_exact_mut(m) {
            self.delay_fft.fft_unitary(column);
        }
        // ISFFT, Doppler axis
        let mut row = vec![IQSample::new(0.0, 0.0); n];
        for k in 0..m {
            for (l, v) in row.iter_mut().enumerate() {
                *v = work[l * m + k];
            }
            self.doppler_fft.ifft_unitary(&mut row);
            for (l, v) in row.iter().enumerate() {
                work[l * m + k] = *v;
            }
        }
        // Heisenberg: one IFFT per time slot
        for slot in work.chunks_exact_mut(m) {
            self.delay_fft.ifft_unitary(slot);
        }
        work
    }

    /// Inverse of [`grid_to_time`](Self::grid_to_time)
    pub fn time_to_grid(&self, time: &[IQSample]) -> Vec<IQSample> {
        let (m, n) = (self.config.delay_length, self.config.num_symbols);
        let mut work = time.to_vec();
        for slot in work.chunks_exact_mut(m) {
            self.delay_fft.fft_unitary(slot);
        }
        let mut row = vec![IQSample::new(0.0, 0.0); n];
        for k in 0..m {
            for (l, v) in row.iter_mut().enumerate() {
                *v = work[l * m + k];
            }
            self.doppler_fft.fft_unitary(&mut row);
            for (l, v) in row.iter().enumerate() {
                work[l * m + k] = *v;
            }
        }
        for column in work.chunks_exact_mut(m) {
            self.delay_fft.ifft_unitary(column);
        }
        work
    }

    fn pad_frame(&self, time: &[IQSample]) -> Vec<IQSample> {
        let m = self.config.delay_length;
        let pad = self.config.pad_length;
        let zero = IQSample::new(0.0, 0.0);
        let mut out = Vec::with_capacity(self.frame_length());
        match self.config.padding {
            OtfsPadding::Cp => {
                for slot in time.chunks_exact(m) {
                    out.extend_from_slice(&slot[m - pad..]);
                    out.extend_from_slice(slot);
                }
            }
            OtfsPadding::Zp => {
                for slot in time.chunks_exact(m) {
                    out.extend_from_slice(slot);
                    out.extend(std::iter::repeat(zero).take(pad));
                }
            }
            OtfsPadding::Rcp => {
                out.extend_from_slice(&time[time.len() - pad..]);
                out.extend_from_slice(time);
            }
            OtfsPadding::Rzp => {
                out.extend_from_slice(time);
                out.extend(std::iter::repeat(zero).take(pad));
            }
            OtfsPadding::None => out.extend_from_slice(time),
        }
        out
    }

    fn strip_frame(&self, frame: &[IQSample]) -> Vec<IQSample> {
        let m = self.config.delay_length;
        let pad = self.config.pad_length;
        match self.config.padding {
            OtfsPadding::Cp => frame
                .chunks_exact(m + pad)
                .flat_map(|slot| slot[pad..].iter().copied())
                .collect(),
            OtfsPadding::Zp => frame
                .chunks_exact(m + pad)
                .flat_map(|slot| slot[..m].iter().copied())
                .collect(),
            OtfsPadding::Rcp => frame[pad..].to_vec(),
            OtfsPadding::Rzp => frame[..frame.len() - pad].to_vec(),
            OtfsPadding::None => frame.to_vec(),
        }
    }

    /// Recover delay-Doppler symbols from one antenna's unshaped, padded
    /// stream (sps = 1). Trailing partial frames are ignored.
    pub fn demodulate(&self, samples: &[IQSample]) -> CsrdResult<Vec<IQSample>> {
        if self.filter.is_some() {
            return Err(CsrdError::InconsistentConfiguration(
                "demodulation requires samples_per_symbol = 1".into(),
            ));
        }
        let frame_len = self.frame_length();
        Ok(samples
            .chunks_exact(frame_len)
            .flat_map(|frame| self.time_to_grid(&self.strip_frame(frame)))
            .collect())
    }
}

impl Modulator for OtfsModulator {
    fn kind(&self) -> ModulationKind {
        ModulationKind::Otfs
    }

    fn params(&self) -> &ModulatorParams {
        &self.params
    }

    fn config(&self) -> ModulatorConfig {
        ModulatorConfig::Otfs(self.config.clone())
    }

    fn modulate(&self, message: &Message) -> CsrdResult<Modulated> {
        let bits = expect_bits(message)?;
        let mut symbols: Vec<IQSample> = bits_to_symbols(bits, bits_per_symbol(self.params.order))
            .into_iter()
            .map(|v| self.constellation[v])
            .collect();
        symbols.truncate(self.ostbc.usable_symbols(symbols.len()));

        let per_frame = self.frame_symbols();
        let streams = self.ostbc.encode(&symbols);
        let frames = streams.first().map_or(0, Vec::len) / per_frame;
        if frames == 0 {
            return Err(CsrdError::EmptyInput(format!(
                "{} symbols cannot fill one {}x{} OTFS frame",
                symbols.len(),
                self.config.delay_length,
                self.config.num_symbols
            )));
        }

        let sps = self.params.samples_per_symbol;
        let samples: Vec<Vec<IQSample>> = streams
            .iter()
            .map(|stream| {
                let padded: Vec<IQSample> = stream
                    .chunks_exact(per_frame)
                    .take(frames)
                    .flat_map(|grid| self.pad_frame(&self.grid_to_time(grid)))
                    .collect();
                match &self.filter {
                    Some(filter) => filter.shape(&padded, sps),
                    None => padded,
                }
            })
            .collect();

        let (k, t) = self.ostbc.block_size();
        Ok(Modulated {
            bandwidth: Bandwidth::Scalar(occupied_bandwidth_mimo(&samples, self.params.sample_rate)),
            samples,
            symbol_rate: self.symbol_rate(),
            symbols_used: (frames * per_frame) / t * k,
        })
    }

    /// Delay-Doppler symbols per second, net of padding and code rate
    fn symbol_rate(&self) -> f64 {
        let sps = self.params.samples_per_symbol.max(1);
        let frame_rate = self.params.sample_rate / (self.frame_length() * sps) as f64;
        frame_rate * self.frame_symbols() as f64 * self.ostbc.code_rate()
    }

    /// Whole OTFS frames only
    fn message_length_for(&self, num_symbols: usize) -> usize {
        block_message_length(&self.ostbc, self.params.order, num_symbols, self.frame_symbols())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessagePayload, MessageSource, RandomBitSource};

    fn config(padding: OtfsPadding, pad_length: usize) -> OtfsConfig {
        OtfsConfig {
            delay_length: 128,
            num_symbols: 10,
            padding,
            pad_length,
            subcarrier_modulation: SubcarrierModulation::Qam,
            rolloff: 0.25,
            span: 8,
            ostbc_rate: OstbcRate::One,
        }
    }

    #[test]
    fn test_frame_lengths_per_padding() {
        let params = ModulatorParams::new(4, 1, 1e6);
        let msg = RandomBitSource::new(3).generate(2 * 128 * 10, 1e6).unwrap();
        let expected = [
            (OtfsPadding::Cp, (128 + 16) * 10),
            (OtfsPadding::Zp, (128 + 16) * 10),
            (OtfsPadding::Rzp, 128 * 10 + 16),
            (OtfsPadding::Rcp, 128 * 10 + 16),
            (OtfsPadding::None, 128 * 10),
        ];
        for (padding, len) in expected {
            let pad = if padding == OtfsPadding::None { 0 } else { 16 };
            let m = OtfsModulator::new(params, config(padding, pad)).unwrap();
            let out = m.modulate(&msg).unwrap();
            assert_eq!(out.samples[0].len(), len, "{:?}", padding);
        }
    }

    #[test]
    fn test_demodulate_recovers_grid() {
        let params = ModulatorParams::new(16, 1, 1e6);
        for padding in OtfsPadding::ALL {
            let pad = if padding == OtfsPadding::None { 0 } else { 12 };
            let m = OtfsModulator::new(params, config(padding, pad)).unwrap();
            let msg = RandomBitSource::new(5).generate(4 * 1280 * 2, 1e6).unwrap();
            let out = m.modulate(&msg).unwrap();
            let recovered = m.demodulate(&out.samples[0]).unwrap();

            let bits = match &msg.payload {
                MessagePayload::Bits(bits) => bits.clone(),
                other => panic!("unexpected payload {:?}", other),
            };
            let expected: Vec<IQSample> = bits_to_symbols(&bits, 4)
                .into_iter()
                .map(|v| m.constellation[v])
                .collect();
            assert_eq!(recovered.len(), 2 * 1280);
            for (a, b) in recovered.iter().zip(expected.iter()) {
                assert!((a - b).norm() < 1e-9, "{:?}: {} vs {}", padding, a, b);
            }
        }
    }

    #[test]
    fn test_cp_is_copy_of_slot_tail() {
        let m = OtfsModulator::new(ModulatorParams::new(4, 1, 1e6), config(OtfsPadding::Cp, 16)).unwrap();
        let msg = RandomBitSource::new(11).generate(2 * 1280, 1e6).unwrap();
        let out = &m.modulate(&msg).unwrap().samples[0];
        for i in 0..16 {
            assert!((out[i] - out[128 + i]).norm() < 1e-12);
        }
    }

    #[test]
    fn test_shaped_output_length() {
        let m = OtfsModulator::new(ModulatorParams::new(4, 4, 1e6), config(OtfsPadding::Zp, 16)).unwrap();
        let msg = RandomBitSource::new(12).generate(2 * 1280, 1e6).unwrap();
        let out = m.modulate(&msg).unwrap();
        assert_eq!(out.samples[0].len(), (128 + 16) * 10 * 4);
        assert!(out.bandwidth.width() < 1e6 / 4.0 * 1.6);
        assert!(m.demodulate(&out.samples[0]).is_err());
    }

    #[test]
    fn test_oversized_pad_rejected() {
        assert!(matches!(
            OtfsModulator::new(ModulatorParams::new(4, 1, 1e6), config(OtfsPadding::Cp, 200)),
            Err(CsrdError::InconsistentConfiguration(_))
        ));
    }

    #[test]
    fn test_message_length_fills_whole_frames() {
        let m = OtfsModulator::new(ModulatorParams::new(4, 1, 1e6), config(OtfsPadding::Cp, 16)).unwrap();
        let frame = (128 + 16) * 10;
        assert!((m.symbol_rate() - 1e6 / frame as f64 * 1280.0).abs() < 1e-6);
        // A short segment still gets one frame
        assert_eq!(m.message_length_for(10), 1280 * 2);

        let duration = 5e-3;
        let n = (duration * m.symbol_rate()).floor() as usize;
        let msg = RandomBitSource::new(5).generate(m.message_length_for(n), 1e6).unwrap();
        let out = m.modulate(&msg).unwrap();
        assert_eq!(out.samples[0].len(), 3 * frame);
        assert!(out.samples[0].len() as f64 <= duration * 1e6);
    }
}

