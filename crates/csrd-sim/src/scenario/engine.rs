//! Scenario engine: per-frame orchestration of the signal chain
//!
//! For every frame, in order:
//!
//! ```text
//!  segment ─► message ─► modulate ─► transmit RF ─► place at start_time ─┐
//!  segment ─► ...                                                        Σ per transmitter
//!                                                                        │
//!            for each receiver:  channel(tx, rx) per transmitter ─► Σ ─► receive RF ─► Frame
//! ```
//!
//! Blocks are created on first use and cached for the life of the engine,
//! so frame N+1 continues the state left by frame N. Configuration errors
//! abort the scenario; a failing processing step only marks the affected
//! segment or link.

use super::config::{ScenarioConfig, SegmentConfig, TransmitterConfig};
use crate::error::{SimError, SimResult};
use crate::factory::{
    Catalogs, ChannelFactory, ChannelRequest, MessageFactory, ModulationFactory, ModulationRequest, Processed,
    ReceiveFactory, ReceiveRequest, TransmitFactory, TransmitRequest,
};
use csrd_core::types::{AntennaSamples, IQSample};
use csrd_core::{Bandwidth, ErrorTag, ModulatorParams, ModulatorRegistry, Signal};
use serde::{Deserialize, Serialize};

/// Label for one segment as seen by one receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentAnnotation {
    pub transmitter_id: String,
    pub segment_id: String,
    pub modulation: String,
    pub order: usize,
    /// Carrier relative to the receiver's centre (Hz)
    pub carrier_frequency: f64,
    pub bandwidth: Option<Bandwidth>,
    pub start_time: f64,
    pub duration: f64,
    pub power_dbm: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulator: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorTag>,
}

/// Channel outcome for one transmitter/receiver link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkAnnotation {
    pub transmitter_id: String,
    pub channel_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorTag>,
}

/// One receiver's view of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_id: usize,
    pub receiver_id: String,
    pub signal: Signal,
    pub annotations: Vec<SegmentAnnotation>,
    pub links: Vec<LinkAnnotation>,
}

/// Every frame of a finished scenario, in order
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioOutput {
    pub scenario_id: String,
    pub frames: Vec<Frame>,
}

impl ScenarioOutput {
    pub fn failed_segments(&self) -> usize {
        self.frames
            .iter()
            .flat_map(|f| f.annotations.iter())
            .filter(|a| a.error.is_some())
            .count()
    }
}

/// Transmitter output for one frame, before any channel
struct TxFrame {
    transmitter_id: String,
    signal: Signal,
    segments: Vec<PlacedSegment>,
}

struct PlacedSegment {
    segment_id: String,
    modulation: String,
    order: usize,
    carrier_frequency: f64,
    bandwidth: Option<Bandwidth>,
    start_time: f64,
    duration: f64,
    power_dbm: f64,
    modulator: Option<serde_json::Value>,
    error: Option<ErrorTag>,
}

pub struct ScenarioEngine {
    config: ScenarioConfig,
    messages: MessageFactory,
    modulation: ModulationFactory,
    transmit: TransmitFactory,
    channel: ChannelFactory,
    receive: ReceiveFactory,
    next_frame: usize,
}

impl ScenarioEngine {
    pub fn new(config: ScenarioConfig, catalogs: &Catalogs) -> SimResult<Self> {
        Self::with_registry(config, catalogs, ModulatorRegistry::with_defaults())
    }

    pub fn with_registry(config: ScenarioConfig, catalogs: &Catalogs, registry: ModulatorRegistry) -> SimResult<Self> {
        config.validate()?;
        let seed = config.seed;
        let mut engine = Self {
            messages: MessageFactory::new(catalogs.message.clone(), seed)?,
            modulation: ModulationFactory::new(registry, catalogs.modulation.clone(), seed)?,
            transmit: TransmitFactory::new(catalogs.transmit.clone(), seed)?,
            channel: ChannelFactory::new(catalogs.channel.clone(), seed)?,
            receive: ReceiveFactory::new(catalogs.receive.clone(), seed)?,
            config,
            next_frame: 0,
        };
        engine.pin_models()?;
        tracing::info!(
            scenario = %engine.config.id,
            frames = engine.config.num_frames,
            transmitters = engine.config.transmitters.len(),
            receivers = engine.config.receivers.len(),
            "scenario engine ready"
        );
        Ok(engine)
    }

    fn pin_models(&mut self) -> SimResult<()> {
        for tx in &self.config.transmitters {
            if let Some(model) = &tx.rf_model {
                self.transmit.pin_model(&tx.id, model)?;
            }
            if let Some(model) = &self.config.channel {
                for rx in &self.config.receivers {
                    self.channel.pin_model(&tx.id, &rx.id, model)?;
                }
            }
        }
        for rx in &self.config.receivers {
            if let Some(model) = &rx.rf_model {
                self.receive.pin_model(&rx.id, model)?;
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn is_done(&self) -> bool {
        self.next_frame >= self.config.num_frames
    }

    /// Produce the next frame, one entry per receiver
    pub fn run_frame(&mut self) -> SimResult<Vec<Frame>> {
        if self.is_done() {
            return Err(SimError::scenario(&self.config.id, "all frames already generated"));
        }
        let frame_id = self.next_frame;
        let span = tracing::debug_span!("frame", scenario = %self.config.id, frame = frame_id);
        let _guard = span.enter();

        let transmitters = self.config.transmitters.clone();
        let tx_frames = transmitters
            .iter()
            .map(|tx| self.transmitter_frame(tx))
            .collect::<SimResult<Vec<_>>>()?;

        let receivers = self.config.receivers.clone();
        let mut frames = Vec::with_capacity(receivers.len());
        for rx in &receivers {
            let frame_len = self.config.frame_samples();
            let mut composite: AntennaSamples = vec![vec![IQSample::new(0.0, 0.0); frame_len]; rx.num_antennas];
            let mut links = Vec::with_capacity(tx_frames.len());

            for tx_frame in &tx_frames {
                let request = ChannelRequest {
                    transmitter: &tx_frame.transmitter_id,
                    receiver: &rx.id,
                    frame: frame_id,
                    num_rx_antennas: rx.num_antennas,
                };
                let processed = self.channel.process(&request, &tx_frame.signal)?;
                let received = processed.into_signal();
                links.push(LinkAnnotation {
                    transmitter_id: tx_frame.transmitter_id.clone(),
                    channel_model: self.channel.model_for(&tx_frame.transmitter_id, &rx.id).ok(),
                    error: received.error.clone(),
                });
                accumulate(&mut composite, &received.samples);
            }

            let composite = Signal::new(composite, self.config.sample_rate)
                .with_bandwidth(Bandwidth::Scalar(self.config.sample_rate));
            let request = ReceiveRequest {
                receiver: &rx.id,
                sample_rate: rx.sample_rate,
                tuning_offset: rx.tuning_offset,
            };
            let signal = self.receive.process(&request, &composite)?.into_signal();

            let annotations = tx_frames
                .iter()
                .flat_map(|tx| {
                    tx.segments.iter().map(move |seg| SegmentAnnotation {
                        transmitter_id: tx.transmitter_id.clone(),
                        segment_id: seg.segment_id.clone(),
                        modulation: seg.modulation.clone(),
                        order: seg.order,
                        carrier_frequency: seg.carrier_frequency - rx.tuning_offset,
                        bandwidth: seg.bandwidth,
                        start_time: seg.start_time,
                        duration: seg.duration,
                        power_dbm: seg.power_dbm,
                        modulator: seg.modulator.clone(),
                        error: seg.error.clone(),
                    })
                })
                .collect();

            frames.push(Frame {
                frame_id,
                receiver_id: rx.id.clone(),
                signal,
                annotations,
                links,
            });
        }

        self.next_frame += 1;
        Ok(frames)
    }

    /// Every remaining frame, then teardown
    pub fn run(mut self) -> SimResult<ScenarioOutput> {
        let mut frames = Vec::new();
        while !self.is_done() {
            frames.extend(self.run_frame()?);
        }
        self.teardown();
        Ok(ScenarioOutput {
            scenario_id: self.config.id.clone(),
            frames,
        })
    }

    /// Release every cached block
    pub fn teardown(&mut self) {
        self.messages.release();
        self.modulation.release();
        self.transmit.release();
        self.channel.release();
        self.receive.release();
        tracing::debug!(scenario = %self.config.id, "scenario torn down");
    }

    fn transmitter_frame(&mut self, tx: &TransmitterConfig) -> SimResult<TxFrame> {
        let fs = self.config.sample_rate;
        let frame_len = self.config.frame_samples();
        let mut buffer: AntennaSamples = vec![vec![IQSample::new(0.0, 0.0); frame_len]; tx.num_antennas];
        let mut segments = Vec::with_capacity(tx.segments.len());

        for seg in &tx.segments {
            let (placed, signal) = self.segment(tx, seg)?;
            if let Some(signal) = signal {
                let start = ((seg.placement.start_time * fs).round() as usize).min(frame_len);
                let window = (seg.duration_within(self.config.frame_duration) * fs).round() as usize;
                let limit = (start + window).min(frame_len);
                let end = (start + signal.len()).min(limit);
                if start + signal.len() > limit {
                    tracing::debug!(
                        transmitter = %tx.id,
                        segment = %seg.id,
                        dropped = start + signal.len() - limit,
                        "segment truncated to its placement window"
                    );
                }
                for (dst, src) in buffer.iter_mut().zip(signal.samples.iter()) {
                    for (d, s) in dst[start..end].iter_mut().zip(src.iter()) {
                        *d += s;
                    }
                }
                segments.push(PlacedSegment {
                    start_time: start as f64 / fs,
                    duration: (end - start) as f64 / fs,
                    ..placed
                });
            } else {
                segments.push(placed);
            }
        }

        let signal = Signal::new(buffer, fs).with_bandwidth(Bandwidth::Scalar(fs));
        Ok(TxFrame {
            transmitter_id: tx.id.clone(),
            signal,
            segments,
        })
    }

    /// Generate, modulate and transmit one segment.
    ///
    /// Returns the annotation and, unless a step failed, the signal at the
    /// composition rate.
    fn segment(&mut self, tx: &TransmitterConfig, seg: &SegmentConfig) -> SimResult<(PlacedSegment, Option<Signal>)> {
        let fs = self.config.sample_rate;
        let params = ModulatorParams::new(seg.order, seg.samples_per_symbol, seg.sample_rate_or(fs))
            .with_antennas(tx.num_antennas);
        let mut request = ModulationRequest::new(&tx.id, &seg.id, &seg.modulation, params).with_overrides(&seg.overrides);
        if let Some(bw) = seg.placement.target_bandwidth {
            request = request.with_target_bandwidth(bw);
        }

        // One modulator draw serves the rate, the length and the modulation
        self.modulation.redraw(&request);
        let symbol_rate = self.modulation.symbol_rate(&request)?;
        let length = match seg.message.length {
            Some(length) => length,
            None => {
                let symbols = (seg.duration_within(self.config.frame_duration) * symbol_rate + 1e-9).floor() as usize;
                self.modulation.message_length(&request, symbols.max(1))?
            }
        };
        let message = self
            .messages
            .generate(&tx.id, &seg.id, &seg.message.kind, length, symbol_rate)?;

        let mut placed = PlacedSegment {
            segment_id: seg.id.clone(),
            modulation: seg.modulation.clone(),
            order: seg.order,
            carrier_frequency: seg.placement.frequency_offset,
            bandwidth: None,
            start_time: seg.placement.start_time,
            duration: 0.0,
            power_dbm: tx.power_dbm,
            modulator: None,
            error: None,
        };

        let baseband = match self.modulation.modulate(&request, &message)? {
            Processed::Completed(signal) => signal,
            failed => {
                placed.error = failed.into_signal().error;
                return Ok((placed, None));
            }
        };
        placed.modulator = baseband.metadata.get("modulator").cloned();
        if let Some(label) = &baseband.modulation {
            placed.modulation = label.clone();
        }

        let tx_request = TransmitRequest {
            transmitter: &tx.id,
            segment: &seg.id,
            sample_rate: fs,
            frequency_offset: seg.placement.frequency_offset,
            power_dbm: tx.power_dbm,
        };
        match self.transmit.process(&tx_request, &baseband)? {
            Processed::Completed(signal) => {
                placed.carrier_frequency = signal.carrier_frequency;
                placed.bandwidth = signal.bandwidth;
                Ok((placed, Some(signal)))
            }
            failed => {
                placed.bandwidth = baseband.bandwidth;
                placed.error = failed.into_signal().error;
                Ok((placed, None))
            }
        }
    }
}

fn accumulate(into: &mut AntennaSamples, from: &[Vec<IQSample>]) {
    for (dst, src) in into.iter_mut().zip(from.iter()) {
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d += s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::config::{MessageConfig, Placement, ReceiverConfig};
    use csrd_core::{ModulatorOverrides, ParamSpec};

    fn qam_segment() -> SegmentConfig {
        SegmentConfig {
            id: "s0".into(),
            modulation: "QAM".into(),
            order: 16,
            samples_per_symbol: 4,
            sample_rate: None,
            message: MessageConfig {
                kind: "RandomBit".into(),
                length: Some(4000),
            },
            placement: Placement::default(),
            overrides: ModulatorOverrides {
                rolloff: Some(ParamSpec::Fixed(0.35)),
                span: Some(ParamSpec::Fixed(8)),
                ..ModulatorOverrides::default()
            },
        }
    }

    fn scenario(segments: Vec<SegmentConfig>) -> ScenarioConfig {
        ScenarioConfig {
            id: "qam16".into(),
            seed: 42,
            num_frames: 2,
            frame_duration: 0.004,
            sample_rate: 1e6,
            receivers: vec![ReceiverConfig {
                id: "rx0".into(),
                sample_rate: 1e6,
                num_antennas: 1,
                tuning_offset: 0.0,
                rf_model: None,
            }],
            transmitters: vec![TransmitterConfig {
                id: "tx0".into(),
                num_antennas: 1,
                rf_model: None,
                power_dbm: 0.0,
                segments,
            }],
            channel: None,
        }
    }

    #[test]
    fn test_qam16_end_to_end_length_and_bandwidth() {
        let mut engine = ScenarioEngine::new(scenario(vec![qam_segment()]), &Catalogs::default()).unwrap();
        let frames = engine.run_frame().unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        // 4000 bits → 1000 symbols × 4 samples
        assert_eq!(frame.signal.len(), 4000);
        assert_eq!(frame.annotations.len(), 1);
        let note = &frame.annotations[0];
        assert!(note.error.is_none());
        assert!((note.duration - 0.004).abs() < 1e-12);
        let expected = 250e3 * 1.35;
        let bw = note.bandwidth.unwrap().width();
        assert!((bw - expected).abs() / expected < 0.1, "bandwidth {}", bw);
    }

    #[test]
    fn test_frames_run_in_order_then_stop() {
        let mut engine = ScenarioEngine::new(scenario(vec![qam_segment()]), &Catalogs::default()).unwrap();
        assert_eq!(engine.run_frame().unwrap()[0].frame_id, 0);
        assert_eq!(engine.run_frame().unwrap()[0].frame_id, 1);
        assert!(engine.is_done());
        assert!(engine.run_frame().is_err());
    }

    #[test]
    fn test_same_seed_same_output() {
        let a = ScenarioEngine::new(scenario(vec![qam_segment()]), &Catalogs::default())
            .unwrap()
            .run()
            .unwrap();
        let b = ScenarioEngine::new(scenario(vec![qam_segment()]), &Catalogs::default())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(a.frames.len(), 2);
        assert_eq!(a, b);
        assert_ne!(a.frames[0].signal.samples, a.frames[1].signal.samples);
    }

    #[test]
    fn test_failed_segment_is_annotated_not_fatal() {
        let mut audio_into_qam = qam_segment();
        audio_into_qam.id = "bad".into();
        audio_into_qam.message.kind = "Audio".into();
        let output = ScenarioEngine::new(scenario(vec![qam_segment(), audio_into_qam]), &Catalogs::default())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(output.failed_segments(), 2);
        let frame = &output.frames[0];
        let bad = frame.annotations.iter().find(|a| a.segment_id == "bad").unwrap();
        assert_eq!(bad.error.as_ref().unwrap().code, "payload_mismatch");
        assert_eq!(frame.signal.len(), 4000);
    }

    #[test]
    fn test_unknown_modulation_aborts_scenario() {
        let mut seg = qam_segment();
        seg.modulation = "LORA".into();
        let mut engine = ScenarioEngine::new(scenario(vec![seg]), &Catalogs::default()).unwrap();
        assert!(engine.run_frame().is_err());
    }

    #[test]
    fn test_unknown_pinned_model_rejected() {
        let mut cfg = scenario(vec![qam_segment()]);
        cfg.transmitters[0].rf_model = Some("missing".into());
        assert!(ScenarioEngine::new(cfg, &Catalogs::default()).is_err());
    }

    fn multicarrier_segment(modulation: &str, overrides: ModulatorOverrides) -> SegmentConfig {
        SegmentConfig {
            id: modulation.to_lowercase(),
            modulation: modulation.into(),
            order: 4,
            samples_per_symbol: 1,
            sample_rate: None,
            message: MessageConfig {
                kind: "RandomBit".into(),
                length: None,
            },
            placement: Placement {
                duration: Some(0.001),
                ..Placement::default()
            },
            overrides,
        }
    }

    #[test]
    fn test_ofdm_segment_fits_its_duration() {
        let overrides = ModulatorOverrides {
            fft_length: Some(ParamSpec::Fixed(64)),
            cyclic_prefix_fraction: Some(ParamSpec::Fixed(0.25)),
            ..ModulatorOverrides::default()
        };
        let mut engine =
            ScenarioEngine::new(scenario(vec![multicarrier_segment("OFDM", overrides)]), &Catalogs::default()).unwrap();
        let frame = engine.run_frame().unwrap().remove(0);
        let note = &frame.annotations[0];
        assert!(note.error.is_none(), "{:?}", note.error);
        assert!(note.duration > 0.0);
        assert!(note.duration <= 0.001 + 1e-12, "duration {}", note.duration);
    }

    #[test]
    fn test_otfs_segment_fits_its_duration() {
        let overrides = ModulatorOverrides {
            delay_length: Some(ParamSpec::Fixed(16)),
            num_symbols: Some(ParamSpec::Fixed(8)),
            ..ModulatorOverrides::default()
        };
        let mut seg = multicarrier_segment("OTFS", overrides);
        seg.placement.duration = Some(0.002);
        let mut engine = ScenarioEngine::new(scenario(vec![seg]), &Catalogs::default()).unwrap();
        let frame = engine.run_frame().unwrap().remove(0);
        let note = &frame.annotations[0];
        assert!(note.error.is_none(), "{:?}", note.error);
        assert!(note.duration > 0.0);
        assert!(note.duration <= 0.002 + 1e-12, "duration {}", note.duration);
    }

    #[test]
    fn test_large_fft_without_length_still_modulates() {
        let overrides = ModulatorOverrides {
            fft_length: Some(ParamSpec::Fixed(2048)),
            ..ModulatorOverrides::default()
        };
        let mut seg = multicarrier_segment("OFDM", overrides);
        seg.placement.duration = None;
        let mut engine = ScenarioEngine::new(scenario(vec![seg]), &Catalogs::default()).unwrap();
        let frame = engine.run_frame().unwrap().remove(0);
        assert!(frame.annotations[0].error.is_none(), "{:?}", frame.annotations[0].error);
        assert!(frame.annotations[0].duration > 0.0);
    }

    #[test]
    fn test_explicit_length_clipped_to_placement_duration() {
        let mut seg = qam_segment();
        seg.placement.start_time = 0.001;
        seg.placement.duration = Some(0.001);
        let mut engine = ScenarioEngine::new(scenario(vec![seg]), &Catalogs::default()).unwrap();
        let frame = engine.run_frame().unwrap().remove(0);
        let note = &frame.annotations[0];
        // 4000 modulated samples, 1000 placed
        assert!((note.start_time - 0.001).abs() < 1e-12);
        assert!((note.duration - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_redraw_policy_draws_once_per_segment() {
        let mut catalogs = Catalogs::default();
        catalogs.modulation.policy = crate::factory::ParameterPolicy::RedrawPerCall;
        let overrides = ModulatorOverrides {
            fft_length: Some(ParamSpec::choices(vec![64, 128, 256])),
            ..ModulatorOverrides::default()
        };
        let mut engine = ScenarioEngine::new(scenario(vec![multicarrier_segment("OFDM", overrides)]), &catalogs).unwrap();
        for _ in 0..2 {
            let frame = engine.run_frame().unwrap().remove(0);
            let note = &frame.annotations[0];
            assert!(note.error.is_none(), "{:?}", note.error);
            assert!(note.duration <= 0.001 + 1e-12, "duration {}", note.duration);
        }
    }

    #[test]
    fn test_carrier_is_relative_to_receiver() {
        let mut seg = qam_segment();
        seg.placement.frequency_offset = 200e3;
        let mut cfg = scenario(vec![seg]);
        cfg.receivers[0].tuning_offset = 50e3;
        let mut engine = ScenarioEngine::new(cfg, &Catalogs::default()).unwrap();
        let frame = engine.run_frame().unwrap().remove(0);
        assert!((frame.annotations[0].carrier_frequency - 150e3).abs() < 1e-6);
    }
}
