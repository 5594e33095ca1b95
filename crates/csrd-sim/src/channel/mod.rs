//! Propagation channels
//!
//! | Model | State | Antenna handling |
//! |-------|-------|------------------|
//! | `awgn` | noise RNG | pass-through, or combine and replicate when counts differ |
//! | `mimo_fading` | faders, fading clock, noise RNG | full `num_tx × num_rx` matrix |
//! | `ray_tracing` | none | combined and replicated per receive antenna |
//!
//! Lifecycle follows [`ChannelSpec::setup`] → [`ActiveChannel::step`] (any
//! number of times) → [`ActiveChannel::reset`] / [`ActiveChannel::release`].
//! The sample rate and antenna counts are fixed for the life of an active
//! channel; changing them requires a release and a fresh setup.

pub mod awgn;
pub mod mimo;
pub mod ray_tracing;

pub use awgn::{Awgn, AwgnConfig};
pub use mimo::{FadingDistribution, MimoFading, MimoFadingConfig};
pub use ray_tracing::{FreeSpace, PropagationModel, RayTracing, RayTracingConfig, Site};

use csrd_core::types::{AntennaSamples, IQSample};
use csrd_core::{CsrdError, CsrdResult, Signal};
use serde::{Deserialize, Serialize};

/// Channel model selection, tagged by `model`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ChannelModel {
    Awgn(AwgnConfig),
    MimoFading(MimoFadingConfig),
    RayTracing(RayTracingConfig),
}

impl ChannelModel {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelModel::Awgn(_) => "awgn",
            ChannelModel::MimoFading(_) => "mimo_fading",
            ChannelModel::RayTracing(_) => "ray_tracing",
        }
    }

    pub fn validate(&self, sample_rate: f64) -> CsrdResult<()> {
        match self {
            ChannelModel::Awgn(cfg) => cfg.validate(),
            ChannelModel::MimoFading(cfg) => cfg.validate(sample_rate),
            ChannelModel::RayTracing(cfg) => cfg.validate(),
        }
    }
}

/// Everything needed to build one link's channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    pub model: ChannelModel,
    pub sample_rate: f64,
    pub num_tx_antennas: usize,
    pub num_rx_antennas: usize,
    pub seed: u64,
}

impl ChannelSpec {
    pub fn new(model: ChannelModel, sample_rate: f64) -> Self {
        Self {
            model,
            sample_rate,
            num_tx_antennas: 1,
            num_rx_antennas: 1,
            seed: 0,
        }
    }

    pub fn with_antennas(mut self, num_tx: usize, num_rx: usize) -> Self {
        self.num_tx_antennas = num_tx;
        self.num_rx_antennas = num_rx;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate and build the channel state
    pub fn setup(self) -> CsrdResult<ActiveChannel> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(CsrdError::invalid_field("sample_rate", "must be positive"));
        }
        if self.num_tx_antennas == 0 || self.num_rx_antennas == 0 {
            return Err(CsrdError::invalid_parameter("antennas", "need at least one tx and one rx antenna"));
        }
        self.model.validate(self.sample_rate)?;

        let state = match &self.model {
            ChannelModel::Awgn(cfg) => ChannelState::Awgn(Awgn::new(*cfg, self.seed)?),
            ChannelModel::MimoFading(cfg) => ChannelState::Mimo(MimoFading::new(
                cfg.clone(),
                self.sample_rate,
                self.num_tx_antennas,
                self.num_rx_antennas,
                self.seed,
            )?),
            ChannelModel::RayTracing(cfg) => ChannelState::RayTracing(RayTracing::new(cfg.clone())?),
        };
        tracing::debug!(
            model = self.model.name(),
            sample_rate = self.sample_rate,
            tx = self.num_tx_antennas,
            rx = self.num_rx_antennas,
            "channel ready"
        );
        Ok(ActiveChannel { spec: self, state })
    }
}

#[derive(Debug)]
enum ChannelState {
    Awgn(Awgn),
    Mimo(MimoFading),
    RayTracing(RayTracing),
}

/// A configured channel for one transmitter/receiver link
#[derive(Debug)]
pub struct ActiveChannel {
    spec: ChannelSpec,
    state: ChannelState,
}

impl ActiveChannel {
    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    /// True when the channel can be reused for a signal with this shape
    pub fn accepts(&self, sample_rate: f64, num_tx: usize, num_rx: usize) -> bool {
        self.spec.sample_rate == sample_rate
            && self.spec.num_tx_antennas == num_tx
            && self.spec.num_rx_antennas == num_rx
    }

    /// Reseed the per-call noise stream; fading state is untouched. The seed
    /// is kept, so a later `reset` returns to it.
    pub fn set_seed(&mut self, seed: u64) {
        self.spec.seed = seed;
        match &mut self.state {
            ChannelState::Awgn(awgn) => awgn.reseed(seed),
            ChannelState::Mimo(mimo) => mimo.reseed_noise(seed),
            ChannelState::RayTracing(_) => {}
        }
    }

    /// Return every random stream to the last seed set
    pub fn reset(&mut self) {
        let seed = self.spec.seed;
        match &mut self.state {
            ChannelState::Awgn(awgn) => awgn.reseed(seed),
            ChannelState::Mimo(mimo) => mimo.reset(seed),
            ChannelState::RayTracing(_) => {}
        }
    }

    /// Drop the channel state, handing back the spec for reconfiguration
    pub fn release(self) -> ChannelSpec {
        self.spec
    }

    /// Propagate one signal across the link
    pub fn step(&mut self, input: &Signal) -> CsrdResult<Signal> {
        input.validate()?;
        if input.sample_rate != self.spec.sample_rate {
            return Err(CsrdError::invalid_field(
                "sample_rate",
                format!(
                    "channel configured for {} Hz, signal is {} Hz",
                    self.spec.sample_rate, input.sample_rate
                ),
            ));
        }
        input.expect_antennas(self.spec.num_tx_antennas)?;

        let num_rx = self.spec.num_rx_antennas;
        let (samples, meta) = match &mut self.state {
            ChannelState::Awgn(awgn) => {
                let mut out = map_antennas(&input.samples, num_rx);
                let noise_power = awgn.apply(&mut out)?;
                (
                    out,
                    serde_json::json!({ "model": "awgn", "snr_db": awgn.snr_db(), "noise_power": noise_power }),
                )
            }
            ChannelState::Mimo(mimo) => {
                let start = mimo.elapsed();
                let out = mimo.process(&input.samples)?;
                (
                    out,
                    serde_json::json!({
                        "model": "mimo_fading",
                        "config": mimo.config(),
                        "start_time": start,
                    }),
                )
            }
            ChannelState::RayTracing(rt) => {
                let out = rt.process(&input.samples, self.spec.sample_rate, num_rx)?;
                (
                    out,
                    serde_json::json!({
                        "model": "ray_tracing",
                        "propagation": rt.model_name(),
                        "path_loss_db": rt.path_loss_db(),
                    }),
                )
            }
        };

        let mut output = input.clone();
        output.samples = samples;
        output.set_metadata("channel", meta);
        Ok(output)
    }
}

/// Match the transmit antenna count to `num_rx`
fn map_antennas(samples: &[Vec<IQSample>], num_rx: usize) -> AntennaSamples {
    if samples.len() == num_rx {
        return samples.to_vec();
    }
    let n = samples.first().map_or(0, Vec::len);
    let norm = 1.0 / (samples.len().max(1) as f64).sqrt();
    let combined: Vec<IQSample> = (0..n)
        .map(|i| samples.iter().map(|a| a[i]).sum::<IQSample>() * norm)
        .collect();
    vec![combined; num_rx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use csrd_core::types::complex_ops;

    fn tone(n: usize, antennas: usize) -> Signal {
        let samples = (0..antennas)
            .map(|_| (0..n).map(|i| IQSample::from_polar(1.0, 0.05 * i as f64)).collect())
            .collect();
        Signal::new(samples, 1e6)
    }

    #[test]
    fn test_model_yaml_tag() {
        let yaml = "model: awgn\nsnr_db: 12.0\n";
        let model: ChannelModel = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(model, ChannelModel::Awgn(AwgnConfig { snr_db: 12.0 }));
        assert_eq!(model.name(), "awgn");
    }

    #[test]
    fn test_awgn_step_writes_metadata() {
        let spec = ChannelSpec::new(ChannelModel::Awgn(AwgnConfig { snr_db: 20.0 }), 1e6).with_seed(3);
        let mut channel = spec.setup().unwrap();
        let out = channel.step(&tone(4096, 1)).unwrap();
        assert_eq!(out.samples[0].len(), 4096);
        assert!(out.metadata.contains_key("channel"));
        let p = complex_ops::mean_power(&out.samples[0]);
        assert!((p - 1.01).abs() < 0.01);
    }

    #[test]
    fn test_reset_returns_to_last_set_seed() {
        let spec = ChannelSpec::new(ChannelModel::Awgn(AwgnConfig { snr_db: 10.0 }), 1e6).with_seed(3);
        let mut channel = spec.setup().unwrap();
        channel.set_seed(77);
        assert_eq!(channel.spec().seed, 77);
        let first = channel.step(&tone(256, 1)).unwrap();
        let _ = channel.step(&tone(256, 1)).unwrap();
        channel.reset();
        let again = channel.step(&tone(256, 1)).unwrap();
        assert_eq!(first.samples, again.samples);

        let mut original = ChannelSpec::new(ChannelModel::Awgn(AwgnConfig { snr_db: 10.0 }), 1e6)
            .with_seed(3)
            .setup()
            .unwrap();
        assert_ne!(original.step(&tone(256, 1)).unwrap().samples, first.samples);
    }

    #[test]
    fn test_antenna_and_rate_mismatch_rejected() {
        let spec = ChannelSpec::new(ChannelModel::Awgn(AwgnConfig { snr_db: 20.0 }), 1e6).with_antennas(2, 1);
        let mut channel = spec.setup().unwrap();
        assert!(matches!(
            channel.step(&tone(64, 1)),
            Err(CsrdError::AntennaMismatch { expected: 2, actual: 1 })
        ));
        let mut wrong_rate = tone(64, 2);
        wrong_rate.sample_rate = 2e6;
        assert!(channel.step(&wrong_rate).is_err());
    }

    #[test]
    fn test_reset_reproduces_noise() {
        let spec = ChannelSpec::new(ChannelModel::Awgn(AwgnConfig { snr_db: 0.0 }), 1e6).with_seed(9);
        let mut channel = spec.setup().unwrap();
        let input = tone(256, 1);
        let first = channel.step(&input).unwrap();
        channel.reset();
        let again = channel.step(&input).unwrap();
        assert_eq!(first.samples, again.samples);

        channel.set_seed(10);
        let other = channel.step(&input).unwrap();
        assert_ne!(first.samples, other.samples);
    }

    #[test]
    fn test_mimo_shape_and_release() {
        let model = ChannelModel::MimoFading(MimoFadingConfig::flat(10.0));
        let spec = ChannelSpec::new(model, 1e6).with_antennas(2, 3).with_seed(1);
        let mut channel = spec.setup().unwrap();
        assert!(channel.accepts(1e6, 2, 3));
        assert!(!channel.accepts(2e6, 2, 3));
        let out = channel.step(&tone(500, 2)).unwrap();
        assert_eq!(out.num_antennas(), 3);
        let spec = channel.release();
        assert_eq!(spec.num_rx_antennas, 3);
    }
}
