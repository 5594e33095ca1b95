//! The configuration document
//!
//! One YAML file describes a whole generation run: logging, runner settings,
//! the five factory catalogs and the scenarios to simulate. Search-path and
//! file mechanics come from [`csrd_core::config`].
//!
//! ```yaml
//! version: 1
//! logging: { level: info, format: pretty }
//! runner: { num_workers: 4, output_dir: ./dataset }
//! channel:
//!   models:
//!     awgn_20db: { model: awgn, snr_db: 20.0 }
//! scenarios:
//!   - id: demo
//!     frame_duration: 0.002
//!     sample_rate: 1.0e6
//!     receivers: [{ id: rx0, sample_rate: 1.0e6 }]
//!     transmitters:
//!       - id: tx0
//!         segments: [{ id: s0, modulation: QAM, order: 16, samples_per_symbol: 4 }]
//! ```

use crate::error::{SimError, SimResult};
use crate::factory::{Catalogs, ChannelCatalog, MessageCatalog, ModulationCatalog, ReceiveCatalog, TransmitCatalog};
use crate::scenario::ScenarioConfig;
use csrd_core::config::{find_config_file, parse_yaml, read_yaml, write_yaml};
use csrd_core::observe::LogConfig;
use csrd_core::ModulatorRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Document version understood by this build
pub const CONFIG_VERSION: u32 = 1;

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./csrd_output")
}

/// Runner section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Worker threads; 0 uses every available core
    pub num_workers: usize,
    pub output_dir: PathBuf,
    /// Replaces every scenario's own seed with one derived from this
    pub seed: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            output_dir: default_output_dir(),
            seed: None,
        }
    }
}

/// Complete configuration for a generation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsrdConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub modulation: ModulationCatalog,
    #[serde(default)]
    pub message: MessageCatalog,
    #[serde(default)]
    pub transmit: TransmitCatalog,
    #[serde(default)]
    pub channel: ChannelCatalog,
    #[serde(default)]
    pub receive: ReceiveCatalog,
    #[serde(default)]
    pub scenarios: Vec<ScenarioConfig>,
}

impl Default for CsrdConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            logging: LogConfig::default(),
            runner: RunnerConfig::default(),
            modulation: ModulationCatalog::default(),
            message: MessageCatalog::default(),
            transmit: TransmitCatalog::default(),
            channel: ChannelCatalog::default(),
            receive: ReceiveCatalog::default(),
            scenarios: Vec::new(),
        }
    }
}

impl CsrdConfig {
    /// Load from the first file on the search path, or defaults when there is none.
    pub fn load() -> SimResult<Self> {
        match find_config_file()? {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                Self::load_from(&path)
            }
            None => {
                tracing::debug!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> SimResult<Self> {
        Ok(read_yaml(path)?)
    }

    pub fn parse(yaml: &str) -> SimResult<Self> {
        Ok(parse_yaml(yaml)?)
    }

    pub fn save(&self, path: &Path) -> SimResult<()> {
        Ok(write_yaml(self, path)?)
    }

    /// The factory catalogs, as handed to the runner
    pub fn catalogs(&self) -> Catalogs {
        Catalogs {
            modulation: self.modulation.clone(),
            message: self.message.clone(),
            transmit: self.transmit.clone(),
            channel: self.channel.clone(),
            receive: self.receive.clone(),
        }
    }

    /// Check the document as a whole.
    ///
    /// Beyond each section's own checks, every name a scenario uses
    /// (modulation TypeID, message type, RF model, channel model) must exist
    /// in the matching catalog.
    pub fn validate(&self) -> SimResult<()> {
        if self.version != CONFIG_VERSION {
            return Err(SimError::Config(format!(
                "unsupported config version {} (expected {})",
                self.version, CONFIG_VERSION
            )));
        }

        self.modulation.validate(&ModulatorRegistry::with_defaults())?;
        self.message.validate()?;
        self.transmit.validate()?;
        self.channel.validate()?;
        self.receive.validate()?;

        let mut ids = BTreeSet::new();
        for scenario in &self.scenarios {
            if !ids.insert(scenario.id.as_str()) {
                return Err(SimError::Config(format!("duplicate scenario id '{}'", scenario.id)));
            }
            scenario.validate()?;
            self.check_references(scenario)?;
        }
        Ok(())
    }

    fn check_references(&self, scenario: &ScenarioConfig) -> SimResult<()> {
        let missing = |what: &str, name: &str| {
            Err(SimError::scenario(
                &scenario.id,
                format!("{} '{}' is not in the catalog", what, name),
            ))
        };

        if let Some(channel) = &scenario.channel {
            if !self.channel.models.contains_key(channel) {
                return missing("channel model", channel);
            }
        }
        for rx in &scenario.receivers {
            if let Some(model) = &rx.rf_model {
                if !self.receive.models.contains_key(model) {
                    return missing("receive model", model);
                }
            }
        }
        for tx in &scenario.transmitters {
            if let Some(model) = &tx.rf_model {
                if !self.transmit.models.contains_key(model) {
                    return missing("transmit model", model);
                }
            }
            for seg in &tx.segments {
                if self.modulation.entry(&seg.modulation).is_err() {
                    return missing("modulation", &seg.modulation);
                }
                if !self.message.types.contains_key(&seg.message.kind) {
                    return missing("message type", &seg.message.kind);
                }
            }
        }
        Ok(())
    }

    /// A small, valid document covering every section
    pub fn example() -> SimResult<Self> {
        Self::parse(EXAMPLE_YAML)
    }

    pub fn example_yaml() -> &'static str {
        EXAMPLE_YAML
    }
}

const EXAMPLE_YAML: &str = r#"version: 1

logging:
  level: info
  format: pretty
  thread_ids: true

runner:
  num_workers: 0
  output_dir: ./csrd_output

modulation:
  policy: fixed_per_instance
  types:
    QAM:
      handle: QAM
      overrides:
        rolloff: { min: 0.2, max: 0.5 }
        span: 8
    PSK:
      handle: PSK
      overrides:
        rolloff: 0.35
        span: 8
    GMSK:
      handle: GMSK
      overrides:
        bandwidth_time: { choices: [0.3, 0.5] }
    OFDM:
      handle: OFDM
      overrides:
        fft_length: { choices: [64, 128] }
        cyclic_prefix_fraction: 0.25
    FM:
      handle: FM

message:
  types:
    RandomBit: { handle: RandomBit }
    Audio: { handle: Audio }

transmit:
  selection:
    policy: weighted
    weights: { ideal: 1.0, low_cost: 3.0 }
  models:
    ideal: {}
    low_cost:
      iq_imbalance: { amplitude_db: { min: 0.0, max: 1.0 }, phase_deg: { min: 0.0, max: 5.0 } }
      dc_offset: { level_dbc: { min: -40.0, max: -25.0 } }
      phase_noise:
        offsets_hz: [1000.0, 100000.0]
        levels_dbc_hz: [{ min: -90.0, max: -80.0 }, -120.0]
      nonlinearity: { method: Saleh model, backoff_db: { min: 3.0, max: 9.0 } }

channel:
  models:
    awgn_20db: { model: awgn, snr_db: 20.0 }
    rayleigh_2x2:
      model: mimo_fading
      path_delays: [0.0, 1.0e-6]
      average_path_gains_db: [0.0, -6.0]
      max_doppler_hz: 50.0
      snr_db: 25.0

receive:
  models:
    ideal: {}
    typical:
      noise_figure_db: { min: 4.0, max: 8.0 }
      agc: { target_rms: 1.0 }

scenarios:
  - id: two_emitters
    seed: 7
    num_frames: 2
    frame_duration: 0.002
    sample_rate: 1.0e6
    channel: awgn_20db
    receivers:
      - id: rx0
        sample_rate: 1.0e6
        rf_model: ideal
    transmitters:
      - id: tx0
        rf_model: ideal
        power_dbm: 0.0
        segments:
          - id: burst
            modulation: QAM
            order: 16
            samples_per_symbol: 4
            placement: { start_time: 0.0, frequency_offset: -200000.0, duration: 0.001 }
      - id: tx1
        rf_model: low_cost
        power_dbm: -3.0
        segments:
          - id: carrier
            modulation: PSK
            order: 4
            samples_per_symbol: 8
            placement: { frequency_offset: 150000.0 }
  - id: mimo_link
    seed: 11
    frame_duration: 0.001
    sample_rate: 2.0e6
    channel: rayleigh_2x2
    receivers:
      - id: rx0
        sample_rate: 2.0e6
        num_antennas: 2
        rf_model: typical
    transmitters:
      - id: tx0
        num_antennas: 2
        segments:
          - id: s0
            modulation: QAM
            order: 4
            samples_per_symbol: 4
"#;
