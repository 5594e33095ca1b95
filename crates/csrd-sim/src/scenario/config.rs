//! Scenario description: who transmits what, where, and who listens

use crate::error::{SimError, SimResult};
use csrd_core::ModulatorOverrides;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

fn default_frames() -> usize {
    1
}

fn default_antennas() -> usize {
    1
}

fn default_message_kind() -> String {
    "RandomBit".to_string()
}

/// One scenario: a fixed set of transmitters and receivers, run for
/// `num_frames` frames of `frame_duration` seconds each
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    pub id: String,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_frames")]
    pub num_frames: usize,
    /// Seconds per frame
    pub frame_duration: f64,
    /// Rate at which transmitter outputs are composed (Hz)
    pub sample_rate: f64,
    pub receivers: Vec<ReceiverConfig>,
    #[serde(default)]
    pub transmitters: Vec<TransmitterConfig>,
    /// Channel model name applied to every link; drawn per link when absent
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiverConfig {
    pub id: String,
    pub sample_rate: f64,
    #[serde(default = "default_antennas")]
    pub num_antennas: usize,
    /// Receiver centre relative to the composition baseband (Hz)
    #[serde(default)]
    pub tuning_offset: f64,
    #[serde(default)]
    pub rf_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransmitterConfig {
    pub id: String,
    #[serde(default = "default_antennas")]
    pub num_antennas: usize,
    #[serde(default)]
    pub rf_model: Option<String>,
    /// Total transmit power across antennas (dBm, 1 Ω)
    #[serde(default)]
    pub power_dbm: f64,
    pub segments: Vec<SegmentConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentConfig {
    pub id: String,
    pub modulation: String,
    #[serde(default)]
    pub order: usize,
    pub samples_per_symbol: usize,
    /// Modulator output rate; the scenario rate when absent
    #[serde(default)]
    pub sample_rate: Option<f64>,
    #[serde(default)]
    pub message: MessageConfig,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub overrides: ModulatorOverrides,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageConfig {
    #[serde(default = "default_message_kind")]
    pub kind: String,
    /// Message elements per frame; derived from the segment duration when absent
    #[serde(default)]
    pub length: Option<usize>,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            kind: default_message_kind(),
            length: None,
        }
    }
}

/// Where a segment sits in time and frequency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Placement {
    /// Offset from the start of the frame (s)
    #[serde(default)]
    pub start_time: f64,
    /// Carrier offset from the composition baseband (Hz)
    #[serde(default)]
    pub frequency_offset: f64,
    /// Annotated bandwidth, replacing the modulator's own figure
    #[serde(default)]
    pub target_bandwidth: Option<f64>,
    /// Segment length (s); runs to the end of the frame when absent
    #[serde(default)]
    pub duration: Option<f64>,
}

impl SegmentConfig {
    pub fn sample_rate_or(&self, scenario_rate: f64) -> f64 {
        self.sample_rate.unwrap_or(scenario_rate)
    }

    /// Seconds of signal this segment should fill
    pub fn duration_within(&self, frame_duration: f64) -> f64 {
        let remaining = (frame_duration - self.placement.start_time).max(0.0);
        self.placement.duration.map_or(remaining, |d| d.min(remaining))
    }
}

impl ScenarioConfig {
    /// Samples per frame at the composition rate
    pub fn frame_samples(&self) -> usize {
        (self.frame_duration * self.sample_rate).round() as usize
    }

    pub fn validate(&self) -> SimResult<()> {
        let fail = |reason: String| Err(SimError::scenario(&self.id, reason));

        if self.id.trim().is_empty() {
            return Err(SimError::scenario("<unnamed>", "scenario id is empty"));
        }
        if self.num_frames == 0 {
            return fail("num_frames must be at least 1".into());
        }
        if !(self.frame_duration.is_finite() && self.frame_duration > 0.0) {
            return fail(format!("frame_duration must be positive, got {}", self.frame_duration));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return fail(format!("sample_rate must be positive, got {}", self.sample_rate));
        }
        if self.frame_samples() == 0 {
            return fail("frame holds no samples at the scenario rate".into());
        }
        if self.receivers.is_empty() {
            return fail("at least one receiver is required".into());
        }

        let mut rx_ids = BTreeSet::new();
        for rx in &self.receivers {
            if !rx_ids.insert(rx.id.as_str()) {
                return fail(format!("duplicate receiver id '{}'", rx.id));
            }
            if !(rx.sample_rate.is_finite() && rx.sample_rate > 0.0) {
                return fail(format!("receiver '{}': sample_rate must be positive", rx.id));
            }
            if rx.num_antennas == 0 {
                return fail(format!("receiver '{}': num_antennas must be at least 1", rx.id));
            }
            if !rx.tuning_offset.is_finite() {
                return fail(format!("receiver '{}': tuning_offset must be finite", rx.id));
            }
        }

        let mut tx_ids = BTreeSet::new();
        for tx in &self.transmitters {
            if !tx_ids.insert(tx.id.as_str()) {
                return fail(format!("duplicate transmitter id '{}'", tx.id));
            }
            if tx.num_antennas == 0 {
                return fail(format!("transmitter '{}': num_antennas must be at least 1", tx.id));
            }
            if !tx.power_dbm.is_finite() {
                return fail(format!("transmitter '{}': power_dbm must be finite", tx.id));
            }
            let mut seg_ids = BTreeSet::new();
            for seg in &tx.segments {
                let at = format!("{}/{}", tx.id, seg.id);
                if !seg_ids.insert(seg.id.as_str()) {
                    return fail(format!("duplicate segment id '{}'", at));
                }
                if seg.samples_per_symbol == 0 {
                    return fail(format!("segment '{}': samples_per_symbol must be at least 1", at));
                }
                if let Some(rate) = seg.sample_rate {
                    if !(rate.is_finite() && rate > 0.0) {
                        return fail(format!("segment '{}': sample_rate must be positive", at));
                    }
                }
                let p = &seg.placement;
                if !(p.start_time.is_finite() && p.start_time >= 0.0 && p.start_time < self.frame_duration) {
                    return fail(format!("segment '{}': start_time must lie inside the frame", at));
                }
                if !p.frequency_offset.is_finite() {
                    return fail(format!("segment '{}': frequency_offset must be finite", at));
                }
                if p.target_bandwidth.is_some_and(|bw| !(bw.is_finite() && bw > 0.0)) {
                    return fail(format!("segment '{}': target_bandwidth must be positive", at));
                }
                if p.duration.is_some_and(|d| !(d.is_finite() && d > 0.0)) {
                    return fail(format!("segment '{}': duration must be positive", at));
                }
                if seg.message.length == Some(0) {
                    return fail(format!("segment '{}': message length must be positive", at));
                }
                seg.overrides
                    .validate()
                    .map_err(|e| SimError::scenario(&self.id, format!("segment '{}': {}", at, e)))?;
            }
        }
        if self.transmitters.is_empty() {
            tracing::warn!(scenario = %self.id, "scenario has no transmitters, frames will hold receiver noise only");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
id: two-tone
seed: 7
num_frames: 2
frame_duration: 0.004
sample_rate: 1.0e6
receivers:
  - id: rx0
    sample_rate: 1.0e6
transmitters:
  - id: tx0
    power_dbm: 10.0
    segments:
      - id: s0
        modulation: QAM
        order: 16
        samples_per_symbol: 4
        message: { length: 4000 }
        placement: { frequency_offset: 100.0e3 }
        overrides: { rolloff: 0.35, span: 8 }
"#;

    fn parsed() -> ScenarioConfig {
        serde_yaml::from_str(YAML).unwrap()
    }

    #[test]
    fn test_parse_and_defaults() {
        let cfg = parsed();
        cfg.validate().unwrap();
        assert_eq!(cfg.frame_samples(), 4000);
        let rx = &cfg.receivers[0];
        assert_eq!(rx.num_antennas, 1);
        assert_eq!(rx.tuning_offset, 0.0);
        let seg = &cfg.transmitters[0].segments[0];
        assert_eq!(seg.message.kind, "RandomBit");
        assert_eq!(seg.sample_rate_or(cfg.sample_rate), 1e6);
        assert!((seg.duration_within(cfg.frame_duration) - 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut cfg = parsed();
        let seg = cfg.transmitters[0].segments[0].clone();
        cfg.transmitters[0].segments.push(seg);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate segment"));
    }

    #[test]
    fn test_start_outside_frame_rejected() {
        let mut cfg = parsed();
        cfg.transmitters[0].segments[0].placement.start_time = 0.01;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = YAML.replace("seed: 7", "seed: 7\nframes: 3");
        assert!(serde_yaml::from_str::<ScenarioConfig>(&yaml).is_err());
    }

    #[test]
    fn test_segment_duration_clipped_to_frame() {
        let mut cfg = parsed();
        let seg = &mut cfg.transmitters[0].segments[0];
        seg.placement.start_time = 0.003;
        seg.placement.duration = Some(0.01);
        assert!((seg.duration_within(0.004) - 0.001).abs() < 1e-12);
    }
}
