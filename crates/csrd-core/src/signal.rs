//! # Signal
//!
//! The value that flows through the whole pipeline: message → modulator →
//! transmit front-end → channel → receive front-end.
//!
//! A [`Signal`] carries a fixed set of required fields (samples, sample rate,
//! start time, carrier) plus a free-form [`SignalMetadata`] side channel in
//! which every stage records the parameters it applied, so a dataset record
//! can be reproduced later.
//!
//! ## Bandwidth
//!
//! Single-carrier modulators report a scalar two-sided occupied bandwidth.
//! Multicarrier modulators with asymmetric guard bands report the lower and
//! upper edge offsets relative to the carrier instead:
//!
//! ```text
//!            lower              upper
//!   ----------|--------[fc]--------|---------->  f
//!             <----- width() ----->
//! ```

use crate::error::{CsrdError, CsrdResult};
use crate::types::{complex_ops, AntennaSamples, IQSample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Provenance/debug metadata attached to a signal
pub type SignalMetadata = BTreeMap<String, serde_json::Value>;

/// Occupied bandwidth of a signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bandwidth {
    /// Two-sided occupied bandwidth in Hz, centred on the carrier
    Scalar(f64),
    /// Edge offsets from the carrier in Hz (`lower` is usually negative)
    Offsets { lower: f64, upper: f64 },
}

impl Bandwidth {
    /// Total spectral extent in Hz
    pub fn width(&self) -> f64 {
        match *self {
            Bandwidth::Scalar(bw) => bw,
            Bandwidth::Offsets { lower, upper } => upper - lower,
        }
    }

    /// Lower and upper edge offsets relative to the carrier
    pub fn edges(&self) -> (f64, f64) {
        match *self {
            Bandwidth::Scalar(bw) => (-bw / 2.0, bw / 2.0),
            Bandwidth::Offsets { lower, upper } => (lower, upper),
        }
    }

    pub fn is_valid(&self) -> bool {
        let (lo, hi) = self.edges();
        lo.is_finite() && hi.is_finite() && hi > lo
    }

    /// Limit the extent to `sample_rate`, keeping the shape of the value
    pub fn clamp_to(self, sample_rate: f64) -> Self {
        match self {
            Bandwidth::Scalar(bw) => Bandwidth::Scalar(bw.min(sample_rate)),
            Bandwidth::Offsets { lower, upper } => {
                let half = sample_rate / 2.0;
                Bandwidth::Offsets {
                    lower: lower.max(-half),
                    upper: upper.min(half),
                }
            }
        }
    }
}

/// Error tag attached to a signal whose processing step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTag {
    /// Pipeline stage that failed (e.g. "modulation", "channel")
    pub stage: String,
    /// Machine-readable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ErrorTag {
    pub fn new(stage: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A multi-antenna complex baseband (or RF-translated) waveform
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Samples, indexed `[antenna][time]`
    pub samples: AntennaSamples,
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Occupied bandwidth, `None` until a block reports it
    pub bandwidth: Option<Bandwidth>,
    /// Placement offset within the frame (seconds)
    pub start_time: f64,
    /// Carrier / centre frequency offset in Hz (0 for baseband)
    pub carrier_frequency: f64,
    /// Modulation TypeID used for annotation
    pub modulation: Option<String>,
    /// Impairment/channel parameters echoed for reproducibility
    pub metadata: SignalMetadata,
    /// Set when a stage failed and this is a pass-through of its input
    pub error: Option<ErrorTag>,
}

impl Signal {
    /// Create a signal from per-antenna sample columns
    pub fn new(samples: AntennaSamples, sample_rate: f64) -> Self {
        Self {
            samples,
            sample_rate,
            bandwidth: None,
            start_time: 0.0,
            carrier_frequency: 0.0,
            modulation: None,
            metadata: SignalMetadata::new(),
            error: None,
        }
    }

    /// Create a single-antenna signal
    pub fn single(samples: Vec<IQSample>, sample_rate: f64) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn with_bandwidth(mut self, bandwidth: Bandwidth) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }

    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_carrier(mut self, carrier_frequency: f64) -> Self {
        self.carrier_frequency = carrier_frequency;
        self
    }

    pub fn with_modulation(mut self, type_id: impl Into<String>) -> Self {
        self.modulation = Some(type_id.into());
        self
    }

    /// Number of antenna columns
    pub fn num_antennas(&self) -> usize {
        self.samples.len()
    }

    /// Number of time samples per antenna
    pub fn len(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.len() as f64 / self.sample_rate
        } else {
            0.0
        }
    }

    /// Mean power across every antenna and sample
    pub fn mean_power(&self) -> f64 {
        let total: usize = self.samples.iter().map(Vec::len).sum();
        if total == 0 {
            return 0.0;
        }
        self.samples
            .iter()
            .map(|col| complex_ops::mean_power(col) * col.len() as f64)
            .sum::<f64>()
            / total as f64
    }

    /// Record a provenance entry
    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Check the input contract shared by every processing block.
    ///
    /// The returned error names the offending field.
    pub fn validate(&self) -> CsrdResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(CsrdError::invalid_field(
                "sample_rate",
                format!("must be positive and finite, got {}", self.sample_rate),
            ));
        }
        if !self.start_time.is_finite() || self.start_time < 0.0 {
            return Err(CsrdError::invalid_field(
                "start_time",
                format!("must be finite and non-negative, got {}", self.start_time),
            ));
        }
        if !self.carrier_frequency.is_finite() {
            return Err(CsrdError::invalid_field("carrier_frequency", "must be finite"));
        }
        if self.samples.is_empty() {
            return Err(CsrdError::MissingField("samples".into()));
        }
        let len = self.len();
        if self.samples.iter().any(|col| col.len() != len) {
            return Err(CsrdError::invalid_field(
                "samples",
                "antenna columns have different lengths",
            ));
        }
        Ok(())
    }

    /// Require a specific antenna count
    pub fn expect_antennas(&self, expected: usize) -> CsrdResult<()> {
        if self.num_antennas() != expected {
            return Err(CsrdError::AntennaMismatch {
                expected,
                actual: self.num_antennas(),
            });
        }
        Ok(())
    }

    /// Guarantee a bandwidth is present and consistent with the sample rate.
    ///
    /// Fallback order when no block reported one: `symbol_rate` when known,
    /// otherwise the Nyquist span (the full sample rate).
    pub fn ensure_bandwidth(&mut self, symbol_rate: Option<f64>) -> Bandwidth {
        let reported = self.bandwidth.filter(Bandwidth::is_valid);
        let bw = match reported {
            Some(bw) => bw,
            None => match symbol_rate.filter(|r| r.is_finite() && *r > 0.0) {
                Some(rate) => Bandwidth::Scalar(rate),
                None => Bandwidth::Scalar(self.sample_rate),
            },
        };
        let bw = bw.clamp_to(self.sample_rate);
        self.bandwidth = Some(bw);
        bw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(n: usize) -> Vec<IQSample> {
        (0..n).map(|i| IQSample::from_polar(1.0, i as f64 * 0.1)).collect()
    }

    #[test]
    fn test_bandwidth_width_and_edges() {
        let bw = Bandwidth::Scalar(200e3);
        assert_eq!(bw.edges(), (-100e3, 100e3));
        let off = Bandwidth::Offsets {
            lower: -30e3,
            upper: 50e3,
        };
        assert!((off.width() - 80e3).abs() < 1e-9);
        assert!(off.is_valid());
        assert!(!Bandwidth::Scalar(0.0).is_valid());
    }

    #[test]
    fn test_validate_names_missing_field() {
        let sig = Signal::single(tone(16), 0.0);
        match sig.validate() {
            Err(CsrdError::InvalidField { field, .. }) => assert_eq!(field, "sample_rate"),
            other => panic!("unexpected {:?}", other),
        }

        let sig = Signal::single(tone(16), 1e6).with_start_time(f64::NAN);
        match sig.validate() {
            Err(CsrdError::InvalidField { field, .. }) => assert_eq!(field, "start_time"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_validate_ragged_columns() {
        let sig = Signal::new(vec![tone(16), tone(15)], 1e6);
        assert!(sig.validate().is_err());
        let sig = Signal::new(vec![tone(16), tone(16)], 1e6);
        assert!(sig.validate().is_ok());
        assert_eq!(sig.num_antennas(), 2);
    }

    #[test]
    fn test_ensure_bandwidth_fallbacks() {
        let mut sig = Signal::single(tone(100), 1e6);
        assert_eq!(sig.ensure_bandwidth(Some(250e3)), Bandwidth::Scalar(250e3));

        let mut sig = Signal::single(tone(100), 1e6);
        assert_eq!(sig.ensure_bandwidth(None), Bandwidth::Scalar(1e6));

        let mut sig = Signal::single(tone(100), 1e6).with_bandwidth(Bandwidth::Scalar(3e6));
        assert_eq!(sig.ensure_bandwidth(None), Bandwidth::Scalar(1e6));
    }

    #[test]
    fn test_mean_power_and_duration() {
        let sig = Signal::new(vec![tone(1000), tone(1000)], 1e3);
        assert!((sig.mean_power() - 1.0).abs() < 1e-12);
        assert!((sig.duration() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bandwidth_serde_shapes() {
        let s = serde_json::to_string(&Bandwidth::Scalar(1.5)).unwrap();
        assert_eq!(s, "1.5");
        let o: Bandwidth = serde_json::from_str(r#"{"lower":-1.0,"upper":2.0}"#).unwrap();
        assert_eq!(o, Bandwidth::Offsets { lower: -1.0, upper: 2.0 });
    }
}
