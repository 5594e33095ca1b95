//! Deterministic propagation between two sites
//!
//! A full ray tracer is an external collaborator; the engine only needs the
//! [`PropagationModel`] seam. [`FreeSpace`] is the in-tree model: one
//! line-of-sight ray with free-space path loss, propagation delay and the
//! matching carrier phase rotation.

use csrd_core::filters::fractional_delay_taps;
use csrd_core::types::{AntennaSamples, IQSample};
use csrd_core::{CsrdError, CsrdResult};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Antenna site position in metres (local east/north/up frame)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Site {
    pub position: [f64; 3],
}

impl Site {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { position: [x, y, z] }
    }

    pub fn distance_to(&self, other: &Site) -> f64 {
        self.position
            .iter()
            .zip(other.position.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// `(waveform, tx site, rx site) -> waveform`
pub trait PropagationModel: std::fmt::Debug + Send {
    fn name(&self) -> &str;

    /// Propagate `[tx][time]` samples at `sample_rate` to `num_rx` antennas
    fn propagate(
        &self,
        samples: &[Vec<IQSample>],
        sample_rate: f64,
        tx: &Site,
        rx: &Site,
        num_rx: usize,
    ) -> CsrdResult<AntennaSamples>;
}

/// Free-space path loss in dB
pub fn fspl_db(distance_m: f64, frequency_hz: f64) -> f64 {
    20.0 * (4.0 * PI * distance_m * frequency_hz / SPEED_OF_LIGHT).log10()
}

/// Single line-of-sight ray
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreeSpace {
    pub carrier_frequency_hz: f64,
}

impl PropagationModel for FreeSpace {
    fn name(&self) -> &str {
        "free_space"
    }

    fn propagate(
        &self,
        samples: &[Vec<IQSample>],
        sample_rate: f64,
        tx: &Site,
        rx: &Site,
        num_rx: usize,
    ) -> CsrdResult<AntennaSamples> {
        let distance = tx.distance_to(rx);
        if distance <= 0.0 {
            return Err(CsrdError::invalid_parameter("sites", "transmitter and receiver coincide"));
        }
        let delay = distance / SPEED_OF_LIGHT;
        let amplitude = 10f64.powf(-fspl_db(distance, self.carrier_frequency_hz) / 20.0);
        let rotation = IQSample::from_polar(amplitude, -2.0 * PI * self.carrier_frequency_hz * delay);
        let taps = fractional_delay_taps(delay * sample_rate, 8);

        // Combine transmit antennas coherently, then copy to each receive antenna
        let n = samples.first().map_or(0, Vec::len);
        let norm = 1.0 / (samples.len().max(1) as f64).sqrt();
        let combined: Vec<IQSample> = (0..n)
            .map(|i| samples.iter().map(|a| a[i]).sum::<IQSample>() * norm)
            .collect();
        let delayed: Vec<IQSample> = (0..n)
            .map(|i| {
                taps.iter()
                    .enumerate()
                    .take(i + 1)
                    .fold(IQSample::new(0.0, 0.0), |acc, (k, &h)| acc + combined[i - k] * h)
                    * rotation
            })
            .collect();
        Ok(vec![delayed; num_rx])
    }
}

/// Ray-tracing channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RayTracingConfig {
    pub tx_site: Site,
    pub rx_site: Site,
    pub carrier_frequency_hz: f64,
}

impl RayTracingConfig {
    pub fn validate(&self) -> CsrdResult<()> {
        if !(self.carrier_frequency_hz.is_finite() && self.carrier_frequency_hz > 0.0) {
            return Err(CsrdError::invalid_parameter("carrier_frequency_hz", "must be positive"));
        }
        if self.tx_site.distance_to(&self.rx_site) <= 0.0 {
            return Err(CsrdError::invalid_parameter("sites", "transmitter and receiver coincide"));
        }
        Ok(())
    }
}

/// Channel that delegates to a propagation model
#[derive(Debug)]
pub struct RayTracing {
    config: RayTracingConfig,
    model: Box<dyn PropagationModel>,
}

impl RayTracing {
    pub fn new(config: RayTracingConfig) -> CsrdResult<Self> {
        config.validate()?;
        let model = Box::new(FreeSpace {
            carrier_frequency_hz: config.carrier_frequency_hz,
        });
        Ok(Self { config, model })
    }

    /// Swap in an external propagation model
    pub fn with_model(mut self, model: Box<dyn PropagationModel>) -> Self {
        self.model = model;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn path_loss_db(&self) -> f64 {
        fspl_db(
            self.config.tx_site.distance_to(&self.config.rx_site),
            self.config.carrier_frequency_hz,
        )
    }

    pub fn process(&self, samples: &[Vec<IQSample>], sample_rate: f64, num_rx: usize) -> CsrdResult<AntennaSamples> {
        self.model
            .propagate(samples, sample_rate, &self.config.tx_site, &self.config.rx_site, num_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csrd_core::types::complex_ops;

    #[test]
    fn test_fspl_reference_value() {
        // 1 km at 2.4 GHz ≈ 100.05 dB
        let loss = fspl_db(1000.0, 2.4e9);
        assert!((loss - 100.05).abs() < 0.05, "fspl {}", loss);
    }

    #[test]
    fn test_free_space_power_and_delay() {
        let cfg = RayTracingConfig {
            tx_site: Site::new(0.0, 0.0, 0.0),
            rx_site: Site::new(300.0, 0.0, 0.0),
            carrier_frequency_hz: 1e9,
        };
        let rt = RayTracing::new(cfg).unwrap();
        let fs = 1e7;
        // 300 m ≈ 1.0007 µs ≈ 10 samples at 10 MHz
        let mut x = vec![IQSample::new(0.0, 0.0); 64];
        x[0] = IQSample::new(1.0, 0.0);
        let out = rt.process(&[x], fs, 2).unwrap();
        assert_eq!(out.len(), 2);
        let peak = out[0]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 10);

        let tone = vec![vec![IQSample::new(1.0, 0.0); 2000]];
        let faded = rt.process(&tone, fs, 1).unwrap();
        let loss = -10.0 * complex_ops::mean_power(&faded[0][100..]).log10();
        assert!((loss - rt.path_loss_db()).abs() < 0.1);
    }

    #[test]
    fn test_coincident_sites_rejected() {
        let cfg = RayTracingConfig {
            tx_site: Site::default(),
            rx_site: Site::default(),
            carrier_frequency_hz: 1e9,
        };
        assert!(RayTracing::new(cfg).is_err());
    }
}
