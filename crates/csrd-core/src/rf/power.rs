//! Transmit power normalisation
//!
//! Samples are treated as volts across 1 Ω, so a buffer's mean power in watts
//! is `E[|x|²]`. The total over all antennas is scaled to the target.

use crate::types::complex_ops::{dbm_to_watts, mean_power, watts_to_dbm};
use crate::types::IQSample;
use serde::{Deserialize, Serialize};

/// What normalisation did, recorded in the signal metadata
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerReport {
    pub power_dbm: f64,
    pub power_watts: f64,
    /// Mean power times signal duration (J)
    pub energy_joules: f64,
    /// Linear amplitude scale applied
    pub scale: f64,
}

/// Total mean power across antennas (W)
pub fn total_power(antennas: &[Vec<IQSample>]) -> f64 {
    antennas.iter().map(|a| mean_power(a)).sum()
}

/// Scale `antennas` to `target_dbm` total power.
///
/// A silent input is left untouched and reported at its true (zero) power.
pub fn normalize_power(antennas: &mut [Vec<IQSample>], target_dbm: f64, sample_rate: f64) -> PowerReport {
    let current = total_power(antennas);
    let duration = antennas.first().map_or(0.0, |a| a.len() as f64 / sample_rate);
    if current <= 0.0 {
        return PowerReport {
            power_dbm: watts_to_dbm(0.0),
            power_watts: 0.0,
            energy_joules: 0.0,
            scale: 1.0,
        };
    }

    let target = dbm_to_watts(target_dbm);
    let scale = (target / current).sqrt();
    for antenna in antennas.iter_mut() {
        for s in antenna.iter_mut() {
            *s *= scale;
        }
    }
    PowerReport {
        power_dbm: target_dbm,
        power_watts: target,
        energy_joules: target * duration,
        scale,
    }
}
