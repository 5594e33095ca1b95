//! IQ imbalance and DC offset
//!
//! Both are memoryless and applied identically to every antenna.
//!
//! IQ imbalance follows the receiver-style model where the I branch is the
//! reference and the Q branch carries the gain and quadrature errors:
//!
//! ```text
//!   I' = I
//!   Q' = g (Q cos φ + I sin φ),   g = 10^(amplitude_db / 20)
//! ```
//!
//! DC offset is specified relative to the signal RMS so that the same
//! setting means the same carrier-leak level whatever the signal power.

use crate::types::{complex_ops, IQSample};
use serde::{Deserialize, Serialize};

/// Gain and phase mismatch between the I and Q paths
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IqImbalance {
    /// Q-path gain relative to I (dB)
    pub amplitude_db: f64,
    /// Quadrature phase error (degrees)
    pub phase_deg: f64,
}

impl IqImbalance {
    pub fn new(amplitude_db: f64, phase_deg: f64) -> Self {
        Self {
            amplitude_db,
            phase_deg,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.amplitude_db == 0.0 && self.phase_deg == 0.0
    }

    /// Apply in place
    pub fn apply(&self, samples: &mut [IQSample]) {
        if self.is_identity() {
            return;
        }
        let gain = 10f64.powf(self.amplitude_db / 20.0);
        let (sin_p, cos_p) = self.phase_deg.to_radians().sin_cos();
        for s in samples.iter_mut() {
            let q = gain * (s.im * cos_p + s.re * sin_p);
            *s = IQSample::new(s.re, q);
        }
    }

    /// Image rejection ratio (dB) implied by the mismatch
    pub fn image_rejection_db(&self) -> f64 {
        let g = 10f64.powf(self.amplitude_db / 20.0);
        let phi = self.phase_deg.to_radians();
        let num = 1.0 + 2.0 * g * phi.cos() + g * g;
        let den = 1.0 - 2.0 * g * phi.cos() + g * g;
        if den <= 0.0 {
            return f64::INFINITY;
        }
        10.0 * (num / den).log10()
    }
}

/// Additive complex DC offset relative to the signal RMS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DcOffset {
    /// Offset magnitude relative to the signal RMS (dBc)
    pub level_dbc: f64,
    /// Offset angle (degrees)
    #[serde(default)]
    pub phase_deg: f64,
}

impl DcOffset {
    pub fn new(level_dbc: f64, phase_deg: f64) -> Self {
        Self {
            level_dbc,
            phase_deg,
        }
    }

    /// The complex offset added to a buffer with the given RMS
    pub fn offset_for(&self, rms: f64) -> IQSample {
        IQSample::from_polar(rms * 10f64.powf(self.level_dbc / 20.0), self.phase_deg.to_radians())
    }

    /// Apply in place, measuring the RMS of `samples` first
    pub fn apply(&self, samples: &mut [IQSample]) {
        let offset = self.offset_for(complex_ops::rms(samples));
        for s in samples.iter_mut() {
            *s += offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iq_imbalance_identity() {
        let iq = IqImbalance::new(0.0, 0.0);
        let mut signal = vec![IQSample::new(0.5, 0.5), IQSample::new(1.0, -1.0)];
        let before = signal.clone();
        iq.apply(&mut signal);
        assert_eq!(signal, before);
        assert!(iq.image_rejection_db().is_infinite());
    }

    #[test]
    fn test_iq_imbalance_gain_only() {
        let iq = IqImbalance::new(6.0, 0.0);
        let mut signal = vec![IQSample::new(0.0, 1.0)];
        iq.apply(&mut signal);
        let expected_gain = 10.0_f64.powf(6.0 / 20.0);
        assert!((signal[0].im - expected_gain).abs() < 1e-12);
        assert!(signal[0].re.abs() < 1e-12);
    }

    #[test]
    fn test_iq_imbalance_phase_leaks_i_into_q() {
        let iq = IqImbalance::new(0.0, 5.0);
        let mut signal = vec![IQSample::new(1.0, 0.0)];
        iq.apply(&mut signal);
        assert!((signal[0].re - 1.0).abs() < 1e-12);
        assert!((signal[0].im - 5f64.to_radians().sin()).abs() < 1e-12);
    }

    #[test]
    fn test_image_rejection_finite_for_mismatch() {
        let irr = IqImbalance::new(0.5, 2.0).image_rejection_db();
        // 0.5 dB / 2 degrees is roughly 30 dB of image rejection
        assert!(irr > 25.0 && irr < 35.0, "irr {}", irr);
    }

    #[test]
    fn test_dc_offset_relative_to_rms() {
        let dc = DcOffset::new(-20.0, 90.0);
        let mut signal = vec![IQSample::new(2.0, 0.0), IQSample::new(-2.0, 0.0)];
        dc.apply(&mut signal);
        // rms 2, -20 dBc => 0.2 on the Q axis
        assert!((signal[0] - IQSample::new(2.0, 0.2)).norm() < 1e-12);
        assert!((signal[1] - IQSample::new(-2.0, 0.2)).norm() < 1e-12);
    }

    #[test]
    fn test_dc_offset_on_silence_is_zero() {
        let mut signal = vec![IQSample::new(0.0, 0.0); 4];
        DcOffset::new(-10.0, 0.0).apply(&mut signal);
        assert!(signal.iter().all(|s| s.norm() == 0.0));
    }
}
