//! RF model catalogs
//!
//! A model describes one family of radios as parameter ranges. Drawing a
//! model yields a concrete front-end spec; the transmit and receive
//! factories draw once per block instance.
//!
//! ```yaml
//! transmit:
//!   models:
//!     low_cost:
//!       iq_imbalance: { amplitude_db: { min: 0.0, max: 1.0 }, phase_deg: { min: 0.0, max: 5.0 } }
//!       dc_offset: { level_dbc: { min: -40.0, max: -25.0 } }
//!       nonlinearity: { method: Saleh model, backoff_db: { min: 3.0, max: 9.0 } }
//! ```

use super::impairments::{DcOffset, IqImbalance};
use super::nonlinearity::NonlinearitySpec;
use super::phase_noise::{PhaseNoiseConfig, PhaseNoiseMask};
use super::receive::{Agc, RxFrontEndSpec};
use super::transmit::TxFrontEndSpec;
use crate::error::{CsrdError, CsrdResult};
use crate::modulate::ParamSpec;
use rand::Rng;
use serde::{Deserialize, Serialize};

fn zero() -> ParamSpec<f64> {
    ParamSpec::Fixed(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IqImbalanceRange {
    #[serde(default = "zero")]
    pub amplitude_db: ParamSpec<f64>,
    #[serde(default = "zero")]
    pub phase_deg: ParamSpec<f64>,
}

impl IqImbalanceRange {
    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> CsrdResult<IqImbalance> {
        Ok(IqImbalance::new(
            self.amplitude_db.draw("iq_imbalance.amplitude_db", rng)?,
            self.phase_deg.draw("iq_imbalance.phase_deg", rng)?,
        ))
    }

    fn validate(&self) -> CsrdResult<()> {
        self.amplitude_db.validate("iq_imbalance.amplitude_db")?;
        self.phase_deg.validate("iq_imbalance.phase_deg")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcOffsetRange {
    pub level_dbc: ParamSpec<f64>,
    #[serde(default = "zero")]
    pub phase_deg: ParamSpec<f64>,
}

impl DcOffsetRange {
    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> CsrdResult<DcOffset> {
        Ok(DcOffset::new(
            self.level_dbc.draw("dc_offset.level_dbc", rng)?,
            self.phase_deg.draw("dc_offset.phase_deg", rng)?,
        ))
    }

    fn validate(&self) -> CsrdResult<()> {
        self.level_dbc.validate("dc_offset.level_dbc")?;
        self.phase_deg.validate("dc_offset.phase_deg")
    }
}

/// Phase noise mask with a drawable level per offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseNoiseRange {
    pub offsets_hz: Vec<f64>,
    pub levels_dbc_hz: Vec<ParamSpec<f64>>,
}

impl PhaseNoiseRange {
    fn validate(&self) -> CsrdResult<()> {
        if self.offsets_hz.len() != self.levels_dbc_hz.len() {
            return Err(CsrdError::InconsistentConfiguration(format!(
                "phase noise has {} offsets but {} levels",
                self.offsets_hz.len(),
                self.levels_dbc_hz.len()
            )));
        }
        for level in &self.levels_dbc_hz {
            level.validate("phase_noise.levels_dbc_hz")?;
        }
        // Probe the mask shape with the lower bound of each level
        let probe: Vec<f64> = self
            .levels_dbc_hz
            .iter()
            .map(|l| match l {
                ParamSpec::Fixed(v) => *v,
                ParamSpec::Range { min, .. } => *min,
                ParamSpec::Choices { choices } => choices.first().copied().unwrap_or(-100.0),
            })
            .collect();
        PhaseNoiseMask::new(self.offsets_hz.clone(), probe).validate()
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> CsrdResult<PhaseNoiseConfig> {
        let levels = self
            .levels_dbc_hz
            .iter()
            .map(|l| l.draw("phase_noise.levels_dbc_hz", rng))
            .collect::<CsrdResult<Vec<_>>>()?;
        Ok(PhaseNoiseConfig {
            mask: PhaseNoiseMask::new(self.offsets_hz.clone(), levels),
            seed: None,
        })
    }
}

/// Transmitter impairment ranges. An absent stage is not applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TxModel {
    #[serde(default)]
    pub iq_imbalance: Option<IqImbalanceRange>,
    #[serde(default)]
    pub dc_offset: Option<DcOffsetRange>,
    #[serde(default)]
    pub phase_noise: Option<PhaseNoiseRange>,
    #[serde(default)]
    pub nonlinearity: Option<NonlinearitySpec>,
}

impl TxModel {
    pub fn validate(&self) -> CsrdResult<()> {
        if let Some(r) = &self.iq_imbalance {
            r.validate()?;
        }
        if let Some(r) = &self.dc_offset {
            r.validate()?;
        }
        if let Some(r) = &self.phase_noise {
            r.validate()?;
        }
        if let Some(r) = &self.nonlinearity {
            r.validate()?;
        }
        Ok(())
    }

    /// Draw a transmit front end that outputs at `sample_rate`, shifted by
    /// `frequency_offset`, at `power_dbm` total power
    pub fn draw<R: Rng + ?Sized>(
        &self,
        sample_rate: f64,
        frequency_offset: f64,
        power_dbm: f64,
        seed: u64,
        rng: &mut R,
    ) -> CsrdResult<TxFrontEndSpec> {
        let mut spec = TxFrontEndSpec::ideal(sample_rate, frequency_offset, power_dbm).with_seed(seed);
        spec.iq_imbalance = self.iq_imbalance.as_ref().map(|r| r.draw(rng)).transpose()?;
        spec.dc_offset = self.dc_offset.as_ref().map(|r| r.draw(rng)).transpose()?;
        spec.phase_noise = self.phase_noise.as_ref().map(|r| r.draw(rng)).transpose()?;
        spec.amplifier = self.nonlinearity.as_ref().map(|r| r.draw(rng)).transpose()?;
        Ok(spec)
    }
}

/// Receiver impairment ranges
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RxModel {
    #[serde(default)]
    pub noise_figure_db: Option<ParamSpec<f64>>,
    #[serde(default)]
    pub nonlinearity: Option<NonlinearitySpec>,
    #[serde(default)]
    pub phase_noise: Option<PhaseNoiseRange>,
    #[serde(default)]
    pub dc_offset: Option<DcOffsetRange>,
    #[serde(default)]
    pub iq_imbalance: Option<IqImbalanceRange>,
    #[serde(default)]
    pub agc: Option<Agc>,
}

impl RxModel {
    pub fn validate(&self) -> CsrdResult<()> {
        if let Some(nf) = &self.noise_figure_db {
            nf.validate("noise_figure_db")?;
            if !nf.within(&0.0, &f64::MAX) {
                return Err(CsrdError::invalid_parameter(
                    "noise_figure_db",
                    "noise figure cannot be negative",
                ));
            }
        }
        if let Some(r) = &self.nonlinearity {
            r.validate()?;
        }
        if let Some(r) = &self.phase_noise {
            r.validate()?;
        }
        if let Some(r) = &self.dc_offset {
            r.validate()?;
        }
        if let Some(r) = &self.iq_imbalance {
            r.validate()?;
        }
        Ok(())
    }

    pub fn draw<R: Rng + ?Sized>(
        &self,
        sample_rate: f64,
        tuning_offset: f64,
        seed: u64,
        rng: &mut R,
    ) -> CsrdResult<RxFrontEndSpec> {
        let mut spec = RxFrontEndSpec::ideal(sample_rate).with_seed(seed);
        spec.tuning_offset = tuning_offset;
        spec.noise_figure_db = self
            .noise_figure_db
            .as_ref()
            .map(|nf| nf.draw("noise_figure_db", rng))
            .transpose()?;
        spec.amplifier = self.nonlinearity.as_ref().map(|r| r.draw(rng)).transpose()?;
        spec.phase_noise = self.phase_noise.as_ref().map(|r| r.draw(rng)).transpose()?;
        spec.dc_offset = self.dc_offset.as_ref().map(|r| r.draw(rng)).transpose()?;
        spec.iq_imbalance = self.iq_imbalance.as_ref().map(|r| r.draw(rng)).transpose()?;
        spec.agc = self.agc;
        Ok(spec)
    }
}
