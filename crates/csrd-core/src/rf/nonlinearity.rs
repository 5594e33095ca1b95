//! Memoryless amplifier nonlinearities
//!
//! Every model maps the input amplitude `r` to an output amplitude (AM/AM)
//! and a phase rotation (AM/PM), applied as `from_polar(g(r), ∠x + φ(r))`.
//! Amplitudes are normalised: the modulators deliver unit average power, and
//! an input back-off (dB) sets the operating point.
//!
//! | method        | AM/AM                                      | AM/PM                           |
//! |---------------|--------------------------------------------|---------------------------------|
//! | cubic         | G r (1 - r²/P3), clipped at the peak       | -                               |
//! | tanh          | G A tanh(r / A)                            | -                               |
//! | saleh         | α_a r / (1 + β_a r²)                       | α_φ r² / (1 + β_φ r²)           |
//! | ghorbani      | x1 r^x2 / (1 + x3 r^x2) + x4 r             | y1 r^y2 / (1 + y3 r^y2) + y4 r  |
//! | modified rapp | G r / (1 + (G r / A)^(2S))^(1/(2S))        | A_φ r^q1 / (1 + (r / B_φ)^q2)   |
//!
//! `P3` is the third-order intercept power relative to unit input power.

use crate::error::{CsrdError, CsrdResult};
use crate::modulate::params::ParamSpec;
use crate::types::IQSample;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Nonlinearity model selector, parsed from configuration `method` strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonlinearityMethod {
    Cubic,
    Tanh,
    Saleh,
    Ghorbani,
    ModifiedRapp,
}

impl NonlinearityMethod {
    pub const ALL: [NonlinearityMethod; 5] = [
        NonlinearityMethod::Cubic,
        NonlinearityMethod::Tanh,
        NonlinearityMethod::Saleh,
        NonlinearityMethod::Ghorbani,
        NonlinearityMethod::ModifiedRapp,
    ];

    /// Parse a method name such as "Cubic polynomial", "Hyperbolic tangent",
    /// "Saleh model" or "modified_rapp"
    pub fn parse(name: &str) -> CsrdResult<Self> {
        let key = name
            .to_uppercase()
            .replace([' ', '_', '-'], "")
            .trim_end_matches("MODEL")
            .to_string();
        match key.as_str() {
            "CUBIC" | "CUBICPOLYNOMIAL" | "TOI" => Ok(NonlinearityMethod::Cubic),
            "TANH" | "HYPERBOLICTANGENT" => Ok(NonlinearityMethod::Tanh),
            "SALEH" => Ok(NonlinearityMethod::Saleh),
            "GHORBANI" => Ok(NonlinearityMethod::Ghorbani),
            "MODIFIEDRAPP" | "RAPP" => Ok(NonlinearityMethod::ModifiedRapp),
            _ => Err(CsrdError::unsupported("nonlinearity.method", name)),
        }
    }
}

/// Model with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Nonlinearity {
    Cubic {
        linear_gain_db: f64,
        /// Third-order intercept relative to unit input power (dB)
        toi_db: f64,
    },
    Tanh {
        linear_gain_db: f64,
        /// Output saturation amplitude
        saturation: f64,
    },
    Saleh {
        alpha_am: f64,
        beta_am: f64,
        alpha_pm: f64,
        beta_pm: f64,
    },
    Ghorbani {
        x1: f64,
        x2: f64,
        x3: f64,
        x4: f64,
        y1: f64,
        y2: f64,
        y3: f64,
        y4: f64,
    },
    ModifiedRapp {
        linear_gain_db: f64,
        smoothness: f64,
        saturation: f64,
        /// AM/PM gain (radians)
        phase_gain: f64,
        phase_saturation: f64,
        phase_q1: f64,
        phase_q2: f64,
    },
}

impl Nonlinearity {
    /// Typical parameters for each method
    pub fn default_for(method: NonlinearityMethod) -> Self {
        match method {
            NonlinearityMethod::Cubic => Nonlinearity::Cubic {
                linear_gain_db: 0.0,
                toi_db: 10.0,
            },
            NonlinearityMethod::Tanh => Nonlinearity::Tanh {
                linear_gain_db: 0.0,
                saturation: 1.5,
            },
            NonlinearityMethod::Saleh => Nonlinearity::Saleh {
                alpha_am: 2.1587,
                beta_am: 1.1517,
                alpha_pm: 4.0033,
                beta_pm: 9.1040,
            },
            NonlinearityMethod::Ghorbani => Nonlinearity::Ghorbani {
                x1: 8.1081,
                x2: 1.5413,
                x3: 6.5202,
                x4: -0.0718,
                y1: 4.6645,
                y2: 2.0965,
                y3: 10.88,
                y4: -0.003,
            },
            NonlinearityMethod::ModifiedRapp => Nonlinearity::ModifiedRapp {
                linear_gain_db: 0.0,
                smoothness: 2.0,
                saturation: 1.5,
                phase_gain: -0.05,
                phase_saturation: 0.9,
                phase_q1: 4.0,
                phase_q2: 4.0,
            },
        }
    }

    pub fn method(&self) -> NonlinearityMethod {
        match self {
            Nonlinearity::Cubic { .. } => NonlinearityMethod::Cubic,
            Nonlinearity::Tanh { .. } => NonlinearityMethod::Tanh,
            Nonlinearity::Saleh { .. } => NonlinearityMethod::Saleh,
            Nonlinearity::Ghorbani { .. } => NonlinearityMethod::Ghorbani,
            Nonlinearity::ModifiedRapp { .. } => NonlinearityMethod::ModifiedRapp,
        }
    }

    /// Set one named parameter; unknown names are configuration errors
    pub fn set_param(&mut self, name: &str, value: f64) -> CsrdResult<()> {
        let method = self.method();
        let slot: Option<&mut f64> = match self {
            Nonlinearity::Cubic {
                linear_gain_db,
                toi_db,
            } => match name {
                "linear_gain_db" => Some(linear_gain_db),
                "toi_db" => Some(toi_db),
                _ => None,
            },
            Nonlinearity::Tanh {
                linear_gain_db,
                saturation,
            } => match name {
                "linear_gain_db" => Some(linear_gain_db),
                "saturation" => Some(saturation),
                _ => None,
            },
            Nonlinearity::Saleh {
                alpha_am,
                beta_am,
                alpha_pm,
                beta_pm,
            } => match name {
                "alpha_am" => Some(alpha_am),
                "beta_am" => Some(beta_am),
                "alpha_pm" => Some(alpha_pm),
                "beta_pm" => Some(beta_pm),
                _ => None,
            },
            Nonlinearity::Ghorbani {
                x1,
                x2,
                x3,
                x4,
                y1,
                y2,
                y3,
                y4,
            } => match name {
                "x1" => Some(x1),
                "x2" => Some(x2),
                "x3" => Some(x3),
                "x4" => Some(x4),
                "y1" => Some(y1),
                "y2" => Some(y2),
                "y3" => Some(y3),
                "y4" => Some(y4),
                _ => None,
            },
            Nonlinearity::ModifiedRapp {
                linear_gain_db,
                smoothness,
                saturation,
                phase_gain,
                phase_saturation,
                phase_q1,
                phase_q2,
            } => match name {
                "linear_gain_db" => Some(linear_gain_db),
                "smoothness" => Some(smoothness),
                "saturation" => Some(saturation),
                "phase_gain" => Some(phase_gain),
                "phase_saturation" => Some(phase_saturation),
                "phase_q1" => Some(phase_q1),
                "phase_q2" => Some(phase_q2),
                _ => None,
            },
        };
        match slot {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(CsrdError::unsupported(
                format!("nonlinearity.{:?}", method),
                name,
            )),
        }
    }

    /// Reject parameter sets that make the curves undefined
    pub fn validate(&self) -> CsrdResult<()> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(CsrdError::invalid_parameter(
                    format!("nonlinearity.{}", name),
                    format!("must be positive, got {}", v),
                ))
            }
        };
        match *self {
            Nonlinearity::Cubic { .. } => Ok(()),
            Nonlinearity::Tanh { saturation, .. } => positive("saturation", saturation),
            Nonlinearity::Saleh { beta_am, beta_pm, .. } => {
                if beta_am < 0.0 || beta_pm < 0.0 {
                    return Err(CsrdError::invalid_parameter(
                        "nonlinearity.beta",
                        "Saleh beta parameters must be non-negative",
                    ));
                }
                Ok(())
            }
            Nonlinearity::Ghorbani { x2, y2, .. } => {
                positive("x2", x2)?;
                positive("y2", y2)
            }
            Nonlinearity::ModifiedRapp {
                smoothness,
                saturation,
                phase_saturation,
                ..
            } => {
                positive("smoothness", smoothness)?;
                positive("saturation", saturation)?;
                positive("phase_saturation", phase_saturation)
            }
        }
    }

    /// Output amplitude for input amplitude `r`
    pub fn am_am(&self, r: f64) -> f64 {
        match *self {
            Nonlinearity::Cubic {
                linear_gain_db,
                toi_db,
            } => {
                let g = 10f64.powf(linear_gain_db / 20.0);
                let p3 = 10f64.powf(toi_db / 10.0);
                // Saturate at the peak of the cubic, r² = P3 / 3
                let r = r.min((p3 / 3.0).sqrt());
                g * r * (1.0 - r * r / p3)
            }
            Nonlinearity::Tanh {
                linear_gain_db,
                saturation,
            } => {
                let g = 10f64.powf(linear_gain_db / 20.0);
                g * saturation * (r / saturation).tanh()
            }
            Nonlinearity::Saleh { alpha_am, beta_am, .. } => alpha_am * r / (1.0 + beta_am * r * r),
            Nonlinearity::Ghorbani { x1, x2, x3, x4, .. } => {
                x1 * r.powf(x2) / (1.0 + x3 * r.powf(x2)) + x4 * r
            }
            Nonlinearity::ModifiedRapp {
                linear_gain_db,
                smoothness,
                saturation,
                ..
            } => {
                let g = 10f64.powf(linear_gain_db / 20.0);
                let p = 2.0 * smoothness;
                g * r / (1.0 + (g * r / saturation).powf(p)).powf(1.0 / p)
            }
        }
    }

    /// Phase rotation (radians) for input amplitude `r`
    pub fn am_pm(&self, r: f64) -> f64 {
        match *self {
            Nonlinearity::Cubic { .. } | Nonlinearity::Tanh { .. } => 0.0,
            Nonlinearity::Saleh { alpha_pm, beta_pm, .. } => {
                alpha_pm * r * r / (1.0 + beta_pm * r * r)
            }
            Nonlinearity::Ghorbani { y1, y2, y3, y4, .. } => {
                y1 * r.powf(y2) / (1.0 + y3 * r.powf(y2)) + y4 * r
            }
            Nonlinearity::ModifiedRapp {
                phase_gain,
                phase_saturation,
                phase_q1,
                phase_q2,
                ..
            } => phase_gain * r.powf(phase_q1) / (1.0 + (r / phase_saturation).powf(phase_q2)),
        }
    }
}

/// Amplifier stage: a nonlinearity driven at an input back-off
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amplifier {
    pub model: Nonlinearity,
    /// Input back-off (dB); larger values drive the model more linearly
    #[serde(default)]
    pub backoff_db: f64,
}

impl Amplifier {
    pub fn new(model: Nonlinearity, backoff_db: f64) -> Self {
        Self { model, backoff_db }
    }

    pub fn validate(&self) -> CsrdResult<()> {
        self.model.validate()
    }

    /// Apply in place; the back-off is undone at the output so a linear
    /// region has unit gain.
    pub fn apply(&self, samples: &mut [IQSample]) {
        let backoff = 10f64.powf(-self.backoff_db / 20.0);
        for s in samples.iter_mut() {
            let scaled = *s * backoff;
            let r = scaled.norm();
            if r < 1e-15 {
                *s = IQSample::new(0.0, 0.0);
                continue;
            }
            let g = self.model.am_am(r);
            let phi = self.model.am_pm(r);
            *s = IQSample::from_polar(g / backoff, scaled.arg() + phi);
        }
    }
}

/// Amplifier description with drawable parameters, as written in
/// configuration files:
///
/// ```yaml
/// method: Saleh model
/// backoff_db: { min: 3.0, max: 9.0 }
/// params:
///   alpha_am: { min: 1.9, max: 2.3 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NonlinearitySpec {
    pub method: String,
    #[serde(default)]
    pub backoff_db: Option<ParamSpec<f64>>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec<f64>>,
}

impl NonlinearitySpec {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            backoff_db: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, spec: ParamSpec<f64>) -> Self {
        self.params.insert(name.into(), spec);
        self
    }

    /// Validate the method name and every parameter name without drawing
    pub fn validate(&self) -> CsrdResult<()> {
        let mut probe = Nonlinearity::default_for(NonlinearityMethod::parse(&self.method)?);
        for (name, spec) in &self.params {
            spec.validate(name)?;
            probe.set_param(name, 0.0)?;
        }
        if let Some(spec) = &self.backoff_db {
            spec.validate("backoff_db")?;
        }
        Ok(())
    }

    /// Draw a concrete amplifier
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> CsrdResult<Amplifier> {
        let mut model = Nonlinearity::default_for(NonlinearityMethod::parse(&self.method)?);
        for (name, spec) in &self.params {
            model.set_param(name, spec.draw(name, rng)?)?;
        }
        model.validate()?;
        let backoff_db = match &self.backoff_db {
            Some(spec) => spec.draw("backoff_db", rng)?,
            None => 0.0,
        };
        Ok(Amplifier::new(model, backoff_db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_method_parse() {
        assert_eq!(
            NonlinearityMethod::parse("Cubic polynomial").unwrap(),
            NonlinearityMethod::Cubic
        );
        assert_eq!(
            NonlinearityMethod::parse("Hyperbolic tangent").unwrap(),
            NonlinearityMethod::Tanh
        );
        assert_eq!(
            NonlinearityMethod::parse("Saleh model").unwrap(),
            NonlinearityMethod::Saleh
        );
        assert_eq!(
            NonlinearityMethod::parse("modified_rapp").unwrap(),
            NonlinearityMethod::ModifiedRapp
        );
        assert!(matches!(
            NonlinearityMethod::parse("Volterra"),
            Err(CsrdError::UnsupportedValue { .. })
        ));
    }

    #[test]
    fn test_small_signal_is_linear() {
        for method in [
            NonlinearityMethod::Cubic,
            NonlinearityMethod::Tanh,
            NonlinearityMethod::ModifiedRapp,
        ] {
            let model = Nonlinearity::default_for(method);
            let r = 1e-3;
            assert!((model.am_am(r) / r - 1.0).abs() < 1e-3, "{:?}", method);
        }
    }

    #[test]
    fn test_compression_is_monotonic_and_bounded() {
        for method in NonlinearityMethod::ALL {
            let model = Nonlinearity::default_for(method);
            let outputs: Vec<f64> = (1..50).map(|i| model.am_am(i as f64 * 0.01)).collect();
            assert!(outputs.windows(2).all(|w| w[1] >= w[0] - 1e-12), "{:?}", method);
            assert!(outputs.iter().all(|v| v.is_finite()));
        }
        // Cubic clips at the peak of its curve
        let cubic = Nonlinearity::default_for(NonlinearityMethod::Cubic);
        assert!((cubic.am_am(100.0) - cubic.am_am(10.0)).abs() < 1e-12);
    }

    #[test]
    fn test_saleh_am_pm_rotates() {
        let amp = Amplifier::new(Nonlinearity::default_for(NonlinearityMethod::Saleh), 0.0);
        let mut s = vec![IQSample::new(0.5, 0.0)];
        amp.apply(&mut s);
        let expected_phase = 4.0033 * 0.25 / (1.0 + 9.1040 * 0.25);
        assert!((s[0].arg() - expected_phase).abs() < 1e-12);
    }

    #[test]
    fn test_backoff_linearises() {
        let model = Nonlinearity::default_for(NonlinearityMethod::Tanh);
        let x = vec![IQSample::new(1.0, 0.0)];
        let mut hard = x.clone();
        Amplifier::new(model.clone(), 0.0).apply(&mut hard);
        let mut soft = x.clone();
        Amplifier::new(model, 30.0).apply(&mut soft);
        assert!((soft[0].re - 1.0).abs() < (hard[0].re - 1.0).abs());
        assert!((soft[0].re - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_spec_draws_and_rejects_unknown_params() {
        let spec = NonlinearitySpec::new("Saleh model")
            .with_param("alpha_am", ParamSpec::range(1.9, 2.3));
        assert!(spec.validate().is_ok());
        let amp = spec.draw(&mut StdRng::seed_from_u64(4)).unwrap();
        match amp.model {
            Nonlinearity::Saleh { alpha_am, .. } => assert!((1.9..=2.3).contains(&alpha_am)),
            other => panic!("unexpected model {:?}", other),
        }

        let bad = NonlinearitySpec::new("Saleh model").with_param("x1", ParamSpec::Fixed(1.0));
        assert!(bad.validate().is_err());
        assert!(NonlinearitySpec::new("Volterra").validate().is_err());
    }

    #[test]
    fn test_spec_yaml_shape() {
        let yaml = "method: Cubic polynomial\nbackoff_db: {min: 3.0, max: 6.0}\nparams:\n  toi_db: 12.0\n";
        let spec: NonlinearitySpec = serde_yaml::from_str(yaml).unwrap();
        assert!(spec.validate().is_ok());
        assert_eq!(spec.params.get("toi_db"), Some(&ParamSpec::Fixed(12.0)));
    }
}
