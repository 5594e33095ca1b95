//! Parameter specifications and randomised default filling
//!
//! Configuration files describe each tunable as either a fixed value, a
//! uniform range or a list of choices:
//!
//! ```yaml
//! rolloff: 0.35                # fixed
//! rolloff: { min: 0.1, max: 0.5 }
//! span: { choices: [4, 6, 8, 10] }
//! ```
//!
//! A [`ParamSpec`] is resolved exactly once, when a block is created, by
//! drawing from an injected random source.

use crate::error::{CsrdError, CsrdResult};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A value that can be drawn uniformly between two bounds
pub trait RangeValue: Clone + PartialOrd + std::fmt::Debug {
    /// Uniform draw in `[min, max]`; `None` when ranges are meaningless for
    /// the type
    fn uniform<R: Rng + ?Sized>(min: &Self, max: &Self, rng: &mut R) -> Option<Self>;
}

impl RangeValue for f64 {
    fn uniform<R: Rng + ?Sized>(min: &Self, max: &Self, rng: &mut R) -> Option<Self> {
        if min == max {
            return Some(*min);
        }
        Some(rng.gen_range(*min..=*max))
    }
}

impl RangeValue for usize {
    fn uniform<R: Rng + ?Sized>(min: &Self, max: &Self, rng: &mut R) -> Option<Self> {
        Some(rng.gen_range(*min..=*max))
    }
}

/// Fixed value, uniform range or discrete choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSpec<T> {
    Fixed(T),
    Range { min: T, max: T },
    Choices { choices: Vec<T> },
}

impl<T: RangeValue> ParamSpec<T> {
    pub fn range(min: T, max: T) -> Self {
        ParamSpec::Range { min, max }
    }

    pub fn choices(choices: Vec<T>) -> Self {
        ParamSpec::Choices { choices }
    }

    /// Check the spec is drawable; `name` is used in the error
    pub fn validate(&self, name: &str) -> CsrdResult<()> {
        match self {
            ParamSpec::Fixed(_) => Ok(()),
            ParamSpec::Range { min, max } if min > max => Err(CsrdError::invalid_parameter(
                name,
                format!("range min {:?} exceeds max {:?}", min, max),
            )),
            ParamSpec::Range { .. } => Ok(()),
            ParamSpec::Choices { choices } if choices.is_empty() => Err(
                CsrdError::invalid_parameter(name, "choice list is empty"),
            ),
            ParamSpec::Choices { .. } => Ok(()),
        }
    }

    /// Resolve to a concrete value
    pub fn draw<R: Rng + ?Sized>(&self, name: &str, rng: &mut R) -> CsrdResult<T> {
        self.validate(name)?;
        match self {
            ParamSpec::Fixed(v) => Ok(v.clone()),
            ParamSpec::Range { min, max } => T::uniform(min, max, rng).ok_or_else(|| {
                CsrdError::invalid_parameter(name, "ranges are not supported for this parameter")
            }),
            ParamSpec::Choices { choices } => Ok(choices[rng.gen_range(0..choices.len())].clone()),
        }
    }

    /// Every value this spec can produce lies within `[lo, hi]`
    pub fn within(&self, lo: &T, hi: &T) -> bool {
        let ok = |v: &T| v >= lo && v <= hi;
        match self {
            ParamSpec::Fixed(v) => ok(v),
            ParamSpec::Range { min, max } => ok(min) && ok(max),
            ParamSpec::Choices { choices } => choices.iter().all(ok),
        }
    }
}

/// Draw `overrides` if present, otherwise the documented default spec.
pub fn resolve<T: RangeValue, R: Rng + ?Sized>(
    name: &str,
    overrides: Option<&ParamSpec<T>>,
    default: ParamSpec<T>,
    rng: &mut R,
) -> CsrdResult<T> {
    match overrides {
        Some(spec) => spec.draw(name, rng),
        None => default.draw(name, rng),
    }
}

/// Draw from a choice list for non-numeric parameters (enums)
pub fn pick<T: Clone, R: Rng + ?Sized>(
    name: &str,
    overrides: Option<&Vec<T>>,
    default: &[T],
    rng: &mut R,
) -> CsrdResult<T> {
    let options: &[T] = overrides.map_or(default, |v| v.as_slice());
    if options.is_empty() {
        return Err(CsrdError::invalid_parameter(name, "choice list is empty"));
    }
    Ok(options[rng.gen_range(0..options.len())].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_fixed_range_choices() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(ParamSpec::Fixed(0.35).draw("beta", &mut rng).unwrap(), 0.35);

        for _ in 0..100 {
            let v = ParamSpec::range(0.1, 0.5).draw("beta", &mut rng).unwrap();
            assert!((0.1..=0.5).contains(&v));
            let s = ParamSpec::choices(vec![4usize, 6, 8]).draw("span", &mut rng).unwrap();
            assert!([4, 6, 8].contains(&s));
        }
    }

    #[test]
    fn test_invalid_specs() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(ParamSpec::range(2.0, 1.0).draw("x", &mut rng).is_err());
        assert!(ParamSpec::<usize>::choices(vec![]).draw("x", &mut rng).is_err());
    }

    #[test]
    fn test_yaml_shapes() {
        let fixed: ParamSpec<f64> = serde_yaml::from_str("0.25").unwrap();
        assert_eq!(fixed, ParamSpec::Fixed(0.25));
        let range: ParamSpec<f64> = serde_yaml::from_str("{min: 0.1, max: 0.4}").unwrap();
        assert_eq!(range, ParamSpec::range(0.1, 0.4));
        let choices: ParamSpec<usize> = serde_yaml::from_str("{choices: [128, 256]}").unwrap();
        assert_eq!(choices, ParamSpec::choices(vec![128, 256]));
    }

    #[test]
    fn test_within() {
        assert!(ParamSpec::range(0.1, 0.5).within(&0.0, &1.0));
        assert!(!ParamSpec::Fixed(1.5).within(&0.0, &1.0));
    }

    #[test]
    fn test_same_seed_same_draw() {
        let spec = ParamSpec::range(0.0, 1.0);
        let a = spec.draw("x", &mut StdRng::seed_from_u64(9)).unwrap();
        let b = spec.draw("x", &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }
}
