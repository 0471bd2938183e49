//! Weight updates with an optional penalty.
//!
//! The intercept is never penalized, so updaters operate on `coef` only.

use crate::error::{ConfigError, ShapeError};
use clap::ValueEnum;
use serde::Deserialize;
use std::fmt::Display;
use std::str::FromStr;

/// Penalty names.
#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Penalty {
    /// No regularization and no regularization messages.
    #[value(name = "none")]
    None,
    /// $`\frac{\alpha}{2} \lVert w \rVert_2^2`$
    #[default]
    #[value(name = "L2")]
    L2,
    /// $`\alpha \lVert w \rVert_1`$
    #[value(name = "L1")]
    L1,
}

impl Display for Penalty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Penalty::None => write!(f, "none"),
            Penalty::L2 => write!(f, "L2"),
            Penalty::L1 => write!(f, "L1"),
        }
    }
}

impl FromStr for Penalty {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(Penalty::None),
            "L2" | "l2" => Ok(Penalty::L2),
            "L1" | "l1" => Ok(Penalty::L1),
            _ => Err(ConfigError::UnsupportedMethod {
                kind: "penalty",
                name: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Penalty {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Penalized update rule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Updater {
    /// $`w \leftarrow w - \delta - \eta_t \alpha w`$
    L2 {
        /// Penalty strength.
        alpha: f64,
    },
    /// $`w \leftarrow \mathrm{sign}(u) \max(0, |u| - \eta_t \alpha)`$ with $`u = w - \delta`$
    L1 {
        /// Penalty strength.
        alpha: f64,
    },
}

impl Updater {
    /// Updater for `penalty`, `None` when no penalty is configured.
    pub fn new(penalty: Penalty, alpha: f64) -> Option<Self> {
        match penalty {
            Penalty::None => None,
            Penalty::L2 => Some(Updater::L2 { alpha }),
            Penalty::L1 => Some(Updater::L1 { alpha }),
        }
    }

    /// Apply `delta` to `coef` in place, `lr` being the learning rate of the current iteration.
    pub fn update_coef(&self, coef: &mut [f64], delta: &[f64], lr: f64) -> Result<(), ShapeError> {
        check_len(coef, delta)?;
        match *self {
            Updater::L2 { alpha } => coef
                .iter_mut()
                .zip(delta)
                .for_each(|(c, d)| *c = *c - d - lr * alpha * *c),
            Updater::L1 { alpha } => coef.iter_mut().zip(delta).for_each(|(c, d)| {
                let u = *c - d;
                *c = u.signum() * (u.abs() - lr * alpha).max(0.0);
            }),
        }
        Ok(())
    }

    /// Regularization term added to the loss.
    pub fn loss_norm(&self, coef: &[f64]) -> f64 {
        match *self {
            Updater::L2 { alpha } => 0.5 * alpha * coef.iter().map(|c| c * c).sum::<f64>(),
            Updater::L1 { alpha } => alpha * coef.iter().map(|c| c.abs()).sum::<f64>(),
        }
    }
}

/// Unpenalized update `coef -= delta`.
pub fn plain_update(coef: &mut [f64], delta: &[f64]) -> Result<(), ShapeError> {
    check_len(coef, delta)?;
    coef.iter_mut().zip(delta).for_each(|(c, d)| *c -= d);
    Ok(())
}

fn check_len(coef: &[f64], delta: &[f64]) -> Result<(), ShapeError> {
    if coef.len() != delta.len() {
        return Err(ShapeError::DimensionMismatch {
            expected: coef.len(),
            actual: delta.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2() {
        let up = Updater::new(Penalty::L2, 0.5).unwrap();
        let mut coef = vec![1.0, -2.0];
        up.update_coef(&mut coef, &[0.5, 0.5], 0.1).unwrap();
        assert!((coef[0] - (1.0 - 0.5 - 0.05)).abs() < 1e-12);
        assert!((coef[1] - (-2.0 - 0.5 + 0.1)).abs() < 1e-12);

        assert_eq!(up.loss_norm(&[1.0, -2.0]), 0.5 * 0.5 * 5.0);
    }

    #[test]
    fn test_l1_soft_threshold() {
        let up = Updater::new(Penalty::L1, 1.0).unwrap();
        let mut coef = vec![1.0, 0.05, -1.0];
        up.update_coef(&mut coef, &[0.0, 0.0, 0.0], 0.1).unwrap();
        assert!((coef[0] - 0.9).abs() < 1e-12);
        assert_eq!(coef[1], 0.0);
        assert!((coef[2] + 0.9).abs() < 1e-12);

        assert_eq!(up.loss_norm(&[1.0, -2.0]), 3.0);
    }

    #[test]
    fn test_no_penalty() {
        assert_eq!(Updater::new(Penalty::None, 1.0), None);

        let mut coef = vec![1.0, 2.0];
        plain_update(&mut coef, &[0.5, -1.0]).unwrap();
        assert_eq!(coef, vec![0.5, 3.0]);
        assert!(plain_update(&mut coef, &[1.0]).is_err());
    }

    #[test]
    fn test_parse_penalty() {
        assert_eq!("L2".parse::<Penalty>().unwrap(), Penalty::L2);
        assert_eq!("none".parse::<Penalty>().unwrap(), Penalty::None);
        assert!("elastic".parse::<Penalty>().is_err());
    }
}
