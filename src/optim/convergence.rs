//! Convergence predicates evaluated by the arbiter over decrypted losses.

use crate::error::ConfigError;
use clap::ValueEnum;
use serde::Deserialize;
use std::fmt::Display;
use std::str::FromStr;
use tracing::debug;

/// Stateful predicate fed with one loss per batch.
pub trait ConvergeFunction {
    /// Record `loss` and tell whether training has converged.
    fn is_converge(&mut self, loss: f64) -> bool;
}

/// Converged once two consecutive losses differ by less than `eps`.
#[derive(Clone, Debug)]
pub struct DiffConverge {
    eps: f64,
    pre_loss: Option<f64>,
}

impl DiffConverge {
    /// Predicate with tolerance `eps`.
    pub fn new(eps: f64) -> Self {
        Self {
            eps,
            pre_loss: None,
        }
    }
}

impl ConvergeFunction for DiffConverge {
    fn is_converge(&mut self, loss: f64) -> bool {
        let converged = match self.pre_loss {
            None => false,
            Some(pre) => {
                let diff = (loss - pre).abs();
                debug!(diff, eps = self.eps, "loss difference");
                diff < self.eps
            }
        };
        self.pre_loss = Some(loss);
        converged
    }
}

/// Converged once the loss itself drops to `eps` or below.
#[derive(Clone, Debug)]
pub struct AbsConverge {
    eps: f64,
}

impl AbsConverge {
    /// Predicate with threshold `eps`.
    pub fn new(eps: f64) -> Self {
        Self { eps }
    }
}

impl ConvergeFunction for AbsConverge {
    fn is_converge(&mut self, loss: f64) -> bool {
        loss <= self.eps
    }
}

/// Convergence predicate names.
#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ConvergeType {
    /// [DiffConverge]
    #[default]
    #[value(name = "diff")]
    Diff,
    /// [AbsConverge]
    #[value(name = "abs")]
    Abs,
}

impl Display for ConvergeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvergeType::Diff => write!(f, "diff"),
            ConvergeType::Abs => write!(f, "abs"),
        }
    }
}

impl FromStr for ConvergeType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diff" => Ok(ConvergeType::Diff),
            "abs" => Ok(ConvergeType::Abs),
            _ => Err(ConfigError::UnsupportedMethod {
                kind: "converge function",
                name: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ConvergeType {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Build the predicate named by `converge_type`.
pub fn converge_func_factory(
    converge_type: ConvergeType,
    eps: f64,
) -> Box<dyn ConvergeFunction + Send> {
    match converge_type {
        ConvergeType::Diff => Box::new(DiffConverge::new(eps)),
        ConvergeType::Abs => Box::new(AbsConverge::new(eps)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_converge() {
        let mut f = DiffConverge::new(1e-5);
        let res = [10.0, 5.0, 5.0000001]
            .iter()
            .map(|&l| f.is_converge(l))
            .collect::<Vec<_>>();
        assert_eq!(res, vec![false, false, true]);

        let mut f = DiffConverge::new(1e-5);
        assert!([10.0, 5.0, 1.0].iter().all(|&l| !f.is_converge(l)));
    }

    #[test]
    fn test_abs_converge() {
        let mut f = converge_func_factory(ConvergeType::Abs, 0.5);
        assert!(!f.is_converge(0.7));
        assert!(f.is_converge(0.5));
        assert!(f.is_converge(0.1));
    }

    #[test]
    fn test_parse() {
        assert_eq!("diff".parse::<ConvergeType>().unwrap(), ConvergeType::Diff);
        assert!(matches!(
            "weight_diff".parse::<ConvergeType>(),
            Err(ConfigError::UnsupportedMethod { .. })
        ));
    }
}
