//! Numerical optimization of the joint weight vector.
//!
//! The arbiter owns the [Optimizer] and turns the decrypted, concatenated gradient into a per-party
//! delta. Each party then applies its slice with an [Updater](updater::Updater), which also adds
//! the penalty.

use crate::error::{ConfigError, ShapeError};
use clap::ValueEnum;
use serde::Deserialize;
use std::fmt::Display;
use std::str::FromStr;

pub mod activation;
pub mod convergence;
pub mod federated_aggregator;
pub mod gradient;
pub mod initializer;
pub mod updater;

const NESTEROV_MOMENTUM_COEFF: f64 = 0.9;
const RMSPROP_RHO: f64 = 0.99;
const RMSPROP_EPS: f64 = 1e-6;
const ADAGRAD_EPS: f64 = 1e-7;
const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

/// Update rules.
#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum OptimizerType {
    /// $`\delta = \eta g`$
    #[default]
    #[value(name = "sgd")]
    Sgd,
    /// Nesterov momentum with coefficient 0.9.
    #[value(name = "nesterov_momentum_sgd")]
    NesterovMomentumSgd,
    /// RMSProp with $`\rho = 0.99`$.
    #[value(name = "rmsprop")]
    RmsProp,
    /// AdaGrad.
    #[value(name = "adagrad")]
    Adagrad,
    /// Adam with $`\beta_1 = 0.9, \beta_2 = 0.999`$.
    #[value(name = "adam")]
    Adam,
}

impl Display for OptimizerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerType::Sgd => write!(f, "sgd"),
            OptimizerType::NesterovMomentumSgd => write!(f, "nesterov_momentum_sgd"),
            OptimizerType::RmsProp => write!(f, "rmsprop"),
            OptimizerType::Adagrad => write!(f, "adagrad"),
            OptimizerType::Adam => write!(f, "adam"),
        }
    }
}

impl FromStr for OptimizerType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sgd" => Ok(OptimizerType::Sgd),
            "nesterov_momentum_sgd" => Ok(OptimizerType::NesterovMomentumSgd),
            "rmsprop" => Ok(OptimizerType::RmsProp),
            "adagrad" => Ok(OptimizerType::Adagrad),
            "adam" => Ok(OptimizerType::Adam),
            _ => Err(ConfigError::UnsupportedMethod {
                kind: "optimizer",
                name: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for OptimizerType {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Learning rate schedule.
///
/// ```math
/// \eta_t = \frac{\eta}{1 + \lambda t} \quad\text{or}\quad \frac{\eta}{\sqrt{1 + \lambda t}}
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LearningRate {
    /// Initial rate $`\eta`$.
    pub learning_rate: f64,
    /// Decay $`\lambda`$, zero for a constant rate.
    pub decay: f64,
    /// Use the square-root schedule.
    pub decay_sqrt: bool,
}

impl LearningRate {
    /// Constant rate.
    pub fn constant(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            decay: 0.0,
            decay_sqrt: false,
        }
    }

    /// Rate at iteration `n_iter`.
    pub fn at(&self, n_iter: usize) -> f64 {
        let denom = 1.0 + self.decay * n_iter as f64;
        if self.decay_sqrt {
            self.learning_rate / denom.sqrt()
        } else {
            self.learning_rate / denom
        }
    }
}

/// Stateful optimizer over the concatenated plaintext gradient.
#[derive(Clone, Debug)]
pub struct Optimizer {
    method: OptimizerType,
    learning_rate: LearningRate,
    opt_m: Option<Vec<f64>>,
    opt_v: Option<Vec<f64>>,
    beta1_pow: f64,
    beta2_pow: f64,
}

impl Optimizer {
    /// Fresh optimizer.
    pub fn new(method: OptimizerType, learning_rate: LearningRate) -> Self {
        Self {
            method,
            learning_rate,
            opt_m: None,
            opt_v: None,
            beta1_pow: 1.0,
            beta2_pow: 1.0,
        }
    }

    /// The configured update rule.
    pub fn method(&self) -> OptimizerType {
        self.method
    }

    /// Delta to subtract from the weights for gradient `grad` at iteration `n_iter`.
    pub fn apply_gradients(&mut self, grad: &[f64], n_iter: usize) -> Result<Vec<f64>, ShapeError> {
        let lr = self.learning_rate.at(n_iter);

        match self.method {
            OptimizerType::Sgd => Ok(grad.iter().map(|g| lr * g).collect()),
            OptimizerType::NesterovMomentumSgd => {
                let m = state(&mut self.opt_m, grad.len())?;
                let delta = grad
                    .iter()
                    .zip(m.iter_mut())
                    .map(|(g, m)| {
                        let v = NESTEROV_MOMENTUM_COEFF * *m - lr * g;
                        let d = NESTEROV_MOMENTUM_COEFF * *m - (1.0 + NESTEROV_MOMENTUM_COEFF) * v;
                        *m = v;
                        d
                    })
                    .collect();
                Ok(delta)
            }
            OptimizerType::RmsProp => {
                let m = state(&mut self.opt_m, grad.len())?;
                let delta = grad
                    .iter()
                    .zip(m.iter_mut())
                    .map(|(g, m)| {
                        *m = RMSPROP_RHO * *m + (1.0 - RMSPROP_RHO) * g * g;
                        lr * g / (*m + RMSPROP_EPS).sqrt()
                    })
                    .collect();
                Ok(delta)
            }
            OptimizerType::Adagrad => {
                let m = state(&mut self.opt_m, grad.len())?;
                let delta = grad
                    .iter()
                    .zip(m.iter_mut())
                    .map(|(g, m)| {
                        *m += g * g;
                        lr * g / (*m + ADAGRAD_EPS).sqrt()
                    })
                    .collect();
                Ok(delta)
            }
            OptimizerType::Adam => {
                let m = state(&mut self.opt_m, grad.len())?;
                let v = state(&mut self.opt_v, grad.len())?;
                self.beta1_pow *= ADAM_BETA1;
                self.beta2_pow *= ADAM_BETA2;
                let (b1, b2) = (self.beta1_pow, self.beta2_pow);

                let delta = grad
                    .iter()
                    .zip(m.iter_mut().zip(v.iter_mut()))
                    .map(|(g, (m, v))| {
                        *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
                        *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
                        let m_hat = *m / (1.0 - b1);
                        let v_hat = *v / (1.0 - b2);
                        lr * m_hat / (v_hat.sqrt() + ADAM_EPS)
                    })
                    .collect();
                Ok(delta)
            }
        }
    }
}

/// Moment vector of length `len`, created on first use.
fn state(slot: &mut Option<Vec<f64>>, len: usize) -> Result<&mut Vec<f64>, ShapeError> {
    let v = slot.get_or_insert_with(|| vec![0.0; len]);
    if v.len() != len {
        return Err(ShapeError::DimensionMismatch {
            expected: v.len(),
            actual: len,
        });
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn test_learning_rate_decay() {
        let lr = LearningRate {
            learning_rate: 0.3,
            decay: 0.5,
            decay_sqrt: false,
        };
        assert_eq!(lr.at(0), 0.3);
        assert!((lr.at(2) - 0.15).abs() < 1e-12);

        let lr = LearningRate {
            decay_sqrt: true,
            ..lr
        };
        assert!((lr.at(6) - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_sgd() {
        let mut opt = Optimizer::new(OptimizerType::Sgd, LearningRate::constant(0.1));
        let d = opt.apply_gradients(&[1.0, -2.0, 0.0], 0).unwrap();
        assert!(close(&d, &[0.1, -0.2, 0.0]));

        // stateless: any length is fine
        assert_eq!(opt.apply_gradients(&[1.0], 1).unwrap().len(), 1);
    }

    #[test]
    fn test_nesterov_momentum() {
        let mut opt = Optimizer::new(
            OptimizerType::NesterovMomentumSgd,
            LearningRate::constant(0.1),
        );
        // v1 = -0.1, d1 = 0 + 1.9 * 0.1
        let d = opt.apply_gradients(&[1.0], 0).unwrap();
        assert!(close(&d, &[0.19]));
        // v2 = 0.9 * -0.1 - 0.1 = -0.19, d2 = -0.09 + 1.9 * 0.19
        let d = opt.apply_gradients(&[1.0], 1).unwrap();
        assert!(close(&d, &[-0.09 + 1.9 * 0.19]));
    }

    #[test]
    fn test_adaptive_methods_move_along_gradient() {
        for method in [
            OptimizerType::RmsProp,
            OptimizerType::Adagrad,
            OptimizerType::Adam,
        ] {
            let mut opt = Optimizer::new(method, LearningRate::constant(0.01));
            for t in 0..3 {
                let d = opt.apply_gradients(&[2.0, -3.0], t).unwrap();
                assert!(d[0] > 0.0 && d[1] < 0.0, "{method}");
            }
        }

        // adam's first step is lr * sign(g) up to epsilon
        let mut opt = Optimizer::new(OptimizerType::Adam, LearningRate::constant(0.01));
        let d = opt.apply_gradients(&[2.0, -3.0], 0).unwrap();
        assert!(close(&d, &[0.01, -0.01]));
    }

    #[test]
    fn test_stateful_shape_change() {
        let mut opt = Optimizer::new(OptimizerType::Adagrad, LearningRate::constant(0.1));
        opt.apply_gradients(&[1.0, 1.0], 0).unwrap();
        assert_eq!(
            opt.apply_gradients(&[1.0], 1),
            Err(ShapeError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_parse_optimizer() {
        for m in [
            OptimizerType::Sgd,
            OptimizerType::NesterovMomentumSgd,
            OptimizerType::RmsProp,
            OptimizerType::Adagrad,
            OptimizerType::Adam,
        ] {
            assert_eq!(m.to_string().parse::<OptimizerType>().unwrap(), m);
        }
        assert!("lbfgs".parse::<OptimizerType>().is_err());
    }
}
