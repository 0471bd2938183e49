//! Initial weights.

use crate::error::ConfigError;
use clap::ValueEnum;
use rand::Rng;
use serde::Deserialize;
use std::fmt::Display;
use std::str::FromStr;

/// How to fill the initial weight vector.
#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum InitMethod {
    /// All zeros.
    #[value(name = "zeros")]
    Zeros,
    /// All ones.
    #[value(name = "ones")]
    Ones,
    /// All equal to [InitParams::init_const].
    #[value(name = "const")]
    Const,
    /// Uniform in $`[0, 1)`$.
    #[default]
    #[value(name = "random_uniform")]
    RandomUniform,
}

impl Display for InitMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitMethod::Zeros => write!(f, "zeros"),
            InitMethod::Ones => write!(f, "ones"),
            InitMethod::Const => write!(f, "const"),
            InitMethod::RandomUniform => write!(f, "random_uniform"),
        }
    }
}

impl FromStr for InitMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zeros" => Ok(InitMethod::Zeros),
            "ones" => Ok(InitMethod::Ones),
            "const" => Ok(InitMethod::Const),
            "random_uniform" => Ok(InitMethod::RandomUniform),
            _ => Err(ConfigError::UnsupportedMethod {
                kind: "init method",
                name: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for InitMethod {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Initialization parameters.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct InitParams {
    /// Fill method.
    pub init_method: InitMethod,
    /// Value used by [InitMethod::Const].
    pub init_const: f64,
    /// Whether the guest learns an intercept.
    pub fit_intercept: bool,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            init_method: InitMethod::RandomUniform,
            init_const: 1.0,
            fit_intercept: true,
        }
    }
}

/// Weight vector of length `shape`.
pub fn init_model<R: Rng>(shape: usize, params: &InitParams, rng: &mut R) -> Vec<f64> {
    match params.init_method {
        InitMethod::Zeros => vec![0.0; shape],
        InitMethod::Ones => vec![1.0; shape],
        InitMethod::Const => vec![params.init_const; shape],
        InitMethod::RandomUniform => (0..shape).map(|_| rng.gen::<f64>()).collect(),
    }
}
