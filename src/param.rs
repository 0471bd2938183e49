//! Training parameters.
//!
//! [LogisticParams] can be built in code, from the command line (see
//! [HeteroLRArgs](crate::cli_utils::HeteroLRArgs)) or from a TOML file:
//!
//! ```toml
//! penalty = "L2"
//! alpha = 0.01
//! optimizer = "rmsprop"
//! batch_size = 320
//! learning_rate = 0.15
//! max_iter = 30
//! eps = 1e-4
//!
//! [init_param]
//! init_method = "zeros"
//! fit_intercept = true
//!
//! [encrypt_param]
//! method = "paillier"
//! key_length = 1024
//! ```

use crate::encrypt::MIN_KEY_LENGTH;
use crate::error::ConfigError;
use crate::optim::convergence::ConvergeType;
use crate::optim::initializer::InitParams;
use crate::optim::updater::Penalty;
use crate::optim::{LearningRate, OptimizerType};
use anyhow::{Context, Result};
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::str::FromStr;

/// Homomorphic encryption schemes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum EncryptMethod {
    /// Paillier.
    #[default]
    Paillier,
}

impl FromStr for EncryptMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paillier" | "Paillier" => Ok(EncryptMethod::Paillier),
            _ => Err(ConfigError::UnsupportedMethod {
                kind: "encrypt method",
                name: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for EncryptMethod {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Encryption parameters.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EncryptParams {
    /// Scheme.
    pub method: EncryptMethod,
    /// Modulus bit length.
    pub key_length: usize,
}

impl Default for EncryptParams {
    fn default() -> Self {
        Self {
            method: EncryptMethod::Paillier,
            key_length: 1024,
        }
    }
}

/// Prediction parameters.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PredictParams {
    /// Probability above which a row is labeled positive.
    pub threshold: f64,
    /// Report the probability along with the label.
    pub with_proba: bool,
}

impl Default for PredictParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            with_proba: true,
        }
    }
}

/// Parameters shared by the three roles of a run.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    /// Regularization.
    pub penalty: Penalty,
    /// Regularization strength.
    pub alpha: f64,
    /// Convergence tolerance.
    pub eps: f64,
    /// Update rule.
    pub optimizer: OptimizerType,
    /// Rows per batch, `None` for full batch.
    pub batch_size: Option<usize>,
    /// Initial learning rate.
    pub learning_rate: f64,
    /// Learning rate decay.
    pub decay: f64,
    /// Use the square-root decay schedule.
    pub decay_sqrt: bool,
    /// Weight initialization.
    pub init_param: InitParams,
    /// Maximum number of passes over the data.
    pub max_iter: usize,
    /// Convergence predicate.
    pub converge_func: ConvergeType,
    /// Encryption.
    pub encrypt_param: EncryptParams,
    /// Prediction.
    pub predict_param: PredictParams,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            penalty: Penalty::L2,
            alpha: 1.0,
            eps: 1e-5,
            optimizer: OptimizerType::Sgd,
            batch_size: None,
            learning_rate: 0.01,
            decay: 0.0,
            decay_sqrt: false,
            init_param: InitParams::default(),
            max_iter: 100,
            converge_func: ConvergeType::Diff,
            encrypt_param: EncryptParams::default(),
            predict_param: PredictParams::default(),
        }
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidParam {
        name,
        reason: reason.to_string(),
    }
}

impl LogisticParams {
    /// Load from a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &str) -> Result<Self> {
        let params: Self = Config::builder()
            .add_source(File::with_name(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("loading {} @{}:{}", path, file!(), line!()))?;
        params.validate()?;
        Ok(params)
    }

    /// Parse TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let params: Self = Config::builder()
            .add_source(File::from_str(s, FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        params.validate()?;
        Ok(params)
    }

    /// Check every value before any network interaction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(invalid("alpha", "must be finite and non-negative"));
        }
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(invalid("eps", "must be finite and positive"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(invalid("learning_rate", "must be finite and positive"));
        }
        if !(self.decay.is_finite() && self.decay >= 0.0) {
            return Err(invalid("decay", "must be finite and non-negative"));
        }
        if self.batch_size == Some(0) {
            return Err(invalid("batch_size", "must be positive"));
        }
        if self.max_iter == 0 {
            return Err(invalid("max_iter", "must be positive"));
        }
        if !self.init_param.init_const.is_finite() {
            return Err(invalid("init_const", "must be finite"));
        }
        if self.encrypt_param.key_length < MIN_KEY_LENGTH {
            return Err(ConfigError::InvalidParam {
                name: "key_length",
                reason: format!("must be at least {}", MIN_KEY_LENGTH),
            });
        }
        if !(0.0..=1.0).contains(&self.predict_param.threshold) {
            return Err(invalid("threshold", "must lie in [0, 1]"));
        }
        Ok(())
    }

    /// Learning rate schedule.
    pub fn learning_rate(&self) -> LearningRate {
        LearningRate {
            learning_rate: self.learning_rate,
            decay: self.decay,
            decay_sqrt: self.decay_sqrt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::initializer::InitMethod;

    #[test]
    fn test_defaults_are_valid() {
        LogisticParams::default().validate().unwrap();
    }

    #[test]
    fn test_from_toml() {
        let params = LogisticParams::from_toml_str(
            r#"
            penalty = "L1"
            alpha = 0.5
            optimizer = "adam"
            batch_size = 320
            max_iter = 30

            [init_param]
            init_method = "zeros"
            fit_intercept = false

            [encrypt_param]
            key_length = 512
            "#,
        )
        .unwrap();

        assert_eq!(params.penalty, Penalty::L1);
        assert_eq!(params.alpha, 0.5);
        assert_eq!(params.optimizer, OptimizerType::Adam);
        assert_eq!(params.batch_size, Some(320));
        assert_eq!(params.max_iter, 30);
        assert_eq!(params.init_param.init_method, InitMethod::Zeros);
        assert!(!params.init_param.fit_intercept);
        assert_eq!(params.encrypt_param.key_length, 512);
        assert_eq!(params.learning_rate, 0.01);
    }

    #[test]
    fn test_unsupported_names_rejected() {
        for toml in [
            r#"optimizer = "lbfgs""#,
            r#"penalty = "elastic""#,
            r#"converge_func = "weight_diff""#,
            "[encrypt_param]\nmethod = \"rsa\"",
            "[init_param]\ninit_method = \"xavier\"",
        ] {
            let err = LogisticParams::from_toml_str(toml).unwrap_err();
            assert!(format!("{:#}", err).contains("unsupported"), "{toml}: {err:#}");
        }
    }

    #[test]
    fn test_validate() {
        let cases: [(&str, fn(&mut LogisticParams)); 6] = [
            ("alpha", |p| p.alpha = -1.0),
            ("eps", |p| p.eps = 0.0),
            ("learning_rate", |p| p.learning_rate = f64::NAN),
            ("batch_size", |p| p.batch_size = Some(0)),
            ("max_iter", |p| p.max_iter = 0),
            ("key_length", |p| p.encrypt_param.key_length = 256),
        ];
        for (name, f) in cases {
            let mut p = LogisticParams::default();
            f(&mut p);
            assert!(
                matches!(p.validate(), Err(ConfigError::InvalidParam { name: n, .. }) if n == name),
                "{name}"
            );
        }
    }
}
