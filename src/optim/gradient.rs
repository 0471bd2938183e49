//! Encrypted gradient and loss of the Taylor-approximated logistic loss.
//!
//! With labels $`y \in \{-1, 1\}`$ and the second order expansion of
//! $`\log(1 + e^{-y w^\top x})`$ around zero,
//!
//! ```math
//! d_i = \tfrac{1}{4} w^\top x_i - \tfrac{1}{2} y_i, \qquad
//! \nabla_j = \tfrac{1}{n} \sum_i d_i x_{ij}, \qquad
//! \ell = \tfrac{1}{n} \sum_i \left( \log 2 - \tfrac{1}{2} y_i w^\top x_i + \tfrac{1}{8} (w^\top x_i)^2 \right)
//! ```
//!
//! All of $`d_i`$, $`\nabla_j`$ and $`\ell`$ are computed on ciphertexts of $`w^\top x_i`$ and
//! $`(w^\top x_i)^2`$ with [PaillierPublicKey] arithmetic.

use crate::encrypt::{Ciphertext, PaillierPublicKey};
use crate::error::{DesyncError, ShapeError};
use crate::feature::DataInstance;
use crate::table::Table;
use anyhow::{Context, Result};
use std::f64::consts::LN_2;

/// $`[[d_i]] = 0.25 [[w^\top x_i]] - 0.5 y_i`$
pub fn compute_fore_gradient(
    pk: &PaillierPublicKey,
    data: &Table<DataInstance>,
    en_wx: &Table<Ciphertext>,
) -> Result<Table<Ciphertext>> {
    data.try_join(en_wx, |inst, wx| {
        let y = label(inst)?;
        let scaled = pk.mul_scalar(wx, 0.25)?;
        Ok(pk.add_plain(&scaled, -0.5 * y)?)
    })
    .with_context(|| format!("@{}:{}", file!(), line!()))
}

/// $`[[\nabla]]`$ over `dim` features, with the intercept term appended when `fit_intercept`.
pub fn compute_gradient(
    pk: &PaillierPublicKey,
    data: &Table<DataInstance>,
    fore_gradient: &Table<Ciphertext>,
    dim: usize,
    fit_intercept: bool,
) -> Result<Vec<Ciphertext>> {
    let n = data.count();
    if n == 0 {
        return Err(DesyncError::BatchCount {
            expected: 1,
            actual: 0,
        }
        .into());
    }

    let mut gradient = vec![pk.zero(); dim];
    let mut intercept = pk.zero();

    let rows = data.try_join(fore_gradient, |inst, fore| -> Result<()> {
        if inst.features.shape() != dim {
            return Err(ShapeError::DimensionMismatch {
                expected: dim,
                actual: inst.features.shape(),
            }
            .into());
        }
        for (j, x) in inst.features.iter_nonzero() {
            let slot = gradient.get_mut(j).ok_or(ShapeError::DimensionMismatch {
                expected: dim,
                actual: j + 1,
            })?;
            let term = pk.mul_scalar(fore, x)?;
            *slot = pk.add(slot, &term)?;
        }
        if fit_intercept {
            intercept = pk.add(&intercept, fore)?;
        }
        Ok(())
    });
    rows.with_context(|| format!("@{}:{}", file!(), line!()))?;

    if fit_intercept {
        gradient.push(intercept);
    }

    let inv_n = 1.0 / n as f64;
    let gradient = gradient
        .iter()
        .map(|g| pk.mul_scalar(g, inv_n))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(gradient)
}

/// $`[[\ell]]`$ without regularization.
pub fn compute_loss(
    pk: &PaillierPublicKey,
    data: &Table<DataInstance>,
    en_wx: &Table<Ciphertext>,
    en_wx_square: &Table<Ciphertext>,
) -> Result<Ciphertext> {
    let n = data.count();
    if n == 0 {
        return Err(DesyncError::BatchCount {
            expected: 1,
            actual: 0,
        }
        .into());
    }

    let wx = data.try_join(en_wx, |inst, wx| -> Result<(f64, Ciphertext)> {
        Ok((label(inst)?, wx.clone()))
    })?;
    let terms = wx.try_join(en_wx_square, |(y, wx), wx2| -> Result<Ciphertext> {
        let linear = pk.mul_scalar(wx, -0.5 * y)?;
        let square = pk.mul_scalar(wx2, 0.125)?;
        Ok(pk.add_plain(&pk.add(&linear, &square)?, LN_2)?)
    })?;

    let total = terms
        .collect()
        .iter()
        .try_fold(pk.zero(), |acc, (_, t)| pk.add(&acc, t))?;

    Ok(pk.mul_scalar(&total, 1.0 / n as f64)?)
}

/// Gradient and loss in one pass over the batch.
pub fn compute_gradient_and_loss(
    pk: &PaillierPublicKey,
    data: &Table<DataInstance>,
    fore_gradient: &Table<Ciphertext>,
    en_wx: &Table<Ciphertext>,
    en_wx_square: &Table<Ciphertext>,
    dim: usize,
    fit_intercept: bool,
) -> Result<(Vec<Ciphertext>, Ciphertext)> {
    let gradient = compute_gradient(pk, data, fore_gradient, dim, fit_intercept)?;
    let loss = compute_loss(pk, data, en_wx, en_wx_square)?;
    Ok((gradient, loss))
}

fn label(inst: &DataInstance) -> Result<f64> {
    inst.label
        .ok_or_else(|| anyhow::anyhow!("labeled row required @{}:{}", file!(), line!()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encrypt::{EncryptOperator, PaillierEncrypt, MIN_KEY_LENGTH};
    use crate::feature::Features;

    fn setup() -> (PaillierEncrypt, Table<DataInstance>, Vec<f64>) {
        let mut op = PaillierEncrypt::new();
        op.generate_key(MIN_KEY_LENGTH).unwrap();

        let data: Table<DataInstance> = [
            (0, DataInstance::with_label(Features::Dense(vec![1.0, 2.0]), 1.0)),
            (1, DataInstance::with_label(Features::Dense(vec![-1.0, 0.5]), -1.0)),
            (
                2,
                DataInstance::with_label(Features::sparse(vec![1], vec![4.0], 2).unwrap(), 1.0),
            ),
        ]
        .into_iter()
        .collect();
        let wx = vec![0.5, -1.5, 2.0];

        (op, data, wx)
    }

    fn encrypt_table(op: &mut PaillierEncrypt, values: &[f64]) -> Table<Ciphertext> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u64, op.encrypt(*v).unwrap()))
            .collect()
    }

    #[test]
    fn test_gradient_and_loss_match_plaintext() {
        let (mut op, data, wx) = setup();
        let pk = op.key().unwrap().clone();
        let en_wx = encrypt_table(&mut op, &wx);
        let en_wx2 = encrypt_table(&mut op, &wx.iter().map(|v| v * v).collect::<Vec<_>>());

        let fore = compute_fore_gradient(&pk, &data, &en_wx).unwrap();
        let (grad, loss) =
            compute_gradient_and_loss(&pk, &data, &fore, &en_wx, &en_wx2, 2, true).unwrap();

        let ys = [1.0, -1.0, 1.0];
        let xs = [[1.0, 2.0], [-1.0, 0.5], [0.0, 4.0]];
        let d = (0..3).map(|i| 0.25 * wx[i] - 0.5 * ys[i]).collect::<Vec<_>>();

        for (i, c) in fore.iter() {
            assert!((op.decrypt(c).unwrap() - d[i as usize]).abs() < 1e-12);
        }

        let expected = [
            (0..3).map(|i| d[i] * xs[i][0]).sum::<f64>() / 3.0,
            (0..3).map(|i| d[i] * xs[i][1]).sum::<f64>() / 3.0,
            d.iter().sum::<f64>() / 3.0,
        ];
        let grad = op.decrypt_list(&grad).unwrap();
        assert_eq!(grad.len(), 3);
        for (g, e) in grad.iter().zip(expected.iter()) {
            assert!((g - e).abs() < 1e-9, "{g} != {e}");
        }

        let expected_loss = (0..3)
            .map(|i| LN_2 - 0.5 * ys[i] * wx[i] + 0.125 * wx[i] * wx[i])
            .sum::<f64>()
            / 3.0;
        assert!((op.decrypt(&loss).unwrap() - expected_loss).abs() < 1e-9);
    }

    #[test]
    fn test_gradient_requires_matching_rows() {
        let (mut op, data, wx) = setup();
        let pk = op.key().unwrap().clone();
        let en_wx = encrypt_table(&mut op, &wx[..2]);

        let err = compute_fore_gradient(&pk, &data, &en_wx).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DesyncError>(),
            Some(&DesyncError::MissingRow(2))
        );
    }

    #[test]
    fn test_gradient_dimension_mismatch() {
        let (mut op, data, wx) = setup();
        let pk = op.key().unwrap().clone();
        let fore = encrypt_table(&mut op, &wx);

        let err = compute_gradient(&pk, &data, &fore, 3, false).unwrap_err();
        assert!(err.downcast_ref::<ShapeError>().is_some());
    }
}
