//! Utility functions for creating vertically partitioned datasets for the hetero LR protocol.

use crate::feature::{DataInstance, Features, RowId};
use crate::table::Table;
use anyhow::{bail, Result};
use rand::Rng;

/// The same rows split by columns: the guest holds the labels and the first columns, the host the
/// rest.
#[derive(Clone, Debug)]
pub struct VerticalDataset {
    /// Guest's rows, labeled with `1` or `-1`.
    pub guest: Table<DataInstance>,
    /// Host's rows, unlabeled.
    pub host: Table<DataInstance>,
    /// Weights the labels were drawn from, guest columns first.
    pub true_weights: Vec<f64>,
}

/// Create a linearly separable dataset of `rows` rows with ids `0..rows`.
///
/// Features are uniform on `[-1, 1)` and the label is the sign of $`w^\top x`$ for a random `w`.
pub fn create_vertical_dataset<RNG: Rng>(
    rows: usize,
    guest_dim: usize,
    host_dim: usize,
    rng: &mut RNG,
) -> Result<VerticalDataset> {
    if rows == 0 {
        bail!("rows (={}) == 0 @{}:{}", rows, file!(), line!());
    }
    if host_dim == 0 {
        bail!("host_dim (={}) == 0 @{}:{}", host_dim, file!(), line!());
    }

    let dim = guest_dim + host_dim;
    let true_weights = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect::<Vec<f64>>();

    let mut guest = Table::new();
    let mut host = Table::new();
    for id in 0..rows as RowId {
        let x = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect::<Vec<f64>>();
        let score: f64 = x.iter().zip(&true_weights).map(|(a, b)| a * b).sum();
        let label = if score > 0.0 { 1.0 } else { -1.0 };

        let (xg, xh) = x.split_at(guest_dim);
        guest.insert(id, DataInstance::with_label(Features::Dense(xg.to_vec()), label));
        host.insert(id, DataInstance::new(Features::Dense(xh.to_vec())));
    }

    Ok(VerticalDataset {
        guest,
        host,
        true_weights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scuttlebutt::AesRng;

    #[test]
    fn test_create_vertical_dataset() {
        let mut rng = AesRng::new();
        let data = create_vertical_dataset(10, 3, 2, &mut rng).unwrap();

        assert_eq!(data.guest.count(), 10);
        assert_eq!(data.guest.keys().collect::<Vec<_>>(), data.host.keys().collect::<Vec<_>>());
        assert!(data.guest.iter().all(|(_, inst)| inst.features.shape() == 3
            && matches!(inst.label, Some(l) if l == 1.0 || l == -1.0)));
        assert!(data.host.iter().all(|(_, inst)| inst.features.shape() == 2 && inst.label.is_none()));
        assert_eq!(data.true_weights.len(), 5);
    }

    #[test]
    fn test_create_vertical_dataset_errors() {
        let mut rng = AesRng::new();
        assert!(create_vertical_dataset(0, 3, 2, &mut rng).is_err());
        assert!(create_vertical_dataset(10, 3, 0, &mut rng).is_err());
    }
}
