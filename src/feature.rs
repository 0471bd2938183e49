//! Local data records: one [DataInstance] per row, keyed by [RowId] in a [Table](crate::table::Table).

use crate::error::ShapeError;

/// Row identifier shared by the parties after record alignment.
pub type RowId = u64;

/// Non-zero values of a feature vector. Built only through [Features::sparse], so `indices` is
/// strictly increasing, below `length` and as long as `values`.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseVector {
    indices: Vec<u32>,
    values: Vec<f64>,
    length: u32,
}

impl SparseVector {
    /// Positions of the stored values.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Stored values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Feature vector of one row.
#[derive(Clone, Debug, PartialEq)]
pub enum Features {
    /// Every value stored.
    Dense(Vec<f64>),
    /// Only non-zero values stored.
    Sparse(SparseVector),
}

impl Features {
    /// Build a sparse vector, checking the index invariants.
    pub fn sparse(indices: Vec<u32>, values: Vec<f64>, length: u32) -> Result<Self, ShapeError> {
        if indices.len() != values.len() {
            return Err(ShapeError::DimensionMismatch {
                expected: indices.len(),
                actual: values.len(),
            });
        }
        if let Some(&last) = indices.last() {
            if last >= length || indices.windows(2).any(|w| w[0] >= w[1]) {
                return Err(ShapeError::DimensionMismatch {
                    expected: length as usize,
                    actual: last as usize + 1,
                });
            }
        }
        Ok(Features::Sparse(SparseVector {
            indices,
            values,
            length,
        }))
    }

    /// Logical length.
    pub fn shape(&self) -> usize {
        match self {
            Features::Dense(v) => v.len(),
            Features::Sparse(v) => v.length as usize,
        }
    }

    /// Value at `i`, zero for unset sparse positions and out of range indices.
    pub fn get(&self, i: usize) -> f64 {
        match self {
            Features::Dense(v) => v.get(i).copied().unwrap_or(0.0),
            Features::Sparse(v) => u32::try_from(i)
                .ok()
                .and_then(|i| v.indices.binary_search(&i).ok())
                .and_then(|k| v.values.get(k).copied())
                .unwrap_or(0.0),
        }
    }

    /// `(index, value)` pairs with a non-zero value.
    pub fn iter_nonzero(&self) -> Box<dyn Iterator<Item = (usize, f64)> + '_> {
        match self {
            Features::Dense(v) => Box::new(
                v.iter()
                    .enumerate()
                    .filter(|(_, x)| **x != 0.0)
                    .map(|(i, x)| (i, *x)),
            ),
            Features::Sparse(v) => Box::new(
                v.indices
                    .iter()
                    .zip(v.values.iter())
                    .filter(|(_, x)| **x != 0.0)
                    .map(|(i, x)| (*i as usize, *x)),
            ),
        }
    }

    /// Inner product with a weight vector of the same length.
    pub fn dot(&self, coef: &[f64]) -> Result<f64, ShapeError> {
        if self.shape() != coef.len() {
            return Err(ShapeError::DimensionMismatch {
                expected: coef.len(),
                actual: self.shape(),
            });
        }
        self.iter_nonzero().try_fold(0.0, |acc, (i, x)| {
            coef.get(i)
                .map(|w| acc + x * w)
                .ok_or(ShapeError::DimensionMismatch {
                    expected: coef.len(),
                    actual: i + 1,
                })
        })
    }
}

/// One row of a party's local data.
#[derive(Clone, Debug, PartialEq)]
pub struct DataInstance {
    /// Features owned by this party.
    pub features: Features,
    /// Label, only present on the guest.
    pub label: Option<f64>,
    /// Sample weight.
    pub weight: Option<f64>,
}

impl DataInstance {
    /// Row without label.
    pub fn new(features: Features) -> Self {
        Self {
            features,
            label: None,
            weight: None,
        }
    }

    /// Row with a label.
    pub fn with_label(features: Features, label: f64) -> Self {
        Self {
            features,
            label: Some(label),
            weight: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_and_sparse_agree() {
        let dense = Features::Dense(vec![0.0, 1.5, 0.0, -2.0]);
        let sparse = Features::sparse(vec![1, 3], vec![1.5, -2.0], 4).unwrap();

        assert_eq!(dense.shape(), sparse.shape());
        for i in 0..4 {
            assert_eq!(dense.get(i), sparse.get(i));
        }
        assert_eq!(
            dense.iter_nonzero().collect::<Vec<_>>(),
            sparse.iter_nonzero().collect::<Vec<_>>()
        );

        let coef = [1.0, 2.0, 3.0, 0.5];
        assert_eq!(dense.dot(&coef).unwrap(), 2.0);
        assert_eq!(sparse.dot(&coef).unwrap(), 2.0);
    }

    #[test]
    fn test_sparse_invariants() {
        assert!(Features::sparse(vec![0, 1], vec![1.0], 3).is_err());
        assert!(Features::sparse(vec![2, 1], vec![1.0, 1.0], 3).is_err());
        assert!(Features::sparse(vec![0, 3], vec![1.0, 1.0], 3).is_err());
        assert!(Features::sparse(vec![], vec![], 0).is_ok());
    }

    #[test]
    fn test_sparse_access_out_of_range() {
        let sparse = Features::sparse(vec![0, 2], vec![1.0, -1.0], 3).unwrap();
        if let Features::Sparse(v) = &sparse {
            assert_eq!(v.indices(), &[0, 2]);
            assert_eq!(v.values(), &[1.0, -1.0]);
        }

        assert_eq!(sparse.get(2), -1.0);
        assert_eq!(sparse.get(3), 0.0);
        assert_eq!(sparse.get(usize::MAX), 0.0);
        assert_eq!(sparse.dot(&[2.0, 5.0, 1.0]).unwrap(), 1.0);
        assert!(sparse.dot(&[2.0, 5.0]).is_err());
    }

    #[test]
    fn test_dot_shape_mismatch() {
        let dense = Features::Dense(vec![1.0, 2.0]);
        assert_eq!(
            dense.dot(&[1.0]),
            Err(ShapeError::DimensionMismatch {
                expected: 1,
                actual: 2
            })
        );
    }
}
