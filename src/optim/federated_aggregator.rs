//! Concatenation and splitting of per-party gradient vectors.
//!
//! The arbiter optimizes over one vector laid out host-then-guest and hands each party its slice.

use crate::error::ShapeError;

/// Split `values` into contiguous parts of the given sizes.
pub fn separate<T: Clone>(values: &[T], sizes: &[usize]) -> Result<Vec<Vec<T>>, ShapeError> {
    let total: usize = sizes.iter().sum();
    if total != values.len() {
        return Err(ShapeError::SizeMismatch {
            expected: total,
            actual: values.len(),
        });
    }

    let mut rest = values;
    let parts = sizes
        .iter()
        .map(|&s| {
            let (head, tail) = rest.split_at(s);
            rest = tail;
            head.to_vec()
        })
        .collect();

    Ok(parts)
}

/// Concatenate parts in order.
pub fn aggregate<T: Clone>(parts: &[&[T]]) -> Vec<T> {
    parts.iter().flat_map(|p| p.iter().cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separate() {
        let v = [1, 2, 3, 4, 5];
        let parts = separate(&v, &[3, 2]).unwrap();
        assert_eq!(parts, vec![vec![1, 2, 3], vec![4, 5]]);

        let back = aggregate(&[&parts[0], &parts[1]]);
        assert_eq!(back, v);
    }

    #[test]
    fn test_separate_size_mismatch() {
        assert_eq!(
            separate(&[1, 2, 3], &[1, 1]),
            Err(ShapeError::SizeMismatch {
                expected: 2,
                actual: 3
            })
        );
        assert_eq!(separate::<i32>(&[], &[0, 0]).unwrap(), vec![vec![], vec![]]);
    }
}
