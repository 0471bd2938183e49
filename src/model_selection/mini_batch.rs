//! Deterministic mini-batch partitions.
//!
//! The guest plans the batches, announces `batch_num` to everyone and ships each batch's row ids
//! to the host during the first iteration. Later iterations replay the same plan on both sides.

use crate::error::{ConfigError, DesyncError};
use crate::feature::RowId;
use tracing::debug;

/// Ordered sequence of row id sets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchPlan {
    batch_size: usize,
    batches: Vec<Vec<RowId>>,
}

impl BatchPlan {
    /// Sort `ids` ascending and chunk them by `batch_size`.
    ///
    /// `None`, or a size of at least the number of rows, yields one batch with every row.
    pub fn new(mut ids: Vec<RowId>, batch_size: Option<usize>) -> Result<Self, ConfigError> {
        if ids.is_empty() {
            return Err(ConfigError::InvalidParam {
                name: "data",
                reason: "cannot plan batches over an empty dataset".to_string(),
            });
        }
        if batch_size == Some(0) {
            return Err(ConfigError::InvalidParam {
                name: "batch_size",
                reason: "must be positive".to_string(),
            });
        }

        ids.sort_unstable();
        ids.dedup();

        let batch_size = batch_size.unwrap_or(ids.len()).min(ids.len());
        let batches = ids.chunks(batch_size).map(|c| c.to_vec()).collect();

        Ok(Self {
            batch_size,
            batches,
        })
    }

    /// Effective batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// $`\lceil n / \text{batch\_size} \rceil`$
    pub fn batch_num(&self) -> usize {
        self.batches.len()
    }

    /// Row ids of batch `batch_index`.
    pub fn batch(&self, batch_index: usize) -> Option<&[RowId]> {
        self.batches.get(batch_index).map(|b| b.as_slice())
    }
}

/// Guest-side plan, built once and replayed verbatim.
///
/// Row ids passed after the first call are ignored: a dataset that changes between iterations is
/// not re-validated.
#[derive(Clone, Debug, Default)]
pub struct BatchPlanCache {
    plan: Option<BatchPlan>,
}

impl BatchPlanCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached plan, building it from `ids` on first use.
    pub fn get_or_plan(
        &mut self,
        ids: impl FnOnce() -> Vec<RowId>,
        batch_size: Option<usize>,
    ) -> Result<&BatchPlan, ConfigError> {
        let plan = match self.plan.take() {
            Some(plan) => plan,
            None => {
                let plan = BatchPlan::new(ids(), batch_size)?;
                debug!(batch_num = plan.batch_num(), "batch plan created");
                plan
            }
        };
        Ok(self.plan.insert(plan))
    }

    /// The cached plan, if any.
    pub fn plan(&self) -> Option<&BatchPlan> {
        self.plan.as_ref()
    }
}

/// Host-side record of the batch indices received during the first iteration.
#[derive(Clone, Debug, Default)]
pub struct BatchIndexCache {
    batches: Vec<Vec<RowId>>,
    sealed: bool,
}

impl BatchIndexCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the indices of the next batch of the first iteration.
    pub fn push(&mut self, batch_index: usize, ids: Vec<RowId>) -> Result<(), DesyncError> {
        if self.sealed || batch_index != self.batches.len() {
            return Err(DesyncError::BatchCount {
                expected: self.batches.len(),
                actual: batch_index,
            });
        }
        self.batches.push(ids);
        Ok(())
    }

    /// Close the first iteration; the cache must hold exactly `batch_num` batches.
    pub fn seal(&mut self, batch_num: usize) -> Result<(), DesyncError> {
        if self.batches.len() != batch_num {
            return Err(DesyncError::BatchCount {
                expected: batch_num,
                actual: self.batches.len(),
            });
        }
        self.sealed = true;
        Ok(())
    }

    /// Whether the first iteration is over.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Cached indices of `batch_index`.
    pub fn get(&self, batch_index: usize) -> Result<&[RowId], DesyncError> {
        self.batches
            .get(batch_index)
            .map(|b| b.as_slice())
            .ok_or(DesyncError::BatchCount {
                expected: self.batches.len(),
                actual: batch_index + 1,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan() {
        let plan = BatchPlan::new(vec![5, 1, 4, 2, 3], Some(2)).unwrap();
        assert_eq!(plan.batch_num(), 3);
        assert_eq!(plan.batch(0), Some(&[1, 2][..]));
        assert_eq!(plan.batch(2), Some(&[5][..]));
        assert_eq!(plan.batch(3), None);

        let plan = BatchPlan::new(vec![3, 1, 2], None).unwrap();
        assert_eq!(plan.batch_num(), 1);
        assert_eq!(plan.batch_size(), 3);

        let plan = BatchPlan::new(vec![3, 1, 2], Some(100)).unwrap();
        assert_eq!(plan.batch_num(), 1);
    }

    #[test]
    fn test_plan_errors() {
        assert!(BatchPlan::new(vec![], None).is_err());
        assert!(BatchPlan::new(vec![1], Some(0)).is_err());
    }

    #[test]
    fn test_plan_cache_reused_verbatim() {
        let mut cache = BatchPlanCache::new();
        let first = cache.get_or_plan(|| vec![1, 2, 3, 4], Some(2)).unwrap().clone();

        // the dataset changed, the cached plan is still what gets replayed
        let again = cache.get_or_plan(|| vec![7, 8], Some(1)).unwrap();
        assert_eq!(&first, again);
        assert_eq!(again.batch(1), Some(&[3, 4][..]));
    }

    #[test]
    fn test_index_cache() {
        let mut cache = BatchIndexCache::new();
        cache.push(0, vec![1, 2]).unwrap();
        assert!(cache.push(2, vec![3]).is_err());
        cache.push(1, vec![3]).unwrap();

        assert_eq!(
            cache.seal(3),
            Err(DesyncError::BatchCount {
                expected: 3,
                actual: 2
            })
        );
        cache.seal(2).unwrap();
        assert!(cache.is_sealed());
        assert!(cache.push(2, vec![4]).is_err());

        assert_eq!(cache.get(1).unwrap(), &[3]);
        assert!(cache.get(2).is_err());
    }
}
