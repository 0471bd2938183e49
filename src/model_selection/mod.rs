//! Batch planning for mini-batch gradient descent.

pub mod mini_batch;
pub use mini_batch::{BatchIndexCache, BatchPlan, BatchPlanCache};
