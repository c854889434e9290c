//! Operator adapters.

mod conv_pool;
mod pool;

pub use conv_pool::{ConvPoolAttrs, ResolvedPool};
pub use pool::{PoolOp, StagingMode};
