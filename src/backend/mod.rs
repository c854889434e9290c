//! The numerical primitives abstraction the operator adapters execute
//! against.
//!
//! The model follows descriptor-based vendor libraries: an operation is
//! first compiled into an execution plan for a fixed source layout, the
//! plan reports the destination and workspace descriptors it expects, and
//! execution binds concrete storage to named resource slots. Plans are
//! only valid for the exact shape they were created for; invalidation is
//! the caller's job.

mod cpu;

pub use cpu::{Cpu, CpuPlan, CpuWorkspace, BORDER_SENTINEL};

use crate::dtypes::Dtype;
use crate::shapes::TensorLayout;
use crate::tensor::Tensor;
use crate::Error;

/// Which reduction a pooling window applies.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Avg,
}

/// How out-of-bounds window elements are handled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BorderKind {
    /// Out-of-bounds elements read as zero; opposite sides of an axis may
    /// be padded by different amounts.
    ZerosAsymm,
}

/// Everything a backend needs to compile a pooling plan, minus the source
/// layout (supplied separately so one descriptor can be inspected against
/// several layouts).
///
/// Spatial pairs are in (width, height) order and `offsets` holds the
/// padding as non-positive source offsets in (left, top, right, bottom)
/// order, matching the convention of descriptor-based primitives APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDesc {
    pub kind: PoolKind,
    pub kernel: [usize; 2],
    pub stride: [usize; 2],
    pub offsets: [i64; 4],
    pub border: BorderKind,
}

/// A compiled pooling operation, valid for exactly one source shape.
pub trait PoolPlan {
    /// The source descriptor the plan was compiled for. Executing against
    /// storage laid out any other way is undefined; callers reusing a
    /// cached plan must check this.
    fn src_layout(&self) -> &TensorLayout;

    /// The destination descriptor execution will write through.
    fn dst_layout(&self) -> &TensorLayout;

    /// Workspace elements this plan requires. Zero when the operation
    /// needs no scratch state (average pooling).
    fn workspace_len(&self) -> usize;
}

/// Storage bound to a plan's resource slots for one execution.
///
/// The workspace slot is bound unconditionally by callers; backends that
/// do not need it for the planned operation ignore it.
pub struct Resources<'a, E, W> {
    pub src: &'a [E],
    pub dst: &'a mut [E],
    pub workspace: Option<&'a mut W>,
}

/// A device that can compile and run 2d pooling.
///
/// This is the seam the pooling adapter is generic over: anything that can
/// produce a [PoolPlan], size a workspace for it, execute against bound
/// resources, and convert the plan's destination layout into an arbitrary
/// caller layout can sit behind [crate::ops::PoolOp].
pub trait PoolBackend<E: Dtype>: Clone {
    type Plan: PoolPlan;
    type Workspace;

    /// Compiles a forward pooling plan for the given source layout.
    fn create_pool_forward(
        &self,
        desc: &PoolDesc,
        src: &TensorLayout,
    ) -> Result<Self::Plan, Error>;

    /// Allocates scratch storage sized by the plan.
    fn alloc_workspace(&self, plan: &Self::Plan) -> Result<Self::Workspace, Error>;

    /// Runs the plan against bound resources. Any failure is terminal;
    /// the destination contents are unspecified afterwards.
    fn execute(
        &self,
        plan: &Self::Plan,
        res: Resources<'_, E, Self::Workspace>,
    ) -> Result<(), Error>;

    /// Copies plan-layout staging data into `dst`'s own layout. `dst`
    /// must already have the plan's destination dims.
    fn copy_out(&self, plan: &Self::Plan, staging: &[E], dst: &mut Tensor<E>)
        -> Result<(), Error>;
}
