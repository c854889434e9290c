//! # primops
//!
//! Descriptor-based neural-network primitives glue: operator adapters that
//! translate a graph framework's operator contract (operator definitions,
//! slot-bound tensors, attribute maps) into a vendor-style primitives
//! backend built around execution plans, resource slots, and auxiliary
//! workspace buffers.
//!
//! The crate currently carries one operator, 2d spatial pooling
//! ([`ops::PoolOp`]), registered under the `"MaxPool"` and `"AveragePool"`
//! operator types for channel-major inputs. Its design center is the
//! plan-caching policy: the backend plan, workspace buffer, and staging
//! output buffer are built on the first call and rebuilt only when the
//! input shape changes.
//!
//! ```rust
//! use primops::prelude::*;
//!
//! let dev = Cpu;
//! let mut reg: OpRegistry<f32, Cpu> = OpRegistry::new();
//! register_pool_ops(&mut reg);
//!
//! let def = OpDef::new("MaxPool")
//!     .with_attr("kernel", 2)
//!     .with_attr("stride", 2);
//! let mut op = reg.create(&def, &dev).unwrap();
//!
//! let x = Tensor::from_vec(
//!     TensorLayout::contiguous(Order::Nchw, &[1, 1, 2, 2]),
//!     vec![1.0, 2.0, 3.0, 4.0],
//! ).unwrap();
//! let mut y = Tensor::empty(Order::Nchw);
//! op.run(&[&x], &mut [&mut y]).unwrap();
//! assert_eq!(y.as_slice(), &[4.0]);
//! ```

pub mod backend;
pub mod dtypes;
pub mod graph;
pub mod ops;
pub mod shapes;
pub mod tensor;

mod error;
pub use error::Error;

/// Contains subset of all public exports.
pub mod prelude {
    pub use crate::backend::{Cpu, PoolBackend, PoolDesc, PoolKind, PoolPlan, Resources};
    pub use crate::dtypes::{Dtype, Unit};
    pub use crate::graph::{register_pool_ops, AttrValue, OpDef, OpRegistry, Operator};
    pub use crate::ops::{ConvPoolAttrs, PoolOp, StagingMode};
    pub use crate::shapes::{Order, TensorLayout};
    pub use crate::tensor::Tensor;
    pub use crate::Error;
}
