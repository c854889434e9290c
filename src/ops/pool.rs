//! The 2d pooling operator adapter.
//!
//! This is glue between the graph framework's operator contract and the
//! primitives backend: it owns no math of its own, only the plan-caching
//! policy. The backend plan, its workspace buffer, and the staging output
//! storage are built on the first call and rebuilt exactly when the input
//! shape changes; the operator's attributes are immutable after
//! construction, so shape is the only invalidation trigger.

use crate::backend::{BorderKind, PoolBackend, PoolDesc, PoolKind, PoolPlan, Resources};
use crate::dtypes::Dtype;
use crate::graph::{OpDef, Operator};
use crate::ops::conv_pool::ConvPoolAttrs;
use crate::shapes::Order;
use crate::tensor::Tensor;
use crate::Error;

/// Where an execution wrote its result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StagingMode {
    /// The caller's output storage already had the plan's destination
    /// layout, so the backend wrote into it directly and no copy was
    /// needed.
    Aliased,
    /// The backend wrote into the adapter's private staging buffer, and
    /// the result was copied into the caller's layout afterwards.
    Private,
}

/// Max/average spatial pooling over rank-4 channel-major tensors.
///
/// One instance serves one graph node. The pooling kind comes from the
/// operator type name (`MaxPool*` or `AveragePool*`); window geometry
/// comes from the shared conv/pool attributes. Construction fails on
/// configurations the backend has no path for: dilation other than 1, or
/// padding not strictly smaller than the kernel on its axis.
pub struct PoolOp<E, D: PoolBackend<E>>
where
    E: Dtype,
{
    dev: D,
    kind: PoolKind,
    attrs: ConvPoolAttrs,
    cached_input_dims: Vec<usize>,
    plan: Option<D::Plan>,
    workspace: Option<D::Workspace>,
    staging: Vec<E>,
    staging_mode: Option<StagingMode>,
    plans_built: usize,
}

impl<E: Dtype, D: PoolBackend<E>> PoolOp<E, D> {
    pub fn new(def: &OpDef, dev: D) -> Result<Self, Error> {
        let attrs = ConvPoolAttrs::from_def(def)?;
        if attrs.dilation_h != 1 || attrs.dilation_w != 1 {
            return Err(Error::InvalidConfig(
                "pooling does not support dilation".into(),
            ));
        }
        if !attrs.global_pooling {
            let pads_fit = attrs.pad_t < attrs.kernel_h
                && attrs.pad_b < attrs.kernel_h
                && attrs.pad_l < attrs.kernel_w
                && attrs.pad_r < attrs.kernel_w;
            if !pads_fit {
                return Err(Error::InvalidConfig(
                    "padding must be smaller than the kernel".into(),
                ));
            }
        }
        let kind = if def.type_name().starts_with("MaxPool") {
            PoolKind::Max
        } else if def.type_name().starts_with("AveragePool") {
            PoolKind::Avg
        } else {
            return Err(Error::InvalidConfig(format!(
                "unsupported pooling method: {}",
                def.type_name()
            )));
        };
        Ok(Self {
            dev,
            kind,
            attrs,
            cached_input_dims: Vec::new(),
            plan: None,
            workspace: None,
            staging: Vec::new(),
            staging_mode: None,
            plans_built: 0,
        })
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// How many times the backend plan has been compiled. One after the
    /// first call; grows only when the input shape changes.
    pub fn plans_built(&self) -> usize {
        self.plans_built
    }

    /// The staging decision of the most recent execution, `None` before
    /// any call.
    pub fn staging_mode(&self) -> Option<StagingMode> {
        self.staging_mode
    }

    /// Executes on a channel-major input, materializing into `y`.
    ///
    /// The cached plan is rebuilt when (and only when) `x`'s dims differ
    /// from the previous call's; the first call always builds. Whether the
    /// plan was rebuilt or not, each call re-decides whether `y`'s storage
    /// can be written directly or a staging copy is needed.
    pub fn run_nchw(&mut self, x: &Tensor<E>, y: &mut Tensor<E>) -> Result<(), Error> {
        let dims_changed = self.cached_input_dims != x.dims();
        if dims_changed {
            if x.dims().len() != 4 {
                return Err(Error::Precondition(format!(
                    "pooling expects a rank-4 NCHW input, got rank {}",
                    x.dims().len()
                )));
            }
            let out_dims = self.attrs.output_dims(x.dims(), x.dims()[1])?;
            let r = self.attrs.resolve(x.dims()[2], x.dims()[3]);
            let desc = PoolDesc {
                kind: self.kind,
                kernel: [r.kernel_w, r.kernel_h],
                stride: [r.stride_w, r.stride_h],
                offsets: [
                    -(r.pad_l as i64),
                    -(r.pad_t as i64),
                    -(r.pad_r as i64),
                    -(r.pad_b as i64),
                ],
                border: BorderKind::ZerosAsymm,
            };
            let plan = self.dev.create_pool_forward(&desc, x.layout())?;
            if plan.dst_layout().dims() != out_dims.as_slice() {
                return Err(Error::Backend(format!(
                    "backend destination dims {:?} disagree with inferred dims {:?}",
                    plan.dst_layout().dims(),
                    out_dims
                )));
            }
            y.resize_for(plan.dst_layout());
            self.staging = vec![E::zero(); plan.dst_layout().storage_len()];
            // free-before-replace: never two live workspaces per instance
            self.workspace = None;
            self.workspace = Some(self.dev.alloc_workspace(&plan)?);
            self.plan = Some(plan);
            self.plans_built += 1;
            self.cached_input_dims = x.dims().to_vec();
        }
        let Some(plan) = self.plan.as_ref() else {
            return Err(Error::Backend("pooling plan was not built".into()));
        };
        // a cached plan is keyed by dims alone, so an input re-laid with
        // the same dims but different strides must not reach the kernel
        if x.layout() != plan.src_layout() {
            return Err(Error::Backend(format!(
                "input layout {:?} does not match the compiled plan's source {:?}",
                x.layout(),
                plan.src_layout()
            )));
        }
        let mode = if y.layout() == plan.dst_layout() {
            StagingMode::Aliased
        } else {
            StagingMode::Private
        };
        self.staging_mode = Some(mode);
        match mode {
            StagingMode::Aliased => {
                self.dev.execute(
                    plan,
                    Resources {
                        src: x.as_slice(),
                        dst: y.as_mut_slice(),
                        workspace: self.workspace.as_mut(),
                    },
                )?;
            }
            StagingMode::Private => {
                self.dev.execute(
                    plan,
                    Resources {
                        src: x.as_slice(),
                        dst: self.staging.as_mut_slice(),
                        workspace: self.workspace.as_mut(),
                    },
                )?;
                self.dev.copy_out(plan, &self.staging, y)?;
            }
        }
        Ok(())
    }

    /// Pixel-major execution has no backend path; every invocation is
    /// rejected, regardless of the input.
    pub fn run_nhwc(&mut self, _x: &Tensor<E>, _y: &mut Tensor<E>) -> Result<(), Error> {
        Err(Error::UnsupportedLayout(Order::Nhwc))
    }
}

impl<E: Dtype, D: PoolBackend<E>> Operator<E> for PoolOp<E, D> {
    fn run(
        &mut self,
        inputs: &[&Tensor<E>],
        outputs: &mut [&mut Tensor<E>],
    ) -> Result<(), Error> {
        if inputs.len() != 1 || outputs.len() != 1 {
            return Err(Error::Precondition(format!(
                "pooling takes 1 input and 1 output, got {} and {}",
                inputs.len(),
                outputs.len()
            )));
        }
        let x = inputs[0];
        let y = &mut *outputs[0];
        match self.attrs.order {
            Order::Nchw => self.run_nchw(x, y),
            Order::Nhwc => self.run_nhwc(x, y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Cpu;
    use crate::shapes::TensorLayout;
    use crate::tests::{AssertClose, TestDtype};

    fn max_pool(kernel: i64, stride: i64, pad: i64) -> PoolOp<TestDtype, Cpu> {
        let def = OpDef::new("MaxPool")
            .with_attr("kernel", kernel)
            .with_attr("stride", stride)
            .with_attr("pad", pad);
        PoolOp::new(&def, Cpu).unwrap()
    }

    fn avg_pool(kernel: i64, stride: i64, pad: i64) -> PoolOp<TestDtype, Cpu> {
        let def = OpDef::new("AveragePool")
            .with_attr("kernel", kernel)
            .with_attr("stride", stride)
            .with_attr("pad", pad);
        PoolOp::new(&def, Cpu).unwrap()
    }

    fn nchw(dims: &[usize], data: Vec<TestDtype>) -> Tensor<TestDtype> {
        Tensor::from_vec(TensorLayout::contiguous(Order::Nchw, dims), data).unwrap()
    }

    #[test]
    fn test_kind_from_type_name() {
        let op = PoolOp::<TestDtype, _>::new(&OpDef::new("MaxPool2D").with_attr("kernel", 2), Cpu);
        assert_eq!(op.unwrap().kind(), PoolKind::Max);
        let op =
            PoolOp::<TestDtype, _>::new(&OpDef::new("AveragePool1D").with_attr("kernel", 2), Cpu);
        assert_eq!(op.unwrap().kind(), PoolKind::Avg);
        let op = PoolOp::<TestDtype, _>::new(&OpDef::new("LpPool").with_attr("kernel", 2), Cpu);
        assert!(matches!(op, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_construction_rejects_dilation() {
        let def = OpDef::new("MaxPool").with_attr("kernel", 2).with_attr("dilation", 2);
        assert!(matches!(
            PoolOp::<TestDtype, _>::new(&def, Cpu),
            Err(Error::InvalidConfig(_))
        ));
        let def = OpDef::new("MaxPool").with_attr("kernel", 2).with_attr("dilation_w", 2);
        assert!(matches!(
            PoolOp::<TestDtype, _>::new(&def, Cpu),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_construction_rejects_pad_ge_kernel() {
        let def = OpDef::new("MaxPool").with_attr("kernel", 2).with_attr("pad", 2);
        assert!(matches!(
            PoolOp::<TestDtype, _>::new(&def, Cpu),
            Err(Error::InvalidConfig(_))
        ));
        // per-axis: pad_l hits kernel_w
        let def = OpDef::new("MaxPool")
            .with_attr("kernel_h", 3)
            .with_attr("kernel_w", 2)
            .with_attr("pad_l", 2);
        assert!(matches!(
            PoolOp::<TestDtype, _>::new(&def, Cpu),
            Err(Error::InvalidConfig(_))
        ));
        // same pad is fine under the taller kernel axis
        let def = OpDef::new("MaxPool")
            .with_attr("kernel_h", 3)
            .with_attr("kernel_w", 3)
            .with_attr("pad", 2);
        assert!(PoolOp::<TestDtype, _>::new(&def, Cpu).is_ok());
    }

    #[test]
    fn test_global_pooling_skips_pad_check() {
        let def = OpDef::new("AveragePool")
            .with_attr("global_pooling", 1)
            .with_attr("pad", 5);
        assert!(PoolOp::<TestDtype, _>::new(&def, Cpu).is_ok());
    }

    #[test]
    fn test_max_constant_window() {
        let mut op = max_pool(2, 2, 0);
        let x = nchw(&[1, 1, 4, 4], vec![3.5; 16]);
        let mut y = Tensor::empty(Order::Nchw);
        op.run_nchw(&x, &mut y).unwrap();
        assert_eq!(y.dims(), &[1, 1, 2, 2]);
        y.as_slice().assert_close(&[3.5; 4]);
    }

    #[test]
    fn test_avg_2x2() {
        let mut op = avg_pool(2, 2, 0);
        let x = nchw(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let mut y = Tensor::empty(Order::Nchw);
        op.run_nchw(&x, &mut y).unwrap();
        y.as_slice().assert_close(&[2.5]);
    }

    #[test]
    fn test_output_shape_formula() {
        let mut op = max_pool(2, 2, 0);
        let x = nchw(&[2, 3, 4, 4], vec![0.0; 96]);
        let mut y = Tensor::empty(Order::Nchw);
        op.run_nchw(&x, &mut y).unwrap();
        assert_eq!(y.dims(), &[2, 3, 2, 2]);

        let mut op = avg_pool(3, 1, 1);
        let x = nchw(&[1, 2, 5, 5], vec![0.0; 50]);
        let mut y = Tensor::empty(Order::Nchw);
        op.run_nchw(&x, &mut y).unwrap();
        assert_eq!(y.dims(), &[1, 2, 5, 5]);
    }

    #[test]
    fn test_plan_reuse_and_rebuild() {
        let mut op = max_pool(2, 2, 0);
        let mut y = Tensor::empty(Order::Nchw);

        let x = nchw(&[1, 1, 4, 4], vec![1.0; 16]);
        op.run_nchw(&x, &mut y).unwrap();
        op.run_nchw(&x, &mut y).unwrap();
        op.run_nchw(&x, &mut y).unwrap();
        assert_eq!(op.plans_built(), 1);

        let x = nchw(&[1, 1, 6, 6], vec![1.0; 36]);
        op.run_nchw(&x, &mut y).unwrap();
        assert_eq!(op.plans_built(), 2);
        assert_eq!(y.dims(), &[1, 1, 3, 3]);
        op.run_nchw(&x, &mut y).unwrap();
        assert_eq!(op.plans_built(), 2);
    }

    #[test]
    fn test_repeat_runs_bit_identical() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(42);
        let data: Vec<TestDtype> = (0..2 * 3 * 6 * 6)
            .map(|_| rng.sample(rand_distr::StandardNormal))
            .collect();
        let x = nchw(&[2, 3, 6, 6], data);

        let mut op = max_pool(3, 2, 1);
        let mut y1 = Tensor::empty(Order::Nchw);
        op.run_nchw(&x, &mut y1).unwrap();
        let first = y1.as_slice().to_vec();
        op.run_nchw(&x, &mut y1).unwrap();
        let bits = |v: &[TestDtype]| v.iter().map(|e| e.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first), bits(y1.as_slice()));
    }

    #[test]
    fn test_aliased_staging_when_layout_matches() {
        let mut op = avg_pool(2, 2, 0);
        let x = nchw(&[1, 2, 4, 4], vec![1.0; 32]);
        let mut y = Tensor::empty(Order::Nchw);
        op.run_nchw(&x, &mut y).unwrap();
        assert_eq!(op.staging_mode(), Some(StagingMode::Aliased));
    }

    #[test]
    fn test_private_staging_copies_into_prelaid_output() {
        let mut op = avg_pool(1, 1, 0);
        let x = nchw(&[1, 2, 1, 2], vec![1.0, 2.0, 3.0, 4.0]);
        // output pre-placed channel-last by the caller
        let layout = TensorLayout::with_strides(Order::Nchw, &[1, 2, 1, 2], &[4, 1, 4, 2]);
        let mut y = Tensor::from_vec(layout, vec![0.0; 4]).unwrap();
        op.run_nchw(&x, &mut y).unwrap();
        assert_eq!(op.staging_mode(), Some(StagingMode::Private));
        assert_eq!(y.get(&[0, 0, 0, 1]), 2.0);
        assert_eq!(y.get(&[0, 1, 0, 0]), 3.0);
        assert_eq!(y.as_slice(), &[1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_cached_plan_rejects_relaid_input() {
        let mut op = avg_pool(1, 1, 0);
        let mut y = Tensor::empty(Order::Nchw);

        let x = nchw(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        op.run_nchw(&x, &mut y).unwrap();
        assert_eq!(y.as_slice(), &[1.0, 2.0, 3.0, 4.0]);

        // same dims, transposed storage: must fail, not read storage order
        let relaid = TensorLayout::with_strides(Order::Nchw, &[1, 1, 2, 2], &[4, 4, 1, 2]);
        let x = Tensor::from_vec(relaid, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(matches!(op.run_nchw(&x, &mut y), Err(Error::Backend(_))));
        assert_eq!(op.plans_built(), 1);
    }

    #[test]
    fn test_global_avg_is_channel_mean() {
        let def = OpDef::new("AveragePool").with_attr("global_pooling", 1);
        let mut op = PoolOp::<TestDtype, _>::new(&def, Cpu).unwrap();
        let x = nchw(&[1, 2, 2, 2], vec![1., 2., 3., 4., 10., 20., 30., 40.]);
        let mut y = Tensor::empty(Order::Nchw);
        op.run_nchw(&x, &mut y).unwrap();
        assert_eq!(y.dims(), &[1, 2, 1, 1]);
        y.as_slice().assert_close(&[2.5, 25.0]);
    }

    #[test]
    fn test_rank_mismatch_is_precondition() {
        let mut op = max_pool(2, 2, 0);
        let x = Tensor::from_vec(
            TensorLayout::contiguous(Order::Nchw, &[1, 4, 4]),
            vec![0.0; 16],
        )
        .unwrap();
        let mut y = Tensor::empty(Order::Nchw);
        assert!(matches!(
            op.run_nchw(&x, &mut y),
            Err(Error::Precondition(_))
        ));
    }

    #[test]
    fn test_nhwc_always_rejected() {
        let mut op = max_pool(2, 2, 0);
        let x = nchw(&[1, 1, 4, 4], vec![0.0; 16]);
        let mut y = Tensor::empty(Order::Nchw);
        assert!(matches!(
            op.run_nhwc(&x, &mut y),
            Err(Error::UnsupportedLayout(Order::Nhwc))
        ));
        // the dispatcher takes the same path for an NHWC-configured node
        let def = OpDef::new("MaxPool").with_attr("kernel", 2).with_attr("order", "NHWC");
        let mut op = PoolOp::<TestDtype, _>::new(&def, Cpu).unwrap();
        assert!(matches!(
            op.run(&[&x], &mut [&mut y]),
            Err(Error::UnsupportedLayout(Order::Nhwc))
        ));
    }

    #[test]
    fn test_slot_counts() {
        let mut op = max_pool(2, 2, 0);
        let x = nchw(&[1, 1, 4, 4], vec![0.0; 16]);
        let mut y = Tensor::empty(Order::Nchw);
        assert!(matches!(
            op.run(&[&x, &x], &mut [&mut y]),
            Err(Error::Precondition(_))
        ));
        assert!(matches!(op.run(&[&x], &mut []), Err(Error::Precondition(_))));
    }

    #[test]
    fn test_max_asymmetric_padding() {
        // pad only above: out_h = (2 + 1 - 2) / 1 + 1 = 2
        let def = OpDef::new("MaxPool")
            .with_attr("kernel", 2)
            .with_attr("pad_t", 1);
        let mut op = PoolOp::<TestDtype, _>::new(&def, Cpu).unwrap();
        let x = nchw(&[1, 1, 2, 2], vec![-1.0, -2.0, -3.0, -4.0]);
        let mut y = Tensor::empty(Order::Nchw);
        op.run_nchw(&x, &mut y).unwrap();
        assert_eq!(y.dims(), &[1, 1, 2, 1]);
        // top window sees the zero border, bottom window does not
        y.as_slice().assert_close(&[0.0, -1.0]);
    }
}
