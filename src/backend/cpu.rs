use crate::dtypes::Dtype;
use crate::shapes::{Order, TensorLayout};
use crate::tensor::Tensor;
use crate::Error;

use super::{BorderKind, PoolBackend, PoolDesc, PoolKind, PoolPlan, Resources};

/// Workspace entry recorded when the zero border won a max-pooling window,
/// i.e. the output element has no source element to point back at.
pub const BORDER_SENTINEL: usize = usize::MAX;

/// Reference host backend. Stateless; cloning is free.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cpu;

/// A compiled plan for [Cpu]: the validated descriptor plus the source and
/// destination layouts it was compiled against.
#[derive(Debug, Clone)]
pub struct CpuPlan {
    kind: PoolKind,
    src: TensorLayout,
    dst: TensorLayout,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    pad_t: usize,
    pad_l: usize,
    ws_len: usize,
}

impl PoolPlan for CpuPlan {
    fn src_layout(&self) -> &TensorLayout {
        &self.src
    }

    fn dst_layout(&self) -> &TensorLayout {
        &self.dst
    }

    fn workspace_len(&self) -> usize {
        self.ws_len
    }
}

/// Max-pooling scratch state: for each destination element, the linear
/// source index its value came from ([BORDER_SENTINEL] when the zero
/// border won).
#[derive(Debug)]
pub struct CpuWorkspace {
    argmax: Vec<usize>,
}

impl CpuWorkspace {
    pub fn argmax(&self) -> &[usize] {
        &self.argmax
    }
}

impl<E: Dtype> PoolBackend<E> for Cpu {
    type Plan = CpuPlan;
    type Workspace = CpuWorkspace;

    fn create_pool_forward(
        &self,
        desc: &PoolDesc,
        src: &TensorLayout,
    ) -> Result<Self::Plan, Error> {
        let BorderKind::ZerosAsymm = desc.border;
        if src.rank() != 4 {
            return Err(Error::Backend(format!(
                "pooling requires a rank-4 source, got rank {}",
                src.rank()
            )));
        }
        if src.order() != Order::Nchw {
            return Err(Error::Backend(format!(
                "cpu pooling primitive only compiles {} sources",
                Order::Nchw.name()
            )));
        }
        if !src.is_contiguous() {
            return Err(Error::Backend(
                "cpu pooling primitive requires a contiguous source".into(),
            ));
        }
        let [kernel_w, kernel_h] = desc.kernel;
        let [stride_w, stride_h] = desc.stride;
        if kernel_w == 0 || kernel_h == 0 || stride_w == 0 || stride_h == 0 {
            return Err(Error::Backend(format!(
                "degenerate pooling descriptor: kernel {:?} stride {:?}",
                desc.kernel, desc.stride
            )));
        }
        if desc.offsets.iter().any(|&o| o > 0) {
            return Err(Error::Backend(format!(
                "padding offsets must be non-positive, got {:?}",
                desc.offsets
            )));
        }
        let [pad_l, pad_t, pad_r, pad_b] = desc.offsets.map(|o| (-o) as usize);

        let (h, w) = (src.dims()[2], src.dims()[3]);
        let out_h = pooled_size(h, pad_t, pad_b, kernel_h, stride_h)?;
        let out_w = pooled_size(w, pad_l, pad_r, kernel_w, stride_w)?;
        let dst = TensorLayout::contiguous(
            Order::Nchw,
            &[src.dims()[0], src.dims()[1], out_h, out_w],
        );
        let ws_len = match desc.kind {
            PoolKind::Max => dst.num_elements(),
            PoolKind::Avg => 0,
        };
        Ok(CpuPlan {
            kind: desc.kind,
            src: src.clone(),
            dst,
            kernel_h,
            kernel_w,
            stride_h,
            stride_w,
            pad_t,
            pad_l,
            ws_len,
        })
    }

    fn alloc_workspace(&self, plan: &Self::Plan) -> Result<Self::Workspace, Error> {
        Ok(CpuWorkspace {
            argmax: vec![BORDER_SENTINEL; plan.ws_len],
        })
    }

    fn execute(
        &self,
        plan: &Self::Plan,
        res: Resources<'_, E, Self::Workspace>,
    ) -> Result<(), Error> {
        if res.src.len() < plan.src.storage_len() {
            return Err(Error::Backend(format!(
                "source slot holds {} elements, plan requires {}",
                res.src.len(),
                plan.src.storage_len()
            )));
        }
        if res.dst.len() < plan.dst.storage_len() {
            return Err(Error::Backend(format!(
                "destination slot holds {} elements, plan requires {}",
                res.dst.len(),
                plan.dst.storage_len()
            )));
        }
        match plan.kind {
            PoolKind::Max => {
                let ws = match res.workspace {
                    Some(ws) if ws.argmax.len() == plan.ws_len => ws,
                    Some(_) => {
                        return Err(Error::Backend(
                            "workspace slot sized for a different plan".into(),
                        ))
                    }
                    None => {
                        return Err(Error::Backend(
                            "max pooling requires a bound workspace slot".into(),
                        ))
                    }
                };
                max_forward(plan, res.src, res.dst, &mut ws.argmax);
            }
            // the workspace slot is ignored for average pooling
            PoolKind::Avg => {
                let area = E::from_usize(plan.kernel_h * plan.kernel_w).ok_or_else(|| {
                    Error::Backend(format!(
                        "kernel area {} is not representable in the element type",
                        plan.kernel_h * plan.kernel_w
                    ))
                })?;
                avg_forward(plan, res.src, res.dst, area);
            }
        }
        Ok(())
    }

    fn copy_out(
        &self,
        plan: &Self::Plan,
        staging: &[E],
        dst: &mut Tensor<E>,
    ) -> Result<(), Error> {
        if dst.dims() != plan.dst.dims() {
            return Err(Error::Backend(format!(
                "copy-out destination dims {:?} do not match plan dims {:?}",
                dst.dims(),
                plan.dst.dims()
            )));
        }
        if staging.len() < plan.dst.num_elements() {
            return Err(Error::Backend(
                "staging slot smaller than the plan's destination".into(),
            ));
        }
        let layout = dst.layout().clone();
        if layout == plan.dst {
            let n = plan.dst.num_elements();
            dst.as_mut_slice()[..n].copy_from_slice(&staging[..n]);
            return Ok(());
        }
        let [b, c, h, w] = [layout.dims()[0], layout.dims()[1], layout.dims()[2], layout.dims()[3]];
        let out = dst.as_mut_slice();
        let mut i = 0;
        for n in 0..b {
            for ch in 0..c {
                for y in 0..h {
                    for x in 0..w {
                        out[layout.offset_of(&[n, ch, y, x])] = staging[i];
                        i += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

fn pooled_size(
    input: usize,
    pad_before: usize,
    pad_after: usize,
    kernel: usize,
    stride: usize,
) -> Result<usize, Error> {
    match (input + pad_before + pad_after).checked_sub(kernel) {
        Some(span) => Ok(span / stride + 1),
        None => Err(Error::Backend(format!(
            "kernel {kernel} does not fit padded input {input}+{pad_before}+{pad_after}"
        ))),
    }
}

fn max_forward<E: Dtype>(plan: &CpuPlan, src: &[E], dst: &mut [E], argmax: &mut [usize]) {
    let [batch, chan, h, w] = [
        plan.src.dims()[0],
        plan.src.dims()[1],
        plan.src.dims()[2],
        plan.src.dims()[3],
    ];
    let (out_h, out_w) = (plan.dst.dims()[2], plan.dst.dims()[3]);
    let mut o = 0;
    for n in 0..batch {
        for c in 0..chan {
            let base = (n * chan + c) * h * w;
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut best = E::neg_infinity();
                    let mut best_at = BORDER_SENTINEL;
                    let mut hit_border = false;
                    for kh in 0..plan.kernel_h {
                        let y = (oh * plan.stride_h + kh) as isize - plan.pad_t as isize;
                        for kw in 0..plan.kernel_w {
                            let x = (ow * plan.stride_w + kw) as isize - plan.pad_l as isize;
                            if y >= 0 && (y as usize) < h && x >= 0 && (x as usize) < w {
                                let at = base + y as usize * w + x as usize;
                                if src[at] > best {
                                    best = src[at];
                                    best_at = at;
                                }
                            } else {
                                hit_border = true;
                            }
                        }
                    }
                    // zeros border: an out-of-bounds element reads as zero
                    if hit_border && E::zero() > best {
                        best = E::zero();
                        best_at = BORDER_SENTINEL;
                    }
                    dst[o] = best;
                    argmax[o] = best_at;
                    o += 1;
                }
            }
        }
    }
}

fn avg_forward<E: Dtype>(plan: &CpuPlan, src: &[E], dst: &mut [E], area: E) {
    let [batch, chan, h, w] = [
        plan.src.dims()[0],
        plan.src.dims()[1],
        plan.src.dims()[2],
        plan.src.dims()[3],
    ];
    let (out_h, out_w) = (plan.dst.dims()[2], plan.dst.dims()[3]);
    let mut o = 0;
    for n in 0..batch {
        for c in 0..chan {
            let base = (n * chan + c) * h * w;
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut sum = E::zero();
                    for kh in 0..plan.kernel_h {
                        let y = (oh * plan.stride_h + kh) as isize - plan.pad_t as isize;
                        for kw in 0..plan.kernel_w {
                            let x = (ow * plan.stride_w + kw) as isize - plan.pad_l as isize;
                            if y >= 0 && (y as usize) < h && x >= 0 && (x as usize) < w {
                                sum += src[base + y as usize * w + x as usize];
                            }
                        }
                    }
                    dst[o] = sum / area;
                    o += 1;
                }
            }
        }
    }
}
