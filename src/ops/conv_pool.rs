//! Attribute parsing shared by convolution-family operators: kernel,
//! stride, padding, dilation, global pooling, and the output-size rule
//! they all agree on.

use crate::graph::OpDef;
use crate::shapes::Order;
use crate::Error;

/// Spatial attributes of a conv/pool operator, as parsed from the node
/// definition. Scalar attributes (`kernel`, `stride`, `pad`, `dilation`)
/// apply to every axis; the per-axis forms (`kernel_h`, `pad_t`, ...)
/// override them. Defaults are stride 1, padding 0, dilation 1, NCHW.
#[derive(Debug, Clone)]
pub struct ConvPoolAttrs {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_t: usize,
    pub pad_b: usize,
    pub pad_l: usize,
    pub pad_r: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub global_pooling: bool,
    pub order: Order,
}

/// Attributes with global pooling folded in for a concrete spatial extent:
/// a global window becomes a kernel spanning the whole input with unit
/// stride and no padding.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPool {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_t: usize,
    pub pad_b: usize,
    pub pad_l: usize,
    pub pad_r: usize,
}

fn usize_attr(def: &OpDef, name: &str) -> Result<Option<usize>, Error> {
    match def.int_attr(name)? {
        None => Ok(None),
        Some(v) if v >= 0 => Ok(Some(v as usize)),
        Some(v) => Err(Error::InvalidConfig(format!(
            "attribute {name} must be non-negative, got {v}"
        ))),
    }
}

fn usize_list_attr(def: &OpDef, name: &str, len: usize) -> Result<Option<Vec<usize>>, Error> {
    let Some(values) = def.ints_attr(name)? else {
        return Ok(None);
    };
    if values.len() != len {
        return Err(Error::InvalidConfig(format!(
            "attribute {name} must hold {len} values, got {}",
            values.len()
        )));
    }
    values
        .iter()
        .map(|&v| {
            if v >= 0 {
                Ok(v as usize)
            } else {
                Err(Error::InvalidConfig(format!(
                    "attribute {name} must be non-negative, got {v}"
                )))
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// The list form of an attribute family excludes its scalar/per-axis forms.
fn reject_mixed_forms(def: &OpDef, list: &str, others: &[&str]) -> Result<(), Error> {
    if def.has_attr(list) {
        if let Some(name) = others.iter().find(|n| def.has_attr(n)) {
            return Err(Error::InvalidConfig(format!(
                "attribute {list} conflicts with {name}"
            )));
        }
    }
    Ok(())
}

fn axis_pair(
    def: &OpDef,
    list: &str,
    scalar: &str,
    first: &str,
    second: &str,
    default: usize,
) -> Result<(usize, usize), Error> {
    reject_mixed_forms(def, list, &[scalar, first, second])?;
    if let Some(v) = usize_list_attr(def, list, 2)? {
        return Ok((v[0], v[1]));
    }
    let base = usize_attr(def, scalar)?.unwrap_or(default);
    let a = usize_attr(def, first)?.unwrap_or(base);
    let b = usize_attr(def, second)?.unwrap_or(base);
    Ok((a, b))
}

impl ConvPoolAttrs {
    pub fn from_def(def: &OpDef) -> Result<Self, Error> {
        let order = match def.str_attr("order")?.unwrap_or("NCHW") {
            "NCHW" => Order::Nchw,
            "NHWC" => Order::Nhwc,
            other => {
                return Err(Error::InvalidConfig(format!(
                    "unknown storage order {other:?}"
                )))
            }
        };
        let global_pooling = def.int_attr("global_pooling")?.unwrap_or(0) != 0;
        let (kernel_h, kernel_w) = axis_pair(def, "kernels", "kernel", "kernel_h", "kernel_w", 0)?;
        let (stride_h, stride_w) = axis_pair(def, "strides", "stride", "stride_h", "stride_w", 1)?;
        let (dilation_h, dilation_w) =
            axis_pair(def, "dilations", "dilation", "dilation_h", "dilation_w", 1)?;
        reject_mixed_forms(def, "pads", &["pad", "pad_t", "pad_b", "pad_l", "pad_r"])?;
        // the list form is (top, left, bottom, right)
        let (pad_t, pad_l, pad_b, pad_r) = match usize_list_attr(def, "pads", 4)? {
            Some(v) => (v[0], v[1], v[2], v[3]),
            None => {
                let pad = usize_attr(def, "pad")?.unwrap_or(0);
                (
                    usize_attr(def, "pad_t")?.unwrap_or(pad),
                    usize_attr(def, "pad_l")?.unwrap_or(pad),
                    usize_attr(def, "pad_b")?.unwrap_or(pad),
                    usize_attr(def, "pad_r")?.unwrap_or(pad),
                )
            }
        };

        if !global_pooling && (kernel_h == 0 || kernel_w == 0) {
            return Err(Error::InvalidConfig(
                "kernel size is required unless global_pooling is set".into(),
            ));
        }
        if stride_h == 0 || stride_w == 0 || dilation_h == 0 || dilation_w == 0 {
            return Err(Error::InvalidConfig(
                "stride and dilation must be at least 1".into(),
            ));
        }

        Ok(Self {
            kernel_h,
            kernel_w,
            stride_h,
            stride_w,
            pad_t,
            pad_b,
            pad_l,
            pad_r,
            dilation_h,
            dilation_w,
            global_pooling,
            order,
        })
    }

    /// Folds global pooling into concrete window parameters for an input
    /// of the given spatial extent.
    pub fn resolve(&self, h: usize, w: usize) -> ResolvedPool {
        if self.global_pooling {
            ResolvedPool {
                kernel_h: h,
                kernel_w: w,
                stride_h: 1,
                stride_w: 1,
                pad_t: 0,
                pad_b: 0,
                pad_l: 0,
                pad_r: 0,
            }
        } else {
            ResolvedPool {
                kernel_h: self.kernel_h,
                kernel_w: self.kernel_w,
                stride_h: self.stride_h,
                stride_w: self.stride_w,
                pad_t: self.pad_t,
                pad_b: self.pad_b,
                pad_l: self.pad_l,
                pad_r: self.pad_r,
            }
        }
    }

    /// The output dims for a rank-4 input, with the channel count supplied
    /// explicitly. Batch passes through; spatial axes follow
    /// `floor((in + pad_before + pad_after - kernel) / stride) + 1`.
    pub fn output_dims(&self, input: &[usize], channels: usize) -> Result<Vec<usize>, Error> {
        if input.len() != 4 {
            return Err(Error::Precondition(format!(
                "expected a rank-4 input, got rank {}",
                input.len()
            )));
        }
        let r = self.resolve(input[2], input[3]);
        let out_h = output_size(input[2], r.pad_t, r.pad_b, r.kernel_h, r.stride_h)?;
        let out_w = output_size(input[3], r.pad_l, r.pad_r, r.kernel_w, r.stride_w)?;
        Ok(vec![input[0], channels, out_h, out_w])
    }
}

/// The shared conv/pool output-size rule for one axis.
pub(crate) fn output_size(
    input: usize,
    pad_before: usize,
    pad_after: usize,
    kernel: usize,
    stride: usize,
) -> Result<usize, Error> {
    match (input + pad_before + pad_after).checked_sub(kernel) {
        Some(span) => Ok(span / stride + 1),
        None => Err(Error::Precondition(format!(
            "kernel {kernel} larger than padded input {input}"
        ))),
    }
}
