//! Runtime shape & memory layout descriptors.
//!
//! Layouts here are deliberately runtime-valued: the adapters in this crate
//! cache execution plans keyed off shapes that are only known once the graph
//! is fed data, so there is nothing for the type system to pin down ahead of
//! time.

/// Memory axis ordering for rank-4 image tensors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Order {
    /// Channel-major: batch, channel, height, width.
    Nchw,
    /// Pixel-major: batch, height, width, channel.
    Nhwc,
}

impl Order {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Order::Nchw => "NCHW",
            Order::Nhwc => "NHWC",
        }
    }
}

/// A tensor memory descriptor: logical dimension sizes, the stride (in
/// elements) for each axis, and the axis-order convention the dims follow.
///
/// Two layouts compare equal only when dims, strides, and order all match;
/// this is exactly the check the pooling adapter uses to decide whether the
/// caller's output storage can stand in for its staging buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorLayout {
    order: Order,
    dims: Vec<usize>,
    strides: Vec<usize>,
}

impl TensorLayout {
    /// A contiguous (row-major over `dims`) layout.
    pub fn contiguous(order: Order, dims: &[usize]) -> Self {
        let mut strides = vec![1; dims.len()];
        for i in (0..dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * dims[i + 1];
        }
        Self {
            order,
            dims: dims.to_vec(),
            strides,
        }
    }

    /// A layout with caller-chosen strides, e.g. an output tensor a
    /// framework pre-allocated with its own placement policy.
    pub fn with_strides(order: Order, dims: &[usize], strides: &[usize]) -> Self {
        assert_eq!(dims.len(), strides.len());
        Self {
            order,
            dims: dims.to_vec(),
            strides: strides.to_vec(),
        }
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of logical elements.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Number of storage elements required to back this layout: one past
    /// the largest reachable linear offset. Zero for empty tensors.
    pub fn storage_len(&self) -> usize {
        if self.dims.iter().any(|&d| d == 0) {
            return 0;
        }
        let last = self
            .dims
            .iter()
            .zip(self.strides.iter())
            .map(|(&d, &s)| (d - 1) * s)
            .sum::<usize>();
        last + 1
    }

    /// Linear storage offset of a logical index.
    pub fn offset_of(&self, idx: &[usize]) -> usize {
        debug_assert_eq!(idx.len(), self.dims.len());
        idx.iter().zip(self.strides.iter()).map(|(&i, &s)| i * s).sum()
    }

    pub fn is_contiguous(&self) -> bool {
        *self == Self::contiguous(self.order, &self.dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_strides() {
        let l = TensorLayout::contiguous(Order::Nchw, &[2, 3, 4, 5]);
        assert_eq!(l.strides(), &[60, 20, 5, 1]);
        assert_eq!(l.num_elements(), 120);
        assert_eq!(l.storage_len(), 120);
        assert!(l.is_contiguous());
    }

    #[test]
    fn test_custom_strides_storage_len() {
        // channel-last placement of NCHW dims
        let l = TensorLayout::with_strides(Order::Nchw, &[1, 2, 2, 2], &[8, 1, 4, 2]);
        assert_eq!(l.storage_len(), 8);
        assert!(!l.is_contiguous());
        assert_eq!(l.offset_of(&[0, 1, 1, 1]), 7);
    }

    #[test]
    fn test_layout_equality_is_strict() {
        let a = TensorLayout::contiguous(Order::Nchw, &[1, 2, 2, 2]);
        let b = TensorLayout::with_strides(Order::Nchw, &[1, 2, 2, 2], &[8, 1, 4, 2]);
        let c = TensorLayout::contiguous(Order::Nhwc, &[1, 2, 2, 2]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, TensorLayout::contiguous(Order::Nchw, &[1, 2, 2, 2]));
    }

    #[test]
    fn test_zero_sized_dims() {
        let l = TensorLayout::contiguous(Order::Nchw, &[2, 0, 3, 3]);
        assert_eq!(l.num_elements(), 0);
        assert_eq!(l.storage_len(), 0);
    }
}
