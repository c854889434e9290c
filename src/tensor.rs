//! The host framework's tensor representation: heap storage plus a
//! [TensorLayout] describing how the backend should address it.

use crate::dtypes::Dtype;
use crate::shapes::{Order, TensorLayout};
use crate::Error;

/// A backend-resident tensor as the graph framework sees it: owned element
/// storage and a memory descriptor. Operators read inputs through `&Tensor`
/// and materialize results through `&mut Tensor`; the tensor itself carries
/// no autograd or device state.
#[derive(Debug, Clone)]
pub struct Tensor<E> {
    data: Vec<E>,
    layout: TensorLayout,
}

impl<E: Dtype> Tensor<E> {
    /// Wraps existing element data in a layout. The data must be at least
    /// as long as the layout's storage requirement.
    pub fn from_vec(layout: TensorLayout, data: Vec<E>) -> Result<Self, Error> {
        if data.len() < layout.storage_len() {
            return Err(Error::Precondition(format!(
                "tensor data has {} elements, layout requires {}",
                data.len(),
                layout.storage_len()
            )));
        }
        Ok(Self { data, layout })
    }

    /// A zero-element placeholder, the state of an output tensor before the
    /// producing operator has run.
    pub fn empty(order: Order) -> Self {
        Self {
            data: Vec::new(),
            layout: TensorLayout::contiguous(order, &[0]),
        }
    }

    /// Zero-filled tensor with a contiguous layout.
    pub fn zeros(order: Order, dims: &[usize]) -> Self {
        let layout = TensorLayout::contiguous(order, dims);
        let data = vec![E::zero(); layout.storage_len()];
        Self { data, layout }
    }

    pub fn layout(&self) -> &TensorLayout {
        &self.layout
    }

    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    pub fn as_slice(&self) -> &[E] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [E] {
        &mut self.data
    }

    /// Points at the same element as `layout.offset_of`, for tests that
    /// want to read a strided tensor logically.
    pub fn get(&self, idx: &[usize]) -> E {
        self.data[self.layout.offset_of(idx)]
    }

    /// Shapes this tensor for use as an operator output, keyed off the
    /// producing plan's destination descriptor.
    ///
    /// If the tensor already has the target dims, its existing layout and
    /// storage are kept: a framework that pre-placed the output with its
    /// own strides keeps them, and the producing operator falls back to a
    /// converting copy. Otherwise the tensor adopts the target layout
    /// wholesale.
    pub(crate) fn resize_for(&mut self, target: &TensorLayout) {
        if self.layout.dims() != target.dims() {
            self.layout = target.clone();
        }
        let need = self.layout.storage_len();
        if self.data.len() != need {
            self.data.resize(need, E::zero());
        }
    }
}
