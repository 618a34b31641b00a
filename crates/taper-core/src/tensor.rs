use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};
use crate::index::Key;
use crate::op::{apply, IntoTensor, Operation, TensorId};
use crate::ops;
use crate::shape::to_standard;

// Tensor — the graph-participant value type
//
// A Tensor wraps one owned `ndarray` buffer of f64 plus the autodiff
// bookkeeping that makes it a node in the computation graph:
//
//   1. The buffer and its shape, immutable after construction. Partial
//      updates are expressed through set_slice, which produces a NEW tensor;
//      nothing ever aliases or mutates a buffer in place.
//   2. The producing operation (None for leaves), an Arc back-reference that
//      keeps the subgraph behind this tensor alive.
//   3. A gradient accumulator, lazily allocated on the first backward
//      contribution and summed (never overwritten) across contributions.
//   4. The requires_grad / retain_grad flags controlling which gradients
//      survive once backward() returns.
//
// MEMORY MODEL: Tensor is a cheap-clone handle (`Arc<TensorInner>`). Cloning
// increments a refcount; the graph holds input tensors alive through the
// operations that consumed them, and everything is dropped together when the
// last downstream output goes away.

struct TensorInner {
    /// Unique identifier, used as the traversal key during backward.
    id: TensorId,
    /// The buffer, always in standard row-major layout.
    data: ArrayD<f64>,
    /// The operation that produced this tensor; None for leaves.
    op: Option<Arc<dyn Operation>>,
    /// Whether this is a trainable leaf whose gradient should be kept.
    requires_grad: bool,
    /// Opt-in: keep this tensor's gradient past its one propagation use.
    retain_grad: AtomicBool,
    /// Accumulated gradient, shaped like `data` whenever present.
    grad: RwLock<Option<ArrayD<f64>>>,
}

/// An n-dimensional array of f64 participating in the autodiff graph.
pub struct Tensor {
    inner: Arc<TensorInner>,
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(id={:?}, shape={:?}, op={})",
            self.inner.id,
            self.dims(),
            self.inner.op.as_ref().map(|o| o.name()).unwrap_or("leaf"),
        )
    }
}

impl Tensor {
    // Internal constructors

    fn from_parts(data: ArrayD<f64>, op: Option<Arc<dyn Operation>>, requires_grad: bool) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                data: to_standard(data),
                op,
                requires_grad,
                retain_grad: AtomicBool::new(false),
                grad: RwLock::new(None),
            }),
        }
    }

    /// Wrap an operation's forward result, stamping the producing operation.
    pub(crate) fn from_op(data: ArrayD<f64>, op: Arc<dyn Operation>) -> Self {
        Self::from_parts(data, Some(op), false)
    }

    // Creation

    /// A rank-0 tensor holding a single value.
    pub fn scalar(value: f64) -> Self {
        Self::from_parts(ArrayD::from_elem(IxDyn(&[]), value), None, false)
    }

    /// A 1-D tensor from a flat vector.
    pub fn from_vec(values: Vec<f64>) -> Self {
        let n = values.len();
        let data = ArrayD::from_shape_vec(IxDyn(&[n]), values).expect("1-D shape always matches");
        Self::from_parts(data, None, false)
    }

    /// A 2-D tensor from nested rows. Ragged input is rejected.
    pub fn from_nested(rows: Vec<Vec<f64>>) -> Result<Self> {
        let r = rows.len();
        let c = rows.first().map(|row| row.len()).unwrap_or(0);
        if rows.iter().any(|row| row.len() != c) {
            return Err(Error::InvalidInput(
                "nested rows have unequal lengths".to_string(),
            ));
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Self::from_shape_vec(&[r, c], flat)
    }

    /// A tensor of the given shape from flat row-major data.
    pub fn from_shape_vec(dims: &[usize], values: Vec<f64>) -> Result<Self> {
        let expected = if dims.is_empty() {
            1
        } else {
            dims.iter().product()
        };
        if values.len() != expected {
            return Err(Error::ElementCount {
                shape: dims.to_vec(),
                expected,
                got: values.len(),
            });
        }
        let data = ArrayD::from_shape_vec(IxDyn(dims), values).map_err(|_| Error::ElementCount {
            shape: dims.to_vec(),
            expected,
            got: 0,
        })?;
        Ok(Self::from_parts(data, None, false))
    }

    /// A leaf tensor wrapping an existing buffer.
    pub fn from_array(data: ArrayD<f64>) -> Self {
        Self::from_parts(data, None, false)
    }

    /// A tensor filled with zeros.
    pub fn zeros(dims: &[usize]) -> Self {
        Self::from_parts(ArrayD::zeros(IxDyn(dims)), None, false)
    }

    /// A tensor filled with ones.
    pub fn ones(dims: &[usize]) -> Self {
        Self::from_parts(ArrayD::from_elem(IxDyn(dims), 1.0), None, false)
    }

    /// A tensor filled with a constant value.
    pub fn full(dims: &[usize], value: f64) -> Self {
        Self::from_parts(ArrayD::from_elem(IxDyn(dims), value), None, false)
    }

    /// Mark this tensor as a trainable variable. Variables keep their
    /// accumulated gradient once backward() returns.
    pub fn variable(self) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id: self.inner.id,
                data: self.inner.data.clone(),
                op: self.inner.op.clone(),
                requires_grad: true,
                retain_grad: AtomicBool::new(self.retains_grad()),
                grad: RwLock::new(None),
            }),
        }
    }

    /// A new leaf sharing this tensor's values but cut off from the graph.
    pub fn detach(&self) -> Self {
        Self::from_parts(self.inner.data.clone(), None, false)
    }

    // Accessors

    /// Unique tensor ID.
    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    /// The underlying buffer.
    pub fn array(&self) -> &ArrayD<f64> {
        &self.inner.data
    }

    /// The dimension sizes.
    pub fn dims(&self) -> &[usize] {
        self.inner.data.shape()
    }

    /// Number of dimensions (0 for a scalar).
    pub fn rank(&self) -> usize {
        self.inner.data.ndim()
    }

    /// Total number of elements.
    pub fn elem_count(&self) -> usize {
        self.inner.data.len()
    }

    /// The producing operation, if any.
    pub fn op(&self) -> Option<&Arc<dyn Operation>> {
        self.inner.op.as_ref()
    }

    /// Whether this tensor was created directly rather than by an operation.
    pub fn is_leaf(&self) -> bool {
        self.inner.op.is_none()
    }

    /// Whether this tensor is a trainable variable.
    pub fn requires_grad(&self) -> bool {
        self.inner.requires_grad
    }

    /// Keep this tensor's gradient past its propagation use, so it can be
    /// inspected after backward() returns.
    pub fn retain_grad(&self) {
        self.inner.retain_grad.store(true, Ordering::Relaxed);
    }

    /// Whether retain_grad() has been called on this tensor.
    pub fn retains_grad(&self) -> bool {
        self.inner.retain_grad.load(Ordering::Relaxed)
    }

    /// The accumulated gradient, if one is currently held.
    pub fn grad(&self) -> Option<ArrayD<f64>> {
        self.inner.grad.read().expect("grad lock poisoned").clone()
    }

    /// Drop any held gradient (e.g., between training steps).
    pub fn zero_grad(&self) {
        *self.inner.grad.write().expect("grad lock poisoned") = None;
    }

    /// Extract the value of a rank-0 tensor.
    pub fn item(&self) -> Result<f64> {
        if self.rank() != 0 {
            return Err(Error::ShapeMismatch {
                expected: vec![],
                got: self.dims().to_vec(),
            });
        }
        Ok(self.inner.data.iter().next().copied().unwrap_or(0.0))
    }

    /// The buffer flattened to a row-major vector.
    pub fn to_vec(&self) -> Vec<f64> {
        self.inner.data.iter().cloned().collect()
    }

    // Gradient plumbing (backward engine only)

    pub(crate) fn accumulate_grad(&self, g: &ArrayD<f64>) {
        let mut slot = self.inner.grad.write().expect("grad lock poisoned");
        match slot.as_mut() {
            Some(existing) => *existing += g,
            None => *slot = Some(g.clone()),
        }
    }

    pub(crate) fn current_grad(&self) -> Option<ArrayD<f64>> {
        self.inner.grad.read().expect("grad lock poisoned").clone()
    }

    pub(crate) fn clear_grad(&self) {
        *self.inner.grad.write().expect("grad lock poisoned") = None;
    }

    // Backward entry points

    /// Run the backward pass from this tensor with the implicit seed 1.0.
    /// Valid only for rank-0 tensors; non-scalar roots need backward_with().
    pub fn backward(&self) -> Result<()> {
        if self.rank() != 0 {
            return Err(Error::NonScalarBackward {
                shape: self.dims().to_vec(),
            });
        }
        crate::backprop::run_backward(self, ArrayD::from_elem(IxDyn(&[]), 1.0))
    }

    /// Run the backward pass with an explicit seed gradient shaped like self.
    pub fn backward_with(&self, seed: ArrayD<f64>) -> Result<()> {
        if seed.shape() != self.dims() {
            return Err(Error::SeedShape {
                expected: self.dims().to_vec(),
                got: seed.shape().to_vec(),
            });
        }
        crate::backprop::run_backward(self, seed)
    }

    // Elementwise arithmetic (broadcasting)

    pub fn add(&self, rhs: impl IntoTensor) -> Result<Tensor> {
        apply(ops::Binary::new(
            ops::BinaryKind::Add,
            self.clone(),
            rhs.into_tensor(),
        )?)
    }

    pub fn sub(&self, rhs: impl IntoTensor) -> Result<Tensor> {
        apply(ops::Binary::new(
            ops::BinaryKind::Sub,
            self.clone(),
            rhs.into_tensor(),
        )?)
    }

    pub fn mul(&self, rhs: impl IntoTensor) -> Result<Tensor> {
        apply(ops::Binary::new(
            ops::BinaryKind::Mul,
            self.clone(),
            rhs.into_tensor(),
        )?)
    }

    pub fn div(&self, rhs: impl IntoTensor) -> Result<Tensor> {
        apply(ops::Binary::new(
            ops::BinaryKind::Div,
            self.clone(),
            rhs.into_tensor(),
        )?)
    }

    /// Elementwise power; the exponent may itself be a tensor.
    pub fn pow(&self, rhs: impl IntoTensor) -> Result<Tensor> {
        apply(ops::Binary::new(
            ops::BinaryKind::Pow,
            self.clone(),
            rhs.into_tensor(),
        )?)
    }

    pub fn neg(&self) -> Result<Tensor> {
        self.mul(-1.0)
    }

    // Reductions

    /// Sum over the given axes (None = all axes), optionally keeping them.
    pub fn sum(&self, axes: Option<&[isize]>, keepdims: bool) -> Result<Tensor> {
        apply(ops::Reduce::new(
            ops::ReduceKind::Sum,
            self.clone(),
            axes,
            keepdims,
        )?)
    }

    /// Sum every element into a rank-0 tensor.
    pub fn sum_all(&self) -> Result<Tensor> {
        self.sum(None, false)
    }

    /// Maximum over the given axes; tied positions all receive gradient.
    pub fn max(&self, axes: Option<&[isize]>, keepdims: bool) -> Result<Tensor> {
        apply(ops::Reduce::new(
            ops::ReduceKind::Max,
            self.clone(),
            axes,
            keepdims,
        )?)
    }

    /// Minimum over the given axes; tied positions all receive gradient.
    pub fn min(&self, axes: Option<&[isize]>, keepdims: bool) -> Result<Tensor> {
        apply(ops::Reduce::new(
            ops::ReduceKind::Min,
            self.clone(),
            axes,
            keepdims,
        )?)
    }

    // Linear algebra

    /// Contract the trailing `axes` dimensions of self with the leading
    /// `axes` dimensions of `rhs` (generalized tensordot).
    pub fn tensordot(&self, rhs: impl IntoTensor, axes: usize) -> Result<Tensor> {
        apply(ops::Contraction::new(self.clone(), rhs.into_tensor(), axes)?)
    }

    /// Batched matrix multiply over the last two axes; leading dimensions
    /// must match exactly.
    pub fn matmul(&self, rhs: impl IntoTensor) -> Result<Tensor> {
        apply(ops::BatchMatmul::new(self.clone(), rhs.into_tensor())?)
    }

    // Shape movement

    /// Reshape; one dimension may be -1 and is inferred.
    pub fn reshape(&self, dims: &[isize]) -> Result<Tensor> {
        apply(ops::Reshape::new(self.clone(), dims)?)
    }

    /// Reverse all axes (the `.T` of the buffer).
    pub fn transpose(&self) -> Result<Tensor> {
        apply(ops::Transpose::new(self.clone()))
    }

    /// Swap two axes (negative axes count from the end).
    pub fn swap_axes(&self, axis0: isize, axis1: isize) -> Result<Tensor> {
        apply(ops::Swapaxes::new(self.clone(), axis0, axis1)?)
    }

    /// Reverse the given axes (None = all axes).
    pub fn flip(&self, axes: Option<&[isize]>) -> Result<Tensor> {
        apply(ops::Flip::new(self.clone(), axes)?)
    }

    /// Concatenate tensors along one axis.
    pub fn cat(inputs: &[Tensor], axis: isize) -> Result<Tensor> {
        apply(ops::Concat::new(inputs.to_vec(), axis)?)
    }

    /// Repeat each element `repeats` times along `axis`; with no axis the
    /// tensor is flattened first.
    pub fn repeat_interleave(&self, repeats: usize, axis: Option<isize>) -> Result<Tensor> {
        apply(ops::RepeatInterleave::new(self.clone(), repeats, axis)?)
    }

    /// An element-for-element copy with pass-through gradient.
    pub fn duplicate(&self) -> Result<Tensor> {
        apply(ops::Duplicate::new(self.clone()))
    }

    // Indexing

    /// Select a sub-tensor. See [`crate::index::Indexer`] for key components.
    pub fn slice(&self, key: impl Into<Key>) -> Result<Tensor> {
        apply(ops::Slice::new(self.clone(), key.into())?)
    }

    /// Copy self and overwrite the keyed region with `value` (broadcast into
    /// the region if needed). The result is a new tensor; self is untouched.
    pub fn set_slice(&self, key: impl Into<Key>, value: impl IntoTensor) -> Result<Tensor> {
        apply(ops::SetSlice::new(
            self.clone(),
            value.into_tensor(),
            key.into(),
        )?)
    }

    /// Replace positions where `mask` is 1 with `fill_value`. The mask is a
    /// 0/1 tensor broadcastable to self and receives no gradient.
    pub fn masked_fill(&self, mask: &Tensor, fill_value: f64) -> Result<Tensor> {
        apply(ops::MaskedFill::new(self.clone(), mask, fill_value)?)
    }

    /// The k largest values along `axis` together with their recorded
    /// positions. Ties resolve to the first-seen position.
    pub fn topk(&self, k: usize, axis: isize) -> Result<(Tensor, ArrayD<usize>)> {
        let mut op = ops::TopK::new(self.clone(), k, axis)?;
        let data = crate::op::Operation::forward(&mut op)?;
        let indices = op.indices().to_owned();
        Ok((Tensor::from_op(data, Arc::new(op)), indices))
    }

    // Convolution / pooling

    /// 2-D convolution of `[N, C_in, H, W]` with `[C_out, C_in, kH, kW]`.
    pub fn conv2d(
        &self,
        weight: &Tensor,
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<Tensor> {
        apply(ops::Conv2d::new(
            self.clone(),
            weight.clone(),
            stride,
            padding,
        )?)
    }

    /// 2-D max-pooling; stride defaults to the kernel size.
    pub fn max_pool2d(
        &self,
        kernel: (usize, usize),
        stride: Option<(usize, usize)>,
        padding: (usize, usize),
    ) -> Result<Tensor> {
        apply(ops::MaxPool2d::new(self.clone(), kernel, stride, padding)?)
    }

    /// 2-D average-pooling over the in-bounds part of each window.
    pub fn avg_pool2d(
        &self,
        kernel: (usize, usize),
        stride: Option<(usize, usize)>,
        padding: (usize, usize),
    ) -> Result<Tensor> {
        apply(ops::AvgPool2d::new(self.clone(), kernel, stride, padding)?)
    }
}

// Operator sugar
//
// Overloads route through the same catalog operations as the named methods,
// so they never bypass gradient tracking. Following the convention of this
// crate's domain, fallible operators yield `Result<Tensor>`:
//
//     let y = (&a * &b)?.sum_all()?;

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident) => {
        impl std::ops::$trait<&Tensor> for &Tensor {
            type Output = Result<Tensor>;
            fn $method(self, rhs: &Tensor) -> Result<Tensor> {
                Tensor::$method(self, rhs)
            }
        }

        impl std::ops::$trait<Tensor> for &Tensor {
            type Output = Result<Tensor>;
            fn $method(self, rhs: Tensor) -> Result<Tensor> {
                Tensor::$method(self, rhs)
            }
        }

        impl std::ops::$trait<&Tensor> for Tensor {
            type Output = Result<Tensor>;
            fn $method(self, rhs: &Tensor) -> Result<Tensor> {
                Tensor::$method(&self, rhs)
            }
        }

        impl std::ops::$trait<Tensor> for Tensor {
            type Output = Result<Tensor>;
            fn $method(self, rhs: Tensor) -> Result<Tensor> {
                Tensor::$method(&self, rhs)
            }
        }

        impl std::ops::$trait<f64> for &Tensor {
            type Output = Result<Tensor>;
            fn $method(self, rhs: f64) -> Result<Tensor> {
                Tensor::$method(self, rhs)
            }
        }

        impl std::ops::$trait<f64> for Tensor {
            type Output = Result<Tensor>;
            fn $method(self, rhs: f64) -> Result<Tensor> {
                Tensor::$method(&self, rhs)
            }
        }

        impl std::ops::$trait<&Tensor> for f64 {
            type Output = Result<Tensor>;
            fn $method(self, rhs: &Tensor) -> Result<Tensor> {
                Tensor::$method(&Tensor::scalar(self), rhs)
            }
        }

        impl std::ops::$trait<Tensor> for f64 {
            type Output = Result<Tensor>;
            fn $method(self, rhs: Tensor) -> Result<Tensor> {
                Tensor::$method(&Tensor::scalar(self), rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add);
impl_binary_operator!(Sub, sub);
impl_binary_operator!(Mul, mul);
impl_binary_operator!(Div, div);

impl std::ops::Neg for &Tensor {
    type Output = Result<Tensor>;
    fn neg(self) -> Result<Tensor> {
        Tensor::neg(self)
    }
}

impl std::ops::Neg for Tensor {
    type Output = Result<Tensor>;
    fn neg(self) -> Result<Tensor> {
        Tensor::neg(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_construction() {
        let t = Tensor::scalar(3.5);
        assert_eq!(t.rank(), 0);
        assert_eq!(t.elem_count(), 1);
        assert_eq!(t.item().unwrap(), 3.5);
        assert!(t.is_leaf());
    }

    #[test]
    fn test_nested_construction() {
        let t = Tensor::from_nested(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(t.dims(), &[2, 2]);
        assert!(Tensor::from_nested(vec![vec![1.0], vec![2.0, 3.0]]).is_err());
    }

    #[test]
    fn test_shape_vec_count_mismatch() {
        assert!(Tensor::from_shape_vec(&[2, 3], vec![1.0; 5]).is_err());
        assert!(Tensor::from_shape_vec(&[2, 3], vec![1.0; 6]).is_ok());
    }

    #[test]
    fn test_operator_sugar_tracks_graph() {
        let a = Tensor::from_vec(vec![1.0, 2.0]).variable();
        let b = Tensor::from_vec(vec![3.0, 4.0]).variable();
        let c = (&a + &b).unwrap();
        assert!(!c.is_leaf());
        assert_eq!(c.to_vec(), vec![4.0, 6.0]);

        let s = (2.0 * &c).unwrap();
        assert_eq!(s.to_vec(), vec![8.0, 12.0]);
    }

    #[test]
    fn test_item_rejects_non_scalar() {
        assert!(Tensor::from_vec(vec![1.0, 2.0]).item().is_err());
    }

    #[test]
    fn test_backward_requires_scalar_root() {
        let a = Tensor::from_vec(vec![1.0, 2.0]).variable();
        let y = a.mul(2.0).unwrap();
        assert!(matches!(
            y.backward(),
            Err(Error::NonScalarBackward { .. })
        ));
    }
}
