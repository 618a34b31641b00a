use std::fmt;
use std::sync::Arc;

use ndarray::ArrayD;

use crate::error::Result;
use crate::tensor::Tensor;

// Operation — the differentiable unit of computation
//
// Every non-leaf tensor records the operation that produced it. An operation
// pairs one forward computation with its exact local gradient rule, and holds
// the ordered list of input tensors it was applied to. Those back-references
// (cheap `Arc` clones) are what turn individual tensors into a traversable
// DAG: a tensor may feed any number of downstream operations, so the
// structure is a graph, not a tree, and `Arc` keeps every input alive exactly
// as long as some output still needs it.
//
// The backward engine (see backprop.rs) is completely agnostic of concrete
// operation types — it only ever calls the trait methods below. New
// differentiable kernels (activations, custom layers) are added by
// implementing this trait and calling `apply`; the engine never changes.

/// Unique identifier for a tensor. Used as the key for traversal bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(pub(crate) u64);

impl Default for TensorId {
    fn default() -> Self {
        Self::new()
    }
}

impl TensorId {
    /// Generate a new unique tensor ID (uses a global atomic counter).
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TensorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A differentiable operation: one forward computation plus its gradient rule.
///
/// # Contract
///
/// - Constructors validate everything — input shapes, parameter ranges,
///   indexing keys — and fail before any numeric work, so an invalid
///   operation never becomes part of a graph.
/// - `forward` computes the output buffer exactly once, and may cache
///   whatever backward will need (the forward result for max/min, recorded
///   positions for top-k and max-pool).
/// - `backward` receives a gradient shaped like the output and returns one
///   gradient per input, each shaped exactly like that input's pre-broadcast
///   shape. The engine checks both properties after every call; a mismatch
///   is a wrong gradient rule, surfaced as a fatal error.
/// - No side effects beyond the forward cache.
pub trait Operation: Send + Sync + fmt::Debug {
    /// Short name used in error messages.
    fn name(&self) -> &'static str;

    /// The ordered input tensors of this operation.
    fn inputs(&self) -> &[Tensor];

    /// Compute the output buffer, caching anything backward needs.
    fn forward(&mut self) -> Result<ArrayD<f64>>;

    /// Given a gradient shaped like the output, return one gradient per input.
    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>>;
}

/// Run an operation's forward pass and wrap the result in a tensor that
/// records the operation as its producer.
///
/// This is the single entry point through which every catalog operation —
/// and any externally defined one — joins the graph.
pub fn apply<O: Operation + 'static>(mut op: O) -> Result<Tensor> {
    let data = op.forward()?;
    Ok(Tensor::from_op(data, Arc::new(op)))
}

/// Conversion applied at every operation-construction boundary.
///
/// Scalars and raw buffers are promoted to leaf tensors here, in one place,
/// rather than by ad-hoc coercion scattered through call sites.
pub trait IntoTensor {
    fn into_tensor(self) -> Tensor;
}

impl IntoTensor for Tensor {
    fn into_tensor(self) -> Tensor {
        self
    }
}

impl IntoTensor for &Tensor {
    fn into_tensor(self) -> Tensor {
        self.clone()
    }
}

impl IntoTensor for f64 {
    fn into_tensor(self) -> Tensor {
        Tensor::scalar(self)
    }
}

impl IntoTensor for ArrayD<f64> {
    fn into_tensor(self) -> Tensor {
        Tensor::from_array(self)
    }
}
