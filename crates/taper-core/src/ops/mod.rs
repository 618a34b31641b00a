//! The operation catalog: every differentiable primitive the engine ships.
//!
//! Each operation implements [`crate::op::Operation`] — one forward
//! computation paired with its exact local gradient rule — and joins the
//! graph through [`crate::op::apply`]. The backward engine never special-
//! cases any of them.

mod arithmetic;
mod conv;
mod linalg;
mod movement;
mod reduce;
mod select;

pub use arithmetic::{Binary, BinaryKind};
pub use conv::{AvgPool2d, Conv2d, MaxPool2d};
pub use linalg::{BatchMatmul, Contraction};
pub use movement::{Concat, Duplicate, Flip, RepeatInterleave, Reshape, Swapaxes, Transpose};
pub use reduce::{Reduce, ReduceKind};
pub use select::{MaskedFill, SetSlice, Slice, TopK};
