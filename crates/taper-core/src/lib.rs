//! # taper-core
//!
//! Core tensor type and reverse-mode automatic differentiation for Taper.
//!
//! This crate provides:
//! - [`Tensor`] — an n-dimensional `f64` array participating in a dynamically
//!   built computation graph
//! - [`Operation`] — the contract every differentiable primitive satisfies,
//!   and the registration point for external kernels via [`apply`]
//! - [`ops`] — the operation catalog: broadcasted arithmetic, reductions,
//!   contraction and batched matmul, shape movement, slicing and scatter
//!   writes, top-k, convolution and pooling
//! - [`index`] — the slice / set-slice key model
//! - the backward engine: reverse topological traversal with per-tensor
//!   gradient accumulation and retain/release semantics
//!
//! The graph is rebuilt on every forward pass and discarded after
//! `backward()` unless tensors are explicitly retained; there is no graph
//! compilation, fusion, or multi-device story here.

pub mod backprop;
pub mod error;
pub mod index;
pub mod op;
pub mod ops;
pub mod shape;
pub mod tensor;

pub use error::{Error, Result};
pub use index::{Indexer, Key};
pub use op::{apply, IntoTensor, Operation, TensorId};
pub use tensor::Tensor;
