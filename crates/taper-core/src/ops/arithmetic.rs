use ndarray::{ArrayD, Zip};

use crate::error::Result;
use crate::op::Operation;
use crate::shape::{broadcast_shape, broadcast_view, reduce_to_shape};
use crate::tensor::Tensor;

// Broadcasted elementwise binary operations
//
// Forward broadcasts both operands to the common NumPy-rule shape. Backward
// computes the local derivative times the upstream gradient at the broadcast
// shape, then sums over every axis that was expanded (size-1 vs larger, or
// absent) to restore each input's original shape. That reduction step is
// where broadcasted gradients go wrong; it lives once, in
// `shape::reduce_to_shape`, and every kind funnels through it.

/// Which elementwise binary operation to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
    /// `lhs ^ rhs`; the exponent may be a tensor.
    Pow,
}

impl BinaryKind {
    fn eval(self, x: f64, y: f64) -> f64 {
        match self {
            BinaryKind::Add => x + y,
            BinaryKind::Sub => x - y,
            BinaryKind::Mul => x * y,
            BinaryKind::Div => x / y,
            BinaryKind::Pow => x.powf(y),
        }
    }

    fn name(self) -> &'static str {
        match self {
            BinaryKind::Add => "add",
            BinaryKind::Sub => "sub",
            BinaryKind::Mul => "mul",
            BinaryKind::Div => "div",
            BinaryKind::Pow => "pow",
        }
    }
}

/// Elementwise binary operation with NumPy-rule broadcasting.
#[derive(Debug)]
pub struct Binary {
    kind: BinaryKind,
    inputs: [Tensor; 2],
}

impl Binary {
    pub fn new(kind: BinaryKind, lhs: Tensor, rhs: Tensor) -> Result<Self> {
        // Incompatible operands fail here, before a graph link exists.
        broadcast_shape(lhs.dims(), rhs.dims())?;
        Ok(Binary {
            kind,
            inputs: [lhs, rhs],
        })
    }
}

impl Operation for Binary {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        let a = self.inputs[0].array();
        let b = self.inputs[1].array();
        let dims = broadcast_shape(a.shape(), b.shape())?;
        let va = broadcast_view(a, &dims)?;
        let vb = broadcast_view(b, &dims)?;
        let kind = self.kind;
        Ok(Zip::from(&va).and(&vb).map_collect(|&x, &y| kind.eval(x, y)))
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        let a = self.inputs[0].array();
        let b = self.inputs[1].array();
        let dims = output_grad.shape().to_vec();
        let va = broadcast_view(a, &dims)?;
        let vb = broadcast_view(b, &dims)?;
        let g = output_grad;

        let (grad_a, grad_b) = match self.kind {
            // d(a + b)/da = 1, d(a + b)/db = 1
            BinaryKind::Add => (g.clone(), g.clone()),
            // d(a - b)/da = 1, d(a - b)/db = -1
            BinaryKind::Sub => (g.clone(), g.mapv(|v| -v)),
            // d(a * b)/da = b, d(a * b)/db = a
            BinaryKind::Mul => (
                Zip::from(g).and(&vb).map_collect(|&g, &y| g * y),
                Zip::from(g).and(&va).map_collect(|&g, &x| g * x),
            ),
            // d(a / b)/da = 1/b, d(a / b)/db = -a/b²
            BinaryKind::Div => (
                Zip::from(g).and(&vb).map_collect(|&g, &y| g / y),
                Zip::from(g)
                    .and(&va)
                    .and(&vb)
                    .map_collect(|&g, &x, &y| -g * x / (y * y)),
            ),
            // d(a^b)/da = b·a^(b-1), d(a^b)/db = a^b·ln(a)
            BinaryKind::Pow => (
                Zip::from(g)
                    .and(&va)
                    .and(&vb)
                    .map_collect(|&g, &x, &y| g * y * x.powf(y - 1.0)),
                Zip::from(g)
                    .and(&va)
                    .and(&vb)
                    .map_collect(|&g, &x, &y| g * x.powf(y) * x.ln()),
            ),
        };

        Ok(vec![
            reduce_to_shape(grad_a, a.shape()),
            reduce_to_shape(grad_b, b.shape()),
        ])
    }
}
