use ndarray::{ArrayD, Axis, Ix2};

use crate::error::{Error, Result};
use crate::op::Operation;
use crate::shape::{reshaped, to_standard};
use crate::tensor::Tensor;

// Contraction and batched matrix multiply
//
// Both reduce to 2-D GEMM on the buffer: permute the contracted axes to the
// boundary, flatten each side to a matrix, `dot`, and fold the result back.
// The backward rules re-contract the upstream gradient with the *other*
// input over the complementary axis ranges.

/// Contract `a_axes` of `a` against `b_axes` of `b` (pairwise, in order),
/// returning the kept axes of `a` followed by the kept axes of `b`.
pub(crate) fn tensordot(
    a: &ArrayD<f64>,
    b: &ArrayD<f64>,
    a_axes: &[usize],
    b_axes: &[usize],
) -> Result<ArrayD<f64>> {
    if a_axes.len() != b_axes.len() {
        return Err(Error::msg("tensordot: contraction axis lists differ in length"));
    }
    for (&ax, &bx) in a_axes.iter().zip(b_axes) {
        if a.shape()[ax] != b.shape()[bx] {
            return Err(Error::ShapeMismatch {
                expected: a_axes.iter().map(|&i| a.shape()[i]).collect(),
                got: b_axes.iter().map(|&i| b.shape()[i]).collect(),
            });
        }
    }

    let a_keep: Vec<usize> = (0..a.ndim()).filter(|i| !a_axes.contains(i)).collect();
    let b_keep: Vec<usize> = (0..b.ndim()).filter(|i| !b_axes.contains(i)).collect();

    let m: usize = a_keep.iter().map(|&i| a.shape()[i]).product();
    let k: usize = a_axes.iter().map(|&i| a.shape()[i]).product();
    let n: usize = b_keep.iter().map(|&i| b.shape()[i]).product();

    let mut a_perm = a_keep.clone();
    a_perm.extend_from_slice(a_axes);
    let mut b_perm = b_axes.to_vec();
    b_perm.extend_from_slice(&b_keep);

    let lhs = reshaped(a.view().permuted_axes(a_perm).to_owned(), &[m, k])?
        .into_dimensionality::<Ix2>()
        .map_err(|_| Error::msg("tensordot: lhs matrix reshape failed"))?;
    let rhs = reshaped(b.view().permuted_axes(b_perm).to_owned(), &[k, n])?
        .into_dimensionality::<Ix2>()
        .map_err(|_| Error::msg("tensordot: rhs matrix reshape failed"))?;

    let product = lhs.dot(&rhs);

    let mut out_dims: Vec<usize> = a_keep.iter().map(|&i| a.shape()[i]).collect();
    out_dims.extend(b_keep.iter().map(|&i| b.shape()[i]));
    reshaped(product.into_dyn(), &out_dims)
}

/// Generalized tensordot: contract the trailing `axes` dimensions of the
/// first input with the leading `axes` dimensions of the second.
#[derive(Debug)]
pub struct Contraction {
    inputs: [Tensor; 2],
    axes: usize,
}

impl Contraction {
    pub fn new(lhs: Tensor, rhs: Tensor, axes: usize) -> Result<Self> {
        let (ra, rb) = (lhs.rank(), rhs.rank());
        if axes > ra || axes > rb {
            return Err(Error::InvalidInput(format!(
                "cannot contract {} axes of tensors with ranks {} and {}",
                axes, ra, rb
            )));
        }
        let a_tail = &lhs.dims()[ra - axes..];
        let b_head = &rhs.dims()[..axes];
        if a_tail != b_head {
            return Err(Error::ShapeMismatch {
                expected: a_tail.to_vec(),
                got: b_head.to_vec(),
            });
        }
        Ok(Contraction {
            inputs: [lhs, rhs],
            axes,
        })
    }
}

impl Operation for Contraction {
    fn name(&self) -> &'static str {
        "tensordot"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        let a = self.inputs[0].array();
        let b = self.inputs[1].array();
        let ra = a.ndim();
        let a_axes: Vec<usize> = (ra - self.axes..ra).collect();
        let b_axes: Vec<usize> = (0..self.axes).collect();
        tensordot(a, b, &a_axes, &b_axes)
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        let a = self.inputs[0].array();
        let b = self.inputs[1].array();
        let (ra, rb) = (a.ndim(), b.ndim());
        let left_keep = ra - self.axes; // kept axes of a, leading in g
        let right_keep = rb - self.axes; // kept axes of b, trailing in g
        let rg = output_grad.ndim();

        // grad_a: contract g's trailing axes (b's kept) against b's kept axes,
        // leaving a's kept axes followed by the contracted dims — a's shape.
        let g_tail: Vec<usize> = (rg - right_keep..rg).collect();
        let b_tail: Vec<usize> = (self.axes..rb).collect();
        let grad_a = tensordot(output_grad, b, &g_tail, &b_tail)?;

        // grad_b: contract a's leading (kept) axes against g's leading axes,
        // leaving the contracted dims followed by b's kept axes — b's shape.
        let a_head: Vec<usize> = (0..left_keep).collect();
        let g_head: Vec<usize> = (0..left_keep).collect();
        let grad_b = tensordot(a, output_grad, &a_head, &g_head)?;

        Ok(vec![grad_a, grad_b])
    }
}

/// Batched matrix multiply: `(..., M, K) @ (..., K, N)` with identical
/// leading dimensions.
#[derive(Debug)]
pub struct BatchMatmul {
    inputs: [Tensor; 2],
}

impl BatchMatmul {
    pub fn new(lhs: Tensor, rhs: Tensor) -> Result<Self> {
        let (ra, rb) = (lhs.rank(), rhs.rank());
        if ra < 2 || rb < 2 {
            return Err(Error::InvalidInput(format!(
                "matmul requires rank >= 2, got {} and {}",
                ra, rb
            )));
        }
        if lhs.dims()[..ra - 2] != rhs.dims()[..rb - 2] {
            return Err(Error::ShapeMismatch {
                expected: lhs.dims()[..ra - 2].to_vec(),
                got: rhs.dims()[..rb - 2].to_vec(),
            });
        }
        if lhs.dims()[ra - 1] != rhs.dims()[rb - 2] {
            return Err(Error::ShapeMismatch {
                expected: vec![lhs.dims()[ra - 1]],
                got: vec![rhs.dims()[rb - 2]],
            });
        }
        Ok(BatchMatmul { inputs: [lhs, rhs] })
    }
}

/// Multiply the last two axes of two equally-batched arrays.
pub(crate) fn batched_matmul(a: &ArrayD<f64>, b: &ArrayD<f64>) -> Result<ArrayD<f64>> {
    let ra = a.ndim();
    let rb = b.ndim();
    let lead: Vec<usize> = a.shape()[..ra - 2].to_vec();
    let (m, k) = (a.shape()[ra - 2], a.shape()[ra - 1]);
    let n = b.shape()[rb - 1];
    let batch: usize = lead.iter().product::<usize>().max(1);

    let a3 = reshaped(a.clone(), &[batch, m, k])?;
    let b3 = reshaped(b.clone(), &[batch, k, n])?;
    let mut out = ArrayD::<f64>::zeros(ndarray::IxDyn(&[batch, m, n]));
    for i in 0..batch {
        let ai = a3
            .index_axis(Axis(0), i)
            .into_dimensionality::<Ix2>()
            .map_err(|_| Error::msg("matmul: batch slice is not a matrix"))?;
        let bi = b3
            .index_axis(Axis(0), i)
            .into_dimensionality::<Ix2>()
            .map_err(|_| Error::msg("matmul: batch slice is not a matrix"))?;
        out.index_axis_mut(Axis(0), i).assign(&ai.dot(&bi));
    }

    let mut out_dims = lead;
    out_dims.extend_from_slice(&[m, n]);
    reshaped(out, &out_dims)
}

/// Swap the last two axes, materialized in standard layout.
fn transpose_last_two(x: &ArrayD<f64>) -> ArrayD<f64> {
    let r = x.ndim();
    let mut v = x.clone();
    v.swap_axes(r - 2, r - 1);
    to_standard(v)
}

impl Operation for BatchMatmul {
    fn name(&self) -> &'static str {
        "matmul"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        batched_matmul(self.inputs[0].array(), self.inputs[1].array())
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        let a = self.inputs[0].array();
        let b = self.inputs[1].array();
        // grad_a = g @ bᵀ, grad_b = aᵀ @ g — transposing the last two axes only.
        let grad_a = batched_matmul(output_grad, &transpose_last_two(b))?;
        let grad_b = batched_matmul(&transpose_last_two(a), output_grad)?;
        Ok(vec![grad_a, grad_b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_tensordot_matrix_product() {
        // [2,3] · [3,2] over one axis is a plain matrix product.
        let a = ArrayD::from_shape_vec(IxDyn(&[2, 3]), (1..=6).map(f64::from).collect()).unwrap();
        let b = ArrayD::from_shape_vec(IxDyn(&[3, 2]), (1..=6).map(f64::from).collect()).unwrap();
        let c = tensordot(&a, &b, &[1], &[0]).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.iter().cloned().collect::<Vec<_>>(), vec![22.0, 28.0, 49.0, 64.0]);
    }

    #[test]
    fn test_full_contraction_is_scalar() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0]);
        let b = Tensor::from_vec(vec![4.0, 5.0, 6.0]);
        let c = a.tensordot(&b, 1).unwrap();
        assert_eq!(c.rank(), 0);
        assert_eq!(c.item().unwrap(), 32.0);
    }

    #[test]
    fn test_contraction_shape_validation() {
        let a = Tensor::zeros(&[2, 3]);
        let b = Tensor::zeros(&[4, 2]);
        assert!(Contraction::new(a, b, 1).is_err());
    }

    #[test]
    fn test_batched_matmul_shapes() {
        let a = Tensor::zeros(&[2, 3, 4]);
        let b = Tensor::zeros(&[2, 4, 5]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.dims(), &[2, 3, 5]);

        let bad = Tensor::zeros(&[3, 4, 5]);
        let a2 = Tensor::zeros(&[2, 3, 4]);
        assert!(BatchMatmul::new(a2, bad).is_err());
    }

    #[test]
    fn test_matmul_gradients() {
        let a = Tensor::from_nested(vec![vec![1.0, 2.0], vec![3.0, 4.0]])
            .unwrap()
            .variable();
        let b = Tensor::from_nested(vec![vec![5.0, 6.0], vec![7.0, 8.0]])
            .unwrap()
            .variable();
        let c = a.matmul(&b).unwrap();
        c.sum_all().unwrap().backward().unwrap();

        // grad_a = 1 @ bᵀ: each row sums b's columns.
        assert_eq!(
            a.grad().unwrap().iter().cloned().collect::<Vec<_>>(),
            vec![11.0, 15.0, 11.0, 15.0]
        );
        // grad_b = aᵀ @ 1: each row sums a's columns.
        assert_eq!(
            b.grad().unwrap().iter().cloned().collect::<Vec<_>>(),
            vec![4.0, 4.0, 6.0, 6.0]
        );
    }
}
