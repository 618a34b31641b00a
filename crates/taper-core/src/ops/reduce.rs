use ndarray::{ArrayD, Axis, IxDyn, Zip};

use crate::error::Result;
use crate::op::Operation;
use crate::shape::{broadcast_view, normalize_axes};
use crate::tensor::Tensor;

// Reductions over an axis set
//
// Backward first restores the gradient to the input's full rank (re-inserting
// the size-1 axes that `keepdims = false` removed), then broadcasts it across
// the reduced axes. For max/min the broadcast gradient is additionally masked
// to the positions equal to the forward output — every tied position receives
// the gradient, which is why the forward result is cached on the operation.

/// Which reduction to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Max,
    Min,
}

impl ReduceKind {
    fn name(self) -> &'static str {
        match self {
            ReduceKind::Sum => "sum",
            ReduceKind::Max => "max",
            ReduceKind::Min => "min",
        }
    }
}

/// Reduction over a set of axes with optional kept dimensions.
#[derive(Debug)]
pub struct Reduce {
    kind: ReduceKind,
    inputs: [Tensor; 1],
    axes: Vec<usize>,
    keepdims: bool,
    /// Forward result, cached for the max/min equality mask.
    output: ArrayD<f64>,
}

impl Reduce {
    pub fn new(
        kind: ReduceKind,
        input: Tensor,
        axes: Option<&[isize]>,
        keepdims: bool,
    ) -> Result<Self> {
        let rank = input.rank();
        let axes = match axes {
            Some(list) => normalize_axes(list, rank)?,
            None => (0..rank).collect(),
        };
        Ok(Reduce {
            kind,
            inputs: [input],
            axes,
            keepdims,
            output: ArrayD::zeros(IxDyn(&[0])),
        })
    }
}

impl Operation for Reduce {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        let mut out = self.inputs[0].array().clone();
        // Fold from the highest axis down so the remaining indices stay valid.
        for &axis in self.axes.iter().rev() {
            out = match self.kind {
                ReduceKind::Sum => out.sum_axis(Axis(axis)),
                ReduceKind::Max => {
                    out.fold_axis(Axis(axis), f64::NEG_INFINITY, |&acc, &v| acc.max(v))
                }
                ReduceKind::Min => out.fold_axis(Axis(axis), f64::INFINITY, |&acc, &v| acc.min(v)),
            };
        }
        if self.keepdims {
            for &axis in &self.axes {
                out = out.insert_axis(Axis(axis));
            }
        }
        self.output = out.clone();
        Ok(out)
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        let input = self.inputs[0].array();
        let mut g = output_grad.clone();
        let mut out = self.output.clone();
        if !self.keepdims {
            for &axis in &self.axes {
                g = g.insert_axis(Axis(axis));
                out = out.insert_axis(Axis(axis));
            }
        }
        let gb = broadcast_view(&g, input.shape())?;

        let grad = match self.kind {
            ReduceKind::Sum => gb.to_owned(),
            ReduceKind::Max | ReduceKind::Min => {
                let ob = broadcast_view(&out, input.shape())?;
                Zip::from(input)
                    .and(&gb)
                    .and(&ob)
                    .map_collect(|&x, &g, &o| if x == o { g } else { 0.0 })
            }
        };
        Ok(vec![grad])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::apply;

    fn input_2x3() -> Tensor {
        Tensor::from_nested(vec![vec![1.0, 5.0, 3.0], vec![4.0, 5.0, 0.0]]).unwrap()
    }

    #[test]
    fn test_sum_axis_keepdims() {
        let t = input_2x3();
        let s = apply(Reduce::new(ReduceKind::Sum, t.clone(), Some(&[1]), true).unwrap()).unwrap();
        assert_eq!(s.dims(), &[2, 1]);
        assert_eq!(s.to_vec(), vec![9.0, 9.0]);

        let s = apply(Reduce::new(ReduceKind::Sum, t, None, false).unwrap()).unwrap();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.item().unwrap(), 18.0);
    }

    #[test]
    fn test_max_ties_all_receive_gradient() {
        let t = input_2x3().variable();
        let m = t.max(Some(&[0]), false).unwrap();
        assert_eq!(m.to_vec(), vec![4.0, 5.0, 3.0]);
        m.sum_all().unwrap().backward().unwrap();
        // Column 1 ties at 5.0 — both positions get the gradient.
        let g = t.grad().unwrap();
        assert_eq!(
            g.iter().cloned().collect::<Vec<_>>(),
            vec![0.0, 1.0, 1.0, 1.0, 1.0, 0.0]
        );
    }

    #[test]
    fn test_min_negative_axis() {
        let t = input_2x3().variable();
        let m = t.min(Some(&[-1]), false).unwrap();
        assert_eq!(m.to_vec(), vec![1.0, 0.0]);
        m.sum_all().unwrap().backward().unwrap();
        let g = t.grad().unwrap();
        assert_eq!(
            g.iter().cloned().collect::<Vec<_>>(),
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_duplicate_axes_rejected() {
        assert!(Reduce::new(ReduceKind::Sum, input_2x3(), Some(&[1, -1]), false).is_err());
    }
}
