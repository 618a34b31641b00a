use ndarray::{ArrayD, Axis, Slice as AxSlice};

use crate::error::{Error, Result};
use crate::op::Operation;
use crate::shape::{normalize_axes, normalize_axis, reshaped, to_standard};
use crate::tensor::Tensor;

// Shape-only movement operations
//
// Reshape, transpose, swapaxes, and flip relabel positions without touching
// values; their backward is the inverse relabeling applied to the gradient.
// Concat and repeat-interleave move values between tensors/positions; their
// backward splits or folds the gradient along the same axis.

/// Reshape to a new shape; one dimension may be -1 and is inferred.
#[derive(Debug)]
pub struct Reshape {
    inputs: [Tensor; 1],
    dims: Vec<usize>,
}

impl Reshape {
    pub fn new(input: Tensor, spec: &[isize]) -> Result<Self> {
        let total = input.elem_count();
        let inferred = spec.iter().filter(|&&d| d == -1).count();
        if inferred > 1 || spec.iter().any(|&d| d < -1) {
            return Err(Error::InvalidInput(format!(
                "invalid reshape specification {:?}",
                spec
            )));
        }
        let known: usize = spec.iter().filter(|&&d| d != -1).map(|&d| d as usize).product();
        let mut dims = Vec::with_capacity(spec.len());
        for &d in spec {
            if d == -1 {
                if known == 0 || total % known != 0 {
                    return Err(Error::InvalidInput(format!(
                        "cannot infer -1 in reshape {:?} for {} elements",
                        spec, total
                    )));
                }
                dims.push(total / known);
            } else {
                dims.push(d as usize);
            }
        }
        let target: usize = if dims.is_empty() { 1 } else { dims.iter().product() };
        if target != total {
            return Err(Error::ElementCount {
                shape: dims,
                expected: target,
                got: total,
            });
        }
        Ok(Reshape {
            inputs: [input],
            dims,
        })
    }
}

impl Operation for Reshape {
    fn name(&self) -> &'static str {
        "reshape"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        reshaped(self.inputs[0].array().clone(), &self.dims)
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        Ok(vec![reshaped(output_grad.clone(), self.inputs[0].dims())?])
    }
}

/// Reverse all axes.
#[derive(Debug)]
pub struct Transpose {
    inputs: [Tensor; 1],
}

impl Transpose {
    pub fn new(input: Tensor) -> Self {
        Transpose { inputs: [input] }
    }
}

impl Operation for Transpose {
    fn name(&self) -> &'static str {
        "transpose"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        Ok(to_standard(self.inputs[0].array().clone().reversed_axes()))
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        Ok(vec![to_standard(output_grad.clone().reversed_axes())])
    }
}

/// Swap two axes.
#[derive(Debug)]
pub struct Swapaxes {
    inputs: [Tensor; 1],
    axis0: usize,
    axis1: usize,
}

impl Swapaxes {
    pub fn new(input: Tensor, axis0: isize, axis1: isize) -> Result<Self> {
        let rank = input.rank();
        let axis0 = normalize_axis(axis0, rank)?;
        let axis1 = normalize_axis(axis1, rank)?;
        Ok(Swapaxes {
            inputs: [input],
            axis0,
            axis1,
        })
    }

    fn apply(&self, x: &ArrayD<f64>) -> ArrayD<f64> {
        let mut v = x.clone();
        v.swap_axes(self.axis0, self.axis1);
        to_standard(v)
    }
}

impl Operation for Swapaxes {
    fn name(&self) -> &'static str {
        "swapaxes"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        Ok(self.apply(self.inputs[0].array()))
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        // A swap is its own inverse.
        Ok(vec![self.apply(output_grad)])
    }
}

/// Reverse the given axes (all axes when none are given).
#[derive(Debug)]
pub struct Flip {
    inputs: [Tensor; 1],
    axes: Vec<usize>,
}

impl Flip {
    pub fn new(input: Tensor, axes: Option<&[isize]>) -> Result<Self> {
        let rank = input.rank();
        let axes = match axes {
            Some(list) => normalize_axes(list, rank)?,
            None => (0..rank).collect(),
        };
        Ok(Flip {
            inputs: [input],
            axes,
        })
    }

    fn apply(&self, x: &ArrayD<f64>) -> ArrayD<f64> {
        let mut v = x.clone();
        for &axis in &self.axes {
            v.invert_axis(Axis(axis));
        }
        to_standard(v)
    }
}

impl Operation for Flip {
    fn name(&self) -> &'static str {
        "flip"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        Ok(self.apply(self.inputs[0].array()))
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        // Flipping is its own inverse.
        Ok(vec![self.apply(output_grad)])
    }
}

/// Concatenate any number of tensors along one axis.
#[derive(Debug)]
pub struct Concat {
    inputs: Vec<Tensor>,
    axis: usize,
    /// Per-input length along `axis`, for splitting the gradient.
    sizes: Vec<usize>,
}

impl Concat {
    pub fn new(inputs: Vec<Tensor>, axis: isize) -> Result<Self> {
        let first = inputs
            .first()
            .ok_or_else(|| Error::InvalidInput("concat of zero tensors".to_string()))?;
        let rank = first.rank();
        let axis = normalize_axis(axis, rank)?;
        for t in &inputs[1..] {
            if t.rank() != rank {
                return Err(Error::ShapeMismatch {
                    expected: first.dims().to_vec(),
                    got: t.dims().to_vec(),
                });
            }
            for d in 0..rank {
                if d != axis && t.dims()[d] != first.dims()[d] {
                    return Err(Error::ShapeMismatch {
                        expected: first.dims().to_vec(),
                        got: t.dims().to_vec(),
                    });
                }
            }
        }
        let sizes = inputs.iter().map(|t| t.dims()[axis]).collect();
        Ok(Concat {
            inputs,
            axis,
            sizes,
        })
    }
}

impl Operation for Concat {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        let views: Vec<_> = self.inputs.iter().map(|t| t.array().view()).collect();
        ndarray::concatenate(Axis(self.axis), &views)
            .map_err(|e| Error::msg(format!("concat failed: {}", e)))
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        // Split the gradient at the cumulative input-length boundaries.
        let mut grads = Vec::with_capacity(self.sizes.len());
        let mut offset = 0usize;
        for &size in &self.sizes {
            let piece = output_grad
                .slice_axis(Axis(self.axis), AxSlice::from(offset..offset + size))
                .to_owned();
            grads.push(piece);
            offset += size;
        }
        Ok(grads)
    }
}

/// Repeat each element `repeats` times along an axis, or along the flattened
/// tensor when no axis is given.
#[derive(Debug)]
pub struct RepeatInterleave {
    inputs: [Tensor; 1],
    repeats: usize,
    axis: Option<usize>,
}

impl RepeatInterleave {
    pub fn new(input: Tensor, repeats: usize, axis: Option<isize>) -> Result<Self> {
        if repeats == 0 {
            return Err(Error::InvalidInput("repeats must be >= 1".to_string()));
        }
        let axis = match axis {
            Some(a) => Some(normalize_axis(a, input.rank())?),
            None => None,
        };
        Ok(RepeatInterleave {
            inputs: [input],
            repeats,
            axis,
        })
    }
}

impl Operation for RepeatInterleave {
    fn name(&self) -> &'static str {
        "repeat_interleave"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        let x = self.inputs[0].array();
        match self.axis {
            Some(axis) => {
                let n = x.shape()[axis];
                let indices: Vec<usize> = (0..n)
                    .flat_map(|i| std::iter::repeat(i).take(self.repeats))
                    .collect();
                Ok(x.select(Axis(axis), &indices))
            }
            None => {
                let n = x.len();
                let flat = reshaped(x.clone(), &[n])?;
                let indices: Vec<usize> = (0..n)
                    .flat_map(|i| std::iter::repeat(i).take(self.repeats))
                    .collect();
                Ok(flat.select(Axis(0), &indices))
            }
        }
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        let orig = self.inputs[0].dims();
        // Expose the repeat dimension next to the repeated axis, then sum it.
        let grad = match self.axis {
            Some(axis) => {
                let mut dims = orig.to_vec();
                dims.insert(axis + 1, self.repeats);
                reshaped(output_grad.clone(), &dims)?.sum_axis(Axis(axis + 1))
            }
            None => {
                let mut dims = orig.to_vec();
                dims.push(self.repeats);
                reshaped(output_grad.clone(), &dims)?.sum_axis(Axis(orig.len()))
            }
        };
        Ok(vec![grad])
    }
}

/// An element-for-element copy; the gradient passes through unchanged.
#[derive(Debug)]
pub struct Duplicate {
    inputs: [Tensor; 1],
}

impl Duplicate {
    pub fn new(input: Tensor) -> Self {
        Duplicate { inputs: [input] }
    }
}

impl Operation for Duplicate {
    fn name(&self) -> &'static str {
        "duplicate"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        Ok(self.inputs[0].array().clone())
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        Ok(vec![output_grad.clone()])
    }
}
