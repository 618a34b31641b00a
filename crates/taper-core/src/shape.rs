use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};

use crate::error::{Error, Result};

// Shape utilities — broadcasting rules and stride math
//
// The buffer type (`ndarray::ArrayD<f64>`) owns the shape itself; this module
// holds the shape-level logic the autodiff engine needs on top of it:
//
//   1. NumPy-style broadcast shape computation for binary operations.
//   2. The inverse step for gradients: summing a broadcast gradient back
//      down to an input's original shape (`reduce_to_shape`). Getting this
//      reduction exactly right is the single most error-prone part of
//      broadcasted backward rules.
//   3. Axis normalization (negative axes count from the end).
//   4. Row-major stride/coordinate conversions for scatter-style gradients.

/// Compute the broadcast output shape from two input shapes.
///
/// NumPy-style broadcasting rules:
///   1. Align shapes from the right (trailing dimensions).
///   2. Dimensions are compatible if they are equal or one of them is 1.
///   3. Missing leading dimensions are treated as 1.
///
/// Examples:
///   [3, 4] and [4]       → [3, 4]
///   [2, 1] and [1, 3]    → [2, 3]
///   [5, 3, 1] and [3, 4] → [5, 3, 4]
///   [3] and [4]          → Error (3 ≠ 4 and neither is 1)
pub fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let max_rank = lhs.len().max(rhs.len());
    let mut result = Vec::with_capacity(max_rank);

    for i in 0..max_rank {
        // Index from the right; missing leading dims are treated as 1.
        let ld = if i < lhs.len() {
            lhs[lhs.len() - 1 - i]
        } else {
            1
        };
        let rd = if i < rhs.len() {
            rhs[rhs.len() - 1 - i]
        } else {
            1
        };

        if ld == rd {
            result.push(ld);
        } else if ld == 1 {
            result.push(rd);
        } else if rd == 1 {
            result.push(ld);
        } else {
            return Err(Error::BroadcastMismatch {
                lhs: lhs.to_vec(),
                rhs: rhs.to_vec(),
            });
        }
    }

    result.reverse(); // built from the right
    Ok(result)
}

/// A read-only view of `a` broadcast to `dims`.
pub fn broadcast_view<'a>(a: &'a ArrayD<f64>, dims: &[usize]) -> Result<ArrayViewD<'a, f64>> {
    a.broadcast(IxDyn(dims)).ok_or(Error::BroadcastMismatch {
        lhs: a.shape().to_vec(),
        rhs: dims.to_vec(),
    })
}

/// Sum a gradient over every broadcast axis to restore `target` shape.
///
/// When broadcasting expanded a tensor during the forward pass, the backward
/// pass must sum the gradient over the expanded dimensions to match the
/// original shape.
///
/// For example, if an input was [1, 4] broadcast to [3, 4]:
///   the gradient is [3, 4], but the input gradient must be [1, 4] → sum dim 0
/// If the input was [4] broadcast to [3, 4]:
///   sum dim 0, then drop the leading axis.
pub fn reduce_to_shape(grad: ArrayD<f64>, target: &[usize]) -> ArrayD<f64> {
    if grad.shape() == target {
        return grad;
    }

    // Sum away the extra leading axes first.
    let mut out = grad;
    while out.ndim() > target.len() {
        out = out.sum_axis(Axis(0));
    }

    // Then sum (keeping the axis) wherever the target has size 1.
    for i in 0..target.len() {
        if target[i] == 1 && out.shape()[i] > 1 {
            out = out.sum_axis(Axis(i)).insert_axis(Axis(i));
        }
    }
    out
}

/// Resolve a possibly-negative axis against `rank`.
pub fn normalize_axis(axis: isize, rank: usize) -> Result<usize> {
    let r = rank as isize;
    let a = if axis < 0 { axis + r } else { axis };
    if a < 0 || a >= r {
        return Err(Error::AxisOutOfRange { axis, rank });
    }
    Ok(a as usize)
}

/// Resolve a set of axes, rejecting duplicates. Returns them sorted ascending.
pub fn normalize_axes(axes: &[isize], rank: usize) -> Result<Vec<usize>> {
    let mut out = Vec::with_capacity(axes.len());
    for &a in axes {
        out.push(normalize_axis(a, rank)?);
    }
    out.sort_unstable();
    if out.windows(2).any(|w| w[0] == w[1]) {
        return Err(Error::InvalidInput(format!("duplicate axes in {:?}", axes)));
    }
    Ok(out)
}

/// Row-major (C-order) strides for a shape.
///
/// For shape [2, 3, 4], strides are [12, 4, 1]: moving one step in dim 0
/// jumps 12 elements, in dim 1 jumps 4, in dim 2 jumps 1.
pub fn contiguous_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; dims.len()];
    if !dims.is_empty() {
        strides[dims.len() - 1] = 1;
        for i in (0..dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * dims[i + 1];
        }
    }
    strides
}

/// Flat row-major offset of a coordinate tuple.
pub fn coords_to_flat(coords: &[usize], strides: &[usize]) -> usize {
    coords.iter().zip(strides).map(|(c, s)| c * s).sum()
}

/// Decompose a flat row-major offset into coordinates.
pub fn flat_to_coords(flat: usize, strides: &[usize]) -> Vec<usize> {
    let mut coords = vec![0usize; strides.len()];
    let mut remainder = flat;
    for (i, &s) in strides.iter().enumerate() {
        if s > 0 {
            coords[i] = remainder / s;
            remainder %= s;
        }
    }
    coords
}

/// Return `a` in standard (row-major, contiguous) layout, copying only when
/// needed. Several ops leave stride-permuted arrays behind (transpose, flip);
/// reshape and flat-index math require standard layout.
pub fn to_standard<A: Clone>(a: ndarray::Array<A, IxDyn>) -> ndarray::Array<A, IxDyn> {
    if a.is_standard_layout() {
        a
    } else {
        a.as_standard_layout().into_owned()
    }
}

/// Reshape `a` to `dims`, making it contiguous first if necessary.
pub fn reshaped(a: ArrayD<f64>, dims: &[usize]) -> Result<ArrayD<f64>> {
    let src = a.shape().to_vec();
    to_standard(a)
        .into_shape_with_order(IxDyn(dims))
        .map_err(|_| Error::ElementCount {
            shape: dims.to_vec(),
            expected: dims.iter().product::<usize>().max(1),
            got: src.iter().product::<usize>().max(1),
        })
}
