use ndarray::{ArrayD, Axis, IxDyn, SliceInfo, SliceInfoElem, Zip};

use crate::error::{Error, Result};
use crate::index::{Indexer, Key};
use crate::op::Operation;
use crate::shape::{
    broadcast_shape, broadcast_view, normalize_axis, reduce_to_shape, reshaped, to_standard,
};
use crate::tensor::Tensor;

// Slicing, scatter-writes, masked fill, and top-k
//
// Keys are compiled once, at operation construction, into a `Plan`:
//
//   - the basic components (integer / span / new-axis) become the buffer's
//     native `SliceInfoElem`s, covering every axis the lead does not consume;
//   - an advanced lead (boolean mask, 1-D or 2-D integer list) becomes an
//     explicit list of selected rows.
//
// Forward and backward then run off the same plan, which is what keeps the
// scatter rules symmetric: whatever positions forward read, backward writes.
// A boolean mask selects through a flattened view of the leading axes, so
// its scatter operates on the flattened shape and reshapes back.
//
// Duplicate policy: a read may visit the same position twice (an integer
// list with repeats), and its backward ACCUMULATES into that position. A
// write with duplicate targets is ambiguous and rejected at construction.

#[derive(Debug, Clone)]
enum Lead {
    /// No advanced component; the basic entries cover every axis.
    Basic,
    /// Boolean mask over the leading `ndim` axes; `rows` are the row-major
    /// flat offsets of the true positions within those axes.
    Mask { rows: Vec<usize> },
    /// 1-D integer list over axis 0 (normalized, may repeat).
    Take(Vec<usize>),
    /// 2-D integer list over axis 0 (normalized rows of equal length).
    Grid(Vec<Vec<usize>>),
}

#[derive(Debug, Clone)]
struct Plan {
    lead: Lead,
    /// One entry per axis not consumed by the lead, padded with full spans.
    basic: Vec<SliceInfoElem>,
    /// Shape of the selected region `x[key]`.
    sel_dims: Vec<usize>,
    /// Shape scatter operates on: the input shape, except for mask leads
    /// where the masked axes are flattened into one.
    scatter_dims: Vec<usize>,
    input_dims: Vec<usize>,
}

fn full_span() -> SliceInfoElem {
    SliceInfoElem::Slice {
        start: 0,
        end: None,
        step: 1,
    }
}

fn make_info(elems: Vec<SliceInfoElem>) -> Result<SliceInfo<Vec<SliceInfoElem>, IxDyn, IxDyn>> {
    SliceInfo::try_from(elems).map_err(|_| Error::msg("malformed slice specification"))
}

/// Number of positions a span selects from an axis of size `n`.
/// Matches the buffer's `Slice` semantics: negative bounds count from the
/// end, bounds are clamped, and the selected range is walked by |step|.
fn span_len(n: usize, start: Option<isize>, stop: Option<isize>, step: isize) -> usize {
    let n = n as isize;
    let norm = |v: isize| (if v < 0 { v + n } else { v }).clamp(0, n);
    let s = norm(start.unwrap_or(0));
    let e = norm(stop.unwrap_or(n));
    if e <= s {
        0
    } else {
        ((e - s + step.abs() - 1) / step.abs()) as usize
    }
}

fn normalize_index(index: isize, size: usize, axis: usize) -> Result<usize> {
    let n = size as isize;
    let i = if index < 0 { index + n } else { index };
    if i < 0 || i >= n {
        return Err(Error::IndexOutOfBounds { index, axis, size });
    }
    Ok(i as usize)
}

fn build_plan(input_dims: &[usize], key: &Key) -> Result<Plan> {
    let comps = key.components();
    let rank = input_dims.len();

    // The lead, if advanced, consumes the leading axis (or axes, for a mask).
    let (lead, lead_sel, rest_dims, rest_start) = match comps.first() {
        Some(Indexer::Mask(m)) => {
            let ndim = m.ndim();
            if ndim == 0 || ndim > rank || m.shape() != &input_dims[..ndim] {
                return Err(Error::InvalidKey(format!(
                    "mask shaped {:?} does not cover the leading axes of {:?}",
                    m.shape(),
                    input_dims
                )));
            }
            let rows: Vec<usize> = m
                .iter()
                .enumerate()
                .filter_map(|(i, &v)| v.then_some(i))
                .collect();
            (
                Lead::Mask { rows: rows.clone() },
                vec![rows.len()],
                input_dims[ndim..].to_vec(),
                1,
            )
        }
        Some(Indexer::Take(list)) => {
            if rank == 0 {
                return Err(Error::InvalidKey("cannot index a scalar".to_string()));
            }
            if list.is_empty() {
                return Err(Error::InvalidKey("empty index list".to_string()));
            }
            let idx: Vec<usize> = list
                .iter()
                .map(|&i| normalize_index(i, input_dims[0], 0))
                .collect::<Result<_>>()?;
            (
                Lead::Take(idx.clone()),
                vec![idx.len()],
                input_dims[1..].to_vec(),
                1,
            )
        }
        Some(Indexer::TakeGrid(grid)) => {
            if rank == 0 {
                return Err(Error::InvalidKey("cannot index a scalar".to_string()));
            }
            let cols = grid.first().map(|r| r.len()).unwrap_or(0);
            if grid.is_empty() || cols == 0 || grid.iter().any(|r| r.len() != cols) {
                return Err(Error::InvalidKey(
                    "2-D index list must be non-empty and rectangular".to_string(),
                ));
            }
            let rows: Vec<Vec<usize>> = grid
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|&i| normalize_index(i, input_dims[0], 0))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<_>>()?;
            (
                Lead::Grid(rows.clone()),
                vec![rows.len(), cols],
                input_dims[1..].to_vec(),
                1,
            )
        }
        _ => (Lead::Basic, vec![], input_dims.to_vec(), 0),
    };

    // Walk the basic components over the remaining axes.
    let consumed_lead = rank - rest_dims.len();
    let mut basic = Vec::new();
    let mut sel_dims = lead_sel;
    let mut rest_axis = 0usize;
    for comp in &comps[rest_start..] {
        match comp {
            Indexer::NewAxis => {
                basic.push(SliceInfoElem::NewAxis);
                sel_dims.push(1);
            }
            Indexer::At(i) => {
                let n = *rest_dims.get(rest_axis).ok_or_else(|| {
                    Error::InvalidKey(format!("too many indices for shape {:?}", input_dims))
                })?;
                let idx = normalize_index(*i, n, consumed_lead + rest_axis)?;
                basic.push(SliceInfoElem::Index(idx as isize));
                rest_axis += 1;
            }
            Indexer::Span { start, stop, step } => {
                if *step == 0 {
                    return Err(Error::InvalidKey("span step must be nonzero".to_string()));
                }
                let n = *rest_dims.get(rest_axis).ok_or_else(|| {
                    Error::InvalidKey(format!("too many indices for shape {:?}", input_dims))
                })?;
                basic.push(SliceInfoElem::Slice {
                    start: start.unwrap_or(0),
                    end: *stop,
                    step: *step,
                });
                sel_dims.push(span_len(n, *start, *stop, *step));
                rest_axis += 1;
            }
            Indexer::Mask(_) | Indexer::Take(_) | Indexer::TakeGrid(_) => {
                return Err(Error::InvalidKey(
                    "mask / integer-list components are only supported as the leading key entry"
                        .to_string(),
                ));
            }
        }
    }
    // Untouched trailing axes pass through whole.
    for &d in &rest_dims[rest_axis..] {
        basic.push(full_span());
        sel_dims.push(d);
    }

    let scatter_dims = match &lead {
        Lead::Mask { .. } => {
            let lead_count: usize = input_dims[..consumed_lead].iter().product();
            let mut dims = vec![lead_count];
            dims.extend_from_slice(&rest_dims);
            dims
        }
        _ => input_dims.to_vec(),
    };

    Ok(Plan {
        lead,
        basic,
        sel_dims,
        scatter_dims,
        input_dims: input_dims.to_vec(),
    })
}

impl Plan {
    fn is_mask(&self) -> bool {
        matches!(self.lead, Lead::Mask { .. })
    }

    /// Slice prefixes addressing each selected row, in selection order.
    fn row_infos(&self) -> Vec<Vec<SliceInfoElem>> {
        let with_prefix = |i: usize| {
            let mut elems = vec![SliceInfoElem::Index(i as isize)];
            elems.extend(self.basic.iter().cloned());
            elems
        };
        match &self.lead {
            Lead::Basic => vec![self.basic.clone()],
            Lead::Take(idx) => idx.iter().map(|&i| with_prefix(i)).collect(),
            Lead::Grid(rows) => rows
                .iter()
                .flat_map(|row| row.iter().map(|&i| with_prefix(i)))
                .collect(),
            Lead::Mask { rows } => rows.iter().map(|&i| with_prefix(i)).collect(),
        }
    }

    /// Split a selection-shaped array into the pieces matching `row_infos`.
    fn split_selection(&self, src: &ArrayD<f64>) -> Vec<ArrayD<f64>> {
        match &self.lead {
            Lead::Basic => vec![src.clone()],
            Lead::Take(idx) => (0..idx.len())
                .map(|k| src.index_axis(Axis(0), k).to_owned())
                .collect(),
            Lead::Grid(rows) => {
                let cols = rows.first().map(|r| r.len()).unwrap_or(0);
                let mut out = Vec::with_capacity(rows.len() * cols);
                for r in 0..rows.len() {
                    let row_view = src.index_axis(Axis(0), r);
                    for c in 0..cols {
                        out.push(row_view.index_axis(Axis(0), c).to_owned());
                    }
                }
                out
            }
            Lead::Mask { rows } => (0..rows.len())
                .map(|k| src.index_axis(Axis(0), k).to_owned())
                .collect(),
        }
    }

    /// Read the selected region out of `x`.
    fn gather(&self, x: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let sliced_rest = |sel: &ArrayD<f64>| -> Result<ArrayD<f64>> {
            let mut elems = vec![full_span()];
            elems.extend(self.basic.iter().cloned());
            let info = make_info(elems)?;
            Ok(to_standard(sel.slice(&info).to_owned()))
        };
        match &self.lead {
            Lead::Basic => {
                let info = make_info(self.basic.clone())?;
                Ok(to_standard(x.slice(&info).to_owned()))
            }
            Lead::Take(idx) => sliced_rest(&x.select(Axis(0), idx)),
            Lead::Grid(rows) => {
                let mut pieces = Vec::with_capacity(rows.len());
                for row in rows {
                    pieces.push(sliced_rest(&x.select(Axis(0), row))?);
                }
                let views: Vec<_> = pieces.iter().map(|p| p.view()).collect();
                ndarray::stack(Axis(0), &views)
                    .map_err(|e| Error::msg(format!("index gather failed: {}", e)))
            }
            Lead::Mask { rows } => {
                let flat = reshaped(x.clone(), &self.scatter_dims)?;
                sliced_rest(&flat.select(Axis(0), rows))
            }
        }
    }

    /// Accumulate a selection-shaped gradient into a zero buffer shaped like
    /// the input. Duplicate targets sum.
    fn scatter_add(&self, grad: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let mut target = ArrayD::<f64>::zeros(IxDyn(&self.scatter_dims));
        for (elems, piece) in self.row_infos().into_iter().zip(self.split_selection(grad)) {
            let info = make_info(elems)?;
            target
                .slice_mut(&info)
                .zip_mut_with(&piece, |t, &s| *t += s);
        }
        if self.is_mask() {
            reshaped(target, &self.input_dims)
        } else {
            Ok(target)
        }
    }

    /// Overwrite the selected region of a copy of `x` with `value`
    /// (already broadcast to the selection shape).
    fn write(&self, x: &ArrayD<f64>, value: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let mut target = if self.is_mask() {
            reshaped(x.clone(), &self.scatter_dims)?
        } else {
            x.clone()
        };
        for (elems, piece) in self.row_infos().into_iter().zip(self.split_selection(value)) {
            let info = make_info(elems)?;
            target.slice_mut(&info).assign(&piece);
        }
        if self.is_mask() {
            reshaped(target, &self.input_dims)
        } else {
            Ok(target)
        }
    }

    /// A copy of `g` with the selected region zeroed.
    fn zero_region(&self, g: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let mut target = if self.is_mask() {
            reshaped(g.clone(), &self.scatter_dims)?
        } else {
            g.clone()
        };
        for elems in self.row_infos() {
            let info = make_info(elems)?;
            target.slice_mut(&info).fill(0.0);
        }
        if self.is_mask() {
            reshaped(target, &self.input_dims)
        } else {
            Ok(target)
        }
    }

    /// All lead target positions, for duplicate detection on writes.
    fn write_targets(&self) -> Option<Vec<usize>> {
        match &self.lead {
            Lead::Basic | Lead::Mask { .. } => None, // structurally duplicate-free
            Lead::Take(idx) => Some(idx.clone()),
            Lead::Grid(rows) => Some(rows.iter().flatten().copied().collect()),
        }
    }
}

/// Read a sub-tensor selected by a key.
#[derive(Debug)]
pub struct Slice {
    inputs: [Tensor; 1],
    plan: Plan,
}

impl Slice {
    pub fn new(input: Tensor, key: Key) -> Result<Self> {
        let plan = build_plan(input.dims(), &key)?;
        Ok(Slice {
            inputs: [input],
            plan,
        })
    }
}

impl Operation for Slice {
    fn name(&self) -> &'static str {
        "slice"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        self.plan.gather(self.inputs[0].array())
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        Ok(vec![self.plan.scatter_add(output_grad)?])
    }
}

/// Copy the first input and overwrite the keyed region with the second.
#[derive(Debug)]
pub struct SetSlice {
    inputs: [Tensor; 2],
    plan: Plan,
}

impl SetSlice {
    pub fn new(dest: Tensor, value: Tensor, key: Key) -> Result<Self> {
        let plan = build_plan(dest.dims(), &key)?;
        // The value must broadcast INTO the region, never enlarge it.
        let joint = broadcast_shape(value.dims(), &plan.sel_dims)?;
        if joint != plan.sel_dims {
            return Err(Error::ShapeMismatch {
                expected: plan.sel_dims.clone(),
                got: value.dims().to_vec(),
            });
        }
        // Writes addressing the same position twice are ambiguous.
        if let Some(mut targets) = plan.write_targets() {
            targets.sort_unstable();
            if targets.windows(2).any(|w| w[0] == w[1]) {
                return Err(Error::InvalidKey(
                    "duplicate target positions in set-slice index list".to_string(),
                ));
            }
        }
        Ok(SetSlice {
            inputs: [dest, value],
            plan,
        })
    }
}

impl Operation for SetSlice {
    fn name(&self) -> &'static str {
        "set_slice"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        let value = self.inputs[1].array();
        let vb = broadcast_view(value, &self.plan.sel_dims)?.to_owned();
        self.plan.write(self.inputs[0].array(), &vb)
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        // The destination's gradient flows everywhere the write did not land;
        // the value's gradient is the written region, reduced back over any
        // broadcast axes. Chained overwrites shadow naturally: a later
        // set-slice zeroes the region before this one sees the gradient.
        let grad_dest = self.plan.zero_region(output_grad)?;
        let picked = self.plan.gather(output_grad)?;
        let grad_value = reduce_to_shape(picked, self.inputs[1].dims());
        Ok(vec![grad_dest, grad_value])
    }
}

/// Replace masked positions with a constant. The mask is a parameter, not a
/// differentiable input.
#[derive(Debug)]
pub struct MaskedFill {
    inputs: [Tensor; 1],
    mask: ArrayD<f64>,
    fill_value: f64,
}

impl MaskedFill {
    pub fn new(input: Tensor, mask: &Tensor, fill_value: f64) -> Result<Self> {
        if mask.array().iter().any(|&v| v != 0.0 && v != 1.0) {
            return Err(Error::InvalidInput(
                "mask must contain only 0s and 1s".to_string(),
            ));
        }
        let joint = broadcast_shape(mask.dims(), input.dims())?;
        if joint != input.dims() {
            return Err(Error::ShapeMismatch {
                expected: input.dims().to_vec(),
                got: mask.dims().to_vec(),
            });
        }
        let mask = broadcast_view(mask.array(), input.dims())?.to_owned();
        Ok(MaskedFill {
            inputs: [input],
            mask,
            fill_value,
        })
    }
}

impl Operation for MaskedFill {
    fn name(&self) -> &'static str {
        "masked_fill"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        let fill = self.fill_value;
        Ok(Zip::from(self.inputs[0].array())
            .and(&self.mask)
            .map_collect(|&x, &m| (1.0 - m) * x + m * fill))
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        Ok(vec![Zip::from(output_grad)
            .and(&self.mask)
            .map_collect(|&g, &m| g * (1.0 - m))])
    }
}

/// The k largest values along an axis, with their positions recorded during
/// the forward pass. Ties resolve to the first-seen position.
#[derive(Debug)]
pub struct TopK {
    inputs: [Tensor; 1],
    k: usize,
    axis: usize,
    indices: ArrayD<usize>,
}

impl TopK {
    pub fn new(input: Tensor, k: usize, axis: isize) -> Result<Self> {
        if k == 0 {
            return Err(Error::InvalidInput("top-k requires k >= 1".to_string()));
        }
        let axis = normalize_axis(axis, input.rank())?;
        if k > input.dims()[axis] {
            return Err(Error::InvalidInput(format!(
                "k = {} exceeds axis size {}",
                k,
                input.dims()[axis]
            )));
        }
        Ok(TopK {
            inputs: [input],
            k,
            axis,
            indices: ArrayD::from_elem(IxDyn(&[0]), 0usize),
        })
    }

    /// Recorded positions of the selected values, shaped like the output.
    pub fn indices(&self) -> &ArrayD<usize> {
        &self.indices
    }
}

impl Operation for TopK {
    fn name(&self) -> &'static str {
        "topk"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        let x = self.inputs[0].array();
        let rank = x.ndim();
        let last = rank - 1;

        // Work with the ranked axis last, lane by lane.
        let mut xs = x.clone();
        xs.swap_axes(self.axis, last);
        let xs = to_standard(xs);
        let lane_len = xs.shape()[last];
        let lanes = xs.len() / lane_len;
        let data: Vec<f64> = xs.iter().cloned().collect();

        let mut values = vec![0.0f64; lanes * self.k];
        let mut indices = vec![0usize; lanes * self.k];
        for lane in 0..lanes {
            let base = lane * lane_len;
            let mut order: Vec<usize> = (0..lane_len).collect();
            // Stable descending sort: equal values keep first-seen order.
            order.sort_by(|&i, &j| {
                data[base + j]
                    .partial_cmp(&data[base + i])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for i in 0..self.k {
                values[lane * self.k + i] = data[base + order[i]];
                indices[lane * self.k + i] = order[i];
            }
        }

        let mut swapped_dims = xs.shape().to_vec();
        swapped_dims[last] = self.k;
        let mut out = ArrayD::from_shape_vec(IxDyn(&swapped_dims), values)
            .map_err(|_| Error::msg("top-k output shape mismatch"))?;
        out.swap_axes(self.axis, last);

        let mut idx = ArrayD::from_shape_vec(IxDyn(&swapped_dims), indices)
            .map_err(|_| Error::msg("top-k index shape mismatch"))?;
        idx.swap_axes(self.axis, last);
        self.indices = to_standard(idx);

        Ok(to_standard(out))
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        let input_dims = self.inputs[0].dims();
        let rank = input_dims.len();
        let last = rank - 1;
        let lane_len = input_dims[self.axis];

        let mut gs = output_grad.clone();
        gs.swap_axes(self.axis, last);
        let gs = to_standard(gs);
        let mut is = self.indices.clone();
        is.swap_axes(self.axis, last);
        let is = to_standard(is);

        let lanes = gs.len() / self.k;
        let g_flat: Vec<f64> = gs.iter().cloned().collect();
        let i_flat: Vec<usize> = is.iter().cloned().collect();

        // Scatter each lane's gradient to exactly the recorded positions.
        let mut grad = vec![0.0f64; lanes * lane_len];
        for lane in 0..lanes {
            for i in 0..self.k {
                grad[lane * lane_len + i_flat[lane * self.k + i]] += g_flat[lane * self.k + i];
            }
        }

        let mut swapped_dims = input_dims.to_vec();
        swapped_dims.swap(self.axis, last);
        let mut out = ArrayD::from_shape_vec(IxDyn(&swapped_dims), grad)
            .map_err(|_| Error::msg("top-k gradient shape mismatch"))?;
        out.swap_axes(self.axis, last);
        Ok(vec![to_standard(out)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{at, full, newaxis, span, span_step, take, take_grid};

    fn arange(dims: &[usize]) -> Tensor {
        let n: usize = dims.iter().product();
        Tensor::from_shape_vec(dims, (0..n).map(|v| v as f64).collect()).unwrap()
    }

    #[test]
    fn test_basic_slice_shapes() {
        let t = arange(&[4, 3, 2]);
        let s = t.slice(vec![span(1, 3), at(0)]).unwrap();
        assert_eq!(s.dims(), &[2, 2]);
        // Rows 1 and 2, column 0 of the middle axis.
        assert_eq!(s.to_vec(), vec![6.0, 7.0, 12.0, 13.0]);
    }

    #[test]
    fn test_newaxis_and_negative_step() {
        let t = arange(&[4]);
        let s = t.slice(vec![newaxis(), span_step(None, None, -1)]).unwrap();
        assert_eq!(s.dims(), &[1, 4]);
        assert_eq!(s.to_vec(), vec![3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_take_duplicates_accumulate() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0]).variable();
        let s = t.slice(vec![take(vec![0, 0, 2])]).unwrap();
        assert_eq!(s.to_vec(), vec![1.0, 1.0, 3.0]);
        s.sum_all().unwrap().backward().unwrap();
        assert_eq!(
            t.grad().unwrap().iter().cloned().collect::<Vec<_>>(),
            vec![2.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_take_grid_shape_and_gradient() {
        let t = arange(&[7, 2]).variable();
        let s = t.slice(vec![take_grid(vec![vec![0, 1, 2], vec![5, 2, 3]])]).unwrap();
        assert_eq!(s.dims(), &[2, 3, 2]);
        s.sum_all().unwrap().backward().unwrap();
        let g = t.grad().unwrap();
        // Row 2 was addressed twice; its gradient accumulates.
        assert_eq!(g[[2, 0]], 2.0);
        assert_eq!(g[[0, 0]], 1.0);
        assert_eq!(g[[6, 0]], 0.0);
    }

    #[test]
    fn test_mask_lead_slice() {
        let t = arange(&[2, 3]);
        let m = ArrayD::from_shape_vec(
            IxDyn(&[2, 3]),
            vec![true, false, true, false, true, false],
        )
        .unwrap();
        let s = t.slice(vec![crate::index::mask(m)]).unwrap();
        assert_eq!(s.dims(), &[3]);
        assert_eq!(s.to_vec(), vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_advanced_entry_must_lead() {
        let t = arange(&[3, 3]);
        assert!(t.slice(vec![full(), take(vec![0])]).is_err());
    }

    #[test]
    fn test_set_slice_duplicate_targets_rejected() {
        let t = arange(&[7, 2]);
        let v = Tensor::zeros(&[2, 3, 2]);
        assert!(t
            .set_slice(vec![take_grid(vec![vec![0, 1, 2], vec![6, 2, 3]])], v)
            .is_err());
    }

    #[test]
    fn test_set_slice_basic() {
        let t = arange(&[5]);
        let out = t
            .set_slice(vec![span(1, 3)], Tensor::from_vec(vec![9.0, 8.0]))
            .unwrap();
        assert_eq!(out.to_vec(), vec![0.0, 9.0, 8.0, 3.0, 4.0]);
        // The source tensor is untouched.
        assert_eq!(t.to_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_masked_fill_validates_mask() {
        let t = arange(&[2, 2]);
        let bad = Tensor::from_nested(vec![vec![0.5, 0.0], vec![1.0, 0.0]]).unwrap();
        assert!(t.masked_fill(&bad, 7.0).is_err());

        let ok = Tensor::from_nested(vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let f = t.masked_fill(&ok, 7.0).unwrap();
        assert_eq!(f.to_vec(), vec![7.0, 1.0, 2.0, 7.0]);
    }

    #[test]
    fn test_topk_values_and_ties() {
        let t = Tensor::from_vec(vec![1.0, 5.0, 5.0, 3.0]);
        let (vals, idx) = t.topk(2, 0).unwrap();
        assert_eq!(vals.to_vec(), vec![5.0, 5.0]);
        // First-seen order breaks the tie.
        assert_eq!(idx.iter().cloned().collect::<Vec<_>>(), vec![1, 2]);
    }
}
