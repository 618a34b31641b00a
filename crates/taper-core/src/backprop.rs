use std::collections::HashMap;

use ndarray::ArrayD;

use crate::error::{Error, Result};
use crate::op::TensorId;
use crate::tensor::Tensor;

// Backpropagation — reverse-mode automatic differentiation
//
// HOW IT WORKS:
//
//   1. Forward pass: every operation stamps itself onto its output tensor,
//      so the tensors reachable backward from a loss form a DAG.
//
//   2. backward() topologically sorts that DAG from the root to the leaves.
//
//   3. Starting from the seed gradient (1.0 for a scalar root), we walk the
//      order in reverse. For each tensor we hand its accumulated gradient to
//      the producing operation's backward rule and distribute the returned
//      per-input gradients into the inputs' accumulators.
//
// ACCUMULATION: a tensor used by several downstream operations receives the
// SUM of their contributions (multivariate chain rule). Reverse topological
// order guarantees every contribution has arrived before the tensor's own
// producing operation runs, so each backward rule executes exactly once.
//
// RETENTION: once a non-leaf tensor has propagated its gradient, the
// gradient buffer is released unless retain_grad() was called, bounding
// memory across training iterations. Leaf gradients survive only on tensors
// marked as variables (or explicitly retained). Gradient still FLOWS through
// every intermediate regardless of flags — the flags only control what is
// kept for inspection afterwards.

/// Drive the backward pass from `root` with the given seed gradient.
///
/// The seed must be shaped exactly like `root` (callers validate this).
pub(crate) fn run_backward(root: &Tensor, seed: ArrayD<f64>) -> Result<()> {
    // Step 1: topological order (leaves first, root last).
    let order = topo_order(root)?;

    // Step 2: seed the root's accumulator.
    root.accumulate_grad(&seed);

    // Step 3: walk in reverse topological order (root first, leaves last).
    for node in order.iter().rev() {
        let Some(op) = node.op().cloned() else {
            continue; // leaf — nothing to propagate
        };
        let Some(grad) = node.current_grad() else {
            continue; // no gradient flows through this tensor
        };

        let input_grads = op.backward(&grad)?;
        let inputs = op.inputs();
        if input_grads.len() != inputs.len() {
            return Err(Error::GradientCount {
                op: op.name(),
                expected: inputs.len(),
                got: input_grads.len(),
            });
        }
        for (index, (input, g)) in inputs.iter().zip(&input_grads).enumerate() {
            if g.shape() != input.dims() {
                return Err(Error::GradientShape {
                    op: op.name(),
                    index,
                    expected: input.dims().to_vec(),
                    got: g.shape().to_vec(),
                });
            }
            input.accumulate_grad(g);
        }

        // The gradient has served its one propagation use.
        if !node.retains_grad() {
            node.clear_grad();
        }
    }

    // Step 4: leaf gradients are kept only for variables (or on request).
    for node in &order {
        if node.is_leaf() && !node.requires_grad() && !node.retains_grad() {
            node.clear_grad();
        }
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Build a topological ordering of the graph reachable backward from `root`.
///
/// Post-order depth-first search: every tensor appears after all of its
/// inputs (leaves first, root last). Tensors reachable along several paths
/// are visited once. A tensor encountered while its own subtree is still
/// being expanded means the graph has a cycle — a malformed graph is a
/// programming error, reported rather than looped on.
fn topo_order(root: &Tensor) -> Result<Vec<Tensor>> {
    let mut marks: HashMap<TensorId, Mark> = HashMap::new();
    let mut order = Vec::new();
    visit(root, &mut marks, &mut order)?;
    Ok(order)
}

fn visit(
    tensor: &Tensor,
    marks: &mut HashMap<TensorId, Mark>,
    order: &mut Vec<Tensor>,
) -> Result<()> {
    match marks.get(&tensor.id()) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => return Err(Error::CycleDetected),
        None => {}
    }
    marks.insert(tensor.id(), Mark::InProgress);
    if let Some(op) = tensor.op() {
        for input in op.inputs() {
            visit(input, marks, order)?;
        }
    }
    marks.insert(tensor.id(), Mark::Done);
    order.push(tensor.clone());
    Ok(())
}
