// Backward-engine behavior: accumulation across shared consumers, gradient
// retention and release, seed validation, and the operation-registration
// contract for external kernels.

use ndarray::{ArrayD, IxDyn};

use taper_core::{apply, Error, Operation, Result, Tensor};

#[test]
fn shared_tensor_accumulates_contributions() {
    // c = a·a → dc/da = 2a.
    let a = Tensor::from_vec(vec![2.0, 3.0]).variable();
    let c = a.mul(&a).unwrap();
    c.sum_all().unwrap().backward().unwrap();
    assert_eq!(
        a.grad().unwrap().iter().cloned().collect::<Vec<_>>(),
        vec![4.0, 6.0]
    );

    // A tensor feeding two separate operations also sums both paths.
    let x = Tensor::scalar(3.0).variable();
    let y = x.mul(2.0).unwrap();
    let z = x.mul(5.0).unwrap();
    y.add(&z).unwrap().backward().unwrap();
    assert_eq!(x.grad().unwrap().sum(), 7.0);
}

#[test]
fn non_retained_intermediate_gradient_is_released() {
    let a = Tensor::from_vec(vec![1.0, 2.0]).variable();
    let b = a.mul(2.0).unwrap();
    let c = b.mul(3.0).unwrap();
    let loss = c.sum_all().unwrap();
    loss.backward().unwrap();

    // Leaf variable keeps its gradient; intermediates release theirs.
    assert!(a.grad().is_some());
    assert!(b.grad().is_none());
    assert!(c.grad().is_none());
    assert!(loss.grad().is_none());
}

#[test]
fn retained_intermediate_gradient_survives() {
    let a = Tensor::from_vec(vec![1.0, 2.0]).variable();
    let b = a.mul(2.0).unwrap();
    b.retain_grad();
    b.mul(3.0).unwrap().sum_all().unwrap().backward().unwrap();

    assert_eq!(
        b.grad().unwrap().iter().cloned().collect::<Vec<_>>(),
        vec![3.0, 3.0]
    );
    assert_eq!(
        a.grad().unwrap().iter().cloned().collect::<Vec<_>>(),
        vec![6.0, 6.0]
    );
}

#[test]
fn gradient_flows_through_untracked_intermediates() {
    // No flag anywhere in the middle of the chain stops propagation.
    let a = Tensor::scalar(2.0).variable();
    let chain = a.mul(3.0).unwrap().add(1.0).unwrap().mul(4.0).unwrap();
    chain.backward().unwrap();
    assert_eq!(a.grad().unwrap().sum(), 12.0);
}

#[test]
fn plain_leaves_get_no_gradient() {
    let a = Tensor::scalar(2.0).variable();
    let b = Tensor::scalar(5.0); // not a variable
    let c = a.mul(&b).unwrap();
    c.backward().unwrap();
    assert!(a.grad().is_some());
    assert!(b.grad().is_none());
}

#[test]
fn leaf_gradients_accumulate_across_backward_calls() {
    let a = Tensor::scalar(3.0).variable();
    a.mul(2.0).unwrap().backward().unwrap();
    a.mul(2.0).unwrap().backward().unwrap();
    assert_eq!(a.grad().unwrap().sum(), 4.0);

    a.zero_grad();
    assert!(a.grad().is_none());
}

#[test]
fn seed_gradients_are_validated() {
    let a = Tensor::from_vec(vec![1.0, 2.0, 3.0]).variable();
    let y = a.mul(2.0).unwrap();

    // Non-scalar root without a seed is an error.
    assert!(matches!(y.backward(), Err(Error::NonScalarBackward { .. })));

    // A wrongly shaped seed is an error.
    let bad = ArrayD::from_elem(IxDyn(&[2]), 1.0);
    assert!(matches!(
        y.backward_with(bad),
        Err(Error::SeedShape { .. })
    ));

    // A matching seed weights the contributions.
    let seed = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, 10.0, 100.0]).unwrap();
    y.backward_with(seed).unwrap();
    assert_eq!(
        a.grad().unwrap().iter().cloned().collect::<Vec<_>>(),
        vec![2.0, 20.0, 200.0]
    );
}

#[test]
fn detached_tensors_leave_the_graph() {
    let a = Tensor::scalar(2.0).variable();
    let b = a.mul(3.0).unwrap().detach();
    let c = b.mul(4.0).unwrap();
    c.backward().unwrap();
    // The detach cut the path back to a.
    assert!(a.grad().is_none());
}

// Operation registration: an external kernel plugs in through the same
// trait + apply() path the built-in catalog uses.

#[derive(Debug)]
struct Relu {
    inputs: [Tensor; 1],
}

impl Relu {
    fn new(input: &Tensor) -> Self {
        Relu {
            inputs: [input.clone()],
        }
    }
}

impl Operation for Relu {
    fn name(&self) -> &'static str {
        "relu"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        Ok(self.inputs[0].array().mapv(|v| v.max(0.0)))
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        let mask = self.inputs[0].array().mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        Ok(vec![output_grad * &mask])
    }
}

#[test]
fn external_operations_register_through_apply() {
    let x = Tensor::from_vec(vec![-2.0, -0.5, 0.5, 3.0]).variable();
    let y = apply(Relu::new(&x)).unwrap();
    assert_eq!(y.to_vec(), vec![0.0, 0.0, 0.5, 3.0]);

    y.sum_all().unwrap().backward().unwrap();
    assert_eq!(
        x.grad().unwrap().iter().cloned().collect::<Vec<_>>(),
        vec![0.0, 0.0, 1.0, 1.0]
    );
}

// A wrong gradient rule is an invariant violation the engine must surface.

#[derive(Debug)]
struct WrongShape {
    inputs: [Tensor; 1],
}

impl Operation for WrongShape {
    fn name(&self) -> &'static str {
        "wrong_shape"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        Ok(self.inputs[0].array().clone())
    }

    fn backward(&self, _output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        // Deliberately wrong: gradient shaped unlike the input.
        Ok(vec![ArrayD::zeros(IxDyn(&[1]))])
    }
}

#[derive(Debug)]
struct WrongCount {
    inputs: [Tensor; 1],
}

impl Operation for WrongCount {
    fn name(&self) -> &'static str {
        "wrong_count"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        Ok(self.inputs[0].array().clone())
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        Ok(vec![output_grad.clone(), output_grad.clone()])
    }
}

#[test]
fn malformed_backward_results_are_fatal() {
    let x = Tensor::scalar(1.0).variable();

    let y = apply(WrongShape {
        inputs: [x.clone()],
    })
    .unwrap();
    assert!(matches!(
        y.backward(),
        Err(Error::GradientShape { op: "wrong_shape", .. })
    ));

    let y = apply(WrongCount {
        inputs: [x.clone()],
    })
    .unwrap();
    assert!(matches!(
        y.backward(),
        Err(Error::GradientCount { op: "wrong_count", .. })
    ));
}

#[test]
fn retain_grad_on_leaf_without_requires_grad() {
    let b = Tensor::scalar(5.0);
    b.retain_grad();
    let c = b.mul(3.0).unwrap();
    c.backward().unwrap();
    // Retention keeps the gradient even though b is not a variable.
    assert_eq!(b.grad().unwrap().sum(), 3.0);
}
