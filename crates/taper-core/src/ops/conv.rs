use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};
use crate::op::Operation;
use crate::tensor::Tensor;

// 2-D convolution and pooling
//
// Layout: input [N, C_in, H, W], weight [C_out, C_in, kH, kW].
//
//   output[n, co, oh, ow] = Σ_{ci,ki,kj} input[n, ci, oh·sh+ki-ph, ow·sw+kj-pw]
//                                        · weight[co, ci, ki, kj]
//
// Gradients walk the same window geometry in reverse:
//   grad_weight[co,ci,ki,kj] += g[n,co,oh,ow] · input[n,ci,ih,iw]
//   grad_input[n,ci,ih,iw]   += g[n,co,oh,ow] · weight[co,ci,ki,kj]
// which is the correlate-with-flipped-kernel identity written as a scatter.
//
// Max-pool records the argmax of each window during forward (first-seen on
// ties) and scatters the gradient to exactly those positions; avg-pool
// divides each window's gradient evenly over its in-bounds positions.
// Overlapping windows sum their contributions in both cases.

fn out_extent(size: usize, kernel: usize, stride: usize, pad: usize) -> Result<usize> {
    let padded = size + 2 * pad;
    if kernel == 0 || stride == 0 {
        return Err(Error::InvalidInput(
            "kernel and stride must be >= 1".to_string(),
        ));
    }
    if padded < kernel {
        return Err(Error::InvalidInput(format!(
            "kernel {} exceeds padded extent {}",
            kernel, padded
        )));
    }
    Ok((padded - kernel) / stride + 1)
}

fn require_rank4(t: &Tensor, what: &str) -> Result<()> {
    if t.rank() != 4 {
        return Err(Error::InvalidInput(format!(
            "{} must be rank 4, got shape {:?}",
            what,
            t.dims()
        )));
    }
    Ok(())
}

/// 2-D convolution of `[N, C_in, H, W]` with `[C_out, C_in, kH, kW]`.
#[derive(Debug)]
pub struct Conv2d {
    inputs: [Tensor; 2],
    stride: (usize, usize),
    padding: (usize, usize),
}

impl Conv2d {
    pub fn new(
        input: Tensor,
        weight: Tensor,
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<Self> {
        require_rank4(&input, "conv2d input")?;
        require_rank4(&weight, "conv2d weight")?;
        if input.dims()[1] != weight.dims()[1] {
            return Err(Error::ShapeMismatch {
                expected: vec![input.dims()[1]],
                got: vec![weight.dims()[1]],
            });
        }
        out_extent(input.dims()[2], weight.dims()[2], stride.0, padding.0)?;
        out_extent(input.dims()[3], weight.dims()[3], stride.1, padding.1)?;
        Ok(Conv2d {
            inputs: [input, weight],
            stride,
            padding,
        })
    }

    fn geometry(&self) -> ([usize; 4], [usize; 4], usize, usize) {
        let i = self.inputs[0].dims();
        let w = self.inputs[1].dims();
        let h_out = (i[2] + 2 * self.padding.0 - w[2]) / self.stride.0 + 1;
        let w_out = (i[3] + 2 * self.padding.1 - w[3]) / self.stride.1 + 1;
        (
            [i[0], i[1], i[2], i[3]],
            [w[0], w[1], w[2], w[3]],
            h_out,
            w_out,
        )
    }
}

impl Operation for Conv2d {
    fn name(&self) -> &'static str {
        "conv2d"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        let ([n, c_in, h, w], [c_out, _, kh, kw], h_out, w_out) = self.geometry();
        let (sh, sw) = self.stride;
        let (ph, pw) = self.padding;
        let x: Vec<f64> = self.inputs[0].array().iter().cloned().collect();
        let wt: Vec<f64> = self.inputs[1].array().iter().cloned().collect();

        let mut out = vec![0.0f64; n * c_out * h_out * w_out];
        for ni in 0..n {
            for co in 0..c_out {
                for oh in 0..h_out {
                    for ow in 0..w_out {
                        let mut acc = 0.0;
                        for ci in 0..c_in {
                            for ki in 0..kh {
                                for kj in 0..kw {
                                    let ih = (oh * sh + ki) as isize - ph as isize;
                                    let iw = (ow * sw + kj) as isize - pw as isize;
                                    if ih < 0 || ih >= h as isize || iw < 0 || iw >= w as isize {
                                        continue;
                                    }
                                    let xi = ((ni * c_in + ci) * h + ih as usize) * w + iw as usize;
                                    let wi = ((co * c_in + ci) * kh + ki) * kw + kj;
                                    acc += x[xi] * wt[wi];
                                }
                            }
                        }
                        out[((ni * c_out + co) * h_out + oh) * w_out + ow] = acc;
                    }
                }
            }
        }
        ArrayD::from_shape_vec(IxDyn(&[n, c_out, h_out, w_out]), out)
            .map_err(|_| Error::msg("conv2d output shape mismatch"))
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        let ([n, c_in, h, w], [c_out, _, kh, kw], h_out, w_out) = self.geometry();
        let (sh, sw) = self.stride;
        let (ph, pw) = self.padding;
        let x: Vec<f64> = self.inputs[0].array().iter().cloned().collect();
        let wt: Vec<f64> = self.inputs[1].array().iter().cloned().collect();
        let g: Vec<f64> = output_grad.iter().cloned().collect();

        let mut grad_x = vec![0.0f64; x.len()];
        let mut grad_w = vec![0.0f64; wt.len()];
        for ni in 0..n {
            for co in 0..c_out {
                for oh in 0..h_out {
                    for ow in 0..w_out {
                        let go = g[((ni * c_out + co) * h_out + oh) * w_out + ow];
                        if go == 0.0 {
                            continue;
                        }
                        for ci in 0..c_in {
                            for ki in 0..kh {
                                for kj in 0..kw {
                                    let ih = (oh * sh + ki) as isize - ph as isize;
                                    let iw = (ow * sw + kj) as isize - pw as isize;
                                    if ih < 0 || ih >= h as isize || iw < 0 || iw >= w as isize {
                                        continue;
                                    }
                                    let xi = ((ni * c_in + ci) * h + ih as usize) * w + iw as usize;
                                    let wi = ((co * c_in + ci) * kh + ki) * kw + kj;
                                    grad_w[wi] += go * x[xi];
                                    grad_x[xi] += go * wt[wi];
                                }
                            }
                        }
                    }
                }
            }
        }

        let grad_input = ArrayD::from_shape_vec(IxDyn(&[n, c_in, h, w]), grad_x)
            .map_err(|_| Error::msg("conv2d input gradient shape mismatch"))?;
        let grad_weight = ArrayD::from_shape_vec(IxDyn(&[c_out, c_in, kh, kw]), grad_w)
            .map_err(|_| Error::msg("conv2d weight gradient shape mismatch"))?;
        Ok(vec![grad_input, grad_weight])
    }
}

/// Shared geometry checks for the pooling pair.
fn pool_setup(
    input: &Tensor,
    kernel: (usize, usize),
    stride: Option<(usize, usize)>,
    padding: (usize, usize),
) -> Result<(usize, usize)> {
    require_rank4(input, "pool input")?;
    let stride = stride.unwrap_or(kernel);
    if padding.0 >= kernel.0 || padding.1 >= kernel.1 {
        // Every window must see at least one real element.
        return Err(Error::InvalidInput(format!(
            "padding {:?} must be smaller than the kernel {:?}",
            padding, kernel
        )));
    }
    out_extent(input.dims()[2], kernel.0, stride.0, padding.0)?;
    out_extent(input.dims()[3], kernel.1, stride.1, padding.1)?;
    Ok(stride)
}

/// 2-D max-pooling; stride defaults to the kernel size.
#[derive(Debug)]
pub struct MaxPool2d {
    inputs: [Tensor; 1],
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
    /// Flat input offset of each window's maximum, recorded during forward.
    argmax: Vec<usize>,
}

impl MaxPool2d {
    pub fn new(
        input: Tensor,
        kernel: (usize, usize),
        stride: Option<(usize, usize)>,
        padding: (usize, usize),
    ) -> Result<Self> {
        let stride = pool_setup(&input, kernel, stride, padding)?;
        Ok(MaxPool2d {
            inputs: [input],
            kernel,
            stride,
            padding,
            argmax: Vec::new(),
        })
    }
}

impl Operation for MaxPool2d {
    fn name(&self) -> &'static str {
        "max_pool2d"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        let d = self.inputs[0].dims();
        let (n, c, h, w) = (d[0], d[1], d[2], d[3]);
        let (kh, kw) = self.kernel;
        let (sh, sw) = self.stride;
        let (ph, pw) = self.padding;
        let h_out = (h + 2 * ph - kh) / sh + 1;
        let w_out = (w + 2 * pw - kw) / sw + 1;
        let x: Vec<f64> = self.inputs[0].array().iter().cloned().collect();

        let mut out = vec![0.0f64; n * c * h_out * w_out];
        self.argmax = vec![0usize; out.len()];
        for ni in 0..n {
            for ci in 0..c {
                for oh in 0..h_out {
                    for ow in 0..w_out {
                        let mut best = f64::NEG_INFINITY;
                        let mut best_at = usize::MAX;
                        for ki in 0..kh {
                            for kj in 0..kw {
                                let ih = (oh * sh + ki) as isize - ph as isize;
                                let iw = (ow * sw + kj) as isize - pw as isize;
                                if ih < 0 || ih >= h as isize || iw < 0 || iw >= w as isize {
                                    continue;
                                }
                                let xi = ((ni * c + ci) * h + ih as usize) * w + iw as usize;
                                // Strict comparison keeps the first-seen tie.
                                if x[xi] > best {
                                    best = x[xi];
                                    best_at = xi;
                                }
                            }
                        }
                        let oi = ((ni * c + ci) * h_out + oh) * w_out + ow;
                        out[oi] = best;
                        self.argmax[oi] = best_at;
                    }
                }
            }
        }
        ArrayD::from_shape_vec(IxDyn(&[n, c, h_out, w_out]), out)
            .map_err(|_| Error::msg("max-pool output shape mismatch"))
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        let input = self.inputs[0].array();
        let g: Vec<f64> = output_grad.iter().cloned().collect();
        let mut grad = vec![0.0f64; input.len()];
        for (oi, &xi) in self.argmax.iter().enumerate() {
            if xi < grad.len() {
                grad[xi] += g[oi];
            }
        }
        let grad = ArrayD::from_shape_vec(IxDyn(input.shape()), grad)
            .map_err(|_| Error::msg("max-pool gradient shape mismatch"))?;
        Ok(vec![grad])
    }
}

/// 2-D average-pooling over the in-bounds part of each window.
#[derive(Debug)]
pub struct AvgPool2d {
    inputs: [Tensor; 1],
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
}

impl AvgPool2d {
    pub fn new(
        input: Tensor,
        kernel: (usize, usize),
        stride: Option<(usize, usize)>,
        padding: (usize, usize),
    ) -> Result<Self> {
        let stride = pool_setup(&input, kernel, stride, padding)?;
        Ok(AvgPool2d {
            inputs: [input],
            kernel,
            stride,
            padding,
        })
    }

    /// Visit every (output position, in-bounds input position, window count).
    fn windows(&self, mut f: impl FnMut(usize, usize, usize)) {
        let d = self.inputs[0].dims();
        let (n, c, h, w) = (d[0], d[1], d[2], d[3]);
        let (kh, kw) = self.kernel;
        let (sh, sw) = self.stride;
        let (ph, pw) = self.padding;
        let h_out = (h + 2 * ph - kh) / sh + 1;
        let w_out = (w + 2 * pw - kw) / sw + 1;

        for ni in 0..n {
            for ci in 0..c {
                for oh in 0..h_out {
                    for ow in 0..w_out {
                        let mut members = Vec::with_capacity(kh * kw);
                        for ki in 0..kh {
                            for kj in 0..kw {
                                let ih = (oh * sh + ki) as isize - ph as isize;
                                let iw = (ow * sw + kj) as isize - pw as isize;
                                if ih < 0 || ih >= h as isize || iw < 0 || iw >= w as isize {
                                    continue;
                                }
                                members
                                    .push(((ni * c + ci) * h + ih as usize) * w + iw as usize);
                            }
                        }
                        let oi = ((ni * c + ci) * h_out + oh) * w_out + ow;
                        for &xi in &members {
                            f(oi, xi, members.len());
                        }
                    }
                }
            }
        }
    }
}

impl Operation for AvgPool2d {
    fn name(&self) -> &'static str {
        "avg_pool2d"
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn forward(&mut self) -> Result<ArrayD<f64>> {
        let d = self.inputs[0].dims();
        let (n, c, h, w) = (d[0], d[1], d[2], d[3]);
        let (kh, kw) = self.kernel;
        let (sh, sw) = self.stride;
        let (ph, pw) = self.padding;
        let h_out = (h + 2 * ph - kh) / sh + 1;
        let w_out = (w + 2 * pw - kw) / sw + 1;
        let x: Vec<f64> = self.inputs[0].array().iter().cloned().collect();

        let mut out = vec![0.0f64; n * c * h_out * w_out];
        self.windows(|oi, xi, count| {
            out[oi] += x[xi] / count as f64;
        });
        ArrayD::from_shape_vec(IxDyn(&[n, c, h_out, w_out]), out)
            .map_err(|_| Error::msg("avg-pool output shape mismatch"))
    }

    fn backward(&self, output_grad: &ArrayD<f64>) -> Result<Vec<ArrayD<f64>>> {
        let input = self.inputs[0].array();
        let g: Vec<f64> = output_grad.iter().cloned().collect();
        let mut grad = vec![0.0f64; input.len()];
        self.windows(|oi, xi, count| {
            grad[xi] += g[oi] / count as f64;
        });
        let grad = ArrayD::from_shape_vec(IxDyn(input.shape()), grad)
            .map_err(|_| Error::msg("avg-pool gradient shape mismatch"))?;
        Ok(vec![grad])
    }
}
