use rand::Rng;

use crate::math::tensor::Tensor;
use crate::network::quant::HardwareNumerics;

/// Valid (unpadded) 2-D convolution over a `[in_channels, h, w]` feature map.
///
/// `weights` is `[out_channels, in_channels, kernel, kernel]` and `bias` is
/// `[out_channels]`; this is also the exported memory layout.
#[derive(Debug, Clone)]
pub struct Conv2d {
    pub name: String,
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub weights: Tensor,
    pub bias: Tensor,
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(
        name: &str,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        rng: &mut R,
    ) -> Conv2d {
        let fan_in = in_channels * kernel * kernel;
        Conv2d {
            name: name.to_owned(),
            in_channels,
            out_channels,
            kernel,
            stride,
            weights: Tensor::he(&[out_channels, in_channels, kernel, kernel], fan_in, rng),
            bias: Tensor::zeros(&[out_channels]),
        }
    }

    fn output_size(&self, height: usize, width: usize) -> (usize, usize) {
        (
            (height - self.kernel) / self.stride + 1,
            (width - self.kernel) / self.stride + 1,
        )
    }

    /// Shared multiply-accumulate loop. Sums are carried in `f64`, which holds
    /// every product of two 16-bit fixed-point values exactly.
    fn convolve(
        &self,
        input: &[f64],
        weights: &[f64],
        bias: &[f64],
        height: usize,
        width: usize,
    ) -> Vec<f64> {
        let (out_h, out_w) = self.output_size(height, width);
        let k = self.kernel;
        let mut out = Vec::with_capacity(self.out_channels * out_h * out_w);

        for oc in 0..self.out_channels {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut sum = bias[oc];
                    for ic in 0..self.in_channels {
                        let in_base = ic * height * width;
                        let w_base = (oc * self.in_channels + ic) * k * k;
                        for kh in 0..k {
                            let row = in_base + (oh * self.stride + kh) * width + ow * self.stride;
                            let w_row = w_base + kh * k;
                            for kw in 0..k {
                                sum += input[row + kw] * weights[w_row + kw];
                            }
                        }
                    }
                    out.push(sum);
                }
            }
        }
        out
    }

    /// Float32 forward pass used for training and evaluation.
    pub fn forward(&self, input: &Tensor) -> Tensor {
        let (height, width) = (input.shape[1], input.shape[2]);
        let (out_h, out_w) = self.output_size(height, width);
        let sums = self.convolve(
            &widen(&input.data),
            &widen(&self.weights.data),
            &widen(&self.bias.data),
            height,
            width,
        );
        Tensor {
            shape: vec![self.out_channels, out_h, out_w],
            data: sums.into_iter().map(|s| s as f32).collect(),
        }
    }

    /// Fixed-point forward pass. `input` must already hold data-format
    /// values. Returns the output shape and the sums in the accumulator
    /// format; the caller applies the activation and the cast back to the
    /// data format, as the engine does.
    pub fn forward_acc(
        &self,
        input: &Tensor,
        numerics: &HardwareNumerics,
    ) -> (Vec<usize>, Vec<f64>) {
        let (height, width) = (input.shape[1], input.shape[2]);
        let (out_h, out_w) = self.output_size(height, width);
        let sums = self.convolve(
            &widen(&input.data),
            &numerics.weight.quantize_slice(&self.weights.data),
            &numerics.weight.quantize_slice(&self.bias.data),
            height,
            width,
        );
        (
            vec![self.out_channels, out_h, out_w],
            sums.into_iter().map(|s| numerics.acc.quantize(s)).collect(),
        )
    }

    /// Returns `(grad_input, grad_weights, grad_bias)` for one sample, given
    /// the layer input and the gradient with respect to the layer output.
    pub fn backward(&self, input: &Tensor, grad_output: &Tensor) -> (Tensor, Tensor, Tensor) {
        let (height, width) = (input.shape[1], input.shape[2]);
        let (out_h, out_w) = self.output_size(height, width);
        let k = self.kernel;

        let mut grad_input = input.zeros_like();
        let mut grad_weights = self.weights.zeros_like();
        let mut grad_bias = self.bias.zeros_like();

        for oc in 0..self.out_channels {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let g = grad_output.data[(oc * out_h + oh) * out_w + ow];
                    if g == 0.0 {
                        continue;
                    }
                    grad_bias.data[oc] += g;
                    for ic in 0..self.in_channels {
                        let in_base = ic * height * width;
                        let w_base = (oc * self.in_channels + ic) * k * k;
                        for kh in 0..k {
                            let row = in_base + (oh * self.stride + kh) * width + ow * self.stride;
                            let w_row = w_base + kh * k;
                            for kw in 0..k {
                                grad_weights.data[w_row + kw] += g * input.data[row + kw];
                                grad_input.data[row + kw] += g * self.weights.data[w_row + kw];
                            }
                        }
                    }
                }
            }
        }

        (grad_input, grad_weights, grad_bias)
    }
}

fn widen(values: &[f32]) -> Vec<f64> {
    values.iter().map(|&v| v as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn ramp(shape: &[usize], step: f32) -> Tensor {
        let n: usize = shape.iter().product();
        Tensor::from_data(shape, (0..n).map(|i| (i % 7) as f32 * step - 0.2).collect()).unwrap()
    }

    #[test]
    fn output_shape_drops_kernel_minus_one() {
        let conv = Conv2d::new("c", 1, 16, 3, 1, &mut StdRng::seed_from_u64(1));
        let out = conv.forward(&Tensor::zeros(&[1, 28, 28]));
        assert_eq!(out.shape, vec![16, 26, 26]);
    }

    #[test]
    fn forward_matches_hand_computed_window() {
        let mut conv = Conv2d::new("c", 1, 1, 2, 1, &mut StdRng::seed_from_u64(1));
        conv.weights = Tensor::from_data(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        conv.bias = Tensor::from_data(&[1], vec![0.5]).unwrap();
        let input = Tensor::from_data(&[1, 3, 3], (1..=9).map(|v| v as f32).collect()).unwrap();

        let out = conv.forward(&input);
        // Top-left window: 1*1 + 2*2 + 4*3 + 5*4 + 0.5
        assert_eq!(out.shape, vec![1, 2, 2]);
        assert_eq!(out.data, vec![37.5, 47.5, 67.5, 77.5]);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(3);
        let conv = Conv2d::new("c", 2, 3, 3, 1, &mut rng);
        let input = ramp(&[2, 5, 5], 0.1);
        let upstream = ramp(&[3, 3, 3], 0.05);

        // L = sum(out * upstream) is linear in every parameter, so a central
        // difference recovers the gradient up to rounding.
        let objective = |c: &Conv2d, x: &Tensor| -> f32 {
            c.forward(x).data.iter().zip(&upstream.data).map(|(a, b)| a * b).sum()
        };
        let (grad_input, grad_weights, grad_bias) = conv.backward(&input, &upstream);
        let eps = 1e-2;

        for idx in [0, 7, 20, 53] {
            let mut plus = conv.clone();
            plus.weights.data[idx] += eps;
            let mut minus = conv.clone();
            minus.weights.data[idx] -= eps;
            let numeric = (objective(&plus, &input) - objective(&minus, &input)) / (2.0 * eps);
            assert!((numeric - grad_weights.data[idx]).abs() < 1e-2, "weight {}", idx);
        }
        for idx in 0..3 {
            let mut plus = conv.clone();
            plus.bias.data[idx] += eps;
            let mut minus = conv.clone();
            minus.bias.data[idx] -= eps;
            let numeric = (objective(&plus, &input) - objective(&minus, &input)) / (2.0 * eps);
            assert!((numeric - grad_bias.data[idx]).abs() < 1e-2, "bias {}", idx);
        }
        for idx in [0, 12, 31, 49] {
            let mut plus = input.clone();
            plus.data[idx] += eps;
            let mut minus = input.clone();
            minus.data[idx] -= eps;
            let numeric = (objective(&conv, &plus) - objective(&conv, &minus)) / (2.0 * eps);
            assert!((numeric - grad_input.data[idx]).abs() < 1e-2, "input {}", idx);
        }
    }
}
