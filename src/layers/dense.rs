use rand::Rng;

use crate::math::tensor::Tensor;
use crate::network::quant::HardwareNumerics;

/// Fully-connected stage. `weights` is `[out_features, in_features]`, the
/// layout the engine indexes as `weights[o][i]`.
#[derive(Debug, Clone)]
pub struct Dense {
    pub name: String,
    pub in_features: usize,
    pub out_features: usize,
    pub weights: Tensor,
    pub bias: Tensor,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(
        name: &str,
        in_features: usize,
        out_features: usize,
        rng: &mut R,
    ) -> Dense {
        Dense {
            name: name.to_owned(),
            in_features,
            out_features,
            weights: Tensor::he(&[out_features, in_features], in_features, rng),
            bias: Tensor::zeros(&[out_features]),
        }
    }

    /// y = W x + b
    pub fn forward(&self, input: &Tensor) -> Tensor {
        let data = (0..self.out_features)
            .map(|o| {
                let row = &self.weights.data[o * self.in_features..(o + 1) * self.in_features];
                let sum: f64 = row
                    .iter()
                    .zip(input.data.iter())
                    .map(|(&w, &x)| w as f64 * x as f64)
                    .sum();
                (sum + self.bias.data[o] as f64) as f32
            })
            .collect();
        Tensor {
            shape: vec![self.out_features],
            data,
        }
    }

    /// Fixed-point forward pass returning accumulator-format sums; see
    /// `Conv2d::forward_acc`.
    pub fn forward_acc(
        &self,
        input: &Tensor,
        numerics: &HardwareNumerics,
    ) -> (Vec<usize>, Vec<f64>) {
        let weights = numerics.weight.quantize_slice(&self.weights.data);
        let bias = numerics.weight.quantize_slice(&self.bias.data);
        let sums = (0..self.out_features)
            .map(|o| {
                let row = &weights[o * self.in_features..(o + 1) * self.in_features];
                let sum: f64 = row
                    .iter()
                    .zip(input.data.iter())
                    .map(|(&w, &x)| w * x as f64)
                    .sum();
                numerics.acc.quantize(bias[o] + sum)
            })
            .collect();
        (vec![self.out_features], sums)
    }

    /// Computes gradients for one sample. Returns
    /// `(grad_input, grad_weights, grad_bias)`; `grad_output` is ∂L/∂y.
    pub fn backward(&self, input: &Tensor, grad_output: &Tensor) -> (Tensor, Tensor, Tensor) {
        let mut grad_input = input.zeros_like();
        let mut grad_weights = self.weights.zeros_like();
        let grad_bias = grad_output.clone();

        for (o, &g) in grad_output.data.iter().enumerate() {
            if g == 0.0 {
                continue;
            }
            let base = o * self.in_features;
            for i in 0..self.in_features {
                grad_weights.data[base + i] = g * input.data[i];
                grad_input.data[i] += g * self.weights.data[base + i];
            }
        }

        (grad_input, grad_weights, grad_bias)
    }
}
