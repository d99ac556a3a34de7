use crate::math::tensor::Tensor;

/// Max pooling over `size×size` windows. Output dimensions use floor
/// division like the hardware engine, so an odd trailing row or column is
/// never visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxPool2d {
    pub size: usize,
    pub stride: usize,
}

impl MaxPool2d {
    pub fn new(size: usize, stride: usize) -> MaxPool2d {
        MaxPool2d { size, stride }
    }

    fn output_size(&self, height: usize, width: usize) -> (usize, usize) {
        (
            (height - self.size) / self.stride + 1,
            (width - self.size) / self.stride + 1,
        )
    }

    /// Returns the pooled map together with, for every output element, the
    /// flat input index of the winning element (needed to route gradients).
    /// Ties keep the first element in row-major window order, matching the
    /// engine's strict `>` comparison.
    pub fn forward(&self, input: &Tensor) -> (Tensor, Vec<usize>) {
        let (channels, height, width) = (input.shape[0], input.shape[1], input.shape[2]);
        let (out_h, out_w) = self.output_size(height, width);
        let mut out = Vec::with_capacity(channels * out_h * out_w);
        let mut argmax = Vec::with_capacity(channels * out_h * out_w);

        for c in 0..channels {
            let base = c * height * width;
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let first = base + (oh * self.stride) * width + ow * self.stride;
                    let mut best = input.data[first];
                    let mut best_idx = first;
                    for ph in 0..self.size {
                        for pw in 0..self.size {
                            let row = oh * self.stride + ph;
                            let idx = base + row * width + ow * self.stride + pw;
                            if input.data[idx] > best {
                                best = input.data[idx];
                                best_idx = idx;
                            }
                        }
                    }
                    out.push(best);
                    argmax.push(best_idx);
                }
            }
        }

        (
            Tensor {
                shape: vec![channels, out_h, out_w],
                data: out,
            },
            argmax,
        )
    }

    /// Scatters each output gradient back onto the input element that won
    /// its window.
    pub fn backward(
        &self,
        input_shape: &[usize],
        argmax: &[usize],
        grad_output: &Tensor,
    ) -> Tensor {
        let mut grad_input = Tensor::zeros(input_shape);
        for (&idx, &g) in argmax.iter().zip(grad_output.data.iter()) {
            grad_input.data[idx] += g;
        }
        grad_input
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_input_is_floored() {
        let pool = MaxPool2d::new(2, 2);
        let (out, argmax) = pool.forward(&Tensor::zeros(&[32, 11, 11]));
        assert_eq!(out.shape, vec![32, 5, 5]);
        assert_eq!(argmax.len(), 32 * 25);
    }

    #[test]
    fn picks_window_maximum_and_routes_gradient() {
        let pool = MaxPool2d::new(2, 2);
        let input = Tensor::from_data(
            &[1, 4, 4],
            vec![
                1.0, 3.0, 0.0, 0.0, //
                2.0, 0.5, 0.0, 9.0, //
                -1.0, -2.0, 4.0, 4.0, //
                -3.0, -0.5, 4.0, 1.0,
            ],
        )
        .unwrap();
        let (out, argmax) = pool.forward(&input);
        assert_eq!(out.data, vec![3.0, 9.0, -0.5, 4.0]);
        // Tie on 4.0 keeps the first element of the window.
        assert_eq!(argmax, vec![1, 7, 13, 10]);

        let grad = Tensor::from_data(&[1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let back = pool.backward(&input.shape, &argmax, &grad);
        assert_eq!(back.data[1], 1.0);
        assert_eq!(back.data[7], 2.0);
        assert_eq!(back.data[13], 3.0);
        assert_eq!(back.data[10], 4.0);
        assert_eq!(back.data.iter().sum::<f32>(), 10.0);
    }
}
