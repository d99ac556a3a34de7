use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::ops::AddAssign;

use crate::error::{Error, Result};

/// Dense row-major `f32` tensor. `data[i]` is addressed by the usual
/// last-axis-fastest rule, so a `[c, h, w]` feature map stores channel 0's
/// rows first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Tensor {
        Tensor {
            shape: shape.to_vec(),
            data: vec![0.0; shape.iter().product()],
        }
    }

    /// Wraps `data` as a tensor of `shape`, rejecting a length that does not
    /// equal the product of the dimensions.
    pub fn from_data(shape: &[usize], data: Vec<f32>) -> Result<Tensor> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Error::shape(
                format!("tensor {}", dims_string(shape)),
                format!("{} elements", expected),
                format!("{} elements", data.len()),
            ));
        }
        Ok(Tensor {
            shape: shape.to_vec(),
            data,
        })
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
        // Both uniforms on (0, 1] to avoid log(0).
        let u1: f32 = 1.0 - rng.gen::<f32>();
        let u2: f32 = 1.0 - rng.gen::<f32>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// He initialization: samples from N(0, sqrt(2 / fan_in)).
    ///
    /// Every weight tensor in this crate feeds a ReLU (or the logits), so this
    /// is the only initializer needed.
    pub fn he<R: Rng + ?Sized>(shape: &[usize], fan_in: usize, rng: &mut R) -> Tensor {
        let std_dev = (2.0 / fan_in as f32).sqrt();
        let mut res = Tensor::zeros(shape);
        for v in res.data.iter_mut() {
            *v = Tensor::sample_standard_normal(rng) * std_dev;
        }
        res
    }

    pub fn zeros_like(&self) -> Tensor {
        Tensor::zeros(&self.shape)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of bytes this tensor occupies as packed float32.
    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    pub fn map<F>(&self, functor: F) -> Tensor
    where
        F: Fn(f32) -> f32,
    {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for v in self.data.iter_mut() {
            *v *= factor;
        }
    }

    /// Reinterprets the same elements under a new shape of equal size.
    pub fn reshaped(self, shape: &[usize]) -> Result<Tensor> {
        Tensor::from_data(shape, self.data)
    }

    /// Tuple-style rendering of the shape, e.g. `(16, 1, 3, 3)` or `(16,)`.
    pub fn dims(&self) -> String {
        dims_string(&self.shape)
    }
}

impl Default for Tensor {
    fn default() -> Self {
        Tensor {
            shape: vec![0],
            data: vec![],
        }
    }
}

impl AddAssign<&Tensor> for Tensor {
    fn add_assign(&mut self, rhs: &Tensor) {
        if self.shape != rhs.shape {
            panic!(
                "Tensors are of incorrect sizes: {} vs {}",
                self.dims(),
                rhs.dims()
            )
        }
        for (a, b) in self.data.iter_mut().zip(rhs.data.iter()) {
            *a += b;
        }
    }
}

pub fn dims_string(shape: &[usize]) -> String {
    match shape {
        [single] => format!("({},)", single),
        dims => format!(
            "({})",
            dims.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn from_data_rejects_wrong_length() {
        assert!(Tensor::from_data(&[2, 3], vec![0.0; 6]).is_ok());
        let err = Tensor::from_data(&[2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn dims_render_as_tuples() {
        assert_eq!(Tensor::zeros(&[16, 1, 3, 3]).dims(), "(16, 1, 3, 3)");
        assert_eq!(Tensor::zeros(&[10]).dims(), "(10,)");
    }

    #[test]
    fn he_init_is_seeded_and_scaled() {
        let a = Tensor::he(&[64, 32], 32, &mut StdRng::seed_from_u64(7));
        let b = Tensor::he(&[64, 32], 32, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);

        let mean = a.data.iter().sum::<f32>() / a.len() as f32;
        let var = a.data.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / a.len() as f32;
        // Target variance is 2 / 32 = 0.0625.
        assert!((var - 0.0625).abs() < 0.02, "variance {}", var);
    }

    #[test]
    fn add_assign_accumulates() {
        let mut acc = Tensor::zeros(&[3]);
        let g = Tensor::from_data(&[3], vec![1.0, -2.0, 0.5]).unwrap();
        acc += &g;
        acc += &g;
        assert_eq!(acc.data, vec![2.0, -4.0, 1.0]);
    }
}
