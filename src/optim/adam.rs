use crate::math::tensor::Tensor;

/// Adam with bias-corrected first and second moment estimates.
///
/// Moment buffers are created lazily on the first `step`, one pair per
/// parameter tensor, in the order the tensors are passed.
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    step_count: i32,
    first_moments: Vec<Tensor>,
    second_moments: Vec<Tensor>,
}

impl Adam {
    /// Uses the customary defaults: β1 = 0.9, β2 = 0.999, ε = 1e-8.
    pub fn new(learning_rate: f32) -> Adam {
        Adam::with_betas(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Adam {
        Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            step_count: 0,
            first_moments: Vec::new(),
            second_moments: Vec::new(),
        }
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> i32 {
        self.step_count
    }

    /// Applies one update to every parameter tensor from its averaged
    /// gradient. `params` and `grads` must line up one-to-one.
    pub fn step(&mut self, params: Vec<&mut Tensor>, grads: Vec<&Tensor>) {
        assert_eq!(params.len(), grads.len(), "one gradient per parameter tensor");
        if self.first_moments.is_empty() {
            self.first_moments = grads.iter().map(|g| g.zeros_like()).collect();
            self.second_moments = grads.iter().map(|g| g.zeros_like()).collect();
        }

        self.step_count += 1;
        let correction1 = 1.0 - self.beta1.powi(self.step_count);
        let correction2 = 1.0 - self.beta2.powi(self.step_count);

        for (i, (param, grad)) in params.into_iter().zip(grads).enumerate() {
            let m = &mut self.first_moments[i];
            let v = &mut self.second_moments[i];
            for j in 0..param.data.len() {
                let g = grad.data[j];
                m.data[j] = self.beta1 * m.data[j] + (1.0 - self.beta1) * g;
                v.data[j] = self.beta2 * v.data[j] + (1.0 - self.beta2) * g * g;
                let m_hat = m.data[j] / correction1;
                let v_hat = v.data[j] / correction2;
                param.data[j] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate_against_gradient_sign() {
        let mut p = Tensor::from_data(&[3], vec![1.0, 1.0, 1.0]).unwrap();
        let g = Tensor::from_data(&[3], vec![0.5, -20.0, 0.0]).unwrap();
        let mut adam = Adam::new(0.01);
        adam.step(vec![&mut p], vec![&g]);
        assert!((p.data[0] - 0.99).abs() < 1e-5);
        assert!((p.data[1] - 1.01).abs() < 1e-5);
        assert_eq!(p.data[2], 1.0);
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn minimizes_a_quadratic() {
        // f(x) = (x - 3)^2
        let mut x = Tensor::from_data(&[1], vec![0.0]).unwrap();
        let mut adam = Adam::new(0.1);
        for _ in 0..500 {
            let g = Tensor::from_data(&[1], vec![2.0 * (x.data[0] - 3.0)]).unwrap();
            adam.step(vec![&mut x], vec![&g]);
        }
        assert!((x.data[0] - 3.0).abs() < 0.05, "x = {}", x.data[0]);
    }
}
