/// Categorical cross-entropy over raw logits.
///
/// The network's last stage emits unnormalized logits (the engine has no
/// softmax), so the softmax lives here and is fused with the loss.
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// Scalar loss: -log(softmax(logits)[target]), computed with the
    /// log-sum-exp shift for stability.
    pub fn loss(logits: &[f32], target: usize) -> f32 {
        let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;
        let log_sum: f64 = logits.iter().map(|&z| (z as f64 - max).exp()).sum::<f64>().ln() + max;
        (log_sum - logits[target] as f64) as f32
    }

    /// Gradient with respect to the logits:
    ///   ∂L/∂z_i = softmax(z)_i - [i == target]
    pub fn derivative(logits: &[f32], target: usize) -> Vec<f32> {
        let mut grad = softmax(logits);
        grad[target] -= 1.0;
        grad
    }
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = logits.iter().map(|&z| ((z - max) as f64).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| (e / total) as f32).collect()
}

/// Index of the largest logit; the first one wins ties.
pub fn argmax(v: &[f32]) -> usize {
    let mut best = 0;
    for (i, &x) in v.iter().enumerate() {
        if x > v[best] {
            best = i;
        }
    }
    best
}
