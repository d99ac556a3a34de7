/// Hyperparameters for a `train` run.
///
/// # Fields
/// - `epochs`        : full passes over the training set
/// - `batch_size`    : samples per Adam update; the last batch may be short
/// - `learning_rate` : Adam step size
/// - `seed`          : drives the per-epoch shuffle; one seed, one result
/// - `beta1`, `beta2`, `epsilon` : Adam moment decay rates and denominator guard
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub seed: u64,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            epochs: 10,
            batch_size: 64,
            learning_rate: 0.001,
            seed: 42,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl TrainConfig {
    /// Default Adam settings with the given schedule.
    pub fn new(epochs: usize, batch_size: usize, learning_rate: f32, seed: u64) -> Self {
        TrainConfig {
            epochs,
            batch_size,
            learning_rate,
            seed,
            ..TrainConfig::default()
        }
    }
}
