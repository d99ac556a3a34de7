use serde::{Deserialize, Serialize};

/// Statistics for one completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    pub total_epochs: usize,
    /// Mean cross-entropy over the training samples, measured during the
    /// pass (each batch before its update).
    pub train_loss: f64,
    /// Fraction in [0, 1], measured the same way as `train_loss`.
    pub train_accuracy: f64,
    /// Mean cross-entropy on the held-out set after the epoch's last update.
    pub eval_loss: f64,
    pub eval_accuracy: f64,
    /// Whether this epoch's parameters replaced the best checkpoint.
    pub captured: bool,
    /// Wall-clock duration of the epoch in milliseconds.
    pub elapsed_ms: u64,
}
