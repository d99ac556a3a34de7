pub mod epoch_stats;
pub mod hardware_eval;
pub mod loop_fn;
pub mod train_config;

pub use epoch_stats::EpochStats;
pub use hardware_eval::{evaluate_hardware, HardwareEvaluation};
pub use loop_fn::{evaluate, run_epoch, train, Evaluation, TrainReport, TrainState};
pub use train_config::TrainConfig;
