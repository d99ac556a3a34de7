pub mod activation;
pub mod dataset;
pub mod error;
pub mod export;
mod files;
pub mod layers;
pub mod loss;
pub mod math;
pub mod network;
pub mod optim;
pub mod train;

// Convenience re-exports
pub use dataset::RawDataset;
pub use error::{Error, Result};
pub use export::{export_weights, import_weights, WeightFileMap};
pub use math::tensor::Tensor;
pub use network::{
    Checkpoint, HardwareNumerics, ModelSummary, Network, NetworkTopology, ParameterSet,
    TopologyVariant,
};
pub use optim::Adam;
pub use train::{evaluate, train, TrainConfig, TrainReport};
