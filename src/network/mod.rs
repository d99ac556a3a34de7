pub mod network;
pub mod params;
pub mod quant;
pub mod summary;
pub mod topology;

pub use network::{Checkpoint, ForwardTrace, Network};
pub use params::{Gradients, LayerParams, ParameterSet};
pub use quant::{FixedPoint, HardwareNumerics};
pub use summary::{compare, LayerSummary, ModelSummary};
pub use topology::{LayerSpec, NetworkTopology, ParamLayer, Shape, TopologyVariant};
