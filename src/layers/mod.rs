pub mod conv;
pub mod dense;
pub mod pool;

pub use conv::Conv2d;
pub use dense::Dense;
pub use pool::MaxPool2d;

use crate::activation::ActivationFunction;

/// Runtime counterpart of one `LayerSpec`: the parameterized layers own
/// their weights, the others are stateless.
#[derive(Debug, Clone)]
pub enum Layer {
    Conv(Conv2d),
    Activation(ActivationFunction),
    MaxPool(MaxPool2d),
    Flatten,
    Dense(Dense),
}
