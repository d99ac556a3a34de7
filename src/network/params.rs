use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::math::tensor::Tensor;
use crate::network::topology::NetworkTopology;

/// Weight and bias of one convolution or fully-connected layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerParams {
    pub name: String,
    pub weights: Tensor,
    pub bias: Tensor,
}

/// Every trainable tensor of a network, in forward order.
///
/// The same structure carries gradients during training, where each tensor
/// holds ∂L/∂parameter instead of the parameter itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParameterSet {
    pub layers: Vec<LayerParams>,
}

pub type Gradients = ParameterSet;

impl ParameterSet {
    /// A zero-filled set with the shapes `topology` declares.
    pub fn zeros(topology: &NetworkTopology) -> ParameterSet {
        ParameterSet {
            layers: topology
                .param_layers()
                .into_iter()
                .map(|p| LayerParams {
                    name: p.name,
                    weights: Tensor::zeros(&p.weight_shape),
                    bias: Tensor::zeros(&p.bias_shape),
                })
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&LayerParams> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Total number of scalar parameters.
    pub fn count(&self) -> usize {
        self.layers.iter().map(|l| l.weights.len() + l.bias.len()).sum()
    }

    /// Element-wise `self += other`. Both sets must come from the same
    /// topology.
    pub fn accumulate(&mut self, other: &ParameterSet) {
        for (a, b) in self.layers.iter_mut().zip(other.layers.iter()) {
            a.weights += &b.weights;
            a.bias += &b.bias;
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for l in self.layers.iter_mut() {
            l.weights.scale(factor);
            l.bias.scale(factor);
        }
    }

    /// All tensors flattened as weight, bias, weight, bias, ...
    pub fn tensors(&self) -> Vec<&Tensor> {
        self.layers.iter().flat_map(|l| [&l.weights, &l.bias]).collect()
    }

    /// Checks that every layer `topology` declares is present with the
    /// declared shapes, and that nothing else is.
    pub fn validate(&self, topology: &NetworkTopology) -> Result<()> {
        let expected = topology.param_layers();
        if self.layers.len() != expected.len() {
            return Err(Error::shape(
                format!("{} parameter set", topology.variant()),
                format!("{} layers", expected.len()),
                format!("{} layers", self.layers.len()),
            ));
        }
        for p in &expected {
            let layer = self.get(&p.name).ok_or_else(|| {
                let context = format!("{} parameter set", topology.variant());
                Error::shape(context, &p.name, "no such layer")
            })?;
            if layer.weights.shape != p.weight_shape {
                return Err(Error::shape(
                    format!("{}_weights", p.name),
                    layer_dims(&p.weight_shape),
                    layer.weights.dims(),
                ));
            }
            if layer.bias.shape != p.bias_shape {
                return Err(Error::shape(
                    format!("{}_bias", p.name),
                    layer_dims(&p.bias_shape),
                    layer.bias.dims(),
                ));
            }
        }
        Ok(())
    }
}

fn layer_dims(shape: &[usize]) -> String {
    crate::math::tensor::dims_string(shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_follow_topology() {
        let set = ParameterSet::zeros(&NetworkTopology::optimized());
        assert_eq!(set.layers.len(), 4);
        // 4*1*5*5+4 + 8*4*5*5+8 + 64*128+64 + 10*64+10
        assert_eq!(set.count(), 104 + 808 + 8256 + 650);
        assert!(set.validate(&NetworkTopology::optimized()).is_ok());
        assert!(set.validate(&NetworkTopology::original()).is_err());
    }

    #[test]
    fn validate_names_the_offending_tensor() {
        let topology = NetworkTopology::original();
        let mut set = ParameterSet::zeros(&topology);
        set.layers[2].bias = Tensor::zeros(&[127]);
        let err = set.validate(&topology).unwrap_err().to_string();
        assert!(err.contains("fc1_bias"), "{}", err);
    }

    #[test]
    fn accumulate_and_scale() {
        let topology = NetworkTopology::optimized();
        let mut acc = ParameterSet::zeros(&topology);
        let mut g = ParameterSet::zeros(&topology);
        g.layers[0].weights.data[0] = 2.0;
        acc.accumulate(&g);
        acc.accumulate(&g);
        acc.scale(0.5);
        assert_eq!(acc.layers[0].weights.data[0], 2.0);
        assert_eq!(acc.tensors().len(), 8);
    }
}
