use std::collections::BTreeMap;

use crate::network::topology::NetworkTopology;

/// Which file each exported tensor is written to, keyed by tensor name
/// (`conv1_weights`, `fc2_bias`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WeightFileMap {
    files: BTreeMap<String, String>,
}

pub fn weights_tensor(layer: &str) -> String {
    format!("{}_weights", layer)
}

pub fn bias_tensor(layer: &str) -> String {
    format!("{}_bias", layer)
}

impl WeightFileMap {
    /// The file names the hardware testbench loads: `<tensor>.bin` for every
    /// weight and bias tensor of `topology`.
    pub fn hardware_default(topology: &NetworkTopology) -> WeightFileMap {
        let mut map = WeightFileMap::default();
        for layer in topology.param_layers() {
            for tensor in [weights_tensor(&layer.name), bias_tensor(&layer.name)] {
                let file = format!("{}.bin", tensor);
                map.files.insert(tensor, file);
            }
        }
        map
    }

    pub fn insert(&mut self, tensor: impl Into<String>, file: impl Into<String>) {
        self.files.insert(tensor.into(), file.into());
    }

    pub fn remove(&mut self, tensor: &str) -> Option<String> {
        self.files.remove(tensor)
    }

    pub fn file_for(&self, tensor: &str) -> Option<&str> {
        self.files.get(tensor).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_map_covers_every_tensor() {
        let map = WeightFileMap::hardware_default(&NetworkTopology::original());
        assert_eq!(map.len(), 8);
        assert_eq!(map.file_for("conv1_weights"), Some("conv1_weights.bin"));
        assert_eq!(map.file_for("fc2_bias"), Some("fc2_bias.bin"));
        assert_eq!(map.file_for("fc3_bias"), None);
    }
}
