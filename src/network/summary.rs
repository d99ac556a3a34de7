use std::fmt;

use serde::Serialize;

use crate::network::topology::{LayerSpec, NetworkTopology, Shape, TopologyVariant};

/// Resource figures for one parameterized layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub weight_shape: Vec<usize>,
    pub bias_shape: Vec<usize>,
    pub output: Shape,
    pub params: usize,
    /// Multiply-accumulates per inference.
    pub macs: usize,
}

/// Parameter and compute footprint of a topology, the numbers that decide
/// whether a build fits the FPGA's DSP and BRAM budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub variant: TopologyVariant,
    pub layers: Vec<LayerSummary>,
    pub total_params: usize,
    pub total_macs: usize,
}

impl ModelSummary {
    pub fn of(topology: &NetworkTopology) -> ModelSummary {
        let layers: Vec<LayerSummary> = topology
            .layers()
            .iter()
            .zip(topology.shapes())
            .filter_map(|(spec, &output)| {
                let name = spec.param_name()?.to_owned();
                let (weight_shape, bias_shape) = spec.param_shapes()?;
                let params = weight_shape.iter().product::<usize>()
                    + bias_shape.iter().product::<usize>();
                let macs = match (spec, output) {
                    // Every output pixel of every filter reads a full in_c·k·k window.
                    (LayerSpec::Conv { .. }, Shape::Map { height, width, .. }) => {
                        weight_shape.iter().product::<usize>() * height * width
                    }
                    _ => weight_shape.iter().product(),
                };
                Some(LayerSummary { name, weight_shape, bias_shape, output, params, macs })
            })
            .collect();

        ModelSummary {
            variant: topology.variant(),
            total_params: layers.iter().map(|l| l.params).sum(),
            total_macs: layers.iter().map(|l| l.macs).sum(),
            layers,
        }
    }

    /// Size of the float32 weight export in kilobytes.
    pub fn float32_kb(&self) -> f64 {
        (self.total_params * 4) as f64 / 1024.0
    }

    /// Percentage reduction of `self` relative to `baseline`, as
    /// (parameters, MACs).
    pub fn reduction_vs(&self, baseline: &ModelSummary) -> (f64, f64) {
        let pct = |new: usize, old: usize| {
            if old == 0 {
                0.0
            } else {
                (1.0 - new as f64 / old as f64) * 100.0
            }
        };
        (
            pct(self.total_params, baseline.total_params),
            pct(self.total_macs, baseline.total_macs),
        )
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} topology", self.variant)?;
        writeln!(
            f,
            "{:<8} {:<18} {:<10} {:>10} {:>12}",
            "layer", "weights", "output", "params", "MACs"
        )?;
        for l in &self.layers {
            writeln!(
                f,
                "{:<8} {:<18} {:<10} {:>10} {:>12}",
                l.name,
                crate::math::tensor::dims_string(&l.weight_shape),
                l.output.to_string(),
                l.params,
                l.macs
            )?;
        }
        write!(
            f,
            "total: {} params ({:.1} KB float32), {} MACs",
            self.total_params,
            self.float32_kb(),
            self.total_macs
        )
    }
}

/// Side-by-side report of the two hardware builds.
pub fn compare(original: &ModelSummary, optimized: &ModelSummary) -> String {
    let (params, macs) = optimized.reduction_vs(original);
    format!(
        "{}\n\n{}\n\noptimized vs original: {:.1}% fewer parameters, {:.1}% fewer MACs",
        original, optimized, params, macs
    )
}
