use serde::{Deserialize, Serialize};
use std::fmt;

use crate::activation::ActivationFunction;
use crate::error::{Error, Result};

/// Which of the two published hardware builds a topology describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyVariant {
    /// Reference build: 16/32 channels with 3×3 kernels, 128-wide hidden layer.
    Original,
    /// Resource-constrained build: 4/8 channels with 5×5 kernels, 64-wide hidden layer.
    Optimized,
}

impl fmt::Display for TopologyVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyVariant::Original => write!(f, "original"),
            TopologyVariant::Optimized => write!(f, "optimized"),
        }
    }
}

impl std::str::FromStr for TopologyVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" => Ok(TopologyVariant::Original),
            "optimized" => Ok(TopologyVariant::Optimized),
            other => Err(format!(
                "unknown topology '{}', expected 'original' or 'optimized'",
                other
            )),
        }
    }
}

/// Shape of the activation flowing between two layers of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    Map { channels: usize, height: usize, width: usize },
    Vector { len: usize },
}

impl Shape {
    pub fn numel(&self) -> usize {
        match *self {
            Shape::Map { channels, height, width } => channels * height * width,
            Shape::Vector { len } => len,
        }
    }

    pub fn dims(&self) -> Vec<usize> {
        match *self {
            Shape::Map { channels, height, width } => vec![channels, height, width],
            Shape::Vector { len } => vec![len],
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Map { channels, height, width } => {
                write!(f, "{}x{}x{}", channels, height, width)
            }
            Shape::Vector { len } => write!(f, "{}", len),
        }
    }
}

/// Describes one layer of a topology. Padding is always zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv {
        name: String,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
    },
    Activation { function: ActivationFunction },
    MaxPool { size: usize, stride: usize },
    Flatten,
    Dense {
        name: String,
        in_features: usize,
        out_features: usize,
    },
}

impl LayerSpec {
    fn describe(&self) -> String {
        match self {
            LayerSpec::Conv { name, .. } => name.clone(),
            LayerSpec::Activation { function } => format!("{:?}", function),
            LayerSpec::MaxPool { size, .. } => format!("max_pool{}", size),
            LayerSpec::Flatten => "flatten".to_owned(),
            LayerSpec::Dense { name, .. } => name.clone(),
        }
    }

    /// Applies this layer's shape transform, rejecting anything that would
    /// not line up exactly with the declared dimensions.
    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        let ctx = || format!("layer {}", self.describe());
        match (self, input) {
            (
                LayerSpec::Conv { in_channels, out_channels, kernel, stride, .. },
                Shape::Map { channels, height, width },
            ) => {
                if channels != *in_channels {
                    return Err(Error::shape(
                        ctx(),
                        format!("{} input channels", in_channels),
                        channels,
                    ));
                }
                if *kernel == 0 || *stride == 0 || *out_channels == 0 {
                    return Err(Error::shape(ctx(), "non-zero kernel, stride and channels", "zero"));
                }
                let out_h = window_output(height, *kernel, *stride, true).ok_or_else(|| {
                    let expected = format!("height fitting a {}/{} window", kernel, stride);
                    Error::shape(ctx(), expected, height)
                })?;
                let out_w = window_output(width, *kernel, *stride, true).ok_or_else(|| {
                    let expected = format!("width fitting a {}/{} window", kernel, stride);
                    Error::shape(ctx(), expected, width)
                })?;
                Ok(Shape::Map { channels: *out_channels, height: out_h, width: out_w })
            }
            (LayerSpec::MaxPool { size, stride }, Shape::Map { channels, height, width }) => {
                if *size == 0 || *stride == 0 {
                    return Err(Error::shape(ctx(), "non-zero pool window", "zero"));
                }
                let out_h = window_output(height, *size, *stride, false)
                    .ok_or_else(|| Error::shape(ctx(), format!("height >= {}", size), height))?;
                let out_w = window_output(width, *size, *stride, false)
                    .ok_or_else(|| Error::shape(ctx(), format!("width >= {}", size), width))?;
                Ok(Shape::Map { channels, height: out_h, width: out_w })
            }
            (LayerSpec::Activation { .. }, shape) => Ok(shape),
            (LayerSpec::Flatten, shape @ Shape::Map { .. }) => {
                Ok(Shape::Vector { len: shape.numel() })
            }
            (LayerSpec::Dense { in_features, out_features, .. }, Shape::Vector { len }) => {
                if len != *in_features {
                    return Err(Error::shape(ctx(), format!("{} input features", in_features), len));
                }
                if *out_features == 0 {
                    return Err(Error::shape(ctx(), "non-zero output features", 0));
                }
                Ok(Shape::Vector { len: *out_features })
            }
            (_, shape) => Err(Error::shape(ctx(), "a compatible input kind", shape)),
        }
    }

    /// Logical name of a parameterized layer (`conv1`, `fc2`, ...).
    pub fn param_name(&self) -> Option<&str> {
        match self {
            LayerSpec::Conv { name, .. } | LayerSpec::Dense { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Weight and bias shapes of a parameterized layer.
    pub fn param_shapes(&self) -> Option<(Vec<usize>, Vec<usize>)> {
        match *self {
            LayerSpec::Conv { in_channels, out_channels, kernel, .. } => Some((
                vec![out_channels, in_channels, kernel, kernel],
                vec![out_channels],
            )),
            LayerSpec::Dense { in_features, out_features, .. } => {
                Some((vec![out_features, in_features], vec![out_features]))
            }
            _ => None,
        }
    }
}

/// Output length of a sliding window. With `exact` set, a stride that would
/// leave unvisited trailing samples is rejected instead of floored.
fn window_output(len: usize, window: usize, stride: usize, exact: bool) -> Option<usize> {
    if window > len {
        return None;
    }
    let span = len - window;
    if exact && span % stride != 0 {
        return None;
    }
    Some(span / stride + 1)
}

/// A parameterized layer as seen by the exporter and the optimizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLayer {
    pub name: String,
    pub weight_shape: Vec<usize>,
    pub bias_shape: Vec<usize>,
}

/// Ordered, shape-checked list of layers. Both hardware builds are instances
/// of this one type; only their constant tables differ.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkTopology {
    variant: TopologyVariant,
    input: Shape,
    layers: Vec<LayerSpec>,
    shapes: Vec<Shape>,
}

/// Size constants that distinguish the two hardware builds.
struct SizeTable {
    conv1_out: usize,
    conv1_kernel: usize,
    conv2_out: usize,
    conv2_kernel: usize,
    fc1_in: usize,
    fc1_out: usize,
}

const INPUT_CHANNELS: usize = 1;
const INPUT_SIZE: usize = 28;
const POOL_SIZE: usize = 2;
const NUM_CLASSES: usize = 10;

const ORIGINAL: SizeTable = SizeTable {
    conv1_out: 16,
    conv1_kernel: 3,
    conv2_out: 32,
    conv2_kernel: 3,
    fc1_in: 32 * 5 * 5,
    fc1_out: 128,
};

const OPTIMIZED: SizeTable = SizeTable {
    conv1_out: 4,
    conv1_kernel: 5,
    conv2_out: 8,
    conv2_kernel: 5,
    fc1_in: 8 * 4 * 4,
    fc1_out: 64,
};

impl NetworkTopology {
    /// Chains every layer's shape transform starting from `input`; any
    /// disagreement fails construction.
    pub fn new(
        variant: TopologyVariant,
        input: Shape,
        layers: Vec<LayerSpec>,
    ) -> Result<NetworkTopology> {
        let mut shapes = Vec::with_capacity(layers.len());
        let mut current = input;
        for layer in &layers {
            current = layer.output_shape(current)?;
            shapes.push(current);
        }
        if !matches!(current, Shape::Vector { .. }) {
            return Err(Error::shape("topology output", "a logits vector", current));
        }

        let mut seen = std::collections::HashSet::new();
        for name in layers.iter().filter_map(|l| l.param_name()) {
            if !seen.insert(name) {
                return Err(Error::shape(
                    "topology",
                    "unique layer names",
                    format!("duplicate {}", name),
                ));
            }
        }

        Ok(NetworkTopology { variant, input, layers, shapes })
    }

    fn from_table(variant: TopologyVariant, t: &SizeTable) -> Result<NetworkTopology> {
        let relu = || LayerSpec::Activation { function: ActivationFunction::ReLU };
        let pool = || LayerSpec::MaxPool { size: POOL_SIZE, stride: POOL_SIZE };
        NetworkTopology::new(
            variant,
            Shape::Map { channels: INPUT_CHANNELS, height: INPUT_SIZE, width: INPUT_SIZE },
            vec![
                LayerSpec::Conv {
                    name: "conv1".to_owned(),
                    in_channels: INPUT_CHANNELS,
                    out_channels: t.conv1_out,
                    kernel: t.conv1_kernel,
                    stride: 1,
                },
                relu(),
                pool(),
                LayerSpec::Conv {
                    name: "conv2".to_owned(),
                    in_channels: t.conv1_out,
                    out_channels: t.conv2_out,
                    kernel: t.conv2_kernel,
                    stride: 1,
                },
                relu(),
                pool(),
                LayerSpec::Flatten,
                LayerSpec::Dense {
                    name: "fc1".to_owned(),
                    in_features: t.fc1_in,
                    out_features: t.fc1_out,
                },
                relu(),
                LayerSpec::Dense {
                    name: "fc2".to_owned(),
                    in_features: t.fc1_out,
                    out_features: NUM_CLASSES,
                },
            ],
        )
    }

    /// The reference build:
    /// `1x28x28 -> 16x26x26 -> 16x13x13 -> 32x11x11 -> 32x5x5 -> 800 -> 128 -> 10`.
    pub fn original() -> NetworkTopology {
        NetworkTopology::from_table(TopologyVariant::Original, &ORIGINAL)
            .expect("original size table is internally consistent")
    }

    /// The resource-constrained build:
    /// `1x28x28 -> 4x24x24 -> 4x12x12 -> 8x8x8 -> 8x4x4 -> 128 -> 64 -> 10`.
    pub fn optimized() -> NetworkTopology {
        NetworkTopology::from_table(TopologyVariant::Optimized, &OPTIMIZED)
            .expect("optimized size table is internally consistent")
    }

    pub fn from_variant(variant: TopologyVariant) -> NetworkTopology {
        match variant {
            TopologyVariant::Original => NetworkTopology::original(),
            TopologyVariant::Optimized => NetworkTopology::optimized(),
        }
    }

    pub fn variant(&self) -> TopologyVariant {
        self.variant
    }

    pub fn input(&self) -> Shape {
        self.input
    }

    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    /// Output shape after each layer, aligned with `layers()`.
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    /// Shapes after each convolution, pool, flatten and dense stage; the
    /// activations are shape-preserving and left out. This is the chain the
    /// hardware documentation lists.
    pub fn stage_shapes(&self) -> Vec<Shape> {
        std::iter::once(self.input)
            .chain(
                self.layers
                    .iter()
                    .zip(self.shapes.iter())
                    .filter(|(l, _)| !matches!(l, LayerSpec::Activation { .. }))
                    .map(|(_, s)| *s),
            )
            .collect()
    }

    /// Width of the logits vector.
    pub fn num_classes(&self) -> usize {
        self.shapes.last().map(Shape::numel).unwrap_or(0)
    }

    /// Parameterized layers in forward order.
    pub fn param_layers(&self) -> Vec<ParamLayer> {
        self.layers
            .iter()
            .filter_map(|l| {
                let (weight_shape, bias_shape) = l.param_shapes()?;
                Some(ParamLayer {
                    name: l.param_name()?.to_owned(),
                    weight_shape,
                    bias_shape,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(c: usize, h: usize, w: usize) -> Shape {
        Shape::Map { channels: c, height: h, width: w }
    }

    #[test]
    fn original_shape_chain() {
        let t = NetworkTopology::original();
        assert_eq!(
            t.stage_shapes(),
            vec![
                map(1, 28, 28),
                map(16, 26, 26),
                map(16, 13, 13),
                map(32, 11, 11),
                map(32, 5, 5),
                Shape::Vector { len: 800 },
                Shape::Vector { len: 128 },
                Shape::Vector { len: 10 },
            ]
        );
        assert_eq!(t.num_classes(), 10);
    }

    #[test]
    fn optimized_shape_chain() {
        let t = NetworkTopology::optimized();
        assert_eq!(
            t.stage_shapes(),
            vec![
                map(1, 28, 28),
                map(4, 24, 24),
                map(4, 12, 12),
                map(8, 8, 8),
                map(8, 4, 4),
                Shape::Vector { len: 128 },
                Shape::Vector { len: 64 },
                Shape::Vector { len: 10 },
            ]
        );
    }

    #[test]
    fn param_layers_use_hardware_layout() {
        let names: Vec<_> = NetworkTopology::original()
            .param_layers()
            .into_iter()
            .map(|p| (p.name, p.weight_shape, p.bias_shape))
            .collect();
        assert_eq!(
            names,
            vec![
                ("conv1".to_owned(), vec![16, 1, 3, 3], vec![16]),
                ("conv2".to_owned(), vec![32, 16, 3, 3], vec![32]),
                ("fc1".to_owned(), vec![128, 800], vec![128]),
                ("fc2".to_owned(), vec![10, 128], vec![10]),
            ]
        );
    }

    #[test]
    fn wrong_flatten_width_fails_construction() {
        let mut layers = NetworkTopology::original().layers().to_vec();
        // 32x5x5 flattens to 800; declaring 32x6x6 must not be accepted.
        layers[7] = LayerSpec::Dense {
            name: "fc1".into(),
            in_features: 32 * 6 * 6,
            out_features: 128,
        };
        let err =
            NetworkTopology::new(TopologyVariant::Original, map(1, 28, 28), layers).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }), "{}", err);
    }

    #[test]
    fn channel_mismatch_and_fractional_stride_fail() {
        let bad_channels = vec![LayerSpec::Conv {
            name: "conv1".into(),
            in_channels: 3,
            out_channels: 4,
            kernel: 3,
            stride: 1,
        }];
        let built = NetworkTopology::new(TopologyVariant::Original, map(1, 28, 28), bad_channels);
        assert!(built.is_err());

        // (28 - 5) / 2 is not an integer.
        let fractional = vec![
            LayerSpec::Conv {
                name: "conv1".into(),
                in_channels: 1,
                out_channels: 4,
                kernel: 5,
                stride: 2,
            },
            LayerSpec::Flatten,
        ];
        let built = NetworkTopology::new(TopologyVariant::Original, map(1, 28, 28), fractional);
        assert!(built.is_err());

        let too_big = vec![LayerSpec::MaxPool { size: 30, stride: 30 }, LayerSpec::Flatten];
        assert!(NetworkTopology::new(TopologyVariant::Original, map(1, 28, 28), too_big).is_err());
    }

    #[test]
    fn dense_after_map_requires_flatten() {
        let layers = vec![LayerSpec::Dense {
            name: "fc1".into(),
            in_features: 784,
            out_features: 10,
        }];
        assert!(NetworkTopology::new(TopologyVariant::Original, map(1, 28, 28), layers).is_err());
    }
}
