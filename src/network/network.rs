use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::layers::{Conv2d, Dense, Layer, MaxPool2d};
use crate::math::tensor::Tensor;
use crate::network::params::{Gradients, LayerParams, ParameterSet};
use crate::network::quant::HardwareNumerics;
use crate::network::topology::{LayerSpec, NetworkTopology, TopologyVariant};

/// Intermediate values of one float32 forward pass, kept for backprop.
///
/// `activations[i]` is the input of layer `i`; the final entry is the logits.
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    pub activations: Vec<Tensor>,
    pool_argmax: Vec<Option<Vec<usize>>>,
}

impl ForwardTrace {
    pub fn logits(&self) -> &[f32] {
        self.activations.last().map(|t| t.data.as_slice()).unwrap_or(&[])
    }

    pub fn into_logits(mut self) -> Vec<f32> {
        self.activations.pop().map(|t| t.data).unwrap_or_default()
    }
}

/// A network built from a `NetworkTopology`. The forward algorithm is the
/// same for every topology; only the layer list differs.
#[derive(Debug, Clone)]
pub struct Network {
    topology: NetworkTopology,
    layers: Vec<Layer>,
}

impl Network {
    /// Builds the runtime layers with seeded He-initialized weights and zero
    /// biases.
    pub fn new<R: Rng + ?Sized>(topology: NetworkTopology, rng: &mut R) -> Network {
        let layers = topology
            .layers()
            .iter()
            .map(|spec| match spec {
                LayerSpec::Conv { name, in_channels, out_channels, kernel, stride } => {
                    let conv =
                        Conv2d::new(name, *in_channels, *out_channels, *kernel, *stride, rng);
                    Layer::Conv(conv)
                }
                LayerSpec::Activation { function } => Layer::Activation(*function),
                LayerSpec::MaxPool { size, stride } => {
                    Layer::MaxPool(MaxPool2d::new(*size, *stride))
                }
                LayerSpec::Flatten => Layer::Flatten,
                LayerSpec::Dense { name, in_features, out_features } => {
                    Layer::Dense(Dense::new(name, *in_features, *out_features, rng))
                }
            })
            .collect();
        Network { topology, layers }
    }

    /// Builds a network and installs `params` in place of the random ones.
    pub fn with_parameters(topology: NetworkTopology, params: &ParameterSet) -> Result<Network> {
        let mut network = Network::new(topology, &mut StdRng::seed_from_u64(0));
        network.load_parameters(params)?;
        Ok(network)
    }

    pub fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    fn input_tensor(&self, input: &[f32]) -> Result<Tensor> {
        let dims = self.topology.input().dims();
        Tensor::from_data(&dims, input.to_vec())
    }

    /// Float32 forward pass used by the training loop. Records every
    /// intermediate activation; applies no quantization.
    pub fn train_forward(&self, input: &[f32]) -> Result<ForwardTrace> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        let mut pool_argmax = Vec::with_capacity(self.layers.len());
        let mut current = self.input_tensor(input)?;

        for layer in &self.layers {
            let (next, argmax) = match layer {
                Layer::Conv(conv) => (conv.forward(&current), None),
                Layer::Activation(f) => (current.map(|x| f.function(x)), None),
                Layer::MaxPool(pool) => {
                    let (out, argmax) = pool.forward(&current);
                    (out, Some(argmax))
                }
                // Data is already (c, h, w) row-major, which is the flatten order.
                Layer::Flatten => (current.clone().reshaped(&[current.len()])?, None),
                Layer::Dense(dense) => (dense.forward(&current), None),
            };
            activations.push(std::mem::replace(&mut current, next));
            pool_argmax.push(argmax);
        }
        activations.push(current);

        Ok(ForwardTrace { activations, pool_argmax })
    }

    /// Logits of the float32 path without keeping the trace. Shares
    /// `train_forward`, so evaluation sees exactly the training numerics.
    pub fn infer(&self, input: &[f32]) -> Result<Vec<f32>> {
        Ok(self.train_forward(input)?.into_logits())
    }

    /// Export-time shadow pass predicting the hardware engine's output.
    ///
    /// Inputs are cast to the data format, weights and biases to the weight
    /// format, every multiply-accumulate runs in the accumulator format, and
    /// each convolution/dense output (after its activation, when one
    /// follows) is cast back to the data format. The training loop never
    /// calls this.
    pub fn export_forward(&self, input: &[f32], numerics: &HardwareNumerics) -> Result<Vec<f32>> {
        let mut current = self.input_tensor(input)?;
        current = current.map(|x| numerics.data.quantize(x as f64) as f32);

        let mut i = 0;
        while i < self.layers.len() {
            let acc = match &self.layers[i] {
                Layer::Conv(conv) => Some(conv.forward_acc(&current, numerics)),
                Layer::Dense(dense) => Some(dense.forward_acc(&current, numerics)),
                Layer::Activation(f) => {
                    current = current.map(|x| f.function(x));
                    None
                }
                Layer::MaxPool(pool) => {
                    current = pool.forward(&current).0;
                    None
                }
                Layer::Flatten => {
                    let len = current.len();
                    current = current.reshaped(&[len])?;
                    None
                }
            };

            if let Some((shape, mut sums)) = acc {
                // The engine fuses the activation into the MAC stage and
                // applies it before narrowing to the data format.
                if let Some(Layer::Activation(f)) = self.layers.get(i + 1) {
                    sums.iter_mut().for_each(|s| *s = f.function_acc(*s));
                    i += 1;
                }
                let data = sums
                    .into_iter()
                    .map(|s| numerics.data.quantize(s) as f32)
                    .collect();
                current = Tensor::from_data(&shape, data)?;
            }
            i += 1;
        }

        Ok(current.data)
    }

    /// Backpropagates ∂L/∂logits through a trace produced by
    /// `train_forward`. Returns one gradient pair per parameterized layer.
    pub fn backward(&self, trace: &ForwardTrace, grad_logits: &[f32]) -> Result<Gradients> {
        let out_dims = self.topology.shapes().last().map(|s| s.dims()).unwrap_or_default();
        let mut delta = Tensor::from_data(&out_dims, grad_logits.to_vec())?;
        let mut grads: Vec<LayerParams> = Vec::new();

        for (i, layer) in self.layers.iter().enumerate().rev() {
            let input = &trace.activations[i];
            delta = match layer {
                Layer::Conv(conv) => {
                    let (grad_input, grad_weights, grad_bias) = conv.backward(input, &delta);
                    grads.push(LayerParams {
                        name: conv.name.clone(),
                        weights: grad_weights,
                        bias: grad_bias,
                    });
                    grad_input
                }
                Layer::Dense(dense) => {
                    let (grad_input, grad_weights, grad_bias) = dense.backward(input, &delta);
                    grads.push(LayerParams {
                        name: dense.name.clone(),
                        weights: grad_weights,
                        bias: grad_bias,
                    });
                    grad_input
                }
                Layer::Activation(f) => {
                    let mut d = delta;
                    for (g, &x) in d.data.iter_mut().zip(input.data.iter()) {
                        *g *= f.derivative(x);
                    }
                    d
                }
                Layer::MaxPool(pool) => {
                    let argmax = trace.pool_argmax[i].as_ref().ok_or_else(|| {
                        Error::shape("backward", "pool argmax in trace", "none recorded")
                    })?;
                    pool.backward(&input.shape, argmax, &delta)
                }
                Layer::Flatten => delta.reshaped(&input.shape)?,
            };
        }

        grads.reverse();
        Ok(ParameterSet { layers: grads })
    }

    /// Snapshot of every trainable tensor.
    pub fn parameters(&self) -> ParameterSet {
        let layers = self
            .layers
            .iter()
            .filter_map(|layer| match layer {
                Layer::Conv(c) => Some(LayerParams {
                    name: c.name.clone(),
                    weights: c.weights.clone(),
                    bias: c.bias.clone(),
                }),
                Layer::Dense(d) => Some(LayerParams {
                    name: d.name.clone(),
                    weights: d.weights.clone(),
                    bias: d.bias.clone(),
                }),
                _ => None,
            })
            .collect();
        ParameterSet { layers }
    }

    /// Replaces every trainable tensor with the ones in `params`, after
    /// checking them against the topology.
    pub fn load_parameters(&mut self, params: &ParameterSet) -> Result<()> {
        params.validate(&self.topology)?;
        for layer in self.layers.iter_mut() {
            let (name, weights, bias) = match layer {
                Layer::Conv(c) => (&c.name, &mut c.weights, &mut c.bias),
                Layer::Dense(d) => (&d.name, &mut d.weights, &mut d.bias),
                _ => continue,
            };
            if let Some(p) = params.get(name) {
                *weights = p.weights.clone();
                *bias = p.bias.clone();
            }
        }
        Ok(())
    }

    /// Mutable views of the trainable tensors in `ParameterSet::tensors`
    /// order (weight, bias, weight, bias, ...).
    pub fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        let mut out = Vec::new();
        for layer in self.layers.iter_mut() {
            match layer {
                Layer::Conv(c) => {
                    out.push(&mut c.weights);
                    out.push(&mut c.bias);
                }
                Layer::Dense(d) => {
                    out.push(&mut d.weights);
                    out.push(&mut d.bias);
                }
                _ => {}
            }
        }
        out
    }
}

/// Serialized form of a captured best model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub topology: TopologyVariant,
    /// 1-based epoch the snapshot was taken after.
    pub epoch: usize,
    /// Held-out accuracy in [0, 1] that triggered the capture.
    pub accuracy: f64,
    pub parameters: ParameterSet,
}

impl Checkpoint {
    /// Serializes the checkpoint to a pretty-printed JSON file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| Error::Json {
            path: path.to_owned(),
            source: e,
        })?;
        writer.flush().map_err(|e| Error::io(path, e))
    }

    /// Deserializes a checkpoint previously written by `save_json` and checks
    /// its tensors against the recorded topology.
    pub fn load_json(path: &Path) -> Result<Checkpoint> {
        let file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
        let reader = std::io::BufReader::new(file);
        let checkpoint: Checkpoint = serde_json::from_reader(reader).map_err(|e| Error::Json {
            path: path.to_owned(),
            source: e,
        })?;
        checkpoint.parameters.validate(&NetworkTopology::from_variant(checkpoint.topology))?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::CrossEntropyLoss;

    fn sample_image(seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..784).map(|_| rng.gen::<f32>()).collect()
    }

    #[test]
    fn trace_follows_shape_chain() {
        for topology in [NetworkTopology::original(), NetworkTopology::optimized()] {
            let shapes: Vec<Vec<usize>> = topology.shapes().iter().map(|s| s.dims()).collect();
            let network = Network::new(topology, &mut StdRng::seed_from_u64(1));
            let trace = network.train_forward(&sample_image(2)).unwrap();
            let traced: Vec<Vec<usize>> =
                trace.activations[1..].iter().map(|t| t.shape.clone()).collect();
            assert_eq!(traced, shapes);
            assert_eq!(trace.logits().len(), 10);
        }
    }

    #[test]
    fn wrong_input_length_is_rejected() {
        let network = Network::new(NetworkTopology::optimized(), &mut StdRng::seed_from_u64(1));
        assert!(network.train_forward(&[0.0; 100]).is_err());
    }

    #[test]
    fn flatten_is_channel_major() {
        let topology = NetworkTopology::optimized();
        let network = Network::new(topology, &mut StdRng::seed_from_u64(4));
        let trace = network.train_forward(&sample_image(5)).unwrap();
        // Layer 5 is pool2 (8x4x4), layer 6 flattens it.
        let pooled = &trace.activations[6];
        let flat = &trace.activations[7];
        assert_eq!(pooled.shape, vec![8, 4, 4]);
        for c in 0..8 {
            for h in 0..4 {
                for w in 0..4 {
                    assert_eq!(flat.data[c * 16 + h * 4 + w], pooled.data[(c * 4 + h) * 4 + w]);
                }
            }
        }
    }

    #[test]
    fn infer_equals_train_forward_logits() {
        let network = Network::new(NetworkTopology::original(), &mut StdRng::seed_from_u64(8));
        let x = sample_image(9);
        assert_eq!(network.infer(&x).unwrap(), network.train_forward(&x).unwrap().logits());
    }

    #[test]
    fn export_forward_matches_float_path_on_representable_values() {
        // With every parameter and pixel on the 1/256 grid and small
        // magnitudes nothing wraps; the only drift is the truncation of each
        // layer output to 8 fractional bits.
        let topology = NetworkTopology::optimized();
        let mut network = Network::new(topology.clone(), &mut StdRng::seed_from_u64(3));
        let mut params = network.parameters();
        let mut rng = StdRng::seed_from_u64(11);
        for t in params.layers.iter_mut().flat_map(|l| [&mut l.weights, &mut l.bias]) {
            for v in t.data.iter_mut() {
                *v = rng.gen_range(-2i32..=2) as f32 / 256.0;
            }
        }
        network.load_parameters(&params).unwrap();
        let x: Vec<f32> = (0..784).map(|i| if i % 3 == 0 { 1.0 } else { 0.0 }).collect();

        let float = network.infer(&x).unwrap();
        let fixed = network.export_forward(&x, &HardwareNumerics::default()).unwrap();
        assert_eq!(fixed.len(), 10);
        for (a, b) in float.iter().zip(fixed.iter()) {
            assert!((a - b).abs() <= 3.0 / 256.0, "float {} fixed {}", a, b);
        }
    }

    #[test]
    fn backward_gradient_descends_loss() {
        let mut network =
            Network::new(NetworkTopology::optimized(), &mut StdRng::seed_from_u64(21));
        let x = sample_image(22);
        let label = 3;

        let trace = network.train_forward(&x).unwrap();
        let before = CrossEntropyLoss::loss(trace.logits(), label);
        let delta = CrossEntropyLoss::derivative(trace.logits(), label);
        let grads = network.backward(&trace, &delta).unwrap();
        assert!(grads.validate(network.topology()).is_ok());

        for (p, g) in network.tensors_mut().into_iter().zip(grads.tensors()) {
            for (w, dw) in p.data.iter_mut().zip(g.data.iter()) {
                *w -= 1e-3 * dw;
            }
        }
        let after = CrossEntropyLoss::loss(&network.infer(&x).unwrap(), label);
        assert!(after < before, "before {} after {}", before, after);
    }

    #[test]
    fn checkpoint_round_trips_through_json() {
        let network = Network::new(NetworkTopology::optimized(), &mut StdRng::seed_from_u64(5));
        let checkpoint = Checkpoint {
            topology: TopologyVariant::Optimized,
            epoch: 3,
            accuracy: 0.91,
            parameters: network.parameters(),
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best_model.json");
        checkpoint.save_json(&path).unwrap();
        let loaded = Checkpoint::load_json(&path).unwrap();
        assert_eq!(loaded.parameters, checkpoint.parameters);
        assert_eq!(loaded.epoch, 3);

        let rebuilt =
            Network::with_parameters(NetworkTopology::optimized(), &loaded.parameters).unwrap();
        let x = sample_image(6);
        assert_eq!(rebuilt.infer(&x).unwrap(), network.infer(&x).unwrap());
    }

    #[test]
    fn checkpoint_save_reports_a_failed_flush() {
        let device = Path::new("/dev/full");
        if !device.exists() {
            return;
        }
        // Small enough to sit entirely in the write buffer until the flush.
        let checkpoint = Checkpoint {
            topology: TopologyVariant::Optimized,
            epoch: 1,
            accuracy: 0.5,
            parameters: ParameterSet { layers: vec![] },
        };
        let err = checkpoint.save_json(device).unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "{:?}", err);
    }
}
