use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};
use crate::export::file_map::{bias_tensor, weights_tensor, WeightFileMap};
use crate::export::manifest::{ExportManifest, ManifestEntry, MANIFEST_FILE};
use crate::files;
use crate::math::tensor::{dims_string, Tensor};
use crate::network::params::{LayerParams, ParameterSet};
use crate::network::topology::NetworkTopology;

/// Writes one raw float32 file per tensor plus `weights_meta.txt` into `dir`.
///
/// Every tensor the topology declares must be present in `params` with the
/// declared shape and have a file in `map`; otherwise nothing is written.
/// Payloads go first and the manifest last, after removing any manifest left
/// from an earlier export.
pub fn export_weights(
    params: &ParameterSet,
    topology: &NetworkTopology,
    map: &WeightFileMap,
    dir: &Path,
) -> Result<ExportManifest> {
    let mut planned: Vec<(ManifestEntry, &Tensor)> = Vec::new();
    for layer in topology.param_layers() {
        let found = params.get(&layer.name);
        for (tensor_name, expected, tensor) in [
            (weights_tensor(&layer.name), &layer.weight_shape, found.map(|p| &p.weights)),
            (bias_tensor(&layer.name), &layer.bias_shape, found.map(|p| &p.bias)),
        ] {
            let tensor = tensor.ok_or_else(|| Error::IncompleteExport {
                tensor: tensor_name.clone(),
                reason: format!("layer `{}` is not in the parameter set", layer.name),
            })?;
            if &tensor.shape != expected {
                return Err(Error::shape(tensor_name, dims_string(expected), tensor.dims()));
            }
            let file = map.file_for(&tensor_name).ok_or_else(|| Error::IncompleteExport {
                tensor: tensor_name.clone(),
                reason: "no output file mapped".to_owned(),
            })?;
            planned.push((
                ManifestEntry {
                    tensor: tensor_name,
                    shape: expected.clone(),
                    file: file.to_owned(),
                },
                tensor,
            ));
        }
    }

    files::create_dir_all(dir)?;
    let manifest_path = dir.join(MANIFEST_FILE);
    files::remove_if_exists(&manifest_path)?;

    for (entry, tensor) in &planned {
        let path = dir.join(&entry.file);
        files::write_bytes(&path, &files::f32_to_le_bytes(&tensor.data))?;
        info!(
            "exported {}: {} -> {} ({} bytes)",
            entry.tensor,
            dims_string(&entry.shape),
            path.display(),
            entry.byte_len()
        );
    }

    let manifest = ExportManifest {
        topology: topology.variant(),
        entries: planned.into_iter().map(|(entry, _)| entry).collect(),
    };
    files::write_bytes(&manifest_path, manifest.to_string().as_bytes())?;
    info!("weights exported to {}", dir.display());
    Ok(manifest)
}

/// Reads `weights_meta.txt` from an export directory.
pub fn read_manifest(dir: &Path) -> Result<ExportManifest> {
    let text = files::read_text(&dir.join(MANIFEST_FILE))?;
    ExportManifest::parse(&text)
}

/// Loads an export back into a parameter set, checking every payload's byte
/// length against the shape in the manifest. Layers appear in manifest order.
pub fn import_weights(dir: &Path) -> Result<ParameterSet> {
    let manifest = read_manifest(dir)?;

    let mut tensors = Vec::with_capacity(manifest.entries.len());
    for entry in &manifest.entries {
        let path = dir.join(&entry.file);
        let bytes = files::read_bytes(&path)?;
        if bytes.len() != entry.byte_len() {
            return Err(Error::shape(
                path.display().to_string(),
                format!("{} bytes for {}", entry.byte_len(), dims_string(&entry.shape)),
                format!("{} bytes", bytes.len()),
            ));
        }
        let tensor = Tensor::from_data(&entry.shape, files::f32_from_le_bytes(&bytes))?;
        tensors.push((entry.tensor.as_str(), tensor));
    }

    let mut layers: Vec<LayerParams> = Vec::new();
    for (name, tensor) in &tensors {
        let Some(layer) = name.strip_suffix("_weights") else {
            continue;
        };
        let bias_name = bias_tensor(layer);
        let bias = tensors
            .iter()
            .find(|(n, _)| *n == bias_name)
            .map(|(_, t)| t.clone())
            .ok_or_else(|| {
                Error::format(
                    MANIFEST_FILE,
                    format!("`{}` has no matching `{}`", name, bias_name),
                )
            })?;
        layers.push(LayerParams {
            name: layer.to_owned(),
            weights: tensor.clone(),
            bias,
        });
    }

    info!(
        topology = %manifest.topology,
        tensors = manifest.entries.len(),
        "imported weights from {}",
        dir.display()
    );
    Ok(ParameterSet { layers })
}
