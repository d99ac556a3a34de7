//! Headerless on-disk layout consumed by the hardware testbench.
//!
//! A dataset with prefix `p` lives in three files: `p_images.bin` (f32,
//! little-endian, `[sample, row, col]`), `p_labels.bin` (one u8 per sample)
//! and `p_meta.txt`, the only place the shape is recorded.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::dataset::RawDataset;
use crate::error::{Error, Result};
use crate::files;

/// The `<prefix>_meta.txt` sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetManifest {
    pub num_images: usize,
    pub image_height: usize,
    pub image_width: usize,
    pub num_classes: usize,
}

impl fmt::Display for DatasetManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "num_images: {}", self.num_images)?;
        writeln!(f, "image_height: {}", self.image_height)?;
        writeln!(f, "image_width: {}", self.image_width)?;
        writeln!(f, "num_classes: {}", self.num_classes)
    }
}

impl DatasetManifest {
    /// Parses `key: value` lines. Unknown keys are ignored; each of the four
    /// known keys must appear once with an unsigned integer value.
    pub fn parse(source_name: &str, text: &str) -> Result<DatasetManifest> {
        let mut fields: [Option<usize>; 4] = [None; 4];
        const KEYS: [&str; 4] = ["num_images", "image_height", "image_width", "num_classes"];

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                Error::format(source_name, format!("line {}: expected `key: value`", lineno + 1))
            })?;
            let Some(slot) = KEYS.iter().position(|k| *k == key.trim()) else {
                continue;
            };
            let value: usize = value.trim().parse().map_err(|_| {
                Error::format(
                    source_name,
                    format!("line {}: `{}` is not a count", lineno + 1, value.trim()),
                )
            })?;
            if fields[slot].replace(value).is_some() {
                return Err(Error::format(
                    source_name,
                    format!("duplicate key `{}`", KEYS[slot]),
                ));
            }
        }

        let get = |i: usize| {
            fields[i].ok_or_else(|| {
                Error::format(source_name, format!("missing key `{}`", KEYS[i]))
            })
        };
        Ok(DatasetManifest {
            num_images: get(0)?,
            image_height: get(1)?,
            image_width: get(2)?,
            num_classes: get(3)?,
        })
    }
}

/// The three byte streams of one flat dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedDataset {
    pub images: Vec<u8>,
    pub labels: Vec<u8>,
    pub manifest: String,
}

pub fn encode(dataset: &RawDataset) -> EncodedDataset {
    EncodedDataset {
        images: files::f32_to_le_bytes(&dataset.images),
        labels: dataset.labels.clone(),
        manifest: dataset.manifest().to_string(),
    }
}

/// Rebuilds a dataset from its payloads, checking both lengths against the
/// manifest.
pub fn decode_flat(images: &[u8], labels: &[u8], manifest: &DatasetManifest) -> Result<RawDataset> {
    let byte_len = manifest
        .num_images
        .checked_mul(manifest.image_height)
        .and_then(|n| n.checked_mul(manifest.image_width))
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| {
            Error::shape(
                "flat image payload",
                format!(
                    "{} images of {}x{} within the address space",
                    manifest.num_images, manifest.image_height, manifest.image_width
                ),
                format!("{} bytes", images.len()),
            )
        })?;
    if images.len() != byte_len {
        return Err(Error::shape(
            "flat image payload",
            format!("{} bytes", byte_len),
            format!("{} bytes", images.len()),
        ));
    }
    if labels.len() != manifest.num_images {
        return Err(Error::shape(
            "flat label payload",
            format!("{} bytes", manifest.num_images),
            format!("{} bytes", labels.len()),
        ));
    }
    if let Some(&bad) = labels.iter().find(|&&l| l as usize >= manifest.num_classes) {
        return Err(Error::format(
            "flat label payload",
            format!("label {} is out of range for {} classes", bad, manifest.num_classes),
        ));
    }
    Ok(RawDataset {
        height: manifest.image_height,
        width: manifest.image_width,
        num_classes: manifest.num_classes,
        images: files::f32_from_le_bytes(images),
        labels: labels.to_vec(),
    })
}

/// Paths of the three files for `prefix` under `dir`, as (images, labels, meta).
pub fn flat_paths(dir: &Path, prefix: &str) -> (PathBuf, PathBuf, PathBuf) {
    (
        dir.join(format!("{}_images.bin", prefix)),
        dir.join(format!("{}_labels.bin", prefix)),
        dir.join(format!("{}_meta.txt", prefix)),
    )
}

/// Writes the dataset under `dir`. The manifest goes last, and any manifest
/// left from an earlier run is removed before the payloads are touched, so
/// a present manifest always describes complete payloads.
pub fn write_flat(dir: &Path, prefix: &str, dataset: &RawDataset) -> Result<()> {
    files::create_dir_all(dir)?;
    let (images_path, labels_path, meta_path) = flat_paths(dir, prefix);
    let encoded = encode(dataset);

    files::remove_if_exists(&meta_path)?;
    files::write_bytes(&images_path, &encoded.images)?;
    files::write_bytes(&labels_path, &encoded.labels)?;
    files::write_bytes(&meta_path, encoded.manifest.as_bytes())?;

    info!(
        prefix,
        images = dataset.len(),
        height = dataset.height,
        width = dataset.width,
        "wrote flat dataset to {}",
        dir.display()
    );
    Ok(())
}

pub fn load_flat(dir: &Path, prefix: &str) -> Result<RawDataset> {
    let (images_path, labels_path, meta_path) = flat_paths(dir, prefix);
    let text = files::read_text(&meta_path)?;
    let manifest = DatasetManifest::parse(&meta_path.display().to_string(), &text)?;
    let images = files::read_bytes(&images_path)?;
    let labels = files::read_bytes(&labels_path)?;
    decode_flat(&images, &labels, &manifest)
}
