//! `weights_meta.txt`: the human-readable index of an export.
//!
//! ```text
//! HLS CNN Weights
//! ==================================================
//! topology: optimized
//! dtype: float32
//! byte_order: little-endian
//! layout: row-major
//! conv1_weights: (4, 1, 5, 5) -> conv1_weights.bin
//! conv1_bias: (4,) -> conv1_bias.bin
//! ...
//! ```

use std::fmt;

use crate::error::{Error, Result};
use crate::math::tensor::dims_string;
use crate::network::topology::TopologyVariant;

pub const MANIFEST_FILE: &str = "weights_meta.txt";

const TITLE: &str = "HLS CNN Weights";
const DTYPE: &str = "float32";
const BYTE_ORDER: &str = "little-endian";
const LAYOUT: &str = "row-major";

/// One exported tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub tensor: String,
    pub shape: Vec<usize>,
    pub file: String,
}

impl ManifestEntry {
    /// Exact payload size in bytes.
    pub fn byte_len(&self) -> usize {
        self.shape.iter().product::<usize>() * 4
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportManifest {
    pub topology: TopologyVariant,
    pub entries: Vec<ManifestEntry>,
}

impl fmt::Display for ExportManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", TITLE)?;
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "topology: {}", self.topology)?;
        writeln!(f, "dtype: {}", DTYPE)?;
        writeln!(f, "byte_order: {}", BYTE_ORDER)?;
        writeln!(f, "layout: {}", LAYOUT)?;
        for e in &self.entries {
            writeln!(f, "{}: {} -> {}", e.tensor, dims_string(&e.shape), e.file)?;
        }
        Ok(())
    }
}

impl ExportManifest {
    pub fn parse(text: &str) -> Result<ExportManifest> {
        let err = |lineno: usize, msg: String| {
            Error::format(MANIFEST_FILE, format!("line {}: {}", lineno + 1, msg))
        };

        let mut topology = None;
        let mut entries = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line == TITLE || line.chars().all(|c| c == '=') {
                continue;
            }

            if let Some((left, file)) = line.split_once(" -> ") {
                let (tensor, dims) = left
                    .split_once(':')
                    .ok_or_else(|| {
                        err(lineno, "expected `<tensor>: (<dims>) -> <file>`".to_owned())
                    })?;
                let shape = parse_dims(dims.trim())
                    .ok_or_else(|| err(lineno, format!("bad shape `{}`", dims.trim())))?;
                entries.push(ManifestEntry {
                    tensor: tensor.trim().to_owned(),
                    shape,
                    file: file.trim().to_owned(),
                });
                continue;
            }

            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| err(lineno, "expected `key: value`".to_owned()))?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "topology" => {
                    topology = Some(value.parse::<TopologyVariant>().map_err(|e| err(lineno, e))?)
                }
                "dtype" if value != DTYPE => {
                    return Err(err(lineno, format!("unsupported dtype `{}`", value)))
                }
                "byte_order" if value != BYTE_ORDER => {
                    return Err(err(lineno, format!("unsupported byte order `{}`", value)))
                }
                "layout" if value != LAYOUT => {
                    return Err(err(lineno, format!("unsupported layout `{}`", value)))
                }
                _ => {}
            }
        }

        let topology =
            topology.ok_or_else(|| Error::format(MANIFEST_FILE, "missing `topology` line"))?;
        Ok(ExportManifest { topology, entries })
    }

    pub fn entry(&self, tensor: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.tensor == tensor)
    }
}

/// Parses `(16, 1, 3, 3)` or `(16,)`.
fn parse_dims(text: &str) -> Option<Vec<usize>> {
    let inner = text.strip_prefix('(')?.strip_suffix(')')?;
    let dims: Vec<usize> = inner
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.parse().ok())
        .collect::<Option<_>>()?;
    if dims.is_empty() {
        None
    } else {
        Some(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExportManifest {
        ExportManifest {
            topology: TopologyVariant::Original,
            entries: vec![
                ManifestEntry {
                    tensor: "conv1_weights".into(),
                    shape: vec![16, 1, 3, 3],
                    file: "conv1_weights.bin".into(),
                },
                ManifestEntry {
                    tensor: "conv1_bias".into(),
                    shape: vec![16],
                    file: "conv1_bias.bin".into(),
                },
            ],
        }
    }

    #[test]
    fn renders_the_testbench_format() {
        let text = sample().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "HLS CNN Weights");
        assert_eq!(lines[1], "=".repeat(50));
        assert_eq!(lines[2], "topology: original");
        assert_eq!(lines[3], "dtype: float32");
        assert_eq!(lines[6], "conv1_weights: (16, 1, 3, 3) -> conv1_weights.bin");
        assert_eq!(lines[7], "conv1_bias: (16,) -> conv1_bias.bin");
    }

    #[test]
    fn parse_reads_back_rendered_text() {
        let m = sample();
        assert_eq!(ExportManifest::parse(&m.to_string()).unwrap(), m);
        assert_eq!(m.entries[0].byte_len(), 16 * 9 * 4);
    }

    #[test]
    fn parse_rejects_foreign_encodings() {
        let text = sample().to_string().replace("float32", "float16");
        assert!(ExportManifest::parse(&text).is_err());
        let text = sample().to_string().replace("topology: original\n", "");
        assert!(ExportManifest::parse(&text).is_err());
        let text = sample().to_string().replace("(16,)", "(sixteen,)");
        assert!(ExportManifest::parse(&text).is_err());
    }
}
