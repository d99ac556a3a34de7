pub mod exporter;
pub mod file_map;
pub mod manifest;

pub use exporter::{export_weights, import_weights, read_manifest};
pub use file_map::WeightFileMap;
pub use manifest::{ExportManifest, ManifestEntry, MANIFEST_FILE};
