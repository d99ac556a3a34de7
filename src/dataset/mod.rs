pub mod flat;
pub mod idx;
pub mod subset;

pub use flat::{decode_flat, encode, load_flat, write_flat, DatasetManifest, EncodedDataset};
pub use idx::{decode_idx, read_idx_file, IMAGE_MAGIC, LABEL_MAGIC};
pub use subset::subset;

/// Images paired 1:1 with class labels.
///
/// `images` holds `len() * height * width` normalized intensities in
/// `[sample, row, col]` order. Every label is below `num_classes`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDataset {
    pub height: usize,
    pub width: usize,
    pub num_classes: usize,
    pub images: Vec<f32>,
    pub labels: Vec<u8>,
}

impl RawDataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn pixels_per_image(&self) -> usize {
        self.height * self.width
    }

    /// The `index`-th image as a flat row-major slice.
    pub fn image(&self, index: usize) -> &[f32] {
        let n = self.pixels_per_image();
        &self.images[index * n..(index + 1) * n]
    }

    pub fn label(&self, index: usize) -> usize {
        self.labels[index] as usize
    }

    /// Number of samples per class, indexed by class.
    pub fn label_histogram(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_classes];
        for &l in &self.labels {
            if let Some(c) = counts.get_mut(l as usize) {
                *c += 1;
            }
        }
        counts
    }

    pub fn manifest(&self) -> DatasetManifest {
        DatasetManifest {
            num_images: self.len(),
            image_height: self.height,
            image_width: self.width,
            num_classes: self.num_classes,
        }
    }
}
