//! IDX image/label pairs as distributed for MNIST.
//!
//! # Image file layout
//! ```text
//! bytes  0-3:   2051        (magic, big-endian u32)
//! bytes  4-7:   N           (number of images, big-endian u32)
//! bytes  8-11:  rows        (big-endian u32)
//! bytes 12-15:  cols        (big-endian u32)
//! bytes 16..:   N * rows * cols bytes, row-major, uint8
//! ```
//!
//! # Label file layout
//! ```text
//! bytes  0-3:   2049        (magic, big-endian u32)
//! bytes  4-7:   N           (number of labels, big-endian u32)
//! bytes  8..:   N bytes, each a class index in [0, num_classes)
//! ```

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::debug;

use crate::dataset::RawDataset;
use crate::error::{Error, Result};
use crate::files;

pub const IMAGE_MAGIC: u32 = 2051;
pub const LABEL_MAGIC: u32 = 2049;

const IMAGE_HEADER_LEN: usize = 16;
const LABEL_HEADER_LEN: usize = 8;

const IMAGES: &str = "IDX image file";
const LABELS: &str = "IDX label file";

fn be_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Decodes an image/label pair into a normalized dataset.
///
/// Pixels are divided by 255 so every intensity lies in `[0, 1]`. The
/// payload after each header must be exactly as long as the header declares.
pub fn decode_idx(
    image_bytes: &[u8],
    label_bytes: &[u8],
    num_classes: usize,
) -> Result<RawDataset> {
    // Image header

    if image_bytes.len() < IMAGE_HEADER_LEN {
        return Err(Error::format(
            IMAGES,
            format!(
                "truncated header: expected {} bytes, got {}",
                IMAGE_HEADER_LEN,
                image_bytes.len()
            ),
        ));
    }
    let magic = be_u32(image_bytes, 0);
    if magic != IMAGE_MAGIC {
        return Err(Error::format(
            IMAGES,
            format!("magic number {} (expected {})", magic, IMAGE_MAGIC),
        ));
    }
    let count = be_u32(image_bytes, 4) as usize;
    let rows = be_u32(image_bytes, 8) as usize;
    let cols = be_u32(image_bytes, 12) as usize;

    let payload_len = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| {
            Error::format(
                IMAGES,
                format!("{} images of {}x{} overflows the address space", count, rows, cols),
            )
        })?;
    let found = image_bytes.len() - IMAGE_HEADER_LEN;
    if found != payload_len {
        return Err(Error::format(
            IMAGES,
            format!(
                "header declares {} images of {}x{} ({} payload bytes) but {} bytes follow",
                count, rows, cols, payload_len, found
            ),
        ));
    }

    // Label header

    if label_bytes.len() < LABEL_HEADER_LEN {
        return Err(Error::format(
            LABELS,
            format!(
                "truncated header: expected {} bytes, got {}",
                LABEL_HEADER_LEN,
                label_bytes.len()
            ),
        ));
    }
    let magic = be_u32(label_bytes, 0);
    if magic != LABEL_MAGIC {
        return Err(Error::format(
            LABELS,
            format!("magic number {} (expected {})", magic, LABEL_MAGIC),
        ));
    }
    let label_count = be_u32(label_bytes, 4) as usize;
    if label_count != count {
        return Err(Error::format(
            LABELS,
            format!("{} labels for {} images", label_count, count),
        ));
    }
    let found = label_bytes.len() - LABEL_HEADER_LEN;
    if found != label_count {
        return Err(Error::format(
            LABELS,
            format!("header declares {} labels but {} bytes follow", label_count, found),
        ));
    }

    let labels = label_bytes[LABEL_HEADER_LEN..].to_vec();
    if let Some((i, &bad)) = labels
        .iter()
        .enumerate()
        .find(|&(_, &l)| l as usize >= num_classes)
    {
        return Err(Error::format(
            LABELS,
            format!(
                "label {} at index {} is out of range for {} classes",
                bad, i, num_classes
            ),
        ));
    }

    let images = image_bytes[IMAGE_HEADER_LEN..]
        .iter()
        .map(|&px| px as f32 / 255.0)
        .collect();

    debug!(count, rows, cols, "decoded IDX pair");
    Ok(RawDataset {
        height: rows,
        width: cols,
        num_classes,
        images,
        labels,
    })
}

/// Reads an IDX file, inflating it first when the name ends in `.gz`.
pub fn read_idx_file(path: &Path) -> Result<Vec<u8>> {
    let raw = files::read_bytes(path)?;
    let gzipped = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if !gzipped {
        return Ok(raw);
    }
    let mut out = Vec::new();
    GzDecoder::new(raw.as_slice())
        .read_to_end(&mut out)
        .map_err(|e| Error::io(path, e))?;
    Ok(out)
}
