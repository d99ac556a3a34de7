use rand::seq::index;
use rand::Rng;

use crate::dataset::RawDataset;
use crate::error::{Error, Result};

/// Draws `count` distinct samples, in draw order. The same RNG state always
/// yields the same subset.
pub fn subset<R: Rng + ?Sized>(
    dataset: &RawDataset,
    count: usize,
    rng: &mut R,
) -> Result<RawDataset> {
    if count > dataset.len() {
        return Err(Error::InsufficientSamples {
            requested: count,
            available: dataset.len(),
        });
    }

    let picked = index::sample(rng, dataset.len(), count);
    let mut images = Vec::with_capacity(count * dataset.pixels_per_image());
    let mut labels = Vec::with_capacity(count);
    for i in picked.iter() {
        images.extend_from_slice(dataset.image(i));
        labels.push(dataset.labels[i]);
    }

    Ok(RawDataset {
        height: dataset.height,
        width: dataset.width,
        num_classes: dataset.num_classes,
        images,
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Each image is filled with its own index so rows can be traced back.
    fn indexed(n: usize) -> RawDataset {
        RawDataset {
            height: 1,
            width: 2,
            num_classes: 10,
            images: (0..n).flat_map(|i| [i as f32, i as f32]).collect(),
            labels: (0..n).map(|i| (i % 10) as u8).collect(),
        }
    }

    #[test]
    fn draws_distinct_pairs_from_the_source() {
        let ds = indexed(50);
        let sub = subset(&ds, 20, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(sub.len(), 20);

        let mut seen: Vec<usize> = (0..sub.len()).map(|i| sub.image(i)[0] as usize).collect();
        for (i, &src) in seen.iter().enumerate() {
            assert_eq!(sub.image(i)[1] as usize, src);
            assert_eq!(sub.label(i), src % 10);
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 20);
    }

    #[test]
    fn same_seed_same_subset() {
        let ds = indexed(100);
        let a = subset(&ds, 10, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = subset(&ds, 10, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn whole_pool_and_too_many() {
        let ds = indexed(5);
        assert_eq!(subset(&ds, 5, &mut StdRng::seed_from_u64(0)).unwrap().len(), 5);
        match subset(&ds, 6, &mut StdRng::seed_from_u64(0)) {
            Err(Error::InsufficientSamples { requested, available }) => {
                assert_eq!((requested, available), (6, 5));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
