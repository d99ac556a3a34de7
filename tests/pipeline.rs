use std::fs;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hls_cnn_prep::dataset::{self, RawDataset, IMAGE_MAGIC, LABEL_MAGIC};
use hls_cnn_prep::export::{read_manifest, MANIFEST_FILE};
use hls_cnn_prep::{
    evaluate, export_weights, import_weights, train, Checkpoint, Error, Network, NetworkTopology,
    TopologyVariant, TrainConfig, WeightFileMap,
};

/// Ten 28x28 images, label 0 lit on the top half and label 1 on the bottom.
fn synthetic_set(seed: u64) -> RawDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut images = Vec::new();
    let mut labels = Vec::new();
    for i in 0..10 {
        let label = (i % 2) as u8;
        for row in 0..28 {
            for _col in 0..28 {
                let lit = (row < 14) == (label == 0);
                images.push(if lit { 0.9 } else { 0.0 } + rng.gen_range(0.0..0.05));
            }
        }
        labels.push(label);
    }
    RawDataset {
        height: 28,
        width: 28,
        num_classes: 10,
        images,
        labels,
    }
}

fn idx_bytes(ds: &RawDataset) -> (Vec<u8>, Vec<u8>) {
    let mut images = Vec::new();
    images.extend_from_slice(&IMAGE_MAGIC.to_be_bytes());
    images.extend_from_slice(&(ds.len() as u32).to_be_bytes());
    images.extend_from_slice(&(ds.height as u32).to_be_bytes());
    images.extend_from_slice(&(ds.width as u32).to_be_bytes());
    images.extend(ds.images.iter().map(|&p| (p * 255.0).round() as u8));

    let mut labels = Vec::new();
    labels.extend_from_slice(&LABEL_MAGIC.to_be_bytes());
    labels.extend_from_slice(&(ds.len() as u32).to_be_bytes());
    labels.extend_from_slice(&ds.labels);
    (images, labels)
}

#[test]
fn one_epoch_lowers_loss_and_captures_once() {
    let ds = synthetic_set(1);
    let mut network = Network::new(NetworkTopology::optimized(), &mut StdRng::seed_from_u64(2));
    let before = evaluate(&network, &ds).unwrap();

    let report = train(&mut network, &ds, &ds, &TrainConfig::new(1, 10, 1e-3, 3)).unwrap();
    let after = evaluate(&network, &ds).unwrap();

    assert!(after.loss < before.loss, "loss {} -> {}", before.loss, after.loss);
    assert_eq!(report.captures(), 1);
    assert_eq!(report.history.len(), 1);
    let best = report.best().unwrap();
    assert_eq!(best.epoch, 1);
    assert_eq!(best.parameters, network.parameters());
}

#[test]
fn idx_to_flat_to_training_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let source = synthetic_set(4);
    let (images, labels) = idx_bytes(&source);
    fs::write(dir.path().join("train-images-idx3-ubyte"), &images).unwrap();
    fs::write(dir.path().join("train-labels-idx1-ubyte"), &labels).unwrap();

    let image_bytes = dataset::read_idx_file(&dir.path().join("train-images-idx3-ubyte")).unwrap();
    let label_bytes = dataset::read_idx_file(&dir.path().join("train-labels-idx1-ubyte")).unwrap();
    let decoded = dataset::decode_idx(&image_bytes, &label_bytes, 10).unwrap();
    assert_eq!(decoded.len(), 10);
    assert_eq!(decoded.labels, source.labels);
    assert_eq!(decoded.label_histogram()[..2], [5, 5]);

    let out = dir.path().join("data");
    dataset::write_flat(&out, "train", &decoded).unwrap();
    assert_eq!(fs::metadata(out.join("train_images.bin")).unwrap().len(), 10 * 784 * 4);
    assert_eq!(fs::metadata(out.join("train_labels.bin")).unwrap().len(), 10);
    let meta = fs::read_to_string(out.join("train_meta.txt")).unwrap();
    assert!(meta.contains("num_images: 10"));
    assert!(meta.contains("num_classes: 10"));

    let reloaded = dataset::load_flat(&out, "train").unwrap();
    assert_eq!(reloaded, decoded);
}

#[test]
fn corrupt_idx_is_a_format_error() {
    let (mut images, labels) = idx_bytes(&synthetic_set(5));
    images.pop();
    match dataset::decode_idx(&images, &labels, 10) {
        Err(Error::Format { .. }) => {}
        other => panic!("expected format error, got {:?}", other.map(|d| d.len())),
    }
}

#[test]
fn subset_larger_than_pool_fails() {
    let ds = synthetic_set(6);
    let err = dataset::subset(&ds, 11, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, Error::InsufficientSamples { requested: 11, available: 10 }));
}

#[test]
fn export_then_import_through_a_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let topology = NetworkTopology::original();
    let network = Network::new(topology.clone(), &mut StdRng::seed_from_u64(8));

    let checkpoint = Checkpoint {
        topology: TopologyVariant::Original,
        epoch: 3,
        accuracy: 0.5,
        parameters: network.parameters(),
    };
    let ckpt_path = dir.path().join("best_model.json");
    checkpoint.save_json(&ckpt_path).unwrap();
    let loaded = Checkpoint::load_json(&ckpt_path).unwrap();

    let weights = dir.path().join("weights");
    let map = WeightFileMap::hardware_default(&topology);
    export_weights(&loaded.parameters, &topology, &map, &weights).unwrap();

    let sizes = [
        ("conv1_weights.bin", 16 * 9),
        ("conv1_bias.bin", 16),
        ("conv2_weights.bin", 32 * 16 * 9),
        ("conv2_bias.bin", 32),
        ("fc1_weights.bin", 128 * 800),
        ("fc1_bias.bin", 128),
        ("fc2_weights.bin", 10 * 128),
        ("fc2_bias.bin", 10),
    ];
    for (file, count) in sizes {
        assert_eq!(fs::metadata(weights.join(file)).unwrap().len(), count as u64 * 4, "{}", file);
    }

    let text = fs::read_to_string(weights.join(MANIFEST_FILE)).unwrap();
    assert!(text.starts_with("HLS CNN Weights\n"));
    assert!(text.contains("fc1_weights: (128, 800) -> fc1_weights.bin"));
    assert!(text.contains("fc2_bias: (10,) -> fc2_bias.bin"));
    assert_eq!(read_manifest(&weights).unwrap().topology, TopologyVariant::Original);

    assert_eq!(import_weights(&weights).unwrap(), network.parameters());
}

#[test]
fn incomplete_export_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let topology = NetworkTopology::optimized();
    let mut params = Network::new(topology.clone(), &mut StdRng::seed_from_u64(9)).parameters();
    params.layers.pop();

    let weights = dir.path().join("weights");
    let map = WeightFileMap::hardware_default(&topology);
    let err = export_weights(&params, &topology, &map, &weights).unwrap_err();
    match err {
        Error::IncompleteExport { tensor, .. } => assert_eq!(tensor, "fc2_weights"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!weights.join(MANIFEST_FILE).exists());
    assert!(!weights.join("conv1_weights.bin").exists());
}
