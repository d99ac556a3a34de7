use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;

use hls_cnn_prep::dataset::{self, RawDataset};
use hls_cnn_prep::export::read_manifest;
use hls_cnn_prep::network::summary::compare;
use hls_cnn_prep::train::evaluate_hardware;
use hls_cnn_prep::{
    export_weights, import_weights, train, Checkpoint, HardwareNumerics, ModelSummary, Network,
    NetworkTopology, TopologyVariant, TrainConfig, WeightFileMap,
};

const NUM_CLASSES: usize = 10;
const VALIDATION_SIZE: usize = 100;
const QUICK_TEST_SIZE: usize = 10;
const CHECKPOINT_FILE: &str = "best_model.json";

/// Dataset preparation, training and weight export for the HLS CNN engine.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert the MNIST IDX files into flat train/test/validation/quick_test sets.
    Prepare {
        /// Directory holding train-images-idx3-ubyte[.gz] and friends.
        #[clap(long, env = "HLS_CNN_RAW_DIR", default_value = "data")]
        raw_dir: PathBuf,
        #[clap(long, env = "HLS_CNN_DATA_DIR", default_value = "data")]
        data_dir: PathBuf,
        /// Seed for the validation and quick_test draws.
        #[clap(long, env = "HLS_CNN_SEED", default_value_t = 42)]
        seed: u64,
    },
    /// Draw a seeded random subset of an existing flat dataset.
    Subset {
        #[clap(long, env = "HLS_CNN_DATA_DIR", default_value = "data")]
        data_dir: PathBuf,
        /// Prefix of the dataset to draw from.
        #[clap(long, env = "HLS_CNN_SOURCE", default_value = "test")]
        source: String,
        /// Prefix to write the subset under.
        #[clap(long, env = "HLS_CNN_PREFIX")]
        prefix: String,
        #[clap(long, env = "HLS_CNN_COUNT")]
        count: usize,
        #[clap(long, env = "HLS_CNN_SEED", default_value_t = 42)]
        seed: u64,
    },
    /// Train a topology on the flat train set and export its weights.
    Train {
        #[clap(long, env = "HLS_CNN_DATA_DIR", default_value = "data")]
        data_dir: PathBuf,
        #[clap(long, env = "HLS_CNN_WEIGHTS_DIR", default_value = "weights")]
        weights_dir: PathBuf,
        #[clap(long, env = "HLS_CNN_TOPOLOGY", default_value = "original")]
        topology: TopologyVariant,
        #[clap(long, env = "HLS_CNN_EPOCHS", default_value_t = 10)]
        epochs: usize,
        #[clap(long, env = "HLS_CNN_BATCH_SIZE", default_value_t = 64)]
        batch_size: usize,
        #[clap(long, env = "HLS_CNN_LR", default_value_t = 0.001)]
        lr: f32,
        #[clap(long, env = "HLS_CNN_SEED", default_value_t = 42)]
        seed: u64,
        /// Which parameters to export once training ends.
        #[clap(long, env = "HLS_CNN_EXPORT_SOURCE", value_enum, default_value = "best")]
        export_source: ExportSource,
    },
    /// Export the weights stored in a checkpoint.
    Export {
        #[clap(long, env = "HLS_CNN_CHECKPOINT")]
        checkpoint: PathBuf,
        #[clap(long, env = "HLS_CNN_WEIGHTS_DIR", default_value = "weights")]
        weights_dir: PathBuf,
    },
    /// Score exported weights on a flat dataset in float and fixed point.
    Evaluate {
        #[clap(long, env = "HLS_CNN_WEIGHTS_DIR", default_value = "weights")]
        weights_dir: PathBuf,
        #[clap(long, env = "HLS_CNN_DATA_DIR", default_value = "data")]
        data_dir: PathBuf,
        #[clap(long, env = "HLS_CNN_PREFIX", default_value = "validation")]
        prefix: String,
        /// Defaults to the topology recorded in weights_meta.txt.
        #[clap(long, env = "HLS_CNN_TOPOLOGY")]
        topology: Option<TopologyVariant>,
    },
    /// Compare parameter and MAC counts of the two topologies.
    Summary,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ExportSource {
    /// Parameters of the epoch with the best held-out accuracy.
    Best,
    /// Parameters after the last epoch.
    Final,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Prepare { raw_dir, data_dir, seed } => prepare(&raw_dir, &data_dir, seed),
        Command::Subset {
            data_dir,
            source,
            prefix,
            count,
            seed,
        } => {
            let pool = dataset::load_flat(&data_dir, &source).with_context(|| {
                format!("failed to load `{}` from {}", source, data_dir.display())
            })?;
            let picked = dataset::subset(&pool, count, &mut StdRng::seed_from_u64(seed))
                .with_context(|| format!("failed to draw `{}`", prefix))?;
            dataset::write_flat(&data_dir, &prefix, &picked).context("failed to write subset")?;
            Ok(())
        }
        Command::Train {
            data_dir,
            weights_dir,
            topology,
            epochs,
            batch_size,
            lr,
            seed,
            export_source,
        } => run_training(
            &data_dir,
            &weights_dir,
            topology,
            TrainConfig::new(epochs, batch_size, lr, seed),
            export_source,
        ),
        Command::Export { checkpoint, weights_dir } => {
            let checkpoint = Checkpoint::load_json(&checkpoint)
                .with_context(|| format!("failed to load checkpoint {}", checkpoint.display()))?;
            let topology = NetworkTopology::from_variant(checkpoint.topology);
            export_weights(
                &checkpoint.parameters,
                &topology,
                &WeightFileMap::hardware_default(&topology),
                &weights_dir,
            )
            .context("failed to export weights")?;
            Ok(())
        }
        Command::Evaluate {
            weights_dir,
            data_dir,
            prefix,
            topology,
        } => run_evaluation(&weights_dir, &data_dir, &prefix, topology),
        Command::Summary => {
            let original = ModelSummary::of(&NetworkTopology::original());
            let optimized = ModelSummary::of(&NetworkTopology::optimized());
            println!("{}", compare(&original, &optimized));
            Ok(())
        }
    }
}

/// Finds `name` or `name.gz` under `dir`.
fn locate_idx(dir: &Path, name: &str) -> Result<PathBuf> {
    let plain = dir.join(name);
    if plain.exists() {
        return Ok(plain);
    }
    let gz = dir.join(format!("{}.gz", name));
    if gz.exists() {
        return Ok(gz);
    }
    bail!("neither {} nor {} exists", plain.display(), gz.display())
}

fn load_idx_pair(dir: &Path, images: &str, labels: &str) -> Result<RawDataset> {
    let image_path = locate_idx(dir, images)?;
    let label_path = locate_idx(dir, labels)?;
    let image_bytes = dataset::read_idx_file(&image_path)?;
    let label_bytes = dataset::read_idx_file(&label_path)?;
    dataset::decode_idx(&image_bytes, &label_bytes, NUM_CLASSES)
        .with_context(|| {
            format!("failed to decode {} / {}", image_path.display(), label_path.display())
        })
}

fn prepare(raw_dir: &Path, data_dir: &Path, seed: u64) -> Result<()> {
    let train_set = load_idx_pair(raw_dir, "train-images-idx3-ubyte", "train-labels-idx1-ubyte")?;
    let test_set = load_idx_pair(raw_dir, "t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte")?;
    tracing::info!(
        "training images {}x{}x{}, test images {}x{}x{}",
        train_set.len(),
        train_set.height,
        train_set.width,
        test_set.len(),
        test_set.height,
        test_set.width
    );
    tracing::info!("test label distribution: {:?}", test_set.label_histogram());

    dataset::write_flat(data_dir, "train", &train_set).context("failed to write train set")?;
    dataset::write_flat(data_dir, "test", &test_set).context("failed to write test set")?;

    let mut rng = StdRng::seed_from_u64(seed);
    for (prefix, count) in [("validation", VALIDATION_SIZE), ("quick_test", QUICK_TEST_SIZE)] {
        let picked = dataset::subset(&test_set, count, &mut rng)
            .with_context(|| format!("failed to draw `{}`", prefix))?;
        dataset::write_flat(data_dir, prefix, &picked)
            .with_context(|| format!("failed to write `{}`", prefix))?;
    }
    Ok(())
}

fn run_training(
    data_dir: &Path,
    weights_dir: &Path,
    variant: TopologyVariant,
    config: TrainConfig,
    export_source: ExportSource,
) -> Result<()> {
    let train_set = dataset::load_flat(data_dir, "train").context("failed to load the train set")?;
    let eval_set = dataset::load_flat(data_dir, "test").context("failed to load the test set")?;

    let topology = NetworkTopology::from_variant(variant);
    let summary = ModelSummary::of(&topology);
    tracing::info!("{}", summary);

    let mut network = Network::new(topology.clone(), &mut StdRng::seed_from_u64(config.seed));
    let report = train(&mut network, &train_set, &eval_set, &config).context("training failed")?;

    let best = report.best().context("training produced no checkpoint")?;
    std::fs::create_dir_all(weights_dir)
        .with_context(|| format!("failed to create {}", weights_dir.display()))?;
    let checkpoint_path = weights_dir.join(CHECKPOINT_FILE);
    best.save_json(&checkpoint_path)
        .with_context(|| format!("failed to save {}", checkpoint_path.display()))?;
    tracing::info!(
        "best checkpoint (epoch {}, accuracy {:.2}%) saved to {}",
        best.epoch,
        best.accuracy * 100.0,
        checkpoint_path.display()
    );

    let final_params = network.parameters();
    let params = match export_source {
        ExportSource::Best => &best.parameters,
        ExportSource::Final => &final_params,
    };
    export_weights(params, &topology, &WeightFileMap::hardware_default(&topology), weights_dir)
        .context("failed to export weights")?;
    Ok(())
}

/// The requested topology, or the one the export recorded.
fn resolve_topology(
    weights_dir: &Path,
    requested: Option<TopologyVariant>,
) -> Result<TopologyVariant> {
    if let Some(variant) = requested {
        return Ok(variant);
    }
    let manifest = read_manifest(weights_dir).with_context(|| {
        format!("failed to read the weights manifest in {}", weights_dir.display())
    })?;
    Ok(manifest.topology)
}

fn run_evaluation(
    weights_dir: &Path,
    data_dir: &Path,
    prefix: &str,
    requested: Option<TopologyVariant>,
) -> Result<()> {
    let variant = resolve_topology(weights_dir, requested)?;
    let params = import_weights(weights_dir)
        .with_context(|| format!("failed to import weights from {}", weights_dir.display()))?;
    let network = Network::with_parameters(NetworkTopology::from_variant(variant), &params)
        .with_context(|| {
            format!("weights in {} do not fit the {} topology", weights_dir.display(), variant)
        })?;
    let samples = dataset::load_flat(data_dir, prefix)
        .with_context(|| format!("failed to load `{}` from {}", prefix, data_dir.display()))?;

    let report = evaluate_hardware(&network, &samples, &HardwareNumerics::default())?;
    println!("samples:          {}", report.float.total);
    println!("float accuracy:   {:.2}%", report.float.accuracy * 100.0);
    println!("float loss:       {:.4}", report.float.loss);
    println!("fixed accuracy:   {:.2}%", report.fixed_accuracy * 100.0);
    println!("float/fixed agree: {:.2}%", report.agreement * 100.0);
    Ok(())
}
