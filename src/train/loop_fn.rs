use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::dataset::RawDataset;
use crate::error::{Error, Result};
use crate::loss::{argmax, CrossEntropyLoss};
use crate::network::network::{Checkpoint, Network};
use crate::network::params::Gradients;
use crate::network::topology::Shape;
use crate::optim::Adam;
use crate::train::epoch_stats::EpochStats;
use crate::train::train_config::TrainConfig;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Best-so-far tracking carried from one epoch to the next.
///
/// `best` starts empty, so the first evaluated epoch always captures.
#[derive(Debug, Clone, Default)]
pub struct TrainState {
    pub best: Option<Checkpoint>,
    /// How many times `best` has been replaced.
    pub captures: usize,
}

impl TrainState {
    pub fn best_accuracy(&self) -> Option<f64> {
        self.best.as_ref().map(|c| c.accuracy)
    }

    /// Replaces the best checkpoint when `accuracy` strictly beats it.
    /// Returns whether a capture happened.
    fn offer(&mut self, network: &Network, epoch: usize, accuracy: f64) -> bool {
        let improved = match self.best_accuracy() {
            None => true,
            Some(best) => accuracy > best,
        };
        if improved {
            self.best = Some(Checkpoint {
                topology: network.topology().variant(),
                epoch,
                accuracy,
                parameters: network.parameters(),
            });
            self.captures += 1;
        }
        improved
    }
}

/// Loss and accuracy of a network over a whole dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    pub correct: usize,
    pub total: usize,
}

/// Outcome of a full `train` run. The network passed to `train` holds the
/// final parameters; the best ones live in `state.best`.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub history: Vec<EpochStats>,
    pub state: TrainState,
}

impl TrainReport {
    pub fn best(&self) -> Option<&Checkpoint> {
        self.state.best.as_ref()
    }

    pub fn captures(&self) -> usize {
        self.state.captures
    }
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Trains `network` for `config.epochs` epochs with Adam and softmax
/// cross-entropy, evaluating on `eval_set` after every epoch.
///
/// Both datasets are checked against the topology before the first update.
pub fn train(
    network: &mut Network,
    train_set: &RawDataset,
    eval_set: &RawDataset,
    config: &TrainConfig,
) -> Result<TrainReport> {
    check_dataset(network, train_set, "training set")?;
    check_dataset(network, eval_set, "evaluation set")?;
    if train_set.is_empty() {
        return Err(Error::InsufficientSamples { requested: 1, available: 0 });
    }
    if config.batch_size == 0 {
        return Err(Error::shape("batch size", "at least 1", 0));
    }

    info!(
        topology = %network.topology().variant(),
        train = train_set.len(),
        eval = eval_set.len(),
        epochs = config.epochs,
        batch_size = config.batch_size,
        lr = config.learning_rate,
        seed = config.seed,
        "starting training"
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut optimizer =
        Adam::with_betas(config.learning_rate, config.beta1, config.beta2, config.epsilon);
    let mut state = TrainState::default();
    let mut history = Vec::with_capacity(config.epochs);

    for epoch in 1..=config.epochs {
        let (stats, next) = run_epoch(
            network,
            &mut optimizer,
            train_set,
            eval_set,
            config,
            epoch,
            &mut rng,
            state,
        )?;
        state = next;
        history.push(stats);
    }

    if let Some(best) = &state.best {
        info!(
            epoch = best.epoch,
            accuracy = best.accuracy,
            captures = state.captures,
            "training finished"
        );
    }
    Ok(TrainReport { history, state })
}

/// One shuffled pass over `train_set` followed by an evaluation pass.
///
/// Takes the best-checkpoint state by value and hands back the updated one.
#[allow(clippy::too_many_arguments)]
pub fn run_epoch(
    network: &mut Network,
    optimizer: &mut Adam,
    train_set: &RawDataset,
    eval_set: &RawDataset,
    config: &TrainConfig,
    epoch: usize,
    rng: &mut StdRng,
    mut state: TrainState,
) -> Result<(EpochStats, TrainState)> {
    let t_start = Instant::now();

    let mut indices: Vec<usize> = (0..train_set.len()).collect();
    indices.shuffle(rng);

    let mut total_loss = 0.0f64;
    let mut correct = 0usize;
    for (batch_no, batch) in indices.chunks(config.batch_size.max(1)).enumerate() {
        let (loss, hits) = train_batch(network, optimizer, train_set, batch)?;
        debug!(epoch, batch = batch_no, loss = loss / batch.len() as f64, "batch");
        total_loss += loss;
        correct += hits;
    }

    let eval = evaluate(network, eval_set)?;
    let captured = state.offer(network, epoch, eval.accuracy);

    let n = train_set.len().max(1) as f64;
    let stats = EpochStats {
        epoch,
        total_epochs: config.epochs,
        train_loss: total_loss / n,
        train_accuracy: correct as f64 / n,
        eval_loss: eval.loss,
        eval_accuracy: eval.accuracy,
        captured,
        elapsed_ms: t_start.elapsed().as_millis() as u64,
    };

    info!(
        "epoch {}/{}: train loss {:.4} acc {:.2}% | eval loss {:.4} acc {:.2}%",
        epoch,
        config.epochs,
        stats.train_loss,
        stats.train_accuracy * 100.0,
        stats.eval_loss,
        stats.eval_accuracy * 100.0
    );
    if captured {
        info!(epoch, accuracy = eval.accuracy, "captured best checkpoint");
    }
    Ok((stats, state))
}

/// Mean cross-entropy and argmax accuracy of `network` over `dataset`.
/// An empty dataset evaluates to zero loss and zero accuracy.
pub fn evaluate(network: &Network, dataset: &RawDataset) -> Result<Evaluation> {
    check_dataset(network, dataset, "evaluation set")?;
    let per_sample = (0..dataset.len())
        .into_par_iter()
        .map(|i| -> Result<(f64, bool)> {
            let logits = network.infer(dataset.image(i))?;
            let target = dataset.label(i);
            Ok((
                CrossEntropyLoss::loss(&logits, target) as f64,
                argmax(&logits) == target,
            ))
        })
        .collect::<Result<Vec<(f64, bool)>>>()?;

    let total = per_sample.len();
    let loss_sum: f64 = per_sample.iter().map(|(l, _)| l).sum();
    let correct = per_sample.iter().filter(|(_, hit)| *hit).count();
    let denom = total.max(1) as f64;
    Ok(Evaluation {
        loss: loss_sum / denom,
        accuracy: correct as f64 / denom,
        correct,
        total,
    })
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Computes per-sample gradients in parallel, sums them in sample order,
/// averages and applies one Adam step. Returns the summed loss and the
/// number of correct predictions seen before the update.
fn train_batch(
    network: &mut Network,
    optimizer: &mut Adam,
    train_set: &RawDataset,
    batch: &[usize],
) -> Result<(f64, usize)> {
    let shared: &Network = network;
    let per_sample = batch
        .par_iter()
        .map(|&i| -> Result<(f64, bool, Gradients)> {
            let trace = shared.train_forward(train_set.image(i))?;
            let target = train_set.label(i);
            let logits = trace.logits();
            let loss = CrossEntropyLoss::loss(logits, target) as f64;
            let hit = argmax(logits) == target;
            let grads = shared.backward(&trace, &CrossEntropyLoss::derivative(logits, target))?;
            Ok((loss, hit, grads))
        })
        .collect::<Result<Vec<(f64, bool, Gradients)>>>()?;

    let mut sum = Gradients::zeros(network.topology());
    let mut loss = 0.0;
    let mut hits = 0;
    for (l, hit, grads) in &per_sample {
        sum.accumulate(grads);
        loss += l;
        hits += usize::from(*hit);
    }
    sum.scale(1.0 / batch.len() as f32);

    optimizer.step(network.tensors_mut(), sum.tensors());
    Ok((loss, hits))
}

/// Fails when the dataset's image size or label space disagrees with the
/// network's input and output.
pub(crate) fn check_dataset(network: &Network, dataset: &RawDataset, role: &str) -> Result<()> {
    let topology = network.topology();
    let found = Shape::Map {
        channels: 1,
        height: dataset.height,
        width: dataset.width,
    };
    if topology.input() != found {
        return Err(Error::shape(
            format!("{} image shape", role),
            topology.input(),
            found,
        ));
    }
    if dataset.num_classes != topology.num_classes() {
        return Err(Error::shape(
            format!("{} class count", role),
            topology.num_classes(),
            dataset.num_classes,
        ));
    }
    Ok(())
}
