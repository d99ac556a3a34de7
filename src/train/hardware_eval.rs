use rayon::prelude::*;

use crate::dataset::RawDataset;
use crate::error::Result;
use crate::loss::argmax;
use crate::network::network::Network;
use crate::network::quant::HardwareNumerics;
use crate::train::loop_fn::{check_dataset, evaluate, Evaluation};

/// Float accuracy next to what the fixed-point engine would score on the
/// same samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardwareEvaluation {
    pub float: Evaluation,
    pub fixed_accuracy: f64,
    /// Fraction of samples where both paths predict the same class.
    pub agreement: f64,
}

pub fn evaluate_hardware(
    network: &Network,
    dataset: &RawDataset,
    numerics: &HardwareNumerics,
) -> Result<HardwareEvaluation> {
    check_dataset(network, dataset, "hardware evaluation set")?;
    let float = evaluate(network, dataset)?;

    let per_sample = (0..dataset.len())
        .into_par_iter()
        .map(|i| -> Result<(bool, bool)> {
            let image = dataset.image(i);
            let fixed = argmax(&network.export_forward(image, numerics)?);
            let float = argmax(&network.infer(image)?);
            Ok((fixed == dataset.label(i), fixed == float))
        })
        .collect::<Result<Vec<(bool, bool)>>>()?;

    let n = per_sample.len().max(1) as f64;
    Ok(HardwareEvaluation {
        float,
        fixed_accuracy: per_sample.iter().filter(|(hit, _)| *hit).count() as f64 / n,
        agreement: per_sample.iter().filter(|(_, same)| *same).count() as f64 / n,
    })
}
