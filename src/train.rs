//! One training step around the loss assembly: optional self-conditioning, batch aggregation and
//! a step summary for logging.
//!
//! The loss assembly itself never aggregates or logs; this is the layer that does.

use std::collections::BTreeMap;
use std::time::Instant;

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use ndarray::Array1;
use tracing::info;

use crate::backbone::AtomReconstruction;
use crate::batch::{to_array1, to_host, FramePredictor, NoisyBatch};
use crate::loss::{AdjointMatchingLoss, LossRecord};
use crate::metrics::t_stratified_loss;
use crate::{Error, Result};

/// Step-level knobs.
#[derive(Debug, Clone)]
pub struct TrainStepConfig {
    /// Feed a detached first prediction back as `trans_sc` on about half of the steps.
    pub self_condition: bool,
    /// Time bins for the stratified loss summary.
    pub num_t_bins: usize,
}

impl Default for TrainStepConfig {
    fn default() -> Self {
        Self {
            self_condition: true,
            num_t_bins: 4,
        }
    }
}

/// Host-side aggregates of one step.
#[derive(Debug, Clone, Default)]
pub struct StepSummary {
    /// Batch mean of every loss-record entry, keyed by entry name.
    pub means: BTreeMap<String, f32>,
    /// Per-entry means over time bins (see [`t_stratified_loss`]).
    pub stratified: BTreeMap<String, f32>,
    pub r3_t: f32,
    pub so3_t: f32,
    /// Mean of the diffuse mask.
    pub scaffolding_percent: f32,
    /// Mean number of motif (non-diffused) residues per example.
    pub motif_size: f32,
    pub length: usize,
    pub batch_size: usize,
    pub examples_per_second: f32,
    /// Whether this step ran with self-conditioning.
    pub self_conditioned: bool,
}

/// Result of [`training_step`].
#[derive(Debug, Clone)]
pub struct TrainStep<B: Backend> {
    /// Mean total loss, shape `[1]`; call `backward` on it.
    pub loss: Tensor<B, 1>,
    pub record: LossRecord<B>,
    pub summary: StepSummary,
}

/// Replace `trans_sc` with a detached prediction on generated residues and ground truth on motif
/// residues.
pub fn self_condition<B, M>(model: &M, batch: &mut NoisyBatch<B>)
where
    B: Backend,
    M: FramePredictor<B> + ?Sized,
{
    let pred = model.predict(batch).pred_trans.detach();
    let diffuse = batch.diffuse_mask.clone().unsqueeze_dim::<3>(2);
    let motif = diffuse.clone().neg().add_scalar(1.0);
    batch.trans_sc = Some(pred * diffuse + batch.trans_1.clone() * motif);
}

fn mean_of<B: Backend, const D: usize>(t: Tensor<B, D>) -> Result<f32> {
    to_host(t.mean())?
        .first()
        .copied()
        .ok_or(Error::Shape("mean of an empty tensor"))
}

/// Run the loss on one batch and aggregate it.
pub fn training_step<B, M, A>(
    loss_fn: &AdjointMatchingLoss<A>,
    model: &M,
    mut batch: NoisyBatch<B>,
    cfg: &TrainStepConfig,
    rng: &mut impl rand::Rng,
) -> Result<TrainStep<B>>
where
    B: Backend,
    M: FramePredictor<B> + ?Sized,
    A: AtomReconstruction<B>,
{
    let start = Instant::now();

    let self_conditioned = cfg.self_condition && rng.random::<f32>() > 0.5;
    if self_conditioned {
        self_condition(model, &mut batch);
    }

    let record = loss_fn.model_step(model, &batch)?;
    let batch_size = batch.num_examples();
    let length = batch.num_residues();

    let r3_t: Array1<f32> = to_array1(batch.r3_t.clone().reshape([batch_size]))?;
    let so3_t: Array1<f32> = to_array1(batch.so3_t.clone().reshape([batch_size]))?;

    let mut means = BTreeMap::new();
    let mut stratified = BTreeMap::new();
    for (name, values) in record.entries() {
        means.insert(name.to_string(), mean_of(values.clone())?);
        let batch_t = if name == "rots_vf_loss" { &so3_t } else { &r3_t };
        let host = to_array1(values)?;
        stratified.extend(t_stratified_loss(
            &batch_t.view(),
            &host.view(),
            cfg.num_t_bins,
            name,
        )?);
    }

    let scaffolding_percent = mean_of(batch.diffuse_mask.clone())?;
    let motif_size = mean_of(
        batch
            .diffuse_mask
            .clone()
            .neg()
            .add_scalar(1.0)
            .sum_dim(1),
    )?;

    let loss = record.se3_vf_loss.clone().mean();
    let elapsed = start.elapsed().as_secs_f32().max(f32::EPSILON);
    let summary = StepSummary {
        r3_t: r3_t.mean().unwrap_or(0.0),
        so3_t: so3_t.mean().unwrap_or(0.0),
        means,
        stratified,
        scaffolding_percent,
        motif_size,
        length,
        batch_size,
        examples_per_second: batch_size as f32 / elapsed,
        self_conditioned,
    };

    info!(
        loss = summary.means.get("se3_vf_loss").copied().unwrap_or(f32::NAN),
        trans_loss = summary.means.get("trans_loss").copied().unwrap_or(f32::NAN),
        rots_vf_loss = summary.means.get("rots_vf_loss").copied().unwrap_or(f32::NAN),
        total_reward = summary.means.get("total_reward").copied().unwrap_or(f32::NAN),
        batch_size,
        length,
        examples_per_second = summary.examples_per_second,
        "train step"
    );

    Ok(TrainStep {
        loss,
        record,
        summary,
    })
}
