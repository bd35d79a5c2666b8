//! A small per-residue frame predictor and an SGD loop that trains it on the adjoint matching loss.
//!
//! The network sees one residue at a time (no attention, no pair features).

use burn_core as burn;

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use burn_nn::{Linear, LinearConfig, Relu};
use burn_optim::{GradientsParams, LearningRate, Optimizer, SgdConfig};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::batch::{FramePredictor, ModelOutput, NoisyBatch};
use crate::loss::AdjointMatchingLoss;
use crate::so3;
use crate::train::{training_step, TrainStepConfig};
use crate::{BurnBackend, Error, Result};

/// Per-residue input width: `[trans_t (3), rotmats_t (9), trans_sc (3), r3_t, so3_t, 1]`.
pub const FEATURES: usize = 18;

/// Two-layer MLP mapping each residue's noisy frame to a predicted clean frame.
///
/// Output is `[δ (3), ω (3)]`: `pred_trans = trans_t + δ`, `pred_rotmats = rotmats_t · exp(ω)`.
#[derive(Module, Debug)]
pub struct ResidueFrameMlp<B: Backend> {
    l1: Linear<B>,
    l2: Linear<B>,
}

impl<B: Backend> ResidueFrameMlp<B> {
    pub fn new(device: &B::Device, hidden: usize) -> Self {
        let l1 = LinearConfig::new(FEATURES, hidden).init(device);
        let l2 = LinearConfig::new(hidden, 6).init(device);
        Self { l1, l2 }
    }

    /// `[E, R, FEATURES]` residue features for `batch`.
    pub fn features(batch: &NoisyBatch<B>) -> Tensor<B, 3> {
        let (e, r) = (batch.num_examples(), batch.num_residues());
        let device = batch.trans_t.device();
        let per_residue = |t: &Tensor<B, 2>| t.clone().reshape([e, 1, 1]).repeat_dim(1, r);
        let sc = batch
            .trans_sc
            .clone()
            .unwrap_or_else(|| Tensor::zeros([e, r, 3], &device));
        Tensor::cat(
            vec![
                batch.trans_t.clone(),
                batch.rotmats_t.clone().reshape([e, r, 9]),
                sc,
                per_residue(&batch.r3_t),
                per_residue(&batch.so3_t),
                Tensor::ones([e, r, 1], &device),
            ],
            2,
        )
    }

    pub fn forward(&self, batch: &NoisyBatch<B>) -> ModelOutput<B> {
        let h = Relu.forward(self.l1.forward(Self::features(batch)));
        let out = self.l2.forward(h);
        let delta = out.clone().narrow(2, 0, 3);
        let omega = out.narrow(2, 3, 3);
        ModelOutput {
            pred_trans: batch.trans_t.clone() + delta,
            pred_rotmats: so3::retract(batch.rotmats_t.clone(), omega),
        }
    }
}

impl<B: Backend> FramePredictor<B> for ResidueFrameMlp<B> {
    fn predict(&self, batch: &NoisyBatch<B>) -> ModelOutput<B> {
        self.forward(batch)
    }
}

/// Settings for [`fit_adjoint_matching_sgd`].
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub steps: usize,
    pub hidden: usize,
    pub lr: LearningRate,
    /// Seeds the self-conditioning coin flips. Weight init uses burn's own RNG.
    pub seed: u64,
    pub step: TrainStepConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            steps: 100,
            hidden: 64,
            lr: 1e-3,
            seed: 0,
            step: TrainStepConfig::default(),
        }
    }
}

/// Train a [`ResidueFrameMlp`] with plain SGD, cycling through `batches`.
///
/// Returns the model and the per-step mean `se3_vf_loss`. Any step error (empty example,
/// non-finite loss) aborts training.
pub fn fit_adjoint_matching_sgd(
    device: &<BurnBackend as Backend>::Device,
    batches: &[NoisyBatch<BurnBackend>],
    loss_fn: &AdjointMatchingLoss,
    cfg: &FitConfig,
) -> Result<(ResidueFrameMlp<BurnBackend>, Vec<f32>)> {
    if batches.is_empty() {
        return Err(Error::Domain("batches must be non-empty"));
    }
    if cfg.hidden == 0 {
        return Err(Error::Domain("hidden must be >= 1"));
    }
    if !cfg.lr.is_finite() || cfg.lr <= 0.0 {
        return Err(Error::Domain("lr must be finite and > 0"));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    let mut model = ResidueFrameMlp::<BurnBackend>::new(device, cfg.hidden);
    let mut optim = SgdConfig::new().init::<BurnBackend, ResidueFrameMlp<BurnBackend>>();
    let mut history = Vec::with_capacity(cfg.steps);

    for (step, batch) in batches.iter().cycle().take(cfg.steps).enumerate() {
        let out = training_step(loss_fn, &model, batch.clone(), &cfg.step, &mut rng)?;
        let loss = out
            .summary
            .means
            .get("se3_vf_loss")
            .copied()
            .unwrap_or(f32::NAN);
        tracing::debug!(step, loss, "sgd step");
        history.push(loss);

        let grads = GradientsParams::from_grads(out.loss.backward(), &model);
        model = optim.step(cfg.lr, model, grads);
    }

    Ok((model, history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;

    fn random_batch(device: &<BurnBackend as Backend>::Device, e: usize, r: usize) -> NoisyBatch<BurnBackend> {
        let normal = Distribution::Normal(0.0, 1.0);
        let t = Tensor::<BurnBackend, 2>::full([e, 1], 0.6, device);
        NoisyBatch {
            res_mask: Tensor::ones([e, r], device),
            diffuse_mask: Tensor::ones([e, r], device),
            trans_t: Tensor::random([e, r, 3], normal, device),
            rotmats_t: so3::exp_map(Tensor::random([e, r, 3], normal, device)),
            r3_t: t.clone(),
            so3_t: t,
            trans_1: Tensor::random([e, r, 3], normal, device),
            rotmats_1: so3::exp_map(Tensor::random([e, r, 3], normal, device)),
            trans_sc: None,
        }
    }

    #[test]
    fn forward_shapes_and_rotations_stay_orthonormal() {
        let device = Default::default();
        let batch = random_batch(&device, 2, 5);
        assert_eq!(ResidueFrameMlp::features(&batch).dims(), [2, 5, FEATURES]);

        let model = ResidueFrameMlp::<BurnBackend>::new(&device, 8);
        let out = model.predict(&batch);
        assert_eq!(out.pred_trans.dims(), [2, 5, 3]);
        assert_eq!(out.pred_rotmats.dims(), [2, 5, 3, 3]);

        let r = out.pred_rotmats;
        let rtr = r.clone().swap_dims(2, 3).matmul(r);
        let eye = so3::exp_map(Tensor::<BurnBackend, 3>::zeros([2, 5, 3], &device));
        let err = crate::batch::to_host((rtr - eye).abs().max()).unwrap()[0];
        assert!(err < 1e-4, "orthonormality error {err}");
    }

    #[test]
    fn sgd_smoke_produces_finite_history() {
        let device = Default::default();
        let batches = vec![random_batch(&device, 2, 4)];
        let cfg = FitConfig {
            steps: 2,
            hidden: 8,
            lr: 1e-4,
            ..Default::default()
        };
        let (_model, history) =
            fit_adjoint_matching_sgd(&device, &batches, &AdjointMatchingLoss::default(), &cfg).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn empty_batch_list_is_rejected() {
        let device = Default::default();
        let res = fit_adjoint_matching_sgd(&device, &[], &AdjointMatchingLoss::default(), &FitConfig::default());
        assert!(matches!(res, Err(Error::Domain(_))));
    }
}
