//! Reward-weighted adjoint matching loss over translations and rotations.
//!
//! Per manifold, the loss term for one example is
//! \[
//! \frac{w}{|M|}\sum_{i \in M}\big\| b(x_t, t)_i + \sigma_t\, a_i \big\|^2
//! \]
//! where \(b\) is the reward-weighted drift toward the model's prediction, \(a\) the costate from
//! [`crate::adjoint`], \(\sigma_t\) the schedule's diffusion coefficient and \(M\) the set of valid,
//! generated residues.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use tracing::warn;

use crate::adjoint::{solve_adjoint_state, AdjointConfig, DriftField, PointOf};
use crate::backbone::{AtomReconstruction, IdealBackbone};
use crate::batch::{clamp_ceiling, residue_count, to_host, zero_masked, FramePredictor, NoisyBatch};
use crate::drift::{RotationDrift, TranslationDrift};
use crate::reward::{structure_reward, RewardConfig, BACKBONE_ATOMS};
use crate::schedule::MemorylessLinearSchedule;
use crate::{Error, Result};

/// Ceiling applied to the translation and auxiliary losses.
///
/// Bounds the `1 / (1 - t)` singularity of the translation drift as `t → 1`.
pub const LOSS_CEILING: f32 = 5.0;

/// Loss weights and solver settings.
#[derive(Debug, Clone)]
pub struct LossConfig {
    pub translation_loss_weight: f32,
    pub rotation_loss_weight: f32,
    /// Auxiliary backbone-atom regression; `0` disables it.
    pub aux_loss_weight: f32,
    /// The auxiliary loss applies to examples whose translation time exceeds this.
    pub aux_loss_t_pass: f32,
    /// Floor on `1 - t` in the translation drift.
    pub drift_time_floor: f32,
    pub reward: RewardConfig,
    pub adjoint: AdjointConfig,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            translation_loss_weight: 1.0,
            rotation_loss_weight: 1.0,
            aux_loss_weight: 1.0,
            aux_loss_t_pass: 0.5,
            drift_time_floor: 1e-2,
            reward: RewardConfig::default(),
            adjoint: AdjointConfig::default(),
        }
    }
}

/// Every per-example value produced by one loss evaluation (`[E]` each).
#[derive(Debug, Clone)]
pub struct LossRecord<B: Backend> {
    pub trans_loss: Tensor<B, 1>,
    pub rots_vf_loss: Tensor<B, 1>,
    pub auxiliary_loss: Tensor<B, 1>,
    pub se3_vf_loss: Tensor<B, 1>,
    pub validity_reward: Tensor<B, 1>,
    pub diversity_reward: Tensor<B, 1>,
    pub total_reward: Tensor<B, 1>,
}

impl<B: Backend> LossRecord<B> {
    /// `(name, values)` pairs in a stable order.
    pub fn entries(&self) -> [(&'static str, Tensor<B, 1>); 7] {
        [
            ("trans_loss", self.trans_loss.clone()),
            ("auxiliary_loss", self.auxiliary_loss.clone()),
            ("rots_vf_loss", self.rots_vf_loss.clone()),
            ("se3_vf_loss", self.se3_vf_loss.clone()),
            ("diversity_reward", self.diversity_reward.clone()),
            ("validity_reward", self.validity_reward.clone()),
            ("total_reward", self.total_reward.clone()),
        ]
    }
}

/// Unweighted per-example loss term for one manifold.
///
/// `sigma` is `[E, 1]`; `mask` is `[E, R]`. The result is
/// `Σ_{masked residues, coords} (b(x_t, t) + σ a)² / (number of valid residues)`.
pub fn manifold_loss<B, F>(
    field: &F,
    x_t: &PointOf<B, F>,
    t: &Tensor<B, 2>,
    sigma: Tensor<B, 2>,
    mask: &Tensor<B, 2>,
    cfg: &AdjointConfig,
) -> Result<Tensor<B, 1>>
where
    B: Backend,
    F: DriftField<B> + ?Sized,
{
    let [e, r] = mask.dims();
    let costate = solve_adjoint_state(field, x_t, t, mask, cfg)?;
    let vf = field.drift(x_t, t)?;
    let term = zero_masked(vf + costate * sigma.reshape([e, 1, 1]), mask);
    let sq = term.powf_scalar(2.0).reshape([e, r * 3]).sum_dim(1).reshape([e]);
    Ok(sq / residue_count(mask))
}

/// Fails with [`Error::EmptyBatch`] naming the first example without a contributing residue.
pub fn check_loss_mask<B: Backend>(loss_mask: &Tensor<B, 2>) -> Result<()> {
    let counts = to_host(residue_count(loss_mask))?;
    if let Some(example) = counts.iter().position(|&n| n.is_nan() || n < 1.0) {
        warn!(example, "empty batch encountered");
        return Err(Error::EmptyBatch { example });
    }
    Ok(())
}

/// Fails with [`Error::NonFiniteLoss`] naming the first non-finite example.
pub fn check_finite<B: Backend>(loss: &Tensor<B, 1>) -> Result<()> {
    let values = to_host(loss.clone())?;
    if let Some(example) = values.iter().position(|x| !x.is_finite()) {
        warn!(example, value = values[example], "non-finite loss encountered");
        return Err(Error::NonFiniteLoss { example });
    }
    Ok(())
}

/// The loss assembly: reward, schedule, adjoint solves, auxiliary loss, validation.
#[derive(Debug, Clone, Default)]
pub struct AdjointMatchingLoss<A = IdealBackbone> {
    pub cfg: LossConfig,
    pub atoms: A,
}

impl AdjointMatchingLoss<IdealBackbone> {
    pub fn new(cfg: LossConfig) -> Self {
        Self {
            cfg,
            atoms: IdealBackbone,
        }
    }
}

impl<A> AdjointMatchingLoss<A> {
    /// Use a different atom reconstruction.
    pub fn with_atoms<A2>(self, atoms: A2) -> AdjointMatchingLoss<A2> {
        AdjointMatchingLoss {
            cfg: self.cfg,
            atoms,
        }
    }

    /// Run the model on `batch` and compute the full loss record.
    ///
    /// Errors:
    /// - [`Error::EmptyBatch`] before the model runs, if an example has no valid generated residue;
    /// - [`Error::NonFiniteLoss`] if any example's total loss is NaN or infinite.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(examples = batch.num_examples(), residues = batch.num_residues())
    )]
    pub fn model_step<B, M>(&self, model: &M, batch: &NoisyBatch<B>) -> Result<LossRecord<B>>
    where
        B: Backend,
        M: FramePredictor<B> + ?Sized,
        A: AtomReconstruction<B>,
    {
        let cfg = &self.cfg;
        let loss_mask = batch.loss_mask();
        check_loss_mask(&loss_mask)?;
        let [e, r] = loss_mask.dims();

        let out = model.predict(batch);

        let pred_atoms = self
            .atoms
            .backbone_atoms(out.pred_trans.clone(), out.pred_rotmats.clone())
            .narrow(2, 0, BACKBONE_ATOMS);
        let reward = structure_reward(pred_atoms.clone(), &cfg.reward);

        let schedule = MemorylessLinearSchedule;
        let coeffs = schedule.coefficients(batch.r3_t.clone());

        let trans_field =
            TranslationDrift::new(out.pred_trans.clone(), reward.total.clone(), cfg.drift_time_floor);
        let trans_loss = manifold_loss(
            &trans_field,
            &batch.trans_t,
            &batch.r3_t,
            coeffs.sigma,
            &loss_mask,
            &cfg.adjoint,
        )?
        .mul_scalar(cfg.translation_loss_weight);
        let trans_loss = clamp_ceiling(trans_loss, LOSS_CEILING);

        let rot_field = RotationDrift::new(out.pred_rotmats.clone(), reward.total.clone());
        let rots_vf_loss = manifold_loss(
            &rot_field,
            &batch.rotmats_t,
            &batch.so3_t,
            schedule.rotation_sigma(batch.so3_t.clone()),
            &loss_mask,
            &cfg.adjoint,
        )?
        .mul_scalar(cfg.rotation_loss_weight);

        let auxiliary_loss = if cfg.aux_loss_weight > 0.0 {
            let gt_atoms = self
                .atoms
                .backbone_atoms(batch.trans_1.clone(), batch.rotmats_1.clone())
                .narrow(2, 0, BACKBONE_ATOMS);
            let sq = zero_masked((gt_atoms - pred_atoms).powf_scalar(2.0), &loss_mask)
                .reshape([e, r * BACKBONE_ATOMS * 3])
                .sum_dim(1)
                .reshape([e]);
            let bb_atom_loss = sq / residue_count(&loss_mask).mul_scalar(BACKBONE_ATOMS as f32);
            let aux = clamp_ceiling(
                bb_atom_loss.mul_scalar(cfg.aux_loss_weight) * reward.total.clone(),
                LOSS_CEILING,
            );
            let not_passed = batch
                .r3_t
                .clone()
                .reshape([e])
                .lower_equal_elem(cfg.aux_loss_t_pass);
            aux.mask_fill(not_passed, 0.0)
        } else {
            Tensor::zeros([e], &loss_mask.device())
        };

        let se3_vf_loss = trans_loss.clone() + rots_vf_loss.clone() + auxiliary_loss.clone();
        check_finite(&se3_vf_loss)?;

        Ok(LossRecord {
            trans_loss,
            rots_vf_loss,
            auxiliary_loss,
            se3_vf_loss,
            validity_reward: reward.validity,
            diversity_reward: reward.diversity,
            total_reward: reward.total,
        })
    }
}
