//! Differentiable structure reward: geometric validity plus conformational diversity.
//!
//! Input is backbone atoms `[E, R, A, 3]` (A ≥ 3; only N, CA, C are read). Output is one
//! non-negative value per example. Scale grows with structure size: diversity is an unnormalized
//! mean distance, so downstream code may only treat the reward as a multiplicative weight.
//!
//! Every residue is scored, padding included; masks are applied by the loss, not here.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

/// Backbone atoms read per residue.
pub const BACKBONE_ATOMS: usize = 3;

/// Reward weights and the plausible bond-length window (Å).
#[derive(Debug, Clone)]
pub struct RewardConfig {
    pub diversity_weight: f32,
    pub validity_weight: f32,
    /// Exclusive lower bound of a plausible intra-residue spacing.
    pub bond_min: f32,
    /// Exclusive upper bound of a plausible intra-residue spacing.
    pub bond_max: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            diversity_weight: 2.0,
            validity_weight: 1.0,
            bond_min: 1.0,
            bond_max: 2.0,
        }
    }
}

/// Per-example reward terms, all `[E]`.
#[derive(Debug, Clone)]
pub struct RewardBreakdown<B: Backend> {
    pub validity: Tensor<B, 1>,
    pub diversity: Tensor<B, 1>,
    pub total: Tensor<B, 1>,
}

/// Fraction of consecutive backbone spacings inside `(bond_min, bond_max)`, per example.
///
/// This is an indicator average and carries no gradient.
pub fn validity_reward<B: Backend>(atoms: Tensor<B, 4>, cfg: &RewardConfig) -> Tensor<B, 1> {
    let [e, r, _, _] = atoms.dims();
    let bb = atoms.narrow(2, 0, BACKBONE_ATOMS);
    let bonds = bb.clone().narrow(2, 1, BACKBONE_ATOMS - 1) - bb.narrow(2, 0, BACKBONE_ATOMS - 1);
    // Compare squared lengths; no sqrt needed for an indicator.
    let len2 = bonds.powf_scalar(2.0).sum_dim(3);
    let above = len2.clone().greater_elem(cfg.bond_min * cfg.bond_min).float();
    let below = len2.lower_elem(cfg.bond_max * cfg.bond_max).float();
    (above * below)
        .reshape([e, r * (BACKBONE_ATOMS - 1)])
        .mean_dim(1)
        .reshape([e])
        .detach()
}

/// Mean pairwise Euclidean distance over all backbone atoms of each example.
pub fn diversity_reward<B: Backend>(atoms: Tensor<B, 4>) -> Tensor<B, 1> {
    let [e, r, _, _] = atoms.dims();
    let device = atoms.device();
    let n = r * BACKBONE_ATOMS;
    let flat = atoms.narrow(2, 0, BACKBONE_ATOMS).reshape([e, n, 3]);

    let diff = flat.clone().unsqueeze_dim::<4>(2) - flat.unsqueeze_dim::<4>(1);
    let d2 = diff.powf_scalar(2.0).sum_dim(3).reshape([e, n, n]);

    let mut eye = vec![0.0f32; n * n];
    for i in 0..n {
        eye[i * n + i] = 1.0;
    }
    let eye = Tensor::<B, 3>::from_data(TensorData::new(eye, [1, n, n]), &device);
    // The diagonal is lifted off zero before the sqrt and zeroed after it, so its gradient is 0
    // rather than NaN. The floor does the same for coincident off-diagonal atoms.
    let dist = (d2 + eye.clone()).clamp_min(1e-12).sqrt() * eye.neg().add_scalar(1.0);
    dist.reshape([e, n * n]).mean_dim(1).reshape([e])
}

/// `diversity_weight · diversity + validity_weight · validity`.
pub fn structure_reward<B: Backend>(atoms: Tensor<B, 4>, cfg: &RewardConfig) -> RewardBreakdown<B> {
    let validity = validity_reward(atoms.clone(), cfg);
    let diversity = diversity_reward(atoms);
    let total = diversity.clone().mul_scalar(cfg.diversity_weight)
        + validity.clone().mul_scalar(cfg.validity_weight);
    RewardBreakdown {
        validity,
        diversity,
        total,
    }
}
