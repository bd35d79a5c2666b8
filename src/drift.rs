//! Reward-weighted drift fields toward the model's predicted final frames.
//!
//! Both fields capture the predictions and the per-example reward (`[E]`). Neither is detached:
//! gradients of anything built from these drifts reach the model and the reward.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::adjoint::DriftField;
use crate::manifold::{Euclidean, RotationGroup};
use crate::so3;
use crate::Result;

fn per_example<B: Backend>(reward: &Tensor<B, 1>) -> Tensor<B, 3> {
    let [e] = reward.dims();
    reward.clone().reshape([e, 1, 1])
}

/// `b(x, t) = (pred_trans - x) / max(1 - t, time_floor) · reward`.
///
/// The floor applies to every evaluation: the backward grid, the Jacobian, and the drift at the
/// batch time inside the loss. For `t > 1 - time_floor` the translation loss therefore uses
/// `reward / time_floor` rather than `reward / (1 - t)`, before the loss ceiling.
#[derive(Debug, Clone)]
pub struct TranslationDrift<B: Backend> {
    pred_trans: Tensor<B, 3>,
    reward: Tensor<B, 1>,
    time_floor: f32,
}

impl<B: Backend> TranslationDrift<B> {
    pub fn new(pred_trans: Tensor<B, 3>, reward: Tensor<B, 1>, time_floor: f32) -> Self {
        Self {
            pred_trans,
            reward,
            time_floor,
        }
    }

    /// `reward / max(1 - t, floor)`, shaped `[E, 1, 1]`.
    fn rate(&self, t: &Tensor<B, 2>) -> Tensor<B, 3> {
        let [e, _] = t.dims();
        let remaining = t
            .clone()
            .neg()
            .add_scalar(1.0)
            .clamp_min(self.time_floor)
            .reshape([e, 1, 1]);
        per_example(&self.reward) / remaining
    }
}

impl<B: Backend> DriftField<B> for TranslationDrift<B> {
    type Space = Euclidean;

    fn space(&self) -> &Euclidean {
        &Euclidean
    }

    fn drift(&self, x: &Tensor<B, 3>, t: &Tensor<B, 2>) -> Result<Tensor<B, 3>> {
        Ok((self.pred_trans.clone() - x.clone()) * self.rate(t))
    }

    /// The Jacobian is `-(reward / (1 - t)) I` per residue.
    fn analytic_jvp(
        &self,
        _x: &Tensor<B, 3>,
        t: &Tensor<B, 2>,
        v: Tensor<B, 3>,
    ) -> Result<Option<Tensor<B, 3>>> {
        Ok(Some(v * self.rate(t).neg()))
    }
}

/// `b(R, t) = log(Rᵀ · pred_rotmats) · reward`; time-independent.
#[derive(Debug, Clone)]
pub struct RotationDrift<B: Backend> {
    pred_rotmats: Tensor<B, 4>,
    reward: Tensor<B, 1>,
}

impl<B: Backend> RotationDrift<B> {
    pub fn new(pred_rotmats: Tensor<B, 4>, reward: Tensor<B, 1>) -> Self {
        Self {
            pred_rotmats,
            reward,
        }
    }
}

impl<B: Backend> DriftField<B> for RotationDrift<B> {
    type Space = RotationGroup;

    fn space(&self) -> &RotationGroup {
        &RotationGroup
    }

    fn drift(&self, rot: &Tensor<B, 4>, _t: &Tensor<B, 2>) -> Result<Tensor<B, 3>> {
        Ok(so3::rot_vf(rot.clone(), self.pred_rotmats.clone())? * per_example(&self.reward))
    }
}
