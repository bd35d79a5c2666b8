//! State spaces the adjoint solver integrates over.
//!
//! A state space only has to know how to move a point along a per-residue tangent vector
//! (`[E, R, 3]`) and how to cut a point loose from the autodiff graph. That covers both the
//! shadow forward Euler step and the perturbations used by central-difference JVPs.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::so3;

/// Per-residue state space with a retraction.
pub trait StateSpace<B: Backend> {
    /// Batched point, e.g. `[E, R, 3]` translations or `[E, R, 3, 3]` rotations.
    type Point: Clone;

    /// Move `point` along the tangent vector `v` (`[E, R, 3]`).
    fn retract(&self, point: Self::Point, v: Tensor<B, 3>) -> Self::Point;

    /// Same point, without gradient history.
    fn detach(&self, point: Self::Point) -> Self::Point;
}

/// `R^3` per residue; retraction is addition.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl<B: Backend> StateSpace<B> for Euclidean {
    type Point = Tensor<B, 3>;

    fn retract(&self, point: Tensor<B, 3>, v: Tensor<B, 3>) -> Tensor<B, 3> {
        point + v
    }

    fn detach(&self, point: Tensor<B, 3>) -> Tensor<B, 3> {
        point.detach()
    }
}

/// `SO(3)` per residue; retraction is `R · exp(v^)` (body-frame tangent vectors).
#[derive(Debug, Clone, Copy, Default)]
pub struct RotationGroup;

impl<B: Backend> StateSpace<B> for RotationGroup {
    type Point = Tensor<B, 4>;

    fn retract(&self, point: Tensor<B, 4>, v: Tensor<B, 3>) -> Tensor<B, 4> {
        so3::retract(point, v)
    }

    fn detach(&self, point: Tensor<B, 4>) -> Tensor<B, 4> {
        point.detach()
    }
}
