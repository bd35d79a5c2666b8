//! Rotation-group utilities on batched residue frames.
//!
//! Everything here is built from differentiable tensor ops, because the rotation drift and its
//! Jacobian-vector product live on the autodiff graph.
//!
//! Shapes: tangent vectors `[E, R, 3]`, rotation matrices `[E, R, 3, 3]`.
//!
//! The log map needs the rotation angle \(\theta = \mathrm{atan2}(\sin\theta, \cos\theta)\).
//! The angle is evaluated on the host and re-attached to the graph through its exact first-order
//! expansion \(\theta_0 + \cos\theta_0\,\delta s - \sin\theta_0\,\delta c\), which has the right value
//! and the right derivative with respect to \(s = \sin\theta\) and \(c = \cos\theta\).

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::batch::to_host;
use crate::Result;

/// Keeps `sqrt` away from zero so its derivative stays finite at the identity.
const ANGLE_EPS: f32 = 1e-12;

fn identity<B: Backend>(device: &B::Device) -> Tensor<B, 4> {
    let eye = vec![1.0f32, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    Tensor::from_data(TensorData::new(eye, [1, 1, 3, 3]), device)
}

/// Matrix entry `(i, j)` of every frame, as `[E, R, 1]`.
fn entry<B: Backend>(m: &Tensor<B, 4>, i: usize, j: usize) -> Tensor<B, 3> {
    let [e, r, _, _] = m.dims();
    m.clone().narrow(2, i, 1).narrow(3, j, 1).reshape([e, r, 1])
}

fn component<B: Backend>(v: &Tensor<B, 3>, k: usize) -> Tensor<B, 3> {
    v.clone().narrow(2, k, 1)
}

/// Skew-symmetric matrix `v^` such that `v^ w = v × w`.
pub fn hat<B: Backend>(v: Tensor<B, 3>) -> Tensor<B, 4> {
    let x = component(&v, 0);
    let y = component(&v, 1);
    let z = component(&v, 2);
    let zero = x.zeros_like();
    let row0 = Tensor::cat(vec![zero.clone(), z.clone().neg(), y.clone()], 2);
    let row1 = Tensor::cat(vec![z, zero.clone(), x.clone().neg()], 2);
    let row2 = Tensor::cat(vec![y.neg(), x, zero], 2);
    Tensor::stack::<4>(vec![row0, row1, row2], 2)
}

/// Inverse of [`hat`] (reads the lower-triangular entries).
pub fn vee<B: Backend>(m: Tensor<B, 4>) -> Tensor<B, 3> {
    Tensor::cat(vec![entry(&m, 2, 1), entry(&m, 0, 2), entry(&m, 1, 0)], 2)
}

/// Exponential map (Rodrigues): `exp(v^) = I + (sin θ / θ) v^ + ((1 - cos θ) / θ²) v^²`.
pub fn exp_map<B: Backend>(v: Tensor<B, 3>) -> Tensor<B, 4> {
    let [e, r, _] = v.dims();
    let device = v.device();
    let theta = v
        .clone()
        .powf_scalar(2.0)
        .sum_dim(2)
        .add_scalar(ANGLE_EPS)
        .sqrt();
    let sin_over = theta.clone().sin() / theta.clone();
    // 1 - cos θ = 2 sin²(θ/2), which does not cancel for small θ.
    let half_sin = theta.clone().mul_scalar(0.5).sin();
    let cos_over = half_sin.powf_scalar(2.0).mul_scalar(2.0) / theta.powf_scalar(2.0);
    let k = hat(v);
    let k2 = k.clone().matmul(k.clone());
    identity::<B>(&device)
        + k * sin_over.reshape([e, r, 1, 1])
        + k2 * cos_over.reshape([e, r, 1, 1])
}

/// Logarithm map: rotation matrix to rotation vector (`θ · axis`).
///
/// Accurate away from `θ = π`, where the axis is ill-conditioned.
pub fn log_map<B: Backend>(m: Tensor<B, 4>) -> Result<Tensor<B, 3>> {
    let [e, r, _, _] = m.dims();
    let device = m.device();

    // w = vee(M - Mᵀ) = 2 sin θ · axis
    let w = vee(m.clone() - m.clone().swap_dims(2, 3));
    let sin = w
        .clone()
        .powf_scalar(2.0)
        .sum_dim(2)
        .mul_scalar(0.25)
        .add_scalar(ANGLE_EPS)
        .sqrt();
    let cos = (entry(&m, 0, 0) + entry(&m, 1, 1) + entry(&m, 2, 2))
        .sub_scalar(1.0)
        .mul_scalar(0.5);

    let sin0 = sin.clone().detach();
    let cos0 = cos.clone().detach();
    let s_host = to_host(sin0.clone())?;
    let c_host = to_host(cos0.clone())?;
    let n = s_host.len();
    let mut theta0 = Vec::with_capacity(n);
    let mut cos_theta0 = Vec::with_capacity(n);
    let mut sin_theta0 = Vec::with_capacity(n);
    for (&s, &c) in s_host.iter().zip(c_host.iter()) {
        let th = s.atan2(c);
        theta0.push(th);
        cos_theta0.push(th.cos());
        sin_theta0.push(th.sin());
    }
    let column = |values: Vec<f32>| -> Tensor<B, 3> {
        Tensor::from_data(TensorData::new(values, [e, r, 1]), &device)
    };
    let theta = column(theta0) + column(cos_theta0) * (sin.clone() - sin0)
        - column(sin_theta0) * (cos - cos0);

    Ok(w * (theta / sin.mul_scalar(2.0)))
}

/// Tangent vector at `current` pointing to `target`: `log(currentᵀ · target)`.
pub fn rot_vf<B: Backend>(current: Tensor<B, 4>, target: Tensor<B, 4>) -> Result<Tensor<B, 3>> {
    log_map(current.swap_dims(2, 3).matmul(target))
}

/// Right-multiplicative retraction `R · exp(v^)`.
pub fn retract<B: Backend>(rot: Tensor<B, 4>, v: Tensor<B, 3>) -> Tensor<B, 4> {
    rot.matmul(exp_map(v))
}
