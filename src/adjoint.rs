//! Backward-time adjoint (costate) integration.
//!
//! For a drift \(b(x, t)\), the lean adjoint equation integrated here is
//! \[
//! \frac{da}{dt} = -J_b(x, t)\,a, \qquad a(1) = -\mathbf{1},
//! \]
//! where \(J_b\) is the per-residue 3×3 Jacobian of the drift with respect to the state. The
//! discretization is fixed and explicit:
//!
//! - a uniform grid of `steps` points from `t = 1` down to `t = 0`,
//! - one Euler step per interval, `a ← a - dt · (J_b · a)` with `dt < 0`,
//! - a *shadow* forward state advanced with the same drift, `x ← x + dt · b(x, t)`, outside the
//!   autodiff graph. It only supplies the next evaluation point.
//!
//! The costate stays on the autodiff graph: the Jacobian-vector product is built from ordinary
//! differentiable tensor ops (a closed-form product supplied by the field, or a central
//! difference along the costate direction). A loss built from the costate therefore
//! backpropagates into whatever the drift captures, with a first-order autodiff backend.
//!
//! The grid ignores the per-example time values; `t` only fixes the time tensor's shape.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::batch::zero_masked;
use crate::manifold::StateSpace;
use crate::{Error, Result};

/// Point type of a drift field's state space.
pub type PointOf<B, F> = <<F as DriftField<B>>::Space as StateSpace<B>>::Point;

/// A differentiable drift over per-residue states.
pub trait DriftField<B: Backend> {
    type Space: StateSpace<B>;

    /// The space states live in.
    fn space(&self) -> &Self::Space;

    /// Drift `b(x, t)`, `[E, R, 3]`. `t` is `[E, 1]`.
    fn drift(&self, x: &PointOf<B, Self>, t: &Tensor<B, 2>) -> Result<Tensor<B, 3>>;

    /// Closed-form `J_b(x, t) · v`, when the field has one.
    fn analytic_jvp(
        &self,
        _x: &PointOf<B, Self>,
        _t: &Tensor<B, 2>,
        _v: Tensor<B, 3>,
    ) -> Result<Option<Tensor<B, 3>>> {
        Ok(None)
    }
}

/// Default step for central-difference JVPs.
pub const DEFAULT_FD_EPS: f32 = 1e-3;

/// Floor on the per-residue direction norm in central-difference JVPs.
const JVP_NORM_FLOOR: f32 = 1e-12;

/// How the per-step Jacobian-vector product is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum JvpMethod {
    /// The field's closed-form product when available, central differences otherwise.
    #[default]
    Auto,
    /// Always `|v| · (b(x ⊕ εv̂) - b(x ⊕ -εv̂)) / 2ε` with `v̂ = v / |v|` per residue and `⊕` the
    /// space's retraction.
    CentralDifference { eps: f32 },
}

/// Adjoint solver configuration.
#[derive(Debug, Clone)]
pub struct AdjointConfig {
    /// Grid points from `t = 1` to `t = 0`, endpoints included (intervals = `steps - 1`).
    pub steps: usize,
    pub jvp: JvpMethod,
}

impl Default for AdjointConfig {
    fn default() -> Self {
        Self {
            steps: 20,
            jvp: JvpMethod::Auto,
        }
    }
}

impl AdjointConfig {
    /// Signed step size (negative: the sweep runs backward in time).
    pub fn dt(&self) -> f32 {
        -1.0 / (self.steps - 1) as f32
    }

    /// Grid time of point `k`, matching `linspace(1, 0, steps)[k]`.
    pub fn grid_time(&self, k: usize) -> f32 {
        1.0 - k as f32 / (self.steps - 1) as f32
    }
}

/// `J_b(x, t) · v` using the configured method.
pub fn jacobian_vector_product<B, F>(
    field: &F,
    x: &PointOf<B, F>,
    t: &Tensor<B, 2>,
    v: Tensor<B, 3>,
    method: JvpMethod,
) -> Result<Tensor<B, 3>>
where
    B: Backend,
    F: DriftField<B> + ?Sized,
{
    let eps = match method {
        JvpMethod::Auto => {
            if let Some(jv) = field.analytic_jvp(x, t, v.clone())? {
                return Ok(jv);
            }
            DEFAULT_FD_EPS
        }
        JvpMethod::CentralDifference { eps } => eps,
    };
    if !eps.is_finite() || eps <= 0.0 {
        return Err(Error::Domain("central-difference eps must be positive and finite"));
    }
    // Perturb by exactly `eps` along the unit direction; `eps · v` wraps around SO(3) for large v.
    let norm = v
        .clone()
        .powf_scalar(2.0)
        .sum_dim(2)
        .clamp_min(JVP_NORM_FLOOR * JVP_NORM_FLOOR)
        .sqrt();
    let unit = v / norm.clone();
    let space = field.space();
    let x_plus = space.retract(x.clone(), unit.clone().mul_scalar(eps));
    let x_minus = space.retract(x.clone(), unit.mul_scalar(-eps));
    let f_plus = field.drift(&x_plus, t)?;
    let f_minus = field.drift(&x_minus, t)?;
    Ok((f_plus - f_minus).div_scalar(2.0 * eps) * norm)
}

/// Integrate the costate backward over the full grid and return every grid value.
///
/// - `x_t`: current state
/// - `t`: current time `[E, 1]` (shape only)
/// - `mask`: residue mask `[E, R]`
///
/// The first element is the terminal value `-1` (masked), the last is the costate at `t = 0`.
#[tracing::instrument(level = "debug", skip_all, fields(steps = cfg.steps))]
pub fn solve_adjoint_trajectory<B, F>(
    field: &F,
    x_t: &PointOf<B, F>,
    t: &Tensor<B, 2>,
    mask: &Tensor<B, 2>,
    cfg: &AdjointConfig,
) -> Result<Vec<Tensor<B, 3>>>
where
    B: Backend,
    F: DriftField<B> + ?Sized,
{
    if cfg.steps < 2 {
        return Err(Error::Domain("adjoint grid needs at least 2 points"));
    }
    let [e, r] = mask.dims();
    let device = mask.device();
    let space = field.space();
    let dt = cfg.dt();

    let mut a = zero_masked(Tensor::<B, 3>::ones([e, r, 3], &device).neg(), mask);
    let mut x = space.detach(x_t.clone());
    let mut trajectory = Vec::with_capacity(cfg.steps);
    trajectory.push(a.clone());

    for k in 0..cfg.steps - 1 {
        let t_curr = Tensor::<B, 2>::full(t.dims(), cfg.grid_time(k), &device);

        let drift = zero_masked(field.drift(&x, &t_curr)?, mask);
        let jv = zero_masked(
            jacobian_vector_product(field, &x, &t_curr, a.clone(), cfg.jvp)?,
            mask,
        );
        a = zero_masked(a - jv.mul_scalar(dt), mask);
        trajectory.push(a.clone());

        x = space.detach(space.retract(x, drift.detach().mul_scalar(dt)));
    }

    Ok(trajectory)
}

/// Costate at the end of the backward sweep (masked).
pub fn solve_adjoint_state<B, F>(
    field: &F,
    x_t: &PointOf<B, F>,
    t: &Tensor<B, 2>,
    mask: &Tensor<B, 2>,
    cfg: &AdjointConfig,
) -> Result<Tensor<B, 3>>
where
    B: Backend,
    F: DriftField<B> + ?Sized,
{
    let mut trajectory = solve_adjoint_trajectory(field, x_t, t, mask, cfg)?;
    trajectory
        .pop()
        .ok_or(Error::Domain("adjoint trajectory is empty"))
}
