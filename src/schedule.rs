//! Memoryless linear noise schedule.
//!
//! The translation path is \(x_t = \alpha_t x_1 + \beta_t x_0\) with \(\alpha_t = t\),
//! \(\beta_t = 1 - t\). The memoryless diffusion coefficient is
//! \[
//! \eta_t = \beta_t \left(\frac{\dot\alpha_t}{\alpha_t}\beta_t - \dot\beta_t\right),
//! \qquad \sigma_t = \sqrt{2\eta_t},
//! \]
//! which for this schedule is \(\eta_t = (1-t)/t\). Rotations use \(\sigma^{rot}_t = \sqrt{2t}\).
//!
//! `t = 0` divides by zero. Callers guarantee strictly positive translation time.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Schedule coefficients, one value per example (`[E, 1]`).
#[derive(Debug, Clone)]
pub struct ScheduleCoefficients<B: Backend> {
    pub alpha: Tensor<B, 2>,
    pub beta: Tensor<B, 2>,
    pub alpha_dot: Tensor<B, 2>,
    pub beta_dot: Tensor<B, 2>,
    pub eta: Tensor<B, 2>,
    pub sigma: Tensor<B, 2>,
}

/// `α = t`, `β = 1 - t`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorylessLinearSchedule;

impl MemorylessLinearSchedule {
    /// Evaluate every coefficient at translation time `t` (`[E, 1]`).
    pub fn coefficients<B: Backend>(&self, t: Tensor<B, 2>) -> ScheduleCoefficients<B> {
        let alpha = t.clone();
        let beta = t.clone().neg().add_scalar(1.0);
        let alpha_dot = t.ones_like();
        let beta_dot = t.ones_like().neg();
        let eta = beta.clone()
            * ((alpha_dot.clone() / alpha.clone()) * beta.clone() - beta_dot.clone());
        let sigma = eta.clone().mul_scalar(2.0).sqrt();
        ScheduleCoefficients {
            alpha,
            beta,
            alpha_dot,
            beta_dot,
            eta,
            sigma,
        }
    }

    /// Rotation diffusion coefficient `sqrt(2 t_rot)`.
    pub fn rotation_sigma<B: Backend>(&self, so3_t: Tensor<B, 2>) -> Tensor<B, 2> {
        so3_t.mul_scalar(2.0).sqrt()
    }

    /// Host-side `η(t)`.
    #[inline]
    pub fn eta(&self, t: f32) -> f32 {
        let beta = 1.0 - t;
        beta * (1.0 / t * beta + 1.0)
    }

    /// Host-side `σ(t)`.
    #[inline]
    pub fn sigma(&self, t: f32) -> f32 {
        (2.0 * self.eta(t)).sqrt()
    }

    /// Host-side `σ_rot(t)`.
    #[inline]
    pub fn rotation_sigma_scalar(&self, t: f32) -> f32 {
        (2.0 * t).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::to_host;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use proptest::prelude::*;

    type B = NdArray<f32>;

    #[test]
    fn tensor_and_scalar_paths_agree() {
        let device = Default::default();
        let ts = vec![0.1f32, 0.5, 0.9, 1.0];
        let t = Tensor::<B, 2>::from_data(TensorData::new(ts.clone(), [4, 1]), &device);
        let c = MemorylessLinearSchedule.coefficients(t.clone());
        let eta = to_host(c.eta).unwrap();
        let sigma = to_host(c.sigma).unwrap();
        let rot = to_host(MemorylessLinearSchedule.rotation_sigma(t)).unwrap();
        for (i, &ti) in ts.iter().enumerate() {
            assert!((eta[i] - MemorylessLinearSchedule.eta(ti)).abs() < 1e-5);
            assert!((sigma[i] - MemorylessLinearSchedule.sigma(ti)).abs() < 1e-5);
            assert!((rot[i] - (2.0 * ti).sqrt()).abs() < 1e-6);
        }
        assert_eq!(to_host(c.alpha_dot).unwrap(), vec![1.0; 4]);
        assert_eq!(to_host(c.beta_dot).unwrap(), vec![-1.0; 4]);
    }

    #[test]
    fn eta_at_midpoint_is_one() {
        // (1 - t) / t at t = 1/2.
        assert!((MemorylessLinearSchedule.eta(0.5) - 1.0).abs() < 1e-6);
        assert!((MemorylessLinearSchedule.sigma(0.5) - 2.0f32.sqrt()).abs() < 1e-6);
        assert_eq!(MemorylessLinearSchedule.eta(1.0), 0.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_sigma_is_real_and_nonnegative(t in 1e-4f32..0.9999f32) {
            let s = MemorylessLinearSchedule;
            let eta = s.eta(t);
            prop_assert!(eta >= 0.0);
            prop_assert!((eta - (1.0 - t) / t).abs() <= 1e-3 * (1.0 + eta));
            let sigma = s.sigma(t);
            prop_assert!(sigma.is_finite() && sigma >= 0.0);
            prop_assert!(s.rotation_sigma_scalar(t) >= 0.0);
        }
    }
}
