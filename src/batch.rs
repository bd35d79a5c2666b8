//! Batch and model contracts shared by the loss assembly and the training step.
//!
//! Shapes (E = examples, R = residues):
//! - masks: `[E, R]` with values in `{0, 1}`
//! - translations: `[E, R, 3]`
//! - rotations: `[E, R, 3, 3]`
//! - times: `[E, 1]`

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor, TensorData};
use ndarray::{Array, Array1, Dimension};

use crate::{Error, Result};

/// One corrupted batch, as produced by the (external) interpolant.
#[derive(Debug, Clone)]
pub struct NoisyBatch<B: Backend> {
    /// Residue validity mask `[E, R]`.
    pub res_mask: Tensor<B, 2>,
    /// 1 for generated residues, 0 for fixed motif residues `[E, R]`.
    pub diffuse_mask: Tensor<B, 2>,
    /// Noisy translations `[E, R, 3]`.
    pub trans_t: Tensor<B, 3>,
    /// Noisy rotations `[E, R, 3, 3]`.
    pub rotmats_t: Tensor<B, 4>,
    /// Translation time `[E, 1]`.
    pub r3_t: Tensor<B, 2>,
    /// Rotation time `[E, 1]`.
    pub so3_t: Tensor<B, 2>,
    /// Ground-truth translations `[E, R, 3]`.
    pub trans_1: Tensor<B, 3>,
    /// Ground-truth rotations `[E, R, 3, 3]`.
    pub rotmats_1: Tensor<B, 4>,
    /// Self-conditioning translations, when the training step produced them.
    pub trans_sc: Option<Tensor<B, 3>>,
}

impl<B: Backend> NoisyBatch<B> {
    pub fn num_examples(&self) -> usize {
        self.res_mask.dims()[0]
    }

    pub fn num_residues(&self) -> usize {
        self.res_mask.dims()[1]
    }

    /// Residues that contribute to the loss: valid and generated.
    pub fn loss_mask(&self) -> Tensor<B, 2> {
        self.res_mask.clone() * self.diffuse_mask.clone()
    }
}

/// Final-state predictions of the vector-field model.
#[derive(Debug, Clone)]
pub struct ModelOutput<B: Backend> {
    /// `[E, R, 3]`
    pub pred_trans: Tensor<B, 3>,
    /// `[E, R, 3, 3]`
    pub pred_rotmats: Tensor<B, 4>,
}

/// The generative model, seen from the loss: noisy batch in, predicted final frames out.
pub trait FramePredictor<B: Backend> {
    fn predict(&self, batch: &NoisyBatch<B>) -> ModelOutput<B>;
}

/// Boolean tensor marking masked-out residues, broadcast to `dims`.
///
/// `dims[0..2]` must equal the mask's `[E, R]`.
pub(crate) fn masked_out<B: Backend, const D: usize>(
    mask: &Tensor<B, 2>,
    dims: [usize; D],
) -> Tensor<B, D, Bool> {
    let mut shape = [1usize; D];
    shape[0] = dims[0];
    shape[1] = dims[1];
    let mut m: Tensor<B, D> = mask.clone().reshape(shape);
    for (axis, &size) in dims.iter().enumerate().skip(2) {
        m = m.repeat_dim(axis, size);
    }
    m.lower_elem(0.5)
}

/// Zero every entry that belongs to a masked-out residue.
///
/// Uses a fill rather than a multiply so that non-finite values on masked residues cannot leak
/// through as `NaN = inf * 0`.
pub(crate) fn zero_masked<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    mask: &Tensor<B, 2>,
) -> Tensor<B, D> {
    let out = masked_out(mask, x.dims());
    x.mask_fill(out, 0.0)
}

/// Number of contributing residues per example, `[E]`.
pub(crate) fn residue_count<B: Backend>(mask: &Tensor<B, 2>) -> Tensor<B, 1> {
    let [e, _] = mask.dims();
    mask.clone().sum_dim(1).reshape([e])
}

/// `x.min(ceiling)` that leaves NaN in place, so the finiteness check downstream still sees it.
pub(crate) fn clamp_ceiling<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    ceiling: f32,
) -> Tensor<B, D> {
    let above = x.clone().greater_elem(ceiling);
    x.mask_fill(above, ceiling)
}

/// Copy a tensor to the host as a flat row-major vector.
pub fn to_host<B: Backend, const D: usize>(t: Tensor<B, D>) -> Result<Vec<f32>> {
    t.into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::Data(format!("{e:?}")))
}

/// Copy a per-example tensor `[E]` to an `ndarray` vector.
pub fn to_array1<B: Backend>(t: Tensor<B, 1>) -> Result<Array1<f32>> {
    Ok(Array1::from_vec(to_host(t)?))
}

/// Move a host array onto `device`. The array rank must equal `D`.
pub fn from_ndarray<B: Backend, const D: usize, Dim: Dimension>(
    device: &B::Device,
    x: &Array<f32, Dim>,
) -> Result<Tensor<B, D>> {
    if x.ndim() != D {
        return Err(Error::Shape("array rank must match tensor rank"));
    }
    // Logical iteration order is row-major regardless of the array's memory layout.
    let values: Vec<f32> = x.iter().copied().collect();
    let data = TensorData::new(values, x.shape().to_vec());
    Ok(Tensor::from_data(data, device))
}
