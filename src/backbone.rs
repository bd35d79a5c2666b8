//! Backbone atom reconstruction from residue frames.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

/// Idealized local coordinates (Å) of N, CA, C in the residue frame.
pub const IDEAL_BACKBONE: [[f32; 3]; 3] = [[-0.525, 1.363, 0.0], [0.0, 0.0, 0.0], [1.526, 0.0, 0.0]];

/// Frames to atom coordinates: `trans [E, R, 3]`, `rotmats [E, R, 3, 3]` → `[E, R, A, 3]`.
pub trait AtomReconstruction<B: Backend> {
    fn backbone_atoms(&self, trans: Tensor<B, 3>, rotmats: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Places [`IDEAL_BACKBONE`] in every frame: `atom = R · local + trans`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdealBackbone;

impl<B: Backend> AtomReconstruction<B> for IdealBackbone {
    fn backbone_atoms(&self, trans: Tensor<B, 3>, rotmats: Tensor<B, 4>) -> Tensor<B, 4> {
        let [e, r, _] = trans.dims();
        let device = trans.device();
        // Columns are atoms: local[c, a] = IDEAL_BACKBONE[a][c].
        let mut local = Vec::with_capacity(9);
        for c in 0..3 {
            for atom in IDEAL_BACKBONE.iter() {
                local.push(atom[c]);
            }
        }
        let local = Tensor::<B, 4>::from_data(TensorData::new(local, [1, 1, 3, 3]), &device);
        rotmats.matmul(local).swap_dims(2, 3) + trans.reshape([e, r, 1, 3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::to_host;
    use crate::so3;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn identity_frames_place_ideal_atoms_at_translation() {
        let device = Default::default();
        let trans = Tensor::<B, 3>::from_data(TensorData::new(vec![1.0f32, 2.0, 3.0], [1, 1, 3]), &device);
        let rot = so3::exp_map(Tensor::<B, 3>::zeros([1, 1, 3], &device));
        let atoms = to_host(IdealBackbone.backbone_atoms(trans, rot)).unwrap();
        let expected = [0.475, 3.363, 3.0, 1.0, 2.0, 3.0, 2.526, 2.0, 3.0];
        for k in 0..9 {
            assert!((atoms[k] - expected[k]).abs() < 1e-5);
        }
    }

    #[test]
    fn ideal_spacings_fall_inside_the_validity_window() {
        let device = Default::default();
        let trans = Tensor::<B, 3>::zeros([2, 4, 3], &device);
        let v = Tensor::<B, 3>::full([2, 4, 3], 0.4, &device);
        let atoms = IdealBackbone.backbone_atoms(trans, so3::exp_map(v));
        let val = crate::reward::validity_reward(atoms, &crate::reward::RewardConfig::default());
        assert_eq!(to_host(val).unwrap(), vec![1.0, 1.0]);
    }
}
