use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use adjointmatch::adjoint::{solve_adjoint_state, AdjointConfig};
use adjointmatch::batch::{FramePredictor, ModelOutput, NoisyBatch};
use adjointmatch::drift::{RotationDrift, TranslationDrift};
use adjointmatch::loss::{AdjointMatchingLoss, LossConfig};
use adjointmatch::so3;
use burn_core::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;

type B = NdArray<f32>;

fn normal(shape: [usize; 3], scale: f32, rng: &mut ChaCha8Rng) -> Tensor<B, 3> {
    let n = shape.iter().product();
    let values: Vec<f32> = (0..n)
        .map(|_| scale * StandardNormal.sample(&mut *rng))
        .collect();
    Tensor::from_data(TensorData::new(values, shape), &Default::default())
}

fn make_batch(e: usize, r: usize, seed: u64) -> NoisyBatch<B> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let device = Default::default();
    let trans_1 = normal([e, r, 3], 3.0, &mut rng);
    let rotmats_1 = so3::exp_map(normal([e, r, 3], 1.0, &mut rng));
    let t = Tensor::<B, 2>::full([e, 1], 0.7, &device);
    NoisyBatch {
        res_mask: Tensor::ones([e, r], &device),
        diffuse_mask: Tensor::ones([e, r], &device),
        trans_t: trans_1.clone() + normal([e, r, 3], 0.5, &mut rng),
        rotmats_t: so3::retract(rotmats_1.clone(), normal([e, r, 3], 0.2, &mut rng)),
        r3_t: t.clone(),
        so3_t: t,
        trans_1,
        rotmats_1,
        trans_sc: None,
    }
}

struct Oracle;

impl FramePredictor<B> for Oracle {
    fn predict(&self, batch: &NoisyBatch<B>) -> ModelOutput<B> {
        ModelOutput {
            pred_trans: batch.trans_1.clone(),
            pred_rotmats: batch.rotmats_1.clone(),
        }
    }
}

fn bench_adjoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("adjoint_solve");
    group.sample_size(20);

    let cases = [(2usize, 32usize), (4, 64), (8, 128)];
    let cfg = AdjointConfig::default();

    for &(e, r) in &cases {
        let batch = make_batch(e, r, 123);
        let reward = Tensor::<B, 1>::full([e], 1.5, &Default::default());
        let mask = batch.loss_mask();

        let trans = TranslationDrift::new(batch.trans_1.clone(), reward.clone(), 1e-2);
        group.bench_with_input(
            BenchmarkId::new("translation", format!("e{e}_r{r}")),
            &(e, r),
            |b, _| {
                b.iter(|| solve_adjoint_state(&trans, &batch.trans_t, &batch.r3_t, &mask, &cfg).unwrap())
            },
        );

        // Central differences: two extra drift evaluations (exp + log) per grid step.
        let rots = RotationDrift::new(batch.rotmats_1.clone(), reward);
        group.bench_with_input(
            BenchmarkId::new("rotation", format!("e{e}_r{r}")),
            &(e, r),
            |b, _| {
                b.iter(|| solve_adjoint_state(&rots, &batch.rotmats_t, &batch.so3_t, &mask, &cfg).unwrap())
            },
        );
    }
    group.finish();
}

fn bench_model_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("model_step");
    group.sample_size(10);
    let loss_fn = AdjointMatchingLoss::new(LossConfig::default());

    for &(e, r) in &[(2usize, 32usize), (4, 64)] {
        let batch = make_batch(e, r, 7);
        group.bench_with_input(BenchmarkId::from_parameter(format!("e{e}_r{r}")), &batch, |b, batch| {
            b.iter(|| loss_fn.model_step(&Oracle, batch).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_adjoint, bench_model_step);
criterion_main!(benches);
