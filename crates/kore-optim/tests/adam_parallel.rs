//! Integration tests for `adam_update` on a rayon pool.

use kore_core::{DType, ModelWeights, Tensor};
use kore_optim::{adam_update, build_pool, Adam, AdamCoefficients, AdamConfig, AdamParams};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};

fn random(n: usize, seed: u64, scale: f32) -> Vec<f32> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-scale..scale)).collect()
}

/// Weights with several shapes, including sizes that leave partial chunks
/// and partial vectors.
fn model(dtype: DType, seed: u64) -> ModelWeights {
    let shapes: [(&str, &[usize]); 4] = [
        ("embed", &[33, 64]),
        ("layer.0.w", &[96, 40]),
        ("layer.0.b", &[96]),
        ("head", &[7, 32]),
    ];
    let tensors = shapes
        .iter()
        .enumerate()
        .map(|(i, (name, shape))| {
            let n: usize = shape.iter().product();
            Tensor::from_f32(*name, &random(n, seed + i as u64, 1.0), shape, dtype)
        })
        .collect();
    ModelWeights::from_tensors(tensors).unwrap()
}

fn small_chunks() -> AdamParams {
    AdamParams {
        alpha: 0.01,
        chunk_size: 256,
        ..AdamParams::default()
    }
}

#[test]
fn test_zero_betas_is_gradient_descent() {
    let params = AdamParams {
        alpha: 0.05,
        beta1: 0.0,
        beta2: 0.0,
        epsilon: 1e-3,
        chunk_size: 64,
    };
    let n = 301;
    let w0 = random(n, 1, 2.0);
    let g: Vec<f32> = (0..n).map(|i| if i % 3 == 0 { -1.0 } else { 1.0 }).collect();

    let mut w = ModelWeights::from_tensors(vec![Tensor::from_f32("w", &w0, &[n], DType::F32)]).unwrap();
    let grad = ModelWeights::from_tensors(vec![Tensor::from_f32("w", &g, &[n], DType::F32)]).unwrap();
    let mut m = w.zeros_like(DType::F32);
    let mut v = w.zeros_like(DType::F32);
    let pool = build_pool(Some(2)).unwrap();

    adam_update(DType::F32, &grad, &params, 1, &mut w, &mut m, &mut v, &pool);

    let got = w.get("w").unwrap().to_f32_vec();
    for i in 0..n {
        let want = w0[i] - (params.alpha * g[i]) / (1.0 + params.epsilon);
        assert_eq!(got[i], want, "i={i}");
    }
}

#[test]
fn test_zero_gradient_is_noop() {
    let pool = build_pool(Some(3)).unwrap();
    for dtype in [DType::F32, DType::BF16, DType::F16] {
        let mut w = model(dtype, 10);
        let before = w.clone();
        let grad = w.zeros_like(DType::F32);
        let mut m = w.zeros_like(DType::F32);
        let mut v = w.zeros_like(DType::BF16);

        for t in 1..=3 {
            adam_update(dtype, &grad, &small_chunks(), t, &mut w, &mut m, &mut v, &pool);
        }

        for (a, b) in w.iter().zip(before.iter()) {
            assert_eq!(a.storage().as_bytes(), b.storage().as_bytes(), "{dtype} {}", a.name());
        }
        assert!(m.iter().all(|t| t.to_f32_vec().iter().all(|&x| x == 0.0)));
        assert!(v.iter().all(|t| t.to_f32_vec().iter().all(|&x| x == 0.0)));
    }
}

/// Run `steps` updates with the given pool size and moment dtype.
fn train(weight_type: DType, moment_type: DType, threads: usize, steps: usize) -> (ModelWeights, ModelWeights, ModelWeights) {
    let mut w = model(weight_type, 100);
    let mut m = w.zeros_like(moment_type);
    let mut v = w.zeros_like(moment_type);
    let pool = build_pool(Some(threads)).unwrap();
    for t in 1..=steps {
        let grad = model(DType::F32, 1000 + t as u64);
        adam_update(weight_type, &grad, &small_chunks(), t, &mut w, &mut m, &mut v, &pool);
    }
    (w, m, v)
}

fn same_bits(a: &ModelWeights, b: &ModelWeights) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x.storage().as_bytes() == y.storage().as_bytes())
}

#[test]
fn test_parallel_matches_single_thread() {
    for (wt, mt) in [(DType::F32, DType::F32), (DType::BF16, DType::F32), (DType::F16, DType::F64), (DType::Q8_0, DType::BF16)] {
        let (w1, m1, v1) = train(wt, mt, 1, 3);
        let (w4, m4, v4) = train(wt, mt, 4, 3);
        assert!(same_bits(&w1, &w4), "weights differ for {wt}/{mt}");
        assert!(same_bits(&m1, &m4), "m differs for {wt}/{mt}");
        assert!(same_bits(&v1, &v4), "v differs for {wt}/{mt}");
    }
}

#[test]
fn test_collection_matches_per_tensor_updates() {
    let params = small_chunks();
    let pool = build_pool(Some(4)).unwrap();
    let single = build_pool(Some(1)).unwrap();

    let mut w = model(DType::F32, 7);
    let grad = model(DType::F32, 8);
    let mut m = w.zeros_like(DType::F32);
    let mut v = w.zeros_like(DType::F32);
    adam_update(DType::F32, &grad, &params, 1, &mut w, &mut m, &mut v, &pool);

    for (i, tensor) in model(DType::F32, 7).iter().enumerate() {
        let mut wi = ModelWeights::from_tensors(vec![tensor.clone()]).unwrap();
        let gi = ModelWeights::from_tensors(vec![grad.iter().nth(i).unwrap().clone()]).unwrap();
        let mut mi = wi.zeros_like(DType::F32);
        let mut vi = wi.zeros_like(DType::F32);
        adam_update(DType::F32, &gi, &params, 1, &mut wi, &mut mi, &mut vi, &single);

        let updated = w.get(tensor.name()).unwrap();
        assert_eq!(updated.storage().as_bytes(), wi.iter().next().unwrap().storage().as_bytes());
    }
}

#[test]
fn test_quantized_weights_move_against_gradient() {
    let n = 128;
    let w0 = vec![1.0f32; n];
    let mut w = ModelWeights::from_tensors(vec![Tensor::from_f32("q", &w0, &[n], DType::Q8_0)]).unwrap();
    let grad = ModelWeights::from_tensors(vec![Tensor::from_f32("q", &vec![1.0; n], &[n], DType::F32)]).unwrap();
    let mut m = w.zeros_like(DType::F32);
    let mut v = w.zeros_like(DType::F32);
    let pool = build_pool(Some(2)).unwrap();
    let params = AdamParams { alpha: 0.1, chunk_size: 64, ..AdamParams::default() };

    adam_update(DType::Q8_0, &grad, &params, 1, &mut w, &mut m, &mut v, &pool);

    for x in w.get("q").unwrap().to_f32_vec() {
        assert!((x - 0.9).abs() < 0.01, "x={x}");
    }
}

#[test]
#[should_panic(expected = "dtype mismatch")]
fn test_wrong_weight_type_panics() {
    let mut w = model(DType::BF16, 1);
    let grad = model(DType::F32, 2);
    let mut m = w.zeros_like(DType::F32);
    let mut v = w.zeros_like(DType::F32);
    let pool = build_pool(Some(1)).unwrap();
    adam_update(DType::F32, &grad, &small_chunks(), 1, &mut w, &mut m, &mut v, &pool);
}

#[test]
fn test_optimizer_minimizes_quadratic() {
    let target = random(50, 5, 3.0);
    let mut w = ModelWeights::from_tensors(vec![Tensor::zeros("x", &[50], DType::F32)]).unwrap();
    let mut opt = Adam::new(AdamConfig {
        params: AdamParams { alpha: 0.05, ..AdamParams::default() },
        num_threads: Some(2),
        ..AdamConfig::default()
    })
    .unwrap();

    let loss = |x: &[f32]| -> f32 { x.iter().zip(&target).map(|(a, b)| (a - b) * (a - b)).sum() };
    let initial = loss(&w.get("x").unwrap().to_f32_vec());

    for _ in 0..500 {
        let x = w.get("x").unwrap().to_f32_vec();
        let g: Vec<f32> = x.iter().zip(&target).map(|(a, b)| 2.0 * (a - b)).collect();
        let grads = ModelWeights::from_tensors(vec![Tensor::from_f32("x", &g, &[50], DType::F32)]).unwrap();
        opt.step(&mut w, &grads).unwrap();
    }

    let last = loss(&w.get("x").unwrap().to_f32_vec());
    assert!(last < initial * 1e-2, "loss {initial} -> {last}");
    assert_eq!(opt.step_count(), 500);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: the pooled update equals the scalar formula bit for bit
    #[test]
    fn prop_update_matches_scalar_formula(
        n in 1usize..700,
        seed in any::<u64>(),
        t in 1usize..50,
        threads in 1usize..5,
    ) {
        let params = AdamParams { alpha: 0.003, chunk_size: 128, ..AdamParams::default() };
        let w0 = random(n, seed, 4.0);
        let g = random(n, seed ^ 0x9e37, 1.0);
        let m0 = random(n, seed ^ 0x51, 0.5);
        let v0: Vec<f32> = random(n, seed ^ 0x77, 1.0).iter().map(|x| x * x).collect();

        let one = |name: &str, data: &[f32]| {
            ModelWeights::from_tensors(vec![Tensor::from_f32(name, data, &[data.len()], DType::F32)]).unwrap()
        };
        let mut w = one("p", &w0);
        let mut m = one("p", &m0);
        let mut v = one("p", &v0);
        let pool = build_pool(Some(threads)).unwrap();
        adam_update(DType::F32, &one("p", &g), &params, t, &mut w, &mut m, &mut v, &pool);

        let c = AdamCoefficients::new(&params, t);
        let (mut we, mut me, mut ve) = (w0.clone(), m0.clone(), v0.clone());
        for i in 0..n {
            c.apply(&mut we[i], g[i], &mut me[i], &mut ve[i]);
        }
        prop_assert_eq!(w.get("p").unwrap().to_f32_vec(), we);
        prop_assert_eq!(m.get("p").unwrap().to_f32_vec(), me);
        prop_assert_eq!(v.get("p").unwrap().to_f32_vec(), ve);
    }
}
