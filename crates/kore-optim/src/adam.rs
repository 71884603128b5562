use std::sync::Arc;

use kore_core::{DType, KoreError, ModelWeights, Result, Run, RunMut};
use kore_kernels::{dispatch, Simd, WithSimd, MAX_LANES};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::config::{AdamConfig, AdamParams};
use crate::pool::build_pool;

/// Per-call constants of the Adam step. Bias corrections are computed in f64
/// and rounded once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamCoefficients {
    pub alpha: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub one_minus_beta1: f32,
    pub one_minus_beta2: f32,
    pub epsilon: f32,
    /// `1 / (1 - beta1^t)`
    pub c1: f32,
    /// `1 / (1 - beta2^t)`
    pub c2: f32,
}

impl AdamCoefficients {
    pub fn new(params: &AdamParams, t: usize) -> Self {
        let t = i32::try_from(t).unwrap_or(i32::MAX);
        let correction = |beta: f32| (1.0 / (1.0 - f64::from(beta).powi(t))) as f32;
        Self {
            alpha: params.alpha,
            beta1: params.beta1,
            beta2: params.beta2,
            one_minus_beta1: 1.0 - params.beta1,
            one_minus_beta2: 1.0 - params.beta2,
            epsilon: params.epsilon,
            c1: correction(params.beta1),
            c2: correction(params.beta2),
        }
    }

    /// One element of the update, in the same operation order as the
    /// vector kernel.
    #[inline]
    pub fn apply(&self, w: &mut f32, g: f32, m: &mut f32, v: &mut f32) {
        *m = self.beta1 * *m + self.one_minus_beta1 * g;
        *v = self.beta2 * *v + self.one_minus_beta2 * (g * g);
        let m_hat = *m * self.c1;
        let v_hat = *v * self.c2;
        *w -= (self.alpha * m_hat) / (v_hat.sqrt() + self.epsilon);
    }
}

/// Check everything [`adam_update`] requires of its arguments.
pub fn validate_update(
    weight_type: DType,
    grad: &ModelWeights,
    params: &AdamParams,
    t: usize,
    weights: &ModelWeights,
    grad_m: &ModelWeights,
    grad_v: &ModelWeights,
) -> Result<()> {
    params.validate()?;
    if t == 0 {
        return Err(KoreError::InvalidConfig("Adam timestep t starts at 1".into()));
    }
    weights.check_parallel(grad, "grad")?;
    weights.check_parallel(grad_m, "grad_m")?;
    weights.check_parallel(grad_v, "grad_v")?;
    for w in weights {
        if w.dtype() != weight_type {
            return Err(KoreError::DTypeMismatch {
                name: w.name().to_string(),
                expected: weight_type,
                got: w.dtype(),
            });
        }
    }
    Ok(())
}

/// Apply one bias-corrected Adam step to every element of `weights`.
///
/// `grad`, `grad_m` and `grad_v` must match `weights` tensor by tensor (name
/// and shape) and every weight must be stored as `weight_type`; moments and
/// gradients may use any dtype. Work is split into chunks of
/// `params.chunk_size` elements and run on `pool`; the call returns once
/// every chunk is done. Results do not depend on the pool size.
///
/// Panics if the arguments fail [`validate_update`].
#[allow(clippy::too_many_arguments)]
pub fn adam_update(
    weight_type: DType,
    grad: &ModelWeights,
    params: &AdamParams,
    t: usize,
    weights: &mut ModelWeights,
    grad_m: &mut ModelWeights,
    grad_v: &mut ModelWeights,
    pool: &ThreadPool,
) {
    if let Err(e) = validate_update(weight_type, grad, params, t, weights, grad_m, grad_v) {
        panic!("adam_update: {e}");
    }
    let coeffs = AdamCoefficients::new(params, t);
    let chunk = params.chunk_size;

    let mut tasks = Vec::new();
    let tensors = weights.iter_mut().zip(grad.iter()).zip(grad_m.iter_mut()).zip(grad_v.iter_mut());
    for (((w, g), m), v) in tensors {
        let runs = w
            .storage_mut()
            .runs_mut(chunk)
            .into_iter()
            .zip(g.storage().runs(chunk))
            .zip(m.storage_mut().runs_mut(chunk))
            .zip(v.storage_mut().runs_mut(chunk));
        tasks.extend(runs.map(|(((w, g), m), v)| AdamTask { w, g, m, v }));
    }
    tracing::trace!("adam t={} over {} tasks", t, tasks.len());

    pool.install(|| tasks.into_par_iter().for_each(|task| task.run(&coeffs)));
}

/// One chunk of one tensor: the same element range in all four collections.
struct AdamTask<'a> {
    w: RunMut<'a>,
    g: Run<'a>,
    m: RunMut<'a>,
    v: RunMut<'a>,
}

impl AdamTask<'_> {
    fn run(mut self, coeffs: &AdamCoefficients) {
        let n = self.w.len();
        let mut w = vec![0.0f32; n];
        let mut g = vec![0.0f32; n];
        let mut m = vec![0.0f32; n];
        let mut v = vec![0.0f32; n];
        self.w.decompress(&mut w);
        self.g.decompress(&mut g);
        self.m.decompress(&mut m);
        self.v.decompress(&mut v);

        dispatch(AdamKernel {
            coeffs,
            w: &mut w,
            g: &g,
            m: &mut m,
            v: &mut v,
        });

        self.w.compress(&w);
        self.m.compress(&m);
        self.v.compress(&v);
    }
}

/// Elementwise update over dense f32 slices of equal length.
pub struct AdamKernel<'a> {
    pub coeffs: &'a AdamCoefficients,
    pub w: &'a mut [f32],
    pub g: &'a [f32],
    pub m: &'a mut [f32],
    pub v: &'a mut [f32],
}

struct Splats<V> {
    alpha: V,
    beta1: V,
    beta2: V,
    one_minus_beta1: V,
    one_minus_beta2: V,
    epsilon: V,
    c1: V,
    c2: V,
}

// No fused operations: every lane rounds exactly like `AdamCoefficients::apply`.
#[inline(always)]
fn adam_lanes<S: Simd>(s: S, k: &Splats<S::V>, w: S::V, g: S::V, m: S::V, v: S::V) -> (S::V, S::V, S::V) {
    let m = s.add(s.mul(k.beta1, m), s.mul(k.one_minus_beta1, g));
    let v = s.add(s.mul(k.beta2, v), s.mul(k.one_minus_beta2, s.mul(g, g)));
    let m_hat = s.mul(m, k.c1);
    let v_hat = s.mul(v, k.c2);
    let step = s.div(s.mul(k.alpha, m_hat), s.add(s.sqrt(v_hat), k.epsilon));
    (s.sub(w, step), m, v)
}

impl WithSimd for AdamKernel<'_> {
    type Output = ();

    #[inline(always)]
    fn with_simd<S: Simd>(self, s: S) {
        let len = self.w.len();
        assert!(
            self.g.len() == len && self.m.len() == len && self.v.len() == len,
            "AdamKernel: slice lengths differ"
        );
        let c = self.coeffs;
        let k = Splats {
            alpha: s.splat(c.alpha),
            beta1: s.splat(c.beta1),
            beta2: s.splat(c.beta2),
            one_minus_beta1: s.splat(c.one_minus_beta1),
            one_minus_beta2: s.splat(c.one_minus_beta2),
            epsilon: s.splat(c.epsilon),
            c1: s.splat(c.c1),
            c2: s.splat(c.c2),
        };

        let n = S::LANES;
        let mut i = 0;
        while i + n <= len {
            let (w, m, v) = adam_lanes(
                s,
                &k,
                s.load(&self.w[i..]),
                s.load(&self.g[i..]),
                s.load(&self.m[i..]),
                s.load(&self.v[i..]),
            );
            s.store(w, &mut self.w[i..]);
            s.store(m, &mut self.m[i..]);
            s.store(v, &mut self.v[i..]);
            i += n;
        }

        let rem = len - i;
        if rem != 0 {
            let mut pw = [0.0f32; MAX_LANES];
            let mut pg = [0.0f32; MAX_LANES];
            let mut pm = [0.0f32; MAX_LANES];
            let mut pv = [0.0f32; MAX_LANES];
            pw[..rem].copy_from_slice(&self.w[i..]);
            pg[..rem].copy_from_slice(&self.g[i..]);
            pm[..rem].copy_from_slice(&self.m[i..]);
            pv[..rem].copy_from_slice(&self.v[i..]);

            let (w, m, v) = adam_lanes(s, &k, s.load(&pw), s.load(&pg), s.load(&pm), s.load(&pv));
            s.store(w, &mut pw);
            s.store(m, &mut pm);
            s.store(v, &mut pv);
            self.w[i..].copy_from_slice(&pw[..rem]);
            self.m[i..].copy_from_slice(&pm[..rem]);
            self.v[i..].copy_from_slice(&pv[..rem]);
        }
    }
}

/// Adam optimizer that owns its moment estimates and step counter.
///
/// Moments are created on the first [`Adam::step`] as zero collections
/// parallel to the weights, stored as `config.moment_dtype`.
pub struct Adam {
    config: AdamConfig,
    m: Option<ModelWeights>, // First moment
    v: Option<ModelWeights>, // Second moment
    t: usize,                // Step count
    pool: Arc<ThreadPool>,
}

impl Adam {
    /// Validate `config` and build a pool sized by `config.num_threads`.
    pub fn new(config: AdamConfig) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(build_pool(config.num_threads)?);
        Ok(Self::with_pool(config, pool))
    }

    /// Share an existing pool. `config.num_threads` is ignored.
    pub fn with_pool(config: AdamConfig, pool: Arc<ThreadPool>) -> Self {
        Self {
            config,
            m: None,
            v: None,
            t: 0,
            pool,
        }
    }

    /// Default hyperparameters (betas=(0.9, 0.999), eps=1e-8) with the given
    /// learning rate.
    pub fn default_with_lr(lr: f32) -> Result<Self> {
        Self::new(AdamConfig {
            params: AdamParams::with_alpha(lr),
            ..AdamConfig::default()
        })
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    /// Learning rate.
    pub fn lr(&self) -> f32 {
        self.config.params.alpha
    }

    pub fn set_lr(&mut self, lr: f32) {
        self.config.params.alpha = lr;
    }

    /// Number of completed steps.
    pub fn step_count(&self) -> usize {
        self.t
    }

    /// First and second moment estimates, once the first step has run.
    pub fn moments(&self) -> Option<(&ModelWeights, &ModelWeights)> {
        self.m.as_ref().zip(self.v.as_ref())
    }

    /// Drop the moments and restart the step count.
    pub fn reset(&mut self) {
        self.m = None;
        self.v = None;
        self.t = 0;
    }

    /// Apply one update. All weights must share one dtype.
    pub fn step(&mut self, weights: &mut ModelWeights, grads: &ModelWeights) -> Result<()> {
        let Some(weight_type) = weights.iter().next().map(|w| w.dtype()) else {
            return Ok(());
        };
        let moment_dtype = self.config.moment_dtype;
        let m = self.m.get_or_insert_with(|| weights.zeros_like(moment_dtype));
        let v = self.v.get_or_insert_with(|| weights.zeros_like(moment_dtype));

        let t = self.t + 1;
        validate_update(weight_type, grads, &self.config.params, t, weights, m, v)?;
        adam_update(weight_type, grads, &self.config.params, t, weights, m, v, &self.pool);
        self.t = t;
        Ok(())
    }
}
