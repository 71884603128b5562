//! Compensated dot product over packed weights.
//!
//! Products are split into (product, residue) pairs and accumulated into four
//! independent [`CascadedSum`]s, which are merged pairwise and reduced across
//! lanes only at the end. The result is deterministic for identical inputs
//! on the same backend. Backends with different lane counts reduce in
//! different tree shapes, so results may differ in the last bits between
//! them.

use kore_core::{Packed, PackedSpan, Result, SpanVisitor, Tensor};

use crate::cascaded::{two_product, CascadedSum};
use crate::simd::{dispatch, SimdBackend, WithSimd};
use crate::vector::{Simd, MAX_LANES};

/// `Σ w[w_ofs + i] * v[i]` for `i < num`, times the weight span's scale if
/// it has one.
///
/// Panics if either span is too short.
///
/// # Examples
///
/// ```
/// use kore_core::PackedSpan;
/// use kore_kernels::dot;
///
/// let w = [1e8f32, 1.0, -1e8];
/// let v = [1.0f32; 3];
/// let r = dot(&PackedSpan::from_units(&w), 0, &PackedSpan::from_units(&v), 3);
/// assert_eq!(r, 1.0);
/// ```
pub fn dot<W: Packed, V: Packed>(w: &PackedSpan<'_, W>, w_ofs: usize, v: &PackedSpan<'_, V>, num: usize) -> f32 {
    if let Err(e) = check_args(w, w_ofs, v, num) {
        panic!("dot: {e}");
    }
    dispatch(DotOp { w: *w, w_ofs, v: *v, num })
}

/// [`dot`] on an explicit backend. Range violations and unsupported
/// backends are returned as errors.
pub fn dot_with<W: Packed, V: Packed>(
    backend: SimdBackend,
    w: &PackedSpan<'_, W>,
    w_ofs: usize,
    v: &PackedSpan<'_, V>,
    num: usize,
) -> Result<f32> {
    check_args(w, w_ofs, v, num)?;
    backend.run(DotOp { w: *w, w_ofs, v: *v, num })
}

/// Dot product of two equal-length f32 slices.
pub fn dot_slices(w: &[f32], v: &[f32]) -> f32 {
    assert_eq!(w.len(), v.len(), "dot_slices: length mismatch");
    dot(&PackedSpan::from_units(w), 0, &PackedSpan::from_units(v), w.len())
}

/// Dot product of `v` with `v.len()` elements of `w` starting at `w_ofs`,
/// whatever `w`'s storage type. The tensor's scale is applied once.
pub fn dot_tensor(w: &Tensor, w_ofs: usize, v: &[f32]) -> f32 {
    w.storage().visit_span(TensorDot {
        w_ofs,
        v,
        scale: w.scale(),
    })
}

fn check_args<W: Packed, V: Packed>(w: &PackedSpan<'_, W>, w_ofs: usize, v: &PackedSpan<'_, V>, num: usize) -> Result<()> {
    w.check_range(w_ofs, num)?;
    v.check_range(0, num)
}

struct TensorDot<'v> {
    w_ofs: usize,
    v: &'v [f32],
    scale: f32,
}

impl SpanVisitor for TensorDot<'_> {
    type Output = f32;

    fn visit<T: Packed>(self, span: PackedSpan<'_, T>) -> f32 {
        let v = PackedSpan::from_units(self.v);
        dot(&span.with_scale(self.scale), self.w_ofs, &v, self.v.len())
    }
}

struct DotOp<'w, 'v, W: Packed, V: Packed> {
    w: PackedSpan<'w, W>,
    w_ofs: usize,
    v: PackedSpan<'v, V>,
    num: usize,
}

impl<W: Packed, V: Packed> WithSimd for DotOp<'_, '_, W, V> {
    type Output = f32;

    #[inline(always)]
    fn with_simd<S: Simd>(self, s: S) -> f32 {
        let sum = dot_kernel(s, &self.w, self.w_ofs, &self.v, self.num);
        match self.w.scale() {
            Some(scale) => scale * sum,
            None => sum,
        }
    }
}

/// Fold `w * v` into `acc`. Products of two narrow values are exact in f32,
/// so their residue step is skipped.
#[inline(always)]
fn accumulate<S: Simd>(s: S, exact: bool, w: S::V, v: S::V, acc: &mut CascadedSum<S>) {
    if exact {
        acc.update(s, s.mul(w, v));
    } else {
        let (prod, perr) = two_product(s, w, v);
        acc.update_with_err(s, prod, perr);
    }
}

#[inline(always)]
fn dot_kernel<S: Simd, W: Packed, V: Packed>(
    s: S,
    w: &PackedSpan<'_, W>,
    w_ofs: usize,
    v: &PackedSpan<'_, V>,
    num: usize,
) -> f32 {
    let n = S::LANES;
    let exact = W::DTYPE.is_narrow() && V::DTYPE.is_narrow();
    let mut acc = [CascadedSum::new(s); 4];

    let mut wbuf = [0.0f32; 4 * MAX_LANES];
    let mut vbuf = [0.0f32; 4 * MAX_LANES];

    let mut i = 0;
    while i + 4 * n <= num {
        w.decompress(w_ofs + i, &mut wbuf[..4 * n]);
        v.decompress(i, &mut vbuf[..4 * n]);
        for (k, a) in acc.iter_mut().enumerate() {
            let wk = s.load(&wbuf[k * n..]);
            let vk = s.load(&vbuf[k * n..]);
            accumulate(s, exact, wk, vk, a);
        }
        i += 4 * n;
    }

    if i + 2 * n <= num {
        w.decompress(w_ofs + i, &mut wbuf[..2 * n]);
        v.decompress(i, &mut vbuf[..2 * n]);
        for (k, a) in acc[..2].iter_mut().enumerate() {
            let wk = s.load(&wbuf[k * n..]);
            let vk = s.load(&vbuf[k * n..]);
            accumulate(s, exact, wk, vk, a);
        }
        i += 2 * n;
    }

    let remaining = num - i;
    debug_assert!(remaining < 2 * n);
    if remaining != 0 {
        // Padded lanes contribute 0 * 0 to both sum and error.
        let mut padded_w = [0.0f32; 2 * MAX_LANES];
        let mut padded_v = [0.0f32; 2 * MAX_LANES];
        w.decompress_and_zero_pad(w_ofs + i, &mut padded_w, remaining);
        v.decompress_and_zero_pad(i, &mut padded_v, remaining);

        let mut pos = 0;
        while pos < remaining {
            let wk = s.load(&padded_w[pos..]);
            let vk = s.load(&padded_v[pos..]);
            accumulate(s, exact, wk, vk, &mut acc[pos / n]);
            pos += n;
        }
    }

    let [mut acc0, acc1, mut acc2, acc3] = acc;
    acc0.assimilate(s, acc1);
    acc2.assimilate(s, acc3);
    acc0.assimilate(s, acc2);
    acc0.reduce(s)
}
