//! Condition number of a sum: `2 * Σ|t_i| / |Σ t_i|`.
//!
//! Large values mean many similar-magnitude terms of opposite sign, i.e. the
//! dot product (or plain sum) is exposed to catastrophic cancellation.

use kore_core::{Packed, PackedSpan, Result};

use crate::cascaded::CascadedSum;
use crate::simd::{dispatch, SimdBackend, WithSimd};
use crate::vector::{Simd, MAX_LANES};

/// Condition number of `Σ w[i] * v[i]` over the first `num` elements.
///
/// Returns `f64::INFINITY` if the compensated sum is exactly zero. Panics if
/// either span is shorter than `num`.
///
/// Accumulation runs in f32: finite terms whose sum overflows f32 produce a
/// NaN, which fails the non-negativity assertion and panics.
pub fn condition_number<W: Packed, V: Packed>(w: &PackedSpan<'_, W>, v: &PackedSpan<'_, V>, num: usize) -> f64 {
    if let Err(e) = w.check_range(0, num).and_then(|_| v.check_range(0, num)) {
        panic!("condition_number: {e}");
    }
    dispatch(ConditionOp { w: Some(*w), v: *v, num })
}

/// Condition number of `Σ v[i]` over the first `num` elements.
pub fn condition_number_vec<V: Packed>(v: &PackedSpan<'_, V>, num: usize) -> f64 {
    if let Err(e) = v.check_range(0, num) {
        panic!("condition_number_vec: {e}");
    }
    dispatch(ConditionOp::<f32, V> { w: None, v: *v, num })
}

/// [`condition_number`] on an explicit backend.
pub fn condition_number_with<W: Packed, V: Packed>(
    backend: SimdBackend,
    w: &PackedSpan<'_, W>,
    v: &PackedSpan<'_, V>,
    num: usize,
) -> Result<f64> {
    w.check_range(0, num)?;
    v.check_range(0, num)?;
    backend.run(ConditionOp { w: Some(*w), v: *v, num })
}

/// [`condition_number_vec`] on an explicit backend.
pub fn condition_number_vec_with<V: Packed>(backend: SimdBackend, v: &PackedSpan<'_, V>, num: usize) -> Result<f64> {
    v.check_range(0, num)?;
    backend.run(ConditionOp::<f32, V> { w: None, v: *v, num })
}

/// `w: None` means every term is `v[i]` alone.
struct ConditionOp<'w, 'v, W: Packed, V: Packed> {
    w: Option<PackedSpan<'w, W>>,
    v: PackedSpan<'v, V>,
    num: usize,
}

impl<W: Packed, V: Packed> WithSimd for ConditionOp<'_, '_, W, V> {
    type Output = f64;

    #[inline(always)]
    fn with_simd<S: Simd>(self, s: S) -> f64 {
        let n = S::LANES;
        let mut sum = CascadedSum::new(s);
        let mut sum_abs = CascadedSum::new(s);

        let mut wbuf = [0.0f32; 2 * MAX_LANES];
        let mut vbuf = [0.0f32; 2 * MAX_LANES];

        // Decode `count` terms at `i` into vbuf (zero padded to the buffer).
        let mut load_terms = |i: usize, count: usize, vbuf: &mut [f32; 2 * MAX_LANES]| {
            self.v.decompress_and_zero_pad(i, vbuf, count);
            if let Some(w) = &self.w {
                w.decompress_and_zero_pad(i, &mut wbuf, count);
                for (t, &x) in vbuf.iter_mut().zip(wbuf.iter()) {
                    *t *= x;
                }
            }
        };

        let mut i = 0;
        while i + 2 * n <= self.num {
            load_terms(i, 2 * n, &mut vbuf);
            for k in 0..2 {
                let t = s.load(&vbuf[k * n..]);
                sum.update(s, t);
                sum_abs.update(s, s.abs(t));
            }
            i += 2 * n;
        }

        let remaining = self.num - i;
        if remaining != 0 {
            load_terms(i, remaining, &mut vbuf);
            let mut pos = 0;
            while pos < remaining {
                let t = s.load(&vbuf[pos..]);
                sum.update(s, t);
                sum_abs.update(s, s.abs(t));
                pos += n;
            }
        }

        let div = sum.reduce(s).abs();
        if div == 0.0 {
            return f64::INFINITY;
        }
        let cond = 2.0 * f64::from(sum_abs.reduce(s)) / f64::from(div);
        assert!(cond >= 0.0, "condition number {cond} is not a non-negative number");
        cond
    }
}
