//! Error-free transformations and the cascaded (sum, error) accumulator.
//!
//! A [`CascadedSum`] carries, per lane, a running f32 sum and the exact
//! rounding residue of every addition folded into it. The two halves are only
//! combined in [`CascadedSum::reduce`]; adding `err` into `sum` any earlier
//! puts the cancelled residue back into the rounding stream.

use crate::vector::{Simd, MAX_LANES};

/// Knuth's branch-free two-sum: `s = fl(a + b)` and the exact error
/// `e = (a + b) - s`. Six operations; no ordering requirement on `a`, `b`.
#[inline(always)]
pub fn two_sum<S: Simd>(s: S, a: S::V, b: S::V) -> (S::V, S::V) {
    let sum = s.add(a, b);
    let b2 = s.sub(sum, a);
    let a2 = s.sub(sum, b2);
    let err = s.add(s.sub(a, a2), s.sub(b, b2));
    (sum, err)
}

/// `p = fl(a * b)` and the exact error `e = a * b - p` via one fused op.
#[inline(always)]
pub fn two_product<S: Simd>(s: S, a: S::V, b: S::V) -> (S::V, S::V) {
    let prod = s.mul(a, b);
    (prod, s.mul_sub(a, b, prod))
}

#[inline]
pub fn two_sum_f32(a: f32, b: f32) -> (f32, f32) {
    let sum = a + b;
    let b2 = sum - a;
    let a2 = sum - b2;
    (sum, (a - a2) + (b - b2))
}

#[inline]
pub fn two_product_f32(a: f32, b: f32) -> (f32, f32) {
    let prod = a * b;
    (prod, a.mul_add(b, -prod))
}

/// Lane-wise (sum, compensation) pair.
#[derive(Clone, Copy)]
pub struct CascadedSum<S: Simd> {
    pub sum: S::V,
    pub err: S::V,
}

impl<S: Simd> CascadedSum<S> {
    #[inline(always)]
    pub fn new(s: S) -> Self {
        Self {
            sum: s.zero(),
            err: s.zero(),
        }
    }

    /// Add `x` lane-wise.
    #[inline(always)]
    pub fn update(&mut self, s: S, x: S::V) {
        let (sum, e) = two_sum(s, self.sum, x);
        self.sum = sum;
        self.err = s.add(self.err, e);
    }

    /// Add `x` whose own rounding residue `x_err` is already known (e.g. the
    /// error term of [`two_product`]).
    #[inline(always)]
    pub fn update_with_err(&mut self, s: S, x: S::V, x_err: S::V) {
        let (sum, e) = two_sum(s, x, self.sum);
        self.sum = sum;
        self.err = s.add(self.err, s.add(x_err, e));
    }

    /// Merge `other` into `self`: error terms add, sums two-sum.
    #[inline(always)]
    pub fn assimilate(&mut self, s: S, other: Self) {
        self.err = s.add(self.err, other.err);
        self.update(s, other.sum);
    }

    /// Collapse all lanes into one f32.
    ///
    /// Lane sums are two-summed in lane order, lane errors summed plainly, and
    /// the three parts are combined once at the end.
    #[inline(always)]
    pub fn reduce(self, s: S) -> f32 {
        let sums: [f32; MAX_LANES] = s.to_lanes(self.sum);
        let errs: [f32; MAX_LANES] = s.to_lanes(self.err);

        let mut total = 0.0f32;
        let mut total_err = 0.0f32;
        let mut lane_err = 0.0f32;
        for lane in 0..S::LANES {
            let (t, e) = two_sum_f32(total, sums[lane]);
            total = t;
            total_err += e;
            lane_err += errs[lane];
        }
        total + (total_err + lane_err)
    }
}
