//! Lane-width-agnostic f32 vector operations.
//!
//! Kernels are written once against [`Simd`] and instantiated per backend.
//! Backend values are zero-sized tokens; holding one proves the CPU supports
//! the instructions it emits.

/// Widest vector any backend uses, in f32 lanes. Scratch buffers are sized
/// from this.
pub const MAX_LANES: usize = 8;

/// One vector backend: a lane count plus the f32 operations kernels need.
///
/// All operations are lane-wise and correctly rounded except
/// [`Simd::mul_sub`], which is fused (single rounding).
pub trait Simd: Copy + Send + Sync + 'static {
    type V: Copy;

    const LANES: usize;
    const NAME: &'static str;

    fn splat(self, x: f32) -> Self::V;

    #[inline(always)]
    fn zero(self) -> Self::V {
        self.splat(0.0)
    }

    /// Load `LANES` values from the front of `src`.
    fn load(self, src: &[f32]) -> Self::V;

    /// Store `LANES` values to the front of `dst`.
    fn store(self, v: Self::V, dst: &mut [f32]);

    fn add(self, a: Self::V, b: Self::V) -> Self::V;
    fn sub(self, a: Self::V, b: Self::V) -> Self::V;
    fn mul(self, a: Self::V, b: Self::V) -> Self::V;
    fn div(self, a: Self::V, b: Self::V) -> Self::V;

    /// `a * b - c` with a single rounding.
    fn mul_sub(self, a: Self::V, b: Self::V, c: Self::V) -> Self::V;

    fn abs(self, a: Self::V) -> Self::V;
    fn sqrt(self, a: Self::V) -> Self::V;

    /// Copy the lanes out, in order, into the front of a `MAX_LANES` array.
    #[inline(always)]
    fn to_lanes(self, v: Self::V) -> [f32; MAX_LANES] {
        let mut out = [0.0f32; MAX_LANES];
        self.store(v, &mut out);
        out
    }
}

/// One lane, plain f32 arithmetic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scalar;

impl Simd for Scalar {
    type V = f32;

    const LANES: usize = 1;
    const NAME: &'static str = "scalar";

    #[inline(always)]
    fn splat(self, x: f32) -> f32 {
        x
    }

    #[inline(always)]
    fn load(self, src: &[f32]) -> f32 {
        src[0]
    }

    #[inline(always)]
    fn store(self, v: f32, dst: &mut [f32]) {
        dst[0] = v;
    }

    #[inline(always)]
    fn add(self, a: f32, b: f32) -> f32 {
        a + b
    }

    #[inline(always)]
    fn sub(self, a: f32, b: f32) -> f32 {
        a - b
    }

    #[inline(always)]
    fn mul(self, a: f32, b: f32) -> f32 {
        a * b
    }

    #[inline(always)]
    fn div(self, a: f32, b: f32) -> f32 {
        a / b
    }

    #[inline(always)]
    fn mul_sub(self, a: f32, b: f32, c: f32) -> f32 {
        a.mul_add(b, -c)
    }

    #[inline(always)]
    fn abs(self, a: f32) -> f32 {
        a.abs()
    }

    #[inline(always)]
    fn sqrt(self, a: f32) -> f32 {
        a.sqrt()
    }
}

/// Four lanes held in a plain array. Runs anywhere; the compiler is free to
/// map it onto whatever baseline vector unit the target has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Portable;

const PORTABLE_LANES: usize = 4;

#[inline(always)]
fn map2(a: [f32; PORTABLE_LANES], b: [f32; PORTABLE_LANES], f: impl Fn(f32, f32) -> f32) -> [f32; PORTABLE_LANES] {
    std::array::from_fn(|i| f(a[i], b[i]))
}

impl Simd for Portable {
    type V = [f32; PORTABLE_LANES];

    const LANES: usize = PORTABLE_LANES;
    const NAME: &'static str = "portable";

    #[inline(always)]
    fn splat(self, x: f32) -> Self::V {
        [x; PORTABLE_LANES]
    }

    #[inline(always)]
    fn load(self, src: &[f32]) -> Self::V {
        let mut v = [0.0f32; PORTABLE_LANES];
        v.copy_from_slice(&src[..PORTABLE_LANES]);
        v
    }

    #[inline(always)]
    fn store(self, v: Self::V, dst: &mut [f32]) {
        dst[..PORTABLE_LANES].copy_from_slice(&v);
    }

    #[inline(always)]
    fn add(self, a: Self::V, b: Self::V) -> Self::V {
        map2(a, b, |x, y| x + y)
    }

    #[inline(always)]
    fn sub(self, a: Self::V, b: Self::V) -> Self::V {
        map2(a, b, |x, y| x - y)
    }

    #[inline(always)]
    fn mul(self, a: Self::V, b: Self::V) -> Self::V {
        map2(a, b, |x, y| x * y)
    }

    #[inline(always)]
    fn div(self, a: Self::V, b: Self::V) -> Self::V {
        map2(a, b, |x, y| x / y)
    }

    #[inline(always)]
    fn mul_sub(self, a: Self::V, b: Self::V, c: Self::V) -> Self::V {
        std::array::from_fn(|i| a[i].mul_add(b[i], -c[i]))
    }

    #[inline(always)]
    fn abs(self, a: Self::V) -> Self::V {
        a.map(f32::abs)
    }

    #[inline(always)]
    fn sqrt(self, a: Self::V) -> Self::V {
        a.map(f32::sqrt)
    }
}

#[cfg(target_arch = "x86_64")]
pub use x86::Avx2;

#[cfg(target_arch = "x86_64")]
mod x86 {
    use std::arch::x86_64::*;

    use super::Simd;
    use crate::simd::SimdCapability;

    /// Eight lanes in a 256-bit AVX register. Requires AVX2 and FMA.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Avx2 {
        _private: (),
    }

    impl Avx2 {
        /// Returns a token only if the CPU supports AVX2 and FMA.
        pub fn try_new() -> Option<Self> {
            let cap = SimdCapability::detect();
            if cap.avx2 && cap.fma {
                Some(Self { _private: () })
            } else {
                None
            }
        }
    }

    // Safety (all methods): an `Avx2` value only exists once AVX2+FMA support
    // has been confirmed, and loads/stores go through bounds-checked slices.
    #[allow(unused_unsafe)]
    impl Simd for Avx2 {
        type V = __m256;

        const LANES: usize = 8;
        const NAME: &'static str = "avx2";

        #[inline(always)]
        fn splat(self, x: f32) -> __m256 {
            unsafe { _mm256_set1_ps(x) }
        }

        #[inline(always)]
        fn load(self, src: &[f32]) -> __m256 {
            let src = &src[..Self::LANES];
            unsafe { _mm256_loadu_ps(src.as_ptr()) }
        }

        #[inline(always)]
        fn store(self, v: __m256, dst: &mut [f32]) {
            let dst = &mut dst[..Self::LANES];
            unsafe { _mm256_storeu_ps(dst.as_mut_ptr(), v) }
        }

        #[inline(always)]
        fn add(self, a: __m256, b: __m256) -> __m256 {
            unsafe { _mm256_add_ps(a, b) }
        }

        #[inline(always)]
        fn sub(self, a: __m256, b: __m256) -> __m256 {
            unsafe { _mm256_sub_ps(a, b) }
        }

        #[inline(always)]
        fn mul(self, a: __m256, b: __m256) -> __m256 {
            unsafe { _mm256_mul_ps(a, b) }
        }

        #[inline(always)]
        fn div(self, a: __m256, b: __m256) -> __m256 {
            unsafe { _mm256_div_ps(a, b) }
        }

        #[inline(always)]
        fn mul_sub(self, a: __m256, b: __m256, c: __m256) -> __m256 {
            unsafe { _mm256_fmsub_ps(a, b, c) }
        }

        #[inline(always)]
        fn abs(self, a: __m256) -> __m256 {
            // Clear the sign bit.
            unsafe { _mm256_andnot_ps(_mm256_set1_ps(-0.0), a) }
        }

        #[inline(always)]
        fn sqrt(self, a: __m256) -> __m256 {
            unsafe { _mm256_sqrt_ps(a) }
        }
    }
}

#[cfg(target_arch = "aarch64")]
pub use arm::Neon;

#[cfg(target_arch = "aarch64")]
mod arm {
    use std::arch::aarch64::*;

    use super::Simd;

    /// Four lanes in a 128-bit NEON register. NEON is mandatory on AArch64.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Neon;

    #[allow(unused_unsafe)]
    impl Simd for Neon {
        type V = float32x4_t;

        const LANES: usize = 4;
        const NAME: &'static str = "neon";

        #[inline(always)]
        fn splat(self, x: f32) -> float32x4_t {
            unsafe { vdupq_n_f32(x) }
        }

        #[inline(always)]
        fn load(self, src: &[f32]) -> float32x4_t {
            let src = &src[..Self::LANES];
            unsafe { vld1q_f32(src.as_ptr()) }
        }

        #[inline(always)]
        fn store(self, v: float32x4_t, dst: &mut [f32]) {
            let dst = &mut dst[..Self::LANES];
            unsafe { vst1q_f32(dst.as_mut_ptr(), v) }
        }

        #[inline(always)]
        fn add(self, a: float32x4_t, b: float32x4_t) -> float32x4_t {
            unsafe { vaddq_f32(a, b) }
        }

        #[inline(always)]
        fn sub(self, a: float32x4_t, b: float32x4_t) -> float32x4_t {
            unsafe { vsubq_f32(a, b) }
        }

        #[inline(always)]
        fn mul(self, a: float32x4_t, b: float32x4_t) -> float32x4_t {
            unsafe { vmulq_f32(a, b) }
        }

        #[inline(always)]
        fn div(self, a: float32x4_t, b: float32x4_t) -> float32x4_t {
            unsafe { vdivq_f32(a, b) }
        }

        #[inline(always)]
        fn mul_sub(self, a: float32x4_t, b: float32x4_t, c: float32x4_t) -> float32x4_t {
            // vfmaq computes acc + a * b fused.
            unsafe { vfmaq_f32(vnegq_f32(c), a, b) }
        }

        #[inline(always)]
        fn abs(self, a: float32x4_t) -> float32x4_t {
            unsafe { vabsq_f32(a) }
        }

        #[inline(always)]
        fn sqrt(self, a: float32x4_t) -> float32x4_t {
            unsafe { vsqrtq_f32(a) }
        }
    }
}
