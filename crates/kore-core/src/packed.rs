//! Packed element storage and the decompression interface kernels consume.
//!
//! A [`Packed`] type is one stored unit of a [`DType`]: a single scalar for
//! dense formats, or a whole quantized block. Kernels never look at the bits
//! directly; they ask for runs of f32 via [`Packed::decompress`] and write
//! back through [`Packed::compress`].

use half::slice::HalfFloatSliceExt;
use half::{bf16, f16};

use crate::error::KoreError;
use crate::{DType, Result};

/// One stored unit of a packed element type.
pub trait Packed: Copy + Default + Send + Sync + 'static {
    /// Element type tag for this representation.
    const DTYPE: DType;

    /// Logical elements per stored unit.
    const UNIT: usize;

    /// Decode `out.len()` elements starting at logical element `ofs`.
    fn decompress(units: &[Self], ofs: usize, out: &mut [f32]);

    /// Encode `src` into the units starting at logical element `ofs`.
    ///
    /// For block formats `ofs` must be a multiple of `UNIT`; a trailing
    /// partial block is zero padded.
    fn compress(src: &[f32], units: &mut [Self], ofs: usize);
}

impl Packed for f32 {
    const DTYPE: DType = DType::F32;
    const UNIT: usize = 1;

    #[inline]
    fn decompress(units: &[Self], ofs: usize, out: &mut [f32]) {
        out.copy_from_slice(&units[ofs..ofs + out.len()]);
    }

    #[inline]
    fn compress(src: &[f32], units: &mut [Self], ofs: usize) {
        units[ofs..ofs + src.len()].copy_from_slice(src);
    }
}

impl Packed for f64 {
    const DTYPE: DType = DType::F64;
    const UNIT: usize = 1;

    #[inline]
    fn decompress(units: &[Self], ofs: usize, out: &mut [f32]) {
        let n = out.len();
        for (o, &x) in out.iter_mut().zip(&units[ofs..ofs + n]) {
            *o = x as f32;
        }
    }

    #[inline]
    fn compress(src: &[f32], units: &mut [Self], ofs: usize) {
        for (d, &x) in units[ofs..ofs + src.len()].iter_mut().zip(src) {
            *d = f64::from(x);
        }
    }
}

impl Packed for f16 {
    const DTYPE: DType = DType::F16;
    const UNIT: usize = 1;

    #[inline]
    fn decompress(units: &[Self], ofs: usize, out: &mut [f32]) {
        units[ofs..ofs + out.len()].convert_to_f32_slice(out);
    }

    #[inline]
    fn compress(src: &[f32], units: &mut [Self], ofs: usize) {
        units[ofs..ofs + src.len()].convert_from_f32_slice(src);
    }
}

impl Packed for bf16 {
    const DTYPE: DType = DType::BF16;
    const UNIT: usize = 1;

    #[inline]
    fn decompress(units: &[Self], ofs: usize, out: &mut [f32]) {
        units[ofs..ofs + out.len()].convert_to_f32_slice(out);
    }

    #[inline]
    fn compress(src: &[f32], units: &mut [Self], ofs: usize) {
        units[ofs..ofs + src.len()].convert_from_f32_slice(src);
    }
}

/// Read-only view over packed units holding `num` logical elements.
///
/// The optional scale is a per-tensor factor that reductions apply once,
/// after accumulation.
#[derive(Debug, Clone, Copy)]
pub struct PackedSpan<'a, T: Packed> {
    units: &'a [T],
    num: usize,
    scale: Option<f32>,
}

impl<'a, T: Packed> PackedSpan<'a, T> {
    /// View `num` elements of `units`. Panics if the units cannot hold them.
    pub fn new(units: &'a [T], num: usize) -> Self {
        match Self::try_new(units, num) {
            Ok(span) => span,
            Err(e) => panic!("PackedSpan::new: {e}"),
        }
    }

    /// Fallible form of [`PackedSpan::new`].
    pub fn try_new(units: &'a [T], num: usize) -> Result<Self> {
        let capacity = units.len() * T::UNIT;
        if num > capacity {
            return Err(KoreError::OutOfBounds {
                offset: 0,
                count: num,
                capacity,
            });
        }
        Ok(Self {
            units,
            num,
            scale: None,
        })
    }

    /// View every element the units can hold.
    pub fn from_units(units: &'a [T]) -> Self {
        Self {
            units,
            num: units.len() * T::UNIT,
            scale: None,
        }
    }

    /// Attach a per-tensor scale factor.
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Declared element capacity.
    pub fn num(&self) -> usize {
        self.num
    }

    pub fn scale(&self) -> Option<f32> {
        self.scale
    }

    pub fn units(&self) -> &'a [T] {
        self.units
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    /// Check that `ofs..ofs + count` lies inside the span.
    pub fn check_range(&self, ofs: usize, count: usize) -> Result<()> {
        match ofs.checked_add(count) {
            Some(end) if end <= self.num => Ok(()),
            _ => Err(KoreError::OutOfBounds {
                offset: ofs,
                count,
                capacity: self.num,
            }),
        }
    }

    /// Decode `out.len()` elements starting at `ofs`.
    #[inline]
    pub fn decompress(&self, ofs: usize, out: &mut [f32]) {
        debug_assert!(ofs + out.len() <= self.num);
        T::decompress(self.units, ofs, out);
    }

    /// Decode `count` elements starting at `ofs` into the front of `out` and
    /// zero the rest of `out`.
    #[inline]
    pub fn decompress_and_zero_pad(&self, ofs: usize, out: &mut [f32], count: usize) {
        let (head, tail) = out.split_at_mut(count);
        self.decompress(ofs, head);
        tail.fill(0.0);
    }

    /// Decode the whole span into a new vector.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        let mut out = vec![0.0f32; self.num];
        self.decompress(0, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_roundtrip() {
        let mut units = vec![0.0f32; 6];
        f32::compress(&[1.0, 2.0, 3.0], &mut units, 2);
        let mut out = [0.0f32; 3];
        f32::decompress(&units, 2, &mut out);
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(units[0], 0.0);
    }

    #[test]
    fn test_half_types() {
        let src = [1.5f32, -2.25, 0.0, 1024.0];
        let mut h = vec![f16::ZERO; 4];
        let mut b = vec![bf16::ZERO; 4];
        f16::compress(&src, &mut h, 0);
        bf16::compress(&src, &mut b, 0);

        let mut out = [0.0f32; 4];
        f16::decompress(&h, 0, &mut out);
        assert_eq!(out, src);
        bf16::decompress(&b, 0, &mut out);
        assert_eq!(out, src);
    }

    #[test]
    fn test_f64_narrows_to_f32() {
        let units = [0.1f64, 1e300];
        let mut out = [0.0f32; 2];
        f64::decompress(&units, 0, &mut out);
        assert_eq!(out[0], 0.1f32);
        assert!(out[1].is_infinite());
    }

    #[test]
    fn test_f64_decompress_at_offset() {
        let units = [1.0f64, 2.5, -3.0, 4.0];
        let mut out = [0.0f32; 2];
        f64::decompress(&units, 1, &mut out);
        assert_eq!(out, [2.5, -3.0]);

        let span = PackedSpan::from_units(&units);
        let mut padded = [9.0f32; 4];
        span.decompress_and_zero_pad(2, &mut padded, 2);
        assert_eq!(padded, [-3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_span_bounds() {
        let units = [1.0f32, 2.0, 3.0];
        assert!(PackedSpan::try_new(&units, 4).is_err());
        let span = PackedSpan::try_new(&units, 2).unwrap();
        assert_eq!(span.num(), 2);
        assert!(span.check_range(1, 1).is_ok());
        assert!(span.check_range(1, 2).is_err());
        assert!(span.check_range(usize::MAX, 2).is_err());
        assert_eq!(span.scale(), None);
        assert_eq!(span.with_scale(0.5).scale(), Some(0.5));
    }

    #[test]
    fn test_zero_pad() {
        let units = [1.0f32, 2.0, 3.0, 4.0];
        let span = PackedSpan::from_units(&units);
        let mut out = [9.0f32; 8];
        span.decompress_and_zero_pad(1, &mut out, 3);
        assert_eq!(out, [2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "PackedSpan::new")]
    fn test_new_panics_on_overflow() {
        let units = [1.0f32];
        let _ = PackedSpan::new(&units, 2);
    }
}
