//! Block-quantized formats (GGML `Q8_0` / `Q4_0` layout).
//!
//! Each block holds [`QK`] values and one f16 scale `d`:
//! - `Q8_0`: `x = d * q`, `q: i8`, `d = amax / 127`
//! - `Q4_0`: `x = d * (q - 8)`, `q: u4`, `d = max / -8`; element `j` sits in
//!   the low nibble of byte `j`, element `j + 16` in the high nibble.

use bytemuck::{Pod, Zeroable};
use half::f16;

use crate::dtype::QK;
use crate::packed::Packed;
use crate::DType;

/// `Q8_0` block: f16 scale + 32 signed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct BlockQ8_0 {
    pub d: f16,
    pub qs: [i8; QK],
}

/// `Q4_0` block: f16 scale + 16 bytes of packed nibbles.
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct BlockQ4_0 {
    pub d: f16,
    pub qs: [u8; QK / 2],
}

impl BlockQ8_0 {
    /// Quantize up to [`QK`] values; missing values are treated as zero.
    pub fn quantize(values: &[f32]) -> Self {
        debug_assert!(values.len() <= QK);
        let amax = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        let d = amax / 127.0;
        let id = if d != 0.0 { 1.0 / d } else { 0.0 };

        let mut qs = [0i8; QK];
        for (q, &x) in qs.iter_mut().zip(values) {
            *q = (x * id).round().clamp(-127.0, 127.0) as i8;
        }
        Self {
            d: f16::from_f32(d),
            qs,
        }
    }

    #[inline]
    pub fn get(&self, i: usize) -> f32 {
        self.d.to_f32() * f32::from(self.qs[i])
    }
}

impl BlockQ4_0 {
    /// Quantize up to [`QK`] values; missing values are treated as zero.
    pub fn quantize(values: &[f32]) -> Self {
        debug_assert!(values.len() <= QK);
        let mut padded = [0.0f32; QK];
        padded[..values.len()].copy_from_slice(values);

        // Signed value of largest magnitude maps to -8.
        let mut amax = 0.0f32;
        let mut max = 0.0f32;
        for &x in &padded {
            if x.abs() > amax {
                amax = x.abs();
                max = x;
            }
        }
        let d = max / -8.0;
        let id = if d != 0.0 { 1.0 / d } else { 0.0 };

        let mut qs = [0u8; QK / 2];
        for (j, q) in qs.iter_mut().enumerate() {
            let lo = ((padded[j] * id + 8.5) as i8).clamp(0, 15) as u8;
            let hi = ((padded[j + QK / 2] * id + 8.5) as i8).clamp(0, 15) as u8;
            *q = lo | (hi << 4);
        }
        Self {
            d: f16::from_f32(d),
            qs,
        }
    }

    #[inline]
    pub fn get(&self, i: usize) -> f32 {
        let byte = self.qs[i % (QK / 2)];
        let nibble = if i < QK / 2 { byte & 0x0F } else { byte >> 4 };
        self.d.to_f32() * (i32::from(nibble) - 8) as f32
    }
}

macro_rules! impl_packed_block {
    ($block:ty, $dtype:expr) => {
        impl Packed for $block {
            const DTYPE: DType = $dtype;
            const UNIT: usize = QK;

            fn decompress(units: &[Self], ofs: usize, out: &mut [f32]) {
                let mut pos = ofs;
                let mut done = 0;
                while done < out.len() {
                    let block = &units[pos / QK];
                    let start = pos % QK;
                    let take = (QK - start).min(out.len() - done);
                    for (k, o) in out[done..done + take].iter_mut().enumerate() {
                        *o = block.get(start + k);
                    }
                    pos += take;
                    done += take;
                }
            }

            fn compress(src: &[f32], units: &mut [Self], ofs: usize) {
                assert_eq!(ofs % QK, 0, "block compress at unaligned offset {ofs}");
                let first = ofs / QK;
                for (unit, chunk) in units[first..].iter_mut().zip(src.chunks(QK)) {
                    *unit = <$block>::quantize(chunk);
                }
            }
        }
    };
}

impl_packed_block!(BlockQ8_0, DType::Q8_0);
impl_packed_block!(BlockQ4_0, DType::Q4_0);
