use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KoreError;

/// Elements per quantized block (`Q8_0`, `Q4_0`).
pub const QK: usize = 32;

/// Element types supported by Kore weight storage.
///
/// Dense IEEE floats plus GGML-style block-quantized formats. Every variant
/// has exactly one `Packed` implementation in [`crate::packed`] /
/// [`crate::quant`]; kernels stay generic over that trait instead of
/// branching on the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit IEEE 754 single-precision float
    F32,
    /// 64-bit IEEE 754 double-precision float
    F64,
    /// 16-bit IEEE 754 half-precision float
    F16,
    /// 16-bit Brain Float (same exponent range as F32, reduced mantissa)
    BF16,
    /// 32 x i8 with one f16 scale per block
    #[serde(rename = "q8_0")]
    Q8_0,
    /// 32 x 4-bit with one f16 scale per block, offset 8
    #[serde(rename = "q4_0")]
    Q4_0,
}

impl DType {
    /// Every supported element type, dense first.
    pub const ALL: [DType; 6] = [
        DType::F32,
        DType::F64,
        DType::F16,
        DType::BF16,
        DType::Q8_0,
        DType::Q4_0,
    ];

    /// Size in bytes of a single element, or None for block formats.
    pub fn element_size(&self) -> Option<usize> {
        match self {
            DType::F16 | DType::BF16 => Some(2),
            DType::F32 => Some(4),
            DType::F64 => Some(8),
            DType::Q8_0 | DType::Q4_0 => None,
        }
    }

    /// Logical elements per stored unit: 1 for dense types, [`QK`] for blocks.
    pub fn block_size(&self) -> usize {
        if self.is_quantized() {
            QK
        } else {
            1
        }
    }

    /// Bytes of one stored unit (one element, or one block).
    pub fn unit_bytes(&self) -> usize {
        match self {
            DType::Q8_0 => 2 + QK,
            DType::Q4_0 => 2 + QK / 2,
            other => other.element_size().unwrap_or(0),
        }
    }

    /// Number of stored units needed to hold `n` elements.
    pub fn units_for(&self, n: usize) -> usize {
        n.div_ceil(self.block_size())
    }

    /// Number of bytes needed to store `n` elements of this dtype.
    pub fn storage_bytes(&self, n: usize) -> usize {
        self.units_for(n) * self.unit_bytes()
    }

    /// Whether this dtype is a dense floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    /// Whether this dtype is a quantized/block type.
    pub fn is_quantized(&self) -> bool {
        matches!(self, DType::Q8_0 | DType::Q4_0)
    }

    /// Whether decoded values have at most 11 significand bits, which makes the
    /// f32 product of two such values exact.
    pub fn is_narrow(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
            DType::Q8_0 => write!(f, "q8_0"),
            DType::Q4_0 => write!(f, "q4_0"),
        }
    }
}

impl FromStr for DType {
    type Err = KoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .into_iter()
            .find(|d| d.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| KoreError::InvalidConfig(format!("unknown dtype '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(DType::F32.element_size(), Some(4));
        assert_eq!(DType::F64.element_size(), Some(8));
        assert_eq!(DType::F16.element_size(), Some(2));
        assert_eq!(DType::BF16.element_size(), Some(2));
        assert_eq!(DType::Q8_0.element_size(), None);
        assert_eq!(DType::Q4_0.element_size(), None);
    }

    #[test]
    fn test_storage_bytes() {
        assert_eq!(DType::F32.storage_bytes(10), 40);
        assert_eq!(DType::Q8_0.storage_bytes(32), 34);
        assert_eq!(DType::Q8_0.storage_bytes(33), 68);
        assert_eq!(DType::Q4_0.storage_bytes(32), 18);
        assert_eq!(DType::Q4_0.units_for(0), 0);
    }

    #[test]
    fn test_dtype_categories() {
        assert!(DType::F32.is_float());
        assert!(!DType::F32.is_quantized());
        assert!(DType::Q8_0.is_quantized());
        assert!(DType::BF16.is_narrow());
        assert!(DType::F16.is_narrow());
        assert!(!DType::F32.is_narrow());
        assert!(!DType::Q4_0.is_narrow());
    }

    #[test]
    fn test_display_parse() {
        for d in DType::ALL {
            assert_eq!(d.to_string().parse::<DType>().unwrap(), d);
        }
        assert_eq!("BF16".parse::<DType>().unwrap(), DType::BF16);
        assert!("i8".parse::<DType>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&DType::Q8_0).unwrap();
        assert_eq!(json, "\"q8_0\"");
        let back: DType = serde_json::from_str("\"bf16\"").unwrap();
        assert_eq!(back, DType::BF16);
    }
}
