//! Convenience re-exports for common kore-core types.
//!
//! ```rust
//! use kore_core::prelude::*;
//! ```

pub use crate::DType;
pub use crate::KoreError;
pub use crate::ModelWeights;
pub use crate::Packed;
pub use crate::PackedSpan;
pub use crate::Result;
pub use crate::Shape;
pub use crate::Storage;
pub use crate::Tensor;
