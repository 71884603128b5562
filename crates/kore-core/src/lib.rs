//! # kore-core
//!
//! Element types and storage for the Kore numeric kernels.
//!
//! Provides:
//! - [`DType`]: dense floats (F32, F64, F16, BF16) and GGML-style block
//!   quantized formats (Q8_0, Q4_0)
//! - [`Packed`] / [`PackedSpan`]: the decompress/compress interface kernels
//!   use to read and write stored elements as f32
//! - [`Storage`]: reference-counted, copy-on-write packed buffers
//! - [`Tensor`] / [`ModelWeights`]: named weight tensors and ordered
//!   collections of them

pub mod dtype;
pub mod error;
pub mod packed;
pub mod prelude;
pub mod quant;
pub mod shape;
pub mod storage;
pub mod tensor;
pub mod weights;

pub use dtype::{DType, QK};
pub use error::KoreError;
pub use packed::{Packed, PackedSpan};
pub use quant::{BlockQ4_0, BlockQ8_0};
pub use shape::Shape;
pub use storage::{Run, RunMut, SpanVisitor, Storage, StorageUnit};
pub use tensor::Tensor;
pub use weights::ModelWeights;

pub type Result<T> = std::result::Result<T, KoreError>;
