//! # kore-kernels
//!
//! Numerically robust CPU reductions for Kore, written once against a
//! lane-width-agnostic vector trait and dispatched at runtime.
//!
//! Provides:
//! - Runtime SIMD capability detection and backend selection (AVX2/FMA,
//!   NEON, portable, scalar), overridable with `KORE_SIMD`. AVX-512 is
//!   detected and reported but runs on the AVX2 backend
//! - Error-free transformations and the cascaded (sum, error) accumulator
//! - Compensated dot product over any packed weight format
//! - Condition-number diagnostic for dot products and plain sums

pub mod cascaded;
pub mod condition;
pub mod config;
pub mod dot;
pub mod simd;
pub mod vector;

pub use cascaded::CascadedSum;
pub use condition::{condition_number, condition_number_vec, condition_number_vec_with, condition_number_with};
pub use config::{BackendPreference, KernelConfig};
pub use dot::{dot, dot_slices, dot_tensor, dot_with};
pub use simd::{dispatch, selected_backend, SimdBackend, SimdCapability, WithSimd};
pub use vector::{Portable, Scalar, Simd, MAX_LANES};
#[cfg(target_arch = "x86_64")]
pub use vector::Avx2;
#[cfg(target_arch = "aarch64")]
pub use vector::Neon;
