//! # kore-optim
//!
//! Adam updates over collections of packed weight tensors.
//!
//! [`adam_update`] applies one bias-corrected Adam step to every element of
//! a [`ModelWeights`](kore_core::ModelWeights) collection, fanning chunks out
//! over a rayon pool and returning once all of them are done. [`Adam`] wraps
//! it with owned moment estimates and a step counter.

pub mod adam;
pub mod config;
pub mod pool;

pub use adam::{adam_update, validate_update, Adam, AdamCoefficients, AdamKernel};
pub use config::{AdamConfig, AdamParams};
pub use pool::build_pool;
