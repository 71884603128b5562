use crate::DType;

/// Errors raised by Kore storage, collections and configuration.
///
/// Kernels treat most of these as fatal preconditions: they format the
/// error into a panic message rather than returning it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KoreError {
    #[error("shape mismatch for '{name}': expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("dtype mismatch for '{name}': expected {expected}, got {got}")]
    DTypeMismatch {
        name: String,
        expected: DType,
        got: DType,
    },

    #[error("{what}: expected {expected} tensors, got {got}")]
    TensorCountMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("tensor {index} is named '{got}', expected '{expected}'")]
    NameMismatch {
        index: usize,
        expected: String,
        got: String,
    },

    #[error("range {offset}..{offset}+{count} exceeds capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        count: usize,
        capacity: usize,
    },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("thread pool error: {0}")]
    ThreadPool(String),
}
