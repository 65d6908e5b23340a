//! Error types for loop lookup and execution.

use crate::config::DataType;
use thiserror::Error;

/// Errors raised while resolving or running an element-wise loop.
#[derive(Debug, Error)]
pub enum LoopError {
    /// No loop is registered for the signature, neither as an override nor in
    /// the host loop table.
    #[error("no loop registered for signature {signature}")]
    Lookup { signature: String },

    /// An operand does not have the element count the loop expects.
    #[error("{kernel}: operand {operand} has {actual} elements, expected {expected}")]
    ShapeMismatch {
        kernel: String,
        operand: usize,
        expected: usize,
        actual: usize,
    },

    /// An operand does not have the element type the loop was registered for.
    #[error("{kernel}: operand {operand} has dtype {actual}, expected {expected}")]
    DTypeMismatch {
        kernel: String,
        operand: usize,
        expected: DataType,
        actual: DataType,
    },

    /// Wrong number of input operands.
    #[error("{kernel}: expected {expected} input operands, got {actual}")]
    Arity {
        kernel: String,
        expected: usize,
        actual: usize,
    },

    /// An index operand cannot be used for gathering.
    #[error("invalid index operand: {0}")]
    InvalidIndex(String),

    /// A worker partition panicked.
    #[error("worker partition {partition} failed: {detail}")]
    WorkerFailure { partition: usize, detail: String },

    /// Worker threads or buffer memory could not be allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),
}

/// Result type for loop operations.
pub type Result<T> = std::result::Result<T, LoopError>;
