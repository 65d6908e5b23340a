//! Shared helpers for loop implementations.

use crate::error::{LoopError, Result};
use crate::operand::{Element, Operand, OperandMut};

/// Checks operand count and lengths for an element-wise loop and returns
/// the element count.
pub fn validate_elementwise(
    kernel: &str,
    arity: usize,
    inputs: &[Operand<'_>],
    output: &OperandMut<'_>,
) -> Result<usize> {
    if inputs.len() != arity {
        return Err(LoopError::Arity {
            kernel: kernel.to_string(),
            expected: arity,
            actual: inputs.len(),
        });
    }
    let elements = output.len();
    for (index, input) in inputs.iter().enumerate() {
        if input.len() != elements {
            return Err(LoopError::ShapeMismatch {
                kernel: kernel.to_string(),
                operand: index,
                expected: elements,
                actual: input.len(),
            });
        }
    }
    Ok(elements)
}

pub fn typed_input<'a, T: Element>(kernel: &str, index: usize, operand: Operand<'a>) -> Result<&'a [T]> {
    let actual = operand.dtype();
    T::from_operand(operand).ok_or_else(|| LoopError::DTypeMismatch {
        kernel: kernel.to_string(),
        operand: index,
        expected: T::DTYPE,
        actual,
    })
}

pub fn typed_output<'a, T: Element>(
    kernel: &str,
    index: usize,
    operand: OperandMut<'a>,
) -> Result<&'a mut [T]> {
    let actual = operand.dtype();
    T::from_operand_mut(operand).ok_or_else(|| LoopError::DTypeMismatch {
        kernel: kernel.to_string(),
        operand: index,
        expected: T::DTYPE,
        actual,
    })
}

/// Contiguous ranges splitting `len` elements into at most `parts` pieces
/// whose sizes differ by at most one. Empty ranges are never produced.
pub fn partition_ranges(len: usize, parts: usize) -> Vec<std::ops::Range<usize>> {
    let parts = parts.max(1).min(len.max(1));
    let base = len / parts;
    let extra = len % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for part in 0..parts {
        let size = base + usize::from(part < extra);
        if size == 0 {
            continue;
        }
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}
