//! Index gathering and boolean mask selection.

use crate::config::DataType;
use crate::error::{LoopError, Result};
use crate::operand::{Element, Operand};

/// Integer types usable as gather indices.
pub trait IndexValue: Copy {
    /// Position addressed in an array of `len` elements. Negative signed
    /// indices count from the end; anything outside `[-len, len)` is `None`.
    fn resolve(self, len: usize) -> Option<usize>;
}

macro_rules! signed_index {
    ($($ty:ty),+) => {$(
        impl IndexValue for $ty {
            fn resolve(self, len: usize) -> Option<usize> {
                let index = i64::from(self);
                let len = i64::try_from(len).ok()?;
                if index >= 0 && index < len {
                    usize::try_from(index).ok()
                } else if index < 0 && index >= -len {
                    usize::try_from(index + len).ok()
                } else {
                    None
                }
            }
        }
    )+};
}

macro_rules! unsigned_index {
    ($($ty:ty),+) => {$(
        impl IndexValue for $ty {
            fn resolve(self, len: usize) -> Option<usize> {
                usize::try_from(self).ok().filter(|&index| index < len)
            }
        }
    )+};
}

signed_index!(i8, i16, i32, i64);
unsigned_index!(u8, u16, u32, u64);

/// Writes `values[indices[i]]` into `out[i]`, or `default` for indices out of
/// range.
pub fn gather_typed<T: Element, I: IndexValue>(values: &[T], indices: &[I], default: T, out: &mut [T]) {
    let len = values.len();
    for (dst, &index) in out.iter_mut().zip(indices) {
        *dst = index.resolve(len).map_or(default, |position| values[position]);
    }
}

/// Type-erased front-end over [`gather_typed`] accepting any integer index
/// operand.
pub fn gather<T: Element>(values: &[T], indices: Operand<'_>, default: T, out: &mut [T]) -> Result<()> {
    if out.len() != indices.len() {
        return Err(LoopError::ShapeMismatch {
            kernel: "getitem".to_string(),
            operand: 1,
            expected: out.len(),
            actual: indices.len(),
        });
    }
    match indices {
        Operand::I8(idx) => gather_typed(values, idx, default, out),
        Operand::I16(idx) => gather_typed(values, idx, default, out),
        Operand::I32(idx) => gather_typed(values, idx, default, out),
        Operand::I64(idx) => gather_typed(values, idx, default, out),
        Operand::U8(idx) => gather_typed(values, idx, default, out),
        Operand::U16(idx) => gather_typed(values, idx, default, out),
        Operand::U32(idx) => gather_typed(values, idx, default, out),
        Operand::U64(idx) => gather_typed(values, idx, default, out),
        other => return Err(invalid_index_dtype(other.dtype())),
    }
    Ok(())
}

fn invalid_index_dtype(dtype: DataType) -> LoopError {
    LoopError::InvalidIndex(format!("index dtype {dtype} is not an integer type"))
}

pub fn count_true(mask: &[bool]) -> usize {
    mask.iter().filter(|&&flag| flag).count()
}

/// Copies `values[i]` for every set `mask[i]` into the front of `out`, in
/// order, and returns the number copied. `out` must hold at least
/// `count_true(mask)` elements.
pub fn select_masked<T: Element>(values: &[T], mask: &[bool], out: &mut [T]) -> usize {
    let mut written = 0;
    for (&value, _) in values.iter().zip(mask).filter(|(_, &flag)| flag) {
        out[written] = value;
        written += 1;
    }
    written
}
