//! Element-wise loop kernels.
//!
//! Every loop exists in two flavours sharing one scalar function: the
//! reference loop the host table carries, and an "atop" loop that walks the
//! operands in fixed-width lane blocks so the compiler can vectorize the
//! body. Both apply the identical scalar function per element, so outputs
//! are bit-identical.

use crate::config::LoopKey;
use crate::error::Result;
use crate::operand::{Element, Operand, OperandMut};
use crate::utils::{typed_input, typed_output, validate_elementwise};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lane width of the blocked loops.
pub const LANES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopVariant {
    Original,
    Atop,
}

impl LoopVariant {
    pub fn name(&self) -> &'static str {
        match self {
            LoopVariant::Original => "original",
            LoopVariant::Atop => "atop",
        }
    }
}

pub trait LoopKernel: Send + Sync {
    fn key(&self) -> &LoopKey;
    fn variant(&self) -> LoopVariant;

    /// Whether the loop may be split across disjoint output ranges.
    fn threadable(&self) -> bool {
        true
    }

    /// Runs the loop over equally sized operands. `inputs.len()` must equal
    /// the key's arity and every input must match `output.len()`.
    fn run(&self, inputs: &[Operand<'_>], output: OperandMut<'_>) -> Result<()>;

    fn label(&self) -> String {
        format!("{}[{}]", self.key(), self.variant().name())
    }
}

pub type DynLoopKernel = Arc<dyn LoopKernel>;

pub type BinaryFn<T, O> = fn(T, T) -> O;
pub type UnaryFn<T, O> = fn(T) -> O;

fn binary_operands<'a, T: Element, O: Element>(
    label: &str,
    inputs: &[Operand<'a>],
    output: OperandMut<'a>,
) -> Result<(&'a [T], &'a [T], &'a mut [O])> {
    validate_elementwise(label, 2, inputs, &output)?;
    let lhs = typed_input::<T>(label, 0, inputs[0])?;
    let rhs = typed_input::<T>(label, 1, inputs[1])?;
    let out = typed_output::<O>(label, 2, output)?;
    Ok((lhs, rhs, out))
}

fn unary_operands<'a, T: Element, O: Element>(
    label: &str,
    inputs: &[Operand<'a>],
    output: OperandMut<'a>,
) -> Result<(&'a [T], &'a mut [O])> {
    validate_elementwise(label, 1, inputs, &output)?;
    let src = typed_input::<T>(label, 0, inputs[0])?;
    let out = typed_output::<O>(label, 1, output)?;
    Ok((src, out))
}

pub struct ReferenceBinary<T, O> {
    key: LoopKey,
    op: BinaryFn<T, O>,
}

impl<T: Element, O: Element> ReferenceBinary<T, O> {
    pub fn new(key: LoopKey, op: BinaryFn<T, O>) -> Self {
        Self { key, op }
    }
}

impl<T: Element, O: Element> LoopKernel for ReferenceBinary<T, O> {
    fn key(&self) -> &LoopKey {
        &self.key
    }

    fn variant(&self) -> LoopVariant {
        LoopVariant::Original
    }

    fn run(&self, inputs: &[Operand<'_>], output: OperandMut<'_>) -> Result<()> {
        let (lhs, rhs, out) = binary_operands::<T, O>(&self.label(), inputs, output)?;
        for ((dst, &a), &b) in out.iter_mut().zip(lhs).zip(rhs) {
            *dst = (self.op)(a, b);
        }
        Ok(())
    }
}

pub struct AtopBinary<T, O> {
    key: LoopKey,
    op: BinaryFn<T, O>,
}

impl<T: Element, O: Element> AtopBinary<T, O> {
    pub fn new(key: LoopKey, op: BinaryFn<T, O>) -> Self {
        Self { key, op }
    }
}

impl<T: Element, O: Element> LoopKernel for AtopBinary<T, O> {
    fn key(&self) -> &LoopKey {
        &self.key
    }

    fn variant(&self) -> LoopVariant {
        LoopVariant::Atop
    }

    fn run(&self, inputs: &[Operand<'_>], output: OperandMut<'_>) -> Result<()> {
        let (lhs, rhs, out) = binary_operands::<T, O>(&self.label(), inputs, output)?;
        let op = self.op;

        let mut out_blocks = out.chunks_exact_mut(LANES);
        let mut lhs_blocks = lhs.chunks_exact(LANES);
        let mut rhs_blocks = rhs.chunks_exact(LANES);
        for ((dst, a), b) in out_blocks
            .by_ref()
            .zip(lhs_blocks.by_ref())
            .zip(rhs_blocks.by_ref())
        {
            for lane in 0..LANES {
                dst[lane] = op(a[lane], b[lane]);
            }
        }

        let tail = out_blocks.into_remainder();
        for ((dst, &a), &b) in tail
            .iter_mut()
            .zip(lhs_blocks.remainder())
            .zip(rhs_blocks.remainder())
        {
            *dst = op(a, b);
        }
        Ok(())
    }
}

pub struct ReferenceUnary<T, O> {
    key: LoopKey,
    op: UnaryFn<T, O>,
}

impl<T: Element, O: Element> ReferenceUnary<T, O> {
    pub fn new(key: LoopKey, op: UnaryFn<T, O>) -> Self {
        Self { key, op }
    }
}

impl<T: Element, O: Element> LoopKernel for ReferenceUnary<T, O> {
    fn key(&self) -> &LoopKey {
        &self.key
    }

    fn variant(&self) -> LoopVariant {
        LoopVariant::Original
    }

    fn run(&self, inputs: &[Operand<'_>], output: OperandMut<'_>) -> Result<()> {
        let (src, out) = unary_operands::<T, O>(&self.label(), inputs, output)?;
        for (dst, &value) in out.iter_mut().zip(src) {
            *dst = (self.op)(value);
        }
        Ok(())
    }
}

pub struct AtopUnary<T, O> {
    key: LoopKey,
    op: UnaryFn<T, O>,
}

impl<T: Element, O: Element> AtopUnary<T, O> {
    pub fn new(key: LoopKey, op: UnaryFn<T, O>) -> Self {
        Self { key, op }
    }
}

impl<T: Element, O: Element> LoopKernel for AtopUnary<T, O> {
    fn key(&self) -> &LoopKey {
        &self.key
    }

    fn variant(&self) -> LoopVariant {
        LoopVariant::Atop
    }

    fn run(&self, inputs: &[Operand<'_>], output: OperandMut<'_>) -> Result<()> {
        let (src, out) = unary_operands::<T, O>(&self.label(), inputs, output)?;
        let op = self.op;

        let mut out_blocks = out.chunks_exact_mut(LANES);
        let mut src_blocks = src.chunks_exact(LANES);
        for (dst, values) in out_blocks.by_ref().zip(src_blocks.by_ref()) {
            for lane in 0..LANES {
                dst[lane] = op(values[lane]);
            }
        }

        let tail = out_blocks.into_remainder();
        for (dst, &value) in tail.iter_mut().zip(src_blocks.remainder()) {
            *dst = op(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataType, LoopOp};
    use crate::error::LoopError;

    fn add_key() -> LoopKey {
        LoopKey::new(LoopOp::Add, &[DataType::Float32, DataType::Float32], DataType::Float32)
    }

    #[test]
    fn atop_matches_reference_bit_for_bit() {
        let mut rng = fastrand::Rng::with_seed(7);
        for len in [0usize, 1, 7, 8, 9, 63, 1000] {
            let lhs: Vec<f32> = (0..len).map(|_| rng.f32() * 200.0 - 100.0).collect();
            let rhs: Vec<f32> = (0..len).map(|_| rng.f32() * 200.0 - 100.0).collect();
            let reference = ReferenceBinary::<f32, f32>::new(add_key(), |a, b| a + b);
            let atop = AtopBinary::<f32, f32>::new(add_key(), |a, b| a + b);

            let mut expected = vec![0.0f32; len];
            let mut actual = vec![0.0f32; len];
            let inputs = [f32::operand(&lhs), f32::operand(&rhs)];
            reference.run(&inputs, f32::operand_mut(&mut expected)).unwrap();
            atop.run(&inputs, f32::operand_mut(&mut actual)).unwrap();

            let expected_bits: Vec<u32> = expected.iter().map(|v| v.to_bits()).collect();
            let actual_bits: Vec<u32> = actual.iter().map(|v| v.to_bits()).collect();
            assert_eq!(expected_bits, actual_bits, "len {len}");
        }
    }

    #[test]
    fn unary_blocks_cover_the_tail() {
        let key = LoopKey::new(LoopOp::Negative, &[DataType::Int8], DataType::Int8);
        let kernel = AtopUnary::<i8, i8>::new(key, |v| v.wrapping_neg());
        let src: Vec<i8> = (0..11).map(|v| v as i8 - 5).chain([i8::MIN]).collect();
        let mut out = vec![0i8; src.len()];
        kernel.run(&[i8::operand(&src)], i8::operand_mut(&mut out)).unwrap();
        let expected: Vec<i8> = src.iter().map(|v| v.wrapping_neg()).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn wrong_dtype_is_rejected() {
        let kernel = ReferenceBinary::<f32, f32>::new(add_key(), |a, b| a + b);
        let lhs = [1.0f64, 2.0];
        let rhs = [1.0f32, 2.0];
        let mut out = [0.0f32; 2];
        let err = kernel
            .run(&[f64::operand(&lhs), f32::operand(&rhs)], f32::operand_mut(&mut out))
            .unwrap_err();
        assert!(matches!(
            err,
            LoopError::DTypeMismatch { operand: 0, expected: DataType::Float32, actual: DataType::Float64, .. }
        ));
    }
}
