//! Array-level front-ends over [`crate::api::dispatch_shaped`].
//!
//! Operands must already share a shape; broadcasting is the caller's job.

use crate::api::dispatch_shaped;
use anyhow::{anyhow, bail, Result};
use loopforge_kernels::config::{LoopKey, LoopOp};
use loopforge_kernels::operand::Element;
use ndarray::{Array, ArrayBase, Data, Dimension};

/// Applies the binary loop `op` with input type `T` and output type `O`.
pub fn binary<T, O, S, D>(op: LoopOp, lhs: &ArrayBase<S, D>, rhs: &ArrayBase<S, D>) -> Result<Array<O, D>>
where
    T: Element,
    O: Element,
    S: Data<Elem = T>,
    D: Dimension,
{
    if lhs.shape() != rhs.shape() {
        bail!("{op}: shape {:?} does not match {:?}", lhs.shape(), rhs.shape());
    }
    let key = LoopKey::new(op, &[T::DTYPE, T::DTYPE], O::DTYPE);
    let lhs = lhs.as_standard_layout();
    let rhs = rhs.as_standard_layout();
    let lhs_values = lhs.as_slice().ok_or_else(|| anyhow!("{op}: lhs is not contiguous"))?;
    let rhs_values = rhs.as_slice().ok_or_else(|| anyhow!("{op}: rhs is not contiguous"))?;

    let mut out = Array::<O, D>::default(lhs.raw_dim());
    let shape = out.shape().to_vec();
    let out_values = out
        .as_slice_mut()
        .ok_or_else(|| anyhow!("{op}: output is not contiguous"))?;
    dispatch_shaped(
        &key,
        &shape,
        &[T::operand(lhs_values), T::operand(rhs_values)],
        O::operand_mut(out_values),
    )?;
    Ok(out)
}

/// Applies the unary loop `op` with input type `T` and output type `O`.
pub fn unary<T, O, S, D>(op: LoopOp, input: &ArrayBase<S, D>) -> Result<Array<O, D>>
where
    T: Element,
    O: Element,
    S: Data<Elem = T>,
    D: Dimension,
{
    let key = LoopKey::new(op, &[T::DTYPE], O::DTYPE);
    let input = input.as_standard_layout();
    let values = input
        .as_slice()
        .ok_or_else(|| anyhow!("{op}: input is not contiguous"))?;

    let mut out = Array::<O, D>::default(input.raw_dim());
    let shape = out.shape().to_vec();
    let out_values = out
        .as_slice_mut()
        .ok_or_else(|| anyhow!("{op}: output is not contiguous"))?;
    dispatch_shaped(&key, &shape, &[T::operand(values)], O::operand_mut(out_values))?;
    Ok(out)
}

macro_rules! same_type_binary {
    ($($name:ident => $op:ident),+ $(,)?) => {
        $(
            pub fn $name<T, S, D>(lhs: &ArrayBase<S, D>, rhs: &ArrayBase<S, D>) -> Result<Array<T, D>>
            where
                T: Element,
                S: Data<Elem = T>,
                D: Dimension,
            {
                binary::<T, T, S, D>(LoopOp::$op, lhs, rhs)
            }
        )+
    };
}

macro_rules! comparison {
    ($($name:ident => $op:ident),+ $(,)?) => {
        $(
            pub fn $name<T, S, D>(lhs: &ArrayBase<S, D>, rhs: &ArrayBase<S, D>) -> Result<Array<bool, D>>
            where
                T: Element,
                S: Data<Elem = T>,
                D: Dimension,
            {
                binary::<T, bool, S, D>(LoopOp::$op, lhs, rhs)
            }
        )+
    };
}

same_type_binary! {
    add => Add,
    subtract => Subtract,
    multiply => Multiply,
    divide => Divide,
    minimum => Minimum,
    maximum => Maximum,
}

comparison! {
    equal => Equal,
    not_equal => NotEqual,
    less => Less,
    less_equal => LessEqual,
    greater => Greater,
    greater_equal => GreaterEqual,
}

pub fn negative<T, S, D>(input: &ArrayBase<S, D>) -> Result<Array<T, D>>
where
    T: Element,
    S: Data<Elem = T>,
    D: Dimension,
{
    unary::<T, T, S, D>(LoopOp::Negative, input)
}

pub fn absolute<T, S, D>(input: &ArrayBase<S, D>) -> Result<Array<T, D>>
where
    T: Element,
    S: Data<Elem = T>,
    D: Dimension,
{
    unary::<T, T, S, D>(LoopOp::Absolute, input)
}

pub fn sqrt<T, S, D>(input: &ArrayBase<S, D>) -> Result<Array<T, D>>
where
    T: Element,
    S: Data<Elem = T>,
    D: Dimension,
{
    unary::<T, T, S, D>(LoopOp::Sqrt, input)
}
