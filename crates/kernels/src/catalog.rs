//! Built-in loop catalog: the reference loops a host table carries and the
//! atop overrides installed on top of them.

use crate::config::{DataType, LoopKey, LoopOp};
use crate::elementwise::{
    AtopBinary, AtopUnary, BinaryFn, DynLoopKernel, ReferenceBinary, ReferenceUnary, UnaryFn,
};
use crate::operand::Element;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct LoopCatalog {
    reference: HashMap<LoopKey, DynLoopKernel>,
    atop: HashMap<LoopKey, DynLoopKernel>,
}

impl LoopCatalog {
    pub fn builtin() -> Self {
        let mut catalog = Self::default();

        macro_rules! signed {
            ($($ty:ty),+) => {$(
                catalog.arithmetic::<$ty>(|a, b| a.wrapping_add(b), |a, b| a.wrapping_sub(b), |a, b| a.wrapping_mul(b));
                catalog.ordered::<$ty>();
                catalog.unary::<$ty, $ty>(LoopOp::Negative, |v| v.wrapping_neg());
                catalog.unary::<$ty, $ty>(LoopOp::Absolute, |v| v.wrapping_abs());
            )+};
        }

        macro_rules! unsigned {
            ($($ty:ty),+) => {$(
                catalog.arithmetic::<$ty>(|a, b| a.wrapping_add(b), |a, b| a.wrapping_sub(b), |a, b| a.wrapping_mul(b));
                catalog.ordered::<$ty>();
                catalog.unary::<$ty, $ty>(LoopOp::Negative, |v| v.wrapping_neg());
                catalog.unary::<$ty, $ty>(LoopOp::Absolute, |v| v);
            )+};
        }

        macro_rules! float {
            ($($ty:ty),+) => {$(
                catalog.arithmetic::<$ty>(|a, b| a + b, |a, b| a - b, |a, b| a * b);
                catalog.binary::<$ty, $ty>(LoopOp::Divide, |a, b| a / b);
                catalog.binary::<$ty, $ty>(LoopOp::Minimum, |a, b| if a <= b || a.is_nan() { a } else { b });
                catalog.binary::<$ty, $ty>(LoopOp::Maximum, |a, b| if a >= b || a.is_nan() { a } else { b });
                catalog.comparisons::<$ty>();
                catalog.unary::<$ty, $ty>(LoopOp::Negative, |v| -v);
                catalog.unary::<$ty, $ty>(LoopOp::Absolute, |v| v.abs());
                catalog.unary::<$ty, $ty>(LoopOp::Sqrt, |v| v.sqrt());
            )+};
        }

        signed!(i8, i16, i32, i64);
        unsigned!(u8, u16, u32, u64);
        float!(f32, f64);

        catalog.comparisons::<bool>();
        catalog.binary::<bool, bool>(LoopOp::LogicalAnd, |a, b| a && b);
        catalog.binary::<bool, bool>(LoopOp::LogicalOr, |a, b| a || b);
        catalog.unary::<bool, bool>(LoopOp::LogicalNot, |v| !v);

        catalog
    }

    /// Reference loops keyed by signature.
    pub fn reference(&self) -> &HashMap<LoopKey, DynLoopKernel> {
        &self.reference
    }

    /// Atop overrides keyed by signature.
    pub fn atop(&self) -> &HashMap<LoopKey, DynLoopKernel> {
        &self.atop
    }

    pub fn into_parts(self) -> (HashMap<LoopKey, DynLoopKernel>, HashMap<LoopKey, DynLoopKernel>) {
        (self.reference, self.atop)
    }

    pub fn binary<T: Element, O: Element>(&mut self, op: LoopOp, f: BinaryFn<T, O>) {
        let key = LoopKey::new(op, &[T::DTYPE, T::DTYPE], O::DTYPE);
        self.reference
            .insert(key.clone(), Arc::new(ReferenceBinary::new(key.clone(), f)));
        self.atop.insert(key.clone(), Arc::new(AtopBinary::new(key, f)));
    }

    pub fn unary<T: Element, O: Element>(&mut self, op: LoopOp, f: UnaryFn<T, O>) {
        let key = LoopKey::new(op, &[T::DTYPE], O::DTYPE);
        self.reference
            .insert(key.clone(), Arc::new(ReferenceUnary::new(key.clone(), f)));
        self.atop.insert(key.clone(), Arc::new(AtopUnary::new(key, f)));
    }

    fn arithmetic<T: Element>(&mut self, add: BinaryFn<T, T>, sub: BinaryFn<T, T>, mul: BinaryFn<T, T>) {
        self.binary::<T, T>(LoopOp::Add, add);
        self.binary::<T, T>(LoopOp::Subtract, sub);
        self.binary::<T, T>(LoopOp::Multiply, mul);
    }

    /// Minimum, maximum and comparisons for totally ordered types.
    fn ordered<T: Element + PartialOrd>(&mut self) {
        self.binary::<T, T>(LoopOp::Minimum, |a, b| if a <= b { a } else { b });
        self.binary::<T, T>(LoopOp::Maximum, |a, b| if a >= b { a } else { b });
        self.comparisons::<T>();
    }

    fn comparisons<T: Element + PartialOrd>(&mut self) {
        self.binary::<T, bool>(LoopOp::Equal, |a, b| a == b);
        self.binary::<T, bool>(LoopOp::NotEqual, |a, b| a != b);
        self.binary::<T, bool>(LoopOp::Less, |a, b| a < b);
        self.binary::<T, bool>(LoopOp::LessEqual, |a, b| a <= b);
        self.binary::<T, bool>(LoopOp::Greater, |a, b| a > b);
        self.binary::<T, bool>(LoopOp::GreaterEqual, |a, b| a >= b);
    }
}

/// Output type the catalog registers for `op` applied to `input`, if any.
pub fn builtin_output(op: LoopOp, input: DataType) -> Option<DataType> {
    use LoopOp::*;
    match op {
        Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual => Some(DataType::Bool),
        LogicalAnd | LogicalOr | LogicalNot => (input == DataType::Bool).then_some(DataType::Bool),
        Add | Subtract | Multiply | Minimum | Maximum | Negative | Absolute => {
            (input != DataType::Bool).then_some(input)
        }
        Divide | Sqrt => input.is_float().then_some(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::{Element, OperandBuf};

    #[test]
    fn catalog_covers_every_builtin_signature() {
        let catalog = LoopCatalog::builtin();
        for op in LoopOp::ALL {
            for dtype in DataType::ALL {
                let inputs = vec![dtype; op.arity()];
                match builtin_output(op, dtype) {
                    Some(output) => {
                        let key = LoopKey::new(op, &inputs, output);
                        assert!(catalog.reference().contains_key(&key), "missing {key}");
                        assert!(catalog.atop().contains_key(&key), "missing atop {key}");
                    }
                    None => {
                        assert!(
                            !catalog.reference().keys().any(|k| k.op() == op && k.inputs() == inputs),
                            "unexpected {op} for {dtype}"
                        );
                    }
                }
            }
        }
        assert_eq!(catalog.reference().len(), catalog.atop().len());
    }

    #[test]
    fn float_minimum_propagates_nan() {
        let catalog = LoopCatalog::builtin();
        let key = LoopKey::new(LoopOp::Minimum, &[DataType::Float64, DataType::Float64], DataType::Float64);
        let lhs = [1.0f64, f64::NAN, 3.0];
        let rhs = [f64::NAN, 2.0, -3.0];
        for table in [catalog.reference(), catalog.atop()] {
            let mut out = OperandBuf::try_zeros(DataType::Float64, 3).unwrap();
            table[&key]
                .run(&[f64::operand(&lhs), f64::operand(&rhs)], out.as_operand_mut())
                .unwrap();
            let values = f64::from_buf(&out).unwrap();
            assert!(values[0].is_nan());
            assert!(values[1].is_nan());
            assert_eq!(values[2], -3.0);
        }
    }

    #[test]
    fn integer_arithmetic_wraps() {
        let catalog = LoopCatalog::builtin();
        let key = LoopKey::new(LoopOp::Add, &[DataType::UInt8, DataType::UInt8], DataType::UInt8);
        let lhs = [250u8, 1];
        let rhs = [10u8, 2];
        let mut out = [0u8; 2];
        catalog.atop()[&key]
            .run(&[u8::operand(&lhs), u8::operand(&rhs)], u8::operand_mut(&mut out))
            .unwrap();
        assert_eq!(out, [4, 3]);
    }
}
