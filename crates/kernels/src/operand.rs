//! Type-erased operand views over caller-owned element slices.
//!
//! Loops are registered per element type but dispatched through a single
//! table, so operands travel as enums over the supported slice types. The
//! [`Element`] trait converts between the enums and typed slices.

use crate::config::DataType;
use std::collections::TryReserveError;
use std::fmt;
use std::ops::Range;

/// Scalar element type that can flow through a loop.
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DataType;

    /// Value used for invalid lookups (out-of-range gathers).
    fn invalid() -> Self;

    /// Raw bit pattern, for bit-exact comparisons of floats.
    fn to_bits_u64(self) -> u64;

    fn from_operand(operand: Operand<'_>) -> Option<&[Self]>;
    fn from_operand_mut(operand: OperandMut<'_>) -> Option<&mut [Self]>;
    fn operand(slice: &[Self]) -> Operand<'_>;
    fn operand_mut(slice: &mut [Self]) -> OperandMut<'_>;
    fn from_buf(buf: &OperandBuf) -> Option<&[Self]>;
    fn from_buf_mut(buf: &mut OperandBuf) -> Option<&mut [Self]>;
    fn into_buf(values: Vec<Self>) -> OperandBuf;
    fn from_owned_buf(buf: OperandBuf) -> Result<Vec<Self>, OperandBuf>;
}

macro_rules! define_operands {
    ($( $variant:ident => $ty:ty, $dtype:ident, $invalid:expr, |$v:ident| $bits:expr; )+) => {
        /// Read-only operand.
        #[derive(Debug, Clone, Copy)]
        pub enum Operand<'a> {
            $( $variant(&'a [$ty]), )+
        }

        /// Writable operand.
        #[derive(Debug)]
        pub enum OperandMut<'a> {
            $( $variant(&'a mut [$ty]), )+
        }

        /// Owned operand storage.
        #[derive(Debug, Clone)]
        pub enum OperandBuf {
            $( $variant(Vec<$ty>), )+
        }

        impl<'a> Operand<'a> {
            pub fn dtype(&self) -> DataType {
                match self {
                    $( Operand::$variant(_) => DataType::$dtype, )+
                }
            }

            pub fn len(&self) -> usize {
                match self {
                    $( Operand::$variant(values) => values.len(), )+
                }
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            /// Sub-view over `range`. Panics if the range is out of bounds.
            pub fn slice(&self, range: Range<usize>) -> Operand<'a> {
                match *self {
                    $( Operand::$variant(values) => Operand::$variant(&values[range]), )+
                }
            }

            pub fn to_buf(&self) -> OperandBuf {
                match *self {
                    $( Operand::$variant(values) => OperandBuf::$variant(values.to_vec()), )+
                }
            }

            pub(crate) fn bits_at(&self, index: usize) -> u64 {
                match *self {
                    $( Operand::$variant(values) => {
                        let $v = values[index];
                        $bits
                    } )+
                }
            }
        }

        impl<'a> OperandMut<'a> {
            pub fn dtype(&self) -> DataType {
                match self {
                    $( OperandMut::$variant(_) => DataType::$dtype, )+
                }
            }

            pub fn len(&self) -> usize {
                match self {
                    $( OperandMut::$variant(values) => values.len(), )+
                }
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            /// Splits into `[0, mid)` and `[mid, len)`. Panics if `mid > len`.
            pub fn split_at(self, mid: usize) -> (OperandMut<'a>, OperandMut<'a>) {
                match self {
                    $( OperandMut::$variant(values) => {
                        let (head, tail) = values.split_at_mut(mid);
                        (OperandMut::$variant(head), OperandMut::$variant(tail))
                    } )+
                }
            }

            pub fn reborrow(&mut self) -> OperandMut<'_> {
                match self {
                    $( OperandMut::$variant(values) => OperandMut::$variant(&mut **values), )+
                }
            }

            pub fn as_operand(&self) -> Operand<'_> {
                match self {
                    $( OperandMut::$variant(values) => Operand::$variant(&**values), )+
                }
            }
        }

        impl OperandBuf {
            /// Allocates `len` default-valued elements, reporting allocation
            /// failure instead of aborting.
            pub fn try_zeros(dtype: DataType, len: usize) -> Result<Self, TryReserveError> {
                match dtype {
                    $( DataType::$dtype => {
                        let mut values: Vec<$ty> = Vec::new();
                        values.try_reserve_exact(len)?;
                        values.resize(len, <$ty>::default());
                        Ok(OperandBuf::$variant(values))
                    } )+
                }
            }

            pub fn dtype(&self) -> DataType {
                match self {
                    $( OperandBuf::$variant(_) => DataType::$dtype, )+
                }
            }

            pub fn len(&self) -> usize {
                match self {
                    $( OperandBuf::$variant(values) => values.len(), )+
                }
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            pub fn size_bytes(&self) -> usize {
                self.len() * self.dtype().element_size_bytes()
            }

            pub fn truncate(&mut self, len: usize) {
                match self {
                    $( OperandBuf::$variant(values) => values.truncate(len), )+
                }
            }

            pub fn as_operand(&self) -> Operand<'_> {
                match self {
                    $( OperandBuf::$variant(values) => Operand::$variant(values.as_slice()), )+
                }
            }

            pub fn as_operand_mut(&mut self) -> OperandMut<'_> {
                match self {
                    $( OperandBuf::$variant(values) => OperandMut::$variant(values.as_mut_slice()), )+
                }
            }
        }

        $(
            impl Element for $ty {
                const DTYPE: DataType = DataType::$dtype;

                fn invalid() -> Self {
                    $invalid
                }

                fn to_bits_u64(self) -> u64 {
                    let $v = self;
                    $bits
                }

                fn from_operand(operand: Operand<'_>) -> Option<&[Self]> {
                    match operand {
                        Operand::$variant(values) => Some(values),
                        _ => None,
                    }
                }

                fn from_operand_mut(operand: OperandMut<'_>) -> Option<&mut [Self]> {
                    match operand {
                        OperandMut::$variant(values) => Some(values),
                        _ => None,
                    }
                }

                fn operand(slice: &[Self]) -> Operand<'_> {
                    Operand::$variant(slice)
                }

                fn operand_mut(slice: &mut [Self]) -> OperandMut<'_> {
                    OperandMut::$variant(slice)
                }

                fn from_buf(buf: &OperandBuf) -> Option<&[Self]> {
                    match buf {
                        OperandBuf::$variant(values) => Some(values.as_slice()),
                        _ => None,
                    }
                }

                fn from_buf_mut(buf: &mut OperandBuf) -> Option<&mut [Self]> {
                    match buf {
                        OperandBuf::$variant(values) => Some(values.as_mut_slice()),
                        _ => None,
                    }
                }

                fn into_buf(values: Vec<Self>) -> OperandBuf {
                    OperandBuf::$variant(values)
                }

                fn from_owned_buf(buf: OperandBuf) -> Result<Vec<Self>, OperandBuf> {
                    match buf {
                        OperandBuf::$variant(values) => Ok(values),
                        other => Err(other),
                    }
                }
            }
        )+
    };
}

define_operands! {
    Bool => bool, Bool, false, |v| v as u64;
    I8 => i8, Int8, i8::MIN, |v| v as u8 as u64;
    I16 => i16, Int16, i16::MIN, |v| v as u16 as u64;
    I32 => i32, Int32, i32::MIN, |v| v as u32 as u64;
    I64 => i64, Int64, i64::MIN, |v| v as u64;
    U8 => u8, UInt8, u8::MAX, |v| v as u64;
    U16 => u16, UInt16, u16::MAX, |v| v as u64;
    U32 => u32, UInt32, u32::MAX, |v| v as u64;
    U64 => u64, UInt64, u64::MAX, |v| v;
    F32 => f32, Float32, f32::NAN, |v| v.to_bits() as u64;
    F64 => f64, Float64, f64::NAN, |v| v.to_bits();
}

impl Default for OperandBuf {
    fn default() -> Self {
        OperandBuf::Bool(Vec::new())
    }
}

impl OperandBuf {
    /// Element-by-element bit comparison; NaNs compare by payload.
    pub fn bit_eq(&self, other: &OperandBuf) -> bool {
        self.as_operand().bit_eq(&other.as_operand())
    }

    /// Number of positions whose bit patterns differ. Length or dtype
    /// differences count every element of the longer operand.
    pub fn bit_mismatches(&self, other: &OperandBuf) -> usize {
        self.as_operand().bit_mismatches(&other.as_operand())
    }
}

impl<'a> Operand<'a> {
    pub fn bit_eq(&self, other: &Operand<'_>) -> bool {
        self.bit_mismatches(other) == 0
    }

    pub fn bit_mismatches(&self, other: &Operand<'_>) -> usize {
        if self.dtype() != other.dtype() || self.len() != other.len() {
            return self.len().max(other.len());
        }
        (0..self.len())
            .filter(|&index| self.bits_at(index) != other.bits_at(index))
            .count()
    }
}

impl<'a> OperandMut<'a> {
    /// Splits into consecutive pieces of the given lengths. The lengths must
    /// sum to at most `len()`; any remainder is dropped.
    pub fn split_lengths(self, lengths: impl IntoIterator<Item = usize>) -> Vec<OperandMut<'a>> {
        let mut rest = self;
        let mut parts = Vec::new();
        for len in lengths {
            let (head, tail) = rest.split_at(len);
            parts.push(head);
            rest = tail;
        }
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_round_trips_through_operands() {
        let values = [1i32, 2, 3, 4];
        let operand = i32::operand(&values);
        assert_eq!(operand.dtype(), DataType::Int32);
        assert_eq!(operand.len(), 4);
        assert_eq!(i32::from_operand(operand), Some(&values[..]));
        assert_eq!(f32::from_operand(operand), None);
        assert_eq!(i32::from_operand(operand.slice(1..3)), Some(&values[1..3]));
    }

    #[test]
    fn split_lengths_yields_disjoint_views() {
        let mut values = vec![0u16; 10];
        let parts = u16::operand_mut(&mut values).split_lengths([3, 3, 4]);
        assert_eq!(parts.len(), 3);
        for (index, part) in parts.into_iter().enumerate() {
            let slice = u16::from_operand_mut(part).expect("u16 part");
            slice.iter_mut().for_each(|v| *v = index as u16 + 1);
        }
        assert_eq!(values, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 3]);
    }

    #[test]
    fn bit_comparison_distinguishes_nan_payloads_and_signed_zero() {
        let a = f64::into_buf(vec![f64::NAN, 0.0, 1.5]);
        let b = f64::into_buf(vec![f64::NAN, 0.0, 1.5]);
        let c = f64::into_buf(vec![f64::NAN, -0.0, 1.5]);
        assert!(a.bit_eq(&b));
        assert_eq!(a.bit_mismatches(&c), 1);

        let ints = i64::into_buf(vec![1, 2, 3]);
        assert_eq!(a.bit_mismatches(&ints), 3);
    }

    #[test]
    fn try_zeros_allocates_default_values() {
        let buf = OperandBuf::try_zeros(DataType::Float32, 5).expect("allocation");
        assert_eq!(buf.dtype(), DataType::Float32);
        assert_eq!(buf.size_bytes(), 20);
        assert_eq!(f32::from_buf(&buf), Some(&[0.0f32; 5][..]));
    }
}
