//! Element types, loop operations and loop signatures.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl DataType {
    pub const ALL: [DataType; 11] = [
        DataType::Bool,
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::UInt8,
        DataType::UInt16,
        DataType::UInt32,
        DataType::UInt64,
        DataType::Float32,
        DataType::Float64,
    ];

    pub fn element_size_bytes(&self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }

    /// Single-character type code used in compact signatures (`ii->i`).
    pub fn type_char(&self) -> char {
        match self {
            DataType::Bool => '?',
            DataType::Int8 => 'b',
            DataType::Int16 => 'h',
            DataType::Int32 => 'i',
            DataType::Int64 => 'l',
            DataType::UInt8 => 'B',
            DataType::UInt16 => 'H',
            DataType::UInt32 => 'I',
            DataType::UInt64 => 'L',
            DataType::Float32 => 'f',
            DataType::Float64 => 'd',
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        DataType::ALL
            .into_iter()
            .find(|dtype| dtype.name() == name || dtype.type_char().to_string() == name)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_integer(&self) -> bool {
        !self.is_float() && *self != DataType::Bool
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operation identifier of an element-wise loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Minimum,
    Maximum,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    LogicalAnd,
    LogicalOr,
    Negative,
    Absolute,
    Sqrt,
    LogicalNot,
}

impl LoopOp {
    pub const ALL: [LoopOp; 18] = [
        LoopOp::Add,
        LoopOp::Subtract,
        LoopOp::Multiply,
        LoopOp::Divide,
        LoopOp::Minimum,
        LoopOp::Maximum,
        LoopOp::Equal,
        LoopOp::NotEqual,
        LoopOp::Less,
        LoopOp::LessEqual,
        LoopOp::Greater,
        LoopOp::GreaterEqual,
        LoopOp::LogicalAnd,
        LoopOp::LogicalOr,
        LoopOp::Negative,
        LoopOp::Absolute,
        LoopOp::Sqrt,
        LoopOp::LogicalNot,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LoopOp::Add => "add",
            LoopOp::Subtract => "subtract",
            LoopOp::Multiply => "multiply",
            LoopOp::Divide => "divide",
            LoopOp::Minimum => "minimum",
            LoopOp::Maximum => "maximum",
            LoopOp::Equal => "equal",
            LoopOp::NotEqual => "not_equal",
            LoopOp::Less => "less",
            LoopOp::LessEqual => "less_equal",
            LoopOp::Greater => "greater",
            LoopOp::GreaterEqual => "greater_equal",
            LoopOp::LogicalAnd => "logical_and",
            LoopOp::LogicalOr => "logical_or",
            LoopOp::Negative => "negative",
            LoopOp::Absolute => "absolute",
            LoopOp::Sqrt => "sqrt",
            LoopOp::LogicalNot => "logical_not",
        }
    }

    /// Number of input operands.
    pub fn arity(&self) -> usize {
        match self {
            LoopOp::Negative | LoopOp::Absolute | LoopOp::Sqrt | LoopOp::LogicalNot => 1,
            _ => 2,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        LoopOp::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl fmt::Display for LoopOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lookup key of a loop: operation, operand element types and arity.
///
/// `dtypes` holds the input types followed by the output type, so it always
/// has `arity + 1` entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoopKey {
    op: LoopOp,
    dtypes: Vec<DataType>,
    arity: usize,
}

impl LoopKey {
    pub fn new(op: LoopOp, inputs: &[DataType], output: DataType) -> Self {
        let mut dtypes = Vec::with_capacity(inputs.len() + 1);
        dtypes.extend_from_slice(inputs);
        dtypes.push(output);
        Self {
            op,
            dtypes,
            arity: inputs.len(),
        }
    }

    pub fn op(&self) -> LoopOp {
        self.op
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn dtypes(&self) -> &[DataType] {
        &self.dtypes
    }

    pub fn inputs(&self) -> &[DataType] {
        &self.dtypes[..self.arity]
    }

    pub fn output(&self) -> DataType {
        self.dtypes[self.arity]
    }

    /// Compact signature, e.g. `add:ii->i`.
    pub fn signature(&self) -> String {
        let inputs: String = self.inputs().iter().map(DataType::type_char).collect();
        format!("{}:{}->{}", self.op, inputs, self.output().type_char())
    }
}

impl fmt::Display for LoopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn loop_key_equality_is_structural() {
        let a = LoopKey::new(LoopOp::Add, &[DataType::Int32, DataType::Int32], DataType::Int32);
        let b = LoopKey::new(LoopOp::Add, &[DataType::Int32, DataType::Int32], DataType::Int32);
        let c = LoopKey::new(LoopOp::Add, &[DataType::Int64, DataType::Int64], DataType::Int64);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(a.signature(), "add:ii->i");
        assert_eq!(a.output(), DataType::Int32);
        assert_eq!(a.inputs(), &[DataType::Int32, DataType::Int32]);
    }

    #[test]
    fn names_round_trip() {
        for op in LoopOp::ALL {
            assert_eq!(LoopOp::from_name(op.name()), Some(op));
        }
        for dtype in DataType::ALL {
            assert_eq!(DataType::from_name(dtype.name()), Some(dtype));
        }
        assert_eq!(DataType::from_name("d"), Some(DataType::Float64));
    }
}
