pub mod api;
#[cfg(feature = "cli")]
pub mod cli;
pub mod eval;
pub mod ufunc;

pub use api::*;
#[cfg(feature = "cli")]
pub use cli::*;
pub use eval::*;

pub use loopforge_kernels::{DataType, Element, LoopError, LoopKey, LoopOp, Operand, OperandMut};
pub use loopforge_ledger::{LedgerInfo, LedgerRecord, SignatureSummary};
pub use loopforge_runtime::{ControlState, RecycledBuffer, RecyclerInfo, RuntimeOptions, Toggle};
