//! Loop primitives for LoopForge: element types, operand views, element-wise
//! kernels and the loop override registry.

pub mod catalog;
pub mod config;
pub mod elementwise;
pub mod error;
pub mod gather;
pub mod operand;
pub mod registry;
pub mod utils;

pub use catalog::*;
pub use config::*;
pub use elementwise::*;
pub use error::*;
pub use gather::*;
pub use operand::*;
pub use registry::*;
pub use utils::*;
