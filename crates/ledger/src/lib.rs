//! Instrumentation ledger and timers for LoopForge.

pub mod ledger;
pub mod record;
pub mod summary;
pub mod timer;

pub use ledger::*;
pub use record::*;
pub use summary::*;
pub use timer::*;
