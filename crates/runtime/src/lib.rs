//! Execution control for LoopForge: control state, CPU probe, worker pool,
//! buffer recycler and the loop dispatcher.

pub mod control;
pub mod planner;
pub mod pool;
pub mod probe;
pub mod recycler;
pub mod runtime;

pub use control::*;
pub use planner::*;
pub use pool::*;
pub use probe::*;
pub use recycler::*;
pub use runtime::*;
