//! Ledger records.

use loopforge_kernels::config::LoopKey;
use loopforge_kernels::elementwise::LoopVariant;
use serde::{Deserialize, Serialize};

/// Statistics of one loop invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub key: LoopKey,
    pub shape: Vec<usize>,
    pub elements: usize,
    pub variant: LoopVariant,
    pub duration_nanos: u64,
    /// Unix-epoch nanoseconds when the call started.
    pub timestamp_nanos: u64,
    pub workers_used: usize,
}

impl LedgerRecord {
    pub fn signature(&self) -> String {
        self.key.signature()
    }

    pub fn threaded(&self) -> bool {
        self.workers_used > 1
    }
}
