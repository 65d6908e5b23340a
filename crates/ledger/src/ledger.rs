//! Append-only invocation ledger.

use crate::record::LedgerRecord;
use crate::summary::LedgerInfo;
use parking_lot::Mutex;
use std::sync::Arc;

/// Records per sealed segment.
pub const SEGMENT_LEN: usize = 1024;

#[derive(Debug, Default)]
struct LedgerLog {
    /// Full segments, immutable once sealed.
    sealed: Vec<Arc<Vec<LedgerRecord>>>,
    tail: Vec<LedgerRecord>,
}

impl LedgerLog {
    fn push(&mut self, record: LedgerRecord) {
        if self.tail.capacity() == 0 {
            self.tail.reserve_exact(SEGMENT_LEN);
        }
        self.tail.push(record);
        if self.tail.len() == SEGMENT_LEN {
            let full = std::mem::take(&mut self.tail);
            self.sealed.push(Arc::new(full));
        }
    }

    fn len(&self) -> usize {
        self.sealed.len() * SEGMENT_LEN + self.tail.len()
    }
}

/// Concurrent append-only log of [`LedgerRecord`]s.
///
/// Records are kept in fixed-size segments. A reader only clones segment
/// handles and the partial tail under the lock, then copies records out
/// after releasing it, so appends never wait on a full copy of the log.
#[derive(Debug, Default)]
pub struct Ledger {
    log: Mutex<LedgerLog>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: LedgerRecord) {
        self.log.lock().push(record);
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of sealed segments.
    pub fn segments(&self) -> usize {
        self.log.lock().sealed.len()
    }

    pub fn snapshot(&self) -> Vec<LedgerRecord> {
        let (sealed, tail) = {
            let log = self.log.lock();
            (log.sealed.clone(), log.tail.clone())
        };
        let mut records = Vec::with_capacity(sealed.len() * SEGMENT_LEN + tail.len());
        for segment in &sealed {
            records.extend_from_slice(segment);
        }
        records.extend(tail);
        records
    }

    /// Removes and returns every record.
    pub fn drain(&self) -> Vec<LedgerRecord> {
        let LedgerLog { sealed, tail } = std::mem::take(&mut *self.log.lock());
        let mut records = Vec::with_capacity(sealed.len() * SEGMENT_LEN + tail.len());
        for segment in sealed {
            match Arc::try_unwrap(segment) {
                Ok(owned) => records.extend(owned),
                Err(shared) => records.extend_from_slice(&shared),
            }
        }
        records.extend(tail);
        records
    }

    pub fn clear(&self) {
        let cleared = self.drain().len();
        tracing::debug!(cleared, "ledger cleared");
    }

    pub fn info(&self) -> LedgerInfo {
        LedgerInfo::from_records(self.snapshot())
    }
}
