//! Summarised ledger retrieval.

use crate::record::LedgerRecord;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureSummary {
    pub signature: String,
    pub calls: usize,
    pub threaded_calls: usize,
    pub elements: u64,
    pub total_nanos: u64,
    pub min_nanos: u64,
    pub max_nanos: u64,
    pub mean_nanos: f64,
}

impl SignatureSummary {
    fn new(signature: String) -> Self {
        Self {
            signature,
            min_nanos: u64::MAX,
            ..Self::default()
        }
    }

    fn add(&mut self, record: &LedgerRecord) {
        self.calls += 1;
        self.threaded_calls += usize::from(record.threaded());
        self.elements = self.elements.saturating_add(record.elements as u64);
        self.total_nanos = self.total_nanos.saturating_add(record.duration_nanos);
        self.min_nanos = self.min_nanos.min(record.duration_nanos);
        self.max_nanos = self.max_nanos.max(record.duration_nanos);
        self.mean_nanos = self.total_nanos as f64 / self.calls as f64;
    }
}

/// Snapshot of the ledger: the raw records plus per-signature aggregates
/// sorted by signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerInfo {
    pub records: Vec<LedgerRecord>,
    pub summaries: Vec<SignatureSummary>,
}

impl LedgerInfo {
    pub fn from_records(records: Vec<LedgerRecord>) -> Self {
        let mut grouped: BTreeMap<String, SignatureSummary> = BTreeMap::new();
        for record in &records {
            let signature = record.signature();
            grouped
                .entry(signature.clone())
                .or_insert_with(|| SignatureSummary::new(signature))
                .add(record);
        }
        Self {
            records,
            summaries: grouped.into_values().collect(),
        }
    }

    pub fn total_calls(&self) -> usize {
        self.records.len()
    }

    pub fn summary(&self, signature: &str) -> Option<&SignatureSummary> {
        self.summaries.iter().find(|s| s.signature == signature)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopforge_kernels::config::{DataType, LoopKey, LoopOp};
    use loopforge_kernels::elementwise::LoopVariant;

    fn record(op: LoopOp, duration_nanos: u64, workers_used: usize) -> LedgerRecord {
        LedgerRecord {
            key: LoopKey::new(op, &[DataType::Float64, DataType::Float64], DataType::Float64),
            shape: vec![4, 25],
            elements: 100,
            variant: LoopVariant::Atop,
            duration_nanos,
            timestamp_nanos: 1,
            workers_used,
        }
    }

    #[test]
    fn summaries_aggregate_per_signature() {
        let info = LedgerInfo::from_records(vec![
            record(LoopOp::Add, 10, 1),
            record(LoopOp::Add, 30, 4),
            record(LoopOp::Multiply, 5, 1),
        ]);
        assert_eq!(info.total_calls(), 3);
        assert_eq!(info.summaries.len(), 2);

        let add = info.summary("add:dd->d").expect("add summary");
        assert_eq!(add.calls, 2);
        assert_eq!(add.threaded_calls, 1);
        assert_eq!(add.elements, 200);
        assert_eq!((add.min_nanos, add.max_nanos, add.total_nanos), (10, 30, 40));
        assert_eq!(add.mean_nanos, 20.0);
    }

    #[test]
    fn info_survives_a_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("loopforge-ledger-{}", std::process::id()));
        let path = dir.join("ledger.json");
        let info = LedgerInfo::from_records(vec![record(LoopOp::Subtract, 7, 2)]);
        info.save_to_file(&path).unwrap();
        assert_eq!(LedgerInfo::load_from_file(&path).unwrap(), info);
        std::fs::remove_dir_all(&dir).ok();
    }
}
