//! Equivalence suite for the registered loops.
//!
//! Every case runs the host loop once for the expected output, then reruns
//! the same inputs under each atop/threading combination and counts elements
//! whose bit patterns differ. Latencies are collected into a JSON report that
//! can be diffed against an earlier run.

use anyhow::Result;
use fastrand::Rng;
use loopforge_kernels::config::{DataType, LoopKey, LoopOp};
use loopforge_kernels::operand::{Element, Operand, OperandBuf};
use loopforge_kernels::registry::LoopRegistry;
use loopforge_runtime::control::{ControlPanel, ControlState};
use loopforge_runtime::probe;
use loopforge_runtime::runtime::{DispatchReport, LoopDispatcher, RuntimeOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const INPUT_SEED: u64 = 0x1009_f0e6;

/// (atop, thread) combinations checked for every case.
const MODES: [(bool, bool); 4] = [(false, false), (true, false), (false, true), (true, true)];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquivalenceCase {
    pub key: LoopKey,
    pub elements: usize,
}

impl EquivalenceCase {
    pub fn new(key: LoopKey, elements: usize) -> Self {
        Self { key, elements }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquivalenceResult {
    pub case: String,
    pub signature: String,
    pub atop: bool,
    pub threaded: bool,
    pub variant: String,
    pub workers_used: usize,
    pub latency_ms: f64,
    pub reference_latency_ms: f64,
    pub mismatches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquivalenceReport {
    pub cpu: String,
    pub workers: usize,
    pub generated_at_unix_ms: u128,
    pub results: Vec<EquivalenceResult>,
}

impl EquivalenceReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|result| result.mismatches == 0)
    }

    pub fn failures(&self) -> impl Iterator<Item = &EquivalenceResult> {
        self.results.iter().filter(|result| result.mismatches > 0)
    }

    pub fn as_map(&self) -> BTreeMap<&str, &EquivalenceResult> {
        self.results
            .iter()
            .map(|result| (result.case.as_str(), result))
            .collect()
    }

    pub fn diff<'a>(&'a self, baseline: &'a EquivalenceReport) -> BTreeMap<&'a str, EquivalenceDelta<'a>> {
        let mut deltas = BTreeMap::new();
        let previous = baseline.as_map();

        for (case, result) in self.as_map() {
            if let Some(&baseline_result) = previous.get(case) {
                deltas.insert(
                    case,
                    EquivalenceDelta {
                        current: result,
                        baseline: baseline_result,
                        latency_ms_delta: result.latency_ms - baseline_result.latency_ms,
                    },
                );
            }
        }

        deltas
    }
}

#[derive(Debug)]
pub struct EquivalenceDelta<'a> {
    pub current: &'a EquivalenceResult,
    pub baseline: &'a EquivalenceResult,
    pub latency_ms_delta: f64,
}

pub struct EquivalenceSuite {
    cases: Vec<EquivalenceCase>,
}

impl EquivalenceSuite {
    pub fn new(cases: Vec<EquivalenceCase>) -> Self {
        Self { cases }
    }

    /// One case per built-in loop, each over `elements` elements.
    pub fn all_loops(elements: usize) -> Self {
        let cases = LoopRegistry::with_default_loops()
            .keys()
            .into_iter()
            .map(|key| EquivalenceCase::new(key, elements))
            .collect();
        Self::new(cases)
    }

    /// Keeps only the cases for `op`.
    pub fn only(mut self, op: LoopOp) -> Self {
        self.cases.retain(|case| case.key.op() == op);
        self
    }

    pub fn cases(&self) -> &[EquivalenceCase] {
        &self.cases
    }

    /// Runs the suite on a private dispatcher built from `options`; the
    /// process-wide runtime is left untouched.
    pub fn run(&self, options: &RuntimeOptions) -> Result<EquivalenceReport> {
        let control = Arc::new(ControlPanel::new(options.initial_state()));
        let dispatcher = LoopDispatcher::new(options, Arc::clone(&control));
        let workers = control.worker_count();
        let mut rng = Rng::with_seed(INPUT_SEED);
        let mut results = Vec::with_capacity(self.cases.len() * MODES.len());

        for case in &self.cases {
            let key = &case.key;
            let shape = [case.elements];
            let inputs: Vec<OperandBuf> = key
                .inputs()
                .iter()
                .map(|&dtype| random_operand(&mut rng, dtype, case.elements))
                .collect();
            let views: Vec<Operand<'_>> = inputs.iter().map(OperandBuf::as_operand).collect();

            let mut expected = OperandBuf::try_zeros(key.output(), case.elements)?;
            let (reference_time, _) = timed(|| {
                Ok(dispatcher.dispatch_with_state(
                    &ControlState::default(),
                    key,
                    &shape,
                    &views,
                    expected.as_operand_mut(),
                )?)
            })?;

            for (atop, threaded) in MODES {
                let state = ControlState {
                    atop_enabled: atop,
                    thread_enabled: threaded,
                    ..ControlState::initialized(workers)
                };
                let mut actual = OperandBuf::try_zeros(key.output(), case.elements)?;
                let (elapsed, report): (Duration, DispatchReport) = timed(|| {
                    Ok(dispatcher.dispatch_with_state(&state, key, &shape, &views, actual.as_operand_mut())?)
                })?;

                results.push(EquivalenceResult {
                    case: case_label(key, atop, threaded),
                    signature: report.signature,
                    atop,
                    threaded,
                    variant: report.variant.name().to_string(),
                    workers_used: report.workers_used,
                    latency_ms: elapsed.as_secs_f64() * 1000.0,
                    reference_latency_ms: reference_time.as_secs_f64() * 1000.0,
                    mismatches: expected.bit_mismatches(&actual),
                });
            }
        }

        let generated_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_millis();

        Ok(EquivalenceReport {
            cpu: probe::cpustring().to_string(),
            workers,
            generated_at_unix_ms,
            results,
        })
    }
}

fn case_label(key: &LoopKey, atop: bool, threaded: bool) -> String {
    let mode = match (atop, threaded) {
        (false, false) => "original",
        (true, false) => "atop",
        (false, true) => "original+threads",
        (true, true) => "atop+threads",
    };
    format!("{}[{mode}]", key.signature())
}

fn random_values<T: Element>(len: usize, mut sample: impl FnMut() -> T) -> OperandBuf {
    T::into_buf((0..len).map(|_| sample()).collect())
}

/// Seeded operand of `dtype`. Floats stay within [-100, 100) so that sqrt
/// sees both signs.
pub fn random_operand(rng: &mut Rng, dtype: DataType, len: usize) -> OperandBuf {
    match dtype {
        DataType::Bool => random_values(len, || rng.bool()),
        DataType::Int8 => random_values(len, || rng.i8(..)),
        DataType::Int16 => random_values(len, || rng.i16(..)),
        DataType::Int32 => random_values(len, || rng.i32(..)),
        DataType::Int64 => random_values(len, || rng.i64(..)),
        DataType::UInt8 => random_values(len, || rng.u8(..)),
        DataType::UInt16 => random_values(len, || rng.u16(..)),
        DataType::UInt32 => random_values(len, || rng.u32(..)),
        DataType::UInt64 => random_values(len, || rng.u64(..)),
        DataType::Float32 => random_values(len, || rng.f32() * 200.0 - 100.0),
        DataType::Float64 => random_values(len, || rng.f64() * 200.0 - 100.0),
    }
}

fn timed<F, T>(f: F) -> Result<(Duration, T)>
where
    F: FnOnce() -> Result<T>,
{
    let start = Instant::now();
    let value = f()?;
    Ok((start.elapsed(), value))
}
