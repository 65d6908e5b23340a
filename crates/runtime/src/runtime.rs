//! Loop dispatcher and runtime options.

use crate::control::{ControlPanel, ControlState};
use crate::planner::{ExecutionRoute, LoopPlan, LoopPlanner, PlannerConfig};
use crate::pool::{ForkJoin, WorkerPool};
use crate::probe::{self, FeatureDescriptor};
use crate::recycler::{RecycledBuffer, Recycler, RecyclerConfig};
use anyhow::Context;
use loopforge_kernels::config::{DataType, LoopKey};
use loopforge_kernels::elementwise::{DynLoopKernel, LoopVariant};
use loopforge_kernels::error::{LoopError, Result};
use loopforge_kernels::gather::{count_true, gather, select_masked};
use loopforge_kernels::operand::{Element, Operand, OperandMut};
use loopforge_kernels::registry::LoopRegistry;
use loopforge_kernels::utils::{partition_ranges, validate_elementwise};
use loopforge_ledger::{getutc, Ledger, LedgerRecord};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

pub const THRESHOLD_ENV: &str = "LOOPFORGE_THRESHOLD";
pub const WORKERS_ENV: &str = "LOOPFORGE_WORKERS";
pub const ATOP_ENV: &str = "LOOPFORGE_ATOP";
pub const THREADS_ENV: &str = "LOOPFORGE_THREADS";
pub const LEDGER_ENV: &str = "LOOPFORGE_LEDGER";
pub const RECYCLER_ENV: &str = "LOOPFORGE_RECYCLER";

/// Worker count used when none is configured: the available parallelism,
/// capped at eight.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|threads| threads.get())
        .unwrap_or(1)
        .clamp(1, 8)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    pub parallel_threshold: usize,
    pub min_partition_elements: usize,
    /// Worker count at startup; `None` uses [`default_worker_count`].
    pub default_workers: Option<usize>,
    pub recycler: RecyclerConfig,
    /// Flags installed at startup. Its worker count is replaced by
    /// `default_workers`.
    pub initial: ControlState,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        let planner = PlannerConfig::default();
        Self {
            parallel_threshold: planner.parallel_threshold,
            min_partition_elements: planner.min_partition_elements,
            default_workers: None,
            recycler: RecyclerConfig::default(),
            initial: ControlState::initialized(1),
        }
    }
}

impl RuntimeOptions {
    /// Defaults overlaid with the `LOOPFORGE_*` environment variables.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.apply_env(|name| std::env::var(name).ok());
        options
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(threshold) = lookup(THRESHOLD_ENV).and_then(|raw| parse_number(THRESHOLD_ENV, &raw)) {
            self.parallel_threshold = threshold;
        }
        if let Some(workers) = lookup(WORKERS_ENV).and_then(|raw| parse_number(WORKERS_ENV, &raw)) {
            self.default_workers = Some(workers.max(1));
        }
        let flags: [(&str, &mut bool); 4] = [
            (ATOP_ENV, &mut self.initial.atop_enabled),
            (THREADS_ENV, &mut self.initial.thread_enabled),
            (LEDGER_ENV, &mut self.initial.ledger_enabled),
            (RECYCLER_ENV, &mut self.initial.recycler_enabled),
        ];
        for (name, flag) in flags {
            if let Some(value) = lookup(name).and_then(|raw| parse_flag(name, &raw)) {
                *flag = value;
            }
        }
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid runtime options")
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading runtime options from {}", path.display()))?;
        Self::from_json(&data)
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            parallel_threshold: self.parallel_threshold,
            min_partition_elements: self.min_partition_elements.max(1),
        }
    }

    pub fn initial_state(&self) -> ControlState {
        ControlState {
            worker_count: self.default_workers.unwrap_or_else(default_worker_count).max(1),
            ..self.initial
        }
    }
}

fn parse_number(name: &str, raw: &str) -> Option<usize> {
    match raw.trim().parse::<usize>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = raw, "ignoring non-numeric setting");
            None
        }
    }
}

fn parse_flag(name: &str, raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => {
            warn!(variable = name, value = raw, "ignoring unrecognised flag value");
            None
        }
    }
}

/// Outcome of one dispatched loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub signature: String,
    pub variant: LoopVariant,
    pub elements: usize,
    pub workers_used: usize,
    pub from_host: bool,
}

/// Routes loop calls through the registry according to the current control
/// state, fanning large calls out over the worker pool.
pub struct LoopDispatcher {
    registry: LoopRegistry,
    control: Arc<ControlPanel>,
    planner: LoopPlanner,
    pool: WorkerPool,
    ledger: Ledger,
    recycler: Recycler,
    features: &'static FeatureDescriptor,
}

impl LoopDispatcher {
    pub fn new(options: &RuntimeOptions, control: Arc<ControlPanel>) -> Self {
        Self::with_registry(LoopRegistry::with_default_loops(), options, control)
    }

    pub fn with_registry(registry: LoopRegistry, options: &RuntimeOptions, control: Arc<ControlPanel>) -> Self {
        let recycler = Recycler::new(options.recycler, Arc::clone(&control));
        let features = probe::describe();
        debug!(
            loops = registry.len(),
            threshold = options.parallel_threshold,
            cpu = features.as_str(),
            "loop dispatcher ready"
        );
        Self {
            registry,
            control,
            planner: LoopPlanner::new(options.planner_config()),
            pool: WorkerPool::new(),
            ledger: Ledger::new(),
            recycler,
            features,
        }
    }

    pub fn registry(&self) -> &LoopRegistry {
        &self.registry
    }

    pub fn control(&self) -> &Arc<ControlPanel> {
        &self.control
    }

    pub fn planner(&self) -> &LoopPlanner {
        &self.planner
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn recycler(&self) -> &Recycler {
        &self.recycler
    }

    pub fn features(&self) -> &'static FeatureDescriptor {
        self.features
    }

    /// Runs the loop for `key` over flat operands.
    pub fn dispatch(&self, key: &LoopKey, inputs: &[Operand<'_>], output: OperandMut<'_>) -> Result<DispatchReport> {
        let shape = [output.len()];
        self.dispatch_shaped(key, &shape, inputs, output)
    }

    /// As [`dispatch`](Self::dispatch), recording `shape` in the ledger.
    pub fn dispatch_shaped(
        &self,
        key: &LoopKey,
        shape: &[usize],
        inputs: &[Operand<'_>],
        output: OperandMut<'_>,
    ) -> Result<DispatchReport> {
        let state = self.control.snapshot();
        self.dispatch_with_state(&state, key, shape, inputs, output)
    }

    /// Dispatches under an explicit control state rather than the panel's
    /// current one.
    pub fn dispatch_with_state(
        &self,
        state: &ControlState,
        key: &LoopKey,
        shape: &[usize],
        inputs: &[Operand<'_>],
        output: OperandMut<'_>,
    ) -> Result<DispatchReport> {
        let elements = output.len();
        let (plan, from_host) = match self.registry.get(key) {
            Some(entry) => (self.planner.plan(entry, state, elements), false),
            None => (self.host_plan(key)?, true),
        };

        let started = state.ledger_enabled.then(|| (Instant::now(), getutc()));
        let workers_used = self.execute(&plan, state, inputs, output)?;

        if let Some((start, timestamp_nanos)) = started {
            self.ledger.record(LedgerRecord {
                key: key.clone(),
                shape: shape.to_vec(),
                elements,
                variant: plan.variant,
                duration_nanos: loopforge_ledger::elapsed_nanos(start),
                timestamp_nanos,
                workers_used,
            });
        }

        trace!(
            signature = %key,
            elements,
            workers = workers_used,
            variant = plan.variant.name(),
            "loop dispatched"
        );
        Ok(DispatchReport {
            signature: key.signature(),
            variant: plan.variant,
            elements,
            workers_used,
            from_host,
        })
    }

    /// Allocates the output for `key` and runs the loop into it. The buffer
    /// comes from the recycler when recycling is on.
    pub fn apply(&self, key: &LoopKey, inputs: &[Operand<'_>]) -> Result<RecycledBuffer> {
        let state = self.control.snapshot();
        let len = inputs.first().map_or(0, Operand::len);
        let mut output = self.scratch(&state, key.output(), len)?;
        self.dispatch_with_state(&state, key, &[len], inputs, output.as_operand_mut())?;
        Ok(output)
    }

    /// `values[indices]`; out-of-range indices yield `default`, or the
    /// dtype's invalid value when no default is given.
    pub fn getitem<T: Element>(&self, values: &[T], indices: Operand<'_>, default: Option<T>) -> Result<Vec<T>> {
        let state = self.control.snapshot();
        let default = default.unwrap_or_else(T::invalid);
        let len = indices.len();
        let mut out = allocate::<T>(len)?;

        let route = self.planner.route(&state, len);
        if route == ExecutionRoute::Direct {
            gather(values, indices, default, &mut out)?;
            return Ok(out);
        }

        let ranges = partition_ranges(len, route.partitions());
        let items = split_by_ranges(&mut out, &ranges);
        self.fork_join(state.worker_count).run(items, |_, (range, chunk)| {
            gather(values, indices.slice(range), default, chunk)
        })?;
        Ok(out)
    }

    /// Number of set flags in `mask`, counted per chunk.
    pub fn mask_count(&self, mask: &[bool]) -> Result<usize> {
        let state = self.control.snapshot();
        Ok(self.chunk_counts(&state, mask)?.iter().sum())
    }

    /// `values[mask]`, preserving order.
    pub fn boolean_index<T: Element>(&self, values: &[T], mask: &[bool]) -> Result<Vec<T>> {
        if values.len() != mask.len() {
            return Err(LoopError::ShapeMismatch {
                kernel: "boolean_index".to_string(),
                operand: 1,
                expected: values.len(),
                actual: mask.len(),
            });
        }
        let state = self.control.snapshot();
        let counts = self.chunk_counts(&state, mask)?;
        let total: usize = counts.iter().sum();
        let mut out = allocate::<T>(total)?;

        if counts.len() <= 1 {
            select_masked(values, mask, &mut out);
            return Ok(out);
        }

        let ranges = partition_ranges(mask.len(), counts.len());
        let mut items = Vec::with_capacity(ranges.len());
        let mut rest = out.as_mut_slice();
        for (range, &count) in ranges.into_iter().zip(&counts) {
            let (head, tail) = rest.split_at_mut(count);
            items.push((range, head));
            rest = tail;
        }
        self.fork_join(state.worker_count).run(items, |_, (range, chunk)| {
            select_masked(&values[range.clone()], &mask[range], chunk);
            Ok(())
        })?;
        Ok(out)
    }

    /// Per-chunk true counts; one chunk when the mask is not split.
    fn chunk_counts(&self, state: &ControlState, mask: &[bool]) -> Result<Vec<usize>> {
        let route = self.planner.route(state, mask.len());
        if route == ExecutionRoute::Direct {
            return Ok(vec![count_true(mask)]);
        }
        let ranges = partition_ranges(mask.len(), route.partitions());
        let mut counts = self.scratch(state, DataType::UInt64, ranges.len())?;
        let slots = counts
            .as_mut_slice::<u64>()
            .ok_or_else(|| LoopError::ResourceExhaustion("count scratch has the wrong dtype".to_string()))?;
        let items: Vec<(Range<usize>, &mut u64)> = ranges.into_iter().zip(slots.iter_mut()).collect();
        self.fork_join(state.worker_count).run(items, |_, (range, slot)| {
            *slot = count_true(&mask[range]) as u64;
            Ok(())
        })?;
        Ok(counts
            .as_slice::<u64>()
            .map(|slots| slots.iter().map(|&count| count as usize).collect())
            .unwrap_or_default())
    }

    fn host_plan(&self, key: &LoopKey) -> Result<LoopPlan> {
        let kernel: DynLoopKernel = self.registry.host_lookup(key).ok_or_else(|| LoopError::Lookup {
            signature: key.signature(),
        })?;
        debug!(signature = %key, "no override registered, using host loop");
        Ok(LoopPlan {
            kernel,
            variant: LoopVariant::Original,
            route: ExecutionRoute::Direct,
        })
    }

    /// Runs `plan` and returns the number of partitions used.
    fn execute(
        &self,
        plan: &LoopPlan,
        state: &ControlState,
        inputs: &[Operand<'_>],
        output: OperandMut<'_>,
    ) -> Result<usize> {
        let partitions = match plan.route {
            ExecutionRoute::Direct => {
                plan.kernel.run(inputs, output)?;
                return Ok(1);
            }
            ExecutionRoute::Parallel { partitions } => partitions,
        };

        let label = plan.kernel.label();
        let elements = validate_elementwise(&label, plan.kernel.key().arity(), inputs, &output)?;
        let fork = match self.pool.prepare(state.worker_count) {
            Ok(fork) => fork,
            Err(err) => {
                warn!(error = %err, signature = %plan.kernel.key(), "worker pool unavailable, running direct");
                plan.kernel.run(inputs, output)?;
                return Ok(1);
            }
        };

        let ranges = partition_ranges(elements, partitions);
        let used = ranges.len();
        let outputs = output.split_lengths(ranges.iter().map(|range| range.len()));
        let items: Vec<_> = ranges.into_iter().zip(outputs).collect();
        let kernel = &plan.kernel;
        fork.run(items, |_, (range, out)| {
            let sliced: Vec<Operand<'_>> = inputs.iter().map(|input| input.slice(range.clone())).collect();
            kernel.run(&sliced, out)
        })?;
        Ok(used)
    }

    /// Buffer for scratch or output data, pooled when recycling is on. A
    /// failing pool falls back to a fresh allocation.
    fn scratch(&self, state: &ControlState, dtype: DataType, len: usize) -> Result<RecycledBuffer> {
        match self.recycler.acquire_with(state.recycler_enabled, dtype, len) {
            Ok(buffer) => Ok(buffer),
            Err(err) if state.recycler_enabled => {
                warn!(error = %err, "recycler acquire failed, allocating directly");
                RecycledBuffer::fresh(dtype, len)
            }
            Err(err) => Err(err),
        }
    }

    fn fork_join(&self, workers: usize) -> ForkJoin {
        match self.pool.prepare(workers) {
            Ok(fork) => fork,
            Err(err) => {
                warn!(error = %err, "worker pool unavailable, running sequentially");
                ForkJoin::sequential()
            }
        }
    }
}

fn allocate<T: Element>(len: usize) -> Result<Vec<T>> {
    let mut values = Vec::new();
    values.try_reserve_exact(len).map_err(|err| {
        LoopError::ResourceExhaustion(format!("could not allocate {len} elements: {err}"))
    })?;
    values.resize(len, T::default());
    Ok(values)
}

fn split_by_ranges<'a, T>(values: &'a mut [T], ranges: &[Range<usize>]) -> Vec<(Range<usize>, &'a mut [T])> {
    let mut items = Vec::with_capacity(ranges.len());
    let mut rest = values;
    for range in ranges {
        let (head, tail) = rest.split_at_mut(range.len());
        items.push((range.clone(), head));
        rest = tail;
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopforge_kernels::config::LoopOp;
    use loopforge_kernels::catalog::LoopCatalog;
    use loopforge_kernels::registry::{LoopEntry, ReferenceLoopTable};
    use std::collections::HashMap;

    fn dispatcher(state: ControlState) -> LoopDispatcher {
        let options = RuntimeOptions {
            parallel_threshold: 1_000,
            min_partition_elements: 100,
            ..RuntimeOptions::default()
        };
        LoopDispatcher::new(&options, Arc::new(ControlPanel::new(state)))
    }

    fn key(op: LoopOp, dtype: DataType, output: DataType) -> LoopKey {
        let inputs = vec![dtype; op.arity()];
        LoopKey::new(op, &inputs, output)
    }

    #[test]
    fn every_toggle_combination_matches_the_original() {
        let mut rng = fastrand::Rng::with_seed(42);
        let lhs: Vec<f64> = (0..10_000).map(|_| rng.f64() * 1e6 - 5e5).collect();
        let rhs: Vec<f64> = (0..10_000).map(|_| rng.f64() * 1e3 - 5e2).collect();
        let divide = key(LoopOp::Divide, DataType::Float64, DataType::Float64);

        let reference = dispatcher(ControlState::default());
        let mut expected = vec![0.0f64; lhs.len()];
        reference
            .dispatch(&divide, &[f64::operand(&lhs), f64::operand(&rhs)], f64::operand_mut(&mut expected))
            .unwrap();

        for atop in [false, true] {
            for thread in [false, true] {
                let state = ControlState {
                    atop_enabled: atop,
                    thread_enabled: thread,
                    ..ControlState::initialized(4)
                };
                let runtime = dispatcher(state);
                let mut actual = vec![0.0f64; lhs.len()];
                let report = runtime
                    .dispatch(&divide, &[f64::operand(&lhs), f64::operand(&rhs)], f64::operand_mut(&mut actual))
                    .unwrap();
                assert_eq!(report.workers_used > 1, atop && thread);
                let same = expected.iter().zip(&actual).all(|(a, b)| a.to_bits() == b.to_bits());
                assert!(same, "atop={atop} thread={thread}");
            }
        }
    }

    #[test]
    fn unknown_signatures_fall_back_to_the_host_or_fail() {
        let (reference, _) = LoopCatalog::builtin().into_parts();
        let host = Arc::new(ReferenceLoopTable::from_loops(reference));
        let registry = LoopRegistry::install(host, &HashMap::new());
        let mut empty = LoopRegistry::new(Arc::clone(registry.host()));
        let sub = key(LoopOp::Subtract, DataType::Int16, DataType::Int16);
        let original = registry.get(&sub).unwrap().original.clone();
        assert!(empty.register(LoopEntry::new(sub.clone(), original, None)));

        let runtime = LoopDispatcher::with_registry(
            empty,
            &RuntimeOptions::default(),
            Arc::new(ControlPanel::new(ControlState::initialized(2))),
        );

        let a = [5i16, 6];
        let b = [1i16, 1];
        let mut out = [0i16; 2];
        let mul = key(LoopOp::Multiply, DataType::Int16, DataType::Int16);
        let report = runtime
            .dispatch(&mul, &[i16::operand(&a), i16::operand(&b)], i16::operand_mut(&mut out))
            .unwrap();
        assert!(report.from_host);
        assert_eq!(out, [5, 6]);

        let bogus = key(LoopOp::Sqrt, DataType::Int16, DataType::Int16);
        let err = runtime
            .dispatch(&bogus, &[i16::operand(&a)], i16::operand_mut(&mut out))
            .unwrap_err();
        match err {
            LoopError::Lookup { signature } => assert_eq!(signature, "sqrt:h->h"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ledger_records_only_when_enabled() {
        let runtime = dispatcher(ControlState::initialized(2));
        let neg = key(LoopOp::Negative, DataType::Int32, DataType::Int32);
        let src: Vec<i32> = (0..2_000).collect();
        let mut out = vec![0i32; src.len()];

        runtime.dispatch(&neg, &[i32::operand(&src)], i32::operand_mut(&mut out)).unwrap();
        assert!(runtime.ledger().is_empty());

        runtime.control().enable(crate::control::Toggle::Ledger);
        for _ in 0..5 {
            runtime
                .dispatch_shaped(&neg, &[40, 50], &[i32::operand(&src)], i32::operand_mut(&mut out))
                .unwrap();
        }
        let info = runtime.ledger().info();
        assert_eq!(info.total_calls(), 5);
        assert!(info.records.iter().all(|r| r.shape == vec![40, 50] && r.workers_used == 2));
        assert_eq!(info.summaries[0].signature, "negative:i->i");
    }

    #[test]
    fn apply_uses_recycled_output_when_enabled() {
        let runtime = dispatcher(ControlState {
            recycler_enabled: true,
            ..ControlState::initialized(1)
        });
        let lt = key(LoopOp::Less, DataType::UInt32, DataType::Bool);
        let a = [1u32, 5, 3];
        let b = [2u32, 5, 1];
        let out = runtime.apply(&lt, &[u32::operand(&a), u32::operand(&b)]).unwrap();
        assert!(out.is_pooled());
        assert_eq!(out.as_slice::<bool>(), Some(&[true, false, false][..]));
        drop(out);
        assert_eq!(runtime.recycler().info().pooled_buffers, 1);
    }

    #[test]
    fn gather_and_mask_selection_agree_across_routes() {
        let values: Vec<u16> = (0..5_000).map(|v| v as u16).collect();
        let indices: Vec<i32> = (0..5_000).map(|i| if i % 7 == 0 { -1 } else { i * 3 }).collect();
        let mask: Vec<bool> = (0..5_000).map(|i| i % 3 == 0).collect();

        let serial = dispatcher(ControlState::default());
        let parallel = dispatcher(ControlState::initialized(4));

        let expected = serial.getitem(&values, i32::operand(&indices), None).unwrap();
        let actual = parallel.getitem(&values, i32::operand(&indices), None).unwrap();
        assert_eq!(expected, actual);
        assert_eq!(expected[7], 4_999);
        assert_eq!(expected[2_000], u16::MAX);

        assert_eq!(serial.mask_count(&mask).unwrap(), 1_667);
        assert_eq!(parallel.mask_count(&mask).unwrap(), 1_667);
        let selected = parallel.boolean_index(&values, &mask).unwrap();
        assert_eq!(selected, serial.boolean_index(&values, &mask).unwrap());
        assert!(selected.iter().all(|v| v % 3 == 0));

        let err = parallel.boolean_index(&values, &mask[..10]).unwrap_err();
        assert!(matches!(err, LoopError::ShapeMismatch { .. }));
    }

    #[test]
    fn partitioned_gathers_reuse_the_dispatch_pool() {
        let options = RuntimeOptions {
            parallel_threshold: 10,
            min_partition_elements: 40,
            ..RuntimeOptions::default()
        };
        let runtime = LoopDispatcher::new(&options, Arc::new(ControlPanel::new(ControlState::initialized(8))));
        let values: Vec<i64> = (0..100).collect();
        let indices: Vec<i64> = (0..100).rev().collect();
        let mask: Vec<bool> = (0..100).map(|i| i % 2 == 0).collect();

        let gathered = runtime.getitem(&values, i64::operand(&indices), None).unwrap();
        assert_eq!(gathered[0], 99);
        assert_eq!(runtime.pool.current_workers(), Some(8));

        assert_eq!(runtime.mask_count(&mask).unwrap(), 50);
        assert_eq!(runtime.boolean_index(&values, &mask).unwrap().len(), 50);
        assert_eq!(runtime.pool.current_workers(), Some(8));

        let src: Vec<i64> = (0..100).collect();
        let mut out = vec![0i64; src.len()];
        let neg = key(LoopOp::Negative, DataType::Int64, DataType::Int64);
        let report = runtime
            .dispatch(&neg, &[i64::operand(&src)], i64::operand_mut(&mut out))
            .unwrap();
        assert_eq!(report.workers_used, 3);
        assert_eq!(runtime.pool.current_workers(), Some(8));
    }

    #[test]
    fn apply_follows_the_panel_recycler_flag() {
        let runtime = dispatcher(ControlState::initialized(1));
        let add = key(LoopOp::Add, DataType::Int32, DataType::Int32);
        let a = [1i32, 2, 3];

        assert!(!runtime.apply(&add, &[i32::operand(&a), i32::operand(&a)]).unwrap().is_pooled());
        runtime.control().enable(crate::control::Toggle::Recycler);
        let out = runtime.apply(&add, &[i32::operand(&a), i32::operand(&a)]).unwrap();
        assert!(out.is_pooled());
        assert_eq!(out.as_slice::<i32>(), Some(&[2, 4, 6][..]));
        drop(out);
        assert!(runtime.recycler().info().enabled);
        assert_eq!(runtime.recycler().info().pooled_buffers, 1);

        runtime.control().disable(crate::control::Toggle::Recycler);
        let info = runtime.recycler().info();
        assert!(!info.enabled);
        assert_eq!(info.pooled_buffers, 0);
    }

    #[test]
    fn options_read_environment_overrides() {
        let mut options = RuntimeOptions::default();
        let env: HashMap<&str, &str> = [
            (THRESHOLD_ENV, "1024"),
            (WORKERS_ENV, "0"),
            (ATOP_ENV, "off"),
            (LEDGER_ENV, "yes"),
            (THREADS_ENV, "maybe"),
        ]
        .into_iter()
        .collect();
        options.apply_env(|name| env.get(name).map(|value| value.to_string()));
        assert_eq!(options.parallel_threshold, 1024);
        assert_eq!(options.default_workers, Some(1));
        assert!(!options.initial.atop_enabled);
        assert!(options.initial.ledger_enabled);
        assert!(options.initial.thread_enabled);

        let json = options.to_json().unwrap();
        assert_eq!(RuntimeOptions::from_json(&json).unwrap(), options);
        assert_eq!(options.initial_state().worker_count, 1);
    }
}
