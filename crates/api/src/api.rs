//! Process-wide control surface.
//!
//! One [`LoopDispatcher`] serves the whole process once [`initialize`] has
//! run. Until then every flag reads as off and loops go straight to the
//! host table.

use loopforge_kernels::config::LoopKey;
use loopforge_kernels::elementwise::LoopVariant;
use loopforge_kernels::error::{LoopError, Result};
use loopforge_kernels::gather::{count_true, gather, select_masked};
use loopforge_kernels::operand::{Element, Operand, OperandMut};
use loopforge_kernels::registry::{HostLoopTable, ReferenceLoopTable};
use loopforge_ledger::LedgerInfo;
use loopforge_runtime::control::{ControlPanel, ControlState, Toggle};
use loopforge_runtime::probe;
use loopforge_runtime::recycler::{RecycledBuffer, RecyclerInfo};
use loopforge_runtime::runtime::{DispatchReport, LoopDispatcher, RuntimeOptions};
use std::sync::{Arc, OnceLock};
use tracing::info;

static CONTROL: OnceLock<Arc<ControlPanel>> = OnceLock::new();
static RUNTIME: OnceLock<LoopDispatcher> = OnceLock::new();
static HOST: OnceLock<ReferenceLoopTable> = OnceLock::new();

fn control() -> &'static Arc<ControlPanel> {
    CONTROL.get_or_init(|| Arc::new(ControlPanel::default()))
}

fn host() -> &'static ReferenceLoopTable {
    HOST.get_or_init(ReferenceLoopTable::new)
}

/// The process dispatcher, if [`initialize`] has run.
pub fn runtime() -> Option<&'static LoopDispatcher> {
    RUNTIME.get()
}

/// Installs the loop registry and default flags using options read from the
/// environment. Returns `true` only for the call that performed the setup.
pub fn initialize() -> bool {
    initialize_with(RuntimeOptions::from_env())
}

/// As [`initialize`], with explicit options. Ignored once initialized.
pub fn initialize_with(options: RuntimeOptions) -> bool {
    let mut changed = false;
    RUNTIME.get_or_init(|| {
        changed = true;
        let control = Arc::clone(control());
        control.replace(options.initial_state());
        let dispatcher = LoopDispatcher::new(&options, control);
        info!(
            loops = dispatcher.registry().len(),
            workers = dispatcher.control().worker_count(),
            cpu = dispatcher.features().as_str(),
            "loopforge initialized"
        );
        dispatcher
    });
    changed
}

#[deprecated(note = "use `initialize`")]
pub fn oldinit() -> bool {
    initialize()
}

pub fn control_state() -> ControlState {
    control().snapshot()
}

pub fn enable() -> bool {
    control().enable(Toggle::Master)
}

pub fn disable() -> bool {
    control().disable(Toggle::Master)
}

pub fn isenabled() -> bool {
    control().is_enabled(Toggle::Master)
}

pub fn atop_enable() -> bool {
    control().enable(Toggle::Atop)
}

pub fn atop_disable() -> bool {
    control().disable(Toggle::Atop)
}

pub fn atop_isenabled() -> bool {
    control().is_enabled(Toggle::Atop)
}

pub fn thread_enable() -> bool {
    control().enable(Toggle::Thread)
}

pub fn thread_disable() -> bool {
    control().disable(Toggle::Thread)
}

pub fn thread_isenabled() -> bool {
    control().is_enabled(Toggle::Thread)
}

pub fn thread_getworkers() -> usize {
    control().worker_count()
}

/// Sets the worker count (clamped to at least one) and returns the previous
/// count.
pub fn thread_setworkers(workers: i64) -> usize {
    control().set_workers(workers)
}

/// Starts recording. Enabling a disabled ledger discards earlier records.
pub fn ledger_enable() -> bool {
    let previous = control().enable(Toggle::Ledger);
    if !previous {
        if let Some(runtime) = runtime() {
            runtime.ledger().clear();
        }
    }
    previous
}

pub fn ledger_disable() -> bool {
    control().disable(Toggle::Ledger)
}

pub fn ledger_isenabled() -> bool {
    control().is_enabled(Toggle::Ledger)
}

pub fn ledger_info() -> LedgerInfo {
    runtime().map(|runtime| runtime.ledger().info()).unwrap_or_default()
}

pub fn ledger_clear() {
    if let Some(runtime) = runtime() {
        runtime.ledger().clear();
    }
}

pub fn recycler_enable() -> bool {
    control().enable(Toggle::Recycler)
}

/// Stops pooling and frees every idle buffer.
pub fn recycler_disable() -> bool {
    let previous = control().disable(Toggle::Recycler);
    if let Some(runtime) = runtime() {
        runtime.recycler().refresh();
    }
    previous
}

pub fn recycler_isenabled() -> bool {
    control().is_enabled(Toggle::Recycler)
}

pub fn recycler_info() -> RecyclerInfo {
    runtime()
        .map(|runtime| runtime.recycler().info())
        .unwrap_or_else(|| RecyclerInfo {
            enabled: recycler_isenabled(),
            ..RecyclerInfo::default()
        })
}

/// Frees idle buffers beyond the retention policy; returns how many.
pub fn recycler_compact() -> usize {
    runtime().map_or(0, |runtime| runtime.recycler().compact())
}

pub fn timer_gettsc() -> u64 {
    loopforge_ledger::gettsc()
}

pub fn timer_getutc() -> u64 {
    loopforge_ledger::getutc()
}

pub fn cpustring() -> &'static str {
    probe::cpustring()
}

/// Runs the loop registered for `key`.
pub fn dispatch(key: &LoopKey, inputs: &[Operand<'_>], output: OperandMut<'_>) -> Result<DispatchReport> {
    let shape = [output.len()];
    dispatch_shaped(key, &shape, inputs, output)
}

pub fn dispatch_shaped(
    key: &LoopKey,
    shape: &[usize],
    inputs: &[Operand<'_>],
    output: OperandMut<'_>,
) -> Result<DispatchReport> {
    match runtime() {
        Some(runtime) => runtime.dispatch_shaped(key, shape, inputs, output),
        None => {
            let kernel = host().lookup(key).ok_or_else(|| LoopError::Lookup {
                signature: key.signature(),
            })?;
            let elements = output.len();
            kernel.run(inputs, output)?;
            Ok(DispatchReport {
                signature: key.signature(),
                variant: LoopVariant::Original,
                elements,
                workers_used: 1,
                from_host: true,
            })
        }
    }
}

/// Allocates the output for `key` and runs the loop into it.
pub fn apply(key: &LoopKey, inputs: &[Operand<'_>]) -> Result<RecycledBuffer> {
    match runtime() {
        Some(runtime) => runtime.apply(key, inputs),
        None => {
            let len = inputs.first().map_or(0, Operand::len);
            let mut output = RecycledBuffer::fresh(key.output(), len)?;
            dispatch(key, inputs, output.as_operand_mut())?;
            Ok(output)
        }
    }
}

/// `values[indices]` with out-of-range indices mapped to `default`, or to
/// the dtype's invalid value.
pub fn getitem<T: Element>(values: &[T], indices: Operand<'_>, default: Option<T>) -> Result<Vec<T>> {
    match runtime() {
        Some(runtime) => runtime.getitem(values, indices, default),
        None => {
            let mut out = vec![T::default(); indices.len()];
            gather(values, indices, default.unwrap_or_else(T::invalid), &mut out)?;
            Ok(out)
        }
    }
}

pub fn boolean_index<T: Element>(values: &[T], mask: &[bool]) -> Result<Vec<T>> {
    match runtime() {
        Some(runtime) => runtime.boolean_index(values, mask),
        None => {
            if values.len() != mask.len() {
                return Err(LoopError::ShapeMismatch {
                    kernel: "boolean_index".to_string(),
                    operand: 1,
                    expected: values.len(),
                    actual: mask.len(),
                });
            }
            let mut out = vec![T::default(); count_true(mask)];
            select_masked(values, mask, &mut out);
            Ok(out)
        }
    }
}

pub fn mask_count(mask: &[bool]) -> Result<usize> {
    match runtime() {
        Some(runtime) => runtime.mask_count(mask),
        None => Ok(count_true(mask)),
    }
}
