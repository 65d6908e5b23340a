//! CLI wiring for the LoopForge runtime.

use crate::api;
use crate::eval::{random_operand, EquivalenceReport, EquivalenceSuite};
use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use loopforge_kernels::config::{DataType, LoopOp};
use loopforge_kernels::operand::{Operand, OperandBuf};
use loopforge_ledger::LedgerInfo;
use loopforge_runtime::runtime::RuntimeOptions;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "loopforge", about = "LoopForge loop runtime toolkit")]
pub struct Cli {
    /// JSON runtime options; defaults plus LOOPFORGE_* variables otherwise.
    #[arg(long, global = true)]
    pub options: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the CPU description, control state and recycler statistics.
    Info {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Check every loop against the host loop under each atop/thread mode.
    Verify {
        #[arg(long, default_value_t = 100_003)]
        elements: usize,
        /// Restrict the run to one operation, e.g. `add`.
        #[arg(long)]
        op: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        baseline: Option<PathBuf>,
    },
    /// Time one loop across worker counts using the ledger.
    Bench {
        #[arg(long, default_value = "add")]
        op: String,
        #[arg(long, default_value = "float32")]
        dtype: String,
        #[arg(long, default_value_t = 1_000_000)]
        elements: usize,
        #[arg(long, value_delimiter = ',', default_value = "1,2,4")]
        workers: Vec<usize>,
        #[arg(long, default_value_t = 10)]
        runs: usize,
        #[arg(long, default_value_t = false)]
        recycle: bool,
        /// Write the ledger summary as JSON.
        #[arg(long)]
        dump_ledger: Option<PathBuf>,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli { options, command } = cli;
    let options = match options {
        Some(path) => RuntimeOptions::load_from_file(&path)?,
        None => RuntimeOptions::from_env(),
    };

    match command {
        Command::Info { json } => {
            api::initialize_with(options);
            let state = api::control_state();
            let recycler = api::recycler_info();
            if json {
                let blob = serde_json::json!({
                    "cpu": api::cpustring(),
                    "control": state,
                    "recycler": recycler,
                });
                println!("{}", serde_json::to_string_pretty(&blob)?);
            } else {
                println!("cpu: {}", api::cpustring());
                println!(
                    "enabled={} atop={} threads={} workers={} ledger={} recycler={}",
                    state.master_enabled,
                    state.atop_enabled,
                    state.thread_enabled,
                    state.worker_count,
                    state.ledger_enabled,
                    state.recycler_enabled
                );
                println!(
                    "recycler: pooled={} bytes={} hits={} misses={}",
                    recycler.pooled_buffers, recycler.pooled_bytes, recycler.hits, recycler.misses
                );
            }
        }
        Command::Verify {
            elements,
            op,
            output,
            baseline,
        } => {
            let mut suite = EquivalenceSuite::all_loops(elements);
            if let Some(name) = op {
                suite = suite.only(parse_op(&name)?);
            }
            let report = suite.run(&options)?;

            println!(
                "cpu={}, workers={}, results={}, generated_at={}",
                report.cpu,
                report.workers,
                report.results.len(),
                report.generated_at_unix_ms
            );
            for result in &report.results {
                println!(
                    "- {}: variant={} workers={} latency_ms={:.3} mismatches={}",
                    result.case, result.variant, result.workers_used, result.latency_ms, result.mismatches
                );
            }

            if let Some(path) = baseline {
                if path.exists() {
                    let baseline_blob = fs::read_to_string(&path)?;
                    let baseline_report: EquivalenceReport = serde_json::from_str(&baseline_blob)?;
                    for (name, delta) in report.diff(&baseline_report) {
                        println!("Δ {}: latency_ms={:+.3}", name, delta.latency_ms_delta);
                    }
                } else {
                    info!(path = %path.display(), "baseline report not found; skipping diff");
                }
            }

            if let Some(path) = output {
                fs::write(path, serde_json::to_string_pretty(&report)?)?;
            }

            if !report.passed() {
                bail!("{} loop runs disagreed with the host loop", report.failures().count());
            }
        }
        Command::Bench {
            op,
            dtype,
            elements,
            workers,
            runs,
            recycle,
            dump_ledger,
        } => {
            let op = parse_op(&op)?;
            let dtype = DataType::from_name(&dtype).ok_or_else(|| anyhow!("unknown dtype `{dtype}`"))?;
            api::initialize_with(options);
            let runtime = api::runtime().ok_or_else(|| anyhow!("runtime failed to initialize"))?;
            let input_types = vec![dtype; op.arity()];
            let key = runtime
                .registry()
                .resolve(op, &input_types)
                .map(|entry| entry.key.clone())
                .ok_or_else(|| anyhow!("no {op} loop for {dtype}"))?;

            let mut rng = fastrand::Rng::with_seed(7);
            let inputs: Vec<OperandBuf> = input_types
                .iter()
                .map(|&dtype| random_operand(&mut rng, dtype, elements))
                .collect();
            let views: Vec<Operand<'_>> = inputs.iter().map(OperandBuf::as_operand).collect();

            if recycle {
                api::recycler_enable();
            }
            api::ledger_disable();
            api::ledger_enable();

            println!("{} over {elements} elements, {runs} runs per worker count", key.signature());
            for &count in &workers {
                api::thread_setworkers(i64::try_from(count).unwrap_or(i64::MAX));
                let start = api::ledger_info().records.len();
                for _ in 0..runs {
                    api::apply(&key, &views)?;
                }
                let info = api::ledger_info();
                let batch = &info.records[start..];
                let total: u64 = batch.iter().map(|record| record.duration_nanos).sum();
                let mean_ms = total as f64 / batch.len().max(1) as f64 / 1.0e6;
                let used = batch.iter().map(|record| record.workers_used).max().unwrap_or(1);
                println!("- workers={count} used={used} mean_ms={mean_ms:.3}");
            }

            let info: LedgerInfo = api::ledger_info();
            if let Some(summary) = info.summary(&key.signature()) {
                println!(
                    "calls={} threaded={} min_ms={:.3} max_ms={:.3}",
                    summary.calls,
                    summary.threaded_calls,
                    summary.min_nanos as f64 / 1.0e6,
                    summary.max_nanos as f64 / 1.0e6
                );
            }
            if recycle {
                let recycler = api::recycler_info();
                println!("recycler: hits={} misses={}", recycler.hits, recycler.misses);
            }
            if let Some(path) = dump_ledger {
                info.save_to_file(&path)?;
            }
        }
    }
    Ok(())
}

fn parse_op(name: &str) -> Result<LoopOp> {
    LoopOp::from_name(name).ok_or_else(|| anyhow!("unknown loop `{name}`"))
}
