//! Benchmark and inspection executable for LoopForge.

use anyhow::Result;
use clap::Parser;
use loopforge::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
