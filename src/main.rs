use anyhow::{Context, Result};
use circ::cli::{Cli, Command};
use circ::config::{config_path, Configuration};
use circ::trace_log::{self, CallSample, FunctionSummary};
use clap::Parser;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Parse the configuration; configuration errors exit with their runtime status
fn check_config(path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(config_path);
    tracing::debug!(config = %path.display(), "checking configuration");

    match Configuration::load(&path) {
        Ok(config) => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
            Ok(())
        }
        Err(err) => {
            let status = err.exit_status();
            eprintln!("{}: {}", path.display(), err);
            std::process::exit(status.code());
        }
    }
}

fn load_calls(path: &Path) -> Result<Vec<CallSample>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open trace {}", path.display()))?;
    let records = trace_log::read_trace(BufReader::new(file))
        .with_context(|| format!("Failed to parse trace {}", path.display()))?;
    tracing::debug!(records = records.len(), "trace loaded");
    let calls = trace_log::pair_calls(&records)
        .with_context(|| format!("Unbalanced trace {}", path.display()))?;
    Ok(calls)
}

fn print_calls(calls: &[CallSample]) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for call in calls {
        serde_json::to_writer(&mut out, call)?;
        writeln!(out)?;
    }
    Ok(())
}

/// Print function timing summary, sorted by total time
fn print_summary(summary: &[FunctionSummary]) {
    if summary.is_empty() {
        println!("No completed calls in trace.");
        return;
    }

    println!("{:<20} {:>10} {:>14} {:>14}", "Function", "Calls", "Total Time", "Avg Time");
    println!("{}", "─".repeat(61));
    for entry in summary {
        let total_seconds = entry.total_us as f64 / 1_000_000.0;
        let avg_seconds = entry.mean_us as f64 / 1_000_000.0;
        println!(
            "{:<20} {:>10} {:>13.6}s {:>13.6}s",
            entry.function.to_string(),
            entry.calls,
            total_seconds,
            avg_seconds
        );
    }
    println!("{}", "─".repeat(61));
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    match args.command {
        Command::Check { config } => check_config(config)?,
        Command::Calls { trace } => print_calls(&load_calls(&trace)?)?,
        Command::Summary { trace } => {
            let calls = load_calls(&trace)?;
            print_summary(&trace_log::summarize(&calls));
        }
    }

    Ok(())
}
