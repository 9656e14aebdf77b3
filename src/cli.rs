//! CLI argument parsing for circ

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "circ")]
#[command(version)]
#[command(about = "Inspect call-trace configurations and recorded traces", long_about = None)]
pub struct Cli {
    /// Enable debug logging to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a recorder configuration and print it as JSON
    Check {
        /// Configuration file (defaults to $CIRC_CONFIG, then circ.conf)
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print every completed call of a trace as one JSON object per line
    Calls {
        /// Trace file written by the runtime
        #[arg(value_name = "TRACE")]
        trace: PathBuf,
    },

    /// Show per-function call counts and timing
    Summary {
        /// Trace file written by the runtime
        #[arg(value_name = "TRACE")]
        trace: PathBuf,
    },
}
