//! Runtime configuration of the call recorder
//!
//! The configuration is read once, when the runtime starts, from a small
//! hand-parsed text format (see [`parser`]). It names the trace output file,
//! the buffering policy and the per-function filtering/sampling table.
//!
//! A configuration is either fully parsed or rejected: no partially built
//! policy table ever escapes a failed parse.

pub mod lexer;
pub mod parser;

use crate::error::ConfigError;
use crate::policy::PolicyTable;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "circ.conf";

/// Environment variable overriding the configuration file path
pub const CONFIG_PATH_ENV: &str = "CIRC_CONFIG";

/// Default trace output file
pub const DEFAULT_TRACE_FILE: &str = "trace.log";

/// Default number of records buffered before a bulk flush
pub const DEFAULT_INITIAL_CAPACITY: usize = 20_000;

/// Parsed recorder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Configuration {
    /// Trace output file name
    pub trace_file_name: String,

    /// Records reserved up front in buffered mode; also the bulk-flush threshold
    pub initial_capacity: usize,

    /// Write every record immediately instead of buffering
    ///
    /// Direct output survives a crash up to the last record at the cost of
    /// one write per hook. Buffered output loses unflushed records when the
    /// process dies abnormally.
    pub direct_output: bool,

    /// Filtering and sampling per function address
    pub policies: PolicyTable,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            trace_file_name: DEFAULT_TRACE_FILE.to_string(),
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            direct_output: false,
            policies: PolicyTable::new(),
        }
    }
}

impl Configuration {
    /// Read and parse a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Missing {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|_| ConfigError::Encoding)?;
        text.parse()
    }

    /// Load the configuration from [`config_path`]
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(config_path())
    }
}

impl FromStr for Configuration {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(parser::parse(s)?)
    }
}

/// Configuration path: `CIRC_CONFIG` if set, else `circ.conf`
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
