//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use anyhow::Result;

use crate::config::{
    OutputTarget, TrackerConfig, DEFAULT_OUTPUT, ENV_EXCLUDE, ENV_EXE, ENV_MAX_FDS, ENV_OUTPUT,
    ENV_PID,
};

#[derive(Parser)]
#[command(
    name = "provlog",
    about = "Record byte-level data provenance from instrumentation events",
    after_help = "\
EXAMPLES:
    provlog events.jsonl                         Replay events into ./provlog.out
    provlog - --output - --exe cp --pid 4242     Read events from stdin, log to stdout
    provlog --check provlog.out                  Validate an existing provenance log"
)]
pub struct Args {
    /// JSON-lines instrumentation event script (- for stdin)
    #[arg(value_name = "EVENTS", required_unless_present = "check")]
    pub events: Option<String>,

    /// Provenance log destination (- for stdout)
    #[arg(short, long, env = ENV_OUTPUT, default_value = DEFAULT_OUTPUT)]
    pub output: String,

    /// Bound on tracked descriptor numbers
    #[arg(long, env = ENV_MAX_FDS, default_value_t = provlog_common::MAX_OPEN_FILES)]
    pub max_fds: usize,

    /// Executable name recorded in the log (default: from /proc)
    #[arg(long, env = ENV_EXE)]
    pub exe: Option<String>,

    /// Process id recorded in the log (default: from /proc)
    #[arg(short, long, env = ENV_PID)]
    pub pid: Option<u32>,

    /// Path prefixes never watched
    #[arg(long, env = ENV_EXCLUDE, value_delimiter = ':')]
    pub exclude: Vec<PathBuf>,

    /// Validate an existing provenance log instead of recording
    #[arg(long, value_name = "LOG", conflicts_with = "events")]
    pub check: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Session configuration from the parsed options
    ///
    /// An empty executable name (`PROVLOG_EXE=`) counts as unset.
    ///
    /// # Errors
    /// Returns an error if the descriptor bound cannot hold the standard streams.
    pub fn tracker_config(&self) -> Result<TrackerConfig> {
        let config = TrackerConfig {
            output: OutputTarget::parse(&self.output),
            max_open_files: self.max_fds,
            exe: self.exe.clone().filter(|exe| !exe.is_empty()),
            pid: self.pid,
            exclude: self.exclude.iter().filter(|p| !p.as_os_str().is_empty()).cloned().collect(),
        };
        config.validate()?;
        Ok(config)
    }
}
