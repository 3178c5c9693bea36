//! Tracker configuration
//!
//! The recorder is configured from the command line, each option falling
//! back to the environment of the traced process (see [`crate::cli::Args`]):
//!
//! | Variable          | Meaning                                        | Default        |
//! |-------------------|------------------------------------------------|----------------|
//! | `PROVLOG_OUTPUT`  | Log destination, `-` for stdout                | `provlog.out`  |
//! | `PROVLOG_MAX_FDS` | Bound on tracked descriptor numbers            | `1024`         |
//! | `PROVLOG_EXE`     | Executable name override                       | `/proc/self`   |
//! | `PROVLOG_PID`     | Process id override                            | `/proc/self`   |
//! | `PROVLOG_EXCLUDE` | Colon-separated path prefixes never watched    | none           |

use anyhow::{bail, Context, Result};
use log::info;
use provlog_common::{MAX_OPEN_FILES, STDFD_MAX};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::domain::Pid;
use crate::emit::ProvEmitter;
use crate::process_lookup::ProcessIdentity;
use crate::tracker::Tracker;
use crate::tracking::ExcludePrefixes;

pub const ENV_OUTPUT: &str = "PROVLOG_OUTPUT";
pub const ENV_MAX_FDS: &str = "PROVLOG_MAX_FDS";
pub const ENV_EXE: &str = "PROVLOG_EXE";
pub const ENV_PID: &str = "PROVLOG_PID";
pub const ENV_EXCLUDE: &str = "PROVLOG_EXCLUDE";

pub const DEFAULT_OUTPUT: &str = "provlog.out";

/// Where the provenance log goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "-" {
            OutputTarget::Stdout
        } else {
            OutputTarget::File(PathBuf::from(value))
        }
    }

    /// Open the destination for appending lines
    ///
    /// Files are created or truncated: one log per session.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn open(&self) -> Result<Box<dyn Write + Send>> {
        match self {
            OutputTarget::Stdout => Ok(Box::new(std::io::stdout())),
            OutputTarget::File(path) => {
                let file = File::create(path)
                    .with_context(|| format!("Failed to create log file: {}", path.display()))?;
                Ok(Box::new(BufWriter::new(file)))
            }
        }
    }
}

/// Runtime configuration of one tracking session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub output: OutputTarget,
    pub max_open_files: usize,
    pub exe: Option<String>,
    pub pid: Option<u32>,
    pub exclude: Vec<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            output: OutputTarget::File(PathBuf::from(DEFAULT_OUTPUT)),
            max_open_files: MAX_OPEN_FILES,
            exe: None,
            pid: None,
            exclude: Vec::new(),
        }
    }
}

impl TrackerConfig {
    /// # Errors
    /// Returns an error if the descriptor bound cannot hold the standard streams.
    pub fn validate(&self) -> Result<()> {
        if self.max_open_files < STDFD_MAX {
            bail!(
                "{ENV_MAX_FDS} must be at least {STDFD_MAX} (got {}).\n\n\
                 The standard streams always occupy descriptors 0-2.",
                self.max_open_files
            );
        }
        Ok(())
    }

    /// Process identity, with configured overrides applied
    ///
    /// # Errors
    /// Returns an error if no override is given and `/proc/self` is unreadable.
    pub fn process_identity(&self) -> Result<ProcessIdentity> {
        if let (Some(exe), Some(pid)) = (&self.exe, self.pid) {
            return Ok(ProcessIdentity::new(exe.clone(), Pid(pid)));
        }

        let mut identity = match self.pid {
            Some(pid) => ProcessIdentity::for_pid(Pid(pid))?,
            None => ProcessIdentity::current()?,
        };
        if let Some(exe) = &self.exe {
            identity.exe.clone_from(exe);
        }
        Ok(identity)
    }

    #[must_use]
    pub fn watch_policy(&self) -> ExcludePrefixes {
        ExcludePrefixes::new(self.exclude.iter().cloned())
    }

    /// Open the output and assemble a tracker for this session
    ///
    /// # Errors
    /// Returns an error if the identity cannot be resolved or the output cannot be opened.
    pub fn build_tracker(&self) -> Result<Tracker<Box<dyn Write + Send>>> {
        let identity = self.process_identity()?;
        let out = self.output.open()?;
        info!(
            "Tracking {} ({}), max fds {}, output {:?}",
            identity.exe, identity.pid, self.max_open_files, self.output
        );
        let emitter = ProvEmitter::new(out, identity);
        Ok(Tracker::new(emitter, self.max_open_files).with_policy(self.watch_policy()))
    }
}
