//! Process identity: executable name and pid of the traced process.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::domain::Pid;

/// Executable name and OS process id
///
/// Fixed for one incarnation of the process image; replaced on exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub exe: String,
    pub pid: Pid,
}

impl ProcessIdentity {
    #[must_use]
    pub fn new(exe: impl Into<String>, pid: Pid) -> Self {
        Self { exe: exe.into(), pid }
    }

    /// Identity of the calling process
    ///
    /// # Errors
    /// Returns an error if neither `/proc/self/exe` nor `/proc/self/stat` is readable.
    pub fn current() -> Result<Self> {
        Self::for_pid(Pid(std::process::id()))
    }

    /// Identity of `pid`, read from `/proc`
    ///
    /// Prefers the executable basename; falls back to the command name in
    /// `/proc/<pid>/stat` when the `exe` link is unreadable.
    ///
    /// # Errors
    /// Returns an error if the process doesn't exist or `/proc` is not readable.
    pub fn for_pid(pid: Pid) -> Result<Self> {
        if let Ok(path) = resolve_exe_path(pid) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                return Ok(Self::new(name, pid));
            }
        }

        let stat_path = format!("/proc/{}/stat", pid.0);
        let stat = fs::read_to_string(&stat_path).with_context(|| format!("Cannot read {stat_path}"))?;
        Ok(Self::new(extract_comm(&stat)?, pid))
    }
}

/// Resolve binary path from PID via `/proc/<pid>/exe`.
///
/// # Errors
/// Returns error if the process doesn't exist or `/proc/<pid>/exe` is not readable.
pub fn resolve_exe_path(pid: Pid) -> Result<PathBuf> {
    let exe_link = format!("/proc/{}/exe", pid.0);
    fs::read_link(&exe_link).with_context(|| format!("Cannot read {exe_link}"))
}

/// Extract command name from `/proc/<pid>/stat`.
/// Format: "pid (comm) state ..."
fn extract_comm(stat_line: &str) -> Result<String> {
    let open = stat_line.find('(').context("Invalid stat format")?;
    let close = stat_line.rfind(')').context("Invalid stat format")?;
    if open >= close {
        bail!("Invalid stat format");
    }
    Ok(stat_line[open + 1..close].to_string())
}
