//! Replay of recorded instrumentation events
//!
//! The binary-instrumentation layer that intercepts system calls lives
//! outside this crate. To drive the tracker without it, events can be fed as
//! JSON lines, one intercepted operation per line:
//!
//! ```text
//! {"op":"open","fd":3,"path":"/tmp/in","flags":["RDONLY"]}
//! {"op":"open","fd":4,"path":"/tmp/out","flags":["WRONLY","CREAT"],"created":true}
//! {"op":"read","fd":3,"offset":0,"len":5}
//! {"op":"write","fd":4,"offset":0,"sources":[[1,0],[1,1],[1,2],null,[1,4]]}
//! {"op":"close","fd":4}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use log::{debug, info};
use provlog_common::{SourceByte, StableId};
use serde::Deserialize;
use std::io::{BufRead, Write};

use crate::domain::{OpenFlags, ReplayError, TrackerError};
use crate::tracker::Tracker;

/// Symbolic `open(2)` flag names accepted in replay scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlagName {
    Rdonly,
    Wronly,
    Rdwr,
    Creat,
    Trunc,
    Append,
}

impl FlagName {
    fn bits(self) -> i32 {
        match self {
            FlagName::Rdonly => libc::O_RDONLY,
            FlagName::Wronly => libc::O_WRONLY,
            FlagName::Rdwr => libc::O_RDWR,
            FlagName::Creat => libc::O_CREAT,
            FlagName::Trunc => libc::O_TRUNC,
            FlagName::Append => libc::O_APPEND,
        }
    }
}

fn open_flags(names: &[FlagName]) -> OpenFlags {
    OpenFlags(names.iter().fold(0, |bits, name| bits | name.bits()))
}

/// One intercepted operation
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InstrumentationEvent {
    Open {
        fd: i32,
        path: String,
        #[serde(default)]
        flags: Vec<FlagName>,
        #[serde(default)]
        created: bool,
    },
    Close {
        fd: i32,
    },
    Dup {
        old: i32,
        new: i32,
    },
    Exec {
        exe: String,
    },
    Read {
        fd: i32,
        #[serde(default)]
        offset: u64,
        len: u64,
    },
    Write {
        fd: i32,
        #[serde(default)]
        offset: u64,
        sources: Vec<Option<SourceByte>>,
    },
    WriteSets {
        fd: i32,
        #[serde(default)]
        offset: u64,
        sources: Vec<Vec<SourceByte>>,
    },
    WriteCoarse {
        fd: i32,
        #[serde(default)]
        offset: u64,
        origins: Vec<StableId>,
        len: u64,
    },
}

/// Counts of what a replay did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub watched_opens: usize,
    pub tainted_reads: usize,
    pub range_records: usize,
}

impl InstrumentationEvent {
    /// Apply this event to the tracker
    ///
    /// # Errors
    /// Propagates the tracker's error; all of them end the session.
    pub fn apply<W: Write>(
        &self,
        tracker: &Tracker<W>,
        summary: &mut ReplaySummary,
    ) -> Result<(), TrackerError> {
        match self {
            InstrumentationEvent::Open { fd, path, flags, created } => {
                if tracker.on_open(*fd, path, open_flags(flags), *created)?.is_some() {
                    summary.watched_opens += 1;
                }
            }
            InstrumentationEvent::Close { fd } => {
                tracker.on_close(*fd)?;
            }
            InstrumentationEvent::Dup { old, new } => {
                tracker.on_dup(*old, *new)?;
            }
            InstrumentationEvent::Exec { exe } => tracker.on_exec(exe)?,
            InstrumentationEvent::Read { fd, offset, len } => {
                if let Some(anchor) = tracker.on_read(*fd, *offset, *len)? {
                    debug!("read fd {fd}: {len} bytes tainted from {}@{}", anchor.ufd, anchor.offset);
                    summary.tainted_reads += 1;
                }
            }
            InstrumentationEvent::Write { fd, offset, sources } => {
                summary.range_records += tracker.on_write(*fd, *offset, sources)?;
            }
            InstrumentationEvent::WriteSets { fd, offset, sources } => {
                summary.range_records += tracker.on_write_sets(*fd, *offset, sources)?;
            }
            InstrumentationEvent::WriteCoarse { fd, offset, origins, len } => {
                summary.range_records += tracker.on_write_coarse(*fd, *offset, origins, *len)?;
            }
        }
        summary.events += 1;
        Ok(())
    }
}

/// Replay a JSON-lines event script through `tracker`
///
/// Stops at the first invalid line or tracker error.
///
/// # Errors
/// - `InvalidEvent` for lines that are not a known event
/// - `Tracker` for fatal tracker errors, with the script line number
/// - `Io` if the script cannot be read
pub fn replay<R: BufRead, W: Write>(
    input: R,
    tracker: &Tracker<W>,
) -> Result<ReplaySummary, ReplayError> {
    let mut summary = ReplaySummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let number = index + 1;
        let event: InstrumentationEvent = serde_json::from_str(trimmed)
            .map_err(|source| ReplayError::InvalidEvent { line: number, source })?;
        event
            .apply(tracker, &mut summary)
            .map_err(|source| ReplayError::Tracker { line: number, source })?;
    }

    info!(
        "Replayed {} events: {} watched opens, {} tainted reads, {} range records",
        summary.events, summary.watched_opens, summary.tainted_reads, summary.range_records
    );
    Ok(summary)
}
