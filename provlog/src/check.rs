//! Validation of an existing provenance log
//!
//! Reads a log back with the shared grammar and checks the invariants a
//! downstream graph builder relies on: every line parses, identities are
//! opened in strictly increasing order and never reopened, and write lines
//! have a non-zero length.

use anyhow::{bail, Context, Result};
use provlog_common::{ProvRecord, RangeKind, StableId};
use std::collections::HashSet;
use std::io::BufRead;

/// What a valid log contained
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogSummary {
    pub lines: usize,
    pub comments: usize,
    pub opens: usize,
    pub closes: usize,
    pub execs: usize,
    pub writes: usize,
    /// Bytes covered by `w:` lines
    pub derived_bytes: u64,
}

/// Parse and check every line of a log
///
/// # Errors
/// Returns an error naming the first offending line.
pub fn check_log<R: BufRead>(input: R) -> Result<LogSummary> {
    let mut summary = LogSummary::default();
    let mut opened: HashSet<StableId> = HashSet::new();
    let mut highest = StableId::UNASSIGNED;

    for (index, line) in input.lines().enumerate() {
        let number = index + 1;
        let line = line.with_context(|| format!("Failed to read line {number}"))?;
        let record =
            ProvRecord::parse(&line).with_context(|| format!("Line {number}: {line}"))?;
        summary.lines += 1;

        match record {
            ProvRecord::Comment(_) => summary.comments += 1,
            ProvRecord::Open { ufd, .. } => {
                if !ufd.is_assigned() || ufd <= highest || !opened.insert(ufd) {
                    bail!("Line {number}: {ufd} opened out of order or reused");
                }
                highest = ufd;
                summary.opens += 1;
            }
            ProvRecord::Close { .. } => summary.closes += 1,
            ProvRecord::Exec { .. } => summary.execs += 1,
            ProvRecord::Write { kind, length, .. } => {
                if length == 0 || (kind != RangeKind::None && length == 1) {
                    bail!("Line {number}: invalid {kind} range of length {length}");
                }
                summary.writes += 1;
                summary.derived_bytes = summary
                    .derived_bytes
                    .checked_add(length)
                    .with_context(|| format!("Line {number}: derived byte count overflows"))?;
            }
            ProvRecord::Used { .. } | ProvRecord::Generated { .. } => {}
        }
    }

    Ok(summary)
}
