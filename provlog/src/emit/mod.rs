//! # Provenance Emitter
//!
//! Serializes identity, lifecycle and range events into the append-only log.
//!
//! ## Event → Lines
//!
//! | Event              | Lines                                                   |
//! |--------------------|---------------------------------------------------------|
//! | open               | `o:`, then `u:` unless write-only, then `#g:` + `g:` if writable |
//! | close              | `c:`                                                    |
//! | exec               | `x:`                                                    |
//! | write (per record) | `w:`                                                    |
//!
//! Each event is flushed as a whole. The first failed write poisons the
//! emitter: partial provenance is worse than none, so every later event is
//! refused with [`TrackerError::SessionTerminated`].

use std::fmt;
use std::io::Write;

use log::error;
use provlog_common::{GenerationKind, ProvRecord, RangeKind, RangeRecord, SourceByte, StableId};

use crate::domain::{OpenFlags, TrackerError};
use crate::process_lookup::ProcessIdentity;

/// Line counters for end-of-session statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmitStats {
    pub lines: u64,
    pub opens: u64,
    pub closes: u64,
    pub execs: u64,
    pub ranges_none: u64,
    pub ranges_seq: u64,
    pub ranges_rep: u64,
}

impl EmitStats {
    fn count_range(&mut self, kind: RangeKind) {
        match kind {
            RangeKind::None => self.ranges_none += 1,
            RangeKind::Seq => self.ranges_seq += 1,
            RangeKind::Rep => self.ranges_rep += 1,
        }
    }
}

impl fmt::Display for EmitStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lines={} opens={} closes={} execs={} ranges(none={} seq={} rep={})",
            self.lines,
            self.opens,
            self.closes,
            self.execs,
            self.ranges_none,
            self.ranges_seq,
            self.ranges_rep
        )
    }
}

/// Output side: writes whole events and latches the first failure
struct LineSink<W: Write> {
    out: W,
    failed: bool,
    stats: EmitStats,
}

impl<W: Write> LineSink<W> {
    fn write_event<'r>(
        &mut self,
        records: impl IntoIterator<Item = ProvRecord<'r>>,
    ) -> Result<(), TrackerError> {
        if self.failed {
            return Err(TrackerError::SessionTerminated);
        }

        let result = records
            .into_iter()
            .try_for_each(|record| {
                self.stats.lines += 1;
                writeln!(self.out, "{record}")
            })
            .and_then(|()| self.out.flush());

        result.map_err(|e| {
            self.failed = true;
            error!("Provenance log write failed, terminating session: {e}");
            TrackerError::Stream(e)
        })
    }
}

/// Serializer for the provenance log of one process
pub struct ProvEmitter<W: Write> {
    sink: LineSink<W>,
    identity: ProcessIdentity,
}

impl<W: Write> ProvEmitter<W> {
    #[must_use]
    pub fn new(out: W, identity: ProcessIdentity) -> Self {
        Self { sink: LineSink { out, failed: false, stats: EmitStats::default() }, identity }
    }

    /// Process identity used in `u:`/`g:` lines
    #[must_use]
    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    #[must_use]
    pub fn stats(&self) -> EmitStats {
        self.sink.stats
    }

    /// Returns true once a write has failed
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.sink.failed
    }

    pub fn into_inner(self) -> W {
        self.sink.out
    }

    /// Bind `ufd` to `name` and record how the process relates to the path
    ///
    /// # Errors
    /// - `UnrepresentableName` if `name` or the executable contains a newline
    /// - Stream errors if the log cannot be written
    pub fn emit_open(
        &mut self,
        ufd: StableId,
        name: &str,
        flags: OpenFlags,
        created: bool,
    ) -> Result<(), TrackerError> {
        validate_name(name)?;
        let exe = self.identity.exe.as_str();
        validate_name(exe)?;

        let used = (!flags.is_write_only()).then_some(ProvRecord::Used { exe, name });
        let generated = generation_kind(flags, created).into_iter().flat_map(move |kind| {
            [ProvRecord::Comment(kind.annotation()), ProvRecord::Generated { kind, exe, name }]
        });

        let records = std::iter::once(ProvRecord::Open { ufd, name }).chain(used).chain(generated);
        self.sink.write_event(records)?;
        self.sink.stats.opens += 1;
        Ok(())
    }

    /// Retire `ufd` in the log; the identity itself is never reissued
    ///
    /// # Errors
    /// Returns a stream error if the log cannot be written.
    pub fn emit_close(&mut self, ufd: StableId) -> Result<(), TrackerError> {
        self.sink.write_event([ProvRecord::Close { ufd }])?;
        self.sink.stats.closes += 1;
        Ok(())
    }

    /// Record an image replacement and adopt the new executable identity
    ///
    /// # Errors
    /// - `UnrepresentableName` if `exe` contains a newline
    /// - Stream errors if the log cannot be written
    pub fn emit_exec(&mut self, exe: &str, pid: crate::domain::Pid) -> Result<(), TrackerError> {
        validate_name(exe)?;
        self.identity.exe = exe.to_string();
        self.identity.pid = pid;
        self.sink.write_event([ProvRecord::Exec { pid: pid.0, exe }])?;
        self.sink.stats.execs += 1;
        Ok(())
    }

    /// Emit one classified run of a write starting at `dest_offset`
    ///
    /// # Errors
    /// - `OffsetOverflow` if the run starts past `u64::MAX`
    /// - Stream errors if the log cannot be written
    pub fn emit_write_range(
        &mut self,
        dest: StableId,
        dest_offset: u64,
        record: &RangeRecord,
    ) -> Result<(), TrackerError> {
        let start = dest_offset
            .checked_add(record.start)
            .ok_or(TrackerError::OffsetOverflow { offset: dest_offset, delta: record.start })?;
        self.sink.write_event([ProvRecord::Write {
            kind: record.kind,
            dest,
            dest_offset: start,
            source: record.source,
            length: record.length,
        }])?;
        self.sink.stats.count_range(record.kind);
        Ok(())
    }

    /// Descriptor-granular write: the taint carries the source identity only
    ///
    /// Source offset is always 0; `REP` for more than one byte, else `NONE`.
    ///
    /// # Errors
    /// Returns a stream error if the log cannot be written.
    pub fn emit_write_coarse(
        &mut self,
        origin: StableId,
        dest: StableId,
        write_begin: u64,
        length: u64,
    ) -> Result<(), TrackerError> {
        let kind = if length > 1 { RangeKind::Rep } else { RangeKind::None };
        self.sink.write_event([ProvRecord::Write {
            kind,
            dest,
            dest_offset: write_begin,
            source: SourceByte::new(origin, 0),
            length,
        }])?;
        self.sink.stats.count_range(kind);
        Ok(())
    }
}

/// Names end up as the last field of a line and cannot span two
///
/// # Errors
/// Returns `UnrepresentableName` if `name` contains a newline.
pub fn validate_name(name: &str) -> Result<(), TrackerError> {
    if name.contains('\n') {
        return Err(TrackerError::UnrepresentableName(name.to_string()));
    }
    Ok(())
}

/// Which generation line an open produces: `created > truncated > updated`
///
/// Only descriptors opened for writing generate anything.
#[must_use]
pub fn generation_kind(flags: OpenFlags, created: bool) -> Option<GenerationKind> {
    if !flags.is_writable() {
        return None;
    }
    Some(if created {
        GenerationKind::Created
    } else if flags.truncates() {
        GenerationKind::Truncated
    } else {
        GenerationKind::Updated
    })
}
