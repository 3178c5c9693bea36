//! # Tracker Context
//!
//! The single owned context the instrumentation layer calls into. It holds
//! every piece of process-wide provenance state behind one lock:
//!
//! ```text
//!                ┌──────────── Mutex<TrackerState> ────────────┐
//! on_open  ────▶ │ WatchSet ─▶ DescriptorIdentityMap ─▶ Emitter │ ──▶ log
//! on_write ────▶ │ StdioCounters ─────────────┘                 │
//!                └─────────────────────────────────────────────┘
//! ```
//!
//! One global lock gives gap-free id allocation and a total order of log
//! lines across threads. Range classification is pure and runs before the
//! lock is taken.

use std::io::Write;
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};
use provlog_common::{RangeRecord, SourceByte, StableId};

use crate::domain::{OpenFlags, TrackerError};
use crate::emit::{validate_name, EmitStats, ProvEmitter};
use crate::ranges::{classify, classify_sets};
use crate::tracking::{
    DescriptorIdentityMap, StdStream, StdioCounters, WatchAll, WatchPolicy, WatchSet,
};

struct TrackerState<W: Write> {
    identities: DescriptorIdentityMap,
    watched: WatchSet,
    stdio: StdioCounters,
    emitter: ProvEmitter<W>,
}

impl<W: Write> TrackerState<W> {
    /// Unwatch and retire `fd`; emits `c:` only when an identity was bound
    fn close(&mut self, fd: i32) -> Result<StableId, TrackerError> {
        if !self.watched.remove(fd) {
            return Ok(StableId::UNASSIGNED);
        }
        let ufd = self.identities.release(fd)?;
        if ufd.is_assigned() {
            self.emitter.emit_close(ufd)?;
        } else {
            warn!("fd {fd} closed without an identity, nothing to retire");
        }
        Ok(ufd)
    }

    /// Offset of the first byte of a transfer of `len` bytes on `fd`
    fn transfer_start(&mut self, fd: i32, offset: u64, len: u64) -> u64 {
        match StdStream::from_fd(fd) {
            Some(stream) => self.stdio.advance(stream, len),
            None => offset,
        }
    }

    fn emit_records(
        &mut self,
        fd: i32,
        offset: u64,
        len: u64,
        records: &[RangeRecord],
    ) -> Result<usize, TrackerError> {
        let dest = self.identities.identity_of(fd)?;
        let base = self.transfer_start(fd, offset, len);
        // Reject the whole write before any of its lines reach the log
        if let Some(last) = records.last() {
            if base.checked_add(last.start).is_none() {
                return Err(TrackerError::OffsetOverflow { offset: base, delta: last.start });
            }
        }
        for record in records {
            self.emitter.emit_write_range(dest, base, record)?;
        }
        Ok(records.len())
    }
}

/// Process-wide provenance recorder
pub struct Tracker<W: Write> {
    state: Mutex<TrackerState<W>>,
    policy: Box<dyn WatchPolicy>,
}

impl<W: Write> Tracker<W> {
    /// Create a tracker for descriptors `0..max_open_files`
    ///
    /// The standard streams are watched from the start; they are inherited,
    /// never opened through the tracked path.
    #[must_use]
    pub fn new(emitter: ProvEmitter<W>, max_open_files: usize) -> Self {
        let mut watched = WatchSet::new();
        for stream in StdStream::ALL {
            watched.add(stream.fd());
        }

        Self {
            state: Mutex::new(TrackerState {
                identities: DescriptorIdentityMap::with_capacity(max_open_files),
                watched,
                stdio: StdioCounters::new(),
                emitter,
            }),
            policy: Box::new(WatchAll),
        }
    }

    /// Replace the policy deciding which opened paths are watched
    #[must_use]
    pub fn with_policy(mut self, policy: impl WatchPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, TrackerState<W>>, TrackerError> {
        self.state.lock().map_err(|_| TrackerError::LockPoisoned)
    }

    /// `open` returned `fd` for `path`
    ///
    /// Returns the identity bound to `fd`, or `None` if the policy does not
    /// watch the path. Any identity still bound to `fd` is retired first,
    /// whether or not the new path is watched.
    ///
    /// # Errors
    /// - `DescriptorOutOfRange` if `fd` is outside the identity table
    /// - `UnrepresentableName` if `path` contains a newline
    /// - Stream errors if the log cannot be written
    pub fn on_open(
        &self,
        fd: i32,
        path: &str,
        flags: OpenFlags,
        created: bool,
    ) -> Result<Option<StableId>, TrackerError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        // The descriptor number was reused without a close we saw
        let stale = state.close(fd)?;
        if stale.is_assigned() {
            warn!("fd {fd} reopened without a close, retired {stale}");
        }

        if !self.policy.is_relevant(path, flags) {
            debug!("fd {fd} ({path}) not watched by policy");
            return Ok(None);
        }
        validate_name(path)?;

        let ufd = state.identities.identity_of(fd)?;
        state.watched.add(fd);
        state.emitter.emit_open(ufd, path, flags, created)?;
        Ok(Some(ufd))
    }

    /// `close(fd)` succeeded
    ///
    /// Returns the retired identity, [`StableId::UNASSIGNED`] if there was none.
    ///
    /// # Errors
    /// Returns an error if `fd` is outside the table or the log cannot be written.
    pub fn on_close(&self, fd: i32) -> Result<StableId, TrackerError> {
        self.lock()?.close(fd)
    }

    /// `dup2(old, new)` or `dup(old) = new` succeeded
    ///
    /// An already watched `new` is implicitly closed first. `new` is watched
    /// iff `old` is, and receives its own identity on first use.
    ///
    /// # Errors
    /// Returns an error if `new` is outside the table or the log cannot be written.
    pub fn on_dup(&self, old: i32, new: i32) -> Result<bool, TrackerError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        // dup2(fd, fd) leaves the descriptor untouched
        if old == new {
            return Ok(state.watched.contains(old));
        }

        state.close(new)?;
        if !state.watched.contains(old) {
            return Ok(false);
        }
        state.identities.check(new)?;
        state.watched.add(new);
        Ok(true)
    }

    /// The process image was replaced by `exe`; the pid is unchanged
    ///
    /// # Errors
    /// Returns a stream error if the log cannot be written.
    pub fn on_exec(&self, exe: &str) -> Result<(), TrackerError> {
        let mut state = self.lock()?;
        let pid = state.emitter.identity().pid;
        state.emitter.emit_exec(exe, pid)
    }

    /// `len` bytes were read from `fd` at `offset`
    ///
    /// Returns the taint anchor of the first byte read, or `None` when `fd`
    /// is not watched. Standard streams ignore `offset` and use their counter.
    ///
    /// # Errors
    /// Returns `DescriptorOutOfRange` if `fd` is outside the identity table.
    pub fn on_read(
        &self,
        fd: i32,
        offset: u64,
        len: u64,
    ) -> Result<Option<SourceByte>, TrackerError> {
        let mut state = self.lock()?;
        if !state.watched.contains(fd) {
            return Ok(None);
        }
        let ufd = state.identities.identity_of(fd)?;
        let start = state.transfer_start(fd, offset, len);
        Ok(Some(SourceByte::new(ufd, start)))
    }

    /// A write of `attributions.len()` bytes to `fd` at `offset`
    ///
    /// Returns the number of range records emitted.
    ///
    /// # Errors
    /// Returns an error if `fd` is outside the table or the log cannot be written.
    pub fn on_write(
        &self,
        fd: i32,
        offset: u64,
        attributions: &[Option<SourceByte>],
    ) -> Result<usize, TrackerError> {
        let records = classify(attributions);
        let mut state = self.lock()?;
        if !state.watched.contains(fd) {
            return Ok(0);
        }
        state.emit_records(fd, offset, attributions.len() as u64, &records)
    }

    /// Like [`Tracker::on_write`] with a set of sources per destination byte
    ///
    /// # Errors
    /// Returns an error if `fd` is outside the table or the log cannot be written.
    pub fn on_write_sets<S: AsRef<[SourceByte]>>(
        &self,
        fd: i32,
        offset: u64,
        attributions: &[S],
    ) -> Result<usize, TrackerError> {
        let records = classify_sets(attributions);
        let mut state = self.lock()?;
        if !state.watched.contains(fd) {
            return Ok(0);
        }
        state.emit_records(fd, offset, attributions.len() as u64, &records)
    }

    /// A write of `length` bytes whose taint only names source descriptors
    ///
    /// # Errors
    /// Returns an error if `fd` is outside the table or the log cannot be written.
    pub fn on_write_coarse(
        &self,
        fd: i32,
        offset: u64,
        origins: &[StableId],
        length: u64,
    ) -> Result<usize, TrackerError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if length == 0 || !state.watched.contains(fd) {
            return Ok(0);
        }
        let dest = state.identities.identity_of(fd)?;
        let base = state.transfer_start(fd, offset, length);
        for &origin in origins {
            state.emitter.emit_write_coarse(origin, dest, base, length)?;
        }
        Ok(origins.len())
    }

    /// # Errors
    /// Returns `LockPoisoned` if another thread panicked while recording.
    pub fn is_watched(&self, fd: i32) -> Result<bool, TrackerError> {
        Ok(self.lock()?.watched.contains(fd))
    }

    /// Number of stable identities issued so far
    ///
    /// # Errors
    /// Returns `LockPoisoned` if another thread panicked while recording.
    pub fn identities_issued(&self) -> Result<u32, TrackerError> {
        Ok(self.lock()?.identities.issued())
    }

    /// # Errors
    /// Returns `LockPoisoned` if another thread panicked while recording.
    pub fn stats(&self) -> Result<EmitStats, TrackerError> {
        Ok(self.lock()?.emitter.stats())
    }

    /// Tear down the tracker at process exit, returning the emitter
    ///
    /// # Errors
    /// Returns `LockPoisoned` if another thread panicked while recording.
    pub fn into_emitter(self) -> Result<ProvEmitter<W>, TrackerError> {
        self.state.into_inner().map(|state| state.emitter).map_err(|_| TrackerError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Pid;
    use crate::process_lookup::ProcessIdentity;
    use crate::tracking::ExcludePrefixes;
    use provlog_common::ProvRecord;

    fn tracker() -> Tracker<Vec<u8>> {
        Tracker::new(ProvEmitter::new(Vec::new(), ProcessIdentity::new("prog", Pid(7))), 64)
    }

    fn log(tracker: Tracker<Vec<u8>>) -> Vec<String> {
        let out = tracker.into_emitter().unwrap().into_inner();
        String::from_utf8(out).unwrap().lines().map(str::to_string).collect()
    }

    fn seq(ufd: u32, from: u64, len: u64) -> Vec<Option<SourceByte>> {
        (from..from + len).map(|o| Some(SourceByte::new(StableId(ufd), o))).collect()
    }

    #[test]
    fn test_open_write_only_created() {
        let t = tracker();
        let ufd = t.on_open(3, "/tmp/a", OpenFlags::WRONLY | OpenFlags::CREAT, true).unwrap();
        assert_eq!(ufd, Some(StableId(1)));
        assert_eq!(log(t), vec!["o:ufd1:/tmp/a", "#g:created", "g:c:prog:/tmp/a"]);
    }

    #[test]
    fn test_copy_between_files() {
        let t = tracker();
        t.on_open(3, "in", OpenFlags::RDONLY, false).unwrap();
        t.on_open(4, "out", OpenFlags::WRONLY | OpenFlags::TRUNC, false).unwrap();

        let anchor = t.on_read(3, 40, 5).unwrap().unwrap();
        assert_eq!(anchor, SourceByte::new(StableId(1), 40));

        let emitted = t.on_write(4, 100, &seq(1, 40, 5)).unwrap();
        assert_eq!(emitted, 1);
        assert_eq!(log(t).last().unwrap(), "w:SEQ:ufd2:100:ufd1:40:5");
    }

    #[test]
    fn test_close_unassigned_emits_nothing() {
        let t = tracker();
        // stdin is watched but never touched, so it has no identity
        assert_eq!(t.on_close(0).unwrap(), StableId::UNASSIGNED);
        // An unwatched descriptor is ignored entirely
        assert_eq!(t.on_close(9).unwrap(), StableId::UNASSIGNED);
        assert!(log(t).is_empty());
    }

    #[test]
    fn test_reused_descriptor_gets_new_identity() {
        let t = tracker();
        let first = t.on_open(5, "a", OpenFlags::RDONLY, false).unwrap().unwrap();
        assert_eq!(t.on_close(5).unwrap(), first);
        let second = t.on_open(5, "b", OpenFlags::RDONLY, false).unwrap().unwrap();
        assert!(second > first);
        assert_eq!(
            log(t),
            vec!["o:ufd1:a", "u:prog:a", "c:ufd1", "o:ufd2:b", "u:prog:b"]
        );
    }

    #[test]
    fn test_reopen_without_close_retires_stale_identity() {
        let t = tracker();
        t.on_open(5, "a", OpenFlags::RDONLY, false).unwrap();
        let second = t.on_open(5, "b", OpenFlags::RDONLY, false).unwrap().unwrap();
        assert_eq!(second, StableId(2));
        assert!(log(t).contains(&"c:ufd1".to_string()));
    }

    #[test]
    fn test_stdio_offsets_are_counted() {
        let t = tracker();
        assert_eq!(t.on_read(0, 999, 10).unwrap(), Some(SourceByte::new(StableId(1), 0)));
        assert_eq!(t.on_read(0, 999, 4).unwrap(), Some(SourceByte::new(StableId(1), 10)));

        t.on_write(1, 0, &seq(1, 0, 3)).unwrap();
        t.on_write(1, 0, &seq(1, 3, 2)).unwrap();
        assert_eq!(log(t), vec!["w:SEQ:ufd2:0:ufd1:0:3", "w:SEQ:ufd2:3:ufd1:3:2"]);
    }

    #[test]
    fn test_unwatched_descriptors_are_ignored() {
        let t = tracker().with_policy(ExcludePrefixes::new(["/proc"]));
        assert_eq!(t.on_open(3, "/proc/self/maps", OpenFlags::RDONLY, false).unwrap(), None);
        assert!(!t.is_watched(3).unwrap());
        assert_eq!(t.on_read(3, 0, 10).unwrap(), None);
        assert_eq!(t.on_write(3, 0, &seq(1, 0, 3)).unwrap(), 0);
        assert_eq!(t.identities_issued().unwrap(), 0);
        assert!(log(t).is_empty());
    }

    #[test]
    fn test_out_of_range_open_is_fatal() {
        let t = tracker();
        let err = t.on_open(64, "x", OpenFlags::RDONLY, false).unwrap_err();
        assert!(matches!(err, TrackerError::DescriptorOutOfRange { fd: 64, max: 64 }));
        assert!(!t.is_watched(64).unwrap());
    }

    #[test]
    fn test_dup_follows_watch_state() {
        let t = tracker();
        t.on_open(3, "a", OpenFlags::RDWR, false).unwrap();
        assert!(t.on_dup(3, 10).unwrap());
        assert!(t.is_watched(10).unwrap());
        // The duplicate gets its own identity on first use
        let anchor = t.on_read(10, 0, 1).unwrap().unwrap();
        assert_eq!(anchor.ufd, StableId(2));

        // dup2 over a watched descriptor closes it first
        assert!(!t.on_dup(20, 10).unwrap());
        assert!(!t.is_watched(10).unwrap());
        assert_eq!(log(t).last().unwrap(), "c:ufd2");
    }

    #[test]
    fn test_dup2_onto_itself_is_noop() {
        let t = tracker();
        t.on_open(3, "out", OpenFlags::WRONLY, false).unwrap();
        assert!(t.on_dup(3, 3).unwrap());
        assert!(t.is_watched(3).unwrap());
        assert_eq!(t.on_write(3, 0, &seq(9, 0, 2)).unwrap(), 1);

        let lines = log(t);
        assert!(!lines.contains(&"c:ufd1".to_string()));
        assert_eq!(lines.last().unwrap(), "w:SEQ:ufd1:0:ufd9:0:2");
    }

    #[test]
    fn test_dup_onto_out_of_range_descriptor() {
        let t = tracker();
        t.on_open(3, "a", OpenFlags::RDONLY, false).unwrap();
        let err = t.on_dup(3, 64).unwrap_err();
        assert!(matches!(err, TrackerError::DescriptorOutOfRange { fd: 64, max: 64 }));
        assert!(!t.is_watched(64).unwrap());
        assert!(t.is_watched(3).unwrap());
    }

    #[test]
    fn test_reopen_as_excluded_path_retires_identity() {
        let t = tracker().with_policy(ExcludePrefixes::new(["/proc"]));
        t.on_open(5, "/data/a", OpenFlags::RDONLY, false).unwrap();
        assert_eq!(t.on_open(5, "/proc/self/maps", OpenFlags::RDONLY, false).unwrap(), None);
        assert!(!t.is_watched(5).unwrap());
        assert_eq!(t.on_read(5, 0, 4).unwrap(), None);
        assert_eq!(log(t).last().unwrap(), "c:ufd1");
    }

    #[test]
    fn test_write_offset_overflow_keeps_tracker_usable() {
        let t = tracker();
        t.on_open(3, "out", OpenFlags::WRONLY, false).unwrap();
        let attrs = [None, Some(SourceByte::new(StableId(9), 0))];
        let err = t.on_write(3, u64::MAX, &attrs).unwrap_err();
        assert!(matches!(err, TrackerError::OffsetOverflow { offset: u64::MAX, delta: 1 }));

        // The lock is not poisoned
        assert_eq!(t.on_write(3, 0, &attrs).unwrap(), 1);
        assert_eq!(log(t).last().unwrap(), "w:NONE:ufd1:1:ufd9:0:1");
    }

    #[test]
    fn test_newline_in_path_burns_no_identity() {
        let t = tracker();
        let err = t.on_open(3, "a\nb", OpenFlags::RDONLY, false).unwrap_err();
        assert!(matches!(err, TrackerError::UnrepresentableName(_)));
        assert!(!t.is_watched(3).unwrap());
        assert_eq!(t.identities_issued().unwrap(), 0);
        assert!(log(t).is_empty());
    }

    #[test]
    fn test_exec_switches_executable_name() {
        let t = tracker();
        t.on_exec("sh").unwrap();
        t.on_open(3, "f", OpenFlags::RDONLY, false).unwrap();
        assert_eq!(log(t), vec!["x:7:sh", "o:ufd1:f", "u:sh:f"]);
    }

    #[test]
    fn test_write_sets_and_coarse() {
        let t = tracker();
        t.on_open(3, "out", OpenFlags::WRONLY, false).unwrap();
        let a = SourceByte::new(StableId(8), 0);
        let b = SourceByte::new(StableId(9), 5);
        assert_eq!(t.on_write_sets(3, 10, &[vec![a, b], vec![b]]).unwrap(), 2);
        assert_eq!(t.on_write_coarse(3, 12, &[StableId(8)], 4).unwrap(), 1);
        let lines = log(t);
        assert_eq!(
            &lines[lines.len() - 3..],
            ["w:NONE:ufd1:10:ufd8:0:1", "w:REP:ufd1:10:ufd9:5:2", "w:REP:ufd1:12:ufd8:0:4"]
        );
    }

    #[test]
    fn test_concurrent_threads_get_unique_ids_and_whole_lines() {
        let t = Tracker::new(
            ProvEmitter::new(Vec::new(), ProcessIdentity::new("prog", Pid(7))),
            1024,
        );

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let t = &t;
                scope.spawn(move || {
                    for round in 0..50 {
                        let fd = 10 + worker * 100 + round % 10;
                        t.on_open(fd, "/tmp/shared", OpenFlags::RDONLY, false).unwrap();
                        t.on_close(fd).unwrap();
                    }
                });
            }
        });

        assert_eq!(t.identities_issued().unwrap(), 400);
        let lines = log(t);
        assert_eq!(lines.len(), 400 * 3);

        let mut opened: Vec<u32> = lines
            .iter()
            .filter_map(|line| match ProvRecord::parse(line).unwrap() {
                ProvRecord::Open { ufd, .. } => Some(ufd.0),
                _ => None,
            })
            .collect();
        // Allocation order matches log order, and nothing is reused
        assert!(opened.windows(2).all(|w| w[0] < w[1]));
        opened.dedup();
        assert_eq!(opened.len(), 400);
    }
}
