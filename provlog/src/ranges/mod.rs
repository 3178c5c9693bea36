//! # Range Classification
//!
//! Collapses per-byte source attributions of one write into typed range
//! records. Bulk copies (`cp`-style) are overwhelmingly sequential and fills
//! (`memset`-style) repeat one source byte, so a handful of records replaces
//! thousands of per-byte lines without losing anything: every destination
//! byte's source can be recomputed from the record that covers it.
//!
//! ## Algorithm
//!
//! A single left-to-right scan with greedy maximal runs:
//!
//! ```text
//! dest:   0    1    2    3    4    5
//! src:   1:40 1:41 1:42 1:42 1:42  -
//!        └──── SEQ ───┘└─ REP ─┘   (gap: no record)
//! ```
//!
//! - A run's second byte fixes its mode: same source offset → `REP`,
//!   offset + 1 → `SEQ`, anything else closes the run.
//! - A byte that breaks the mode, a different source identity, or a gap
//!   closes the run.
//! - A run of length 1 is always `NONE`.
//!
//! Destination bytes may carry several sources at once (tag sets). Runs are
//! then tracked per source identity in parallel; with at most one source per
//! byte this is exactly the single-run scan above.

use provlog_common::{RangeKind, RangeRecord, SourceByte};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Undetermined,
    Seq,
    Rep,
}

#[derive(Debug)]
struct OpenRun {
    start: u64,
    length: u64,
    first: SourceByte,
    last_offset: u64,
    mode: Mode,
}

impl OpenRun {
    fn new(start: u64, source: SourceByte) -> Self {
        Self { start, length: 1, first: source, last_offset: source.offset, mode: Mode::Undetermined }
    }

    fn end(&self) -> u64 {
        self.start + self.length
    }

    /// Mode the run would have after taking `source` next, if it can
    fn accepts(&self, source: SourceByte) -> Option<Mode> {
        if source.ufd != self.first.ufd {
            return None;
        }
        let repeats = source.offset == self.last_offset;
        let follows = self.last_offset.checked_add(1) == Some(source.offset);
        match self.mode {
            Mode::Undetermined if repeats => Some(Mode::Rep),
            Mode::Undetermined if follows => Some(Mode::Seq),
            Mode::Rep if repeats => Some(Mode::Rep),
            Mode::Seq if follows => Some(Mode::Seq),
            _ => None,
        }
    }

    fn into_record(self) -> RangeRecord {
        let kind = match self.mode {
            _ if self.length == 1 => RangeKind::None,
            Mode::Seq => RangeKind::Seq,
            Mode::Rep => RangeKind::Rep,
            Mode::Undetermined => RangeKind::None,
        };
        RangeRecord { kind, start: self.start, length: self.length, source: self.first }
    }
}

/// Incremental classifier fed one destination byte at a time
#[derive(Debug, Default)]
pub struct RangeClassifier {
    position: u64,
    open: Vec<OpenRun>,
    closed: Vec<RangeRecord>,
}

impl RangeClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the sources of the next destination byte (empty = no known source)
    pub fn push(&mut self, sources: &[SourceByte]) {
        let position = self.position;

        for &source in sources {
            let extended = self
                .open
                .iter_mut()
                .filter(|run| run.end() == position)
                .find_map(|run| run.accepts(source).map(|mode| (run, mode)))
                .map(|(run, mode)| {
                    run.length += 1;
                    run.last_offset = source.offset;
                    run.mode = mode;
                })
                .is_some();

            if !extended {
                self.open.push(OpenRun::new(position, source));
            }
        }

        // Runs that did not take this byte are finished
        let (live, done): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.open).into_iter().partition(|run| run.end() == position + 1);
        self.open = live;
        self.closed.extend(done.into_iter().map(OpenRun::into_record));

        self.position += 1;
    }

    /// Close all runs and return records ordered by destination, then source
    #[must_use]
    pub fn finish(mut self) -> Vec<RangeRecord> {
        self.closed.extend(self.open.into_iter().map(OpenRun::into_record));
        self.closed.sort_by_key(|record| (record.start, record.source));
        self.closed
    }
}

/// Classify a write where each byte has at most one source
#[must_use]
pub fn classify(attributions: &[Option<SourceByte>]) -> Vec<RangeRecord> {
    let mut classifier = RangeClassifier::new();
    for attribution in attributions {
        classifier.push(attribution.as_slice());
    }
    classifier.finish()
}

/// Classify a write where each byte carries a set of sources
#[must_use]
pub fn classify_sets<S: AsRef<[SourceByte]>>(attributions: &[S]) -> Vec<RangeRecord> {
    let mut classifier = RangeClassifier::new();
    for sources in attributions {
        classifier.push(sources.as_ref());
    }
    classifier.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use provlog_common::StableId;

    fn src(ufd: u32, offset: u64) -> Option<SourceByte> {
        Some(SourceByte::new(StableId(ufd), offset))
    }

    fn record(kind: RangeKind, start: u64, length: u64, ufd: u32, offset: u64) -> RangeRecord {
        RangeRecord { kind, start, length, source: SourceByte::new(StableId(ufd), offset) }
    }

    /// Recompute the per-byte source of every destination byte a record covers
    fn expand(records: &[RangeRecord], len: usize) -> Vec<Option<SourceByte>> {
        let mut bytes = vec![None; len];
        for r in records {
            for i in 0..r.length {
                let offset = match r.kind {
                    RangeKind::Seq => r.source.offset + i,
                    RangeKind::Rep | RangeKind::None => r.source.offset,
                };
                let slot = &mut bytes[usize::try_from(r.start + i).unwrap()];
                assert!(slot.is_none(), "byte {} covered twice", r.start + i);
                *slot = Some(SourceByte::new(r.source.ufd, offset));
            }
        }
        bytes
    }

    #[test]
    fn test_empty_attribution_yields_nothing() {
        assert!(classify(&[]).is_empty());
        assert!(classify(&[None, None, None]).is_empty());
    }

    #[test]
    fn test_sequential_copy_is_one_record() {
        let attrs: Vec<_> = (40..45).map(|o| src(1, o)).collect();
        assert_eq!(classify(&attrs), vec![record(RangeKind::Seq, 0, 5, 1, 40)]);
    }

    #[test]
    fn test_repeated_fill_is_one_record() {
        let attrs = vec![src(2, 9); 4096];
        assert_eq!(classify(&attrs), vec![record(RangeKind::Rep, 0, 4096, 2, 9)]);
    }

    #[test]
    fn test_singleton_is_none() {
        assert_eq!(classify(&[src(1, 7)]), vec![record(RangeKind::None, 0, 1, 1, 7)]);
        // Isolated bytes between gaps too
        assert_eq!(
            classify(&[None, src(1, 7), None]),
            vec![record(RangeKind::None, 1, 1, 1, 7)]
        );
    }

    #[test]
    fn test_mode_break_starts_new_run() {
        let attrs = [src(1, 5), src(1, 6), src(1, 7), src(1, 7), src(1, 7)];
        assert_eq!(
            classify(&attrs),
            vec![record(RangeKind::Seq, 0, 3, 1, 5), record(RangeKind::Rep, 3, 2, 1, 7)]
        );
    }

    #[test]
    fn test_backward_copy_is_not_sequential() {
        let attrs = [src(1, 3), src(1, 2), src(1, 1)];
        assert_eq!(
            classify(&attrs),
            vec![
                record(RangeKind::None, 0, 1, 1, 3),
                record(RangeKind::None, 1, 1, 1, 2),
                record(RangeKind::None, 2, 1, 1, 1),
            ]
        );
    }

    #[test]
    fn test_identity_change_closes_run() {
        let attrs = [src(1, 0), src(1, 1), src(2, 2), src(2, 3)];
        assert_eq!(
            classify(&attrs),
            vec![record(RangeKind::Seq, 0, 2, 1, 0), record(RangeKind::Seq, 2, 2, 2, 2)]
        );
    }

    #[test]
    fn test_gap_splits_and_is_omitted() {
        let attrs = [src(1, 0), src(1, 1), None, src(1, 2), src(1, 3)];
        assert_eq!(
            classify(&attrs),
            vec![record(RangeKind::Seq, 0, 2, 1, 0), record(RangeKind::Seq, 3, 2, 1, 2)]
        );
    }

    #[test]
    fn test_pseudo_random_attributions_are_lossless() {
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut attrs = Vec::new();
        let mut offset = 0u64;
        for _ in 0..5000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let ufd = u32::try_from(state % 3).unwrap();
            match (state >> 8) % 4 {
                0 => attrs.push(None),
                1 => attrs.push(src(ufd + 1, offset)),
                2 => {
                    offset += 1;
                    attrs.push(src(ufd + 1, offset));
                }
                _ => {
                    offset = (state >> 16) % 100;
                    attrs.push(src(ufd + 1, offset));
                }
            }
        }

        let records = classify(&attrs);
        let attributed: u64 = attrs.iter().flatten().count() as u64;
        assert_eq!(records.iter().map(|r| r.length).sum::<u64>(), attributed);
        assert!(records.iter().all(|r| r.length >= 1));
        assert!(records.iter().all(|r| r.length > 1 || r.kind == RangeKind::None));
        assert!(records.windows(2).all(|w| w[0].start + w[0].length <= w[1].start));
        assert_eq!(expand(&records, attrs.len()), attrs);
    }

    #[test]
    fn test_source_sets_track_runs_per_identity() {
        let a = |o| SourceByte::new(StableId(1), o);
        let b = |o| SourceByte::new(StableId(2), o);
        let attrs = vec![vec![a(0), b(10)], vec![a(1), b(10)], vec![a(2)], vec![]];
        assert_eq!(
            classify_sets(&attrs),
            vec![record(RangeKind::Seq, 0, 3, 1, 0), record(RangeKind::Rep, 0, 2, 2, 10)]
        );
    }

    #[test]
    fn test_source_sets_reduce_to_single_scan() {
        let single = [src(1, 5), src(1, 6), None, src(2, 1), src(2, 1)];
        let sets: Vec<Vec<SourceByte>> =
            single.iter().map(|s| s.iter().copied().collect()).collect();
        assert_eq!(classify_sets(&sets), classify(&single));
    }
}
