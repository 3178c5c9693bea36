//! Offset counters for the inherited standard streams
//!
//! stdin/stdout/stderr never go through the tracked `open` path and are
//! usually not seekable, so their byte positions are counted here instead.

use provlog_common::{STDERR_FILENO, STDFD_MAX, STDIN_FILENO, STDOUT_FILENO};

/// One of the three inherited standard streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

impl StdStream {
    pub const ALL: [StdStream; STDFD_MAX] = [StdStream::Stdin, StdStream::Stdout, StdStream::Stderr];

    /// Map a raw descriptor to its standard stream, if it is one
    #[must_use]
    pub fn from_fd(fd: i32) -> Option<Self> {
        match fd {
            STDIN_FILENO => Some(StdStream::Stdin),
            STDOUT_FILENO => Some(StdStream::Stdout),
            STDERR_FILENO => Some(StdStream::Stderr),
            _ => None,
        }
    }

    #[must_use]
    pub fn fd(self) -> i32 {
        match self {
            StdStream::Stdin => STDIN_FILENO,
            StdStream::Stdout => STDOUT_FILENO,
            StdStream::Stderr => STDERR_FILENO,
        }
    }

    fn index(self) -> usize {
        match self {
            StdStream::Stdin => 0,
            StdStream::Stdout => 1,
            StdStream::Stderr => 2,
        }
    }
}

/// Running byte offset per standard stream, zero at process start
#[derive(Debug, Default, Clone)]
pub struct StdioCounters {
    offsets: [u64; STDFD_MAX],
}

impl StdioCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` bytes and return the offset the transfer started at
    pub fn advance(&mut self, stream: StdStream, n: u64) -> u64 {
        let slot = &mut self.offsets[stream.index()];
        let start = *slot;
        *slot = start.saturating_add(n);
        start
    }

    #[must_use]
    pub fn position(&self, stream: StdStream) -> u64 {
        self.offsets[stream.index()]
    }

    pub fn reset(&mut self) {
        self.offsets = [0; STDFD_MAX];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_returns_old_offset() {
        let mut counters = StdioCounters::new();
        assert_eq!(counters.advance(StdStream::Stdout, 10), 0);
        assert_eq!(counters.advance(StdStream::Stdout, 5), 10);
        assert_eq!(counters.position(StdStream::Stdout), 15);
        // Streams are independent
        assert_eq!(counters.position(StdStream::Stdin), 0);
        assert_eq!(counters.advance(StdStream::Stderr, 0), 0);
    }

    #[test]
    fn test_reset() {
        let mut counters = StdioCounters::new();
        counters.advance(StdStream::Stdin, 64);
        counters.reset();
        assert_eq!(counters.position(StdStream::Stdin), 0);
    }

    #[test]
    fn test_from_fd_roundtrip() {
        for stream in StdStream::ALL {
            assert_eq!(StdStream::from_fd(stream.fd()), Some(stream));
        }
        assert_eq!(StdStream::from_fd(3), None);
    }
}
