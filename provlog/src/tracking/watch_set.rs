//! Watched descriptor set and the policy that fills it
//!
//! The instrumentation layer consults [`WatchSet::contains`] before calling
//! any other component, so nothing downstream re-checks relevance.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::domain::OpenFlags;

/// Raw descriptor numbers currently considered provenance-relevant
#[derive(Debug, Default)]
pub struct WatchSet {
    fds: BTreeSet<i32>,
}

impl WatchSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `fd` was not already watched
    pub fn add(&mut self, fd: i32) -> bool {
        self.fds.insert(fd)
    }

    /// Returns true if `fd` was watched
    pub fn remove(&mut self, fd: i32) -> bool {
        self.fds.remove(&fd)
    }

    #[must_use]
    pub fn contains(&self, fd: i32) -> bool {
        self.fds.contains(&fd)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Watched descriptors in ascending order
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.fds.iter().copied()
    }
}

/// Decides at open time whether a descriptor is provenance-relevant
pub trait WatchPolicy: Send + Sync {
    fn is_relevant(&self, path: &str, flags: OpenFlags) -> bool;
}

/// Watch every opened path
#[derive(Debug, Default, Clone, Copy)]
pub struct WatchAll;

impl WatchPolicy for WatchAll {
    fn is_relevant(&self, _path: &str, _flags: OpenFlags) -> bool {
        true
    }
}

/// Watch everything except paths under the given directories
///
/// Matching is by path component, so `/dev` excludes `/dev/null` but not
/// `/devices.txt`.
#[derive(Debug, Default, Clone)]
pub struct ExcludePrefixes {
    prefixes: Vec<PathBuf>,
}

impl ExcludePrefixes {
    #[must_use]
    pub fn new(prefixes: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self { prefixes: prefixes.into_iter().map(Into::into).collect() }
    }

    #[must_use]
    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }
}

impl WatchPolicy for ExcludePrefixes {
    fn is_relevant(&self, path: &str, _flags: OpenFlags) -> bool {
        let path = std::path::Path::new(path);
        !self.prefixes.iter().any(|prefix| path.starts_with(prefix))
    }
}
