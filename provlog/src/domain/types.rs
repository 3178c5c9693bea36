//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep OS-level integers (process ids, open flags)
//! from being confused with stable identities or offsets.

use std::fmt;

/// Process ID
///
/// Represents a process ID in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<i32> for Pid {
    #[allow(clippy::cast_sign_loss)]
    fn from(pid: i32) -> Self {
        Pid(pid as u32)
    }
}

/// Flags passed to `open(2)`
///
/// Only the access mode and `O_TRUNC` matter for provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(pub i32);

impl OpenFlags {
    pub const RDONLY: Self = Self(libc::O_RDONLY);
    pub const WRONLY: Self = Self(libc::O_WRONLY);
    pub const RDWR: Self = Self(libc::O_RDWR);
    pub const CREAT: Self = Self(libc::O_CREAT);
    pub const TRUNC: Self = Self(libc::O_TRUNC);

    /// Unless `O_WRONLY` is set the descriptor can be read
    #[must_use]
    pub fn is_write_only(self) -> bool {
        self.0 & libc::O_WRONLY != 0
    }

    #[must_use]
    pub fn is_writable(self) -> bool {
        self.0 & (libc::O_WRONLY | libc::O_RDWR) != 0
    }

    #[must_use]
    pub fn truncates(self) -> bool {
        self.0 & libc::O_TRUNC != 0
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
