//! # Descriptor Identity Map
//!
//! Maps program descriptors (as used by the program) to stable ids.
//!
//! Raw descriptor numbers are unsuitable as taint marks: the kernel hands a
//! closed descriptor's number to the next `open` moments later, which would
//! eventually attribute data to the wrong file. Stable ids come from a
//! per-process counter that only ever moves forward.
//!
//! ## Lifecycle
//!
//! ```text
//! identity_of(3) ──▶ slot[3] empty? ──yes──▶ slot[3] = next++ ──▶ ufdN
//!                                   └─no──▶ slot[3]            ──▶ ufdN
//! release(3)     ──▶ take(slot[3])                             ──▶ ufdN or ufd0
//! ```
//!
//! The slot table is bounded; descriptor numbers outside it are an error,
//! never silently dropped.

use log::debug;
use provlog_common::{StableId, MAX_OPEN_FILES};

use crate::domain::TrackerError;

/// Bounded table from raw descriptor numbers to stable ids
#[derive(Debug)]
pub struct DescriptorIdentityMap {
    slots: Box<[StableId]>,
    next: u32,
}

impl Default for DescriptorIdentityMap {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorIdentityMap {
    /// Create a map covering descriptors `0..MAX_OPEN_FILES`
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_OPEN_FILES)
    }

    /// Create a map covering descriptors `0..max_open_files`
    #[must_use]
    pub fn with_capacity(max_open_files: usize) -> Self {
        Self { slots: vec![StableId::UNASSIGNED; max_open_files].into_boxed_slice(), next: 1 }
    }

    /// Upper bound (exclusive) on tracked descriptor numbers
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of identities issued so far
    #[must_use]
    pub fn issued(&self) -> u32 {
        self.next - 1
    }

    /// Stable id for `fd`, allocating the next one on first use
    ///
    /// Never returns [`StableId::UNASSIGNED`].
    ///
    /// # Errors
    /// - `DescriptorOutOfRange` if `fd` is negative or beyond the table
    /// - `IdentitiesExhausted` if the counter cannot advance
    pub fn identity_of(&mut self, fd: i32) -> Result<StableId, TrackerError> {
        let index = self.slot_index(fd)?;
        let current = self.slots[index];
        if current.is_assigned() {
            return Ok(current);
        }

        let following =
            self.next.checked_add(1).ok_or(TrackerError::IdentitiesExhausted(self.issued()))?;
        let ufd = StableId(self.next);
        self.next = following;
        self.slots[index] = ufd;

        debug!("fd {fd} bound to {ufd}");
        Ok(ufd)
    }

    /// Stable id currently bound to `fd`, without allocating
    ///
    /// # Errors
    /// Returns `DescriptorOutOfRange` if `fd` is outside the table.
    pub fn peek(&self, fd: i32) -> Result<StableId, TrackerError> {
        self.slot_index(fd).map(|index| self.slots[index])
    }

    /// Fail unless `fd` has a slot in the table
    ///
    /// # Errors
    /// Returns `DescriptorOutOfRange` if `fd` is outside the table.
    pub fn check(&self, fd: i32) -> Result<(), TrackerError> {
        self.slot_index(fd).map(|_| ())
    }

    /// Unbind `fd`, returning the id it held
    ///
    /// Returns [`StableId::UNASSIGNED`] when the descriptor was never looked
    /// up. The counter is untouched: a released id is never issued again.
    ///
    /// # Errors
    /// Returns `DescriptorOutOfRange` if `fd` is outside the table.
    pub fn release(&mut self, fd: i32) -> Result<StableId, TrackerError> {
        let index = self.slot_index(fd)?;
        let ufd = std::mem::take(&mut self.slots[index]);
        debug!("fd {fd} released ({ufd})");
        Ok(ufd)
    }

    fn slot_index(&self, fd: i32) -> Result<usize, TrackerError> {
        usize::try_from(fd)
            .ok()
            .filter(|&index| index < self.slots.len())
            .ok_or(TrackerError::DescriptorOutOfRange { fd, max: self.slots.len() })
    }
}
