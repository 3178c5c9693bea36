//! Descriptor bookkeeping
//!
//! The three leaf structures the instrumentation layer drives on every
//! open/close/exec/read/write/dup:
//! - Stable descriptor identities (`ufd`s) that are never reused
//! - The set of descriptors considered provenance-relevant
//! - Synthetic offsets for the inherited standard streams

pub mod identity_map;
pub mod stdio;
pub mod watch_set;

// Re-export common types
pub use identity_map::DescriptorIdentityMap;
pub use stdio::{StdStream, StdioCounters};
pub use watch_set::{ExcludePrefixes, WatchAll, WatchPolicy, WatchSet};
