//! # provlog - Byte-Level Data Provenance Recorder
//!
//! provlog records, from inside an instrumented process, which bytes the
//! process read from which sources, which files it created, truncated or
//! updated, and which output byte ranges were derived from which input byte
//! ranges. The resulting log is consumed offline to build a provenance graph
//! (entities with "used", "generated" and "derived" relations).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                Binary Instrumentation (external)                │
//! │      open / close / dup / exec / read / write interception      │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ on_open, on_write, ...
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        provlog (This Crate)                     │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Tracking   │──▶│    Ranges    │──▶│     Emit     │──▶ log  │
//! │  │ (fd → ufd)   │   │ (classifier) │   │ (line codec) │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │         ▲                  ▲                                    │
//! │         └──── Tracker (one lock, process-wide state) ──┘        │
//! └─────────────────────────────────────────────────────────────────┘
//!                         ▲
//!                         │ per-byte source attributions
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Taint Propagation Engine (external)            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`tracking`]: Stable descriptor identities, watched set, stdio offsets
//! - [`ranges`]: Per-byte attributions → minimal typed range records
//! - [`emit`]: Serialization of events into the line-oriented log
//! - [`tracker`]: The owned, lock-protected context the instrumentation calls
//! - [`config`]: Environment-driven session configuration
//! - [`process_lookup`]: Executable name and pid from `/proc`
//! - [`preflight`]: Checks run before recording starts
//! - [`replay`]: JSON-lines event scripts standing in for the instrumentation layer
//! - [`check`]: Validation of an existing log against the shared grammar
//! - [`cli`]: Command-line argument parsing
//! - [`domain`]: Core domain types and errors
//!
//! ## Key Concepts
//!
//! - **ufd**: Stable descriptor identity. Raw descriptor numbers are recycled
//!   by the kernel, so they cannot serve as taint marks; ufds never are.
//! - **SEQ / REP / NONE**: A destination run copied forward from a source
//!   run, filled from one source byte, or a single byte.
//! - **Stream failure is fatal**: the log is an ordered sequence of facts;
//!   after a failed write nothing further is recorded.

pub mod check;
pub mod cli;
pub mod config;
pub mod domain;
pub mod emit;
pub mod preflight;
pub mod process_lookup;
pub mod ranges;
pub mod replay;
pub mod tracker;
pub mod tracking;

pub use tracker::Tracker;
