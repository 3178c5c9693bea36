//! Pre-flight checks for provlog
//!
//! Validates the session setup before any event is recorded.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // getrlimit() requires unsafe

use anyhow::{bail, Result};
use log::warn;
use std::path::Path;

use crate::config::{OutputTarget, TrackerConfig};

/// Run all pre-flight checks before recording starts
///
/// # Errors
/// Returns an error if the configuration cannot produce a usable log.
pub fn run_preflight_checks(config: &TrackerConfig, quiet: bool) -> Result<()> {
    config.validate()?;
    check_output_destination(&config.output)?;
    check_descriptor_limit(config.max_open_files, quiet);
    Ok(())
}

/// Check that the log file can be created where it was asked for
fn check_output_destination(output: &OutputTarget) -> Result<()> {
    let OutputTarget::File(path) = output else {
        return Ok(());
    };

    if path.is_dir() {
        bail!(
            "Output is a directory: {}\n\n\
             PROVLOG_OUTPUT must name a file (or - for stdout).",
            path.display()
        );
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        bail!(
            "Output directory not found: {}\n\n\
             Create it first or point PROVLOG_OUTPUT elsewhere.",
            parent.display()
        );
    }
    Ok(())
}

/// Warn when the process may open descriptors the identity table cannot hold
///
/// Descriptors at or above the bound are fatal when they are tracked.
fn check_descriptor_limit(max_open_files: usize, quiet: bool) {
    let Some(soft_limit) = descriptor_soft_limit() else {
        return;
    };

    let bound = max_open_files as u64;
    if soft_limit > bound && !quiet {
        warn!("RLIMIT_NOFILE ({soft_limit}) exceeds tracked descriptor bound ({bound})");
        eprintln!(
            "warning: process may open descriptors up to {soft_limit}, \
             but only 0..{bound} can be tracked (raise PROVLOG_MAX_FDS)"
        );
    }
}

/// Current soft `RLIMIT_NOFILE`, `None` if unlimited or unavailable
fn descriptor_soft_limit() -> Option<u64> {
    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        return None;
    }
    if limit.rlim_cur == libc::RLIM_INFINITY {
        return None;
    }
    Some(limit.rlim_cur)
}
