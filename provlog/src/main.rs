//! # provlog - Main Entry Point
//!
//! Supports two operational modes:
//! - **Replay** (`provlog events.jsonl`): Drive the tracker from an event script
//! - **Check** (`--check provlog.out`): Validate an existing provenance log

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use log::{error, info};
use std::fs::File;
use std::io::{self, BufRead, BufReader};

use provlog::check::check_log;
use provlog::cli::Args;
use provlog::domain::{ReplayError, TrackerError};
use provlog::preflight::run_preflight_checks;
use provlog::replay::replay;

// Exit codes (usage errors exit with 2 from clap)
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_IOERR: i32 = 74;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            error!("provenance session failed: {e:#}");
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let tracker_error = err
        .downcast_ref::<ReplayError>()
        .and_then(ReplayError::tracker_error)
        .or_else(|| err.downcast_ref::<TrackerError>());

    if tracker_error.is_some_and(TrackerError::is_stream_failure) {
        EXIT_IOERR
    } else {
        EXIT_ERROR
    }
}

fn open_input(path: &str) -> Result<Box<dyn BufRead>> {
    if path == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).with_context(|| format!("Failed to open event script: {path}"))?;
    Ok(Box::new(BufReader::new(file)))
}

fn run() -> Result<()> {
    let args = Args::parse();

    if let Some(ref log_path) = args.check {
        let file = File::open(log_path)
            .with_context(|| format!("Failed to open log: {}", log_path.display()))?;
        let summary = check_log(BufReader::new(file))?;
        if !args.quiet {
            println!(
                "ok: {} lines, {} opens, {} closes, {} execs, {} write ranges covering {} bytes",
                summary.lines,
                summary.opens,
                summary.closes,
                summary.execs,
                summary.writes,
                summary.derived_bytes
            );
        }
        return Ok(());
    }

    let Some(events) = args.events.as_deref() else {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "an EVENTS script or --check is required")
            .exit();
    };
    let config = args.tracker_config()?;
    run_preflight_checks(&config, args.quiet)?;

    let tracker = config.build_tracker()?;
    let input = open_input(events)?;
    let summary = replay(input, &tracker)?;

    let stats = tracker.stats()?;
    info!("Session finished: {stats}");
    if !args.quiet {
        eprintln!(
            "stats: events={} watched_opens={} {stats}",
            summary.events, summary.watched_opens
        );
    }
    Ok(())
}
