//! Command-line interface module
//!
//! This module provides command-line argument parsing using clap.

pub mod args;

pub use args::Args;
