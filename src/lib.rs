//! Core library entry for the `gangway` build entrypoint.
//!
//! A job specification lists stages of shell commands. The orchestrator
//! splits them into execution units, hands each unit the artifacts its stages
//! require, and publishes what each unit built to a shared object store.

pub mod adapters;
pub mod cancel;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod launcher;
pub mod manifest;
pub mod orchestrator;
pub mod partition;
pub mod ports;
pub mod resolve;
pub mod shuttle;
pub mod spec;
pub mod stage;
pub mod store;
pub mod worker;

pub use error::{Error, Result};

use clap::Parser;

/// Run the CLI with the provided arguments.
///
/// # Errors
///
/// Returns an error string when argument parsing fails or command execution fails.
pub fn run<I, T>(args: I) -> std::result::Result<(), String>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = cli::Cli::try_parse_from(args).map_err(|err| err.to_string())?;
    commands::dispatch(&cli.command, &cli.global)
}
