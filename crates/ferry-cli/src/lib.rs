//! # ferry-cli
//!
//! Command-line invoker for ferry cross-account build workflows.
//!
//! ## Commands
//!
//! - `ferry run` - Run one or more job requests to completion
//! - `ferry start` - Start a single remote job and print its handle
//! - `ferry status` - Read the status of a started job
//!
//! ## Configuration
//!
//! The CLI uses environment variables or command-line flags for settings:
//!
//! - `FERRY_REGION` - Default region for targets that do not name one
//! - `FERRY_SIMULATE` - Use the in-memory broker and facility
//! - `FERRY_MAX_ATTEMPTS`, `FERRY_BACKOFF_BASE_SECS`,
//!   `FERRY_BACKOFF_MULTIPLIER`, `FERRY_POLL_INTERVAL_SECS`,
//!   `FERRY_MAX_POLLS`, `FERRY_CREDENTIAL_TTL_SECS` - Workflow policy
//! - `FERRY_LOG_FORMAT` - `pretty` (default) or `json` logs on stderr

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod backend;
pub mod commands;

use clap::{Parser, Subcommand};

/// ferry - cross-account build orchestration.
#[derive(Debug, Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Use the in-memory credential broker and job facility.
    #[arg(long, global = true, env = "FERRY_SIMULATE")]
    pub simulate: bool,

    /// Region applied to targets that do not name one.
    #[arg(long, global = true, env = "FERRY_REGION")]
    pub region: Option<String>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        Config {
            format: self.format.clone(),
            simulate: self.simulate,
            region: self.region.clone(),
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run job requests from a file to completion.
    Run(commands::run::RunArgs),
    /// Start a single remote job.
    Start(commands::start::StartArgs),
    /// Read the status of a started job.
    Status(commands::status::StatusArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// CLI configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Output format.
    pub format: OutputFormat,
    /// Use in-memory backends.
    pub simulate: bool,
    /// Default region.
    pub region: Option<String>,
}
