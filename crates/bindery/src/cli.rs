//! Clap derive structures for the `bindery` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// bindery -- poll smart-home vendor APIs and publish device state
#[derive(Debug, Parser)]
#[command(
    name = "bindery",
    version,
    about = "Poll smart-home vendor APIs and publish normalized device state",
    long_about = "Polls devices behind cloud accounts and LAN bridges on independent\n\
        fixed-delay schedules, refreshes credentials as needed, and publishes\n\
        normalized channel values and connectivity status.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "BINDERY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, env = "BINDERY_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll every configured device until interrupted
    Run,

    /// Validate the configuration and print a summary
    Check,

    /// Fetch one device once and print its snapshot as JSON
    Poll(PollArgs),
}

#[derive(Debug, Args)]
pub struct PollArgs {
    /// Device id as configured
    pub device: String,

    /// Single-line JSON
    #[arg(long)]
    pub compact: bool,
}
