//! Command-line interface schema for mirror.
//!
//! Defines clap structs/enums for the tool selector and global flags.
//! Long-form help text is sourced from `help_text`.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

mod help_text;

/// Explicit logging level for CLI output.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// The tool to run over the manifest and tree(s).
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Tool {
    /// Populate the manifest from SOURCE
    CreateDb,
    /// Compare SOURCE against the manifest
    VerifyDir,
    /// Compare DEST against the manifest; copy missing entries from SOURCE
    MergeDir,
}

/// Directory tree mirroring and verification against a manifest database
#[derive(Parser, Debug)]
#[command(name = "mirror", version, about, long_about = help_text::ROOT_LONG_ABOUT)]
pub struct Cli {
    /// Which tool to run
    #[arg(long, value_enum, value_name = "TOOL")]
    pub tool: Tool,

    /// Path of the manifest database file
    #[arg(long, value_name = "PATH")]
    pub db: PathBuf,

    /// Tree to record (create-db), check (verify-dir), or copy from
    /// (merge-dir)
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Tree to converge toward the manifest (merge-dir only)
    #[arg(value_name = "DEST")]
    pub dest: Option<PathBuf>,

    /// Abort the walk instead of skipping entries that cannot be read
    #[arg(long)]
    pub strict_permissions: bool,

    /// Increase verbosity (-v for info, -vv for debug).
    /// Takes precedence over RUST_LOG.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Set log level explicitly (error, warn, info, debug, trace).
    /// Takes precedence over RUST_LOG.
    #[arg(
        long = "log-level",
        value_enum,
        value_name = "LEVEL",
        conflicts_with = "verbose"
    )]
    pub log_level: Option<LogLevel>,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
