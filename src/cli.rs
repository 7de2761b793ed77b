mod help_text;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// File state tracker with change detection and integrity proofs
#[derive(Parser, Debug)]
#[command(name = "treeproof", version, about, long_about = help_text::ROOT_LONG_ABOUT)]
pub struct Cli {
    /// Change to DIRECTORY before doing anything
    #[arg(short = 'C', value_name = "DIRECTORY", global = true)]
    pub directory: Option<PathBuf>,

    /// Increase logging verbosity (-v info, -vv debug). Takes precedence over RUST_LOG.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Set the log level explicitly. Takes precedence over RUST_LOG.
    #[arg(long, value_name = "LEVEL", global = true, conflicts_with = "verbose")]
    pub log_level: Option<LogLevel>,

    /// Read configuration from FILE instead of .treeproof/config.toml
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Detector id whose state to use (overrides the configuration)
    #[arg(long, value_name = "ID", global = true)]
    pub detector: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show files added, modified or deleted since the last update
    #[command(long_about = help_text::STATUS_LONG_ABOUT)]
    Status {
        /// Show size, time and hash details for modified and deleted files
        #[arg(long)]
        diff: bool,
    },

    /// Record the current state as the baseline for the next status
    #[command(long_about = help_text::UPDATE_LONG_ABOUT)]
    Update {
        /// Only proceed if changes match this fingerprint from status
        #[arg(long, value_name = "FINGERPRINT")]
        fingerprint: Option<String>,

        /// Show the changes without writing state
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a proof document describing the current state
    #[command(long_about = help_text::PROVE_LONG_ABOUT)]
    Prove {
        /// Write the proof to FILE instead of standard output
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Project label recorded in the proof (default: directory name)
        #[arg(long, value_name = "LABEL")]
        label: Option<String>,
    },

    /// Check the current state against a proof document
    #[command(long_about = help_text::VERIFY_LONG_ABOUT)]
    Verify {
        /// Proof document to verify against
        #[arg(value_name = "PROOF")]
        proof: PathBuf,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
