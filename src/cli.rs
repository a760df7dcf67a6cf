//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// trendwatch - escalate recurring customer issues before they become outages
///
/// Reads classified issue signals (JSON Lines), tracks how often each
/// category occurs within a sliding window and emits one escalation per
/// trend episode.
///
/// Examples:
///   trendwatch --signals fixtures/signals.jsonl
///   trendwatch --signals fixtures/signals.jsonl --threshold 3 --window-minutes 15
///   tail -f signals.jsonl | trendwatch --signals - --live --events-file escalations.jsonl
///   trendwatch --signals fixtures/signals.jsonl --dry-run
///   trendwatch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Signal feed to read, or `-` for standard input
    #[arg(short, long, value_name = "FILE", required_unless_present = "init_config")]
    pub signals: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .trendwatch.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output file path for the run report
    ///
    /// Default: from config or trendwatch_report.md
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Incidents within one window that make a category trend
    #[arg(short, long, value_name = "COUNT", env = "TRENDWATCH_THRESHOLD")]
    pub threshold: Option<i64>,

    /// Length of the sliding window in minutes
    #[arg(short, long, value_name = "MINUTES", env = "TRENDWATCH_WINDOW_MINUTES")]
    pub window_minutes: Option<i64>,

    /// Poll cycles per window length
    #[arg(long, value_name = "COUNT")]
    pub polls_per_window: Option<i64>,

    /// Append every escalation as one JSON line to this file
    #[arg(short, long, value_name = "FILE")]
    pub events_file: Option<PathBuf>,

    /// Treat the feed as live: use the system clock and poll on a timer
    /// until Ctrl-C
    ///
    /// Without this flag the feed is replayed on a clock that follows the
    /// signal timestamps.
    #[arg(long)]
    pub live: bool,

    /// Validate configuration and feed without running the watcher
    #[arg(long, conflicts_with = "live")]
    pub dry_run: bool,

    /// Generate a default .trendwatch.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Exit with code 2 if any escalation was emitted
    ///
    /// Useful for CI pipelines replaying a recorded feed.
    #[arg(long)]
    pub fail_on_escalation: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    ///
    /// Numeric watcher settings are checked later, once merged with the
    /// config file, so that bad values from either place are reported the
    /// same way.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        let signals = match self.signals {
            Some(ref path) => path,
            None => return Err("A signal feed is required (--signals FILE or -)".to_string()),
        };

        if !crate::source::is_stdin(signals) && !signals.is_file() {
            return Err(format!(
                "Signal feed does not exist: {}",
                signals.display()
            ));
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref events_file) = self.events_file {
            if events_file.is_dir() {
                return Err(format!(
                    "Events file is a directory: {}",
                    events_file.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
