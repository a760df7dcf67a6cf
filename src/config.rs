//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.trendwatch.toml` files.

use crate::cli::OutputFormat;
use crate::escalation::policy::default_teams;
use crate::models::Severity;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = ".trendwatch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Trend detection settings.
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Advisory escalation settings.
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Downstream delivery settings.
    #[serde(default)]
    pub sink: SinkConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default report path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Report format.
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            format: OutputFormat::default(),
        }
    }
}

fn default_output() -> String {
    "trendwatch_report.md".to_string()
}

/// Trend detection settings. Fixed for the lifetime of a watcher.
///
/// Integer fields are signed so that negative values reach validation
/// and are reported as configuration errors rather than parse failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Minimum in-window incidents for a category to trend.
    #[serde(default = "default_threshold")]
    pub trend_threshold: i64,

    /// Length of the sliding window.
    #[serde(default = "default_window_minutes")]
    pub time_window_minutes: i64,

    /// Accepted for compatibility; has no effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_incidents_before_escalation: Option<i64>,

    /// Worst in-window severity that marks an escalation as severe.
    #[serde(default = "default_severity_threshold")]
    pub severity_escalation_threshold: Severity,

    /// How far ahead of the clock a signal may be stamped.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: u64,

    /// Poll cycles per window length.
    #[serde(default = "default_polls_per_window")]
    pub polls_per_window: i64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            trend_threshold: default_threshold(),
            time_window_minutes: default_window_minutes(),
            max_incidents_before_escalation: None,
            severity_escalation_threshold: default_severity_threshold(),
            clock_skew_seconds: default_clock_skew(),
            polls_per_window: default_polls_per_window(),
        }
    }
}

fn default_threshold() -> i64 {
    10
}

fn default_window_minutes() -> i64 {
    60
}

fn default_severity_threshold() -> Severity {
    Severity::High
}

fn default_clock_skew() -> u64 {
    30
}

fn default_polls_per_window() -> i64 {
    4
}

/// Advisory escalation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Incidents needed before a burst can be judged.
    #[serde(default = "default_rapid_min_incidents")]
    pub rapid_min_incidents: usize,

    /// Trailing slice of the window that counts as recent.
    #[serde(default = "default_rapid_window_fraction")]
    pub rapid_window_fraction: f64,

    /// Share of incidents that must be recent to flag a burst.
    #[serde(default = "default_rapid_share")]
    pub rapid_share: f64,

    /// More trending categories than this in one cycle is flagged.
    #[serde(default = "default_multiple_trends_above")]
    pub multiple_trends_above: usize,

    /// A count above this multiple of the category's baseline is flagged.
    #[serde(default = "default_abnormal_volume_factor")]
    pub abnormal_volume_factor: f64,

    /// Poll cycles averaged into a category's baseline. 0 turns the check off.
    #[serde(default = "default_baseline_polls")]
    pub baseline_polls: usize,

    /// Team for categories missing from `teams`.
    #[serde(default = "default_team")]
    pub default_team: String,

    /// Category to team routing.
    #[serde(default = "default_teams")]
    pub teams: HashMap<String, String>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            rapid_min_incidents: default_rapid_min_incidents(),
            rapid_window_fraction: default_rapid_window_fraction(),
            rapid_share: default_rapid_share(),
            multiple_trends_above: default_multiple_trends_above(),
            abnormal_volume_factor: default_abnormal_volume_factor(),
            baseline_polls: default_baseline_polls(),
            default_team: default_team(),
            teams: default_teams(),
        }
    }
}

fn default_rapid_min_incidents() -> usize {
    5
}

fn default_rapid_window_fraction() -> f64 {
    0.25
}

fn default_rapid_share() -> f64 {
    0.5
}

fn default_multiple_trends_above() -> usize {
    2
}

fn default_abnormal_volume_factor() -> f64 {
    2.0
}

fn default_baseline_polls() -> usize {
    24
}

fn default_team() -> String {
    "incident_response_team".to_string()
}

/// Where escalation events go besides the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Append events as JSON Lines to this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_file: Option<PathBuf>,

    /// Drop events whose id was already delivered.
    #[serde(default = "default_true")]
    pub dedup: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            events_file: None,
            dedup: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load `.trendwatch.toml` from a directory.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Load `explicit` if given, else `.trendwatch.toml` in `dir`, else defaults.
    ///
    /// A file that exists but cannot be read or parsed is an error, never a
    /// silent fall back to defaults.
    pub fn resolve(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_from_dir(dir)?.unwrap_or_default()),
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were explicitly provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(threshold) = args.threshold {
            self.watcher.trend_threshold = threshold;
        }
        if let Some(minutes) = args.window_minutes {
            self.watcher.time_window_minutes = minutes;
        }
        if let Some(polls) = args.polls_per_window {
            self.watcher.polls_per_window = polls;
        }

        if let Some(ref events_file) = args.events_file {
            self.sink.events_file = Some(events_file.clone());
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(format) = args.format {
            self.general.format = format;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.watcher.trend_threshold, 10);
        assert_eq!(config.watcher.time_window_minutes, 60);
        assert_eq!(config.watcher.severity_escalation_threshold, Severity::High);
        assert!(config.watcher.max_incidents_before_escalation.is_none());
        assert!(config.sink.dedup);
        assert_eq!(config.escalation.abnormal_volume_factor, 2.0);
        assert_eq!(config.escalation.baseline_polls, 24);
        assert_eq!(
            config.escalation.teams.get("payment").map(String::as_str),
            Some("billing_team")
        );
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "escalations.json"
format = "json"

[watcher]
trend_threshold = 25
time_window_minutes = 15
severity_escalation_threshold = "medium"
max_incidents_before_escalation = 50

[escalation]
default_team = "support_oncall"

[escalation.teams]
checkout = "payments_oncall"

[sink]
events_file = "events.jsonl"
dedup = false
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "escalations.json");
        assert_eq!(config.general.format, OutputFormat::Json);
        assert_eq!(config.watcher.trend_threshold, 25);
        assert_eq!(config.watcher.time_window_minutes, 15);
        assert_eq!(config.watcher.polls_per_window, 4);
        assert_eq!(
            config.watcher.severity_escalation_threshold,
            Severity::Medium
        );
        assert_eq!(config.watcher.max_incidents_before_escalation, Some(50));
        assert_eq!(config.escalation.default_team, "support_oncall");
        assert_eq!(config.escalation.teams.len(), 1);
        assert_eq!(config.sink.events_file, Some(PathBuf::from("events.jsonl")));
        assert!(!config.sink.dedup);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[watcher]"));
        assert!(toml_str.contains("trend_threshold = 10"));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.watcher.time_window_minutes, 60);
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from_dir(dir.path()).unwrap().is_none());

        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[watcher]\ntrend_threshold = 3\n",
        )
        .unwrap();
        let config = Config::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(config.watcher.trend_threshold, 3);

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[watcher\n").unwrap();
        assert!(Config::load_from_dir(dir.path()).is_err());
    }

    #[test]
    fn test_resolve_refuses_unparseable_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(None, dir.path()).unwrap();
        assert_eq!(config.watcher.trend_threshold, 10);

        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[watcher]\ntrend_threshold = \"ten\"\n",
        )
        .unwrap();
        let err = Config::resolve(None, dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_resolve_prefers_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[watcher\n").unwrap();

        let explicit = dir.path().join("custom.toml");
        std::fs::write(&explicit, "[watcher]\ntrend_threshold = 7\n").unwrap();
        let config = Config::resolve(Some(&explicit), dir.path()).unwrap();
        assert_eq!(config.watcher.trend_threshold, 7);

        let missing = dir.path().join("missing.toml");
        assert!(Config::resolve(Some(&missing), dir.path()).is_err());
    }
}
