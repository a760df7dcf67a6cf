//! Error types for the trend watcher.
//!
//! Signal validation failures are local and recoverable: the caller logs
//! and drops the signal. Configuration failures are fatal at construction.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A signal that cannot be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidSignalError {
    /// The category key is empty or whitespace.
    #[error("signal category is empty")]
    EmptyCategory,

    /// The timestamp lies further in the future than the clock-skew tolerance allows.
    #[error("signal timestamp {timestamp} is ahead of {now} by more than {tolerance_secs}s")]
    FutureTimestamp {
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
        tolerance_secs: i64,
    },
}

/// Watcher settings that must not be used to start a watcher.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("trend_threshold must be a positive integer")]
    NonPositiveThreshold,

    #[error("time_window_minutes must be positive")]
    NonPositiveWindow,

    #[error("time_window_minutes must not exceed {max_minutes}")]
    WindowTooLarge { max_minutes: i64 },

    #[error("clock_skew_seconds must not exceed {max_seconds}")]
    ClockSkewTooLarge { max_seconds: i64 },

    #[error("max_incidents_before_escalation must be positive when set")]
    NonPositiveMaxIncidents,

    #[error("polls_per_window must be at least 1")]
    NonPositivePollRate,

    /// The poll interval (window / polls_per_window) would be shorter than a second.
    #[error("polls_per_window of {polls} gives a poll interval under one second")]
    PollIntervalTooShort { polls: i64 },

    #[error("{name} must be within (0.0, 1.0], got {value}")]
    InvalidFraction { name: &'static str, value: f64 },

    #[error("{name} must be a positive finite number, got {value}")]
    NonPositiveFactor { name: &'static str, value: f64 },
}

/// A record from the upstream feed that could not become a signal.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The line is not a well-formed signal record.
    #[error("line {line}: malformed record: {reason}")]
    Malformed { line: usize, reason: String },

    /// The line parsed but the signal failed validation.
    #[error("line {line}: {source}")]
    Invalid {
        line: usize,
        #[source]
        source: InvalidSignalError,
    },

    #[error("failed to read signal feed: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_signal_messages() {
        assert_eq!(
            InvalidSignalError::EmptyCategory.to_string(),
            "signal category is empty"
        );

        let now = Utc::now();
        let err = InvalidSignalError::FutureTimestamp {
            timestamp: now + chrono::Duration::minutes(5),
            now,
            tolerance_secs: 30,
        };
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_source_error_keeps_line_number() {
        let err = SourceError::Invalid {
            line: 7,
            source: InvalidSignalError::EmptyCategory,
        };
        assert!(err.to_string().starts_with("line 7:"));
    }
}
