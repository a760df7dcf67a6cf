//! Upstream signal feeds.
//!
//! Signals arrive as JSON Lines, one record per line:
//!
//! ```text
//! {"category": "login-failure", "timestamp": "2024-05-01T12:00:00Z", "severity": "high", "customer_id": "c-42"}
//! ```
//!
//! `issue_type` is accepted in place of `category`, and numeric customer
//! ids are kept as their decimal text. Blank lines are skipped; a bad line,
//! including one that is not valid UTF-8, yields an error for that line and
//! the feed carries on.

use crate::error::SourceError;
use crate::models::{IssueSignal, Severity};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Path value meaning "read from standard input".
pub const STDIN_PATH: &str = "-";

#[derive(Debug, Deserialize)]
struct SignalRecord {
    #[serde(alias = "issue_type")]
    category: String,
    timestamp: DateTime<Utc>,
    severity: String,
    customer_id: Value,
}

/// Decode one raw feed line. Invalid UTF-8 spoils that line only.
pub fn decode_line(bytes: Vec<u8>, line_no: usize) -> Result<String, SourceError> {
    String::from_utf8(bytes).map_err(|e| SourceError::Malformed {
        line: line_no,
        reason: format!("invalid UTF-8: {}", e.utf8_error()),
    })
}

/// Parse one feed line. Returns `Ok(None)` for blank lines.
///
/// Only the record's shape is checked here; semantic checks such as an
/// empty category belong to the watcher.
pub fn parse_signal_line(line: &str, line_no: usize) -> Result<Option<IssueSignal>, SourceError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let malformed = |reason: String| SourceError::Malformed {
        line: line_no,
        reason,
    };

    let record: SignalRecord = serde_json::from_str(line).map_err(|e| malformed(e.to_string()))?;
    let severity: Severity = record.severity.parse().map_err(malformed)?;
    let customer_id = match record.customer_id {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        other => return Err(malformed(format!("unsupported customer_id: {}", other))),
    };

    Ok(Some(IssueSignal::new(
        record.category,
        record.timestamp,
        severity,
        customer_id,
    )))
}

/// Lazy signal iterator over any buffered reader.
///
/// Yields `(line_number, signal)` pairs so callers can report where a
/// rejected signal came from.
pub struct JsonLinesSource<R> {
    lines: std::io::Split<R>,
    line_no: usize,
    failed: bool,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.split(b'\n'),
            line_no: 0,
            failed: false,
        }
    }
}

impl<R: BufRead> Iterator for JsonLinesSource<R> {
    type Item = Result<(usize, IssueSignal), SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(SourceError::Io(e)));
                }
            };
            self.line_no += 1;

            let parsed = decode_line(line, self.line_no)
                .and_then(|line| parse_signal_line(&line, self.line_no));
            match parsed {
                Ok(Some(signal)) => return Some(Ok((self.line_no, signal))),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Open a feed file, or standard input for `-`.
pub fn open(path: &Path) -> Result<JsonLinesSource<Box<dyn BufRead>>> {
    let reader: Box<dyn BufRead> = if is_stdin(path) {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = File::open(path)
            .with_context(|| format!("Failed to open signal feed: {}", path.display()))?;
        Box::new(BufReader::new(file))
    };
    Ok(JsonLinesSource::new(reader))
}

pub fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == STDIN_PATH
}

/// Human-readable name of a feed for reports.
pub fn describe(path: &Path) -> String {
    if is_stdin(path) {
        "stdin".to_string()
    } else {
        path.display().to_string()
    }
}
