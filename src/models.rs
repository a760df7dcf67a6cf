//! Data models for the trend watcher.
//!
//! This module contains the core data structures shared by the watcher,
//! the escalation sinks and the run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Severity level of an issue signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low severity - cosmetic or isolated complaints
    Low,
    /// Medium severity - degraded experience
    Medium,
    /// High severity - customers blocked
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    /// Parses a severity label. Feeds that still label outages as
    /// `critical` are folded into `High`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" | "critical" => Ok(Severity::High),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🔴",
        }
    }
}

/// One customer interaction classified as an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSignal {
    /// Grouping key, e.g. `login-failure`.
    pub category: String,
    /// When the interaction happened.
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    /// Opaque customer identifier.
    pub customer_id: String,
}

impl IssueSignal {
    pub fn new(
        category: impl Into<String>,
        timestamp: DateTime<Utc>,
        severity: Severity,
        customer_id: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            timestamp,
            severity,
            customer_id: customer_id.into(),
        }
    }
}

/// Where a category sits in its trend episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendStatus {
    /// Count below threshold.
    Monitoring,
    /// Count at or above threshold, not yet escalated in this episode.
    Active,
    /// Escalated; stays here until the count falls below threshold.
    Escalated,
}

impl fmt::Display for TrendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendStatus::Monitoring => write!(f, "monitoring"),
            TrendStatus::Active => write!(f, "active"),
            TrendStatus::Escalated => write!(f, "escalated"),
        }
    }
}

/// Derived per-category state as of some instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendState {
    pub category: String,
    /// Signals inside `(now - window, now]`.
    pub count: usize,
    pub status: TrendStatus,
    /// Earliest in-window signal timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    /// Latest in-window signal timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Number of episodes started for this category (0 before the first).
    pub episode: u64,
}

/// Advisory annotation explaining why an escalation deserves attention.
///
/// Reasons never decide whether an event is emitted; the watcher's state
/// machine alone does that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    /// The worst in-window severity reached the configured level.
    SeverityAtOrAbove { level: Severity },
    /// Most in-window incidents arrived in the most recent slice of the window.
    RapidIncrease { recent: usize, total: usize },
    /// Several categories were trending in the same poll cycle.
    MultipleTrends { trending: usize },
    /// The in-window count is well above the category's usual volume.
    AbnormalVolume { count: usize, baseline: f64 },
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationReason::SeverityAtOrAbove { level } => {
                write!(f, "Severity at or above {}", level)
            }
            EscalationReason::RapidIncrease { recent, total } => {
                write!(f, "Rapid increase: {} of {} incidents are recent", recent, total)
            }
            EscalationReason::MultipleTrends { trending } => {
                write!(f, "Multiple trending categories: {}", trending)
            }
            EscalationReason::AbnormalVolume { count, baseline } => {
                write!(f, "Abnormal volume: {} vs baseline {:.1}", count, baseline)
            }
        }
    }
}

/// Emitted once per trend episode when a category escalates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub category: String,
    /// In-window count at escalation time.
    pub count: usize,
    /// Highest severity among in-window signals.
    pub severity: Severity,
    /// Exclusive lower bound of the window.
    pub window_start: DateTime<Utc>,
    /// Inclusive upper bound of the window (the poll instant).
    pub window_end: DateTime<Utc>,
    /// 1-based episode number for the category.
    pub episode: u64,
    /// Distinct customers in the window.
    pub affected_customers: usize,
    pub assigned_team: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<EscalationReason>,
}

impl EscalationEvent {
    /// Stable identity used by consumers to deduplicate redeliveries.
    pub fn id(&self) -> String {
        format!("{}#{}", self.category, self.episode)
    }
}

/// Summary of escalations emitted during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationSummary {
    /// Total number of escalations.
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// Escalations grouped by category.
    pub by_category: HashMap<String, usize>,
}

impl EscalationSummary {
    /// Creates a summary from a list of escalation events.
    pub fn from_events(events: &[EscalationEvent]) -> Self {
        let mut summary = Self {
            total: events.len(),
            ..Self::default()
        };

        for event in events {
            match event.severity {
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
            }

            *summary
                .by_category
                .entry(event.category.clone())
                .or_insert(0) += 1;
        }

        summary
    }
}

/// Metadata about a watcher run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Where the signals came from (file path or `stdin`).
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub trend_threshold: u32,
    pub time_window_minutes: u64,
    pub signals_read: usize,
    pub signals_rejected: usize,
    pub malformed_lines: usize,
    pub poll_cycles: usize,
    pub delivery_failures: usize,
    /// Wall-clock duration of the run in seconds.
    pub duration_seconds: f64,
}

/// The complete run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: ReportMetadata,
    pub summary: EscalationSummary,
    /// Escalations in emission order.
    pub escalations: Vec<EscalationEvent>,
    /// Per-category state at the end of the run.
    pub final_states: Vec<TrendState>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(category: &str, severity: Severity, episode: u64) -> EscalationEvent {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        EscalationEvent {
            category: category.to_string(),
            count: 10,
            severity,
            window_start: end - chrono::Duration::minutes(60),
            window_end: end,
            episode,
            affected_customers: 8,
            assigned_team: "incident_response_team".to_string(),
            reasons: Vec::new(),
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!("HIGH".parse::<Severity>(), Ok(Severity::High));
        assert_eq!("critical".parse::<Severity>(), Ok(Severity::High));
        assert_eq!(" medium ".parse::<Severity>(), Ok(Severity::Medium));
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_event_id_includes_episode() {
        assert_eq!(event("login-failure", Severity::High, 3).id(), "login-failure#3");
    }

    #[test]
    fn test_escalation_summary() {
        let events = vec![
            event("login-failure", Severity::High, 1),
            event("payment", Severity::Medium, 1),
            event("login-failure", Severity::Low, 2),
        ];

        let summary = EscalationSummary::from_events(&events);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.high, 1);
        assert_eq!(summary.medium, 1);
        assert_eq!(summary.low, 1);
        assert_eq!(summary.by_category.get("login-failure"), Some(&2));
        assert_eq!(summary.by_category.get("payment"), Some(&1));
    }

    #[test]
    fn test_reason_serializes_with_kind_tag() {
        let reason = EscalationReason::RapidIncrease { recent: 6, total: 10 };
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("\"kind\":\"rapid_increase\""));
    }

    #[test]
    fn test_abnormal_volume_display() {
        let reason = EscalationReason::AbnormalVolume {
            count: 12,
            baseline: 13.0 / 3.0,
        };
        assert_eq!(reason.to_string(), "Abnormal volume: 12 vs baseline 4.2");
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("\"kind\":\"abnormal_volume\""));
    }
}
