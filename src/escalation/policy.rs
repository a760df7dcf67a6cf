//! Advisory escalation assessment.
//!
//! The policy annotates events that the watcher has already decided to
//! emit: which warning signs are present and which team should pick the
//! escalation up. It never suppresses or creates an event.

use crate::config::EscalationConfig;
use crate::error::ConfigurationError;
use crate::models::{EscalationReason, Severity};
use crate::watcher::TrendWindow;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Thresholds for the advisory reasons attached to escalation events.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    pub severity_threshold: Severity,
    pub rapid_min_incidents: usize,
    pub rapid_window_fraction: f64,
    pub rapid_share: f64,
    pub multiple_trends_above: usize,
    pub abnormal_volume_factor: f64,
    pub baseline_polls: usize,
    pub default_team: String,
    pub teams: HashMap<String, String>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            severity_threshold: Severity::High,
            rapid_min_incidents: 5,
            rapid_window_fraction: 0.25,
            rapid_share: 0.5,
            multiple_trends_above: 2,
            abnormal_volume_factor: 2.0,
            baseline_polls: 24,
            default_team: "incident_response_team".to_string(),
            teams: default_teams(),
        }
    }
}

/// Category to team routing used when no table is configured.
pub fn default_teams() -> HashMap<String, String> {
    [
        ("authentication", "identity_team"),
        ("payment", "billing_team"),
        ("database", "infrastructure_team"),
        ("api", "platform_team"),
        ("notification", "communication_team"),
    ]
    .into_iter()
    .map(|(category, team)| (category.to_string(), team.to_string()))
    .collect()
}

impl EscalationPolicy {
    /// Build a policy from the `[escalation]` table and the watcher's severity threshold.
    pub fn from_config(
        config: &EscalationConfig,
        severity_threshold: Severity,
    ) -> Result<Self, ConfigurationError> {
        check_fraction("rapid_window_fraction", config.rapid_window_fraction)?;
        check_fraction("rapid_share", config.rapid_share)?;
        if !(config.abnormal_volume_factor.is_finite() && config.abnormal_volume_factor > 0.0) {
            return Err(ConfigurationError::NonPositiveFactor {
                name: "abnormal_volume_factor",
                value: config.abnormal_volume_factor,
            });
        }

        Ok(Self {
            severity_threshold,
            rapid_min_incidents: config.rapid_min_incidents,
            rapid_window_fraction: config.rapid_window_fraction,
            rapid_share: config.rapid_share,
            multiple_trends_above: config.multiple_trends_above,
            abnormal_volume_factor: config.abnormal_volume_factor,
            baseline_polls: config.baseline_polls,
            default_team: config.default_team.clone(),
            teams: config.teams.clone(),
        })
    }

    /// Reasons that can be judged from one category's window.
    pub fn assess(&self, window: &TrendWindow, now: DateTime<Utc>) -> Vec<EscalationReason> {
        let mut reasons = Vec::new();

        if let Some(worst) = window.max_severity(now) {
            if worst >= self.severity_threshold {
                reasons.push(EscalationReason::SeverityAtOrAbove {
                    level: self.severity_threshold,
                });
            }
        }

        let total = window.count(now);
        if total >= self.rapid_min_incidents && total > 0 {
            let recent_span = scale(window.span(), self.rapid_window_fraction);
            let recent = window.recent_count(now, recent_span);
            if recent as f64 >= total as f64 * self.rapid_share {
                reasons.push(EscalationReason::RapidIncrease { recent, total });
            }
        }

        reasons
    }

    /// Flags a count above `abnormal_volume_factor` times the category's
    /// baseline. No baseline, no verdict.
    pub fn assess_volume(&self, count: usize, baseline: Option<f64>) -> Option<EscalationReason> {
        let baseline = baseline?;
        (count as f64 > baseline * self.abnormal_volume_factor)
            .then_some(EscalationReason::AbnormalVolume { count, baseline })
    }

    /// Reason shared by every event of a cycle with many trending categories.
    pub fn assess_cycle(&self, trending: usize) -> Option<EscalationReason> {
        (trending > self.multiple_trends_above)
            .then_some(EscalationReason::MultipleTrends { trending })
    }

    pub fn team_for(&self, category: &str) -> String {
        self.teams
            .get(category)
            .cloned()
            .unwrap_or_else(|| self.default_team.clone())
    }
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidFraction { name, value })
    }
}

fn scale(span: Duration, fraction: f64) -> Duration {
    Duration::milliseconds((span.num_milliseconds() as f64 * fraction).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IssueSignal;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn window_with(minutes_ago: &[i64], severity: Severity) -> TrendWindow {
        let mut window = TrendWindow::new(Duration::minutes(60));
        for (i, m) in minutes_ago.iter().enumerate() {
            window.insert(&IssueSignal::new(
                "payment",
                now() - Duration::minutes(*m),
                severity,
                format!("cust-{}", i),
            ));
        }
        window
    }

    #[test]
    fn test_severity_reason() {
        let policy = EscalationPolicy::default();

        let high = window_with(&[30], Severity::High);
        assert_eq!(
            policy.assess(&high, now()),
            vec![EscalationReason::SeverityAtOrAbove {
                level: Severity::High
            }]
        );

        let low = window_with(&[30], Severity::Low);
        assert!(policy.assess(&low, now()).is_empty());
    }

    #[test]
    fn test_rapid_increase() {
        let policy = EscalationPolicy::default();

        // 3 of 6 inside the last 15 minutes.
        let bursty = window_with(&[55, 50, 45, 10, 5, 1], Severity::Low);
        assert_eq!(
            policy.assess(&bursty, now()),
            vec![EscalationReason::RapidIncrease { recent: 3, total: 6 }]
        );

        let steady = window_with(&[55, 50, 45, 40, 35, 1], Severity::Low);
        assert!(policy.assess(&steady, now()).is_empty());

        // Too few incidents to judge.
        let small = window_with(&[2, 1], Severity::Low);
        assert!(policy.assess(&small, now()).is_empty());
    }

    #[test]
    fn test_multiple_trends() {
        let policy = EscalationPolicy::default();
        assert_eq!(policy.assess_cycle(2), None);
        assert_eq!(
            policy.assess_cycle(3),
            Some(EscalationReason::MultipleTrends { trending: 3 })
        );
    }

    #[test]
    fn test_abnormal_volume() {
        let policy = EscalationPolicy::default();

        assert_eq!(
            policy.assess_volume(12, Some(4.0)),
            Some(EscalationReason::AbnormalVolume {
                count: 12,
                baseline: 4.0
            })
        );
        // Exactly twice the baseline is not abnormal.
        assert_eq!(policy.assess_volume(8, Some(4.0)), None);
        assert_eq!(policy.assess_volume(12, None), None);
        // A quiet category that suddenly trends is abnormal.
        assert!(policy.assess_volume(3, Some(0.0)).is_some());
    }

    #[test]
    fn test_from_config_rejects_bad_volume_factor() {
        for value in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = EscalationConfig {
                abnormal_volume_factor: value,
                ..EscalationConfig::default()
            };
            let err = EscalationPolicy::from_config(&config, Severity::High).unwrap_err();
            assert!(matches!(
                err,
                ConfigurationError::NonPositiveFactor {
                    name: "abnormal_volume_factor",
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_team_routing() {
        let policy = EscalationPolicy::default();
        assert_eq!(policy.team_for("payment"), "billing_team");
        assert_eq!(policy.team_for("login-failure"), "incident_response_team");
    }

    #[test]
    fn test_from_config_rejects_bad_fraction() {
        let config = EscalationConfig {
            rapid_share: 1.5,
            ..EscalationConfig::default()
        };
        let err = EscalationPolicy::from_config(&config, Severity::High).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidFraction {
                name: "rapid_share",
                ..
            }
        ));
    }
}
