//! Escalation aggregation and statistics.
//!
//! This module provides utilities for grouping the escalations of a run
//! and picking out the categories that need attention first.

use crate::models::{EscalationEvent, EscalationSummary, Severity, TrendState, TrendStatus};
use std::collections::HashMap;

/// Sort events by severity (high first), then by incident count.
pub fn sort_by_severity(events: &mut [EscalationEvent]) {
    events.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.count.cmp(&a.count))
    });
}

/// Group events by category, each group in episode order.
pub fn group_by_category(events: &[EscalationEvent]) -> HashMap<String, Vec<EscalationEvent>> {
    let mut grouped: HashMap<String, Vec<EscalationEvent>> = HashMap::new();

    for event in events {
        grouped
            .entry(event.category.clone())
            .or_default()
            .push(event.clone());
    }

    for events in grouped.values_mut() {
        events.sort_by_key(|e| e.episode);
    }

    grouped
}

/// Group events by the team they were routed to.
pub fn group_by_team(events: &[EscalationEvent]) -> HashMap<String, usize> {
    let mut grouped: HashMap<String, usize> = HashMap::new();

    for event in events {
        *grouped.entry(event.assigned_team.clone()).or_default() += 1;
    }

    grouped
}

/// The `n` categories with the most escalations, ties broken by name.
pub fn most_escalated_categories(summary: &EscalationSummary, n: usize) -> Vec<(String, usize)> {
    let mut categories: Vec<_> = summary
        .by_category
        .iter()
        .map(|(category, count)| (category.clone(), *count))
        .collect();

    categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    categories.truncate(n);
    categories
}

/// Categories still trending when the run ended.
pub fn open_trends(states: &[TrendState]) -> Vec<&TrendState> {
    states
        .iter()
        .filter(|s| s.status != TrendStatus::Monitoring)
        .collect()
}

/// Generate a text summary of escalation statistics.
pub fn generate_summary_text(summary: &EscalationSummary) -> String {
    let mut lines = Vec::new();

    lines.push(format!("Total Escalations: {}", summary.total));
    lines.push(format!(
        "- {} High: {}",
        Severity::High.emoji(),
        summary.high
    ));
    lines.push(format!(
        "- {} Medium: {}",
        Severity::Medium.emoji(),
        summary.medium
    ));
    lines.push(format!("- {} Low: {}", Severity::Low.emoji(), summary.low));

    if !summary.by_category.is_empty() {
        lines.push(String::new());
        lines.push("By Category:".to_string());

        for (category, count) in most_escalated_categories(summary, usize::MAX) {
            lines.push(format!("- {}: {}", category, count));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn create_test_event(category: &str, severity: Severity, count: usize, episode: u64) -> EscalationEvent {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        EscalationEvent {
            category: category.to_string(),
            count,
            severity,
            window_start: end - Duration::minutes(60),
            window_end: end,
            episode,
            affected_customers: count,
            assigned_team: format!("{}_team", category),
            reasons: Vec::new(),
        }
    }

    #[test]
    fn test_sort_by_severity() {
        let mut events = vec![
            create_test_event("api", Severity::Low, 40, 1),
            create_test_event("payment", Severity::High, 10, 1),
            create_test_event("database", Severity::High, 25, 1),
            create_test_event("notification", Severity::Medium, 12, 1),
        ];

        sort_by_severity(&mut events);

        assert_eq!(events[0].category, "database");
        assert_eq!(events[1].category, "payment");
        assert_eq!(events[2].severity, Severity::Medium);
        assert_eq!(events[3].severity, Severity::Low);
    }

    #[test]
    fn test_group_by_category_orders_episodes() {
        let events = vec![
            create_test_event("payment", Severity::High, 10, 2),
            create_test_event("api", Severity::Low, 10, 1),
            create_test_event("payment", Severity::Medium, 10, 1),
        ];

        let grouped = group_by_category(&events);

        let payment = &grouped["payment"];
        assert_eq!(payment.len(), 2);
        assert_eq!(payment[0].episode, 1);
        assert_eq!(payment[1].episode, 2);
        assert_eq!(grouped.get("api").map(|v| v.len()), Some(1));
    }

    #[test]
    fn test_group_by_team() {
        let events = vec![
            create_test_event("payment", Severity::High, 10, 1),
            create_test_event("payment", Severity::High, 10, 2),
            create_test_event("api", Severity::Low, 10, 1),
        ];

        let teams = group_by_team(&events);
        assert_eq!(teams.get("payment_team"), Some(&2));
        assert_eq!(teams.get("api_team"), Some(&1));
    }

    #[test]
    fn test_most_escalated_categories() {
        let events = vec![
            create_test_event("payment", Severity::High, 10, 1),
            create_test_event("payment", Severity::High, 10, 2),
            create_test_event("database", Severity::Low, 10, 1),
            create_test_event("api", Severity::Low, 10, 1),
        ];
        let summary = EscalationSummary::from_events(&events);

        let top = most_escalated_categories(&summary, 2);
        assert_eq!(
            top,
            vec![("payment".to_string(), 2), ("api".to_string(), 1)]
        );
    }

    #[test]
    fn test_open_trends() {
        let states = vec![
            TrendState {
                category: "api".to_string(),
                count: 0,
                status: TrendStatus::Monitoring,
                first_seen: None,
                last_seen: None,
                episode: 1,
            },
            TrendState {
                category: "payment".to_string(),
                count: 14,
                status: TrendStatus::Escalated,
                first_seen: None,
                last_seen: None,
                episode: 1,
            },
        ];

        let open = open_trends(&states);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].category, "payment");
    }

    #[test]
    fn test_generate_summary_text() {
        let events = vec![
            create_test_event("payment", Severity::High, 10, 1),
            create_test_event("api", Severity::Low, 10, 1),
        ];
        let text = generate_summary_text(&EscalationSummary::from_events(&events));

        assert!(text.starts_with("Total Escalations: 2"));
        assert!(text.contains("- payment: 1"));
        assert!(text.contains("- 🟢 Low: 1"));
    }
}
