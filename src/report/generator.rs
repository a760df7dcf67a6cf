//! Markdown and JSON report generation.
//!
//! This module renders the [`RunReport`] produced at the end of a watcher
//! run: what was read, what escalated and where every category ended up.

use crate::analysis::{
    group_by_category, group_by_team, most_escalated_categories, open_trends, sort_by_severity,
};
use crate::models::{
    EscalationEvent, EscalationSummary, ReportMetadata, RunReport, Severity, TrendState,
};
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str("# Trendwatch Report\n\n");

    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_table_of_contents(report));
    output.push_str(&generate_summary_section(&report.summary, &report.escalations));
    output.push_str(&generate_escalations_section(&report.escalations));
    output.push_str(&generate_states_section(&report.final_states));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Signal Source:** {}\n", metadata.source));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Trend Threshold:** {} incidents per {} minutes\n",
        metadata.trend_threshold, metadata.time_window_minutes
    ));
    section.push_str(&format!("- **Signals Read:** {}\n", metadata.signals_read));
    if metadata.signals_rejected > 0 {
        section.push_str(&format!(
            "- **Signals Rejected:** {}\n",
            metadata.signals_rejected
        ));
    }
    if metadata.malformed_lines > 0 {
        section.push_str(&format!(
            "- **Malformed Lines:** {}\n",
            metadata.malformed_lines
        ));
    }
    section.push_str(&format!("- **Poll Cycles:** {}\n", metadata.poll_cycles));
    if metadata.delivery_failures > 0 {
        section.push_str(&format!(
            "- **Delivery Failures:** {}\n",
            metadata.delivery_failures
        ));
    }
    section.push_str(&format!(
        "- **Run Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn generate_table_of_contents(report: &RunReport) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Summary](#summary)\n");
    toc.push_str("- [Escalations](#escalations)\n");

    let mut categories: Vec<_> = group_by_category(&report.escalations).into_keys().collect();
    categories.sort();
    for category in categories {
        toc.push_str(&format!("  - [{}](#{})\n", category, anchor(&category)));
    }

    if !report.final_states.is_empty() {
        toc.push_str("- [Final Trend States](#final-trend-states)\n");
    }
    toc.push('\n');

    toc
}

fn generate_summary_section(summary: &EscalationSummary, events: &[EscalationEvent]) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");

    section.push_str("### Escalations by Severity\n\n");
    section.push_str(&format!(
        "| {} High | {} Medium | {} Low | **Total** |\n",
        Severity::High.emoji(),
        Severity::Medium.emoji(),
        Severity::Low.emoji(),
    ));
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | **{}** |\n\n",
        summary.high, summary.medium, summary.low, summary.total
    ));

    if !events.is_empty() {
        let mut priority = events.to_vec();
        sort_by_severity(&mut priority);
        priority.truncate(5);

        section.push_str("### Highest Priority\n\n");
        section.push_str("| Escalation | Severity | Incidents | Team |\n");
        section.push_str("|:---|:---:|:---:|:---|\n");
        for event in &priority {
            section.push_str(&format!(
                "| `{}` | {} {} | {} | {} |\n",
                event.id(),
                event.severity.emoji(),
                event.severity,
                event.count,
                event.assigned_team
            ));
        }
        section.push('\n');
    }

    let top = most_escalated_categories(summary, 5);
    if !top.is_empty() {
        section.push_str("### Most Escalated Categories\n\n");
        section.push_str("| Category | Escalations |\n");
        section.push_str("|:---|:---:|\n");
        for (category, count) in top {
            section.push_str(&format!("| `{}` | {} |\n", category, count));
        }
        section.push('\n');
    }

    let teams = group_by_team(events);
    if !teams.is_empty() {
        section.push_str("### Escalations by Team\n\n");
        section.push_str("| Team | Escalations |\n");
        section.push_str("|:---|:---:|\n");

        let mut teams: Vec<_> = teams.into_iter().collect();
        teams.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (team, count) in teams {
            section.push_str(&format!("| {} | {} |\n", team, count));
        }
        section.push('\n');
    }

    section
}

fn generate_escalations_section(events: &[EscalationEvent]) -> String {
    let mut section = String::new();

    section.push_str("## Escalations\n\n");

    if events.is_empty() {
        section.push_str("No category crossed the trend threshold during this run.\n\n");
        return section;
    }

    let grouped = group_by_category(events);
    let mut categories: Vec<_> = grouped.keys().collect();
    categories.sort();

    for category in categories {
        section.push_str(&format!("### {} {{#{}}}\n\n", category, anchor(category)));
        for event in &grouped[category] {
            section.push_str(&generate_event_block(event));
        }
    }

    section
}

fn generate_event_block(event: &EscalationEvent) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "#### {} **{}** episode {} - {} incidents\n\n",
        event.severity.emoji(),
        event.severity.to_string().to_uppercase(),
        event.episode,
        event.count
    ));
    block.push_str(&format!(
        "**Window:** {} to {}\n\n",
        event.window_start.format("%Y-%m-%d %H:%M:%S"),
        event.window_end.format("%Y-%m-%d %H:%M:%S")
    ));
    block.push_str(&format!(
        "**Affected Customers:** {} | **Assigned Team:** `{}`\n\n",
        event.affected_customers, event.assigned_team
    ));

    if !event.reasons.is_empty() {
        block.push_str("**Needs a human:**\n\n");
        for reason in &event.reasons {
            block.push_str(&format!("- {}\n", reason));
        }
        block.push('\n');
    }

    block.push_str("---\n\n");

    block
}

fn generate_states_section(states: &[TrendState]) -> String {
    if states.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Final Trend States\n\n");
    section.push_str("| Category | Status | In Window | Episodes | Last Seen |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---|\n");

    for state in states {
        let last_seen = state
            .last_seen
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        section.push_str(&format!(
            "| `{}` | {} | {} | {} | {} |\n",
            state.category, state.status, state.count, state.episode, last_seen
        ));
    }
    section.push('\n');

    let open = open_trends(states);
    if !open.is_empty() {
        section.push_str(&format!(
            "> ⚠️ {} categories were still trending when the run ended.\n\n",
            open.len()
        ));
    }

    section
}

fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by trendwatch v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

fn anchor(category: &str) -> String {
    category.replace(['/', '.', ' ', '_'], "-").to_lowercase()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
