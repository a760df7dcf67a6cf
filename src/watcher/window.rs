//! Per-category sliding time window.
//!
//! The window covers `(now - span, now]`. Entries are keyed by timestamp
//! plus an arrival sequence number so that signals sharing a timestamp
//! are each counted once, and late arrivals slot into place.

use crate::models::{IssueSignal, Severity};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

#[derive(Debug, Clone)]
struct WindowEntry {
    severity: Severity,
    customer_id: String,
}

/// Signals recorded for one category, ordered by timestamp.
#[derive(Debug, Clone)]
pub struct TrendWindow {
    span: Duration,
    entries: BTreeMap<(DateTime<Utc>, u64), WindowEntry>,
    next_seq: u64,
}

impl TrendWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn span(&self) -> Duration {
        self.span
    }

    /// Record a signal. Nothing is evicted here.
    pub fn insert(&mut self, signal: &IssueSignal) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            (signal.timestamp, seq),
            WindowEntry {
                severity: signal.severity,
                customer_id: signal.customer_id.clone(),
            },
        );
    }

    /// Drop every entry at or before `now - span`. Returns how many were removed.
    pub fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let (cutoff, _) = self.bounds(now);
        let before = self.entries.len();
        // Keys (cutoff, seq) sort below (cutoff, u64::MAX), so the boundary itself is evicted.
        self.entries = self.entries.split_off(&(cutoff, u64::MAX));
        before - self.entries.len()
    }

    /// Lower (exclusive) and upper (inclusive) bounds of the window at `now`.
    ///
    /// The lower bound saturates at the earliest representable instant.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = now
            .checked_sub_signed(self.span)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        (start, now)
    }

    fn in_window(
        &self,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = (&(DateTime<Utc>, u64), &WindowEntry)> + '_ {
        let (start, end) = self.bounds(now);
        self.entries.range((
            Bound::Excluded((start, u64::MAX)),
            Bound::Included((end, u64::MAX)),
        ))
    }

    /// Number of signals inside `(now - span, now]`.
    pub fn count(&self, now: DateTime<Utc>) -> usize {
        self.in_window(now).count()
    }

    /// Signals recorded, including ones outside the window at any given instant.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_seen(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.in_window(now).next().map(|((ts, _), _)| *ts)
    }

    pub fn last_seen(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.in_window(now).last().map(|((ts, _), _)| *ts)
    }

    pub fn max_severity(&self, now: DateTime<Utc>) -> Option<Severity> {
        self.in_window(now).map(|(_, e)| e.severity).max()
    }

    pub fn distinct_customers(&self, now: DateTime<Utc>) -> usize {
        self.in_window(now)
            .map(|(_, e)| e.customer_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Signals no older than `recent`, i.e. inside `[now - recent, now]`,
    /// clipped to the window.
    pub fn recent_count(&self, now: DateTime<Utc>, recent: Duration) -> usize {
        let recent_start = now
            .checked_sub_signed(recent.min(self.span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.in_window(now)
            .filter(|((ts, _), _)| *ts >= recent_start)
            .count()
    }
}
