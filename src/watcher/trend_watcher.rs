//! The trend watcher: windowed counts per category and the escalation
//! state machine.
//!
//! Each category moves through `monitoring -> active -> escalated` and
//! back to `monitoring` once its count falls below the threshold. Only
//! [`TrendWatcher::poll_cycle`] moves a category into `escalated`, and it
//! emits exactly one [`EscalationEvent`] when it does.
//!
//! Locking: the category map sits behind an `RwLock` and every category
//! has its own `Mutex`. Per-category work holds the map's read lock, so
//! different categories proceed in parallel. A track's mutex is only ever
//! taken while the map lock is held; the write lock is used solely to add
//! a new category or prune idle ones.

use crate::clock::Clock;
use crate::config::{Config, WatcherConfig};
use crate::error::{ConfigurationError, InvalidSignalError};
use crate::escalation::EscalationPolicy;
use crate::models::{EscalationEvent, IssueSignal, Severity, TrendState, TrendStatus};
use crate::watcher::window::TrendWindow;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Longest accepted window: one leap year.
pub const MAX_WINDOW_MINUTES: i64 = 366 * 24 * 60;

/// Largest accepted clock-skew tolerance: one day.
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 24 * 60 * 60;

/// Validated, immutable watcher settings.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub trend_threshold: usize,
    pub window: Duration,
    pub clock_skew: Duration,
    pub polls_per_window: i32,
    pub max_incidents_before_escalation: Option<u32>,
    pub severity_escalation_threshold: Severity,
}

impl WatcherSettings {
    /// Settings with the given threshold and window and defaults elsewhere.
    #[cfg(test)]
    pub fn new(trend_threshold: i64, time_window_minutes: i64) -> Result<Self, ConfigurationError> {
        let config = WatcherConfig {
            trend_threshold,
            time_window_minutes,
            ..WatcherConfig::default()
        };
        Self::try_from(&config)
    }

    /// Period of the poll timer: one window divided by `polls_per_window`.
    pub fn poll_interval(&self) -> Duration {
        self.window / self.polls_per_window
    }
}

impl TryFrom<&WatcherConfig> for WatcherSettings {
    type Error = ConfigurationError;

    fn try_from(config: &WatcherConfig) -> Result<Self, Self::Error> {
        if config.trend_threshold <= 0 {
            return Err(ConfigurationError::NonPositiveThreshold);
        }
        if config.time_window_minutes <= 0 {
            return Err(ConfigurationError::NonPositiveWindow);
        }
        if config.time_window_minutes > MAX_WINDOW_MINUTES {
            return Err(ConfigurationError::WindowTooLarge {
                max_minutes: MAX_WINDOW_MINUTES,
            });
        }
        if config.polls_per_window <= 0 {
            return Err(ConfigurationError::NonPositivePollRate);
        }
        if config.polls_per_window > config.time_window_minutes * 60 {
            return Err(ConfigurationError::PollIntervalTooShort {
                polls: config.polls_per_window,
            });
        }
        let max_incidents = match config.max_incidents_before_escalation {
            Some(n) if n <= 0 => return Err(ConfigurationError::NonPositiveMaxIncidents),
            Some(n) => Some(u32::try_from(n).unwrap_or(u32::MAX)),
            None => None,
        };

        let clock_skew = match i64::try_from(config.clock_skew_seconds) {
            Ok(secs) if secs <= MAX_CLOCK_SKEW_SECONDS => Duration::seconds(secs),
            _ => {
                return Err(ConfigurationError::ClockSkewTooLarge {
                    max_seconds: MAX_CLOCK_SKEW_SECONDS,
                })
            }
        };
        let window = Duration::minutes(config.time_window_minutes);

        Ok(Self {
            trend_threshold: usize::try_from(config.trend_threshold).unwrap_or(usize::MAX),
            window,
            clock_skew,
            polls_per_window: i32::try_from(config.polls_per_window).unwrap_or(i32::MAX),
            max_incidents_before_escalation: max_incidents,
            severity_escalation_threshold: config.severity_escalation_threshold,
        })
    }
}

/// Window plus state machine for one category.
#[derive(Debug)]
struct CategoryTrack {
    window: TrendWindow,
    status: TrendStatus,
    episode: u64,
    /// In-window counts seen at recent poll cycles, oldest first.
    volumes: VecDeque<usize>,
}

impl CategoryTrack {
    fn new(span: Duration) -> Self {
        Self {
            window: TrendWindow::new(span),
            status: TrendStatus::Monitoring,
            episode: 0,
            volumes: VecDeque::new(),
        }
    }

    /// Mean of the recorded poll-cycle counts.
    fn baseline(&self) -> Option<f64> {
        if self.volumes.is_empty() {
            return None;
        }
        let total: usize = self.volumes.iter().sum();
        Some(total as f64 / self.volumes.len() as f64)
    }

    fn record_volume(&mut self, count: usize, keep: usize) {
        if keep == 0 {
            return;
        }
        while self.volumes.len() >= keep {
            self.volumes.pop_front();
        }
        self.volumes.push_back(count);
    }

    /// Status implied by `count`. Never yields `Escalated` from another status.
    fn next_status(&self, count: usize, threshold: usize) -> TrendStatus {
        match (self.status, count >= threshold) {
            (_, false) => TrendStatus::Monitoring,
            (TrendStatus::Monitoring, true) => TrendStatus::Active,
            (status, true) => status,
        }
    }

    /// Apply count-driven transitions as of `now`. Returns the count.
    fn reconcile(&mut self, category: &str, now: DateTime<Utc>, threshold: usize) -> usize {
        let count = self.window.count(now);
        let next = self.next_status(count, threshold);

        match (self.status, next) {
            (TrendStatus::Monitoring, TrendStatus::Active) => {
                self.episode += 1;
                info!(
                    "Category {} reached {} incidents (episode {})",
                    category, count, self.episode
                );
            }
            (TrendStatus::Escalated, TrendStatus::Monitoring) => {
                info!(
                    "Category {} fell to {} incidents, closing episode {}",
                    category, count, self.episode
                );
            }
            (TrendStatus::Active, TrendStatus::Monitoring) => {
                debug!(
                    "Category {} fell below threshold before escalating",
                    category
                );
            }
            _ => {}
        }

        self.status = next;
        count
    }

    /// Read-only view as of `now`, including transitions not yet applied.
    fn view(&self, category: &str, now: DateTime<Utc>, threshold: usize) -> TrendState {
        let count = self.window.count(now);
        let status = self.next_status(count, threshold);
        let episode = if self.status == TrendStatus::Monitoring && status == TrendStatus::Active {
            self.episode + 1
        } else {
            self.episode
        };

        TrendState {
            category: category.to_string(),
            count,
            status,
            first_seen: self.window.first_seen(now),
            last_seen: self.window.last_seen(now),
            episode,
        }
    }

    fn escalation_event(
        &self,
        category: &str,
        now: DateTime<Utc>,
        count: usize,
        policy: &EscalationPolicy,
    ) -> EscalationEvent {
        let (window_start, window_end) = self.window.bounds(now);
        let mut reasons = policy.assess(&self.window, now);
        reasons.extend(policy.assess_volume(count, self.baseline()));
        EscalationEvent {
            category: category.to_string(),
            count,
            severity: self.window.max_severity(now).unwrap_or(Severity::Low),
            window_start,
            window_end,
            episode: self.episode,
            affected_customers: self.window.distinct_customers(now),
            assigned_team: policy.team_for(category),
            reasons,
        }
    }
}

/// Ingests issue signals and decides when categories escalate.
pub struct TrendWatcher {
    settings: WatcherSettings,
    policy: EscalationPolicy,
    clock: Arc<dyn Clock>,
    categories: RwLock<HashMap<String, Mutex<CategoryTrack>>>,
}

impl TrendWatcher {
    pub fn new(settings: WatcherSettings, policy: EscalationPolicy, clock: Arc<dyn Clock>) -> Self {
        if let Some(max) = settings.max_incidents_before_escalation {
            warn!(
                "max_incidents_before_escalation = {} is set but has no effect; trend_threshold alone decides escalation",
                max
            );
        }

        info!(
            "Trend watcher started: threshold {} within {} minutes",
            settings.trend_threshold,
            settings.window.num_minutes()
        );

        Self {
            settings,
            policy,
            clock,
            categories: RwLock::new(HashMap::new()),
        }
    }

    /// Build a watcher from the loaded configuration. Refuses invalid settings.
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self, ConfigurationError> {
        let settings = WatcherSettings::try_from(&config.watcher)?;
        let policy =
            EscalationPolicy::from_config(&config.escalation, settings.severity_escalation_threshold)?;
        Ok(Self::new(settings, policy, clock))
    }

    pub fn settings(&self) -> &WatcherSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record a signal and return its category's state afterwards.
    ///
    /// Malformed signals are rejected before any state is touched.
    pub fn ingest(&self, signal: IssueSignal) -> Result<TrendState, InvalidSignalError> {
        let now = self.clock.now();
        self.validate(&signal, now)?;

        let threshold = self.settings.trend_threshold;
        let state = self.with_track(&signal.category, |track| {
            track.window.insert(&signal);
            track.window.evict(now);
            track.reconcile(&signal.category, now, threshold);
            track.view(&signal.category, now, threshold)
        });

        debug!(
            "Ingested {} signal for {} ({} in window, {})",
            signal.severity, signal.category, state.count, state.status
        );
        Ok(state)
    }

    /// State of `category` as of `now`. Reads only; emits nothing.
    pub fn evaluate(&self, category: &str, now: DateTime<Utc>) -> TrendState {
        let threshold = self.settings.trend_threshold;
        let map = self.categories.read().unwrap_or_else(PoisonError::into_inner);

        match map.get(category) {
            Some(track) => track
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .view(category, now, threshold),
            None => TrendState {
                category: category.to_string(),
                count: 0,
                status: TrendStatus::Monitoring,
                first_seen: None,
                last_seen: None,
                episode: 0,
            },
        }
    }

    /// Escalate every active category and return one event per escalation.
    ///
    /// Categories already escalated stay silent until their episode closes.
    /// `now` is expected to be non-decreasing across calls.
    pub fn poll_cycle(&self, now: DateTime<Utc>) -> Vec<EscalationEvent> {
        let threshold = self.settings.trend_threshold;
        let mut events = Vec::new();
        let mut trending = 0usize;
        let mut idle = Vec::new();

        {
            let map = self.categories.read().unwrap_or_else(PoisonError::into_inner);
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            for (category, track) in entries {
                let mut track = track.lock().unwrap_or_else(PoisonError::into_inner);
                let evicted = track.window.evict(now);
                if evicted > 0 {
                    debug!(
                        "Evicted {} expired signals from {} ({} retained)",
                        evicted,
                        category,
                        track.window.len()
                    );
                }
                let count = track.reconcile(category, now, threshold);

                if track.status == TrendStatus::Active {
                    track.status = TrendStatus::Escalated;
                    let event = track.escalation_event(category, now, count, &self.policy);
                    info!(
                        "Escalating {}: {} incidents, {} severity, routed to {}",
                        event.category, event.count, event.severity, event.assigned_team
                    );
                    events.push(event);
                }
                track.record_volume(count, self.policy.baseline_polls);

                if track.status != TrendStatus::Monitoring {
                    trending += 1;
                } else if track.window.is_empty() && track.episode == 0 {
                    idle.push(category.clone());
                }
            }
        }

        if let Some(reason) = self.policy.assess_cycle(trending) {
            for event in &mut events {
                event.reasons.push(reason.clone());
            }
        }

        if !idle.is_empty() {
            self.prune(&idle);
        }

        debug!(
            "Poll cycle at {}: {} trending, {} escalated",
            now,
            trending,
            events.len()
        );
        events
    }

    /// Every tracked category's state as of `now`, sorted by category.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<TrendState> {
        let threshold = self.settings.trend_threshold;
        let map = self.categories.read().unwrap_or_else(PoisonError::into_inner);

        let mut states: Vec<TrendState> = map
            .iter()
            .map(|(category, track)| {
                track
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .view(category, now, threshold)
            })
            .collect();
        states.sort_by(|a, b| a.category.cmp(&b.category));
        states
    }

    /// Number of categories currently tracked.
    pub fn tracked_categories(&self) -> usize {
        self.categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn validate(&self, signal: &IssueSignal, now: DateTime<Utc>) -> Result<(), InvalidSignalError> {
        if signal.category.trim().is_empty() {
            return Err(InvalidSignalError::EmptyCategory);
        }
        let latest = now
            .checked_add_signed(self.settings.clock_skew)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if signal.timestamp > latest {
            return Err(InvalidSignalError::FutureTimestamp {
                timestamp: signal.timestamp,
                now,
                tolerance_secs: self.settings.clock_skew.num_seconds(),
            });
        }
        Ok(())
    }

    /// Run `f` with exclusive access to one category's track, creating it if needed.
    fn with_track<R>(&self, category: &str, f: impl FnOnce(&mut CategoryTrack) -> R) -> R {
        {
            let map = self.categories.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(track) = map.get(category) {
                let mut track = track.lock().unwrap_or_else(PoisonError::into_inner);
                return f(&mut track);
            }
        }

        let mut map = self.categories.write().unwrap_or_else(PoisonError::into_inner);
        let window = self.settings.window;
        let track = map
            .entry(category.to_string())
            .or_insert_with(|| Mutex::new(CategoryTrack::new(window)));
        f(track.get_mut().unwrap_or_else(PoisonError::into_inner))
    }

    /// Forget categories that never trended and hold no signals.
    ///
    /// Categories with a past episode are kept so that episode numbers,
    /// and therefore event ids, never repeat.
    fn prune(&self, candidates: &[String]) {
        let mut map = self.categories.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;

        for category in candidates {
            let remove = match map.get_mut(category) {
                Some(track) => {
                    let track = track.get_mut().unwrap_or_else(PoisonError::into_inner);
                    track.window.is_empty()
                        && track.status == TrendStatus::Monitoring
                        && track.episode == 0
                }
                None => false,
            };
            if remove {
                map.remove(category);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Pruned {} idle categories", removed);
        }
    }
}
