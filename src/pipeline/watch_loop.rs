//! The signal watch loop.
//!
//! This module drives a [`TrendWatcher`] from a signal feed and hands
//! every escalation to a sink. It runs in two modes:
//! - Replay: a finite feed on a manual clock that follows signal timestamps
//! - Live: an async feed with a real poll timer, until shutdown is signalled

use crate::clock::{Clock, ManualClock};
use crate::error::SourceError;
use crate::models::{EscalationEvent, IssueSignal};
use crate::sink::EscalationSink;
use crate::source::{decode_line, parse_signal_line};
use crate::watcher::TrendWatcher;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Counters and output of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    /// Feed records that parsed into a signal.
    pub signals_read: usize,
    pub ingested: usize,
    /// Signals the watcher refused.
    pub rejected: usize,
    pub malformed_lines: usize,
    pub poll_cycles: usize,
    pub delivery_failures: usize,
    /// Every event emitted, in order, whether or not delivery succeeded.
    pub events: Vec<EscalationEvent>,
}

/// Feeds a watcher and forwards its escalations.
pub struct WatchLoop<S: EscalationSink> {
    watcher: Arc<TrendWatcher>,
    sink: S,
    poll_interval: Duration,
    stats: RunStats,
}

impl<S: EscalationSink> WatchLoop<S> {
    /// Create a loop that polls at the watcher's configured interval.
    pub fn new(watcher: Arc<TrendWatcher>, sink: S) -> Self {
        let poll_interval = watcher.settings().poll_interval();
        Self {
            watcher,
            sink,
            poll_interval,
            stats: RunStats::default(),
        }
    }

    /// Override the poll period.
    #[cfg(test)]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Replay a finite feed on `clock`, which must be the watcher's clock.
    ///
    /// The clock follows signal timestamps (never moving backwards). A poll
    /// cycle fires at every poll boundary the clock passes, counted from the
    /// first signal, and once more at the boundary after the last signal.
    pub fn replay<I>(mut self, clock: &ManualClock, source: I, progress: Option<&ProgressBar>) -> RunStats
    where
        I: IntoIterator<Item = Result<(usize, IssueSignal), SourceError>>,
    {
        info!(
            "Replaying feed with poll interval of {}s",
            self.poll_interval.num_seconds()
        );

        let mut next_poll: Option<DateTime<Utc>> = None;

        for item in source {
            if let Some(pb) = progress {
                pb.inc(1);
            }

            let (line, signal) = match item {
                Ok(pair) => pair,
                Err(e) => {
                    self.record_source_error(e);
                    continue;
                }
            };

            let target = signal.timestamp.max(clock.now());
            let mut boundary = *next_poll.get_or_insert(target + self.poll_interval);
            while boundary <= target {
                clock.set(boundary);
                self.poll(boundary);
                boundary += self.poll_interval;
            }
            next_poll = Some(boundary);

            clock.advance_to(target);
            self.ingest(line, signal);
        }

        if let Some(boundary) = next_poll {
            clock.set(boundary);
            self.poll(boundary);
        }

        self.stats
    }

    /// Run against a live feed until `shutdown` flips to `true` or its sender drops.
    ///
    /// The feed reaching EOF does not stop the loop; only shutdown stops
    /// the poll timer.
    pub async fn run_live<R>(mut self, reader: R, mut shutdown: watch::Receiver<bool>) -> Result<RunStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let period = self
            .poll_interval
            .to_std()
            .context("Poll interval must be positive")?;
        info!("Watching live feed, polling every {:?}", period);

        let mut lines = reader.split(b'\n');
        let mut line_no = 0usize;
        let mut feed_open = true;

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, stopping poll timer");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let now = self.watcher.now();
                    self.poll(now);
                }
                line = lines.next_segment(), if feed_open => match line {
                    Ok(Some(bytes)) => {
                        line_no += 1;
                        let parsed = decode_line(bytes, line_no)
                            .and_then(|text| parse_signal_line(&text, line_no));
                        match parsed {
                            Ok(Some(signal)) => self.ingest(line_no, signal),
                            Ok(None) => {}
                            Err(e) => self.record_source_error(e),
                        }
                    }
                    Ok(None) => {
                        feed_open = false;
                        info!("Signal feed closed after {} lines; polling continues until shutdown", line_no);
                    }
                    Err(e) => {
                        feed_open = false;
                        warn!("Failed to read signal feed: {}", e);
                    }
                },
            }
        }

        Ok(self.stats)
    }

    fn ingest(&mut self, line: usize, signal: IssueSignal) {
        self.stats.signals_read += 1;
        match self.watcher.ingest(signal) {
            Ok(_) => self.stats.ingested += 1,
            Err(source) => {
                self.stats.rejected += 1;
                warn!("Dropping signal: {}", SourceError::Invalid { line, source });
            }
        }
    }

    fn record_source_error(&mut self, error: SourceError) {
        match error {
            SourceError::Io(e) => warn!("Signal feed read failed: {}", e),
            other => {
                self.stats.malformed_lines += 1;
                warn!("Skipping record: {}", other);
            }
        }
    }

    fn poll(&mut self, now: DateTime<Utc>) {
        self.stats.poll_cycles += 1;
        let events = self.watcher.poll_cycle(now);
        if events.is_empty() {
            return;
        }

        debug!("Delivering {} escalations", events.len());
        for event in events {
            if let Err(e) = self.sink.deliver(&event) {
                self.stats.delivery_failures += 1;
                warn!("Delivery of escalation {} failed: {:#}", event.id(), e);
            }
            self.stats.events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::EscalationPolicy;
    use crate::models::Severity;
    use crate::watcher::WatcherSettings;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[derive(Clone, Default)]
    struct Recorder {
        ids: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl EscalationSink for Recorder {
        fn deliver(&mut self, event: &EscalationEvent) -> Result<()> {
            if self.fail {
                anyhow::bail!("notifier down");
            }
            self.ids.lock().unwrap().push(event.id());
            Ok(())
        }
    }

    fn watcher_on(clock: Arc<ManualClock>, threshold: i64, window_minutes: i64) -> Arc<TrendWatcher> {
        let settings = WatcherSettings::new(threshold, window_minutes).unwrap();
        Arc::new(TrendWatcher::new(settings, EscalationPolicy::default(), clock))
    }

    fn item(line: usize, category: &str, ts: DateTime<Utc>) -> Result<(usize, IssueSignal), SourceError> {
        Ok((
            line,
            IssueSignal::new(category, ts, Severity::Medium, format!("c-{}", line)),
        ))
    }

    #[test]
    fn test_replay_escalates_once_per_episode() {
        let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
        let watcher = watcher_on(clock.clone(), 3, 60);
        let recorder = Recorder::default();

        // Episode 1 in the first minutes, a two-hour lull, then episode 2.
        let mut feed = Vec::new();
        for i in 0..4 {
            feed.push(item(i + 1, "login-failure", start() + Duration::minutes(i as i64)));
        }
        for i in 0..3 {
            feed.push(item(
                i + 5,
                "login-failure",
                start() + Duration::hours(3) + Duration::minutes(i as i64),
            ));
        }
        feed.push(Err(SourceError::Malformed {
            line: 8,
            reason: "bad".to_string(),
        }));

        let stats = WatchLoop::new(watcher, recorder.clone()).replay(&clock, feed, None);

        assert_eq!(stats.signals_read, 7);
        assert_eq!(stats.ingested, 7);
        assert_eq!(stats.malformed_lines, 1);
        assert_eq!(
            *recorder.ids.lock().unwrap(),
            vec!["login-failure#1".to_string(), "login-failure#2".to_string()]
        );
        assert!(stats.poll_cycles >= 12);
    }

    #[test]
    fn test_replay_polls_on_boundaries() {
        let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
        let watcher = watcher_on(clock.clone(), 2, 60);

        let feed = vec![
            item(1, "payment", start()),
            item(2, "payment", start() + Duration::minutes(40)),
        ];
        let stats = WatchLoop::new(watcher, Recorder::default()).replay(&clock, feed, None);

        // Boundaries at +15 and +30 pass before the second signal; the final one is +45.
        assert_eq!(stats.poll_cycles, 3);
        assert_eq!(stats.events.len(), 1);
        assert_eq!(stats.events[0].window_end, start() + Duration::minutes(45));
        assert_eq!(clock.now(), start() + Duration::minutes(45));
    }

    #[test]
    fn test_replay_counts_rejected_signals() {
        let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
        let watcher = watcher_on(clock.clone(), 2, 60);

        let feed = vec![item(1, "", start()), item(2, "api", start())];
        let stats = WatchLoop::new(watcher, Recorder::default()).replay(&clock, feed, None);

        assert_eq!(stats.signals_read, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.ingested, 1);
        assert!(stats.events.is_empty());
    }

    #[test]
    fn test_delivery_failures_do_not_stop_the_loop() {
        let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
        let watcher = watcher_on(clock.clone(), 1, 60);
        let failing = Recorder {
            fail: true,
            ..Recorder::default()
        };

        let feed = vec![item(1, "api", start()), item(2, "database", start())];
        let stats = WatchLoop::new(watcher, failing).replay(&clock, feed, None);

        assert_eq!(stats.events.len(), 2);
        assert_eq!(stats.delivery_failures, 2);
    }

    #[tokio::test]
    async fn test_live_loop_until_shutdown() {
        let clock = Arc::new(ManualClock::new(start()));
        let watcher = watcher_on(clock.clone(), 3, 60);
        let recorder = Recorder::default();

        let ts = start().to_rfc3339();
        let mut feed = String::new();
        for i in 0..3 {
            feed.push_str(&format!(
                "{{\"category\": \"authentication\", \"timestamp\": \"{}\", \"severity\": \"high\", \"customer_id\": \"c{}\"}}\n",
                ts, i
            ));
        }
        feed.push_str("{broken\n");
        let reader = tokio::io::BufReader::new(std::io::Cursor::new(feed.into_bytes()));

        let (tx, rx) = watch::channel(false);
        let watch_loop = WatchLoop::new(watcher.clone(), recorder.clone())
            .with_poll_interval(Duration::milliseconds(10));

        let (stats, _) = tokio::join!(watch_loop.run_live(reader, rx), async {
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            tx.send(true).unwrap();
        });
        let stats = stats.unwrap();

        assert_eq!(stats.ingested, 3);
        assert_eq!(stats.malformed_lines, 1);
        assert!(stats.poll_cycles > 1);
        assert_eq!(
            *recorder.ids.lock().unwrap(),
            vec!["authentication#1".to_string()]
        );
        assert_eq!(watcher.evaluate("authentication", clock.now()).count, 3);
    }

    #[tokio::test]
    async fn test_live_loop_skips_invalid_utf8() {
        let clock = Arc::new(ManualClock::new(start()));
        let watcher = watcher_on(clock.clone(), 3, 60);
        let recorder = Recorder::default();

        let ts = start().to_rfc3339();
        let mut feed = b"\xff\xfe{\"category\": \"api\"}\n".to_vec();
        for i in 0..3 {
            feed.extend_from_slice(
                format!(
                    "{{\"category\": \"api\", \"timestamp\": \"{}\", \"severity\": \"low\", \"customer_id\": \"c{}\"}}\n",
                    ts, i
                )
                .as_bytes(),
            );
        }
        let reader = tokio::io::BufReader::new(std::io::Cursor::new(feed));

        let (tx, rx) = watch::channel(false);
        let watch_loop = WatchLoop::new(watcher.clone(), recorder.clone())
            .with_poll_interval(Duration::milliseconds(10));

        let (stats, _) = tokio::join!(watch_loop.run_live(reader, rx), async {
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            tx.send(true).unwrap();
        });
        let stats = stats.unwrap();

        assert_eq!(stats.malformed_lines, 1);
        assert_eq!(stats.ingested, 3);
        assert_eq!(*recorder.ids.lock().unwrap(), vec!["api#1".to_string()]);
    }

    #[tokio::test]
    async fn test_live_loop_stops_when_sender_dropped() {
        let clock = Arc::new(ManualClock::new(start()));
        let watcher = watcher_on(clock, 3, 60);
        let reader = tokio::io::BufReader::new(std::io::Cursor::new(Vec::<u8>::new()));

        let (tx, rx) = watch::channel(false);
        drop(tx);

        let stats = WatchLoop::new(watcher, Recorder::default())
            .with_poll_interval(Duration::seconds(60))
            .run_live(reader, rx)
            .await
            .unwrap();
        assert_eq!(stats.poll_cycles, 0);
    }
}
