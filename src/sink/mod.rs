//! Downstream consumers of escalation events.
//!
//! The watcher guarantees correct emission, not delivery. Sinks stand in
//! for the summarizer/resolver/notifier pipeline; a failed delivery is
//! reported to the caller, which logs it and moves on.

use crate::models::EscalationEvent;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Receives escalation events.
pub trait EscalationSink: Send {
    fn deliver(&mut self, event: &EscalationEvent) -> Result<()>;
}

/// Writes each event to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl EscalationSink for LogSink {
    fn deliver(&mut self, event: &EscalationEvent) -> Result<()> {
        info!(
            "Escalation {}: {} incidents from {} customers ({} severity) -> {}",
            event.id(),
            event.count,
            event.affected_customers,
            event.severity,
            event.assigned_team
        );
        for reason in &event.reasons {
            info!("  reason: {}", reason);
        }
        Ok(())
    }
}

/// Appends one JSON document per event.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<BufWriter<std::fs::File>> {
    /// Open `path` for appending, creating it if needed.
    pub fn append_to(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open events file: {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> EscalationSink for JsonLinesSink<W> {
    fn deliver(&mut self, event: &EscalationEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event).context("Failed to encode event")?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().context("Failed to flush events file")?;
        Ok(())
    }
}

/// Drops events whose id was already delivered successfully.
pub struct DedupSink<S> {
    inner: S,
    seen: HashSet<String>,
}

impl<S: EscalationSink> DedupSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            seen: HashSet::new(),
        }
    }
}

impl<S: EscalationSink> EscalationSink for DedupSink<S> {
    fn deliver(&mut self, event: &EscalationEvent) -> Result<()> {
        let id = event.id();
        if self.seen.contains(&id) {
            debug!("Dropping redelivered escalation {}", id);
            return Ok(());
        }
        self.inner.deliver(event)?;
        self.seen.insert(id);
        Ok(())
    }
}

/// Delivers every event to each inner sink.
///
/// A failing sink does not stop delivery to the others; the first error
/// is returned once all sinks were tried.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EscalationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EscalationSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }
}

impl EscalationSink for FanoutSink {
    fn deliver(&mut self, event: &EscalationEvent) -> Result<()> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.deliver(event) {
                warn!("Sink failed to take escalation {}: {:#}", event.id(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
