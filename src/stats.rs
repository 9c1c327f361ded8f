//! Statistics tracking for the event engine.
//!
//! Counts ticks, fetch failures per stream, announcements and observer
//! failures, and keeps a latency histogram of tick bodies.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::dispatch::DispatchReport;

/// A stream reconciled by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Watches,
    MesoscaleDiscussions,
    Warnings,
}

impl Stream {
    pub const ALL: [Stream; 3] = [Stream::Watches, Stream::MesoscaleDiscussions, Stream::Warnings];

    /// Label used in metrics output.
    pub fn label(&self) -> &'static str {
        match self {
            Stream::Watches => "watches",
            Stream::MesoscaleDiscussions => "mesoscale_discussions",
            Stream::Warnings => "warnings",
        }
    }

    fn index(&self) -> usize {
        match self {
            Stream::Watches => 0,
            Stream::MesoscaleDiscussions => 1,
            Stream::Warnings => 2,
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Thread-safe statistics collector for the event engine.
#[derive(Debug)]
pub struct EngineStats {
    /// Tick bodies run, periodic or on demand
    pub ticks: AtomicU64,

    /// Watch boxes announced alongside watches
    pub watch_boxes_announced: AtomicU64,

    /// Observer calls that returned an error or panicked
    pub observer_failures: AtomicU64,

    /// Fetch failures per stream
    fetch_failures: [AtomicU64; 3],

    /// Entities announced per stream
    announced: [AtomicU64; 3],

    /// Tick body latency in microseconds
    tick_latency: RwLock<Histogram<u64>>,

    /// When stats collection started
    start_time: Instant,
}

impl EngineStats {
    /// Create a new statistics collector.
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            watch_boxes_announced: AtomicU64::new(0),
            observer_failures: AtomicU64::new(0),
            fetch_failures: Default::default(),
            announced: Default::default(),
            // 1us to 10 minutes, 3 significant figures
            tick_latency: RwLock::new(
                Histogram::new_with_bounds(1, 600_000_000, 3).expect("Failed to create tick latency histogram"),
            ),
            start_time: Instant::now(),
        }
    }

    /// Record a completed tick body.
    pub fn record_tick(&self, latency: Duration) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut hist) = self.tick_latency.write() {
            let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
            let _ = hist.record(micros.clamp(1, 600_000_000));
        }
    }

    /// Record a failed fetch for one stream.
    pub fn record_fetch_failure(&self, stream: Stream) {
        self.fetch_failures[stream.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record announced entities for one stream.
    pub fn record_announced(&self, stream: Stream, count: usize) {
        self.announced[stream.index()].fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record the outcome of a dispatch.
    pub fn record_dispatch(&self, report: DispatchReport) {
        self.observer_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    pub fn fetch_failures(&self, stream: Stream) -> u64 {
        self.fetch_failures[stream.index()].load(Ordering::Relaxed)
    }

    pub fn announced(&self, stream: Stream) -> u64 {
        self.announced[stream.index()].load(Ordering::Relaxed)
    }

    /// Get the elapsed time since stats collection started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Generate a summary report.
    pub fn summary(&self) -> StatsSummary {
        let tick_latency_us = self
            .tick_latency
            .read()
            .ok()
            .filter(|h| h.len() > 0)
            .map(|h| HistogramPercentiles {
                p50: h.value_at_quantile(0.50),
                p90: h.value_at_quantile(0.90),
                p99: h.value_at_quantile(0.99),
                min: h.min(),
                max: h.max(),
                mean: h.mean(),
            });

        StatsSummary {
            elapsed_secs: self.elapsed().as_secs_f64(),
            ticks: self.ticks.load(Ordering::Relaxed),
            fetch_failures: Stream::ALL.iter().map(|s| (*s, self.fetch_failures(*s))).collect(),
            announced: Stream::ALL.iter().map(|s| (*s, self.announced(*s))).collect(),
            watch_boxes_announced: self.watch_boxes_announced.load(Ordering::Relaxed),
            observer_failures: self.observer_failures.load(Ordering::Relaxed),
            tick_latency_us,
        }
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentile values from a histogram.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramPercentiles {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

/// Summary of collected statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub elapsed_secs: f64,
    pub ticks: u64,
    pub fetch_failures: BTreeMap<Stream, u64>,
    pub announced: BTreeMap<Stream, u64>,
    pub watch_boxes_announced: u64,
    pub observer_failures: u64,
    pub tick_latency_us: Option<HistogramPercentiles>,
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f, "                STORMWATCH ENGINE STATISTICS")?;
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f)?;
        writeln!(f, "Runtime: {:.1}s", self.elapsed_secs)?;
        writeln!(f, "Ticks: {}", self.ticks)?;
        writeln!(f, "Observer failures: {}", self.observer_failures)?;
        writeln!(f, "Watch boxes announced: {}", self.watch_boxes_announced)?;
        writeln!(f)?;

        writeln!(f, "By stream (announced / fetch failures):")?;
        for stream in Stream::ALL {
            writeln!(
                f,
                "  {}: {} / {}",
                stream,
                self.announced.get(&stream).copied().unwrap_or(0),
                self.fetch_failures.get(&stream).copied().unwrap_or(0)
            )?;
        }

        if let Some(ref p) = self.tick_latency_us {
            writeln!(f)?;
            writeln!(f, "Tick latency (ms):")?;
            writeln!(
                f,
                "  Min: {:.1}, Max: {:.1}, Mean: {:.1}",
                p.min as f64 / 1000.0,
                p.max as f64 / 1000.0,
                p.mean / 1000.0
            )?;
            writeln!(
                f,
                "  P50: {:.1}, P90: {:.1}, P99: {:.1}",
                p.p50 as f64 / 1000.0,
                p.p90 as f64 / 1000.0,
                p.p99 as f64 / 1000.0
            )?;
        }

        Ok(())
    }
}
