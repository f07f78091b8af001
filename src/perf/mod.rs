//! Per-request performance recording and persistence.
//!
//! One recorder accompanies each inbound request: named timers, database
//! and cache tallies, and errors accumulate in memory, then fold into a
//! scored [`PerformanceReport`] persisted through the cache store as the
//! latest report plus a bounded rolling history.

mod report;

pub use report::{
    HISTORY_LIMIT, HistoryRecord, PerformanceReport, Recommendation, Severity, Summary, WebVitals,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use metrics::counter;
use thiserror::Error;
use tracing::{trace, warn};

use crate::cache::{CacheStore, key};
use crate::config::PerformanceSettings;
use crate::util::clock::{Clock, unix_seconds};
use crate::util::mem::MemoryProbe;

/// Ending a timer that was never started is a programming mistake; it
/// surfaces instead of being swallowed.
#[derive(Debug, Error)]
#[error("timer `{name}` was never started")]
pub struct TimerError {
    name: String,
}

/// One completed named timing, folded from a start/end pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub start: SystemTime,
    pub end: SystemTime,
    pub memory_delta: i64,
}

/// An error observed while serving the request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedError {
    pub kind: String,
    pub message: String,
}

struct ActiveTimer {
    started_at: SystemTime,
    memory_start: u64,
}

/// Accumulates one request's metrics. Timers are independent by name;
/// overlap is allowed. Nothing here is shared across requests.
pub struct PerformanceRecorder {
    clock: Arc<dyn Clock>,
    probe: Arc<dyn MemoryProbe>,
    settings: PerformanceSettings,
    uri: String,
    started_at: SystemTime,
    memory_start: u64,
    timers: HashMap<String, ActiveTimer>,
    samples: Vec<MetricSample>,
    db_queries: usize,
    db_time: Duration,
    cache_ops: usize,
    cache_hits: usize,
    cache_misses: usize,
    errors: Vec<RecordedError>,
    web_vitals: Option<WebVitals>,
}

impl PerformanceRecorder {
    /// Start recording for one request; time and memory baselines are taken
    /// here.
    pub fn begin(
        uri: impl Into<String>,
        settings: PerformanceSettings,
        clock: Arc<dyn Clock>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let started_at = clock.now();
        let memory_start = probe.resident_bytes().unwrap_or(0);

        Self {
            clock,
            probe,
            settings,
            uri: uri.into(),
            started_at,
            memory_start,
            timers: HashMap::new(),
            samples: Vec::new(),
            db_queries: 0,
            db_time: Duration::ZERO,
            cache_ops: 0,
            cache_hits: 0,
            cache_misses: 0,
            errors: Vec::new(),
            web_vitals: None,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Start (or restart) the named timer.
    pub fn start_timer(&mut self, name: impl Into<String>) {
        self.timers.insert(
            name.into(),
            ActiveTimer {
                started_at: self.clock.now(),
                memory_start: self.probe.resident_bytes().unwrap_or(0),
            },
        );
    }

    /// End the named timer, folding it into a [`MetricSample`].
    pub fn end_timer(&mut self, name: &str) -> Result<Duration, TimerError> {
        let timer = self.timers.remove(name).ok_or_else(|| TimerError {
            name: name.to_string(),
        })?;

        let end = self.clock.now();
        let duration = end.duration_since(timer.started_at).unwrap_or_default();
        let memory_end = self.probe.resident_bytes().unwrap_or(timer.memory_start);

        self.samples.push(MetricSample {
            name: name.to_string(),
            start: timer.started_at,
            end,
            memory_delta: memory_end as i64 - timer.memory_start as i64,
        });

        Ok(duration)
    }

    pub fn record_database_query(&mut self, statement: &str, duration: Duration) {
        trace!(statement, duration_ms = duration.as_millis() as u64, "database query recorded");
        self.db_queries += 1;
        self.db_time += duration;
    }

    /// Record a cache operation; `hit` feeds the hit rate when known.
    pub fn record_cache_operation(&mut self, operation: &str, key: &str, hit: Option<bool>) {
        trace!(operation, key, hit, "cache operation recorded");
        self.cache_ops += 1;
        match hit {
            Some(true) => self.cache_hits += 1,
            Some(false) => self.cache_misses += 1,
            None => {}
        }
    }

    pub fn record_error(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.errors.push(RecordedError {
            kind: kind.into(),
            message: message.into(),
        });
    }

    pub fn record_web_vitals(&mut self, vitals: WebVitals) {
        self.web_vitals = Some(vitals);
    }

    /// Completed timings so far.
    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn errors(&self) -> &[RecordedError] {
        &self.errors
    }

    /// Finalize the figures and derive the scored report.
    pub fn report(&self) -> PerformanceReport {
        let request_time = self
            .clock
            .now()
            .duration_since(self.started_at)
            .unwrap_or_default()
            .as_secs_f64();
        let resident = self.probe.resident_bytes().unwrap_or(self.memory_start);
        let attempts = self.cache_hits + self.cache_misses;

        let summary = Summary {
            request_time,
            memory_usage: resident.saturating_sub(self.memory_start),
            db_queries: self.db_queries,
            db_time: self.db_time.as_secs_f64(),
            cache_hit_rate: (attempts > 0)
                .then(|| self.cache_hits as f64 / attempts as f64),
            error_count: self.errors.len(),
            web_vitals: self.web_vitals,
        };

        let recommendations = report::recommendations(&summary, self.settings.memory_limit_bytes);
        let score = report::score(&summary, self.settings.memory_limit_bytes);

        PerformanceReport {
            summary,
            recommendations,
            score,
        }
    }

    /// Persist the report: overwrite the latest slot and append a trimmed
    /// record to the history list, dropping the oldest past the cap.
    pub fn store_metrics(&self, store: &CacheStore) -> PerformanceReport {
        let report = self.report();
        store.set(key::PERF_LATEST, &report, self.settings.latest_ttl);

        let mut history: Vec<HistoryRecord> = store.get(key::PERF_HISTORY).unwrap_or_default();
        history.push(HistoryRecord {
            timestamp: unix_seconds(self.clock.now()),
            uri: self.uri.clone(),
            response_time: report.summary.request_time,
            memory_usage: report.summary.memory_usage,
            score: report.score,
        });
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }
        store.set(key::PERF_HISTORY, &history, self.settings.history_ttl);

        counter!("ossatura_perf_report_stored_total").increment(1);

        if report.score < 50 {
            warn!(
                score = report.score,
                uri = %self.uri,
                response_time = report.summary.request_time,
                "poor performance detected"
            );
        }

        report
    }
}
