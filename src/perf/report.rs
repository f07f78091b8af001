//! Report shapes, recommendation thresholds, and the scoring rules.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::util::bytes::format_bytes;

/// Upper bound on the persisted history list; oldest entries evicted first.
pub const HISTORY_LIMIT: usize = 100;

/// Severity attached to a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One derived recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub severity: Severity,
    pub category: String,
    pub message: String,
    pub value: String,
}

/// Client-side Core Web Vitals reported for the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WebVitals {
    pub cls: Option<f64>,
    pub fid: Option<f64>,
    pub lcp: Option<f64>,
    pub fcp: Option<f64>,
    pub ttfb: Option<f64>,
}

/// Headline figures for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Wall-clock seconds since the recorder was created.
    pub request_time: f64,
    /// Resident bytes grown since the recorder was created.
    pub memory_usage: u64,
    pub db_queries: usize,
    pub db_time: f64,
    /// `hits / (hits + misses)`, absent when no cache outcome was recorded.
    pub cache_hit_rate: Option<f64>,
    pub error_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_vitals: Option<WebVitals>,
}

/// Built once per request; persisted as the latest report and summarized
/// into the history list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub summary: Summary,
    pub recommendations: Vec<Recommendation>,
    pub score: u8,
}

/// Trimmed record appended to the rolling history list, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: u64,
    pub uri: String,
    pub response_time: f64,
    pub memory_usage: u64,
    pub score: u8,
}

pub(crate) fn recommendations(summary: &Summary, memory_limit: NonZeroU64) -> Vec<Recommendation> {
    let mut derived = Vec::new();

    if summary.request_time > 1.0 {
        derived.push(Recommendation {
            severity: Severity::Warning,
            category: "response_time".to_string(),
            message: "Response time is over 1 second. Consider optimization.".to_string(),
            value: format!("{:.3}s", summary.request_time),
        });
    }

    if summary.memory_usage as f64 > memory_limit.get() as f64 * 0.8 {
        derived.push(Recommendation {
            severity: Severity::Warning,
            category: "memory".to_string(),
            message: "Memory usage is high. Consider raising the limit or optimizing code."
                .to_string(),
            value: format_bytes(summary.memory_usage),
        });
    }

    if summary.db_queries > 20 {
        derived.push(Recommendation {
            severity: Severity::Info,
            category: "database".to_string(),
            message: "High number of database queries. Consider query optimization or caching."
                .to_string(),
            value: format!("{} queries", summary.db_queries),
        });
    }

    if let Some(rate) = summary.cache_hit_rate {
        if rate < 0.80 {
            derived.push(Recommendation {
                severity: Severity::Info,
                category: "cache".to_string(),
                message: "Cache hit rate is below 80%. Review caching strategy.".to_string(),
                value: format!("{:.2}%", rate * 100.0),
            });
        }
    }

    if summary.error_count > 0 {
        derived.push(Recommendation {
            severity: Severity::Error,
            category: "errors".to_string(),
            message: "Errors occurred during request processing.".to_string(),
            value: format!("{} errors", summary.error_count),
        });
    }

    derived
}

/// Score the request 0..=100. Deductions accumulate across every threshold
/// a figure crosses; a hit rate above 90% earns a small bonus.
pub(crate) fn score(summary: &Summary, memory_limit: NonZeroU64) -> u8 {
    let mut score: i64 = 100;

    if summary.request_time > 0.5 {
        score -= 10;
    }
    if summary.request_time > 1.0 {
        score -= 20;
    }
    if summary.request_time > 2.0 {
        score -= 30;
    }

    let memory_share = summary.memory_usage as f64 / memory_limit.get() as f64;
    if memory_share > 0.7 {
        score -= 10;
    }
    if memory_share > 0.9 {
        score -= 20;
    }

    if summary.db_queries > 10 {
        score -= 5;
    }
    if summary.db_queries > 20 {
        score -= 10;
    }
    if summary.db_queries > 50 {
        score -= 20;
    }

    score -= summary.error_count as i64 * 10;

    if summary.cache_hit_rate.is_some_and(|rate| rate > 0.90) {
        score += 5;
    }

    score.clamp(0, 100) as u8
}
