//! Ossatura: runtime services for self-hosted web applications.
//!
//! Everything expensive or externally dependent goes through one cache
//! indirection: [`cache::CacheStore`] over a pluggable backend, the
//! [`images::ImagePipeline`] memoizing re-encoded derivatives, and the
//! [`perf::PerformanceRecorder`] persisting per-request reports and their
//! rolling history. [`context::RuntimeContext`] wires configuration, the
//! clock, and backend selection once at process entry; presentation layers
//! call in from outside.

pub mod cache;
pub mod config;
pub mod context;
pub mod images;
pub mod perf;
pub mod telemetry;
pub mod util;

pub use context::RuntimeContext;
