//! Cache key sanitization, namespaces, and fingerprint digests.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Key for the most recent performance report.
pub const PERF_LATEST: &str = "performance_metrics_latest";

/// Key for the bounded performance history list.
pub const PERF_HISTORY: &str = "performance_metrics_history";

/// Map every character outside `[A-Za-z0-9._-]` to `_`.
///
/// Deterministic and total. Raw keys that differ only in disallowed
/// characters collide after sanitization; callers pick raw keys that stay
/// distinguishable.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Hex-encoded SHA-256 digest.
pub fn digest_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Key for a memoized query result: `query:<hash>` over the statement and
/// its serialized parameters.
pub fn query_key(statement: &str, params: &[Value]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(statement.as_bytes());
    for param in params {
        hasher.update(param.to_string().as_bytes());
    }
    format!("query:{}", hex::encode(hasher.finalize()))
}

/// Key for a memoized configuration lookup: `config:<dotted.path>`.
pub fn config_key(path: &str) -> String {
    format!("config:{path}")
}
