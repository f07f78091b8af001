//! Keyed cache indirection with TTL.
//!
//! Every expensive or externally-dependent computation in the services layer
//! goes through [`CacheStore`]: sanitized keys, TTL expiry, batch operations,
//! and compute-or-fetch memoization over a pluggable [`CacheBackend`].
//!
//! The store is fail-open: backend trouble is logged and treated as a miss,
//! so callers always get a value even with the backend down. There is no
//! locking and no single-flight coordination. Concurrent misses on one key
//! each run their producer (a cache stampede) and the last write wins;
//! callers that need single-flight semantics coordinate externally.

mod backend;
mod fs;
pub mod key;
mod memory;
mod redis;
mod store;

pub use backend::{BackendError, CacheBackend};
pub use fs::FsBackend;
pub use memory::MemoryBackend;
pub use redis::RedisBackend;
pub use store::CacheStore;
