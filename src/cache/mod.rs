//! Versioned response cache with strategy-based fetch routing.
//!
//! This module provides the cache engine:
//! - Named, versioned buckets of stored HTTP responses, one active at a time
//! - Atomic warm-up from a fixed asset manifest
//! - Cache-first / network-first routing with an offline fallback document
//! - Best-effort bucket writes that never affect the served response

mod manager;
mod storage;
mod traits;

pub use manager::{CacheManager, CachePolicy, Handled, Strategy, VersionInfo};
pub use storage::{BucketStore, MemoryStore, SqliteStore};
pub use traits::{CachedResponse, ServeSource, Served, StoredResponse};
