//! Versioned cache stores for offline support.
//!
//! This module provides:
//! - Named cache stores mapping request identity to the last good response
//! - A SQLite backend that persists across runs, and an in-memory one
//! - A network-first fetch strategy that mirrors 200 responses into the
//!   current store and falls back to it when the network is unavailable

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, NetworkFirst};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource};
