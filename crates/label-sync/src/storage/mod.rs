//! In-memory storage for fetched label metadata
//!
//! Nothing is persisted: the cache lives as long as the engine that owns it.

mod cache;

pub use cache::{CachedLabels, TtlCache};
