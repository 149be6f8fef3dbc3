//! Label sync crate - Folder count synchronization for mail clients
//!
//! This crate keeps a local view of per-label message and thread counters
//! consistent with a remote source of truth:
//! - Domain models (LabelRecord, LabelSet, AccountKey)
//! - Remote label source trait and an in-memory implementation
//! - TTL cache of label sets per account
//! - Request coalescing with a post-success cooldown
//! - Batched, rate-limit aware hydration of user label counters
//! - Optimistic counter overlay for local actions
//! - Sync engine, session gate and lifecycle event bus
//!
//! Everything is held in memory; nothing is persisted.

pub mod actions;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod session;
pub mod source;
pub mod storage;
pub mod sync;

pub use actions::{CounterDelta, DeltaOverlay, LabelAction, display_value};
pub use config::EngineConfig;
pub use error::SyncError;
pub use events::{EventBus, LifecycleEvent};
pub use models::{
    AccountKey, LabelCounters, LabelId, LabelKind, LabelListVisibility, LabelRecord, LabelSet,
    LabelVisibility, MessageListVisibility,
};
pub use session::{SessionGate, SessionState};
pub use source::{InMemoryLabelSource, RemoteError, RemoteLabelSource, SourceCalls};
pub use storage::{CachedLabels, TtlCache};
pub use sync::{
    // Engine
    RefreshOptions, RefreshOutcome, SyncEngine, SyncEngineBuilder, SyncPhase, SyncStatus,
    // Hydration
    HydrationStats,
    // Coalescing and timing
    Admission, Clock, InFlightRegistry, ManualClock, SystemClock, cooldown_elapsed, is_fresh,
};
