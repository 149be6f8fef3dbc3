//! Sync machinery: timing, request coalescing, hydration and the engine

mod engine;
mod hydration;
mod inflight;
pub mod timing;

pub use engine::{
    RefreshOptions, RefreshOutcome, SyncEngine, SyncEngineBuilder, SyncPhase, SyncStatus,
};
pub use hydration::{DetailKey, HydrationHandle, HydrationPipeline, HydrationStats};
pub use inflight::{Admission, InFlightRegistry};
pub use timing::{Clock, ManualClock, SystemClock, cooldown_elapsed, is_fresh};
