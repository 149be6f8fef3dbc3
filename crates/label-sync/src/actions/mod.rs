//! Label actions module
//!
//! Translates local actions (read/unread, moves, drafts) into counter deltas
//! and keeps them in an overlay until the remote source confirms them.

mod delta;
mod overlay;

pub use delta::{CounterDelta, LabelAction, display_value};
pub use overlay::DeltaOverlay;
