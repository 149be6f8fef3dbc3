//! Domain models for label sync entities

mod account;
mod label;

pub use account::AccountKey;
pub use label::{
    LabelCounters, LabelId, LabelKind, LabelListVisibility, LabelRecord, LabelSet,
    LabelVisibility, MessageListVisibility,
};
