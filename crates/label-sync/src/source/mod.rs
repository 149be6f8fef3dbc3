//! Remote label source abstraction
//!
//! The engine never talks to a mail API directly; it goes through
//! [`RemoteLabelSource`], which returns coarse label lists and detailed
//! per-label counters. [`InMemoryLabelSource`] is a scriptable implementation
//! for tests and local runs.

mod memory;

use async_trait::async_trait;

use crate::models::{AccountKey, LabelId, LabelRecord};

pub use memory::{InMemoryLabelSource, SourceCalls};

/// Errors a remote label source can report
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("rate limited")]
    RateLimited,

    #[error("network error: {message}")]
    Network { message: String },

    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("remote error: {message}")]
    Other { message: String },
}

impl RemoteError {
    pub fn network(message: impl Into<String>) -> Self {
        RemoteError::Network {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        RemoteError::Other {
            message: message.into(),
        }
    }
}

/// Source of truth for label metadata
#[async_trait]
pub trait RemoteLabelSource: Send + Sync {
    /// List all labels of an account with coarse counters
    async fn list_labels(&self, account: &AccountKey) -> Result<Vec<LabelRecord>, RemoteError>;

    /// Fetch authoritative counters for a single label
    async fn get_label_detail(
        &self,
        account: &AccountKey,
        label_id: &LabelId,
    ) -> Result<LabelRecord, RemoteError>;
}
