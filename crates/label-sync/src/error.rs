//! Error types surfaced by the sync engine

use serde::Serialize;

use crate::source::RemoteError;

/// Errors reported by authoritative refreshes
///
/// `Clone` because one coalesced outcome is handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum SyncError {
    #[error("Rate limited by the remote label source")]
    RateLimited,

    #[error("Network error: {message}")]
    TransientNetwork { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Remote error: {message}")]
    Remote { message: String },

    #[error("Background task failed: {message}")]
    Task { message: String },
}

impl SyncError {
    /// Whether retrying the same request later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RateLimited | SyncError::TransientNetwork { .. })
    }
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::RateLimited => SyncError::RateLimited,
            RemoteError::Network { message } => SyncError::TransientNetwork { message },
            RemoteError::PermissionDenied { message } => SyncError::PermissionDenied { message },
            RemoteError::Other { message } => SyncError::Remote { message },
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_remote_error() {
        assert_eq!(SyncError::from(RemoteError::RateLimited), SyncError::RateLimited);
        assert_eq!(
            SyncError::from(RemoteError::network("connection reset")),
            SyncError::TransientNetwork {
                message: "connection reset".to_string()
            }
        );
    }

    #[test]
    fn test_retryable() {
        assert!(SyncError::RateLimited.is_retryable());
        assert!(!SyncError::Remote { message: "boom".into() }.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = SyncError::TransientNetwork {
            message: "timed out".into(),
        };
        assert_eq!(err.to_string(), "Network error: timed out");
    }
}
