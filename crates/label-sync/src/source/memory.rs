//! In-memory label source
//!
//! Serves scripted label lists and details, with optional latency and
//! injected failures. Used by the `labelwatch` harness and by tests in place
//! of a networked mail API.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use super::{RemoteError, RemoteLabelSource};
use crate::models::{AccountKey, LabelId, LabelRecord};

/// Snapshot of the calls a source has served
#[derive(Debug, Clone, Default)]
pub struct SourceCalls {
    /// Number of list calls
    pub list: usize,
    /// Detail calls in the order they started
    pub detail: Vec<(LabelId, Instant)>,
}

impl SourceCalls {
    /// Number of detail calls made for one label
    pub fn detail_count(&self, label_id: &LabelId) -> usize {
        self.detail.iter().filter(|(id, _)| id == label_id).count()
    }
}

#[derive(Default)]
struct SourceState {
    labels: HashMap<AccountKey, Vec<LabelRecord>>,
    details: HashMap<(AccountKey, LabelId), LabelRecord>,
    list_failures: VecDeque<RemoteError>,
    detail_failures: HashMap<LabelId, DetailFailure>,
    calls: SourceCalls,
}

struct DetailFailure {
    error: RemoteError,
    /// None fails forever
    remaining: Option<usize>,
}

/// Scriptable in-memory implementation of [`RemoteLabelSource`]
pub struct InMemoryLabelSource {
    state: Mutex<SourceState>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryLabelSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SourceState::default()),
            latency: Mutex::new(None),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Set the label list returned for an account
    pub fn set_labels(&self, account: &AccountKey, labels: Vec<LabelRecord>) {
        self.state().labels.insert(account.clone(), labels);
    }

    /// Set the detailed record returned for one label
    ///
    /// Without an explicit detail, the listed record is returned.
    pub fn set_detail(&self, account: &AccountKey, detail: LabelRecord) {
        self.state()
            .details
            .insert((account.clone(), detail.id.clone()), detail);
    }

    /// Update the counters of a listed label and of its detail, if present
    pub fn update_label(&self, account: &AccountKey, record: LabelRecord) {
        let mut state = self.state();
        if let Some(labels) = state.labels.get_mut(account) {
            match labels.iter_mut().find(|l| l.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => labels.push(record.clone()),
            }
        }
        let key = (account.clone(), record.id.clone());
        if state.details.contains_key(&key) {
            state.details.insert(key, record);
        }
    }

    /// Fail the next list call with `error`; queued failures are consumed in order
    pub fn fail_next_list(&self, error: RemoteError) {
        self.state().list_failures.push_back(error);
    }

    /// Fail every detail call for `label_id` with `error`
    pub fn fail_detail_always(&self, label_id: impl Into<LabelId>, error: RemoteError) {
        self.state().detail_failures.insert(
            label_id.into(),
            DetailFailure {
                error,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` detail calls for `label_id` with `error`
    pub fn fail_detail_times(&self, label_id: impl Into<LabelId>, times: usize, error: RemoteError) {
        self.state().detail_failures.insert(
            label_id.into(),
            DetailFailure {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Calls served so far
    pub fn calls(&self) -> SourceCalls {
        self.state().calls.clone()
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for InMemoryLabelSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteLabelSource for InMemoryLabelSource {
    async fn list_labels(&self, account: &AccountKey) -> Result<Vec<LabelRecord>, RemoteError> {
        let failure = {
            let mut state = self.state();
            state.calls.list += 1;
            state.list_failures.pop_front()
        };

        self.simulate_latency().await;

        if let Some(error) = failure {
            return Err(error);
        }

        let state = self.state();
        Ok(state.labels.get(account).cloned().unwrap_or_default())
    }

    async fn get_label_detail(
        &self,
        account: &AccountKey,
        label_id: &LabelId,
    ) -> Result<LabelRecord, RemoteError> {
        let failure = {
            let mut state = self.state();
            state.calls.detail.push((label_id.clone(), Instant::now()));

            match state.detail_failures.get_mut(label_id) {
                Some(failure) => match failure.remaining.as_mut() {
                    None => Some(failure.error.clone()),
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        Some(failure.error.clone())
                    }
                    Some(_) => None,
                },
                None => None,
            }
        };

        self.simulate_latency().await;

        if let Some(error) = failure {
            return Err(error);
        }

        let state = self.state();
        if let Some(detail) = state.details.get(&(account.clone(), label_id.clone())) {
            return Ok(detail.clone());
        }
        state
            .labels
            .get(account)
            .and_then(|labels| labels.iter().find(|l| &l.id == label_id))
            .cloned()
            .ok_or_else(|| RemoteError::other(format!("label {} not found", label_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn account() -> AccountKey {
        AccountKey::new("acct-1", "me@example.com")
    }

    #[tokio::test]
    async fn test_list_and_detail() {
        let source = InMemoryLabelSource::new();
        source.set_labels(
            &account(),
            vec![
                LabelRecord::system(LabelId::INBOX, "Inbox"),
                LabelRecord::new("Label_1", "Project X").with_messages_unread(1),
            ],
        );
        source.set_detail(
            &account(),
            LabelRecord::new("Label_1", "Project X").with_messages_unread(4),
        );

        let labels = assert_ok!(source.list_labels(&account()).await);
        assert_eq!(labels.len(), 2);

        let detail = assert_ok!(source.get_label_detail(&account(), &LabelId::new("Label_1")).await);
        assert_eq!(detail.messages_unread, 4);

        let inbox = assert_ok!(source.get_label_detail(&account(), &LabelId::new(LabelId::INBOX)).await);
        assert_eq!(inbox.name, "Inbox");

        let calls = source.calls();
        assert_eq!(calls.list, 1);
        assert_eq!(calls.detail.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_account_lists_nothing() {
        let source = InMemoryLabelSource::new();
        let labels = assert_ok!(source.list_labels(&account()).await);
        assert!(labels.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let source = InMemoryLabelSource::new();
        source.set_labels(&account(), vec![LabelRecord::new("Label_1", "Project X")]);
        source.fail_next_list(RemoteError::network("offline"));
        source.fail_detail_times("Label_1", 1, RemoteError::RateLimited);

        assert_err!(source.list_labels(&account()).await);
        assert_ok!(source.list_labels(&account()).await);

        let id = LabelId::new("Label_1");
        let first = source.get_label_detail(&account(), &id).await;
        assert_eq!(first, Err(RemoteError::RateLimited));
        assert_ok!(source.get_label_detail(&account(), &id).await);
        assert_eq!(source.calls().detail_count(&id), 2);
    }

    #[tokio::test]
    async fn test_update_label() {
        let source = InMemoryLabelSource::new();
        source.set_labels(&account(), vec![LabelRecord::new("Label_1", "Project X")]);
        source.update_label(
            &account(),
            LabelRecord::new("Label_1", "Project X").with_messages_unread(3),
        );

        let labels = assert_ok!(source.list_labels(&account()).await);
        assert_eq!(labels[0].messages_unread, 3);
    }
}
