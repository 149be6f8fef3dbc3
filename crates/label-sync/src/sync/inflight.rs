//! Request coalescing
//!
//! At most one operation runs per key. Callers arriving while it is in flight
//! share its outcome. After a success, identical requests within the cooldown
//! are answered with that result instead of starting a new operation.
//!
//! Operations are spawned onto the runtime, so they settle (and unregister)
//! even if every waiter goes away.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use log::debug;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::timing::{Clock, cooldown_elapsed};
use crate::error::SyncError;

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, SyncError>>>;

struct Pending<T> {
    id: u64,
    outcome: SharedOutcome<T>,
}

struct Completed<T> {
    at: DateTime<Utc>,
    value: T,
}

struct RegistryState<K, T> {
    next_id: u64,
    pending: HashMap<K, Pending<T>>,
    completed: HashMap<K, Completed<T>>,
}

/// How a call to [`InFlightRegistry::coalesce`] was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The factory was invoked
    Started,
    /// An in-flight operation was joined
    Joined,
    /// The last successful result was reused
    CoolingDown,
}

/// Deduplicates concurrent identical operations
pub struct InFlightRegistry<K, T> {
    state: Arc<Mutex<RegistryState<K, T>>>,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, T> InFlightRegistry<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                next_id: 0,
                pending: HashMap::new(),
                completed: HashMap::new(),
            })),
            cooldown,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<K, T>> {
        lock_state(&self.state)
    }

    /// Run `factory` for `key` unless an identical operation is in flight or
    /// has just succeeded
    pub async fn coalesce<F, Fut>(&self, key: K, factory: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        self.coalesce_with_admission(key, factory).await.0
    }

    /// Like [`coalesce`](Self::coalesce), also reporting how the call was served
    pub async fn coalesce_with_admission<F, Fut>(
        &self,
        key: K,
        factory: F,
    ) -> (Result<T, SyncError>, Admission)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let (outcome, admission) = self.admit(key, factory);
        (outcome.await, admission)
    }

    /// Register a call for `key` right away and return its outcome
    ///
    /// The operation is started (or joined) before this returns; awaiting the
    /// outcome is optional.
    pub fn admit<F, Fut>(
        &self,
        key: K,
        factory: F,
    ) -> (BoxFuture<'static, Result<T, SyncError>>, Admission)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let mut state = self.lock();

        if let Some(pending) = state.pending.get(&key) {
            debug!("Joining in-flight request {:?}", key);
            return (pending.outcome.clone().boxed(), Admission::Joined);
        }

        if let Some(done) = state.completed.get(&key)
            && !cooldown_elapsed(Some(done.at), self.clock.now(), self.cooldown)
        {
            debug!("Request {:?} suppressed during cooldown", key);
            let value = done.value.clone();
            return (future::ready(Ok(value)).boxed(), Admission::CoolingDown);
        }

        state.next_id += 1;
        let id = state.next_id;
        let outcome = self.start(key.clone(), id, factory());
        state.pending.insert(
            key,
            Pending {
                id,
                outcome: outcome.clone(),
            },
        );
        (outcome.boxed(), Admission::Started)
    }

    /// Spawn the operation and wrap its handle so every waiter can share it
    fn start<Fut>(&self, key: K, id: u64, operation: Fut) -> SharedOutcome<T>
    where
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let clock = Arc::clone(&self.clock);
        let cooldown = self.cooldown;
        let settle_key = key.clone();

        let task = tokio::spawn(async move {
            let result = operation.await;
            settle(&state, &settle_key, id, result.as_ref().ok(), clock.now(), cooldown);
            result
        });

        let state = Arc::clone(&self.state);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    // the task died before settling
                    let mut state = lock_state(&state);
                    if state.pending.get(&key).is_some_and(|p| p.id == id) {
                        state.pending.remove(&key);
                    }
                    Err(SyncError::from(e))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Whether an operation is in flight for `key`
    pub fn is_pending(&self, key: &K) -> bool {
        self.lock().pending.contains_key(key)
    }

    /// Number of operations in flight
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Drop bookkeeping (in-flight registrations and cooldown results) for
    /// every key matching `predicate`
    ///
    /// Operations already running are not cancelled; they just stop being
    /// joinable.
    pub fn forget(&self, predicate: impl Fn(&K) -> bool) {
        let mut state = self.lock();
        state.pending.retain(|k, _| !predicate(k));
        state.completed.retain(|k, _| !predicate(k));
    }
}

fn lock_state<K, T>(state: &Mutex<RegistryState<K, T>>) -> MutexGuard<'_, RegistryState<K, T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Unregister a finished operation and remember its value if it succeeded
fn settle<K, T>(
    state: &Mutex<RegistryState<K, T>>,
    key: &K,
    id: u64,
    value: Option<&T>,
    now: DateTime<Utc>,
    cooldown: Duration,
) where
    K: Eq + Hash + Clone,
    T: Clone,
{
    let mut state = lock_state(state);
    if state.pending.get(key).is_some_and(|p| p.id == id) {
        state.pending.remove(key);
    }

    state
        .completed
        .retain(|_, done| !cooldown_elapsed(Some(done.at), now, cooldown));

    if let Some(value) = value
        && !cooldown.is_zero()
    {
        state.completed.insert(
            key.clone(),
            Completed {
                at: now,
                value: value.clone(),
            },
        );
    }
}
