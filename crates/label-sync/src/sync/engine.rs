//! Label sync engine
//!
//! [`SyncEngine`] owns the cache, the overlay, request coalescing and
//! hydration for every account it serves. It is cheap to clone; clones share
//! state.
//!
//! Per account the engine moves through `Empty -> Fetching -> Fresh -> Stale
//! -> Fetching -> ...`. `Fresh` becomes `Stale` purely by the TTL elapsing.
//!
//! Lock order: status, then overlay, then cache.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::hydration::{HydrationPipeline, HydrationStats};
use super::inflight::InFlightRegistry;
use super::timing::{Clock, SystemClock};
use crate::actions::{DeltaOverlay, LabelAction};
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::models::{AccountKey, LabelId, LabelSet};
use crate::session::SessionGate;
use crate::source::RemoteLabelSource;
use crate::storage::TtlCache;

/// Options of a label refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Bypass the fresh-cache shortcut and supersede earlier fetches
    pub force: bool,
    /// Only refresh system labels, leaving user labels untouched
    pub system_only: bool,
}

impl RefreshOptions {
    pub fn force() -> Self {
        Self {
            force: true,
            system_only: false,
        }
    }

    pub fn system_only() -> Self {
        Self {
            force: false,
            system_only: true,
        }
    }
}

/// What a refresh did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RefreshOutcome {
    /// The session was not ready or loading is not permitted
    Skipped,
    /// Served from a fresh cache entry
    Cached { hydrated: bool },
    /// A list fetch was applied to the cache
    Fetched { labels: usize, system_only: bool },
    /// The fetch completed after a newer refresh or an invalidation and was discarded
    Superseded,
}

/// Sync state of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncPhase {
    Empty,
    Fetching,
    Fresh { hydrated: bool },
    Stale,
}

/// Snapshot of an account's sync health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Error of the last authoritative fetch, cleared by the next success
    pub last_error: Option<SyncError>,
    /// Authoritative failures since the last success
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    /// The authoritative fetch failed repeatedly; cached data is likely stale
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListKey {
    account: AccountKey,
    system_only: bool,
    generation: u64,
}

#[derive(Debug, Default)]
struct AccountStatus {
    generation: u64,
    fetching: usize,
    last_error: Option<SyncError>,
    consecutive_failures: u32,
    last_success_at: Option<DateTime<Utc>>,
}

struct EngineInner {
    source: Arc<dyn RemoteLabelSource>,
    gate: Arc<dyn SessionGate>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    cache: Arc<TtlCache>,
    overlay: DeltaOverlay,
    lists: InFlightRegistry<ListKey, RefreshOutcome>,
    hydration: Arc<HydrationPipeline>,
    status: Mutex<HashMap<AccountKey, AccountStatus>>,
}

/// Builder for [`SyncEngine`]
pub struct SyncEngineBuilder {
    source: Arc<dyn RemoteLabelSource>,
    gate: Option<Arc<dyn SessionGate>>,
    clock: Option<Arc<dyn Clock>>,
    config: EngineConfig,
}

impl SyncEngineBuilder {
    /// Gate consulted before every refresh; without one the engine is always ready
    pub fn gate(mut self, gate: Arc<dyn SessionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> anyhow::Result<SyncEngine> {
        self.config.validate()?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let gate: Arc<dyn SessionGate> = match self.gate {
            Some(gate) => gate,
            None => Arc::new(|| true),
        };
        let cache = Arc::new(TtlCache::new(self.config.ttl));
        let hydration = Arc::new(HydrationPipeline::new(
            Arc::clone(&self.source),
            Arc::clone(&cache),
            self.config.clone(),
            Arc::clone(&clock),
        ));

        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                source: self.source,
                gate,
                lists: InFlightRegistry::new(self.config.cooldown, Arc::clone(&clock)),
                clock,
                config: self.config,
                cache,
                overlay: DeltaOverlay::new(),
                hydration,
                status: Mutex::new(HashMap::new()),
            }),
        })
    }
}

/// Keeps per-account label metadata in sync with a remote source
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn builder(source: Arc<dyn RemoteLabelSource>) -> SyncEngineBuilder {
        SyncEngineBuilder {
            source,
            gate: None,
            clock: None,
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Refresh the labels of an account
    ///
    /// Authoritative failures are returned and recorded as the account's last
    /// error; the cached entry and pending overlay deltas are kept.
    pub async fn refresh_labels(
        &self,
        account: &AccountKey,
        options: RefreshOptions,
    ) -> Result<RefreshOutcome, SyncError> {
        self.dispatch_refresh(account, options).await
    }

    /// Start a refresh now and return its outcome
    ///
    /// Everything up to the remote fetch happens before this returns: the gate
    /// check, the overlay watermark and the fetch registration. Deltas applied
    /// afterwards therefore survive the refresh, whether or not the returned
    /// future is awaited.
    pub fn dispatch_refresh(
        &self,
        account: &AccountKey,
        options: RefreshOptions,
    ) -> BoxFuture<'static, Result<RefreshOutcome, SyncError>> {
        let inner = &self.inner;

        // 1. Gate
        if !inner.gate.is_ready() {
            debug!("Session not ready, skipping label refresh for {}", account);
            return future::ready(Ok(RefreshOutcome::Skipped)).boxed();
        }

        // 2. Fresh cache shortcut
        if !options.force
            && !options.system_only
            && let Some(cached) = inner.cache.get(account, inner.clock.now())
            && cached.is_fresh
        {
            let hydrated = cached.labels.is_hydrated();
            debug!("Serving labels for {} from cache (hydrated: {})", account, hydrated);
            if !hydrated {
                inner.start_hydration(account);
            }
            return future::ready(Ok(RefreshOutcome::Cached { hydrated })).boxed();
        }

        // 3. A forced full refresh supersedes earlier fetches and hydration
        let generation = if options.force && !options.system_only {
            let generation = inner.bump_generation(account);
            inner.cache.clear_hydration(account);
            debug!("Forced label refresh for {} (generation {})", account, generation);
            generation
        } else {
            inner.generation(account)
        };

        // 4. Fetch, coalescing identical requests
        let watermark = inner.overlay.watermark(account);
        let key = ListKey {
            account: account.clone(),
            system_only: options.system_only,
            generation,
        };
        let fetch_inner = Arc::clone(inner);
        let fetch_account = account.clone();
        let (outcome, _) = inner.lists.admit(key, move || {
            let guard = FetchGuard::new(&fetch_inner, &fetch_account);
            async move {
                let result = fetch_inner
                    .fetch_and_apply(&fetch_account, options.system_only, generation, watermark)
                    .await;
                drop(guard);
                result
            }
        });

        let account = account.clone();
        async move {
            match outcome.await {
                Err(SyncError::PermissionDenied { message }) => {
                    debug!("Label list denied for {}: {}", account, message);
                    Ok(RefreshOutcome::Skipped)
                }
                result => result,
            }
        }
        .boxed()
    }

    /// Cached labels of an account with pending overlay deltas applied
    ///
    /// Never touches the network.
    pub fn read_labels(&self, account: &AccountKey) -> Option<LabelSet> {
        let inner = &self.inner;
        inner.overlay.overlay_with(account, || {
            inner
                .cache
                .get(account, inner.clock.now())
                .map(|cached| cached.labels)
        })
    }

    /// Record a local action against the given labels
    pub fn apply_delta(&self, account: &AccountKey, label_ids: &[LabelId], action: LabelAction) {
        self.inner.overlay.apply_action(account, label_ids, action);
    }

    /// Drop everything known about an account
    ///
    /// Fetches still in flight for the account are discarded when they land;
    /// its hydration run is cancelled.
    pub fn invalidate(&self, account: &AccountKey) {
        let inner = &self.inner;
        {
            let mut status = inner.status();
            let entry = status.entry(account.clone()).or_default();
            entry.generation += 1;
            entry.last_error = None;
            entry.consecutive_failures = 0;
            entry.last_success_at = None;
            inner.overlay.remove(account);
            inner.cache.clear(account);
        }
        inner.lists.forget(|key| &key.account == account);
        inner.hydration.forget(account);
        info!("Invalidated labels for {}", account);
    }

    /// Current sync state of an account
    pub fn status(&self, account: &AccountKey) -> SyncStatus {
        let inner = &self.inner;
        let status = inner.status();
        let entry = status.get(account);

        let phase = match entry {
            Some(entry) if entry.fetching > 0 => SyncPhase::Fetching,
            _ => match inner.cache.get(account, inner.clock.now()) {
                None => SyncPhase::Empty,
                Some(cached) if cached.is_fresh => SyncPhase::Fresh {
                    hydrated: cached.labels.is_hydrated(),
                },
                Some(_) => SyncPhase::Stale,
            },
        };

        let consecutive_failures = entry.map_or(0, |e| e.consecutive_failures);
        SyncStatus {
            phase,
            last_error: entry.and_then(|e| e.last_error.clone()),
            consecutive_failures,
            last_success_at: entry.and_then(|e| e.last_success_at),
            degraded: consecutive_failures >= inner.config.degraded_after_failures,
        }
    }

    /// Error of the last authoritative fetch for an account
    pub fn last_error(&self, account: &AccountKey) -> Option<SyncError> {
        self.inner
            .status()
            .get(account)
            .and_then(|e| e.last_error.clone())
    }

    /// Wait for the active hydration run of an account, if any
    pub async fn hydration_settled(&self, account: &AccountKey) -> Option<HydrationStats> {
        let handle = self.inner.hydration.active(account)?;
        Some(handle.await)
    }

    /// Accounts with cached labels
    pub fn cached_accounts(&self) -> Vec<AccountKey> {
        self.inner.cache.accounts()
    }

    /// Whether a hydration run is active for an account
    pub fn is_hydrating(&self, account: &AccountKey) -> bool {
        self.inner.hydration.is_running(account)
    }
}

impl EngineInner {
    fn status(&self) -> MutexGuard<'_, HashMap<AccountKey, AccountStatus>> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self, account: &AccountKey) -> u64 {
        self.status().get(account).map_or(0, |e| e.generation)
    }

    fn bump_generation(&self, account: &AccountKey) -> u64 {
        let mut status = self.status();
        let entry = status.entry(account.clone()).or_default();
        entry.generation += 1;
        entry.generation
    }

    fn start_hydration(self: &Arc<Self>, account: &AccountKey) {
        let generation = self.generation(account);
        self.hydration.trigger(account, generation);
    }

    async fn fetch_and_apply(
        self: Arc<Self>,
        account: &AccountKey,
        system_only: bool,
        generation: u64,
        watermark: u64,
    ) -> Result<RefreshOutcome, SyncError> {
        let fetched = self
            .source
            .list_labels(account)
            .await
            .map_err(SyncError::from);
        let now = self.clock.now();

        let mut status = self.status();
        let entry = status.entry(account.clone()).or_default();
        if entry.generation != generation {
            debug!(
                "Discarding label list for {} from generation {} (now {})",
                account, generation, entry.generation
            );
            return Ok(RefreshOutcome::Superseded);
        }

        let labels = match fetched {
            Ok(labels) => labels,
            Err(SyncError::PermissionDenied { message }) => {
                return Err(SyncError::PermissionDenied { message });
            }
            Err(e) => {
                entry.consecutive_failures += 1;
                entry.last_error = Some(e.clone());
                warn!(
                    "Failed to refresh labels for {} ({} consecutive failure(s)): {}",
                    account, entry.consecutive_failures, e
                );
                return Err(e);
            }
        };

        let count = labels.len();
        let hydrate = if system_only {
            let system_ids: Vec<LabelId> = labels
                .iter()
                .filter(|l| l.is_system())
                .map(|l| l.id.clone())
                .collect();
            let merged = self.overlay.settle_labels(account, &system_ids, watermark, || {
                self.cache.merge_system_only(account, labels, now)
            });
            debug!(
                "Merged {} system label(s) for {} (existing entry: {})",
                system_ids.len(),
                account,
                merged
            );
            false
        } else {
            self.overlay
                .settle(account, watermark, || self.cache.put(account, labels, now));
            true
        };

        entry.consecutive_failures = 0;
        entry.last_error = None;
        entry.last_success_at = Some(now);
        drop(status);

        info!(
            "Refreshed {} label(s) for {} ({})",
            count,
            account,
            if system_only { "system only" } else { "full" }
        );

        if hydrate {
            self.hydration.trigger(account, generation);
        }

        Ok(RefreshOutcome::Fetched {
            labels: count,
            system_only,
        })
    }
}

/// Marks an account as fetching for as long as it lives
struct FetchGuard {
    inner: Arc<EngineInner>,
    account: AccountKey,
}

impl FetchGuard {
    fn new(inner: &Arc<EngineInner>, account: &AccountKey) -> Self {
        inner
            .status()
            .entry(account.clone())
            .or_default()
            .fetching += 1;
        Self {
            inner: Arc::clone(inner),
            account: account.clone(),
        }
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if let Some(entry) = self.inner.status().get_mut(&self.account) {
            entry.fetching = entry.fetching.saturating_sub(1);
        }
    }
}
