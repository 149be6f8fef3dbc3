//! Label hydration
//!
//! The bulk label list only carries coarse counters for user labels. A
//! hydration run fetches per-label detail for every user label not yet
//! hydrated, in sequential batches with concurrent fetches inside a batch,
//! and writes each result into the cache as soon as it arrives.
//!
//! Rate-limited fetches are retried with linear backoff; any other failure
//! leaves the label at its coarse values. Failures never propagate out of a
//! run, they are only logged and counted.
//!
//! A run belongs to one cache generation. It is replaced when a newer
//! generation triggers and cancelled when its account is forgotten.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep};

use super::inflight::InFlightRegistry;
use super::timing::Clock;
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::models::{AccountKey, LabelId, LabelRecord};
use crate::source::RemoteLabelSource;
use crate::storage::TtlCache;

/// Handle to a running (or finished) hydration run
pub type HydrationHandle = Shared<BoxFuture<'static, HydrationStats>>;

/// Statistics from a hydration run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HydrationStats {
    /// Labels selected for hydration, summed over every pass
    pub candidates: usize,
    /// Number of batches dispatched
    pub batches: usize,
    /// Labels whose detail was stored
    pub hydrated: usize,
    /// Labels abandoned after an error
    pub failed: usize,
    /// Labels never attempted (deadline hit or cache entry dropped)
    pub skipped: usize,
    /// Retries caused by rate limiting
    pub rate_limited_retries: usize,
    /// Whether the run stopped at its deadline
    pub deadline_exceeded: bool,
    /// Duration of the run
    pub duration_ms: u64,
}

impl HydrationStats {
    /// Fold the stats of a follow-up pass into these
    fn absorb(&mut self, pass: HydrationStats) {
        self.candidates += pass.candidates;
        self.batches += pass.batches;
        self.hydrated += pass.hydrated;
        self.failed += pass.failed;
        self.skipped += pass.skipped;
        self.rate_limited_retries += pass.rate_limited_retries;
        self.deadline_exceeded |= pass.deadline_exceeded;
        self.duration_ms += pass.duration_ms;
    }
}

/// Coalescing key of a single label detail fetch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DetailKey {
    pub account: AccountKey,
    pub label_id: LabelId,
    pub generation: u64,
}

struct LabelOutcome {
    label_id: LabelId,
    retries: usize,
    result: Result<LabelRecord, SyncError>,
}

struct ActiveRun {
    id: u64,
    generation: u64,
    /// A refresh landed while this run was going; look for candidates again
    follow_up: bool,
    abort: AbortHandle,
    handle: HydrationHandle,
}

/// Background enrichment of coarse user-label counters
pub struct HydrationPipeline {
    source: Arc<dyn RemoteLabelSource>,
    cache: Arc<TtlCache>,
    details: InFlightRegistry<DetailKey, LabelRecord>,
    config: EngineConfig,
    runs: Mutex<HashMap<AccountKey, ActiveRun>>,
    next_run_id: AtomicU64,
}

impl HydrationPipeline {
    pub fn new(
        source: Arc<dyn RemoteLabelSource>,
        cache: Arc<TtlCache>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            cache,
            details: InFlightRegistry::new(config.cooldown, clock),
            config,
            runs: Mutex::new(HashMap::new()),
            next_run_id: AtomicU64::new(0),
        }
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<AccountKey, ActiveRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a run for `account` in the background
    ///
    /// If a run of the same generation is already active, nothing new is
    /// started: the active run does another pass over whatever is still
    /// unhydrated once it is done, and its handle is returned. A run of an
    /// older generation is aborted and replaced. Returns None when every user
    /// label is already hydrated.
    pub fn trigger(self: &Arc<Self>, account: &AccountKey, generation: u64) -> Option<HydrationHandle> {
        let mut runs = self.runs();

        if let Some(run) = runs.get_mut(account) {
            if run.generation == generation {
                debug!("Hydration already running for {}, queueing another pass", account);
                run.follow_up = true;
                return Some(run.handle.clone());
            }
            debug!(
                "Superseding hydration run {} for {} (generation {} -> {})",
                run.id, account, run.generation, generation
            );
            run.abort.abort();
            runs.remove(account);
        }

        let candidates = self.cache.unhydrated_user_labels(account);
        if candidates.is_empty() {
            return None;
        }

        let id = self.next_run_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            "Starting hydration run {} for {} ({} labels)",
            id,
            account,
            candidates.len()
        );

        let pipeline = Arc::clone(self);
        let run_account = account.clone();
        let task = tokio::spawn(async move {
            let mut stats = pipeline.run(&run_account, candidates, generation).await;
            while let Some(candidates) = pipeline.next_pass(&run_account, id) {
                sleep(pipeline.config.inter_batch_delay).await;
                stats.absorb(pipeline.run(&run_account, candidates, generation).await);
            }
            stats
        });
        let abort = task.abort_handle();

        let pipeline = Arc::clone(self);
        let run_account = account.clone();
        let handle = async move {
            match task.await {
                Ok(stats) => stats,
                Err(e) if e.is_cancelled() => {
                    debug!("Hydration run {} for {} was cancelled", id, run_account);
                    HydrationStats::default()
                }
                Err(e) => {
                    error!("Hydration run {} for {} failed: {}", id, run_account, e);
                    pipeline.finish(&run_account, id);
                    HydrationStats::default()
                }
            }
        }
        .boxed()
        .shared();

        runs.insert(
            account.clone(),
            ActiveRun {
                id,
                generation,
                follow_up: false,
                abort,
                handle: handle.clone(),
            },
        );
        Some(handle)
    }

    /// Handle of the active run for `account`, if any
    pub fn active(&self, account: &AccountKey) -> Option<HydrationHandle> {
        self.runs().get(account).map(|run| run.handle.clone())
    }

    pub fn is_running(&self, account: &AccountKey) -> bool {
        self.runs().contains_key(account)
    }

    /// Cancel the active run of `account` and drop its detail cooldowns
    ///
    /// The run stops at its next suspension point; details already in flight
    /// are discarded.
    pub fn forget(&self, account: &AccountKey) {
        if let Some(run) = self.runs().remove(account) {
            debug!("Cancelling hydration run {} for {}", run.id, account);
            run.abort.abort();
        }
        self.details.forget(|key| &key.account == account);
    }

    /// Candidates for another pass of run `id`, or None once it is done
    ///
    /// A run that is done unregisters here, under the same lock `trigger`
    /// takes, so a trigger either queues a pass or starts a new run.
    fn next_pass(&self, account: &AccountKey, id: u64) -> Option<Vec<LabelId>> {
        let mut runs = self.runs();
        let run = runs.get_mut(account).filter(|run| run.id == id)?;

        if run.follow_up {
            run.follow_up = false;
            let candidates = self.cache.unhydrated_user_labels(account);
            if !candidates.is_empty() {
                debug!(
                    "Hydration run {} for {} takes another pass ({} labels)",
                    id,
                    account,
                    candidates.len()
                );
                return Some(candidates);
            }
        }

        runs.remove(account);
        None
    }

    fn finish(&self, account: &AccountKey, id: u64) {
        let mut runs = self.runs();
        if runs.get(account).is_some_and(|run| run.id == id) {
            runs.remove(account);
        }
    }

    /// Hydrate `candidates` batch by batch
    pub async fn run(
        &self,
        account: &AccountKey,
        candidates: Vec<LabelId>,
        generation: u64,
    ) -> HydrationStats {
        let started = Instant::now();
        let mut stats = HydrationStats {
            candidates: candidates.len(),
            ..HydrationStats::default()
        };

        let batches: Vec<&[LabelId]> = candidates.chunks(self.config.batch_size).collect();
        let total_batches = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 {
                sleep(self.config.inter_batch_delay).await;
            }

            if let Some(deadline) = self.config.hydration_deadline
                && started.elapsed() >= deadline
            {
                let remaining = candidates.len() - index * self.config.batch_size;
                warn!(
                    "Hydration for {} hit its {:?} deadline, skipping {} label(s)",
                    account, deadline, remaining
                );
                stats.deadline_exceeded = true;
                stats.skipped += remaining;
                break;
            }

            if !self.cache.contains(account) {
                let remaining = candidates.len() - index * self.config.batch_size;
                debug!("Cache entry for {} dropped, stopping hydration", account);
                stats.skipped += remaining;
                break;
            }

            stats.batches += 1;
            debug!(
                "Hydrating batch {}/{} for {} ({} labels)",
                index + 1,
                total_batches,
                account,
                batch.len()
            );

            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .map(|label_id| self.hydrate_label(account, label_id, generation))
                .collect();

            while let Some(outcome) = in_flight.next().await {
                stats.rate_limited_retries += outcome.retries;
                match outcome.result {
                    Ok(detail) => {
                        if self.cache.apply_detail(account, detail) {
                            stats.hydrated += 1;
                        } else {
                            debug!(
                                "Label {} no longer cached for {}, dropping detail",
                                outcome.label_id, account
                            );
                            stats.skipped += 1;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "Failed to hydrate label {} for {}: {}",
                            outcome.label_id, account, e
                        );
                        stats.failed += 1;
                    }
                }
            }
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Hydration for {} done: {} hydrated, {} failed, {} skipped in {} batch(es), {}ms",
            account, stats.hydrated, stats.failed, stats.skipped, stats.batches, stats.duration_ms
        );
        stats
    }

    /// Fetch one label's detail, retrying while rate limited
    async fn hydrate_label(
        &self,
        account: &AccountKey,
        label_id: &LabelId,
        generation: u64,
    ) -> LabelOutcome {
        let mut retries = 0usize;

        loop {
            let key = DetailKey {
                account: account.clone(),
                label_id: label_id.clone(),
                generation,
            };
            let source = Arc::clone(&self.source);
            let fetch_account = account.clone();
            let fetch_label = label_id.clone();

            let result = self
                .details
                .coalesce(key, move || async move {
                    source
                        .get_label_detail(&fetch_account, &fetch_label)
                        .await
                        .map_err(SyncError::from)
                })
                .await;

            match result {
                Err(SyncError::RateLimited) if retries < self.config.max_rate_limit_retries as usize => {
                    retries += 1;
                    let delay = self.config.backoff_step * retries as u32;
                    debug!(
                        "Label {} rate limited, retry {} in {:?}",
                        label_id, retries, delay
                    );
                    sleep(delay).await;
                }
                result => {
                    return LabelOutcome {
                        label_id: label_id.clone(),
                        retries,
                        result,
                    };
                }
            }
        }
    }
}
