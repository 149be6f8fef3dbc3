//! Optimistic counter overlay
//!
//! Local actions are recorded as deltas and layered on top of cached counts
//! until an authoritative refresh makes them redundant. Every delta carries a
//! per-account sequence number: a refresh records the sequence watermark when
//! its fetch is dispatched and, on success, clears only deltas at or below
//! it. Deltas applied while the fetch was in flight survive.
//!
//! Application, clearing and overlaid reads all happen under one lock, so a
//! concurrently applied delta is never lost or observed half-applied.

use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{CounterDelta, LabelAction};
use crate::models::{AccountKey, LabelId, LabelSet};

#[derive(Debug, Clone)]
struct PendingDelta {
    seq: u64,
    label_id: LabelId,
    delta: CounterDelta,
}

#[derive(Debug, Default)]
struct AccountOverlay {
    /// Last issued sequence number, never reset
    last_seq: u64,
    pending: Vec<PendingDelta>,
}

impl AccountOverlay {
    fn sum(&self, label_id: &LabelId) -> CounterDelta {
        self.pending
            .iter()
            .filter(|p| &p.label_id == label_id)
            .fold(CounterDelta::default(), |acc, p| acc + p.delta)
    }

    fn overlay(&self, set: &mut LabelSet) {
        if self.pending.is_empty() {
            return;
        }
        for label in &mut set.labels {
            let delta = self.sum(&label.id);
            if !delta.is_zero() {
                label.set_counters(delta.apply_to(label.counters()));
            }
        }
    }
}

/// Short-lived local adjustments to label counters, per account
#[derive(Default)]
pub struct DeltaOverlay {
    accounts: Mutex<HashMap<AccountKey, AccountOverlay>>,
}

impl DeltaOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AccountKey, AccountOverlay>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `delta` to the running adjustment of a label
    ///
    /// Returns the sequence number assigned to the delta.
    pub fn apply(&self, account: &AccountKey, label_id: &LabelId, delta: CounterDelta) -> u64 {
        let mut accounts = self.lock();
        let overlay = accounts.entry(account.clone()).or_default();
        overlay.last_seq += 1;
        let seq = overlay.last_seq;
        if !delta.is_zero() {
            overlay.pending.push(PendingDelta {
                seq,
                label_id: label_id.clone(),
                delta,
            });
        }
        seq
    }

    /// Apply the delta implied by `action` to each label
    pub fn apply_action(&self, account: &AccountKey, label_ids: &[LabelId], action: LabelAction) {
        let delta = action.delta();
        for label_id in label_ids {
            self.apply(account, label_id, delta);
        }
        debug!(
            "Overlay {:?} on {} label(s) for {}",
            action,
            label_ids.len(),
            account
        );
    }

    /// Sequence number of the most recent delta for an account
    pub fn watermark(&self, account: &AccountKey) -> u64 {
        self.lock().get(account).map_or(0, |o| o.last_seq)
    }

    /// Sum of pending deltas for one label
    pub fn adjustment(&self, account: &AccountKey, label_id: &LabelId) -> CounterDelta {
        self.lock()
            .get(account)
            .map(|o| o.sum(label_id))
            .unwrap_or_default()
    }

    /// Run `store` and then clear deltas through `watermark`, atomically with
    /// respect to `apply` and overlaid reads
    pub fn settle<R>(&self, account: &AccountKey, watermark: u64, store: impl FnOnce() -> R) -> R {
        let mut accounts = self.lock();
        let result = store();
        let cleared = clear_matching(&mut accounts, account, |p| p.seq <= watermark);
        if cleared > 0 {
            debug!("Cleared {} overlay delta(s) for {}", cleared, account);
        }
        result
    }

    /// Like [`settle`](Self::settle), clearing only deltas of `label_ids`
    pub fn settle_labels<R>(
        &self,
        account: &AccountKey,
        label_ids: &[LabelId],
        watermark: u64,
        store: impl FnOnce() -> R,
    ) -> R {
        let mut accounts = self.lock();
        let result = store();
        let cleared = clear_matching(&mut accounts, account, |p| {
            p.seq <= watermark && label_ids.contains(&p.label_id)
        });
        if cleared > 0 {
            debug!("Cleared {} overlay delta(s) for {}", cleared, account);
        }
        result
    }

    /// Load a label set with `load` and layer pending deltas on top of it
    pub fn overlay_with(
        &self,
        account: &AccountKey,
        load: impl FnOnce() -> Option<LabelSet>,
    ) -> Option<LabelSet> {
        let accounts = self.lock();
        let mut set = load()?;
        if let Some(overlay) = accounts.get(account) {
            overlay.overlay(&mut set);
        }
        Some(set)
    }

    /// Forget an account entirely, including its sequence counter
    pub fn remove(&self, account: &AccountKey) {
        self.lock().remove(account);
    }
}

fn clear_matching(
    accounts: &mut HashMap<AccountKey, AccountOverlay>,
    account: &AccountKey,
    matches: impl Fn(&PendingDelta) -> bool,
) -> usize {
    let Some(overlay) = accounts.get_mut(account) else {
        return 0;
    };
    let before = overlay.pending.len();
    overlay.pending.retain(|p| !matches(p));
    before - overlay.pending.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LabelCounters, LabelRecord};
    use chrono::Utc;

    fn account() -> AccountKey {
        AccountKey::new("acct-1", "me@example.com")
    }

    fn project_x() -> LabelId {
        LabelId::new("Label_1")
    }

    fn unread(n: u32) -> LabelCounters {
        LabelCounters {
            messages_unread: n,
            ..LabelCounters::default()
        }
    }

    #[test]
    fn test_deltas_accumulate() {
        let overlay = DeltaOverlay::new();
        overlay.apply_action(&account(), &[project_x()], LabelAction::MarkUnread);
        overlay.apply_action(&account(), &[project_x()], LabelAction::MarkUnread);

        let delta = overlay.adjustment(&account(), &project_x());
        assert_eq!(delta.apply_to(unread(5)).messages_unread, 7);
    }

    #[test]
    fn test_adjustment_clamps_at_zero() {
        let overlay = DeltaOverlay::new();
        overlay.apply_action(&account(), &[project_x()], LabelAction::MarkRead);
        overlay.apply_action(&account(), &[project_x()], LabelAction::MarkRead);

        let delta = overlay.adjustment(&account(), &project_x());
        assert_eq!(delta.apply_to(unread(1)).messages_unread, 0);
    }

    #[test]
    fn test_accounts_are_isolated() {
        let overlay = DeltaOverlay::new();
        let other = AccountKey::new("acct-1", "team@example.com");
        overlay.apply_action(&account(), &[project_x()], LabelAction::MarkUnread);

        assert!(overlay.adjustment(&other, &project_x()).is_zero());
        assert_eq!(overlay.watermark(&other), 0);
    }

    #[test]
    fn test_settle_keeps_later_deltas() {
        let overlay = DeltaOverlay::new();
        overlay.apply_action(&account(), &[project_x()], LabelAction::MarkUnread);
        let watermark = overlay.watermark(&account());
        overlay.apply_action(&account(), &[project_x()], LabelAction::MarkUnread);

        overlay.settle(&account(), watermark, || ());
        assert_eq!(overlay.adjustment(&account(), &project_x()).messages_unread, 1);
    }

    #[test]
    fn test_settle_labels_only_clears_given_labels() {
        let overlay = DeltaOverlay::new();
        let drafts = LabelId::new(LabelId::DRAFTS);
        overlay.apply_action(&account(), &[project_x()], LabelAction::MarkUnread);
        overlay.apply_action(&account(), &[drafts.clone()], LabelAction::Added { unread: false });
        let watermark = overlay.watermark(&account());

        overlay.settle_labels(&account(), &[drafts.clone()], watermark, || ());
        assert!(overlay.adjustment(&account(), &drafts).is_zero());
        assert_eq!(overlay.adjustment(&account(), &project_x()).messages_unread, 1);
    }

    #[test]
    fn test_settle_keeps_sequence_monotonic() {
        let overlay = DeltaOverlay::new();
        overlay.apply_action(&account(), &[project_x()], LabelAction::MarkUnread);
        let before = overlay.watermark(&account());
        overlay.settle(&account(), before, || ());
        overlay.apply_action(&account(), &[project_x()], LabelAction::MarkUnread);
        assert!(overlay.watermark(&account()) > before);
    }

    #[test]
    fn test_settle_runs_store_then_clears() {
        let overlay = DeltaOverlay::new();
        overlay.apply_action(&account(), &[project_x()], LabelAction::MarkUnread);
        let watermark = overlay.watermark(&account());

        let stored = overlay.settle(&account(), watermark, || 42);
        assert_eq!(stored, 42);
        assert!(overlay.adjustment(&account(), &project_x()).is_zero());
    }

    #[test]
    fn test_overlay_with() {
        let overlay = DeltaOverlay::new();
        overlay.apply_action(&account(), &[project_x()], LabelAction::MarkUnread);

        let set = overlay
            .overlay_with(&account(), || {
                Some(LabelSet::new(
                    vec![
                        LabelRecord::new("Label_1", "Project X")
                            .with_messages_unread(2)
                            .with_threads_unread(1),
                        LabelRecord::new("Label_2", "Receipts").with_messages_unread(4),
                    ],
                    Utc::now(),
                ))
            })
            .unwrap();

        assert_eq!(set.get(&project_x()).unwrap().messages_unread, 3);
        assert_eq!(set.get(&project_x()).unwrap().threads_unread, 2);
        assert_eq!(set.get(&LabelId::new("Label_2")).unwrap().messages_unread, 4);

        assert!(overlay.overlay_with(&account(), || None).is_none());
    }
}
