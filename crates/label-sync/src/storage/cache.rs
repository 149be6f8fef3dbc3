//! Per-account label cache with time-based freshness
//!
//! Entries never expire out of the map: a stale entry is still returned
//! (flagged as not fresh) so callers can fall back to it while a refresh
//! is in progress.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::models::{AccountKey, LabelId, LabelRecord, LabelSet};
use crate::sync::timing::is_fresh;

/// A cached label set together with its freshness at read time
#[derive(Debug, Clone)]
pub struct CachedLabels {
    pub labels: LabelSet,
    pub is_fresh: bool,
}

/// In-memory TTL cache of label sets, one entry per account key
pub struct TtlCache {
    ttl: Duration,
    entries: RwLock<HashMap<AccountKey, LabelSet>>,
}

impl TtlCache {
    /// Create an empty cache whose entries stay fresh for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<AccountKey, LabelSet>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<AccountKey, LabelSet>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the stored set and whether it is still fresh at `now`
    pub fn get(&self, account: &AccountKey, now: DateTime<Utc>) -> Option<CachedLabels> {
        self.read().get(account).map(|set| CachedLabels {
            labels: set.clone(),
            is_fresh: is_fresh(set.fetched_at, now, self.ttl),
        })
    }

    pub fn contains(&self, account: &AccountKey) -> bool {
        self.read().contains_key(account)
    }

    /// Replace the entry with a freshly fetched, unhydrated list
    pub fn put(&self, account: &AccountKey, labels: Vec<LabelRecord>, fetched_at: DateTime<Utc>) {
        self.write()
            .insert(account.clone(), LabelSet::new(labels, fetched_at));
    }

    /// Replace only system labels of the existing entry
    ///
    /// User labels keep their counters and hydration state and `fetched_at`
    /// is left alone. Without an existing entry the whole list is stored,
    /// unhydrated. Returns whether an existing entry was merged into.
    pub fn merge_system_only(
        &self,
        account: &AccountKey,
        fresh: Vec<LabelRecord>,
        fetched_at: DateTime<Utc>,
    ) -> bool {
        let mut entries = self.write();
        match entries.get_mut(account) {
            Some(set) => {
                set.merge_system_records(fresh);
                true
            }
            None => {
                entries.insert(account.clone(), LabelSet::new(fresh, fetched_at));
                false
            }
        }
    }

    /// Store a label's detailed record and mark it hydrated
    ///
    /// Returns false if there is no entry or the label is no longer listed.
    pub fn apply_detail(&self, account: &AccountKey, detail: LabelRecord) -> bool {
        self.write()
            .get_mut(account)
            .is_some_and(|set| set.apply_detail(detail))
    }

    /// User labels of an entry that still need hydration
    pub fn unhydrated_user_labels(&self, account: &AccountKey) -> Vec<LabelId> {
        self.read()
            .get(account)
            .map(LabelSet::unhydrated_user_labels)
            .unwrap_or_default()
    }

    pub fn is_label_hydrated(&self, account: &AccountKey, label_id: &LabelId) -> bool {
        self.read()
            .get(account)
            .is_some_and(|set| set.is_label_hydrated(label_id))
    }

    /// Forget hydration markers but keep the data as a fallback
    pub fn clear_hydration(&self, account: &AccountKey) {
        if let Some(set) = self.write().get_mut(account) {
            set.clear_hydration();
        }
    }

    /// Drop one account's entry
    pub fn clear(&self, account: &AccountKey) {
        self.write().remove(account);
    }

    /// Drop every entry
    pub fn clear_all(&self) {
        self.write().clear();
    }

    /// Accounts with an entry, fresh or stale
    pub fn accounts(&self) -> Vec<AccountKey> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const TTL: Duration = Duration::from_secs(300);

    fn account() -> AccountKey {
        AccountKey::new("acct-1", "me@example.com")
    }

    fn labels() -> Vec<LabelRecord> {
        vec![
            LabelRecord::system(LabelId::INBOX, "Inbox").with_messages_unread(3),
            LabelRecord::new("Label_1", "Project X").with_messages_unread(10),
        ]
    }

    #[test]
    fn test_get_missing() {
        let cache = TtlCache::new(TTL);
        assert!(cache.get(&account(), Utc::now()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_and_freshness() {
        let cache = TtlCache::new(TTL);
        let fetched_at = Utc::now();
        cache.put(&account(), labels(), fetched_at);

        let just_before = fetched_at + TimeDelta::seconds(300) - TimeDelta::milliseconds(1);
        let cached = cache.get(&account(), just_before).unwrap();
        assert!(cached.is_fresh);
        assert_eq!(cached.labels.len(), 2);

        let just_after = fetched_at + TimeDelta::seconds(300) + TimeDelta::milliseconds(1);
        let cached = cache.get(&account(), just_after).unwrap();
        assert!(!cached.is_fresh);
        // stale entries are still served as a fallback
        assert_eq!(cached.labels.len(), 2);
    }

    #[test]
    fn test_put_resets_fetched_at_and_hydration() {
        let cache = TtlCache::new(TTL);
        let first = Utc::now() - TimeDelta::minutes(10);
        cache.put(&account(), labels(), first);
        assert!(cache.apply_detail(&account(), LabelRecord::new("Label_1", "Project X")));

        let second = Utc::now();
        cache.put(&account(), labels(), second);
        let cached = cache.get(&account(), second).unwrap();
        assert_eq!(cached.labels.fetched_at, second);
        assert!(!cached.labels.is_hydrated());
    }

    #[test]
    fn test_merge_system_only() {
        let cache = TtlCache::new(TTL);
        let fetched_at = Utc::now() - TimeDelta::seconds(30);
        cache.put(&account(), labels(), fetched_at);
        cache.apply_detail(
            &account(),
            LabelRecord::new("Label_1", "Project X").with_messages_unread(10),
        );

        let merged = cache.merge_system_only(
            &account(),
            vec![
                LabelRecord::system(LabelId::INBOX, "Inbox").with_messages_unread(4),
                LabelRecord::new("Label_1", "Project X").with_messages_unread(0),
            ],
            Utc::now(),
        );
        assert!(merged);

        let set = cache.get(&account(), Utc::now()).unwrap().labels;
        assert_eq!(set.get(&LabelId::new(LabelId::INBOX)).unwrap().messages_unread, 4);
        assert_eq!(set.get(&LabelId::new("Label_1")).unwrap().messages_unread, 10);
        assert!(set.is_label_hydrated(&LabelId::new("Label_1")));
        assert_eq!(set.fetched_at, fetched_at);
    }

    #[test]
    fn test_merge_system_only_without_entry() {
        let cache = TtlCache::new(TTL);
        let merged = cache.merge_system_only(&account(), labels(), Utc::now());
        assert!(!merged);
        assert_eq!(cache.unhydrated_user_labels(&account()), vec![LabelId::new("Label_1")]);
    }

    #[test]
    fn test_clear_hydration_keeps_data() {
        let cache = TtlCache::new(TTL);
        cache.put(&account(), labels(), Utc::now());
        cache.apply_detail(&account(), LabelRecord::new("Label_1", "Project X"));
        assert!(cache.is_label_hydrated(&account(), &LabelId::new("Label_1")));

        cache.clear_hydration(&account());
        assert!(!cache.is_label_hydrated(&account(), &LabelId::new("Label_1")));
        assert!(cache.contains(&account()));
    }

    #[test]
    fn test_clear() {
        let cache = TtlCache::new(TTL);
        let other = AccountKey::new("acct-2", "other@example.com");
        cache.put(&account(), labels(), Utc::now());
        cache.put(&other, labels(), Utc::now());

        cache.clear(&account());
        assert!(!cache.contains(&account()));
        assert!(cache.contains(&other));
        assert_eq!(cache.accounts(), vec![other.clone()]);

        cache.clear_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_apply_detail_without_entry() {
        let cache = TtlCache::new(TTL);
        assert!(!cache.apply_detail(&account(), LabelRecord::new("Label_1", "Project X")));
    }
}
