//! Label model representing a mailbox label/folder and its counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Unique identifier for a label (opaque and stable across fetches)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelId(pub String);

impl LabelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Well-known system labels
    pub const INBOX: &'static str = "INBOX";
    pub const SENT: &'static str = "SENT";
    pub const DRAFTS: &'static str = "DRAFT";
    pub const TRASH: &'static str = "TRASH";
    pub const SPAM: &'static str = "SPAM";
    pub const STARRED: &'static str = "STARRED";
    pub const IMPORTANT: &'static str = "IMPORTANT";
    pub const UNREAD: &'static str = "UNREAD";
}

impl From<String> for LabelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LabelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a label is predefined by the provider or created by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabelKind {
    System,
    User,
}

/// Visibility of a label in the label list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LabelListVisibility {
    #[default]
    Show,
    ShowIfUnread,
    Hide,
}

/// Visibility of the label's chip on messages in a message list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessageListVisibility {
    #[default]
    Show,
    Hide,
}

/// List visibility flags carried by every label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelVisibility {
    pub label_list: LabelListVisibility,
    pub message_list: MessageListVisibility,
}

/// The four counters tracked per label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelCounters {
    pub messages_total: u32,
    pub messages_unread: u32,
    pub threads_total: u32,
    pub threads_unread: u32,
}

/// A mail label (folder) with its counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    /// Label ID (e.g., "INBOX", "SENT", "Label_123")
    pub id: LabelId,
    /// Display name
    pub name: String,
    /// System or user label
    pub kind: LabelKind,
    /// Number of messages with this label
    pub messages_total: u32,
    /// Number of unread messages
    pub messages_unread: u32,
    /// Number of threads with this label
    pub threads_total: u32,
    /// Number of threads with at least one unread message
    pub threads_unread: u32,
    /// Where the label is shown
    #[serde(default)]
    pub visibility: LabelVisibility,
}

impl LabelRecord {
    /// Create a new user label
    pub fn new(id: impl Into<LabelId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: LabelKind::User,
            messages_total: 0,
            messages_unread: 0,
            threads_total: 0,
            threads_unread: 0,
            visibility: LabelVisibility::default(),
        }
    }

    /// Create a system label
    pub fn system(id: impl Into<LabelId>, name: impl Into<String>) -> Self {
        Self {
            kind: LabelKind::System,
            ..Self::new(id, name)
        }
    }

    /// Builder method to set the total message count
    pub fn with_messages_total(mut self, count: u32) -> Self {
        self.messages_total = count;
        self
    }

    /// Builder method to set the unread message count
    pub fn with_messages_unread(mut self, count: u32) -> Self {
        self.messages_unread = count;
        self
    }

    /// Builder method to set the total thread count
    pub fn with_threads_total(mut self, count: u32) -> Self {
        self.threads_total = count;
        self
    }

    /// Builder method to set the unread thread count
    pub fn with_threads_unread(mut self, count: u32) -> Self {
        self.threads_unread = count;
        self
    }

    pub fn is_system(&self) -> bool {
        self.kind == LabelKind::System
    }

    pub fn is_user(&self) -> bool {
        self.kind == LabelKind::User
    }

    pub fn counters(&self) -> LabelCounters {
        LabelCounters {
            messages_total: self.messages_total,
            messages_unread: self.messages_unread,
            threads_total: self.threads_total,
            threads_unread: self.threads_unread,
        }
    }

    pub fn set_counters(&mut self, counters: LabelCounters) {
        self.messages_total = counters.messages_total;
        self.messages_unread = counters.messages_unread;
        self.threads_total = counters.threads_total;
        self.threads_unread = counters.threads_unread;
    }
}

/// An ordered set of labels for one account
///
/// `hydrated` is derived: it holds iff every user label has had its detail
/// fetched at least once since the set was built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSet {
    /// Labels in the order the remote source returned them
    pub labels: Vec<LabelRecord>,
    /// When the list was last fetched authoritatively
    pub fetched_at: DateTime<Utc>,
    /// User labels whose detail has been fetched
    hydrated_ids: HashSet<LabelId>,
}

impl LabelSet {
    /// Build a fresh, unhydrated set
    pub fn new(labels: Vec<LabelRecord>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            labels,
            fetched_at,
            hydrated_ids: HashSet::new(),
        }
    }

    pub fn get(&self, id: &LabelId) -> Option<&LabelRecord> {
        self.labels.iter().find(|l| &l.id == id)
    }

    pub fn get_mut(&mut self, id: &LabelId) -> Option<&mut LabelRecord> {
        self.labels.iter_mut().find(|l| &l.id == id)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Whether every user label has been hydrated
    pub fn is_hydrated(&self) -> bool {
        self.labels
            .iter()
            .filter(|l| l.is_user())
            .all(|l| self.hydrated_ids.contains(&l.id))
    }

    pub fn is_label_hydrated(&self, id: &LabelId) -> bool {
        self.hydrated_ids.contains(id)
    }

    /// User labels still waiting for their detail fetch, in list order
    pub fn unhydrated_user_labels(&self) -> Vec<LabelId> {
        self.labels
            .iter()
            .filter(|l| l.is_user() && !self.hydrated_ids.contains(&l.id))
            .map(|l| l.id.clone())
            .collect()
    }

    /// Replace a label with its detailed record and mark it hydrated
    ///
    /// Returns false when the label is no longer part of the set.
    pub fn apply_detail(&mut self, detail: LabelRecord) -> bool {
        let Some(existing) = self.get_mut(&detail.id) else {
            return false;
        };
        let id = detail.id.clone();
        *existing = detail;
        self.hydrated_ids.insert(id);
        true
    }

    /// Forget which labels were hydrated
    pub fn clear_hydration(&mut self) {
        self.hydrated_ids.clear();
    }

    /// Replace system labels with fresh records, keeping user labels as they are
    ///
    /// System labels that disappeared upstream are dropped, new ones are appended.
    pub fn merge_system_records(&mut self, fresh: Vec<LabelRecord>) {
        let mut fresh: Vec<LabelRecord> = fresh.into_iter().filter(|l| l.is_system()).collect();

        self.labels.retain_mut(|label| {
            if label.is_user() {
                return true;
            }
            match fresh.iter().position(|f| f.id == label.id) {
                Some(pos) => {
                    *label = fresh.remove(pos);
                    true
                }
                None => false,
            }
        });

        self.labels.extend(fresh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_set() -> LabelSet {
        LabelSet::new(
            vec![
                LabelRecord::system(LabelId::INBOX, "Inbox").with_messages_unread(3),
                LabelRecord::new("Label_1", "Project X").with_messages_unread(10),
                LabelRecord::new("Label_2", "Receipts"),
            ],
            Utc::now(),
        )
    }

    #[test]
    fn test_label_kinds() {
        let inbox = LabelRecord::system(LabelId::INBOX, "Inbox");
        let custom = LabelRecord::new("Label_1", "Custom");
        assert!(inbox.is_system());
        assert!(custom.is_user());
    }

    #[test]
    fn test_hydration_tracking() {
        let mut set = make_set();
        assert!(!set.is_hydrated());
        assert_eq!(set.unhydrated_user_labels().len(), 2);

        assert!(set.apply_detail(LabelRecord::new("Label_1", "Project X").with_messages_unread(12)));
        assert!(set.is_label_hydrated(&LabelId::new("Label_1")));
        assert!(!set.is_hydrated());

        assert!(set.apply_detail(LabelRecord::new("Label_2", "Receipts")));
        assert!(set.is_hydrated());
        assert_eq!(set.get(&LabelId::new("Label_1")).unwrap().messages_unread, 12);
    }

    #[test]
    fn test_apply_detail_unknown_label() {
        let mut set = make_set();
        assert!(!set.apply_detail(LabelRecord::new("Label_9", "Gone")));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_set_without_user_labels_is_hydrated() {
        let set = LabelSet::new(vec![LabelRecord::system(LabelId::SENT, "Sent")], Utc::now());
        assert!(set.is_hydrated());
    }

    #[test]
    fn test_merge_system_records_keeps_user_labels() {
        let mut set = make_set();
        set.apply_detail(LabelRecord::new("Label_1", "Project X").with_messages_unread(10));

        set.merge_system_records(vec![
            LabelRecord::system(LabelId::INBOX, "Inbox").with_messages_unread(4),
            LabelRecord::system(LabelId::SENT, "Sent"),
            // user records in a system-only merge are ignored
            LabelRecord::new("Label_1", "Project X").with_messages_unread(99),
        ]);

        assert_eq!(set.get(&LabelId::new(LabelId::INBOX)).unwrap().messages_unread, 4);
        assert!(set.get(&LabelId::new(LabelId::SENT)).is_some());
        assert_eq!(set.get(&LabelId::new("Label_1")).unwrap().messages_unread, 10);
        assert!(set.is_label_hydrated(&LabelId::new("Label_1")));
    }

    #[test]
    fn test_counters_roundtrip() {
        let mut label = LabelRecord::new("Label_1", "Project X")
            .with_messages_total(8)
            .with_messages_unread(2)
            .with_threads_total(5)
            .with_threads_unread(1);
        let mut counters = label.counters();
        counters.messages_unread = 0;
        label.set_counters(counters);
        assert_eq!(label.messages_unread, 0);
        assert_eq!(label.threads_total, 5);
    }
}
