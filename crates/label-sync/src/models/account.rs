//! Account identity used to key every piece of per-account sync state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite key of an account and its active mailbox address
///
/// Switching mailboxes under one account yields a different key, so cached
/// counts of one mailbox are never served for another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    /// Account identifier assigned by the backend
    pub account_id: String,
    /// Mailbox address currently active for the account
    pub mailbox: String,
}

impl AccountKey {
    pub fn new(account_id: impl Into<String>, mailbox: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            mailbox: mailbox.into().trim().to_lowercase(),
        }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account_id, self.mailbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_is_normalized() {
        let a = AccountKey::new("acct-1", " Me@Example.com ");
        let b = AccountKey::new("acct-1", "me@example.com");
        assert_eq!(a, b);
    }

    #[test]
    fn test_mailboxes_are_distinct_keys() {
        let a = AccountKey::new("acct-1", "me@example.com");
        let b = AccountKey::new("acct-1", "team@example.com");
        assert_ne!(a, b);
    }

    #[test]
    fn test_display() {
        let key = AccountKey::new("acct-1", "me@example.com");
        assert_eq!(key.to_string(), "acct-1:me@example.com");
    }
}
