//! Label actions and the counter adjustments they imply

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

use crate::models::LabelCounters;

/// A local action that changes the counters of the labels it touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelAction {
    /// A message in the label was marked read
    MarkRead,
    /// A message in the label was marked unread
    MarkUnread,
    /// A message entered the label (moved in, draft created)
    Added { unread: bool },
    /// A message left the label (moved out, draft deleted)
    Removed { unread: bool },
}

impl LabelAction {
    /// Resolve the action into per-counter adjustments for one label
    pub fn delta(self) -> CounterDelta {
        match self {
            LabelAction::MarkRead => CounterDelta {
                messages_unread: -1,
                threads_unread: -1,
                ..CounterDelta::default()
            },
            LabelAction::MarkUnread => CounterDelta {
                messages_unread: 1,
                threads_unread: 1,
                ..CounterDelta::default()
            },
            LabelAction::Added { unread } => {
                let unread = i64::from(unread);
                CounterDelta {
                    messages_total: 1,
                    messages_unread: unread,
                    threads_total: 1,
                    threads_unread: unread,
                }
            }
            LabelAction::Removed { unread } => {
                let unread = i64::from(unread);
                CounterDelta {
                    messages_total: -1,
                    messages_unread: -unread,
                    threads_total: -1,
                    threads_unread: -unread,
                }
            }
        }
    }
}

/// Signed adjustment for each label counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CounterDelta {
    pub messages_total: i64,
    pub messages_unread: i64,
    pub threads_total: i64,
    pub threads_unread: i64,
}

impl CounterDelta {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Layer the adjustment on top of `base`, clamping every counter at zero
    pub fn apply_to(&self, base: LabelCounters) -> LabelCounters {
        LabelCounters {
            messages_total: display_value(base.messages_total, self.messages_total),
            messages_unread: display_value(base.messages_unread, self.messages_unread),
            threads_total: display_value(base.threads_total, self.threads_total),
            threads_unread: display_value(base.threads_unread, self.threads_unread),
        }
    }
}

impl Add for CounterDelta {
    type Output = CounterDelta;

    fn add(self, rhs: CounterDelta) -> CounterDelta {
        CounterDelta {
            messages_total: self.messages_total + rhs.messages_total,
            messages_unread: self.messages_unread + rhs.messages_unread,
            threads_total: self.threads_total + rhs.threads_total,
            threads_unread: self.threads_unread + rhs.threads_unread,
        }
    }
}

impl AddAssign for CounterDelta {
    fn add_assign(&mut self, rhs: CounterDelta) {
        *self = *self + rhs;
    }
}

/// `max(0, base + delta)`, saturating at `u32::MAX`
pub fn display_value(base: u32, delta: i64) -> u32 {
    (i64::from(base) + delta).clamp(0, i64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_unread_delta() {
        let delta = LabelAction::MarkUnread.delta();
        assert_eq!(delta.messages_unread, 1);
        assert_eq!(delta.threads_unread, 1);
        assert_eq!(delta.messages_total, 0);
    }

    #[test]
    fn test_move_deltas_cancel_out() {
        let out = LabelAction::Removed { unread: true }.delta();
        let back = LabelAction::Added { unread: true }.delta();
        assert!((out + back).is_zero());
    }

    #[test]
    fn test_read_message_added_keeps_unread() {
        let delta = LabelAction::Added { unread: false }.delta();
        assert_eq!(delta.messages_total, 1);
        assert_eq!(delta.messages_unread, 0);
    }

    #[test]
    fn test_display_value_clamps_at_zero() {
        assert_eq!(display_value(1, -1), 0);
        assert_eq!(display_value(1, -2), 0);
        assert_eq!(display_value(5, 2), 7);
        assert_eq!(display_value(u32::MAX, 1), u32::MAX);
    }

    #[test]
    fn test_apply_to() {
        let base = LabelCounters {
            messages_total: 4,
            messages_unread: 1,
            threads_total: 3,
            threads_unread: 1,
        };
        let mut delta = LabelAction::MarkRead.delta();
        delta += LabelAction::MarkRead.delta();
        let shown = delta.apply_to(base);
        assert_eq!(shown.messages_unread, 0);
        assert_eq!(shown.threads_unread, 0);
        assert_eq!(shown.messages_total, 4);
    }
}
