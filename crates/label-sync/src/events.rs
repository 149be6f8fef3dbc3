//! Lifecycle events
//!
//! The surrounding application publishes account and message lifecycle
//! events on an [`EventBus`]. An attached [`SyncEngine`] turns them into
//! invalidations, overlay deltas and narrow system-label refreshes.

use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use crate::actions::LabelAction;
use crate::models::{AccountKey, LabelId};
use crate::sync::{RefreshOptions, SyncEngine};

/// Default number of events buffered per subscriber
pub const DEFAULT_CAPACITY: usize = 256;

/// Something happened that affects label counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// The active account changed
    AccountSwitched {
        previous: Option<AccountKey>,
        current: AccountKey,
    },
    DraftCreated {
        account: AccountKey,
    },
    DraftDeleted {
        account: AccountKey,
    },
    /// A message was marked read or unread
    MessageReadStateChanged {
        account: AccountKey,
        label_ids: Vec<LabelId>,
        unread: bool,
    },
    /// A message was moved from one set of labels to another
    MessageMoved {
        account: AccountKey,
        from: Vec<LabelId>,
        to: Vec<LabelId>,
        unread: bool,
    },
}

/// Broadcast channel for lifecycle events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event, returning how many subscribers will see it
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!("No subscribers for {:?}", event);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SyncEngine {
    /// Apply one lifecycle event and wait for any refresh it causes
    pub async fn handle_event(&self, event: LifecycleEvent) {
        if let Some(refresh) = self.dispatch_event(event) {
            refresh.await;
        }
    }

    /// Apply the local effects of an event right away
    ///
    /// Invalidations and overlay deltas are applied before this returns. A
    /// refresh the event calls for is dispatched and returned for the caller
    /// to await.
    pub fn dispatch_event(&self, event: LifecycleEvent) -> Option<BoxFuture<'static, ()>> {
        match event {
            LifecycleEvent::AccountSwitched { previous, current } => {
                if let Some(previous) = previous {
                    self.invalidate(&previous);
                }
                Some(self.dispatch_logged(&current, RefreshOptions::default()))
            }
            LifecycleEvent::DraftCreated { account } => {
                self.apply_delta(
                    &account,
                    &[LabelId::new(LabelId::DRAFTS)],
                    LabelAction::Added { unread: false },
                );
                Some(self.dispatch_logged(&account, RefreshOptions::system_only()))
            }
            LifecycleEvent::DraftDeleted { account } => {
                self.apply_delta(
                    &account,
                    &[LabelId::new(LabelId::DRAFTS)],
                    LabelAction::Removed { unread: false },
                );
                Some(self.dispatch_logged(&account, RefreshOptions::system_only()))
            }
            LifecycleEvent::MessageReadStateChanged {
                account,
                label_ids,
                unread,
            } => {
                let action = if unread {
                    LabelAction::MarkUnread
                } else {
                    LabelAction::MarkRead
                };
                self.apply_delta(&account, &label_ids, action);
                None
            }
            LifecycleEvent::MessageMoved {
                account,
                from,
                to,
                unread,
            } => {
                self.apply_delta(&account, &from, LabelAction::Removed { unread });
                self.apply_delta(&account, &to, LabelAction::Added { unread });
                None
            }
        }
    }

    fn dispatch_logged(
        &self,
        account: &AccountKey,
        options: RefreshOptions,
    ) -> BoxFuture<'static, ()> {
        let refresh = self.dispatch_refresh(account, options);
        let account = account.clone();
        async move {
            if let Err(e) = refresh.await {
                warn!("Event-driven label refresh for {} failed: {}", account, e);
            }
        }
        .boxed()
    }

    /// Subscribe to `bus` and handle its events on a background task
    ///
    /// Refreshes run alongside the receive loop, so deltas keep being applied
    /// while a slow refresh is outstanding. If the listener falls behind and
    /// events are dropped, every cached account is force refreshed. The task
    /// ends once every sender of the bus is dropped and outstanding refreshes
    /// have settled.
    pub fn attach(&self, bus: &EventBus) -> JoinHandle<()> {
        let mut events = bus.subscribe();
        let engine = self.clone();

        tokio::spawn(async move {
            let mut refreshes = JoinSet::new();
            loop {
                match events.recv().await {
                    Ok(event) => {
                        debug!("Handling {:?}", event);
                        if let Some(refresh) = engine.dispatch_event(event) {
                            refreshes.spawn(refresh);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let accounts = engine.cached_accounts();
                        warn!(
                            "Label sync listener lagged, skipped {} event(s); resyncing {} account(s)",
                            skipped,
                            accounts.len()
                        );
                        for account in accounts {
                            refreshes.spawn(engine.dispatch_logged(&account, RefreshOptions::force()));
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event bus closed, stopping label sync listener");
                        break;
                    }
                }
                while refreshes.try_join_next().is_some() {}
            }
            while refreshes.join_next().await.is_some() {}
        })
    }
}
