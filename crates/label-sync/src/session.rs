//! Session readiness gate
//!
//! The engine only talks to the remote source once the surrounding
//! application says it may. The gate is re-evaluated on every refresh.

use std::sync::atomic::{AtomicBool, Ordering};

/// Whether label data may be loaded right now
pub trait SessionGate: Send + Sync {
    fn is_ready(&self) -> bool;
}

impl<F> SessionGate for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_ready(&self) -> bool {
        self()
    }
}

/// Gate built from three independently toggled conditions
#[derive(Debug, Default)]
pub struct SessionState {
    session_established: AtomicBool,
    account_selected: AtomicBool,
    loading_permitted: AtomicBool,
}

impl SessionState {
    /// A state with every condition unset
    pub fn new() -> Self {
        Self::default()
    }

    /// A state with every condition set
    pub fn ready() -> Self {
        let state = Self::new();
        state.set_session_established(true);
        state.set_account_selected(true);
        state.set_loading_permitted(true);
        state
    }

    pub fn set_session_established(&self, value: bool) {
        self.session_established.store(value, Ordering::SeqCst);
    }

    pub fn set_account_selected(&self, value: bool) {
        self.account_selected.store(value, Ordering::SeqCst);
    }

    /// Loading is withheld while the application's auth flow is in progress
    pub fn set_loading_permitted(&self, value: bool) {
        self.loading_permitted.store(value, Ordering::SeqCst);
    }
}

impl SessionGate for SessionState {
    fn is_ready(&self) -> bool {
        self.session_established.load(Ordering::SeqCst)
            && self.account_selected.load(Ordering::SeqCst)
            && self.loading_permitted.load(Ordering::SeqCst)
    }
}
