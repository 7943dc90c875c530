//! Server lifecycle state machine.
//!
//! # States
//! - Constructed: built, not yet listening
//! - Listening: accept loop running
//! - Stopped: shutdown attempted, resources released
//!
//! # State Transitions
//! ```text
//! Constructed → Listening → Stopped
//! Constructed → Stopped
//! ```
//! Transitions only move forward; a stopped server never listens again.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Constructed,
    Listening,
    Stopped,
}

/// Observable, forward-only lifecycle state.
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Constructed);
        Self { state }
    }

    pub fn current(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Move to `next` if it lies ahead of the current state.
    ///
    /// Returns `false` when the transition would go backwards or stay put.
    pub fn advance(&self, next: LifecycleState) -> bool {
        let advanced = self.state.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        });
        if advanced {
            tracing::debug!(state = ?next, "Lifecycle transition");
        }
        advanced
    }

    /// Wait until the state reaches `target` or moves past it.
    pub async fn reached(&self, target: LifecycleState) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state >= target).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
