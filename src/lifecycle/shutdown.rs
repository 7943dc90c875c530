//! Two-phase shutdown: graceful drain, then forced close.
//!
//! # Phases
//! ```text
//! Graceful: stop accepting → connections finish in-flight requests → released
//!     │ error (deadline exceeded)
//!     ▼
//! Forced:   abort every connection task → released (errors logged, not raised)
//! ```
//!
//! The accept loop and connection tasks observe the current [`ShutdownMode`]
//! through a [`ShutdownListener`].

use std::time::Duration;

use tokio::sync::watch;

use crate::net::ConnectionTracker;

/// How long the forced phase waits for aborted tasks to unwind.
const FORCE_CLOSE_WAIT: Duration = Duration::from_secs(1);

/// What running tasks are being asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownMode {
    Running,
    /// Stop accepting, let in-flight requests finish.
    Graceful,
    /// Drop everything now.
    Forced,
}

/// Graceful shutdown did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShutdownError {
    #[error("graceful shutdown timed out after {deadline:?} with {remaining} connection(s) open")]
    Timeout { deadline: Duration, remaining: usize },
}

/// Forced close did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloseError {
    #[error("{connections} connection(s) still open after forced close")]
    Lingering { connections: usize },
}

/// Which release strategy finished the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Graceful,
    Forced,
    /// Forced close ran but reported an error.
    Incomplete,
}

enum Phase {
    Graceful,
    Forced,
}

/// Coordinates the accept loop, its connections and the release protocol.
#[derive(Debug)]
pub struct ShutdownController {
    mode: watch::Sender<ShutdownMode>,
    accepting: watch::Sender<bool>,
    connections: ConnectionTracker,
}

impl ShutdownController {
    pub fn new(connections: ConnectionTracker) -> Self {
        let (mode, _) = watch::channel(ShutdownMode::Running);
        let (accepting, _) = watch::channel(false);
        Self {
            mode,
            accepting,
            connections,
        }
    }

    pub fn connections(&self) -> &ConnectionTracker {
        &self.connections
    }

    pub fn mode(&self) -> ShutdownMode {
        *self.mode.borrow()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.mode() != ShutdownMode::Running
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.mode.subscribe(),
        }
    }

    /// Whether an accept loop currently holds an [`AcceptGuard`].
    pub fn is_accepting(&self) -> bool {
        *self.accepting.borrow()
    }

    /// Mark the accept loop as running until the guard drops.
    pub fn accepting(&self) -> AcceptGuard<'_> {
        self.accepting.send_replace(true);
        AcceptGuard {
            accepting: &self.accepting,
        }
    }

    fn escalate(&self, to: ShutdownMode) {
        self.mode.send_if_modified(|mode| {
            if to > *mode {
                *mode = to;
                true
            } else {
                false
            }
        });
    }

    async fn released(&self) {
        let mut accepting = self.accepting.subscribe();
        let _ = accepting.wait_for(|running| !*running).await;
        self.connections.wait_idle().await;
    }

    /// Stop accepting and wait for open connections to finish.
    ///
    /// `None` waits without bound.
    pub async fn graceful(&self, deadline: Option<Duration>) -> Result<(), ShutdownError> {
        self.escalate(ShutdownMode::Graceful);
        match deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.released())
                .await
                .map_err(|_| ShutdownError::Timeout {
                    deadline,
                    remaining: self.connections.active_count(),
                }),
            None => {
                self.released().await;
                Ok(())
            }
        }
    }

    /// Abort every connection task and wait briefly for them to unwind.
    pub async fn force(&self) -> Result<(), CloseError> {
        self.escalate(ShutdownMode::Forced);
        let aborted = self.connections.abort_all();
        tracing::debug!(aborted, "Forced close of open connections");

        tokio::time::timeout(FORCE_CLOSE_WAIT, self.released())
            .await
            .map_err(|_| CloseError::Lingering {
                connections: self.connections.active_count(),
            })
    }

    /// Run graceful release, falling back to forced close on error.
    ///
    /// Never fails; errors are logged.
    pub async fn release(&self, deadline: Option<Duration>) -> Release {
        let mut phase = Phase::Graceful;
        loop {
            phase = match phase {
                Phase::Graceful => match self.graceful(deadline).await {
                    Ok(()) => return Release::Graceful,
                    Err(e) => {
                        tracing::error!(error = %e, "error stopping http server");
                        Phase::Forced
                    }
                },
                Phase::Forced => {
                    return match self.force().await {
                        Ok(()) => Release::Forced,
                        Err(e) => {
                            tracing::error!(error = %e, "error closing http server");
                            Release::Incomplete
                        }
                    };
                }
            };
        }
    }
}

/// Clears the accepting flag on drop.
#[derive(Debug)]
pub struct AcceptGuard<'a> {
    accepting: &'a watch::Sender<bool>,
}

impl Drop for AcceptGuard<'_> {
    fn drop(&mut self) {
        self.accepting.send_replace(false);
    }
}

/// Task-side view of the shutdown mode.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<ShutdownMode>,
}

impl ShutdownListener {
    pub fn mode(&self) -> ShutdownMode {
        *self.rx.borrow()
    }

    /// Resolves once shutdown of any kind was requested.
    pub async fn stopping(&mut self) {
        let _ = self.rx.wait_for(|mode| *mode != ShutdownMode::Running).await;
    }

    /// Resolves once a forced close was requested.
    pub async fn forced(&mut self) {
        let _ = self.rx.wait_for(|mode| *mode == ShutdownMode::Forced).await;
    }
}
