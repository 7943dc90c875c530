//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Bound listener → announce listening address, RUM, limits, TLS
//!
//! Shutdown (shutdown.rs):
//!     stop() → stop accepting → drain connections → forced close on failure
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger stop()
//!
//! State (state.rs):
//!     Constructed → Listening → Stopped
//! ```
//!
//! # Design Decisions
//! - Shutdown always ends in Stopped, whichever release strategy finished it
//! - Graceful phase deadline is configurable; forced close is the fallback

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use shutdown::{CloseError, Release, ShutdownController, ShutdownError, ShutdownListener, ShutdownMode};
pub use state::{Lifecycle, LifecycleState};
