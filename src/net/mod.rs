//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Bound TCP listener (from caller)
//!     → listener.rs (connection limit, accept)
//!     → tls.rs (optional TLS handshake material)
//!     → connection.rs (task tracking, idle detection)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Connection slots are acquired before accept, never bypassed
//! - Each connection task tracked for graceful and forced shutdown
//! - TLS is optional and fixed at construction

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{
    Activity, ActivityIo, ConnectionId, ConnectionTracker, RemoteAddr, RequestGuard,
};
pub use listener::{ConnectionPermit, LimitListener};
pub use tls::{PemTlsProvider, TlsError, TlsProvider};
