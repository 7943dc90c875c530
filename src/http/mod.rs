//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection or in-process pipe
//!     → server.rs (hyper connection, header limits, idle reaping)
//!     → trace.rs (transaction span, unless excluded)
//!     → write timeout
//!     → api (intake routes)
//!     → Send to client
//! ```

pub mod error;
pub mod server;
pub mod trace;

pub use error::{ConfigurationError, ServeError};
pub use server::HttpServer;
pub use trace::{should_exclude, RequestMeta};
