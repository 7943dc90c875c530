//! HTTP intake server for APM agent events.

pub mod api;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod publish;

pub use config::schema::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::LifecycleState;
