//! TCP listener with optional connection-count limiting.
//!
//! # Responsibilities
//! - Wrap an already bound listener (binding is the caller's job)
//! - Enforce max_connections via semaphore before `accept()` is called
//! - Hand out a permit that lives as long as the connection
//!
//! # Design Decisions
//! - Waiting for a slot happens before accepting, so surplus clients queue in
//!   the kernel backlog instead of being accepted and parked
//! - No limit configured means no semaphore at all

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A TCP listener that limits concurrent connections.
#[derive(Debug)]
pub struct LimitListener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections, `None` when unlimited.
    connection_limit: Option<Arc<Semaphore>>,
}

impl LimitListener {
    /// Wrap `listener`. `limit` of `None` accepts without bound.
    pub fn new(listener: TcpListener, limit: Option<usize>) -> Self {
        Self {
            inner: listener,
            connection_limit: limit.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Waits for a free slot first, then accepts. Cancel safe: dropping the
    /// future while it waits for a slot accepts nothing.
    pub async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr, ConnectionPermit)> {
        let permit = match &self.connection_limit {
            Some(limit) => Some(
                Arc::clone(limit)
                    .acquire_owned()
                    .await
                    .map_err(|_| std::io::Error::other("connection limiter closed"))?,
            ),
            None => None,
        };

        let (stream, addr) = self.inner.accept().await?;

        tracing::trace!(
            peer_addr = %addr,
            available_permits = ?self.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Free connection slots, `None` when unlimited.
    pub fn available_permits(&self) -> Option<usize> {
        self.connection_limit.as_ref().map(|s| s.available_permits())
    }
}

/// A connection slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: Option<OwnedSemaphorePermit>,
}
