//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track live connection tasks for graceful and forced shutdown
//! - Record I/O activity so idle keep-alive connections can be reaped

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAddr {
    /// A TCP peer.
    Socket(std::net::SocketAddr),
    /// The in-process pipe used by the server to talk to itself.
    Pipe,
}

impl std::fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteAddr::Socket(addr) => write!(f, "{}", addr),
            RemoteAddr::Pipe => f.write_str("pipe"),
        }
    }
}

#[derive(Debug)]
struct TrackerInner {
    active: watch::Sender<usize>,
    tasks: Mutex<HashMap<ConnectionId, AbortHandle>>,
}

impl TrackerInner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<ConnectionId, AbortHandle>> {
        // A panic while holding the lock leaves the map intact, keep using it.
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Tracks spawned connection tasks.
///
/// Every task holds a [`ConnectionGuard`]; the live count drops when the task
/// finishes or is aborted.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(TrackerInner {
                active,
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.inner.active.send_modify(|n| *n += 1);
        metrics::record_connection_opened();
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id: ConnectionId::new(),
        }
    }

    /// Spawn a connection task whose lifetime is tracked.
    pub fn spawn<F>(&self, task: F) -> ConnectionId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.track();
        let id = guard.id();

        // Hold the lock across spawn so the guard cannot unregister before we register.
        let mut tasks = self.inner.tasks();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            task.await;
        });
        tasks.insert(id, handle.abort_handle());
        id
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Wait until no tracked connection is left.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Abort every spawned connection task. Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let drained: Vec<_> = self.inner.tasks().drain().collect();
        for (id, handle) in &drained {
            tracing::debug!(connection_id = %id, "Aborting connection");
            handle.abort();
        }
        drained.len()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.tasks().remove(&self.id);
        self.inner.active.send_modify(|n| *n = n.saturating_sub(1));
        metrics::record_connection_closed();
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Timestamp of the last byte moved on a connection, and whether a request
/// is being handled on it.
#[derive(Debug, Clone)]
pub struct Activity {
    origin: Instant,
    last_millis: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_millis: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Mark a request as in flight until the guard drops.
    pub fn begin_request(&self) -> RequestGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
        RequestGuard {
            activity: self.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Mark the connection as active now.
    pub fn touch(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_millis.store(elapsed, Ordering::Relaxed);
    }

    pub fn last_seen(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_millis.load(Ordering::Relaxed))
    }

    /// Resolves once no request is in flight and no activity has been seen
    /// for `timeout`.
    pub async fn idle_for(&self, timeout: Duration) {
        loop {
            let deadline = if self.in_flight() > 0 {
                // Re-checked later; finishing the request touches the clock.
                Instant::now() + timeout
            } else {
                self.last_seen() + timeout
            };
            if self.in_flight() == 0 && Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Keeps a connection out of idle reaping while a request is handled.
#[derive(Debug)]
pub struct RequestGuard {
    activity: Activity,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.activity.touch();
        self.activity.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// I/O wrapper that touches an [`Activity`] whenever bytes move.
#[derive(Debug)]
pub struct ActivityIo<T> {
    inner: T,
    activity: Activity,
}

impl<T> ActivityIo<T> {
    pub fn new(inner: T, activity: Activity) -> Self {
        Self { inner, activity }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for ActivityIo<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(result, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.activity.touch();
        }
        result
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for ActivityIo<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let result = Pin::new(&mut self.inner).poll_write(cx, buf);
        if matches!(result, Poll::Ready(Ok(n)) if n > 0) {
            self.activity.touch();
        }
        result
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let result = Pin::new(&mut self.inner).poll_write_vectored(cx, bufs);
        if matches!(result, Poll::Ready(Ok(n)) if n > 0) {
            self.activity.touch();
        }
        result
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn spawned_tasks_release_on_completion() {
        let tracker = ConnectionTracker::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tracker.spawn(async move {
            let _ = rx.await;
        });
        assert_eq!(tracker.active_count(), 1);

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait_idle())
            .await
            .unwrap();
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn abort_all_cancels_stuck_tasks() {
        let tracker = ConnectionTracker::new();
        for _ in 0..3 {
            tracker.spawn(std::future::pending());
        }
        assert_eq!(tracker.active_count(), 3);

        assert_eq!(tracker.abort_all(), 3);
        tokio::time::timeout(Duration::from_secs(1), tracker.wait_idle())
            .await
            .unwrap();
        assert_eq!(tracker.abort_all(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_for_waits_past_last_activity() {
        let activity = Activity::new();
        let start = Instant::now();

        tokio::time::sleep(Duration::from_secs(3)).await;
        activity.touch();
        activity.idle_for(Duration::from_secs(5)).await;

        assert!(start.elapsed() >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_for_waits_out_in_flight_requests() {
        let activity = Activity::new();
        let start = Instant::now();

        let request = activity.begin_request();
        let finished = {
            let activity = activity.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                drop(request);
                activity.in_flight()
            })
        };

        activity.idle_for(Duration::from_secs(2)).await;
        assert_eq!(finished.await.unwrap(), 0);
        assert!(start.elapsed() >= Duration::from_secs(12));
    }

    #[tokio::test]
    async fn activity_io_touches_on_traffic() {
        let (client, server) = tokio::io::duplex(64);
        let activity = Activity::new();
        let mut io = ActivityIo::new(server, activity.clone());
        let mut client = client;

        let before = activity.last_seen();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        io.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert!(activity.last_seen() > before);
    }
}
