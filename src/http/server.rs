//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Build the request handler from the handler factory
//! - Wire up middleware (tracing outermost, write timeout inside)
//! - Load TLS material when enabled
//! - Serve a caller-bound listener with connection limiting
//! - Stop gracefully, falling back to forced close
//!
//! `start` and `stop` both take `&self`: share the server through an `Arc`
//! and call `stop` from another task while `start` is serving.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::{http::Request, middleware, Router};
use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
    service::TowerToHyperService,
};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;
use tower_http::timeout::TimeoutLayer;

use crate::api::{HandlerFactory, IntakeMux};
use crate::config::ServerConfig;
use crate::http::error::{ConfigurationError, ServeError};
use crate::http::trace::trace_requests;
use crate::lifecycle::{
    startup, Lifecycle, LifecycleState, Release, ShutdownController, ShutdownListener,
};
use crate::net::{
    Activity, ActivityIo, ConnectionPermit, ConnectionTracker, LimitListener, PemTlsProvider,
    RemoteAddr, TlsProvider,
};
use crate::observability::Tracer;
use crate::publish::Reporter;

/// hyper refuses read buffers smaller than this.
const MIN_HEADER_BUFFER: usize = 8192;

const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

const PIPE_BUFFER: usize = 64 * 1024;

/// HTTP server for the intake endpoints.
pub struct HttpServer {
    config: ServerConfig,
    app: Router,
    tls: Option<RustlsConfig>,
    builder: Arc<auto::Builder<TokioExecutor>>,
    lifecycle: Lifecycle,
    shutdown: ShutdownController,
    started: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
}

impl HttpServer {
    /// Create a server using the default intake router and PEM file TLS loading.
    pub async fn new(
        config: ServerConfig,
        tracer: Tracer,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, ConfigurationError> {
        Self::with_collaborators(config, tracer, reporter, &IntakeMux, &PemTlsProvider).await
    }

    /// Create a server with an explicit handler factory and TLS provider.
    pub async fn with_collaborators<F, P>(
        config: ServerConfig,
        tracer: Tracer,
        reporter: Arc<dyn Reporter>,
        factory: &F,
        tls_provider: &P,
    ) -> Result<Self, ConfigurationError>
    where
        F: HandlerFactory + ?Sized,
        P: TlsProvider + ?Sized,
    {
        let handler = factory.build(&config, reporter)?;
        let app = Self::build_router(&config, handler, tracer);

        let tls = if config.tls.enabled {
            Some(tls_provider.load(&config.tls, &config.host).await?)
        } else {
            None
        };

        let builder = Arc::new(Self::connection_builder(&config));

        Ok(Self {
            config,
            app,
            tls,
            builder,
            lifecycle: Lifecycle::new(),
            shutdown: ShutdownController::new(ConnectionTracker::new()),
            started: AtomicBool::new(false),
            local_addr: OnceLock::new(),
        })
    }

    /// Wrap the handler: write timeout inside, tracing outermost.
    #[allow(deprecated)]
    fn build_router(config: &ServerConfig, handler: Router, tracer: Tracer) -> Router {
        let router = match config.write_timeout() {
            Some(timeout) => handler.layer(TimeoutLayer::new(timeout)),
            None => handler,
        };
        router.layer(middleware::from_fn_with_state(tracer, trace_requests))
    }

    fn connection_builder(config: &ServerConfig) -> auto::Builder<TokioExecutor> {
        let mut builder = auto::Builder::new(TokioExecutor::new());

        let mut http1 = builder.http1();
        http1
            .timer(TokioTimer::new())
            .max_buf_size(config.max_header_size.max(MIN_HEADER_BUFFER));
        if let Some(timeout) = config.read_timeout() {
            http1.header_read_timeout(timeout);
        }

        builder
            .http2()
            .timer(TokioTimer::new())
            .max_header_list_size(u32::try_from(config.max_header_size).unwrap_or(u32::MAX));

        builder
    }

    /// Bind the configured `host`.
    ///
    /// Only a constructed server can bind, so a configuration that fails
    /// construction never opens a socket.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(&self.config.host).await
    }

    /// Serve `listener` until [`stop`](Self::stop) is called.
    ///
    /// The listener must already be bound. Returns `Ok(())` once the server
    /// was stopped, also when `stop` ran before `start`. Any other exit of
    /// the accept loop is an error.
    pub async fn start(&self, listener: TcpListener) -> Result<(), ServeError> {
        if self.shutdown.is_shutting_down() {
            return Ok(());
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServeError::AlreadyStarted);
        }

        let _accepting = self.shutdown.accepting();
        // stop() may have won the race between the checks above and the guard.
        if self.shutdown.is_shutting_down() {
            return Ok(());
        }

        let addr = listener.local_addr().map_err(ServeError::LocalAddr)?;
        let _ = self.local_addr.set(addr);
        startup::announce(&self.config, addr, self.tls.is_some());

        let listener = LimitListener::new(listener, self.config.connection_limit());
        let acceptor = self.tls.clone().map(|tls| {
            let acceptor = RustlsAcceptor::new(tls);
            match self.config.read_timeout() {
                Some(timeout) => acceptor.handshake_timeout(timeout),
                None => acceptor,
            }
        });

        self.lifecycle.advance(LifecycleState::Listening);
        let result = self.accept_loop(&listener, acceptor.as_ref()).await;
        drop(listener);

        if let Err(e) = &result {
            tracing::error!(error = %e, "HTTP server stopped serving");
        }
        result
    }

    async fn accept_loop(
        &self,
        listener: &LimitListener,
        tls: Option<&RustlsAcceptor>,
    ) -> Result<(), ServeError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut backoff: Option<Duration> = None;

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.stopping() => return Ok(()),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer, permit)) => {
                    backoff = None;
                    self.spawn_connection(stream, peer, permit, tls.cloned());
                }
                Err(e) if is_transient_accept_error(&e) => {
                    let delay = backoff.map_or(MIN_ACCEPT_BACKOFF, |d| (d * 2).min(MAX_ACCEPT_BACKOFF));
                    backoff = Some(delay);
                    tracing::warn!(error = %e, retry_in = ?delay, "Accept error");
                    tokio::select! {
                        biased;
                        _ = shutdown.stopping() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(ServeError::Accept(e)),
            }
        }
    }

    fn connection(&self) -> Connection {
        Connection {
            app: self.app.clone(),
            builder: Arc::clone(&self.builder),
            shutdown: self.shutdown.subscribe(),
            idle_timeout: self.config.idle_timeout(),
        }
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
        tls: Option<RustlsAcceptor>,
    ) {
        let mut conn = self.connection();
        let remote = RemoteAddr::Socket(peer);

        self.shutdown.connections().spawn(async move {
            let _permit = permit;
            match tls {
                Some(acceptor) => {
                    let handshake = tokio::select! {
                        result = acceptor.accept(stream, ()) => result,
                        _ = conn.shutdown.stopping() => return,
                    };
                    match handshake {
                        Ok((stream, ())) => conn.serve(stream, remote).await,
                        Err(e) => {
                            tracing::debug!(peer_addr = %peer, error = %e, "TLS handshake failed");
                        }
                    }
                }
                None => conn.serve(stream, remote).await,
            }
        });
    }

    /// Open an in-process connection to this server.
    ///
    /// Requests sent over the returned stream are served like TCP requests
    /// but are never traced. Once the server is stopping the stream is
    /// returned already closed. Must be called within a Tokio runtime.
    pub fn connect_pipe(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(PIPE_BUFFER);
        if self.shutdown.is_shutting_down() {
            return client;
        }
        let conn = self.connection();
        self.shutdown
            .connections()
            .spawn(conn.serve(server, RemoteAddr::Pipe));
        client
    }

    /// Stop serving.
    ///
    /// Stops accepting, lets in-flight requests finish within the configured
    /// shutdown timeout, then force-closes whatever is left. Errors are logged,
    /// never returned. Safe to call repeatedly and before or after `start`.
    pub async fn stop(&self) {
        match self.local_addr.get() {
            Some(addr) => tracing::info!("Stop listening on: {}", addr),
            None => tracing::info!("Stop listening on: {}", self.config.host),
        }

        let release = self.shutdown.release(self.config.shutdown_timeout()).await;
        if release != Release::Graceful {
            tracing::warn!(release = ?release, "HTTP server did not stop gracefully");
        }

        self.lifecycle.advance(LifecycleState::Stopped);
        tracing::info!("HTTP server stopped");
    }

    /// Resolves once the server is listening or stopped.
    pub async fn ready(&self) {
        self.lifecycle.reached(LifecycleState::Listening).await;
    }

    /// Lifecycle position.
    ///
    /// `Listening` means `start` was entered, not that connections are still
    /// being accepted: after a fatal accept error the state stays `Listening`
    /// until `stop`. Use [`is_accepting`](Self::is_accepting) for the latter.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    /// Whether the accept loop is running right now.
    pub fn is_accepting(&self) -> bool {
        self.shutdown.is_accepting()
    }

    /// Address of the served listener, once `start` has been called.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Open connections, including pipes.
    pub fn active_connections(&self) -> usize {
        self.shutdown.connections().active_count()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    use io::ErrorKind::*;
    // EMFILE and ENFILE clear up once other connections close.
    matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock | TimedOut
    ) || matches!(e.raw_os_error(), Some(23 | 24))
}

/// Everything a connection task needs, detached from the server.
struct Connection {
    app: Router,
    builder: Arc<auto::Builder<TokioExecutor>>,
    shutdown: ShutdownListener,
    idle_timeout: Option<Duration>,
}

impl Connection {
    async fn serve<I>(mut self, io: I, remote: RemoteAddr)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let activity = Activity::new();
        let io = TokioIo::new(ActivityIo::new(io, activity.clone()));

        let requests = activity.clone();
        let service = self
            .app
            .map_request(move |mut request: Request<Incoming>| {
                request.extensions_mut().insert(remote);
                request
            })
            .map_future(move |response| {
                let busy = requests.begin_request();
                async move {
                    let response = response.await;
                    drop(busy);
                    response
                }
            });
        let conn = self
            .builder
            .serve_connection_with_upgrades(io, TowerToHyperService::new(service));
        tokio::pin!(conn);

        let idle_timeout = self.idle_timeout;
        let idle = async move {
            match idle_timeout {
                Some(timeout) => activity.idle_for(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(idle);

        let mut draining = false;
        loop {
            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        tracing::debug!(remote = %remote, error = %e, "Connection error");
                    }
                    return;
                }
                _ = self.shutdown.stopping(), if !draining => {
                    conn.as_mut().graceful_shutdown();
                    draining = true;
                }
                _ = &mut idle, if !draining => {
                    tracing::debug!(remote = %remote, "Closing idle connection");
                    conn.as_mut().graceful_shutdown();
                    draining = true;
                }
            }
        }
    }
}
