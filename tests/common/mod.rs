//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::MakeWriter;

use intake_server::config::ServerConfig;
use intake_server::http::{HttpServer, ServeError};
use intake_server::observability::Tracer;
use intake_server::publish::{Batch, PublishError, Reporter};

/// Config bound to an ephemeral loopback port.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1:0".into(),
        ..ServerConfig::default()
    }
}

/// Reporter that keeps every batch in memory.
pub fn recording_reporter() -> (Arc<dyn Reporter>, Arc<Mutex<Vec<Batch>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let reporter = move |batch: Batch| -> Result<(), PublishError> {
        sink.lock().unwrap().push(batch);
        Ok(())
    };
    (Arc::new(reporter), seen)
}

pub struct Running {
    pub server: Arc<HttpServer>,
    pub addr: SocketAddr,
    pub serving: JoinHandle<Result<(), ServeError>>,
}

impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop the server and return what `start` returned.
    pub async fn shutdown(self) -> Result<(), ServeError> {
        self.server.stop().await;
        tokio::time::timeout(Duration::from_secs(5), self.serving)
            .await
            .expect("start did not return after stop")
            .expect("serving task panicked")
    }
}

/// Bind, build and start a server, returning once it is listening.
pub async fn spawn_server(config: ServerConfig) -> Running {
    let (reporter, _) = recording_reporter();
    spawn_server_with(config, reporter).await
}

pub async fn spawn_server_with(config: ServerConfig, reporter: Arc<dyn Reporter>) -> Running {
    let server = HttpServer::new(config, Tracer::default(), reporter)
        .await
        .unwrap();
    start(server).await
}

pub async fn start(server: HttpServer) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(server);

    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.start(listener).await })
    };
    tokio::time::timeout(Duration::from_secs(5), server.ready())
        .await
        .expect("server did not start listening");

    Running {
        server,
        addr,
        serving,
    }
}

/// HTTP client without pooling so every request opens its own connection.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Send one raw HTTP/1.1 request and read until the peer closes.
pub async fn raw_exchange<S>(stream: &mut S, request: &str) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _ = stream.write_all(request.as_bytes()).await;
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    String::from_utf8_lossy(&response).into_owned()
}

/// Read a single response head from a keep-alive connection.
pub async fn read_head<S>(stream: &mut S) -> String
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

pub fn keep_alive_get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n")
}

pub fn closing_post(path: &str, body: &str) -> String {
    format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-ndjson\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// In-memory log sink for asserting on emitted events.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(self.buffer.clone())
    }
}

impl LogCapture {
    /// Install a thread-local subscriber. Only valid for current-thread runtimes.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}
