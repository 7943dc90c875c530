//! Draining behaviour on stop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{routing::get, Router};
use intake_server::config::ServerConfig;
use intake_server::http::{ConfigurationError, HttpServer};
use intake_server::lifecycle::LifecycleState;
use intake_server::net::PemTlsProvider;
use intake_server::observability::Tracer;
use intake_server::publish::Reporter;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

mod common;

/// Server whose `/slow` handler takes 300ms and whose `/stuck` handler never returns.
async fn slow_server(config: ServerConfig, entered: Arc<AtomicUsize>) -> HttpServer {
    let factory = move |_: &ServerConfig,
                        _: Arc<dyn Reporter>|
          -> Result<Router, ConfigurationError> {
        let slow = entered.clone();
        let stuck = entered.clone();
        Ok(Router::new()
            .route(
                "/slow",
                get(move || {
                    let entered = slow.clone();
                    async move {
                        entered.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        "done"
                    }
                }),
            )
            .route(
                "/stuck",
                get(move || {
                    let entered = stuck.clone();
                    async move {
                        entered.fetch_add(1, Ordering::SeqCst);
                        std::future::pending::<()>().await;
                        "unreachable"
                    }
                }),
            ))
    };

    let (reporter, _) = common::recording_reporter();
    HttpServer::with_collaborators(config, Tracer::default(), reporter, &factory, &PemTlsProvider)
        .await
        .unwrap()
}

async fn wait_for(counter: &AtomicUsize, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while counter.load(Ordering::SeqCst) < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handlers were not entered in time");
}

#[tokio::test]
async fn test_in_flight_requests_complete_on_stop() {
    let entered = Arc::new(AtomicUsize::new(0));
    let running = common::start(slow_server(common::test_config(), entered.clone()).await).await;
    let client = common::http_client();

    let requests: Vec<_> = (0..5)
        .map(|_| {
            let request = client.get(running.url("/slow"));
            tokio::spawn(async move {
                let res = request.send().await?;
                let status = res.status();
                res.text().await.map(|body| (status, body))
            })
        })
        .collect();
    wait_for(&entered, 5).await;

    let server = running.server.clone();
    let addr = running.addr;
    running.shutdown().await.unwrap();

    for request in requests {
        let (status, body) = request.await.unwrap().unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "done");
    }
    assert_eq!(server.active_connections(), 0);
    assert_eq!(server.state(), LifecycleState::Stopped);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_stuck_request_is_force_closed_after_deadline() {
    let entered = Arc::new(AtomicUsize::new(0));
    let config = ServerConfig {
        shutdown_timeout_secs: 1,
        ..common::test_config()
    };
    let running = common::start(slow_server(config, entered.clone()).await).await;

    let request = common::http_client().get(running.url("/stuck"));
    let pending = tokio::spawn(async move { request.send().await });
    wait_for(&entered, 1).await;

    let server = running.server.clone();
    let begun = Instant::now();
    running.shutdown().await.unwrap();

    assert!(begun.elapsed() >= Duration::from_millis(900));
    assert!(begun.elapsed() < Duration::from_secs(4));
    assert!(pending.await.unwrap().is_err());
    assert_eq!(server.active_connections(), 0);
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_idle_keep_alive_connection_closes_on_stop() {
    let running = common::spawn_server(common::test_config()).await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    stream
        .write_all(common::keep_alive_get("/").as_bytes())
        .await
        .unwrap();
    let head = common::read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");

    let begun = Instant::now();
    running.shutdown().await.unwrap();
    assert!(begun.elapsed() < Duration::from_secs(2));

    // Remaining body bytes, then EOF.
    let rest = tokio::time::timeout(Duration::from_secs(1), async {
        let mut buf = Vec::new();
        let _ = tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buf).await;
        buf
    })
    .await
    .expect("connection left open after stop");
    assert!(!String::from_utf8_lossy(&rest).contains("HTTP/1.1"));
}

#[tokio::test]
async fn test_idle_timeout_reaps_keep_alive_connections() {
    let config = ServerConfig {
        idle_timeout_secs: 1,
        ..common::test_config()
    };
    let running = common::spawn_server(config).await;

    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    stream
        .write_all(common::keep_alive_get("/").as_bytes())
        .await
        .unwrap();
    let head = common::read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");

    let begun = Instant::now();
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut buf = Vec::new();
        let _ = tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buf).await;
    })
    .await
    .expect("idle connection was not closed");
    assert!(begun.elapsed() >= Duration::from_millis(500));

    running.shutdown().await.unwrap();
}
