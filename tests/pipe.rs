//! In-process pipe connections.

use std::time::Duration;

use intake_server::lifecycle::LifecycleState;

mod common;
use common::LogCapture;

const EVENT: &str = "{\"metadata\":{}}\n";

#[tokio::test]
async fn test_pipe_request_is_served_without_tracing() {
    let logs = LogCapture::default();
    let _guard = logs.install();

    let (reporter, seen) = common::recording_reporter();
    let running = common::spawn_server_with(common::test_config(), reporter).await;

    let mut pipe = running.server.connect_pipe();
    let response = tokio::time::timeout(
        Duration::from_secs(5),
        common::raw_exchange(&mut pipe, &common::closing_post("/intake/v2/events", EVENT)),
    )
    .await
    .unwrap();
    assert!(response.starts_with("HTTP/1.1 202"), "{response}");
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(!logs.contents().contains("Request completed"));

    // The same request over TCP is traced.
    let res = common::http_client()
        .post(running.url("/intake/v2/events"))
        .body(EVENT)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 202);
    assert_eq!(logs.count("Request completed"), 1);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_healthcheck_over_tcp_is_not_traced() {
    let logs = LogCapture::default();
    let _guard = logs.install();
    let running = common::spawn_server(common::test_config()).await;

    let res = common::http_client()
        .get(running.url("/"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(!logs.contents().contains("Request completed"));

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_open_pipe_does_not_block_stop() {
    let running = common::spawn_server(common::test_config()).await;
    let server = running.server.clone();

    let _pipe = server.connect_pipe();
    assert_eq!(server.active_connections(), 1);

    tokio::time::timeout(Duration::from_secs(3), running.shutdown())
        .await
        .expect("idle pipe held up stop")
        .unwrap();
    assert_eq!(server.active_connections(), 0);
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_pipe_after_stop_is_closed() {
    let running = common::spawn_server(common::test_config()).await;
    let server = running.server.clone();
    running.shutdown().await.unwrap();

    let mut pipe = server.connect_pipe();
    let response = tokio::time::timeout(
        Duration::from_secs(1),
        common::raw_exchange(&mut pipe, &common::keep_alive_get("/")),
    )
    .await
    .expect("pipe opened after stop should be closed");
    assert!(response.is_empty());
    assert_eq!(server.active_connections(), 0);
}
