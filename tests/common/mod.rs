#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::http::HeaderMap;
use axum::Router;
use qwen_client::{ClientConfig, QwenClient};
use serde_json::Value;

/// Request as seen by the mock upstream.
#[derive(Debug, Clone)]
pub struct Captured {
    pub headers: HeaderMap,
    pub body: Value,
}

pub type CapturedRequests = Arc<Mutex<Vec<Captured>>>;

pub fn capture(captured: &CapturedRequests, headers: HeaderMap, body: Value) {
    captured
        .lock()
        .expect("captured lock")
        .push(Captured { headers, body });
}

pub fn last_request(captured: &CapturedRequests) -> Captured {
    captured
        .lock()
        .expect("captured lock")
        .last()
        .cloned()
        .expect("mock upstream received a request")
}

pub fn client_for(addr: SocketAddr) -> QwenClient {
    QwenClient::new(
        ClientConfig::new("sk-test", "session=abc")
            .with_base_url(format!("http://{addr}"))
            .with_timeout(10),
    )
    .expect("build client")
}

/// Serve `app` from the current runtime.
pub async fn spawn_server(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, server)
}

/// Serve `app` from a dedicated thread with its own runtime, for tests that
/// drive the blocking API from the test thread.
pub fn spawn_server_thread(app: Router) -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("mock upstream runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind mock upstream");
            tx.send(listener.local_addr().expect("local addr"))
                .expect("report addr");
            let _ = axum::serve(listener, app).await;
        });
    });
    rx.recv().expect("mock upstream address")
}

/// An address nothing listens on.
pub fn closed_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    listener.local_addr().expect("local addr")
}

pub fn chunk_frame(id: &str, content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({
            "id": id,
            "model": "qwen-turbo",
            "choices": [{"index": 0, "delta": {"content": content}}]
        })
    )
}
