//! Integration test: the idle reaper reclaims sessions created through the
//! control API, through the same teardown path as an explicit delete.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use deskgate::{
    allocator::ResourceAllocator,
    api,
    manager::SessionManager,
    pipeline::PipelineConfig,
    reaper,
    session::SessionRegistry,
};

fn stub_manager(root: &Path, vnc_base: u16, ws_base: u16) -> SessionManager {
    SessionManager::new(
        SessionRegistry::new(),
        ResourceAllocator::new(900, vnc_base, ws_base),
        PipelineConfig {
            xvfb_bin: "true".into(),
            wm_bin: "true".into(),
            app_command: vec!["true".into()],
            vnc_bin: "true".into(),
            bridge_bin: "true".into(),
            settle_delay: Duration::ZERO,
            probe_timeout: Duration::ZERO,
            ..PipelineConfig::default()
        },
        root.to_path_buf(),
    )
}

async fn start_server(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

async fn request(method: &str, addr: SocketAddr, uri: &str) -> (u16, serde_json::Value) {
    let stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .expect("handshake");
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = hyper::Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost")
        .body(http_body_util::Full::new(Bytes::new()))
        .unwrap();

    let resp = sender.send_request(req).await.expect("request");
    let status = resp.status().as_u16();
    let body = http_body_util::BodyExt::collect(resp.into_body())
        .await
        .unwrap()
        .to_bytes();
    let json: serde_json::Value =
        serde_json::from_slice(&body).unwrap_or(serde_json::json!(null));
    (status, json)
}

#[tokio::test]
async fn idle_session_is_reclaimed_through_the_api() {
    let root = tempfile::tempdir().unwrap();
    let manager = stub_manager(root.path(), 49100, 49200);
    let cancelled = CancellationToken::new();
    let _reaper = reaper::spawn(
        manager.clone(),
        Duration::from_millis(40),
        Duration::from_millis(100),
        cancelled.clone(),
    );
    let addr = start_server(api::internal_router(api::InternalState {
        manager: manager.clone(),
    }))
    .await;

    let (status, created) = request("POST", addr, "/internal/sessions").await;
    assert_eq!(status, 200);
    let id = created["sessionId"].as_str().unwrap().to_string();
    let workspace = created["workspaceDir"].as_str().unwrap().to_string();

    // Idle past the threshold; the next tick reclaims it.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let (status, _) = request("GET", addr, &format!("/internal/sessions/{id}")).await;
        if status == 404 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "session should have been reclaimed"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!Path::new(&workspace).exists(), "workspace should be removed");

    cancelled.cancel();
}

#[tokio::test]
async fn touched_session_survives_the_reaper() {
    let root = tempfile::tempdir().unwrap();
    let manager = stub_manager(root.path(), 49300, 49400);
    let cancelled = CancellationToken::new();
    let _reaper = reaper::spawn(
        manager.clone(),
        Duration::from_millis(40),
        Duration::from_millis(200),
        cancelled.clone(),
    );
    let addr = start_server(api::internal_router(api::InternalState {
        manager: manager.clone(),
    }))
    .await;

    let (_, created) = request("POST", addr, "/internal/sessions").await;
    let id = created["sessionId"].as_str().unwrap().to_string();

    // Keep touching for several reap intervals; the session must survive.
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        let (status, _) =
            request("POST", addr, &format!("/internal/sessions/{id}/activity")).await;
        assert_eq!(status, 200, "session must still be alive while active");
    }

    cancelled.cancel();
}
