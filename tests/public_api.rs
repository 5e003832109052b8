//! Integration tests for the public session endpoints, which pass through to
//! the internal control API over HTTP.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;

use deskgate::{
    allocator::ResourceAllocator,
    api,
    manager::SessionManager,
    pipeline::PipelineConfig,
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

async fn start_stack(manager: SessionManager) -> SocketAddr {
    let internal_addr = start_server(api::internal_router(api::InternalState {
        manager,
    }))
    .await;
    let control = api::ControlClient::new(format!("http://{internal_addr}")).unwrap();
    start_server(api::public_router(
        api::PublicState {
            control,
            allowed_extensions: Arc::new(vec!["txt".to_string(), "csv".to_string()]),
        },
        api::PublicRouterConfig::default(),
    ))
    .await
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
async fn public_create_returns_token_port_and_timestamp() {
    let root = tempfile::tempdir().unwrap();
    let addr = start_stack(stub_manager(root.path(), 43100, 43200)).await;

    let (status, json) = request("POST", addr, "/api/session").await;

    assert_eq!(status, 200);
    assert_eq!(json["sessionId"].as_str().unwrap().len(), 32);
    assert_eq!(json["wsPort"], 43200);
    assert!(json["createdAt"].as_u64().unwrap() > 0);
    // The public response deliberately omits internal details.
    assert!(json.get("workspaceDir").is_none());
    assert!(json.get("vncPort").is_none());
}

#[tokio::test]
async fn public_get_passes_session_through() {
    let root = tempfile::tempdir().unwrap();
    let addr = start_stack(stub_manager(root.path(), 43300, 43400)).await;

    let (_, created) = request("POST", addr, "/api/session").await;
    let id = created["sessionId"].as_str().unwrap().to_string();

    let (status, info) = request("GET", addr, &format!("/api/session/{id}")).await;
    assert_eq!(status, 200);
    assert_eq!(info["sessionId"], id.as_str());
    assert!(info["lastActivity"].as_u64().unwrap() >= info["createdAt"].as_u64().unwrap());
}

#[tokio::test]
async fn public_get_unknown_is_404() {
    let root = tempfile::tempdir().unwrap();
    let addr = start_stack(stub_manager(root.path(), 43500, 43600)).await;

    let (status, json) = request(
        "GET",
        addr,
        "/api/session/0123456789abcdef0123456789abcdef",
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(json["error"]["code"], "session_not_found");
}

#[tokio::test]
async fn public_activity_touches_session() {
    let root = tempfile::tempdir().unwrap();
    let addr = start_stack(stub_manager(root.path(), 43700, 43800)).await;

    let (_, created) = request("POST", addr, "/api/session").await;
    let id = created["sessionId"].as_str().unwrap().to_string();

    let (_, before) = request("GET", addr, &format!("/api/session/{id}")).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (status, ok) = request("POST", addr, &format!("/api/session/{id}/activity")).await;
    assert_eq!(status, 200);
    assert_eq!(ok["ok"], true);

    let (_, after) = request("GET", addr, &format!("/api/session/{id}")).await;
    assert!(
        after["lastActivity"].as_u64().unwrap() > before["lastActivity"].as_u64().unwrap()
    );
}

#[tokio::test]
async fn public_delete_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let addr = start_stack(stub_manager(root.path(), 43900, 44000)).await;

    let (_, created) = request("POST", addr, "/api/session").await;
    let id = created["sessionId"].as_str().unwrap().to_string();

    let (status, json) = request("DELETE", addr, &format!("/api/session/{id}")).await;
    assert_eq!(status, 200);
    assert_eq!(json["ok"], true);

    // A second delete still reports success: the session is just as gone.
    let (status, json) = request("DELETE", addr, &format!("/api/session/{id}")).await;
    assert_eq!(status, 200);
    assert_eq!(json["ok"], true);

    let (status, _) = request("GET", addr, &format!("/api/session/{id}")).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn public_health_reports_ok() {
    let root = tempfile::tempdir().unwrap();
    let addr = start_stack(stub_manager(root.path(), 44100, 44200)).await;

    let (status, json) = request("GET", addr, "/api/health").await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn security_headers_are_set() {
    let root = tempfile::tempdir().unwrap();
    let addr = start_stack(stub_manager(root.path(), 44300, 44400)).await;

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });
    let req = hyper::Request::builder()
        .method("GET")
        .uri("/api/health")
        .header("host", "localhost")
        .body(http_body_util::Full::new(Bytes::new()))
        .unwrap();
    let resp = sender.send_request(req).await.unwrap();

    assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
    assert_eq!(resp.headers().get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(resp.headers().get("referrer-policy").unwrap(), "no-referrer");
}
