pub mod client;
pub mod error;
mod files;
mod gateway;
mod handlers;
mod public;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::activity::epoch_ms;
use crate::manager::SessionManager;
use crate::session::SessionRecord;

pub use client::ControlClient;

/// Maximum request body on ordinary routes.
const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Maximum upload size for workspace files.
const UPLOAD_BODY_LIMIT: usize = 20 * 1024 * 1024;

/// Wire form of a freshly created session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: String,
    pub display: u32,
    pub vnc_port: u16,
    pub ws_port: u16,
    pub workspace_dir: String,
}

/// Wire form of a session lookup, timestamps in epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub display: u32,
    pub vnc_port: u16,
    pub ws_port: u16,
    pub workspace_dir: String,
    pub created_at: u64,
    pub last_activity: u64,
}

impl From<&SessionRecord> for SessionCreated {
    fn from(record: &SessionRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            display: record.resources.display,
            vnc_port: record.resources.vnc_port,
            ws_port: record.resources.ws_port,
            workspace_dir: record.workspace.display().to_string(),
        }
    }
}

impl From<&SessionRecord> for SessionInfo {
    fn from(record: &SessionRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            display: record.resources.display,
            vnc_port: record.resources.vnc_port,
            ws_port: record.resources.ws_port,
            workspace_dir: record.workspace.display().to_string(),
            created_at: epoch_ms(record.created_at),
            last_activity: record.activity.last_activity_epoch_ms(),
        }
    }
}

/// State of the internal control listener. Holds the only handle that can
/// spawn and tear down sessions, which is why this router must never be
/// reachable from outside the trust boundary.
#[derive(Clone)]
pub struct InternalState {
    pub manager: SessionManager,
}

/// State of the public listener: a client for the control API plus the
/// workspace file policy.
#[derive(Clone)]
pub struct PublicState {
    pub control: ControlClient,
    pub allowed_extensions: Arc<Vec<String>>,
}

/// The internal control API: session create/get/delete/activity.
pub fn internal_router(state: InternalState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/internal/sessions", post(handlers::session_create))
        .route(
            "/internal/sessions/{id}",
            get(handlers::session_get).delete(handlers::session_delete),
        )
        .route(
            "/internal/sessions/{id}/activity",
            post(handlers::session_activity),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
}

/// Configuration for the public router: CORS and optional rate limiting.
pub struct PublicRouterConfig {
    pub cors_origins: Vec<String>,
    pub rate_limit: Option<u32>,
}

impl Default for PublicRouterConfig {
    fn default() -> Self {
        Self {
            cors_origins: vec![],
            rate_limit: None,
        }
    }
}

/// The public API: session pass-throughs, the streaming gateway, and the
/// workspace file endpoints.
pub fn public_router(state: PublicState, config: PublicRouterConfig) -> Router {
    // The upload route carries its own, larger body limit.
    let upload = Router::new()
        .route("/api/session/{id}/upload", post(files::upload))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT));

    let router = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/session", post(public::session_create))
        .route(
            "/api/session/{id}",
            get(public::session_get).delete(public::session_delete),
        )
        .route("/api/session/{id}/activity", post(public::session_activity))
        .route("/api/session/{id}/ws", get(gateway::session_ws))
        .route("/api/session/{id}/files", get(files::list))
        .route("/api/session/{id}/files/{name}", axum::routing::delete(files::delete))
        .route("/api/session/{id}/download/{name}", get(files::download))
        .route("/api/session/{id}/download-latest", get(files::download_latest))
        .route("/api/session/{id}/download-zip", get(files::download_zip))
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
        .merge(upload)
        .with_state(state);

    // Apply rate limiting if configured.
    let router = if let Some(rps) = config.rate_limit {
        use tower_governor::{
            governor::GovernorConfigBuilder, key_extractor::PeerIpKeyExtractor, GovernorLayer,
        };
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(u64::from(rps))
                .burst_size(rps)
                .key_extractor(PeerIpKeyExtractor)
                .finish()
                .unwrap(),
        );
        router.layer(GovernorLayer::new(governor_conf))
    } else {
        router
    };

    let router = router
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ));

    // Permissive CORS when no origins are configured (the front-end tier
    // may be served from anywhere), otherwise an explicit allow-list.
    if config.cors_origins.is_empty() {
        router.layer(CorsLayer::permissive())
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ResourceAllocator;
    use crate::pipeline::PipelineConfig;
    use crate::session::SessionRegistry;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt; // for oneshot()

    fn test_state(root: &std::path::Path) -> InternalState {
        InternalState {
            manager: SessionManager::new(
                SessionRegistry::new(),
                ResourceAllocator::new(900, 40100, 40200),
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
            ),
        }
    }

    #[tokio::test]
    async fn health_route_responds() {
        let root = tempfile::tempdir().unwrap();
        let app = internal_router(test_state(root.path()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let root = tempfile::tempdir().unwrap();
        let app = internal_router(test_state(root.path()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/internal/unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_response_uses_camel_case_field_names() {
        let root = tempfile::tempdir().unwrap();
        let app = internal_router(test_state(root.path()));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/internal/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = Body::new(response.into_body())
            .collect()
            .await
            .unwrap()
            .to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        for key in ["sessionId", "display", "vncPort", "wsPort", "workspaceDir"] {
            assert!(json.get(key).is_some(), "missing field {key}: {json}");
        }
    }

    #[test]
    fn session_info_roundtrips_camel_case() {
        let info = SessionInfo {
            session_id: "0123456789abcdef0123456789abcdef".into(),
            display: 100,
            vnc_port: 5900,
            ws_port: 6900,
            workspace_dir: "/workspace/sessions/x".into(),
            created_at: 1_700_000_000_000,
            last_activity: 1_700_000_000_500,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["sessionId"], "0123456789abcdef0123456789abcdef");
        assert_eq!(json["vncPort"], 5900);
        assert_eq!(json["lastActivity"], 1_700_000_000_500u64);

        let back: SessionInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back.ws_port, 6900);
    }
}
