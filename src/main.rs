//! deskgate server binary: starts the internal control API, the public
//! gateway, and the idle reaper, and tears everything down on Ctrl+C.

use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deskgate::{
    api,
    config::Config,
    manager::SessionManager,
    reaper,
    session::SessionRegistry,
};

#[derive(Error, Debug)]
enum ServeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("startup error: {0}")]
    Startup(String),
}

#[tokio::main]
async fn main() -> Result<(), ServeError> {
    let config = Config::parse();
    init_tracing();
    run(config).await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "deskgate=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config: Config) -> Result<(), ServeError> {
    tracing::info!("deskgate starting");

    tokio::fs::create_dir_all(&config.workspace_root).await?;

    let manager = SessionManager::new(
        SessionRegistry::new(),
        config.allocator(),
        config.pipeline(),
        config.workspace_root.clone(),
    );

    // Internal control API. Bound separately so the trust boundary is a
    // network boundary: this listener grants raw process-spawning
    // capability.
    let internal_app = api::internal_router(api::InternalState {
        manager: manager.clone(),
    });
    let internal_listener = tokio::net::TcpListener::bind(config.internal_bind).await?;
    tracing::info!(addr = %config.internal_bind, "control API listening");
    let (internal_shutdown_tx, internal_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let internal_handle = tokio::spawn(async move {
        axum::serve(internal_listener, internal_app)
            .with_graceful_shutdown(async {
                internal_shutdown_rx.await.ok();
            })
            .await
    });

    // Public API and streaming gateway.
    let control = api::ControlClient::new(config.control_url())
        .map_err(|e| ServeError::Startup(e.message()))?;
    let public_app = api::public_router(
        api::PublicState {
            control,
            allowed_extensions: Arc::new(config.extension_allow_list()),
        },
        api::PublicRouterConfig {
            cors_origins: config.cors_origins.clone(),
            rate_limit: config.rate_limit,
        },
    );
    let public_listener = tokio::net::TcpListener::bind(config.public_bind).await?;
    tracing::info!(addr = %config.public_bind, "public API and gateway listening");
    let (public_shutdown_tx, public_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let public_handle = tokio::spawn(async move {
        axum::serve(
            public_listener,
            public_app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            public_shutdown_rx.await.ok();
        })
        .await
    });

    let cancelled = CancellationToken::new();
    let reaper_handle = reaper::spawn(
        manager.clone(),
        config.reap_interval(),
        config.idle_timeout(),
        cancelled.clone(),
    );
    tracing::info!(
        idle_minutes = config.idle_minutes,
        reap_interval_secs = config.reap_interval_secs,
        "idle reaper running"
    );

    tracing::info!("deskgate ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C, shutting down");

    // Stop the reaper first so it cannot race the drain, then tear down all
    // sessions before the listeners go away.
    cancelled.cancel();
    if let Err(e) = reaper_handle.await {
        tracing::warn!(?e, "reaper task panicked");
    }
    manager.drain().await;

    let _ = internal_shutdown_tx.send(());
    let _ = public_shutdown_tx.send(());
    match internal_handle.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "control API server error"),
        Err(e) => tracing::warn!(?e, "control API task panicked"),
        Ok(Ok(())) => {}
    }
    match public_handle.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "public server error"),
        Err(e) => tracing::warn!(?e, "public server task panicked"),
        Ok(Ok(())) => {}
    }

    tracing::info!("deskgate exiting");
    Ok(())
}
