//! Binding the listeners and running them until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use relish_runtime::Runtime;
use tokio::net::TcpListener;

use crate::config::WebConfig;
use crate::error::WebError;
use crate::router::{build_app_router, build_explore_router, build_share_router};
use crate::state::AppState;

async fn bind(port: u16) -> Result<TcpListener, WebError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr).await.map_err(WebError::Io)
}

fn spawn_listener(name: &'static str, listener: TcpListener, router: Router) {
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(listener = name, error = %e, "listener stopped");
        }
    });
}

/// Serves the app port, plus the share and explore ports when configured,
/// and runs the GC sweep. Returns when the app listener shuts down on
/// Ctrl-C.
pub async fn serve(runtime: Arc<Runtime>, config: WebConfig) -> Result<(), WebError> {
    config.validate()?;
    let state = AppState::new(Arc::clone(&runtime), config);
    let config = Arc::clone(&state.config);

    if let Some(port) = config.share_port {
        let dir = config
            .shared_dir
            .clone()
            .ok_or_else(|| WebError::BadRequest("share port given without a shared directory".into()))?;
        let listener = bind(port).await?;
        tracing::info!("Sharing {} on port {}", dir.display(), port);
        spawn_listener("share", listener, build_share_router(dir));
    }
    if let Some(port) = config.explore_port {
        let listener = bind(port).await?;
        tracing::info!("Explore API on port {}", port);
        spawn_listener("explore", listener, build_explore_router(state.clone()));
    }

    runtime.start_gc_sweep(runtime.config().gc_interval);

    let listener = bind(config.app_port).await?;
    tracing::info!(
        "Serving package '{}' on port {}",
        config.root_package,
        config.app_port
    );
    axum::serve(listener, build_app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(WebError::Io)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
