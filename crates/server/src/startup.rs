use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use configs::AppConfig;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::errors::StartupError;
use crate::routes;
use service::api::RequestDispatcher;
use service::runtime;

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

fn bind_addr(cfg: &AppConfig) -> Result<SocketAddr, StartupError> {
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    addr.parse().map_err(|source| StartupError::BindAddr { addr, source })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Public entry: load config, build the app and run the HTTP server until ctrl-c.
pub async fn run() -> anyhow::Result<()> {
    let cfg = AppConfig::load_or_default().map_err(|e| StartupError::InvalidConfig(e.to_string()))?;

    runtime::ensure_env(&cfg.orchestrator.repository_root)
        .await
        .map_err(|e| StartupError::Runtime(e.to_string()))?;

    if cfg.admin.enabled {
        common::admin_http::spawn_admin_server(&cfg.admin.addr, service::metrics::encode_metrics);
    }

    let dispatcher = runtime::build_dispatcher(&cfg);
    let addr = bind_addr(&cfg)?;
    let listener = TcpListener::bind(addr).await.map_err(StartupError::from)?;
    info!(%addr, repository_root = %cfg.orchestrator.repository_root, "starting server");

    serve(listener, dispatcher, shutdown_signal()).await
}

/// Serve on an already bound listener; stops every job once `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, dispatcher: Arc<RequestDispatcher>, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app: Router = routes::build_router(Arc::clone(&dispatcher), build_cors());
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    let stopped = dispatcher.shutdown().await;
    info!(stopped, "server stopped");
    Ok(())
}
