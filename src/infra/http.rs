//! Router construction and server lifecycle.

use axum::{Router, middleware, routing::get};
use tokio::net::TcpListener;
use tracing::info;

use crate::cache::{FilterState, response_cache_filter};
use crate::config::ServerSettings;

use super::assets::{AssetService, serve_asset};
use super::error::InfraError;

/// Assemble the asset router with the response-cache filter in front.
pub fn build_router(filter: FilterState, assets: AssetService) -> Router {
    Router::new()
        .fallback(get(serve_asset))
        .with_state(assets)
        .layer(middleware::from_fn_with_state(filter, response_cache_filter))
}

/// Bind and serve until ctrl-c, then release the cache backend.
pub async fn serve(
    settings: &ServerSettings,
    filter: FilterState,
    assets: AssetService,
) -> Result<(), InfraError> {
    let router = build_router(filter.clone(), assets);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| InfraError::bind(addr.clone(), source))?;
    info!(%addr, "scorta listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    filter.shutdown().await;
    info!("scorta stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
