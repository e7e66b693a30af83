//! Productivity Tracker API Server

use anyhow::Context;
use prodtrack_api::{
    auth::session::SessionIndex, create_router, logging::init_tracing, openapi, state::AppState,
};
use prodtrack_core::{AppConfig, PgStore, Repositories};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Invalid configuration")?;
    init_tracing(&config.logging);

    let store = PgStore::connect(&config.database.postgres_url, config.database.pool_size)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to apply migrations")?;
    let repos = Repositories::from_store(Arc::new(store));

    let sessions = SessionIndex::from_config(&config).await;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app_name = config.app.name.clone();
    let state = Arc::new(AppState::new(config, repos, sessions));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("{} starting on http://{}", app_name, addr);
    tracing::info!("Swagger UI available at http://{}{}/", addr, openapi::SWAGGER_UI_PATH);
    tracing::info!("OpenAPI spec at http://{}{}", addr, openapi::OPENAPI_JSON_PATH);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
