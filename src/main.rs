use std::net::SocketAddr;
use std::sync::Arc;

use fieldguard::config::{self, EngineConfig};
use fieldguard::engine::OperationPipeline;
use fieldguard::jwt::JwtConfig;
use fieldguard::store::MemoryStore;
use fieldguard::{create_app, demo, AppState};

const DEFAULT_PORT: u16 = 8000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_env();
    config::init_tracing("info");

    let engine = EngineConfig::from_env()?;
    let jwt = JwtConfig::from_env()?;
    let registry = demo::registry()?;
    tracing::info!(entities = ?registry.entities(), max_limit = engine.max_limit, "policies registered");

    let store = MemoryStore::new();
    demo::seed(&store).await?;

    let pipeline = OperationPipeline::new(Arc::new(registry), Arc::new(store), Arc::new(engine));
    let app = create_app(AppState::new(pipeline, jwt));

    let port = match std::env::var("APP_PORT") {
        Ok(raw) => raw
            .parse::<u16>()
            .map_err(|_| anyhow::anyhow!("APP_PORT must be a port number, got `{raw}`"))?,
        Err(_) => DEFAULT_PORT,
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "fieldguard listening");
    axum::serve(listener, app).await?;

    Ok(())
}
