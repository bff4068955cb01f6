use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exchange_backend::api::{ConnectionHandler, Router};
use exchange_backend::config::AppConfig;
use exchange_backend::db::Database;
use exchange_backend::services::matching::MatchingEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exchange_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting exchange backend v{}", env!("CARGO_PKG_VERSION"));

    // Initialize database
    let db = Database::connect(&config.database_url, config.db_pool_size).await?;
    db.init_schema().await?;
    tracing::info!("Database connected");

    // Wire the engine, router, and connection handler
    let engine = Arc::new(MatchingEngine::new(db.pool.clone()));
    let router = Arc::new(Router::new(engine));
    let handler = Arc::new(ConnectionHandler::new(
        router,
        config.read_timeout_secs,
        config.max_frame_bytes,
    ));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Bounded worker pool: a permit is taken before each accept, so at most
    // `max_connections` connections are in flight and further accepts wait
    // instead of queuing work unboundedly.
    let permits = Arc::new(Semaphore::new(config.max_connections as usize));
    loop {
        let permit = permits.clone().acquire_owned().await?;
        let (stream, peer) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            handler.handle(stream, peer).await;
            drop(permit);
        });
    }
}
