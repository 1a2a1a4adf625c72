use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use agora::config::{Backend, Cli, Config};
use agora::db;
use agora::routes;
use agora::state::AppState;
use agora::store::{DocumentStore, MemoryStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Ensure uploads directory exists
    std::fs::create_dir_all(config.uploads_path())?;

    let store: Arc<dyn DocumentStore> = match config.database.backend {
        Backend::Sqlite => {
            let db_path = config.db_path();
            let pool = db::create_pool(&db_path)?;
            db::run_migrations(&pool)?;
            tracing::info!("Database: {}", db_path.display());
            Arc::new(SqliteStore::new(pool))
        }
        Backend::Memory => {
            tracing::warn!("Using in-memory storage; nothing will survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    tracing::info!("Session strategy: {:?}", config.auth.strategy);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(config, store);
    if cli.seed {
        db::seed::seed(&state.users, &state.posts).await?;
    }
    let app = routes::build_app(state);

    // Start server
    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
