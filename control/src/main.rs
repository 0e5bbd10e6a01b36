mod api;
mod config;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use hwalloc_engine::{Catalog, CatalogFile, Engine, SqliteStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use api::nodes::AppState;
use config::ControlConfig;

#[derive(Parser, Debug)]
#[command(name = "hwalloc-control")]
#[command(about = "Hardware inventory allocation service", long_about = None)]
struct Args {
    /// Bind address for HTTP server
    #[arg(long, env = "HWALLOC_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Database file path
    #[arg(long, env = "HWALLOC_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Hardware catalog (TOML), re-read on every allocation pass
    #[arg(long, env = "HWALLOC_CATALOG")]
    catalog: PathBuf,

    /// Engine configuration file (TOML)
    #[arg(long, env = "HWALLOC_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "HWALLOC_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting hardware allocation service");

    let config = match &args.config {
        Some(path) => ControlConfig::load(path)?,
        None => ControlConfig::default(),
    };

    // Fail fast on a broken catalog; passes re-read it from disk
    let catalog = Catalog::load(&args.catalog)
        .with_context(|| format!("Failed to load catalog {:?}", args.catalog))?;
    info!(
        "Catalog {:?} has {} node(s) in {} profile(s)",
        args.catalog,
        catalog.nodes.len(),
        catalog.hwprofiles.len()
    );

    // Initialize database
    let db_path = args.db_path.unwrap_or_else(config::default_db_path);
    let store = SqliteStore::open(&db_path)?;

    let engine = Engine::new(Arc::new(store), Arc::new(CatalogFile::new(&args.catalog)))
        .with_options(config.engine_options());

    let state = Arc::new(AppState {
        engine: Arc::new(engine),
        pass_timeout: config.pass_timeout(),
    });

    let app = api::create_router(state);

    // Parse bind address
    let addr: SocketAddr = args.bind.parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
