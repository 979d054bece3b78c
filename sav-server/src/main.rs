use std::sync::Arc;

use clap::Parser;
use sav_core::{FileLocalStore, PgRemoteStore, RuntimeFlags, SavConfig};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use sav_server::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "sav.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match SavConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.service.log_level.as_str()));
    fmt().with_env_filter(filter).init();

    // Connect to DB
    let pool = match sav_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match sav_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ SAV DB health check passed");
        return Ok(());
    }

    let local = FileLocalStore::open(config.storage.resolved_dir())?;
    let flags = RuntimeFlags::resolve(&config.access, &local);
    tracing::info!(dev_mode = flags.dev_mode(), source = ?flags.source(), "Runtime flags resolved");

    if !config.http.enabled {
        tracing::warn!("HTTP API disabled in config — nothing to serve");
        return Ok(());
    }

    let state = Arc::new(AppState::new(
        Arc::new(PgRemoteStore::new(pool)),
        Arc::new(local),
        config,
        flags,
    ));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    sav_server::http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
