//! Off-chain relayer server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p relayer --release
//!
//! # Run with a custom config path
//! CONFIG=/path/to/config.toml cargo run -p relayer
//!
//! # Configure logging level
//! RUST_LOG=info cargo run -p relayer
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to TOML configuration file (default: `config.toml`)
//! - `HOST` / `PORT` / `DATABASE_URL` — Override the matching config fields
//! - `RUST_LOG` — Log level filter (default: `info`)

use std::net::SocketAddr;
use std::sync::Arc;

use relayer::config::RelayerConfig;
use relayer_bus::EventBus;
use relayer_core::validator::Validator;
use relayer_evm::{ChainGateway, GatewayConfig};
use relayer_executor::Executor;
use relayer_http::AppState;
use relayer_store::Store;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Resolves once SIGTERM or SIGINT is received (Ctrl+C on Windows) and cancels `token`.
async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    token.cancel();
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        tracing::error!("relayer failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayerConfig::load()?;
    tracing::info!(host = %config.host, port = config.port, "loaded configuration");

    let store = Arc::new(Store::connect(&config.database_url).await?);
    let gateway = Arc::new(
        ChainGateway::connect(&config.rpc_url, &config.signer_private_key, &config.contract_address, GatewayConfig::default()).await?,
    );
    let bus = Arc::new(EventBus::new());
    let validator = Validator::new(config.fallback_chain_id);

    let executor = Arc::new(Executor::new(
        store.clone(),
        gateway.clone(),
        bus.clone(),
        validator.clone(),
        config.retry_policy,
        config.concurrency,
    ));

    let cancel = CancellationToken::new();
    let shutdown_task = tokio::spawn(shutdown_signal(cancel.clone()));

    let executor_task = tokio::spawn(executor.clone().run(cancel.clone()));
    let heartbeat_task = relayer_bus::spawn_heartbeat(bus.clone());

    let state = Arc::new(AppState {
        store,
        bus,
        executor,
        gateway,
        validator,
        rate_limiter: relayer_http::ratelimit::RateLimiter::new(),
        admin_credential: config.admin_credential,
        started_at: std::time::Instant::now(),
    });
    let app = relayer_http::router(state);

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("relayer listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    heartbeat_task.abort();
    executor_task.abort();
    shutdown_task.abort();
    tracing::info!("relayer shut down gracefully");
    Ok(())
}
