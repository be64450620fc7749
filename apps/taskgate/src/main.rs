use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

mod cli;
mod dsn;

use taskgate_adaptor_impl::build_registry;
use taskgate_core::{AppState, PricingTable, UpstreamClientConfig, WreqUpstreamClient, sweep_once};
use taskgate_router::api_router;
use taskgate_storage::SeaOrmStorage;

use crate::cli::{Cli, env_patch};
use crate::dsn::{DEFAULT_SQLITE_DSN, ensure_sqlite_dsn};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("taskgate failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Merge order: CLI over environment over built-in defaults.
    let mut patch = env_patch();
    patch.overlay(cli.to_patch());
    if patch.dsn.is_none() {
        patch.dsn = Some(DEFAULT_SQLITE_DSN.to_string());
    }
    let config = patch.into_config()?;
    ensure_sqlite_dsn(&config.dsn)?;

    let storage = SeaOrmStorage::connect(&config.dsn).await?;
    info!(dsn = %config.dsn, "db connected");
    storage.sync().await?;

    let user_id = storage
        .ensure_user("admin", &cli.access_key, "default", cli.initial_quota)
        .await?;
    info!(user_id, "initial user ensured");

    let client = WreqUpstreamClient::new(UpstreamClientConfig::from_global(&config))?;
    let storage = Arc::new(storage);
    let state = AppState {
        config: Arc::new(config.clone()),
        registry: Arc::new(build_registry()),
        pricing: Arc::new(PricingTable::default()),
        client: Arc::new(client),
        tasks: storage.clone(),
        ledger: storage.clone(),
        channels: storage.clone(),
        users: storage,
    };

    if config.sweep_interval_secs > 0 {
        let sweep_state = state.clone();
        let interval = Duration::from_secs(config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let polled = sweep_once(&sweep_state).await;
                if polled > 0 {
                    info!(polled, "sweep pass finished");
                }
            }
        });
        info!(interval_secs = config.sweep_interval_secs, "task sweep enabled");
    } else {
        warn!("task sweep disabled; unfinished tasks advance only on client fetch");
    }

    let app = api_router(state);
    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("taskgate=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
