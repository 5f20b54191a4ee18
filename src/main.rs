mod actor;
mod api;
mod auction;
mod catalog;
mod increment;
mod ledger;
mod notify;
mod registry;
mod resolver;
mod scheduler;

use crate::actor::ActorConfig;
use crate::api::AppState;
use crate::catalog::{InMemoryCatalog, SharedCatalog};
use crate::ledger::{InMemoryLedger, PostgresLedger, SharedBidLedger};
use crate::notify::LogNotifier;
use crate::registry::AuctionRegistry;
use crate::scheduler::CloseScheduler;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug)]
struct Config {
    listen: SocketAddr,
    database_url: Option<String>,
    queue_depth: usize,
    retire_after: Duration,
}

impl Config {
    fn from_env() -> Result<Self> {
        let listen = std::env::var("GAVEL_LISTEN")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_owned())
            .parse()
            .context("invalid GAVEL_LISTEN")?;
        let queue_depth = match std::env::var("GAVEL_QUEUE_DEPTH") {
            Ok(raw) => raw.parse().context("invalid GAVEL_QUEUE_DEPTH")?,
            Err(_) => 256,
        };
        let retire_after = match std::env::var("GAVEL_RETIRE_AFTER_SECS") {
            Ok(raw) => {
                Duration::from_secs(raw.parse().context("invalid GAVEL_RETIRE_AFTER_SECS")?)
            }
            Err(_) => Duration::from_secs(300),
        };
        Ok(Self {
            listen,
            database_url: std::env::var("DATABASE_URL").ok(),
            queue_depth,
            retire_after,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let ledger: SharedBidLedger = match &config.database_url {
        Some(url) => Arc::new(PostgresLedger::connect(url)?),
        None => {
            info!("no DATABASE_URL, using the in-memory ledger");
            Arc::new(InMemoryLedger::new())
        }
    };
    let catalog: SharedCatalog = Arc::new(InMemoryCatalog::new());

    let registry = Arc::new(AuctionRegistry::new(
        ledger,
        catalog.clone(),
        Arc::new(LogNotifier),
        ActorConfig {
            queue_depth: config.queue_depth,
            retire_after: config.retire_after,
        },
    ));

    let scheduler = CloseScheduler::new(registry.clone());
    scheduler.recover(&*catalog).await?;
    tokio::spawn(scheduler.clone().run());

    tokio::spawn({
        let registry = registry.clone();
        async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                registry.sweep();
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    ctrlc::set_handler({
        let shutdown_tx = parking_lot::Mutex::new(Some(shutdown_tx));
        move || {
            eprintln!("Stopping...");
            if let Some(tx) = shutdown_tx.lock().take() {
                let _ = tx.send(());
            }
        }
    })?;

    let app = api::router(AppState {
        registry,
        catalog,
        scheduler,
    });

    info!(listen = %config.listen, "serving");
    axum::Server::try_bind(&config.listen)?
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await?;

    Ok(())
}
