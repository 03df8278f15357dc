use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum_server::Server;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use common::config::Config;
use common::url_utils::parse_socket_addr;

use crate::core::dc_store::{DcStore, KvDcStore};
use crate::core::inventory::{dc_reload_task, DcLookup, HttpDcLookup, Inventory};
use crate::core::refresh::{collector_loop, HttpMetaSource, HttpStatSource, MetaSource, StatSource};
use crate::core::routes::router;
use crate::core::state::CollectorState;

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Path to the collector JSON config
    #[arg(long, default_value = "./collector.json")]
    config: PathBuf,

    /// Override the listen address from the config
    #[arg(long)]
    listen: Option<String>,
}

fn open_dc_store(config: &Config) -> Option<Arc<dyn DcStore>> {
    if config.metadata.url.is_empty() || config.metadata.inventory.db.is_empty() {
        warn!("not connecting to inventory database because it was not configured");
        return None;
    }

    let path = Path::new(&config.metadata.url).join(&config.metadata.inventory.db);
    match KvDcStore::open(&path) {
        Ok(store) => {
            info!("successfully opened inventory database {}", path.display());
            Some(Arc::new(store))
        }
        Err(e) => {
            error!("inventory database unavailable: {:#}", e);
            None
        }
    }
}

fn connect_dc_lookup(config: &Config) -> Option<Arc<dyn DcLookup>> {
    if config.inventory_url.is_empty() {
        warn!("not connecting to inventory worker because it was not configured");
        return None;
    }

    match HttpDcLookup::new(config) {
        Ok(lookup) => Some(Arc::new(lookup)),
        Err(e) => {
            error!(
                "failed to connect to service {}: {:#}",
                config.inventory_service_name(),
                e
            );
            None
        }
    }
}

pub async fn serve(serve_args: ServeArgs) -> anyhow::Result<()> {
    let mut config = Config::load(&serve_args.config)?;
    if let Some(listen) = serve_args.listen {
        config.listen = listen;
    }
    let config = Arc::new(config);

    let inventory = Arc::new(Inventory::new(
        &config,
        open_dc_store(&config),
        connect_dc_lookup(&config),
    ));

    let state = CollectorState::new(config.clone(), inventory.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel::<bool>(false);

    let stats: Arc<dyn StatSource> = Arc::new(HttpStatSource::new(&config));
    let meta: Arc<dyn MetaSource> = Arc::new(HttpMetaSource::new(&config));
    let collector_handle = tokio::spawn(collector_loop(
        state.clone(),
        stats,
        meta,
        shutdown_rx.clone(),
    ));

    let reload_handle = tokio::spawn(dc_reload_task(
        inventory.clone(),
        Duration::from_secs(config.infrastructure_dc_cache_update_period.max(1)),
        shutdown_rx,
    ));

    let app = router(state);

    let socket_addr = parse_socket_addr(&config.listen)?;
    let server = Server::bind(socket_addr).serve(app.into_make_service());

    info!("listening on {}", config.listen);

    // Graceful shutdown: ctrl+c
    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    let _ = shutdown_tx.send(true);
    inventory.stop();
    let _ = collector_handle.await;
    let _ = reload_handle.await;

    Ok(())
}
