use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use common::config::Config;
use common::time_utils::utc_now_secs;

use crate::core::dc_store::{DcStore, HostInfo};

/// The external host → DC lookup worker.
#[async_trait]
pub trait DcLookup: Send + Sync {
    async fn lookup(&self, host: &str) -> anyhow::Result<String>;
}

/// HTTP client for the `<app_name>-inventory` lookup service.
pub struct HttpDcLookup {
    client: reqwest::Client,
    base_url: String,
    service: String,
}

impl HttpDcLookup {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(
                config.metadata.options.connect_timeout_ms,
            ))
            .timeout(Duration::from_millis(config.inventory_worker_timeout))
            .build()?;

        Ok(HttpDcLookup {
            client,
            base_url: config.inventory_url.trim_end_matches('/').to_string(),
            service: config.inventory_service_name(),
        })
    }
}

#[async_trait]
impl DcLookup for HttpDcLookup {
    async fn lookup(&self, host: &str) -> anyhow::Result<String> {
        let url = format!("{}/{}/dc/{}", self.base_url, self.service, host);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("inventory worker replied {}", response.status());
        }
        let dc = response.text().await?.trim().to_string();
        if dc.is_empty() {
            anyhow::bail!("inventory worker returned an empty DC for {}", host);
        }
        Ok(dc)
    }
}

/// Host → datacenter resolver: an in-memory map fronting the persistent
/// record store and the external lookup worker. Lookups never fail the
/// caller; when everything is down the host doubles as its own DC name.
pub struct Inventory {
    hosts: RwLock<HashMap<String, HostInfo>>,
    store: Option<Arc<dyn DcStore>>,
    lookup: Option<Arc<dyn DcLookup>>,
    worker_timeout: Duration,
    valid_time: i64,
    last_reload: AtomicI64,
    stopped: AtomicBool,
}

impl Inventory {
    pub fn new(
        config: &Config,
        store: Option<Arc<dyn DcStore>>,
        lookup: Option<Arc<dyn DcLookup>>,
    ) -> Self {
        Inventory {
            hosts: RwLock::new(HashMap::new()),
            store,
            lookup,
            worker_timeout: Duration::from_millis(config.inventory_worker_timeout),
            valid_time: config.infrastructure_dc_cache_valid_time as i64,
            // starts below zero so the initial download also picks up
            // persisted timestamp-0 fallback records
            last_reload: AtomicI64::new(-1),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn cached(&self, host: &str) -> Option<String> {
        match self.hosts.read() {
            Ok(hosts) => hosts.get(host).map(|info| info.dc.clone()),
            Err(e) => {
                error!("failed to acquire hosts read lock: {}", e);
                None
            }
        }
    }

    fn insert(&self, info: HostInfo) {
        match self.hosts.write() {
            Ok(mut hosts) => {
                hosts.insert(info.host.clone(), info);
            }
            Err(e) => error!("failed to acquire hosts write lock: {}", e),
        }
    }

    /// Caches host-as-DC with a zero timestamp, in the map and in the
    /// record store, so the next reload retries it through the worker
    /// instead of the next caller.
    fn cache_fallback(&self, host: &str) -> String {
        let info = HostInfo {
            host: host.to_string(),
            dc: host.to_string(),
            timestamp: 0,
        };
        self.insert(info.clone());
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert(&info) {
                error!("cannot update DC cache db: {}", e);
            }
        }
        host.to_string()
    }

    /// Resolves the datacenter of a host. Map hits return immediately; a
    /// miss goes to the external worker. On worker failure the host itself
    /// is the DC, and that fallback is cached with a zero timestamp so the
    /// next reload refreshes it instead of the next caller.
    pub async fn get_dc(&self, host: &str) -> String {
        if let Some(dc) = self.cached(host) {
            debug!("found host '{}' in map, DC is '{}'", host, dc);
            return dc;
        }

        let Some(lookup) = &self.lookup else {
            return host.to_string();
        };

        match timeout(self.worker_timeout, lookup.lookup(host)).await {
            Ok(Ok(dc)) => {
                let info = HostInfo {
                    host: host.to_string(),
                    dc: dc.clone(),
                    timestamp: utc_now_secs(),
                };
                self.insert(info.clone());
                if let Some(store) = &self.store {
                    if let Err(e) = store.upsert(&info) {
                        error!("cannot update DC cache db: {}", e);
                    }
                }
                dc
            }
            Ok(Err(e)) => {
                warn!(
                    "failed to fetch host info for '{}', defaulting DC=host: {}",
                    host, e
                );
                self.cache_fallback(host)
            }
            Err(_) => {
                warn!(
                    "DC lookup for '{}' timed out, defaulting DC=host",
                    host
                );
                self.cache_fallback(host)
            }
        }
    }

    /// One reload pass: fetch records updated since the previous reload,
    /// refresh the expired ones through the worker, persist what changed,
    /// and merge the result into the map.
    pub async fn reload(&self) {
        let Some(store) = &self.store else {
            debug!("skipping DC cache reload: no record store configured");
            return;
        };

        let since = self.last_reload.load(Ordering::SeqCst);
        let reload_start = utc_now_secs();
        info!("reloading DC cache (last update ts={})", since);

        let mut hosts = match store.newer_than(since) {
            Ok(hosts) => hosts,
            Err(e) => {
                error!("cannot load DC cache db: {}", e);
                return;
            }
        };

        // Fallback entries carry timestamp 0 and sit below every reload
        // mark; sweep them from the map so they are retried as well.
        match self.hosts.read() {
            Ok(map) => {
                for info in map.values() {
                    if info.timestamp == 0 && !hosts.iter().any(|h| h.host == info.host) {
                        hosts.push(info.clone());
                    }
                }
            }
            Err(e) => error!("failed to acquire hosts read lock: {}", e),
        }

        if let Some(lookup) = &self.lookup {
            for info in &mut hosts {
                if reload_start > info.timestamp
                    && reload_start - info.timestamp > self.valid_time
                {
                    match timeout(self.worker_timeout, lookup.lookup(&info.host)).await {
                        Ok(Ok(dc)) => {
                            info.dc = dc;
                            info.timestamp = reload_start;
                        }
                        Ok(Err(e)) => {
                            warn!("could not refresh DC for host {}: {}", info.host, e)
                        }
                        Err(_) => warn!("DC refresh for host {} timed out", info.host),
                    }
                }
            }
        }

        for info in &hosts {
            if info.timestamp >= reload_start {
                if let Err(e) = store.upsert(info) {
                    error!("cannot update DC cache db: {}", e);
                }
            }
        }

        let count = hosts.len();
        match self.hosts.write() {
            Ok(mut map) => {
                for info in hosts {
                    map.insert(info.host.clone(), info);
                }
            }
            Err(e) => error!("failed to acquire hosts write lock: {}", e),
        }

        self.last_reload.store(reload_start, Ordering::SeqCst);
        info!("updated inventory info for {} hosts", count);
    }
}

/// Periodic reload driver. The first tick fires immediately, doubling as
/// the initial cache download. The stop flag is re-checked per iteration;
/// one reload that was already scheduled when stop() ran may still fire.
pub async fn dc_reload_task(
    inventory: Arc<Inventory>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
        }

        if inventory.is_stopped() {
            break;
        }

        inventory.reload().await;
    }

    info!("DC cache reload task stopped");

    Ok(())
}
