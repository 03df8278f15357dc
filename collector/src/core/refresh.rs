use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use common::config::Config;
use common::time_utils::utc_now_secs;

use crate::core::node::NodeKey;
use crate::core::parser::parse_stats;
use crate::core::state::CollectorState;
use crate::core::storage::split_backend_key;

/// Delivers one monitor-stats JSON payload per node. The wire transport
/// behind it is not the collector's concern.
#[async_trait]
pub trait StatSource: Send + Sync {
    async fn fetch(&self, node: &NodeKey) -> anyhow::Result<String>;
}

/// Delivers the raw metadata blob a group advertises, fetched through one
/// of the group's nodes.
#[async_trait]
pub trait MetaSource: Send + Sync {
    async fn fetch(&self, node: &NodeKey, group_id: u64) -> anyhow::Result<Vec<u8>>;
}

pub struct HttpStatSource {
    client: reqwest::Client,
    poll_timeout: Duration,
}

impl HttpStatSource {
    pub fn new(config: &Config) -> Self {
        HttpStatSource {
            client: reqwest::Client::new(),
            poll_timeout: Duration::from_millis(config.node_poll_timeout),
        }
    }
}

#[async_trait]
impl StatSource for HttpStatSource {
    async fn fetch(&self, node: &NodeKey) -> anyhow::Result<String> {
        let url = format!("http://{}:{}/monitor/stats", node.host, node.port);
        let response = timeout(self.poll_timeout, self.client.get(&url).send())
            .await
            .map_err(|_| anyhow::anyhow!("poll of {} timed out", node))??;
        if !response.status().is_success() {
            anyhow::bail!("node {} replied {}", node, response.status());
        }
        let body = timeout(self.poll_timeout, response.text())
            .await
            .map_err(|_| anyhow::anyhow!("poll of {} timed out", node))??;
        Ok(body)
    }
}

pub struct HttpMetaSource {
    client: reqwest::Client,
    poll_timeout: Duration,
}

impl HttpMetaSource {
    pub fn new(config: &Config) -> Self {
        HttpMetaSource {
            client: reqwest::Client::new(),
            poll_timeout: Duration::from_millis(config.node_poll_timeout),
        }
    }
}

#[async_trait]
impl MetaSource for HttpMetaSource {
    async fn fetch(&self, node: &NodeKey, group_id: u64) -> anyhow::Result<Vec<u8>> {
        let url = format!(
            "http://{}:{}/group/{}/meta",
            node.host, node.port, group_id
        );
        let response = timeout(self.poll_timeout, self.client.get(&url).send())
            .await
            .map_err(|_| anyhow::anyhow!("metadata fetch from {} timed out", node))??;
        if !response.status().is_success() {
            anyhow::bail!("node {} replied {}", node, response.status());
        }
        let body = timeout(self.poll_timeout, response.bytes())
            .await
            .map_err(|_| anyhow::anyhow!("metadata fetch from {} timed out", node))??;
        Ok(body.to_vec())
    }
}

/// All nodes to poll this cycle: configured seeds plus everything already
/// in the graph.
fn poll_targets(state: &CollectorState) -> Vec<NodeKey> {
    let mut targets: BTreeMap<String, NodeKey> = BTreeMap::new();

    for seed in &state.config.nodes {
        match seed.parse::<NodeKey>() {
            Ok(key) => {
                targets.insert(key.to_string(), key);
            }
            Err(e) => warn!("skipping configured node '{}': {}", seed, e),
        }
    }

    match state.storage.read() {
        Ok(storage) => {
            for key in storage.nodes().keys() {
                if !targets.contains_key(key) {
                    match key.parse::<NodeKey>() {
                        Ok(parsed) => {
                            targets.insert(key.clone(), parsed);
                        }
                        Err(e) => error!("unparsable node key '{}' in storage: {}", key, e),
                    }
                }
            }
        }
        Err(e) => error!("failed to acquire storage read lock: {}", e),
    }

    targets.into_values().collect()
}

/// Groups with at least one backend, paired with a node that can serve the
/// group's metadata.
fn metadata_targets(state: &CollectorState) -> Vec<(u64, NodeKey)> {
    let mut targets = Vec::new();
    match state.storage.read() {
        Ok(storage) => {
            for (id, group) in storage.groups() {
                let node_key = group
                    .backends()
                    .iter()
                    .filter_map(|key| split_backend_key(key))
                    .find_map(|(node_key, _)| node_key.parse::<NodeKey>().ok());
                if let Some(node_key) = node_key {
                    targets.push((*id, node_key));
                }
            }
        }
        Err(e) => error!("failed to acquire storage read lock: {}", e),
    }
    targets
}

/// One refresh cycle: poll every node, apply what parsed, fetch group
/// metadata, then run the derivation pass. Per-node failures are logged
/// and never abort the cycle.
pub async fn run_cycle(state: &CollectorState, stats: &dyn StatSource, meta: &dyn MetaSource) {
    let targets = poll_targets(state);
    debug!("refresh cycle: polling {} nodes", targets.len());

    let polls = targets.into_iter().map(|key| async move {
        let result = stats.fetch(&key).await;
        (key, result)
    });
    let poll_results = join_all(polls).await;

    {
        let mut storage = match state.storage.write() {
            Ok(storage) => storage,
            Err(e) => {
                error!("failed to acquire storage write lock: {}", e);
                return;
            }
        };

        for (key, result) in poll_results {
            match result {
                Ok(payload) => match parse_stats(&payload) {
                    Ok(parsed) => storage.apply_parsed(&key, parsed),
                    Err(e) => {
                        warn!("discarding stats payload from {}: {}", key, e);
                        storage.mark_poll_failure(&key, e.to_string());
                    }
                },
                Err(e) => {
                    warn!("polling {} failed: {}", key, e);
                    storage.mark_poll_failure(&key, e.to_string());
                }
            }
        }
    }

    let meta_targets = metadata_targets(state);
    let fetches = meta_targets.into_iter().map(|(group_id, node_key)| async move {
        let result = meta.fetch(&node_key, group_id).await;
        (group_id, result)
    });
    let meta_results = join_all(fetches).await;

    let now = utc_now_secs();
    match state.storage.write() {
        Ok(mut storage) => {
            for (group_id, result) in meta_results {
                match result {
                    Ok(blob) => {
                        storage.apply_group_metadata(group_id, &blob, now as u64 * 1_000_000)
                    }
                    Err(e) => debug!("no metadata for group {}: {}", group_id, e),
                }
            }
            storage.update_all(&state.config, now as u64);
        }
        Err(e) => error!("failed to acquire storage write lock: {}", e),
    }
}

/// Refresh loop: runs a cycle per `refresh_interval` tick (the first one
/// immediately), or earlier when a forced update is requested.
pub async fn collector_loop(
    state: CollectorState,
    stats: Arc<dyn StatSource>,
    meta: Arc<dyn MetaSource>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut tick =
        tokio::time::interval(Duration::from_secs(state.config.refresh_interval.max(1)));

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = state.refresh_notify.notified() => { info!("forced refresh requested"); }
            _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
        }

        run_cycle(&state, stats.as_ref(), meta.as_ref()).await;
    }

    info!("collector loop stopped");

    Ok(())
}
