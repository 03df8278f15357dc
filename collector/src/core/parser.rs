use std::collections::BTreeMap;

use serde::Deserialize;

use crate::core::stat::{BackendStat, NodeStat};

/// EROFS code inside the `stats` map key; every other error code is ignored.
const STAT_COMMIT_ROFS_CODE: &str = "30";

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed monitor stats payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid backend id '{0}' in backends map")]
    BadBackendId(String),
}

/// Everything extracted from one monitor-stats payload. The caller merges
/// `rofs_errors` into the matching backend stats before applying them.
#[derive(Debug, Default)]
pub struct ParsedStats {
    pub node: NodeStat,
    pub backends: Vec<BackendStat>,
    pub rofs_errors: BTreeMap<u64, u64>,
}

// Raw payload shape. Absent sub-trees leave the corresponding fields zeroed
// (the nodes only report what they have); present values are type-checked
// strictly, and a mismatch fails the whole payload.

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawPayload {
    timestamp: RawTimeval,
    procfs: RawProcfs,
    backends: BTreeMap<String, RawBackend>,
    stats: BTreeMap<String, RawCounter>,
}

#[derive(Deserialize, Default, Clone, Copy)]
#[serde(default)]
struct RawTimeval {
    tv_sec: u64,
    tv_usec: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawProcfs {
    vm: RawVm,
    net: RawNet,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawVm {
    la: Vec<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawNet {
    net_interfaces: BTreeMap<String, RawInterface>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawInterface {
    receive: RawBytes,
    transmit: RawBytes,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawBytes {
    bytes: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawBackend {
    backend: RawBackendInner,
    commands: RawCommands,
    io: RawIo,
    status: RawStatus,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawBackendInner {
    base_stats: BTreeMap<String, RawBaseStat>,
    config: RawBackendConfig,
    dstat: RawDstat,
    summary_stats: RawSummaryStats,
    vfs: RawVfs,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawBaseStat {
    base_size: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawBackendConfig {
    blob_size: u64,
    blob_size_limit: u64,
    data: String,
    file: String,
    group: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawDstat {
    error: u64,
    io_ticks: u64,
    read_ios: u64,
    read_sectors: u64,
    read_ticks: u64,
    write_ios: u64,
    write_ticks: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawSummaryStats {
    base_size: u64,
    records_removed: u64,
    records_removed_size: u64,
    records_total: u64,
    want_defrag: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawVfs {
    bavail: u64,
    blocks: u64,
    bsize: u64,
    error: u64,
    fsid: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawCommands {
    #[serde(rename = "LOOKUP")]
    lookup: RawCommandFamily,
    #[serde(rename = "READ")]
    read: RawCommandFamily,
    #[serde(rename = "WRITE")]
    write: RawCommandFamily,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawCommandFamily {
    cache: RawCommandSide,
    disk: RawCommandSide,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawCommandSide {
    internal: RawSizeTime,
    outside: RawSizeTime,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawSizeTime {
    size: u64,
    time: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawIo {
    blocking: RawQueue,
    nonblocking: RawQueue,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawQueue {
    current_size: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawStatus {
    defrag_state: u64,
    last_start: RawTimeval,
    read_only: bool,
    state: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawCounter {
    count: u64,
}

fn side_size(side: &RawCommandSide) -> u64 {
    side.internal.size + side.outside.size
}

fn side_time(side: &RawCommandSide) -> u64 {
    side.internal.time + side.outside.time
}

fn backend_stat(id: u64, ts: RawTimeval, raw: &RawBackend) -> BackendStat {
    let inner = &raw.backend;
    let commands = &raw.commands;

    BackendStat {
        backend_id: id,
        ts_sec: ts.tv_sec,
        ts_usec: ts.tv_usec,

        read_ios: inner.dstat.read_ios,
        write_ios: inner.dstat.write_ios,
        read_ticks: inner.dstat.read_ticks,
        write_ticks: inner.dstat.write_ticks,
        io_ticks: inner.dstat.io_ticks,
        read_sectors: inner.dstat.read_sectors,
        dstat_error: inner.dstat.error,

        fsid: inner.vfs.fsid,
        vfs_blocks: inner.vfs.blocks,
        vfs_bavail: inner.vfs.bavail,
        vfs_bsize: inner.vfs.bsize,
        vfs_error: inner.vfs.error,

        base_size: inner.summary_stats.base_size,
        records_total: inner.summary_stats.records_total,
        records_removed: inner.summary_stats.records_removed,
        records_removed_size: inner.summary_stats.records_removed_size,
        want_defrag: inner.summary_stats.want_defrag,

        blob_size_limit: inner.config.blob_size_limit,
        blob_size: inner.config.blob_size,
        group: inner.config.group,
        data_path: inner.config.data.clone(),
        file_path: inner.config.file.clone(),

        max_blob_base_size: inner
            .base_stats
            .values()
            .map(|b| b.base_size)
            .max()
            .unwrap_or(0),

        state: raw.status.state,
        defrag_state: raw.status.defrag_state,
        read_only: raw.status.read_only,
        last_start_ts_sec: raw.status.last_start.tv_sec,
        last_start_ts_usec: raw.status.last_start.tv_usec,

        // read side sums LOOKUP and READ, write side is WRITE alone
        ell_cache_write_size: side_size(&commands.write.cache),
        ell_cache_write_time: side_time(&commands.write.cache),
        ell_disk_write_size: side_size(&commands.write.disk),
        ell_disk_write_time: side_time(&commands.write.disk),
        ell_cache_read_size: side_size(&commands.read.cache) + side_size(&commands.lookup.cache),
        ell_cache_read_time: side_time(&commands.read.cache) + side_time(&commands.lookup.cache),
        ell_disk_read_size: side_size(&commands.read.disk) + side_size(&commands.lookup.disk),
        ell_disk_read_time: side_time(&commands.read.disk) + side_time(&commands.lookup.disk),

        io_blocking_size: raw.io.blocking.current_size,
        io_nonblocking_size: raw.io.nonblocking.current_size,

        stat_commit_rofs_errors: 0,
    }
}

/// Splits a `stats` map key of the form
/// `eblob.<backendId>.disk.stat_commit.errors.<code>`; returns the backend id
/// for EROFS entries, `None` for anything else.
fn rofs_backend_id(key: &str) -> Option<u64> {
    let mut parts = key.split('.');
    if parts.next() != Some("eblob") {
        return None;
    }
    let id = parts.next()?.parse().ok()?;
    if parts.next() != Some("disk")
        || parts.next() != Some("stat_commit")
        || parts.next() != Some("errors")
        || parts.next() != Some(STAT_COMMIT_ROFS_CODE)
        || parts.next().is_some()
    {
        return None;
    }
    Some(id)
}

/// Decodes one monitor-stats payload into typed records. Any structural
/// violation (wrong JSON type, malformed number) fails the whole payload.
pub fn parse_stats(payload: &str) -> Result<ParsedStats, ParseError> {
    let raw: RawPayload = serde_json::from_str(payload)?;

    let mut node = NodeStat {
        ts_sec: raw.timestamp.tv_sec,
        ts_usec: raw.timestamp.tv_usec,
        la1: raw.procfs.vm.la.first().copied().unwrap_or(0.0),
        tx_bytes: 0,
        rx_bytes: 0,
    };

    for (name, iface) in &raw.procfs.net.net_interfaces {
        if name == "lo" {
            continue;
        }
        node.rx_bytes += iface.receive.bytes;
        node.tx_bytes += iface.transmit.bytes;
    }

    let mut backends = Vec::with_capacity(raw.backends.len());
    for (key, raw_backend) in &raw.backends {
        let id: u64 = key
            .parse()
            .map_err(|_| ParseError::BadBackendId(key.clone()))?;
        backends.push(backend_stat(id, raw.timestamp, raw_backend));
    }

    let mut rofs_errors = BTreeMap::new();
    for (key, counter) in &raw.stats {
        if let Some(id) = rofs_backend_id(key) {
            rofs_errors.insert(id, counter.count);
        }
    }

    Ok(ParsedStats {
        node,
        backends,
        rofs_errors,
    })
}
