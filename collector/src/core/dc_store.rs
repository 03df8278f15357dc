use std::path::Path;
use std::sync::Arc;

use rocksdb::{IteratorMode, Options, ReadOptions, WriteOptions, DB};
use serde::{Deserialize, Serialize};
use tracing::error;

const MAX_OPEN_FILES: i32 = 512;

const HOST_KEY_PREFIX: &str = "host";

/// One host → datacenter record, as persisted in the cache store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub host: String,
    pub dc: String,
    /// Wall-clock seconds of the last successful lookup.
    pub timestamp: i64,
}

/// The persistent side of the DC cache: upsert plus query by timestamp.
pub trait DcStore: Send + Sync {
    fn upsert(&self, info: &HostInfo) -> anyhow::Result<()>;
    fn newer_than(&self, timestamp: i64) -> anyhow::Result<Vec<HostInfo>>;
}

/// RocksDB-backed record store, `host:{hostname}` keys with JSON values.
#[derive(Clone)]
pub struct KvDcStore {
    inner: Arc<DB>,
}

impl KvDcStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_level_compaction_dynamic_level_bytes(true);
        opts.set_max_open_files(MAX_OPEN_FILES);
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);

        let db = DB::open(&opts, path)?;
        Ok(Self {
            inner: Arc::new(db),
        })
    }
}

impl DcStore for KvDcStore {
    fn upsert(&self, info: &HostInfo) -> anyhow::Result<()> {
        let key = format!("{}:{}", HOST_KEY_PREFIX, info.host);
        let buf = serde_json::to_vec(info)?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.inner.put_opt(key.as_bytes(), buf, &write_opts)?;
        Ok(())
    }

    fn newer_than(&self, timestamp: i64) -> anyhow::Result<Vec<HostInfo>> {
        let mut result = Vec::new();
        let readopts = ReadOptions::default();
        let prefix = format!("{}:", HOST_KEY_PREFIX);

        for kv in self.inner.iterator_opt(IteratorMode::Start, readopts) {
            let (k, v) = kv?;
            if !k.starts_with(prefix.as_bytes()) {
                continue;
            }
            match serde_json::from_slice::<HostInfo>(&v) {
                Ok(info) => {
                    if info.timestamp > timestamp {
                        result.push(info);
                    }
                }
                Err(e) => {
                    error!(
                        "skipping malformed host record '{}': {}",
                        String::from_utf8_lossy(&k),
                        e
                    );
                }
            }
        }

        Ok(result)
    }
}
