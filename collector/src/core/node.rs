use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::anyhow;

use common::time_utils::timeval_user_friendly;

use crate::core::backend::{Backend, BackendStatus};
use crate::core::fs::{Fs, FsStatus};
use crate::core::stat::{BackendStat, NodeStat};

/// Stable node identity: `host:port:family`. Hosts may themselves contain
/// colons (IPv6), so parsing splits from the right.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub host: String,
    pub port: u16,
    pub family: u32,
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.family)
    }
}

impl FromStr for NodeKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, ':');
        let family = parts
            .next()
            .ok_or_else(|| anyhow!("invalid node key '{}'", s))?;
        let port = parts
            .next()
            .ok_or_else(|| anyhow!("invalid node key '{}'", s))?;
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow!("invalid node key '{}'", s))?;

        Ok(NodeKey {
            host: host.to_string(),
            port: port
                .parse()
                .map_err(|_| anyhow!("invalid port in node key '{}'", s))?,
            family: family
                .parse()
                .map_err(|_| anyhow!("invalid family in node key '{}'", s))?,
        })
    }
}

/// Outcome of applying one backend stat; the store uses it to maintain
/// group membership.
#[derive(Debug)]
pub struct AppliedBackend {
    pub backend_key: String,
    pub group: u64,
    pub prev_group: Option<u64>,
}

/// A storage node: last node-level sample plus the backends and filesystems
/// it reported. Created on first successful poll, never destroyed.
#[derive(Clone, Debug)]
pub struct Node {
    key: String,
    host: String,
    port: u16,
    family: u32,
    stat: NodeStat,
    backends: BTreeMap<u64, Backend>,
    filesystems: BTreeMap<u64, Fs>,
    last_poll_error: Option<String>,
}

impl Node {
    pub fn new(key: &NodeKey) -> Self {
        Node {
            key: key.to_string(),
            host: key.host.clone(),
            port: key.port,
            family: key.family,
            stat: NodeStat::default(),
            backends: BTreeMap::new(),
            filesystems: BTreeMap::new(),
            last_poll_error: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn stat(&self) -> &NodeStat {
        &self.stat
    }

    pub fn backends(&self) -> &BTreeMap<u64, Backend> {
        &self.backends
    }

    pub fn backend(&self, backend_id: u64) -> Option<&Backend> {
        self.backends.get(&backend_id)
    }

    pub fn filesystems(&self) -> &BTreeMap<u64, Fs> {
        &self.filesystems
    }

    pub fn filesystem(&self, fsid: u64) -> Option<&Fs> {
        self.filesystems.get(&fsid)
    }

    pub fn set_poll_error(&mut self, error: Option<String>) {
        self.last_poll_error = error;
    }

    /// Replaces the node sample iff the incoming one is strictly newer.
    pub fn apply_stat(&mut self, stat: NodeStat) {
        if stat.timestamp() > self.stat.timestamp() {
            self.stat = stat;
        }
    }

    /// Applies one backend sample: locate-or-create the backend, rebind its
    /// filesystem if the fsid moved, and report the group binding to the
    /// caller. A sample older than the stored one is discarded.
    pub fn apply_backend_stat(&mut self, stat: BackendStat) -> Option<AppliedBackend> {
        let backend_id = stat.backend_id;
        let fsid = stat.fsid;
        let group = stat.group;
        let ts_sec = stat.ts_sec;
        let ts_usec = stat.ts_usec;
        let vfs_total = stat.vfs_blocks * stat.vfs_bsize;

        let (backend_key, prev_group, prev_fsid) = match self.backends.get_mut(&backend_id) {
            Some(backend) => {
                if stat.timestamp() < backend.stat().timestamp() {
                    return None;
                }
                let prev_group = backend.stat().group;
                let prev_fsid = backend.stat().fsid;
                backend.update(stat, self.stat.la1);
                (
                    backend.key().to_string(),
                    Some(prev_group),
                    Some(prev_fsid),
                )
            }
            None => {
                let backend = Backend::new(&self.key, stat);
                let backend_key = backend.key().to_string();
                self.backends.insert(backend_id, backend);
                (backend_key, None, None)
            }
        };

        if let Some(prev_fsid) = prev_fsid {
            if prev_fsid != fsid {
                if let Some(prev_fs) = self.filesystems.get_mut(&prev_fsid) {
                    prev_fs.remove_backend(backend_id);
                }
            }
        }

        let host = self.host.clone();
        let fs = self
            .filesystems
            .entry(fsid)
            .or_insert_with(|| Fs::new(&host, fsid));
        fs.add_backend(backend_id);
        fs.update(ts_sec, ts_usec, vfs_total);

        Some(AppliedBackend {
            backend_key,
            group,
            prev_group: prev_group.filter(|g| *g != group),
        })
    }

    pub fn recalculate(&mut self, reserved_space: f64) {
        for backend in self.backends.values_mut() {
            backend.recalculate(reserved_space);
        }
    }

    pub fn check_stalled(&mut self, now_sec: u64, stale_timeout: u64) {
        for backend in self.backends.values_mut() {
            backend.check_stalled(now_sec, stale_timeout);
        }
    }

    /// Filesystem over-commit check: sums total_space of backends in
    /// OK/BROKEN state per fsid and compares against the vfs total.
    pub fn update_fs_statuses(&mut self) {
        let mut sums: BTreeMap<u64, u64> = BTreeMap::new();
        for backend in self.backends.values() {
            if matches!(backend.status(), BackendStatus::Ok | BackendStatus::Broken) {
                *sums.entry(backend.stat().fsid).or_default() +=
                    backend.calculated().total_space;
            }
        }
        for fs in self.filesystems.values_mut() {
            fs.update_status(sums.get(&fs.fsid()).copied().unwrap_or(0));
        }
    }

    pub fn update_backend_statuses(&mut self, now_sec: u64) {
        let fs_statuses: BTreeMap<u64, FsStatus> = self
            .filesystems
            .iter()
            .map(|(fsid, fs)| (*fsid, fs.status()))
            .collect();
        for backend in self.backends.values_mut() {
            let fs_status = fs_statuses
                .get(&backend.stat().fsid)
                .copied()
                .unwrap_or(FsStatus::Ok);
            backend.update_status(fs_status, now_sec);
        }
    }

    /// Newer-timestamp-wins reconciliation of two views of the same node.
    pub fn merge(&mut self, other: &Node, have_newer: &mut bool) {
        let my_ts = self.stat.timestamp();
        let other_ts = other.stat.timestamp();
        if my_ts < other_ts {
            self.stat = other.stat.clone();
        } else if my_ts > other_ts {
            *have_newer = true;
        }

        for (backend_id, other_backend) in &other.backends {
            match self.backends.get_mut(backend_id) {
                Some(backend) => backend.merge(other_backend, have_newer),
                None => {
                    self.backends.insert(*backend_id, other_backend.clone());
                }
            }
        }

        for (fsid, other_fs) in &other.filesystems {
            if !self.filesystems.contains_key(fsid) {
                self.filesystems.insert(*fsid, other_fs.clone());
            }
        }
    }

    pub fn print_info(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Node {{");
        let _ = writeln!(out, "  key: {}", self.key);
        let _ = writeln!(
            out,
            "  ts: {}",
            timeval_user_friendly(self.stat.ts_sec, self.stat.ts_usec)
        );
        let _ = writeln!(out, "  la: {}", self.stat.la1);
        let _ = writeln!(out, "  tx_bytes: {}", self.stat.tx_bytes);
        let _ = writeln!(out, "  rx_bytes: {}", self.stat.rx_bytes);
        let _ = writeln!(out, "  number of backends: {}", self.backends.len());
        let _ = writeln!(out, "  number of filesystems: {}", self.filesystems.len());
        if let Some(error) = &self.last_poll_error {
            let _ = writeln!(out, "  last_poll_error: '{}'", error);
        }
        let _ = write!(out, "}}");
        out
    }
}
