use std::collections::BTreeSet;
use std::fmt::Write as _;

use tracing::info;

use common::time_utils::timeval_user_friendly;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum FsStatus {
    #[default]
    Ok,
    Broken,
}

impl FsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsStatus::Ok => "OK",
            FsStatus::Broken => "BROKEN",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FsStat {
    pub ts_sec: u64,
    pub ts_usec: u64,
    /// Total space of the underlying filesystem, from the last backend vfs
    /// sample.
    pub total_space: u64,
}

/// A physical filesystem on a host, aggregating the backends that reported
/// its fsid.
#[derive(Clone, Debug)]
pub struct Fs {
    key: String,
    fsid: u64,
    host: String,
    backend_ids: BTreeSet<u64>,
    stat: FsStat,
    status: FsStatus,
}

impl Fs {
    pub fn new(host: &str, fsid: u64) -> Self {
        Fs {
            key: format!("{}/{}", host, fsid),
            fsid,
            host: host.to_string(),
            backend_ids: BTreeSet::new(),
            stat: FsStat::default(),
            status: FsStatus::Ok,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fsid(&self) -> u64 {
        self.fsid
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn stat(&self) -> &FsStat {
        &self.stat
    }

    pub fn status(&self) -> FsStatus {
        self.status
    }

    pub fn backend_ids(&self) -> &BTreeSet<u64> {
        &self.backend_ids
    }

    pub fn add_backend(&mut self, backend_id: u64) {
        self.backend_ids.insert(backend_id);
    }

    pub fn remove_backend(&mut self, backend_id: u64) {
        self.backend_ids.remove(&backend_id);
    }

    pub fn update(&mut self, ts_sec: u64, ts_usec: u64, vfs_total_space: u64) {
        self.stat.ts_sec = ts_sec;
        self.stat.ts_usec = ts_usec;
        self.stat.total_space = vfs_total_space;
    }

    /// BROKEN when the configured blob limits of the OK/BROKEN backends
    /// over-commit the filesystem.
    pub fn update_status(&mut self, backend_total_space: u64) {
        let prev = self.status;
        self.status = if backend_total_space <= self.stat.total_space {
            FsStatus::Ok
        } else {
            FsStatus::Broken
        };
        if self.status != prev {
            info!(
                "FS {} status change {} -> {}",
                self.key,
                prev.as_str(),
                self.status.as_str()
            );
        }
    }

    pub fn print_info(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "FS {{");
        let _ = writeln!(out, "  host: {}", self.host);
        let _ = writeln!(out, "  fsid: {}", self.fsid);
        let _ = writeln!(out, "  Stat {{");
        let _ = writeln!(
            out,
            "    ts: {}",
            timeval_user_friendly(self.stat.ts_sec, self.stat.ts_usec)
        );
        let _ = writeln!(out, "    total_space: {}", self.stat.total_space);
        let _ = writeln!(out, "  }}");
        let _ = writeln!(out, "  number of backends: {}", self.backend_ids.len());
        let _ = writeln!(out, "  status: {}", self.status.as_str());
        let _ = write!(out, "}}");
        out
    }
}
