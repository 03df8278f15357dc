use std::fmt::Write as _;

use crate::core::fs::FsStatus;
use crate::core::stat::{BackendStat, CommandStat, BACKEND_STATE_ENABLED};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum BackendStatus {
    #[default]
    Init,
    Ok,
    Ro,
    Stalled,
    Broken,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Init => "INIT",
            BackendStatus::Ok => "OK",
            BackendStatus::Ro => "RO",
            BackendStatus::Stalled => "STALLED",
            BackendStatus::Broken => "BROKEN",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StatusDetail {
    #[default]
    Init,
    Ok,
    Stalled,
    NotEnabled,
    FsBroken,
    ReadOnly,
    HasCommitErrors,
}

/// Everything derived from raw stats: capacity arithmetic, rates, stall and
/// status state. Recomputed once per refresh cycle.
#[derive(Clone, Debug, Default)]
pub struct Calculated {
    pub vfs_total_space: u64,
    pub vfs_free_space: u64,
    pub vfs_used_space: u64,

    pub records: u64,
    pub fragmentation: f64,

    pub total_space: u64,
    pub free_space: u64,
    pub used_space: u64,
    pub effective_space: u64,
    pub effective_free_space: u64,

    pub read_rps: u64,
    pub write_rps: u64,
    pub max_read_rps: u64,
    pub max_write_rps: u64,

    pub command_stat: CommandStat,

    pub stalled: bool,
    pub stat_commit_rofs_errors_diff: u64,

    pub status: BackendStatus,
    pub status_detail: StatusDetail,
    pub status_text: String,

    pub base_path: String,
}

#[derive(Clone, Debug)]
pub struct Backend {
    key: String,
    node_key: String,
    stat: BackendStat,
    calculated: Calculated,
}

impl Backend {
    pub fn new(node_key: &str, stat: BackendStat) -> Self {
        let mut backend = Backend {
            key: format!("{}/{}", node_key, stat.backend_id),
            node_key: node_key.to_string(),
            stat: BackendStat::default(),
            calculated: Calculated::default(),
        };
        backend.calculate_base_path(&stat);
        backend.stat = stat;
        backend
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn node_key(&self) -> &str {
        &self.node_key
    }

    pub fn stat(&self) -> &BackendStat {
        &self.stat
    }

    pub fn calculated(&self) -> &Calculated {
        &self.calculated
    }

    pub fn status(&self) -> BackendStatus {
        self.calculated.status
    }

    /// Replaces the stored stat with a newer sample and updates the
    /// delta-derived fields. Rates are only touched when the interval is
    /// longer than one second, so a forced refresh right after a scheduled
    /// one leaves them unchanged.
    pub fn update(&mut self, stat: BackendStat, node_la1: f64) {
        let d_ts =
            (stat.timestamp() as f64 - self.stat.timestamp() as f64) / 1_000_000.0;

        if d_ts > 1.0 && stat.dstat_error == 0 {
            let read_rps =
                (stat.read_ios.saturating_sub(self.stat.read_ios) as f64 / d_ts) as u64;
            let write_rps =
                (stat.write_ios.saturating_sub(self.stat.write_ios) as f64 / d_ts) as u64;
            self.calculated.read_rps = read_rps;
            self.calculated.write_rps = write_rps;

            // RPS_FORMULA: load-shaped ceiling with a floor of 100
            let la = node_la1.max(0.01);
            self.calculated.max_read_rps = (read_rps as f64 / la).max(100.0) as u64;
            self.calculated.max_write_rps = (write_rps as f64 / la).max(100.0) as u64;
        }

        self.calculated.command_stat.calculate(&self.stat, &stat);

        // Commit-EROFS accumulation resets on backend restart or on a
        // counter that went backwards.
        if self.stat.last_start_timestamp() < stat.last_start_timestamp()
            || self.stat.stat_commit_rofs_errors > stat.stat_commit_rofs_errors
        {
            self.calculated.stat_commit_rofs_errors_diff = 0;
        } else {
            self.calculated.stat_commit_rofs_errors_diff +=
                stat.stat_commit_rofs_errors - self.stat.stat_commit_rofs_errors;
        }

        self.calculate_base_path(&stat);
        self.stat = stat;
    }

    fn calculate_base_path(&mut self, stat: &BackendStat) {
        if !stat.data_path.is_empty() {
            self.calculated.base_path = stat.data_path.clone();
        } else if !stat.file_path.is_empty() {
            self.calculated.base_path = stat.file_path.clone();
        }
    }

    /// Capacity arithmetic and fragmentation, per cycle.
    pub fn recalculate(&mut self, reserved_space: f64) {
        let c = &mut self.calculated;
        let s = &self.stat;

        c.vfs_total_space = s.vfs_blocks * s.vfs_bsize;
        c.vfs_free_space = s.vfs_bavail * s.vfs_bsize;
        c.vfs_used_space = c.vfs_total_space - c.vfs_free_space;

        c.records = s.records_total.saturating_sub(s.records_removed);
        c.fragmentation = s.records_removed as f64 / s.records_total.max(1) as f64;

        if s.blob_size_limit > 0 {
            // vfs_total_space can be less than blob_size_limit on a
            // misconfigured node
            c.total_space = s.blob_size_limit.min(c.vfs_total_space);
            c.used_space = s.base_size;
            let remaining = (c.total_space as i64 - c.used_space as i64).max(0);
            c.free_space = (c.vfs_free_space as i64).min(remaining) as u64;
        } else {
            c.total_space = c.vfs_total_space;
            c.free_space = c.vfs_free_space;
            c.used_space = c.vfs_used_space;
        }

        let share = if c.vfs_total_space > 0 {
            c.total_space as f64 / c.vfs_total_space as f64
        } else {
            0.0
        };
        let reserved = (reserved_space * share * c.vfs_total_space as f64).ceil() as i64;
        c.effective_space = (c.total_space as i64 - reserved).max(0) as u64;
        c.effective_free_space = (c.free_space as i64
            - (c.total_space as i64 - c.effective_space as i64))
            .max(0) as u64;
    }

    pub fn check_stalled(&mut self, now_sec: u64, stale_timeout: u64) {
        if now_sec <= self.stat.ts_sec {
            self.calculated.stalled = false;
            return;
        }
        self.calculated.stalled = (now_sec - self.stat.ts_sec) > stale_timeout;
    }

    pub fn full(&self, reserved_space: f64) -> bool {
        let c = &self.calculated;
        if c.used_space as f64 >= c.effective_space as f64 * (1.0 - reserved_space) {
            return true;
        }
        c.effective_free_space == 0
    }

    /// Status machine, first match wins: STALLED, BROKEN (owning FS),
    /// RO, OK.
    pub fn update_status(&mut self, fs_status: FsStatus, now_sec: u64) {
        let (status, detail) = if self.calculated.stalled || self.stat.state != BACKEND_STATE_ENABLED
        {
            if self.calculated.stalled {
                (BackendStatus::Stalled, StatusDetail::Stalled)
            } else {
                (BackendStatus::Stalled, StatusDetail::NotEnabled)
            }
        } else if fs_status == FsStatus::Broken {
            (BackendStatus::Broken, StatusDetail::FsBroken)
        } else if self.stat.read_only || self.calculated.stat_commit_rofs_errors_diff > 0 {
            if self.stat.read_only {
                (BackendStatus::Ro, StatusDetail::ReadOnly)
            } else {
                (BackendStatus::Ro, StatusDetail::HasCommitErrors)
            }
        } else {
            (BackendStatus::Ok, StatusDetail::Ok)
        };

        self.calculated.status = status;
        self.calculated.status_detail = detail;
        self.calculated.status_text = self.status_text(detail, now_sec);
    }

    fn status_text(&self, detail: StatusDetail, now_sec: u64) -> String {
        match detail {
            StatusDetail::Init => {
                format!("No statistics gathered for node backend {}", self.key)
            }
            StatusDetail::Stalled => {
                let age = now_sec.saturating_sub(self.stat.ts_sec);
                format!(
                    "Statistics for node backend {} is too old: \
                     it was gathered {} seconds ago",
                    self.key, age
                )
            }
            StatusDetail::NotEnabled => {
                format!("Node backend {} has been disabled", self.key)
            }
            StatusDetail::FsBroken => format!(
                "Node backends' space limit is not properly configured on fs {}",
                self.stat.fsid
            ),
            StatusDetail::ReadOnly | StatusDetail::HasCommitErrors => {
                format!("Node backend {} is in read-only state", self.key)
            }
            StatusDetail::Ok => format!("Node {} is OK", self.key),
        }
    }

    /// Newer-timestamp-wins reconciliation of two views of the same backend.
    pub fn merge(&mut self, other: &Backend, have_newer: &mut bool) {
        let my_ts = self.stat.timestamp();
        let other_ts = other.stat.timestamp();
        if my_ts < other_ts {
            self.stat = other.stat.clone();
            self.calculated = other.calculated.clone();
        } else if my_ts > other_ts {
            *have_newer = true;
        }
    }

    pub fn print_info(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Backend {{");
        let _ = writeln!(out, "  id: {}", self.key);
        let _ = writeln!(out, "  node: {}", self.node_key);
        let _ = writeln!(out, "  group: {}", self.stat.group);
        let _ = writeln!(out, "  fsid: {}", self.stat.fsid);
        let _ = writeln!(out, "  state: {}", self.stat.state);
        let _ = writeln!(out, "  read_only: {}", self.stat.read_only);
        let _ = writeln!(out, "  base_path: '{}'", self.calculated.base_path);
        let _ = writeln!(out, "  total_space: {}", self.calculated.total_space);
        let _ = writeln!(out, "  free_space: {}", self.calculated.free_space);
        let _ = writeln!(
            out,
            "  effective_free_space: {}",
            self.calculated.effective_free_space
        );
        let _ = writeln!(out, "  status: {}", self.calculated.status.as_str());
        let _ = writeln!(out, "  status_text: '{}'", self.calculated.status_text);
        let _ = write!(out, "}}");
        out
    }
}
