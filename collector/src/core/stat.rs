use serde::{Deserialize, Serialize};

/// Backend lifecycle state reported by the storage node; anything else
/// demotes the backend to STALLED with a NotEnabled detail.
pub const BACKEND_STATE_ENABLED: u64 = 1;

/// One node-level sample: load average plus cumulative link counters summed
/// over non-loopback interfaces.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeStat {
    pub ts_sec: u64,
    pub ts_usec: u64,
    pub la1: f64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

impl NodeStat {
    pub fn timestamp(&self) -> u64 {
        self.ts_sec * 1_000_000 + self.ts_usec
    }
}

/// Raw per-backend sample as reported by the storage node. Timestamps are
/// inherited from the node payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendStat {
    pub backend_id: u64,
    pub ts_sec: u64,
    pub ts_usec: u64,

    // dstat
    pub read_ios: u64,
    pub write_ios: u64,
    pub read_ticks: u64,
    pub write_ticks: u64,
    pub io_ticks: u64,
    pub read_sectors: u64,
    pub dstat_error: u64,

    // vfs
    pub fsid: u64,
    pub vfs_blocks: u64,
    pub vfs_bavail: u64,
    pub vfs_bsize: u64,
    pub vfs_error: u64,

    // summary_stats
    pub base_size: u64,
    pub records_total: u64,
    pub records_removed: u64,
    pub records_removed_size: u64,
    pub want_defrag: u64,

    // config
    pub blob_size_limit: u64,
    pub blob_size: u64,
    pub group: u64,
    pub data_path: String,
    pub file_path: String,

    // base_stats
    pub max_blob_base_size: u64,

    // status
    pub state: u64,
    pub defrag_state: u64,
    pub read_only: bool,
    pub last_start_ts_sec: u64,
    pub last_start_ts_usec: u64,

    // commands: cumulative byte/time counters, cache/disk x internal+outside,
    // LOOKUP+READ on the read side, WRITE on the write side
    pub ell_cache_write_size: u64,
    pub ell_cache_write_time: u64,
    pub ell_disk_write_size: u64,
    pub ell_disk_write_time: u64,
    pub ell_cache_read_size: u64,
    pub ell_cache_read_time: u64,
    pub ell_disk_read_size: u64,
    pub ell_disk_read_time: u64,

    // io queues
    pub io_blocking_size: u64,
    pub io_nonblocking_size: u64,

    // stats map, eblob.<id>.disk.stat_commit.errors.30
    pub stat_commit_rofs_errors: u64,
}

impl BackendStat {
    pub fn timestamp(&self) -> u64 {
        self.ts_sec * 1_000_000 + self.ts_usec
    }

    pub fn last_start_timestamp(&self) -> u64 {
        self.last_start_ts_sec * 1_000_000 + self.last_start_ts_usec
    }
}

/// Derived command throughput, bytes per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandStat {
    pub ell_disk_read_rate: f64,
    pub ell_disk_write_rate: f64,
    pub ell_net_read_rate: f64,
    pub ell_net_write_rate: f64,
}

impl CommandStat {
    /// Updates rates from two consecutive samples. Intervals of one second
    /// or less are skipped (forced refreshes), and a counter that went
    /// backwards leaves its family untouched.
    pub fn calculate(&mut self, old_stat: &BackendStat, new_stat: &BackendStat) {
        let dt =
            new_stat.timestamp() as f64 / 1_000_000.0 - old_stat.timestamp() as f64 / 1_000_000.0;
        if dt <= 1.0 {
            return;
        }

        let disk_read = new_stat.ell_disk_read_size as i64 - old_stat.ell_disk_read_size as i64;
        let disk_written =
            new_stat.ell_disk_write_size as i64 - old_stat.ell_disk_write_size as i64;
        let cache_read = new_stat.ell_cache_read_size as i64 - old_stat.ell_cache_read_size as i64;
        let cache_written =
            new_stat.ell_cache_write_size as i64 - old_stat.ell_cache_write_size as i64;

        if disk_read >= 0 {
            self.ell_disk_read_rate = disk_read as f64 / dt;
            if cache_read >= 0 {
                self.ell_net_read_rate = (disk_read + cache_read) as f64 / dt;
            }
        }

        if disk_written >= 0 {
            self.ell_disk_write_rate = disk_written as f64 / dt;
            if cache_written >= 0 {
                self.ell_net_write_rate = (disk_written + cache_written) as f64 / dt;
            }
        }
    }

    pub fn clear(&mut self) {
        *self = CommandStat::default();
    }
}
