use serde::{Deserialize, Serialize};

use common::time_utils::timeval_user_friendly;

use crate::core::backend::Backend;
use crate::core::couple::Couple;
use crate::core::fs::Fs;
use crate::core::group::Group;
use crate::core::stat::CommandStat;
use crate::core::storage::Storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampView {
    pub tv_sec: u64,
    pub tv_usec: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_friendly: Option<String>,
}

impl TimestampView {
    fn new(tv_sec: u64, tv_usec: u64, show_internals: bool) -> Self {
        TimestampView {
            tv_sec,
            tv_usec,
            user_friendly: show_internals.then(|| timeval_user_friendly(tv_sec, tv_usec)),
        }
    }
}

/// Per-backend JSON snapshot: every raw counter plus the derived fields.
/// Internals (raw rofs counter, stalled flag, data/file paths) only appear
/// with `show_internals`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendView {
    pub timestamp: TimestampView,
    pub node_id: String,
    pub backend_id: u64,
    pub id: String,
    pub state: u64,
    pub vfs_blocks: u64,
    pub vfs_bavail: u64,
    pub vfs_bsize: u64,
    pub records_total: u64,
    pub records_removed: u64,
    pub records_removed_size: u64,
    pub base_size: u64,
    pub fs_id: String,
    pub defrag_state: u64,
    pub want_defrag: u64,
    pub read_ios: u64,
    pub write_ios: u64,
    pub dstat_error: u64,
    pub blob_size_limit: u64,
    pub max_blob_base_size: u64,
    pub blob_size: u64,
    pub group: u64,
    pub io_blocking_size: u64,
    pub io_nonblocking_size: u64,

    pub vfs_free_space: u64,
    pub vfs_total_space: u64,
    pub vfs_used_space: u64,
    pub records: u64,
    pub free_space: u64,
    pub total_space: u64,
    pub used_space: u64,
    pub effective_space: u64,
    pub effective_free_space: u64,
    pub fragmentation: f64,
    pub read_rps: u64,
    pub write_rps: u64,
    pub max_read_rps: u64,
    pub max_write_rps: u64,

    pub status: String,
    pub status_text: String,
    pub last_start: TimestampView,
    pub commands_stat: CommandStat,
    pub read_only: bool,
    pub stat_commit_rofs_errors_diff: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_commit_rofs_errors: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stalled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    pub base_path: String,
}

impl BackendView {
    pub fn new(backend: &Backend, show_internals: bool) -> Self {
        let stat = backend.stat();
        let calc = backend.calculated();

        BackendView {
            timestamp: TimestampView::new(stat.ts_sec, stat.ts_usec, show_internals),
            node_id: backend.node_key().to_string(),
            backend_id: stat.backend_id,
            id: backend.key().to_string(),
            state: stat.state,
            vfs_blocks: stat.vfs_blocks,
            vfs_bavail: stat.vfs_bavail,
            vfs_bsize: stat.vfs_bsize,
            records_total: stat.records_total,
            records_removed: stat.records_removed,
            records_removed_size: stat.records_removed_size,
            base_size: stat.base_size,
            fs_id: format!(
                "{}/{}",
                backend
                    .node_key()
                    .rsplitn(3, ':')
                    .nth(2)
                    .unwrap_or(backend.node_key()),
                stat.fsid
            ),
            defrag_state: stat.defrag_state,
            want_defrag: stat.want_defrag,
            read_ios: stat.read_ios,
            write_ios: stat.write_ios,
            dstat_error: stat.dstat_error,
            blob_size_limit: stat.blob_size_limit,
            max_blob_base_size: stat.max_blob_base_size,
            blob_size: stat.blob_size,
            group: stat.group,
            io_blocking_size: stat.io_blocking_size,
            io_nonblocking_size: stat.io_nonblocking_size,

            vfs_free_space: calc.vfs_free_space,
            vfs_total_space: calc.vfs_total_space,
            vfs_used_space: calc.vfs_used_space,
            records: calc.records,
            free_space: calc.free_space,
            total_space: calc.total_space,
            used_space: calc.used_space,
            effective_space: calc.effective_space,
            effective_free_space: calc.effective_free_space,
            fragmentation: calc.fragmentation,
            read_rps: calc.read_rps,
            write_rps: calc.write_rps,
            max_read_rps: calc.max_read_rps,
            max_write_rps: calc.max_write_rps,

            status: calc.status.as_str().to_string(),
            status_text: calc.status_text.clone(),
            last_start: TimestampView::new(stat.last_start_ts_sec, stat.last_start_ts_usec, false),
            commands_stat: calc.command_stat,
            read_only: stat.read_only,
            stat_commit_rofs_errors_diff: calc.stat_commit_rofs_errors_diff,

            stat_commit_rofs_errors: show_internals.then_some(stat.stat_commit_rofs_errors),
            stalled: show_internals.then_some(calc.stalled),
            data_path: show_internals.then(|| stat.data_path.clone()),
            file_path: show_internals.then(|| stat.file_path.clone()),

            base_path: calc.base_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceView {
    pub migrating: bool,
    pub job_id: String,
}

/// The decoded metadata as stored, exposed under `show_internals`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMetadataView {
    pub version: u64,
    pub frozen: bool,
    pub couple: Vec<u64>,
    pub namespace_name: String,
    pub service: ServiceView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupView {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub couple: Option<String>,
    pub backends: Vec<String>,
    pub status_text: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frozen: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_internal: Option<GroupMetadataView>,
}

impl GroupView {
    pub fn new(group: &Group, show_internals: bool) -> Self {
        let metadata = group.metadata();
        let parsed = group.metadata_parsed();
        let service = metadata.service.migrating || !metadata.service.job_id.is_empty();

        GroupView {
            id: group.id(),
            couple: group.couple().map(str::to_string),
            backends: group.backends().iter().cloned().collect(),
            status_text: group.status_text().to_string(),
            status: group.status().as_str().to_string(),
            frozen: parsed.then_some(metadata.frozen),
            version: parsed.then_some(metadata.version),
            namespace: parsed.then(|| metadata.namespace_name.clone()),
            service: (parsed && service).then(|| ServiceView {
                migrating: metadata.service.migrating,
                job_id: metadata.service.job_id.clone(),
            }),
            clean: show_internals.then(|| group.is_clean()),
            update_time: show_internals.then(|| group.update_time()),
            metadata_internal: show_internals.then(|| GroupMetadataView {
                version: metadata.version,
                frozen: metadata.frozen,
                couple: metadata.couple.clone(),
                namespace_name: metadata.namespace_name.clone(),
                service: ServiceView {
                    migrating: metadata.service.migrating,
                    job_id: metadata.service.job_id.clone(),
                },
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoupleView {
    pub id: String,
    pub groups: Vec<u64>,
    pub status: String,
    pub status_text: String,
}

impl CoupleView {
    pub fn new(couple: &Couple) -> Self {
        CoupleView {
            id: couple.key().to_string(),
            groups: couple.group_ids().to_vec(),
            status: couple.status().as_str().to_string(),
            status_text: couple.status_text().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsView {
    pub timestamp: TimestampView,
    pub host: String,
    pub fsid: u64,
    pub total_space: u64,
    pub status: String,
}

impl FsView {
    pub fn new(fs: &Fs) -> Self {
        FsView {
            timestamp: TimestampView::new(fs.stat().ts_sec, fs.stat().ts_usec, false),
            host: fs.host().to_string(),
            fsid: fs.fsid(),
            total_space: fs.stat().total_space,
            status: fs.status().as_str().to_string(),
        }
    }
}

pub fn backend_views(storage: &Storage, show_internals: bool) -> Vec<BackendView> {
    storage
        .nodes()
        .values()
        .flat_map(|node| node.backends().values())
        .map(|backend| BackendView::new(backend, show_internals))
        .collect()
}

pub fn group_views(storage: &Storage, show_internals: bool) -> Vec<GroupView> {
    storage
        .groups()
        .values()
        .map(|group| GroupView::new(group, show_internals))
        .collect()
}

pub fn couple_views(storage: &Storage) -> Vec<CoupleView> {
    storage.couples().values().map(CoupleView::new).collect()
}

pub fn fs_views(storage: &Storage) -> Vec<FsView> {
    storage
        .nodes()
        .values()
        .flat_map(|node| node.filesystems().values())
        .map(FsView::new)
        .collect()
}
