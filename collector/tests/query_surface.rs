use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};

use common::config::Config;

use collector::core::inventory::Inventory;
use collector::core::node::NodeKey;
use collector::core::parser::ParsedStats;
use collector::core::routes::{
    backend_info, dc_info, fs_info, fs_list_backends, group_info, list_nodes, node_info,
    node_list_backends, snapshot_backends, snapshot_couples, snapshot_filesystems,
    snapshot_groups, summary, SnapshotParams,
};
use collector::core::stat::{BackendStat, NodeStat, BACKEND_STATE_ENABLED};
use collector::core::state::CollectorState;
use collector::core::views::BackendView;

const NODE: &str = "s1.example:1025:2";

fn populated_state() -> CollectorState {
    let config = Arc::new(Config::default());
    let inventory = Arc::new(Inventory::new(&config, None, None));
    let state = CollectorState::new(config.clone(), inventory);

    {
        let mut storage = state.storage.write().unwrap();
        let key: NodeKey = NODE.parse().unwrap();
        let stat = BackendStat {
            backend_id: 1,
            ts_sec: 1_445_866_995,
            ts_usec: 468_262,
            state: BACKEND_STATE_ENABLED,
            fsid: 7,
            group: 17,
            vfs_blocks: 1000,
            vfs_bavail: 800,
            vfs_bsize: 4096,
            records_total: 100,
            records_removed: 10,
            records_removed_size: 4096,
            base_size: 500_000,
            blob_size_limit: 2_000_000,
            blob_size: 1_000_000,
            max_blob_base_size: 500_000,
            read_ios: 11,
            write_ios: 13,
            io_blocking_size: 3,
            io_nonblocking_size: 5,
            data_path: "/srv/data".to_string(),
            file_path: "/srv/file".to_string(),
            last_start_ts_sec: 1_444_498_430,
            last_start_ts_usec: 864_588,
            stat_commit_rofs_errors: 9,
            ..Default::default()
        };
        storage.apply_parsed(
            &key,
            ParsedStats {
                node: NodeStat {
                    ts_sec: 1_445_866_995,
                    ts_usec: 468_262,
                    la1: 1.0,
                    tx_bytes: 991,
                    rx_bytes: 997,
                },
                backends: vec![stat],
                rofs_errors: BTreeMap::new(),
            },
        );
        storage.apply_group_metadata(
            17,
            br#"{"version": 2, "couple": [17], "namespace": "x"}"#,
            1,
        );
        storage.update_all(&config, 1_445_867_000);
    }

    state
}

#[tokio::test]
async fn test_summary() {
    let state = populated_state();
    let out = summary(State(state)).await.unwrap();

    assert!(out.contains("Storage contains:"));
    assert!(out.contains("1 nodes"));
    assert!(out.contains("1 filesystems"));
    assert!(out.contains("1 backends"));
    assert!(out.contains("1 groups"));
    assert!(out.contains("1 couples"));
    assert!(out.contains("1 namespaces"));
    assert!(out.contains("( 1 OK )"));
}

#[tokio::test]
async fn test_group_info() {
    let state = populated_state();

    let out = group_info(Path("17".to_string()), State(state.clone()))
        .await
        .unwrap();
    assert!(out.contains("id: 17"));
    assert!(out.contains("couple: 17"));

    let out = group_info(Path("fourty-two".to_string()), State(state.clone()))
        .await
        .unwrap();
    assert_eq!(out, "Invalid group id fourty-two");

    let out = group_info(Path("99".to_string()), State(state)).await.unwrap();
    assert_eq!(out, "Group 99 is not found");
}

#[tokio::test]
async fn test_list_nodes_and_node_info() {
    let state = populated_state();

    let out = list_nodes(State(state.clone())).await.unwrap();
    assert!(out.contains("There are 1 nodes"));
    assert!(out.contains("s1.example:1025:2"));

    let out = node_info(Path(NODE.to_string()), State(state.clone()))
        .await
        .unwrap();
    assert!(out.contains("key: s1.example:1025:2"));
    assert!(out.contains("tx_bytes: 991"));

    let out = node_info(Path("ghost:1:1".to_string()), State(state))
        .await
        .unwrap();
    assert_eq!(out, "Node ghost:1:1 does not exist");
}

#[tokio::test]
async fn test_node_list_backends() {
    let state = populated_state();

    let out = node_list_backends(Path(NODE.to_string()), State(state.clone()))
        .await
        .unwrap();
    assert!(out.contains("Node has 1 backends"));
    assert!(out.contains("s1.example:1025:2/1"));

    let out = node_list_backends(Path("ghost:1:1".to_string()), State(state))
        .await
        .unwrap();
    assert_eq!(out, "Node ghost:1:1 does not exist");
}

#[tokio::test]
async fn test_backend_info() {
    let state = populated_state();

    let out = backend_info(
        Path((NODE.to_string(), "1".to_string())),
        State(state.clone()),
    )
    .await
    .unwrap();
    assert!(out.contains("id: s1.example:1025:2/1"));
    assert!(out.contains("status: OK"));

    let out = backend_info(
        Path((NODE.to_string(), "nine".to_string())),
        State(state.clone()),
    )
    .await
    .unwrap();
    assert!(out.contains("Invalid backend id"));

    let out = backend_info(Path((NODE.to_string(), "9".to_string())), State(state))
        .await
        .unwrap();
    assert_eq!(out, "Backend 9 does not exist");
}

#[tokio::test]
async fn test_fs_info_and_backends() {
    let state = populated_state();

    let out = fs_info(
        Path(("s1.example".to_string(), "7".to_string())),
        State(state.clone()),
    )
    .await
    .unwrap();
    assert!(out.contains("fsid: 7"));
    assert!(out.contains("status: OK"));

    let out = fs_list_backends(
        Path(("s1.example".to_string(), "7".to_string())),
        State(state.clone()),
    )
    .await
    .unwrap();
    assert!(out.contains("There are 1 backends"));
    assert!(out.contains("s1.example:1025:2/1"));

    let out = fs_info(
        Path(("s1.example".to_string(), "8".to_string())),
        State(state),
    )
    .await
    .unwrap();
    assert_eq!(out, "Found no FS 's1.example/8'");
}

#[tokio::test]
async fn test_backend_snapshot_covers_raw_fields() {
    let state = populated_state();

    let axum::Json(views) = snapshot_backends(
        Query(SnapshotParams {
            show_internals: false,
        }),
        State(state.clone()),
    )
    .await
    .unwrap();

    assert_eq!(views.len(), 1);
    let view = &views[0];
    assert_eq!(view.id, "s1.example:1025:2/1");
    assert_eq!(view.node_id, NODE);
    assert_eq!(view.backend_id, 1);
    assert_eq!(view.fs_id, "s1.example/7");
    assert_eq!(view.group, 17);
    assert_eq!(view.timestamp.tv_sec, 1_445_866_995);
    assert_eq!(view.timestamp.tv_usec, 468_262);
    assert_eq!(view.last_start.tv_sec, 1_444_498_430);
    assert_eq!(view.base_path, "/srv/data");
    assert_eq!(view.status, "OK");
    assert!(view.status_text.contains("is OK"));

    // internals stay hidden without the flag
    assert!(view.timestamp.user_friendly.is_none());
    assert!(view.stat_commit_rofs_errors.is_none());
    assert!(view.stalled.is_none());
    assert!(view.data_path.is_none());

    // the emitted JSON parses back with every raw field preserved
    let json = serde_json::to_string(view).unwrap();
    let parsed: BackendView = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.vfs_blocks, 1000);
    assert_eq!(parsed.vfs_bavail, 800);
    assert_eq!(parsed.vfs_bsize, 4096);
    assert_eq!(parsed.records_total, 100);
    assert_eq!(parsed.records_removed, 10);
    assert_eq!(parsed.records_removed_size, 4096);
    assert_eq!(parsed.base_size, 500_000);
    assert_eq!(parsed.blob_size_limit, 2_000_000);
    assert_eq!(parsed.blob_size, 1_000_000);
    assert_eq!(parsed.max_blob_base_size, 500_000);
    assert_eq!(parsed.read_ios, 11);
    assert_eq!(parsed.write_ios, 13);
    assert_eq!(parsed.io_blocking_size, 3);
    assert_eq!(parsed.io_nonblocking_size, 5);
    assert_eq!(parsed.state, BACKEND_STATE_ENABLED);
    assert_eq!(parsed.dstat_error, 0);
    assert!(!parsed.read_only);
    assert_eq!(parsed.stat_commit_rofs_errors_diff, 0);
}

#[tokio::test]
async fn test_backend_snapshot_internals() {
    let state = populated_state();

    let axum::Json(views) = snapshot_backends(
        Query(SnapshotParams {
            show_internals: true,
        }),
        State(state),
    )
    .await
    .unwrap();

    let view = &views[0];
    assert_eq!(view.stat_commit_rofs_errors, Some(9));
    assert_eq!(view.stalled, Some(false));
    assert_eq!(view.data_path.as_deref(), Some("/srv/data"));
    assert_eq!(view.file_path.as_deref(), Some("/srv/file"));
    assert_eq!(
        view.timestamp.user_friendly.as_deref(),
        Some("2015-10-26 16:43:15.468262")
    );
}

#[tokio::test]
async fn test_dc_info_degrades_to_host() {
    // no record store and no worker configured
    let state = populated_state();
    let out = dc_info(Path("s1.example".to_string()), State(state)).await;
    assert_eq!(out, "s1.example");
}

#[tokio::test]
async fn test_group_and_couple_snapshots() {
    let state = populated_state();

    let axum::Json(groups) = snapshot_groups(
        Query(SnapshotParams {
            show_internals: false,
        }),
        State(state.clone()),
    )
    .await
    .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].id, 17);
    assert_eq!(groups[0].couple.as_deref(), Some("17"));
    assert_eq!(groups[0].namespace.as_deref(), Some("x"));
    assert_eq!(groups[0].status, "COUPLED");
    assert!(groups[0].clean.is_none());

    let axum::Json(couples) = snapshot_couples(State(state)).await.unwrap();
    assert_eq!(couples.len(), 1);
    assert_eq!(couples[0].id, "17");
    assert_eq!(couples[0].groups, vec![17]);
    assert_eq!(couples[0].status, "OK");
}

#[tokio::test]
async fn test_group_snapshot_internals() {
    let state = populated_state();

    let axum::Json(groups) = snapshot_groups(
        Query(SnapshotParams {
            show_internals: true,
        }),
        State(state),
    )
    .await
    .unwrap();

    let group = &groups[0];
    assert_eq!(group.clean, Some(true));
    assert!(group.update_time.is_some());

    let metadata = group.metadata_internal.as_ref().unwrap();
    assert_eq!(metadata.version, 2);
    assert!(!metadata.frozen);
    assert_eq!(metadata.couple, vec![17]);
    assert_eq!(metadata.namespace_name, "x");
    assert!(!metadata.service.migrating);
    assert!(metadata.service.job_id.is_empty());
}

#[tokio::test]
async fn test_filesystem_snapshot() {
    let state = populated_state();

    let axum::Json(filesystems) = snapshot_filesystems(State(state)).await.unwrap();
    assert_eq!(filesystems.len(), 1);
    assert_eq!(filesystems[0].host, "s1.example");
    assert_eq!(filesystems[0].fsid, 7);
    assert_eq!(filesystems[0].status, "OK");
    assert_eq!(filesystems[0].timestamp.tv_sec, 1_445_866_995);
    assert_eq!(filesystems[0].total_space, 4_096_000);
}
