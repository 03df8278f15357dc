use std::collections::BTreeMap;

use common::config::Config;

use collector::core::backend::BackendStatus;
use collector::core::fs::FsStatus;
use collector::core::node::NodeKey;
use collector::core::parser::ParsedStats;
use collector::core::stat::{BackendStat, NodeStat, BACKEND_STATE_ENABLED};
use collector::core::storage::Storage;

fn config() -> Config {
    let mut config = Config::default();
    config.reserved_space = 0.05;
    config.node_backend_stat_stale_timeout = 120;
    config
}

fn node_key() -> NodeKey {
    "storage1.example:1025:2".parse().unwrap()
}

fn node_stat(ts_sec: u64, la1: f64) -> NodeStat {
    NodeStat {
        ts_sec,
        ts_usec: 0,
        la1,
        tx_bytes: 0,
        rx_bytes: 0,
    }
}

fn bstat(id: u64, ts_sec: u64) -> BackendStat {
    BackendStat {
        backend_id: id,
        ts_sec,
        state: BACKEND_STATE_ENABLED,
        fsid: 42,
        group: 17,
        vfs_blocks: 1000,
        vfs_bavail: 800,
        vfs_bsize: 4096,
        records_total: 100,
        records_removed: 10,
        ..Default::default()
    }
}

fn apply(storage: &mut Storage, node: NodeStat, backends: Vec<BackendStat>) {
    storage.apply_parsed(
        &node_key(),
        ParsedStats {
            node,
            backends,
            rofs_errors: BTreeMap::new(),
        },
    );
}

fn backend_calculated(storage: &Storage, id: u64) -> collector::core::backend::Calculated {
    storage
        .backend(&node_key().to_string(), id)
        .unwrap()
        .calculated()
        .clone()
}

#[test]
fn test_capacity_arithmetic_with_blob_size_limit() {
    let mut storage = Storage::new();
    let mut stat = bstat(1, 1000);
    stat.blob_size_limit = 2_000_000;
    stat.base_size = 500_000;
    apply(&mut storage, node_stat(1000, 1.0), vec![stat]);
    storage.update_all(&config(), 1001);

    let calc = backend_calculated(&storage, 1);
    assert_eq!(calc.vfs_total_space, 4_096_000);
    assert_eq!(calc.vfs_free_space, 3_276_800);
    assert_eq!(calc.vfs_used_space, 819_200);
    assert_eq!(calc.total_space, 2_000_000);
    assert_eq!(calc.used_space, 500_000);
    assert_eq!(calc.free_space, 1_500_000);
    // reserved = ceil(0.05 * share * vfs_total) = 100_000
    assert_eq!(calc.effective_space, 1_900_000);
    assert_eq!(calc.effective_free_space, 1_400_000);

    // invariant chain
    assert!(calc.effective_free_space <= calc.free_space);
    assert!(calc.free_space <= calc.total_space);
    assert!(calc.total_space <= calc.vfs_total_space);

    // records arithmetic
    assert_eq!(calc.records, 90);
    assert!((calc.fragmentation - 0.1).abs() < 1e-12);
}

#[test]
fn test_capacity_arithmetic_without_blob_size_limit() {
    let mut storage = Storage::new();
    apply(&mut storage, node_stat(1000, 1.0), vec![bstat(1, 1000)]);
    storage.update_all(&config(), 1001);

    let calc = backend_calculated(&storage, 1);
    assert_eq!(calc.total_space, calc.vfs_total_space);
    assert_eq!(calc.free_space, calc.vfs_free_space);
    assert_eq!(calc.used_space, calc.vfs_used_space);
}

#[test]
fn test_fragmentation_with_zero_records() {
    let mut storage = Storage::new();
    let mut stat = bstat(1, 1000);
    stat.records_total = 0;
    stat.records_removed = 0;
    apply(&mut storage, node_stat(1000, 1.0), vec![stat]);
    storage.update_all(&config(), 1001);

    let calc = backend_calculated(&storage, 1);
    assert_eq!(calc.fragmentation, 0.0);
    assert_eq!(calc.records, 0);
}

#[test]
fn test_rates_computed_over_long_interval() {
    let mut storage = Storage::new();

    let mut first = bstat(1, 1000);
    first.read_ios = 1000;
    first.write_ios = 500;
    first.ell_disk_read_size = 1_000_000;
    apply(&mut storage, node_stat(1000, 0.5), vec![first]);

    let mut second = bstat(1, 1010);
    second.read_ios = 3000;
    second.write_ios = 600;
    second.ell_disk_read_size = 3_000_000;
    apply(&mut storage, node_stat(1010, 0.5), vec![second]);
    storage.update_all(&config(), 1011);

    let calc = backend_calculated(&storage, 1);
    assert_eq!(calc.read_rps, 200);
    assert_eq!(calc.write_rps, 10);
    // load-shaped ceiling: 200 / 0.5, floored at 100
    assert_eq!(calc.max_read_rps, 400);
    assert_eq!(calc.max_write_rps, 100);
    assert_eq!(calc.command_stat.ell_disk_read_rate, 200_000.0);
    assert_eq!(calc.command_stat.ell_net_read_rate, 200_000.0);
}

#[test]
fn test_interval_of_exactly_one_second_skips_rates() {
    let mut storage = Storage::new();

    let mut first = bstat(1, 1000);
    first.read_ios = 1000;
    first.ell_disk_read_size = 1_000_000;
    apply(&mut storage, node_stat(1000, 1.0), vec![first]);

    let mut second = bstat(1, 1010);
    second.read_ios = 3000;
    second.ell_disk_read_size = 3_000_000;
    apply(&mut storage, node_stat(1010, 1.0), vec![second]);

    // forced refresh one second later: rates keep their previous values
    let mut third = bstat(1, 1011);
    third.read_ios = 90_000;
    third.ell_disk_read_size = 90_000_000;
    apply(&mut storage, node_stat(1011, 1.0), vec![third]);
    storage.update_all(&config(), 1012);

    let calc = backend_calculated(&storage, 1);
    assert_eq!(calc.read_rps, 200);
    assert_eq!(calc.command_stat.ell_disk_read_rate, 200_000.0);
}

#[test]
fn test_counter_regression_keeps_command_rate() {
    let mut storage = Storage::new();

    let mut first = bstat(1, 1000);
    first.ell_disk_read_size = 5_000_000;
    apply(&mut storage, node_stat(1000, 1.0), vec![first]);

    let mut second = bstat(1, 1010);
    second.ell_disk_read_size = 7_000_000;
    apply(&mut storage, node_stat(1010, 1.0), vec![second]);

    // counter reset: the disk read family keeps its previous rate
    let mut third = bstat(1, 1020);
    third.ell_disk_read_size = 100;
    apply(&mut storage, node_stat(1020, 1.0), vec![third]);
    storage.update_all(&config(), 1021);

    let calc = backend_calculated(&storage, 1);
    assert_eq!(calc.command_stat.ell_disk_read_rate, 200_000.0);
}

#[test]
fn test_stalled_backend() {
    let mut storage = Storage::new();
    apply(&mut storage, node_stat(1000, 1.0), vec![bstat(1, 1000)]);

    // 121 seconds without telemetry with a 120 second threshold
    storage.update_all(&config(), 1121);

    let backend = storage.backend(&node_key().to_string(), 1).unwrap();
    assert!(backend.calculated().stalled);
    assert_eq!(backend.status(), BackendStatus::Stalled);
    assert!(backend.calculated().status_text.contains("is too old"));
    assert!(backend.calculated().status_text.contains("121 seconds ago"));
}

#[test]
fn test_clock_rewind_clears_stall() {
    let mut storage = Storage::new();
    apply(&mut storage, node_stat(1000, 1.0), vec![bstat(1, 1000)]);

    // a wall clock behind the sample never counts as stale
    storage.update_all(&config(), 995);

    let backend = storage.backend(&node_key().to_string(), 1).unwrap();
    assert!(!backend.calculated().stalled);
    assert_eq!(backend.status(), BackendStatus::Ok);
}

#[test]
fn test_disabled_backend_is_stalled() {
    let mut storage = Storage::new();
    let mut stat = bstat(1, 1000);
    stat.state = 0;
    apply(&mut storage, node_stat(1000, 1.0), vec![stat]);
    storage.update_all(&config(), 1001);

    let backend = storage.backend(&node_key().to_string(), 1).unwrap();
    assert_eq!(backend.status(), BackendStatus::Stalled);
    assert!(backend
        .calculated()
        .status_text
        .contains("has been disabled"));
}

#[test]
fn test_commit_rofs_errors_accumulate_into_ro() {
    let mut storage = Storage::new();

    let mut first = bstat(1, 1000);
    first.stat_commit_rofs_errors = 100;
    apply(&mut storage, node_stat(1000, 1.0), vec![first]);

    let mut second = bstat(1, 1010);
    second.stat_commit_rofs_errors = 107;
    apply(&mut storage, node_stat(1010, 1.0), vec![second]);
    storage.update_all(&config(), 1011);

    let backend = storage.backend(&node_key().to_string(), 1).unwrap();
    assert_eq!(backend.calculated().stat_commit_rofs_errors_diff, 7);
    assert_eq!(backend.status(), BackendStatus::Ro);
    assert!(backend
        .calculated()
        .status_text
        .contains("is in read-only state"));
}

#[test]
fn test_commit_rofs_delta_resets_on_restart() {
    let mut storage = Storage::new();

    let mut first = bstat(1, 1000);
    first.stat_commit_rofs_errors = 100;
    first.last_start_ts_sec = 900;
    apply(&mut storage, node_stat(1000, 1.0), vec![first]);

    let mut second = bstat(1, 1010);
    second.stat_commit_rofs_errors = 107;
    second.last_start_ts_sec = 900;
    apply(&mut storage, node_stat(1010, 1.0), vec![second]);

    // backend restarted: accumulated delta is dropped
    let mut third = bstat(1, 1020);
    third.stat_commit_rofs_errors = 200;
    third.last_start_ts_sec = 1015;
    apply(&mut storage, node_stat(1020, 1.0), vec![third]);
    storage.update_all(&config(), 1021);

    let backend = storage.backend(&node_key().to_string(), 1).unwrap();
    assert_eq!(backend.calculated().stat_commit_rofs_errors_diff, 0);
    assert_eq!(backend.status(), BackendStatus::Ok);
}

#[test]
fn test_commit_rofs_delta_resets_on_counter_regression() {
    let mut storage = Storage::new();

    let mut first = bstat(1, 1000);
    first.stat_commit_rofs_errors = 100;
    apply(&mut storage, node_stat(1000, 1.0), vec![first]);

    let mut second = bstat(1, 1010);
    second.stat_commit_rofs_errors = 40;
    apply(&mut storage, node_stat(1010, 1.0), vec![second]);
    storage.update_all(&config(), 1011);

    let backend = storage.backend(&node_key().to_string(), 1).unwrap();
    assert_eq!(backend.calculated().stat_commit_rofs_errors_diff, 0);
}

#[test]
fn test_read_only_flag_wins_over_commit_errors() {
    let mut storage = Storage::new();
    let mut stat = bstat(1, 1000);
    stat.read_only = true;
    apply(&mut storage, node_stat(1000, 1.0), vec![stat]);
    storage.update_all(&config(), 1001);

    let backend = storage.backend(&node_key().to_string(), 1).unwrap();
    assert_eq!(backend.status(), BackendStatus::Ro);
}

#[test]
fn test_older_stat_is_discarded() {
    let mut storage = Storage::new();

    let mut first = bstat(1, 2000);
    first.base_size = 777;
    apply(&mut storage, node_stat(2000, 1.0), vec![first]);

    let mut late = bstat(1, 1500);
    late.base_size = 1;
    apply(&mut storage, node_stat(2000, 1.0), vec![late]);

    let backend = storage.backend(&node_key().to_string(), 1).unwrap();
    assert_eq!(backend.stat().base_size, 777);
    assert_eq!(backend.stat().ts_sec, 2000);
}

#[test]
fn test_same_payload_twice_is_idempotent() {
    let mut storage = Storage::new();
    let mut stat = bstat(1, 1000);
    stat.read_ios = 5000;
    stat.ell_disk_read_size = 1_000_000;
    stat.blob_size_limit = 2_000_000;
    stat.base_size = 500_000;

    apply(&mut storage, node_stat(1000, 1.0), vec![stat.clone()]);
    storage.update_all(&config(), 1001);
    let first_pass = backend_calculated(&storage, 1);

    apply(&mut storage, node_stat(1000, 1.0), vec![stat]);
    storage.update_all(&config(), 1001);
    let second_pass = backend_calculated(&storage, 1);

    assert_eq!(first_pass.total_space, second_pass.total_space);
    assert_eq!(first_pass.free_space, second_pass.free_space);
    assert_eq!(
        first_pass.effective_free_space,
        second_pass.effective_free_space
    );
    assert_eq!(first_pass.records, second_pass.records);
    assert_eq!(first_pass.status, second_pass.status);
    assert_eq!(first_pass.read_rps, second_pass.read_rps);
    // no interval to derive from: rates are zero on both passes
    assert_eq!(second_pass.command_stat.ell_disk_read_rate, 0.0);
    assert_eq!(second_pass.command_stat.ell_net_read_rate, 0.0);
}

#[test]
fn test_fs_overcommit_breaks_backends() {
    let mut storage = Storage::new();

    // two backends on one filesystem whose blob limits together exceed the
    // vfs total (4_096_000)
    let mut a = bstat(1, 1000);
    a.blob_size_limit = 3_000_000;
    a.group = 17;
    let mut b = bstat(2, 1000);
    b.blob_size_limit = 3_000_000;
    b.group = 18;

    apply(&mut storage, node_stat(1000, 1.0), vec![a, b]);

    // first pass: backends are judged against the previous cycle's fs state
    storage.update_all(&config(), 1001);
    // second pass: the fs sees the over-commit and breaks its backends
    storage.update_all(&config(), 1002);

    let fs = storage
        .filesystem("storage1.example", 42)
        .unwrap();
    assert_eq!(fs.status(), FsStatus::Broken);

    let backend = storage.backend(&node_key().to_string(), 1).unwrap();
    assert_eq!(backend.status(), BackendStatus::Broken);
    assert!(backend
        .calculated()
        .status_text
        .contains("space limit is not properly configured"));
}

#[test]
fn test_backend_rebinds_filesystem_on_fsid_change() {
    let mut storage = Storage::new();
    apply(&mut storage, node_stat(1000, 1.0), vec![bstat(1, 1000)]);

    let mut moved = bstat(1, 1010);
    moved.fsid = 43;
    apply(&mut storage, node_stat(1010, 1.0), vec![moved]);

    let node_key = node_key().to_string();
    let node = storage.node(&node_key).unwrap();
    assert!(node.filesystem(42).unwrap().backend_ids().is_empty());
    assert!(node.filesystem(43).unwrap().backend_ids().contains(&1));
}

#[test]
fn test_backend_rebinds_group_on_group_change() {
    let mut storage = Storage::new();
    apply(&mut storage, node_stat(1000, 1.0), vec![bstat(1, 1000)]);

    let backend_key = format!("{}/1", node_key());
    assert!(storage.group(17).unwrap().backends().contains(&backend_key));

    let mut moved = bstat(1, 1010);
    moved.group = 18;
    apply(&mut storage, node_stat(1010, 1.0), vec![moved]);

    assert!(!storage.group(17).unwrap().backends().contains(&backend_key));
    assert!(storage.group(18).unwrap().backends().contains(&backend_key));
}
