use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::anyhow;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use common::api_error::ApiError;

use crate::core::state::CollectorState;
use crate::core::storage::Storage;
use crate::core::views::{
    backend_views, couple_views, fs_views, group_views, BackendView, CoupleView, FsView, GroupView,
};

pub fn router(state: CollectorState) -> Router {
    Router::new()
        .route("/summary", get(summary))
        .route("/group-info/{id}", get(group_info))
        .route("/list-nodes", get(list_nodes))
        .route("/node-info/{key}", get(node_info))
        .route("/node-list-backends/{key}", get(node_list_backends))
        .route("/backend-info/{key}/{backend}", get(backend_info))
        .route("/fs-info/{host}/{fsid}", get(fs_info))
        .route("/fs-list-backends/{host}/{fsid}", get(fs_list_backends))
        .route("/dc/{host}", get(dc_info))
        .route("/snapshot/backends", get(snapshot_backends))
        .route("/snapshot/groups", get(snapshot_groups))
        .route("/snapshot/couples", get(snapshot_couples))
        .route("/snapshot/filesystems", get(snapshot_filesystems))
        .route("/admin/refresh", post(admin_refresh))
        .with_state(state)
}

fn read_storage(
    state: &CollectorState,
) -> Result<std::sync::RwLockReadGuard<'_, Storage>, ApiError> {
    state
        .storage
        .read()
        .map_err(|e| ApiError::Any(anyhow!("failed to acquire storage read lock: {}", e)))
}

fn status_histogram<'a, I: Iterator<Item = &'a str>>(statuses: I) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for status in statuses {
        *counts.entry(status).or_default() += 1;
    }
    let mut out = String::from("( ");
    for (status, count) in counts {
        let _ = write!(out, "{} {} ", count, status);
    }
    out.push(')');
    out
}

// GET /summary
pub async fn summary(State(state): State<CollectorState>) -> Result<String, ApiError> {
    let storage = read_storage(&state)?;

    let mut out = String::new();
    let _ = writeln!(out, "Storage contains:");
    let _ = writeln!(out, "{} nodes", storage.nodes().len());

    let fs_statuses = storage
        .nodes()
        .values()
        .flat_map(|n| n.filesystems().values())
        .map(|fs| fs.status().as_str());
    let fs_count: usize = storage
        .nodes()
        .values()
        .map(|n| n.filesystems().len())
        .sum();
    let _ = writeln!(out, "{} filesystems", fs_count);
    let _ = writeln!(out, "  {}", status_histogram(fs_statuses));

    let _ = writeln!(out, "{} backends", storage.backend_count());

    let _ = writeln!(out, "{} groups", storage.groups().len());
    let _ = writeln!(
        out,
        "  {}",
        status_histogram(storage.groups().values().map(|g| g.status().as_str()))
    );

    let _ = writeln!(out, "{} couples", storage.couples().len());
    let _ = writeln!(
        out,
        "  {}",
        status_histogram(storage.couples().values().map(|c| c.status().as_str()))
    );

    let _ = writeln!(out, "{} namespaces", storage.namespaces().len());

    Ok(out)
}

// GET /group-info/{id}
pub async fn group_info(
    Path(raw_id): Path<String>,
    State(state): State<CollectorState>,
) -> Result<String, ApiError> {
    let group_id: u64 = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => return Ok(format!("Invalid group id {}", raw_id)),
    };

    let storage = read_storage(&state)?;
    match storage.group(group_id) {
        Some(group) => Ok(group.print_info()),
        None => Ok(format!("Group {} is not found", group_id)),
    }
}

// GET /list-nodes
pub async fn list_nodes(State(state): State<CollectorState>) -> Result<String, ApiError> {
    let storage = read_storage(&state)?;

    let mut out = String::new();
    let _ = writeln!(out, "There are {} nodes", storage.nodes().len());
    for node in storage.nodes().values() {
        let _ = writeln!(
            out,
            "  {}:{}:{}",
            node.host(),
            node.port(),
            node.family()
        );
    }
    Ok(out)
}

// GET /node-info/{key}
pub async fn node_info(
    Path(key): Path<String>,
    State(state): State<CollectorState>,
) -> Result<String, ApiError> {
    let storage = read_storage(&state)?;
    match storage.node(&key) {
        Some(node) => Ok(node.print_info()),
        None => Ok(format!("Node {} does not exist", key)),
    }
}

// GET /node-list-backends/{key}
pub async fn node_list_backends(
    Path(key): Path<String>,
    State(state): State<CollectorState>,
) -> Result<String, ApiError> {
    let storage = read_storage(&state)?;
    let Some(node) = storage.node(&key) else {
        return Ok(format!("Node {} does not exist", key));
    };

    let mut out = String::new();
    let _ = writeln!(out, "Node has {} backends", node.backends().len());
    for backend in node.backends().values() {
        let _ = writeln!(out, "  {}", backend.key());
    }
    Ok(out)
}

// GET /backend-info/{key}/{backend}
pub async fn backend_info(
    Path((key, raw_backend)): Path<(String, String)>,
    State(state): State<CollectorState>,
) -> Result<String, ApiError> {
    let backend_id: u64 = match raw_backend.parse() {
        Ok(id) => id,
        Err(_) => {
            return Ok(format!(
                "Invalid backend id '{}/{}'\n\
                 Syntax: <host>:<port>:<family>/<backend id>",
                key, raw_backend
            ))
        }
    };

    let storage = read_storage(&state)?;
    if storage.node(&key).is_none() {
        return Ok(format!("Node {} does not exist", key));
    }
    match storage.backend(&key, backend_id) {
        Some(backend) => Ok(backend.print_info()),
        None => Ok(format!("Backend {} does not exist", backend_id)),
    }
}

// GET /fs-info/{host}/{fsid}
pub async fn fs_info(
    Path((host, raw_fsid)): Path<(String, String)>,
    State(state): State<CollectorState>,
) -> Result<String, ApiError> {
    let fsid: u64 = match raw_fsid.parse() {
        Ok(id) => id,
        Err(_) => return Ok(format!("Invalid fs id '{}/{}'", host, raw_fsid)),
    };

    let storage = read_storage(&state)?;
    match storage.filesystem(&host, fsid) {
        Some(fs) => Ok(fs.print_info()),
        None => Ok(format!("Found no FS '{}/{}'", host, fsid)),
    }
}

// GET /fs-list-backends/{host}/{fsid}
pub async fn fs_list_backends(
    Path((host, raw_fsid)): Path<(String, String)>,
    State(state): State<CollectorState>,
) -> Result<String, ApiError> {
    let fsid: u64 = match raw_fsid.parse() {
        Ok(id) => id,
        Err(_) => return Ok(format!("Invalid fs id '{}/{}'", host, raw_fsid)),
    };

    let storage = read_storage(&state)?;
    let Some(fs) = storage.filesystem(&host, fsid) else {
        return Ok(format!("Found no FS '{}/{}'", host, fsid));
    };

    let mut out = String::new();
    let _ = writeln!(out, "There are {} backends", fs.backend_ids().len());

    // the filesystem's backends live on the node that reported it
    let owner = storage
        .nodes()
        .values()
        .find(|node| node.host() == host && node.filesystem(fsid).is_some());
    if let Some(node) = owner {
        for backend_id in fs.backend_ids() {
            if let Some(backend) = node.backend(*backend_id) {
                let _ = writeln!(out, "  {}", backend.key());
            }
        }
    }
    Ok(out)
}

// GET /dc/{host}
pub async fn dc_info(
    Path(host): Path<String>,
    State(state): State<CollectorState>,
) -> String {
    state.inventory.get_dc(&host).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SnapshotParams {
    pub show_internals: bool,
}

// GET /snapshot/backends
pub async fn snapshot_backends(
    Query(params): Query<SnapshotParams>,
    State(state): State<CollectorState>,
) -> Result<Json<Vec<BackendView>>, ApiError> {
    let storage = read_storage(&state)?;
    Ok(Json(backend_views(&storage, params.show_internals)))
}

// GET /snapshot/groups
pub async fn snapshot_groups(
    Query(params): Query<SnapshotParams>,
    State(state): State<CollectorState>,
) -> Result<Json<Vec<GroupView>>, ApiError> {
    let storage = read_storage(&state)?;
    Ok(Json(group_views(&storage, params.show_internals)))
}

// GET /snapshot/couples
pub async fn snapshot_couples(
    State(state): State<CollectorState>,
) -> Result<Json<Vec<CoupleView>>, ApiError> {
    let storage = read_storage(&state)?;
    Ok(Json(couple_views(&storage)))
}

// GET /snapshot/filesystems
pub async fn snapshot_filesystems(
    State(state): State<CollectorState>,
) -> Result<Json<Vec<FsView>>, ApiError> {
    let storage = read_storage(&state)?;
    Ok(Json(fs_views(&storage)))
}

// POST /admin/refresh
pub async fn admin_refresh(State(state): State<CollectorState>) -> StatusCode {
    state.refresh_notify.notify_one();
    StatusCode::OK
}
