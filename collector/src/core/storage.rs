use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error, warn};

use common::config::Config;

use crate::core::backend::Backend;
use crate::core::couple::{couple_key, Couple, GroupBrief};
use crate::core::fs::Fs;
use crate::core::group::{BackendBrief, CoupleCheck, Group};
use crate::core::node::{Node, NodeKey};
use crate::core::parser::ParsedStats;

/// A user-facing partition of couples.
#[derive(Clone, Debug)]
pub struct Namespace {
    name: String,
    groups: BTreeSet<u64>,
}

impl Namespace {
    fn new(name: &str) -> Self {
        Namespace {
            name: name.to_string(),
            groups: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &BTreeSet<u64> {
        &self.groups
    }
}

/// The in-memory topology graph. Entities live in id-keyed maps; references
/// between them are ids resolved by lookup, so there are no owning pointers
/// across entity kinds. All mutation is serialized behind the surrounding
/// write lock.
#[derive(Default)]
pub struct Storage {
    nodes: BTreeMap<String, Node>,
    groups: BTreeMap<u64, Group>,
    couples: BTreeMap<String, Couple>,
    namespaces: BTreeMap<String, Namespace>,
}

impl Storage {
    pub fn new() -> Self {
        Storage::default()
    }

    pub fn nodes(&self) -> &BTreeMap<String, Node> {
        &self.nodes
    }

    pub fn groups(&self) -> &BTreeMap<u64, Group> {
        &self.groups
    }

    pub fn couples(&self) -> &BTreeMap<String, Couple> {
        &self.couples
    }

    pub fn namespaces(&self) -> &BTreeMap<String, Namespace> {
        &self.namespaces
    }

    pub fn node(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn group(&self, id: u64) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn couple(&self, key: &str) -> Option<&Couple> {
        self.couples.get(key)
    }

    /// Finds a filesystem by its `host/fsid` key.
    pub fn filesystem(&self, host: &str, fsid: u64) -> Option<&Fs> {
        self.nodes
            .values()
            .filter(|node| node.host() == host)
            .find_map(|node| node.filesystem(fsid))
    }

    /// Finds a backend by its `host:port:family/backendId` key.
    pub fn backend(&self, node_key: &str, backend_id: u64) -> Option<&Backend> {
        self.nodes.get(node_key)?.backend(backend_id)
    }

    pub fn backend_count(&self) -> usize {
        self.nodes.values().map(|n| n.backends().len()).sum()
    }

    pub fn upsert_node(&mut self, key: &NodeKey) -> &mut Node {
        self.nodes
            .entry(key.to_string())
            .or_insert_with(|| Node::new(key))
    }

    pub fn mark_poll_failure(&mut self, key: &NodeKey, error: String) {
        if let Some(node) = self.nodes.get_mut(&key.to_string()) {
            node.set_poll_error(Some(error));
        }
    }

    /// Applies one parsed monitor-stats payload: node stat, backend stats
    /// (with the commit-EROFS counters merged in), and the group membership
    /// that follows from them.
    pub fn apply_parsed(&mut self, key: &NodeKey, mut parsed: ParsedStats) {
        for bstat in &mut parsed.backends {
            if let Some(count) = parsed.rofs_errors.get(&bstat.backend_id) {
                bstat.stat_commit_rofs_errors = *count;
            }
        }

        let node = self.upsert_node(key);
        node.set_poll_error(None);
        node.apply_stat(parsed.node);

        let mut applied = Vec::with_capacity(parsed.backends.len());
        for bstat in parsed.backends {
            if let Some(change) = node.apply_backend_stat(bstat) {
                applied.push(change);
            }
        }

        for change in applied {
            if let Some(prev_group) = change.prev_group {
                if let Some(group) = self.groups.get_mut(&prev_group) {
                    debug!(
                        "group {}: detaching backend {}",
                        prev_group, change.backend_key
                    );
                    group.remove_backend(&change.backend_key);
                }
            }
            if change.group > 0 {
                self.groups
                    .entry(change.group)
                    .or_insert_with(|| Group::new(change.group))
                    .add_backend(change.backend_key);
            }
        }
    }

    /// Stores and decodes one group metadata blob. A blob byte-identical to
    /// the previous one is skipped entirely (clean flag). Decode failures
    /// mark the group BAD and keep whatever fields were committed before the
    /// failure point.
    pub fn apply_group_metadata(&mut self, group_id: u64, blob: &[u8], timestamp: u64) {
        let group = self
            .groups
            .entry(group_id)
            .or_insert_with(|| Group::new(group_id));

        if !group.save_metadata(blob, timestamp) {
            return;
        }

        let prev_namespace = if group.metadata_parsed() {
            Some(group.metadata().namespace_name.clone())
        } else {
            None
        };

        let decoded = group.decode_metadata();
        match decoded {
            Err(text) => {
                warn!("group {}: metadata parse error: {}", group_id, text);
                group.set_metadata_error(text);
            }
            Ok(()) => {
                let members = group.metadata().couple.clone();
                let namespace = group.metadata().namespace_name.clone();
                let existing_couple = group.couple().map(str::to_string);

                match existing_couple {
                    Some(couple_key) => {
                        let matches = self
                            .couples
                            .get(&couple_key)
                            .map(|c| c.check(&members))
                            .unwrap_or(false);
                        if !matches {
                            let text = format!(
                                "couple in group metadata [ {} ] doesn't match \
                                 to existing one [ {} ]",
                                join_ids(&members),
                                couple_key.replace(':', " "),
                            );
                            if let Some(group) = self.groups.get_mut(&group_id) {
                                group.set_metadata_error(text);
                            }
                            return;
                        }
                    }
                    None => {
                        if !members.is_empty() {
                            self.create_couple(&members, group_id);
                        }
                    }
                }

                self.bind_namespace(group_id, prev_namespace.as_deref(), &namespace);
            }
        }
    }

    /// Creates the couple for the given sorted member list (if it does not
    /// exist yet) and binds every member group without a couple to it, along
    /// with the group whose metadata named it. Groups referenced only from
    /// metadata are created here.
    pub fn create_couple(&mut self, member_ids: &[u64], origin: u64) {
        let key = couple_key(member_ids);
        self.couples
            .entry(key.clone())
            .or_insert_with(|| Couple::new(member_ids.to_vec()));

        for id in member_ids.iter().chain(std::iter::once(&origin)) {
            let group = self.groups.entry(*id).or_insert_with(|| Group::new(*id));
            if group.couple().is_none() {
                group.set_couple(key.clone());
            }
        }
    }

    fn bind_namespace(&mut self, group_id: u64, prev: Option<&str>, name: &str) {
        if let Some(prev_name) = prev {
            if prev_name != name {
                if let Some(ns) = self.namespaces.get_mut(prev_name) {
                    ns.groups.remove(&group_id);
                }
            }
        }
        if !name.is_empty() {
            self.namespaces
                .entry(name.to_string())
                .or_insert_with(|| Namespace::new(name))
                .groups
                .insert(group_id);
        }
    }

    /// The derivation pass, run once per refresh cycle after all stats have
    /// been applied: backends, filesystems, backend statuses, groups,
    /// couples, in that order.
    pub fn update_all(&mut self, config: &Config, now_sec: u64) {
        for node in self.nodes.values_mut() {
            node.recalculate(config.reserved_space);
            node.check_stalled(now_sec, config.node_backend_stat_stale_timeout);
        }
        for node in self.nodes.values_mut() {
            node.update_fs_statuses();
        }
        for node in self.nodes.values_mut() {
            node.update_backend_statuses(now_sec);
        }

        let group_ids: Vec<u64> = self.groups.keys().copied().collect();
        for group_id in group_ids {
            let briefs = self.backend_briefs(group_id, config.reserved_space);
            let couple_check = self.couple_check(group_id);
            if let Some(group) = self.groups.get_mut(&group_id) {
                group.update_status(&briefs, couple_check, config.forbidden_dht_groups);
            }
        }

        let couple_keys: Vec<String> = self.couples.keys().cloned().collect();
        for key in couple_keys {
            let briefs = self.group_briefs(&key, config.reserved_space);
            if let Some(couple) = self.couples.get_mut(&key) {
                couple.update_status(&briefs, config.forbidden_unmatched_group_total_space);
            }
        }
    }

    fn couple_check(&self, group_id: u64) -> CoupleCheck {
        let Some(group) = self.groups.get(&group_id) else {
            return CoupleCheck::NoCouple;
        };
        match group.couple() {
            None => CoupleCheck::NoCouple,
            Some(key) => match self.couples.get(key) {
                None => CoupleCheck::NoCouple,
                Some(couple) => {
                    if couple.check(&group.metadata().couple) {
                        CoupleCheck::Matches
                    } else {
                        CoupleCheck::Mismatch
                    }
                }
            },
        }
    }

    fn backend_briefs(&self, group_id: u64, reserved_space: f64) -> Vec<BackendBrief> {
        let Some(group) = self.groups.get(&group_id) else {
            return Vec::new();
        };
        let mut briefs = Vec::with_capacity(group.backends().len());
        for backend_key in group.backends() {
            let Some((node_key, backend_id)) = split_backend_key(backend_key) else {
                continue;
            };
            if let Some(backend) = self.backend(node_key, backend_id) {
                briefs.push(BackendBrief {
                    key: backend_key.clone(),
                    status: backend.status(),
                    total_space: backend.calculated().total_space,
                    full: backend.full(reserved_space),
                });
            }
        }
        briefs
    }

    fn group_briefs(&self, couple_key: &str, reserved_space: f64) -> Vec<GroupBrief> {
        let Some(couple) = self.couples.get(couple_key) else {
            return Vec::new();
        };
        let mut briefs = Vec::with_capacity(couple.group_ids().len());
        for id in couple.group_ids() {
            let Some(group) = self.groups.get(id) else {
                continue;
            };
            let backends = self.backend_briefs(*id, reserved_space);
            briefs.push(GroupBrief {
                id: *id,
                status: group.status(),
                frozen: group.metadata().frozen,
                metadata_parsed: group.metadata_parsed(),
                metadata_file: group.metadata_file().to_vec(),
                total_space: backends.iter().map(|b| b.total_space).sum(),
                full: backends.iter().any(|b| b.full),
            });
        }
        briefs
    }

    /// Reconciles another partial view into this one. Per entity the newer
    /// timestamp wins; `have_newer` is raised when this view holds strictly
    /// newer data the other side should pick up.
    pub fn merge(&mut self, other: Storage, have_newer: &mut bool) {
        for (key, other_node) in other.nodes {
            match self.nodes.get_mut(&key) {
                Some(node) => node.merge(&other_node, have_newer),
                None => {
                    self.nodes.insert(key, other_node);
                }
            }
        }

        for (id, other_group) in other.groups {
            match self.groups.get_mut(&id) {
                Some(group) => group.merge(&other_group, have_newer),
                None => {
                    self.groups.insert(id, other_group);
                }
            }
        }

        for (key, other_couple) in other.couples {
            match self.couples.get_mut(&key) {
                Some(couple) => {
                    if couple.group_ids().len() != other_couple.group_ids().len() {
                        error!(
                            "couple {} merge: internal inconsistency: \
                             different number of groups",
                            key
                        );
                    }
                    couple.merge(&other_couple);
                }
                None => {
                    self.couples.insert(key, other_couple);
                }
            }
        }

        for (name, other_ns) in other.namespaces {
            let ns = self
                .namespaces
                .entry(name.clone())
                .or_insert_with(|| Namespace::new(&name));
            ns.groups.extend(other_ns.groups.iter().copied());
        }
    }
}

/// Splits `host:port:family/backendId`.
pub fn split_backend_key(key: &str) -> Option<(&str, u64)> {
    let (node_key, backend_id) = key.split_once('/')?;
    Some((node_key, backend_id.parse().ok()?))
}

fn join_ids(ids: &[u64]) -> String {
    let mut out = String::new();
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&id.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_backend_key() {
        assert_eq!(
            split_backend_key("::1:1025:10/7"),
            Some(("::1:1025:10", 7))
        );
        assert_eq!(split_backend_key("no-slash"), None);
        assert_eq!(split_backend_key("node/x"), None);
    }
}
