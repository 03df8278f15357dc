use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde_json::Value;

use crate::core::backend::BackendStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum GroupStatus {
    #[default]
    Init,
    Coupled,
    Bad,
    Broken,
    Ro,
    Migrating,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Init => "INIT",
            GroupStatus::Coupled => "COUPLED",
            GroupStatus::Bad => "BAD",
            GroupStatus::Broken => "BROKEN",
            GroupStatus::Ro => "RO",
            GroupStatus::Migrating => "MIGRATING",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceMetadata {
    pub migrating: bool,
    pub job_id: String,
}

/// Decoded view of the group's advertised metadata blob.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupMetadata {
    pub version: u64,
    pub frozen: bool,
    /// Couple member ids, sorted ascending.
    pub couple: Vec<u64>,
    pub namespace_name: String,
    pub service: ServiceMetadata,
}

/// Per-backend digest handed to the group status machine by the store.
#[derive(Clone, Debug)]
pub struct BackendBrief {
    pub key: String,
    pub status: BackendStatus,
    pub total_space: u64,
    pub full: bool,
}

/// How the decoded couple list relates to the couple the group points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoupleCheck {
    NoCouple,
    Matches,
    Mismatch,
}

#[derive(Clone, Debug)]
pub struct Group {
    id: u64,
    backends: BTreeSet<String>,
    metadata_file: Vec<u8>,
    clean: bool,
    metadata_parsed: bool,
    metadata_error: Option<String>,
    metadata: GroupMetadata,
    couple: Option<String>,
    update_time: u64,
    status: GroupStatus,
    status_text: String,
}

impl Group {
    pub fn new(id: u64) -> Self {
        Group {
            id,
            backends: BTreeSet::new(),
            metadata_file: Vec::new(),
            clean: true,
            metadata_parsed: false,
            metadata_error: None,
            metadata: GroupMetadata::default(),
            couple: None,
            update_time: 0,
            status: GroupStatus::Init,
            status_text: String::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backends(&self) -> &BTreeSet<String> {
        &self.backends
    }

    pub fn metadata(&self) -> &GroupMetadata {
        &self.metadata
    }

    pub fn metadata_file(&self) -> &[u8] {
        &self.metadata_file
    }

    pub fn metadata_parsed(&self) -> bool {
        self.metadata_parsed
    }

    pub fn is_clean(&self) -> bool {
        self.clean
    }

    pub fn couple(&self) -> Option<&str> {
        self.couple.as_deref()
    }

    pub fn set_couple(&mut self, couple_key: String) {
        self.couple = Some(couple_key);
    }

    pub fn status(&self) -> GroupStatus {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn update_time(&self) -> u64 {
        self.update_time
    }

    pub fn add_backend(&mut self, backend_key: String) {
        self.backends.insert(backend_key);
    }

    pub fn remove_backend(&mut self, backend_key: &str) {
        self.backends.remove(backend_key);
    }

    pub(crate) fn set_status(&mut self, status: GroupStatus, text: String) {
        self.status = status;
        self.status_text = text;
    }

    /// Stores a new metadata blob. A blob byte-identical to the previous one
    /// keeps the group clean and is not decoded again.
    pub fn save_metadata(&mut self, blob: &[u8], timestamp: u64) -> bool {
        if timestamp > self.update_time {
            self.update_time = timestamp;
        }
        if self.clean && !self.metadata_file.is_empty() && self.metadata_file == blob {
            return false;
        }
        self.metadata_file = blob.to_vec();
        self.clean = false;
        true
    }

    /// Decodes the stored blob. Fields are committed in a fixed order as
    /// they parse, so a failure leaves everything after the failure point at
    /// its previous value. Absent keys fall back to defaults.
    pub(crate) fn decode_metadata(&mut self) -> Result<(), String> {
        self.clean = true;
        self.metadata_parsed = false;
        self.metadata_error = None;

        let value: Value = serde_json::from_slice(&self.metadata_file)
            .map_err(|e| format!("could not parse group metadata: {}", e))?;

        match &value {
            Value::Object(map) => {
                match map.get("version") {
                    Some(v) => {
                        self.metadata.version = v
                            .as_u64()
                            .ok_or_else(|| format!("invalid 'version' value {}", v))?;
                    }
                    None => self.metadata.version = 0,
                }

                match map.get("couple") {
                    Some(v) => {
                        self.metadata.couple = parse_couple(v)
                            .ok_or_else(|| "couldn't parse 'couple'".to_string())?;
                    }
                    None => self.metadata.couple = Vec::new(),
                }

                match map.get("namespace") {
                    Some(v) => {
                        self.metadata.namespace_name = v
                            .as_str()
                            .ok_or_else(|| format!("invalid 'namespace' value {}", v))?
                            .to_string();
                    }
                    None => self.metadata.namespace_name = String::new(),
                }

                match map.get("frozen") {
                    Some(v) => {
                        self.metadata.frozen = v
                            .as_bool()
                            .ok_or_else(|| format!("invalid 'frozen' value {}", v))?;
                    }
                    None => self.metadata.frozen = false,
                }

                match map.get("service") {
                    Some(v) => {
                        let service = v
                            .as_object()
                            .ok_or_else(|| format!("invalid 'service' value {}", v))?;
                        let migrating = service
                            .get("status")
                            .and_then(|s| s.as_str())
                            .map(|s| s == "MIGRATING")
                            .unwrap_or(false);
                        let job_id = match service.get("job_id") {
                            Some(j) => j
                                .as_str()
                                .ok_or_else(|| format!("invalid 'job_id' value {}", j))?
                                .to_string(),
                            None => String::new(),
                        };
                        self.metadata.service = ServiceMetadata { migrating, job_id };
                    }
                    None => self.metadata.service = ServiceMetadata::default(),
                }
            }
            Value::Array(_) => {
                // legacy shape: a bare array of member ids
                self.metadata.version = 1;
                self.metadata.couple = parse_couple(&value)
                    .ok_or_else(|| "couldn't parse couple (format of version 1)".to_string())?;
                self.metadata.namespace_name = "default".to_string();
                self.metadata.frozen = false;
                self.metadata.service = ServiceMetadata::default();
            }
            other => {
                return Err(format!("unexpected group metadata value {}", other));
            }
        }

        self.metadata_parsed = true;
        Ok(())
    }

    pub(crate) fn set_metadata_error(&mut self, text: String) {
        self.metadata_error = Some(text.clone());
        self.set_status(GroupStatus::Bad, text);
    }

    /// Recomputes the group status from backend state and decoded metadata.
    pub fn update_status(
        &mut self,
        backends: &[BackendBrief],
        couple_check: CoupleCheck,
        forbidden_dht_groups: bool,
    ) {
        if backends.is_empty() {
            self.set_status(
                GroupStatus::Init,
                format!(
                    "Group {} is in state INIT because there are \
                     no node backends serving this group",
                    self.id
                ),
            );
            return;
        }

        if forbidden_dht_groups && backends.len() > 1 {
            self.set_status(
                GroupStatus::Broken,
                format!(
                    "Group {} is in state BROKEN because it has {} backends \
                     but an option 'forbidden_dht_groups' is set",
                    self.id,
                    backends.len()
                ),
            );
            return;
        }

        if let Some(broken) = backends
            .iter()
            .find(|b| b.status == BackendStatus::Broken)
        {
            self.set_status(
                GroupStatus::Broken,
                format!(
                    "Group {} is in state BROKEN because backend {} is broken.",
                    self.id, broken.key
                ),
            );
            return;
        }

        if let Some(err) = &self.metadata_error {
            let text = err.clone();
            self.set_status(GroupStatus::Bad, text);
            return;
        }

        if self.metadata.version == 0 {
            self.set_status(
                GroupStatus::Init,
                format!(
                    "Group {} is in state INIT because meta key was not read from it.",
                    self.id
                ),
            );
            return;
        }

        if self.metadata.couple.is_empty() {
            self.set_status(
                GroupStatus::Init,
                format!(
                    "Group {} is in state INIT because there is no coupling info.",
                    self.id
                ),
            );
            return;
        }

        match couple_check {
            CoupleCheck::NoCouple => {
                self.set_status(
                    GroupStatus::Bad,
                    format!(
                        "Group {} is in state BAD because couple was not created.",
                        self.id
                    ),
                );
                return;
            }
            CoupleCheck::Mismatch => {
                self.set_status(
                    GroupStatus::Bad,
                    format!(
                        "Group {} is in state BAD because couple check fails.",
                        self.id
                    ),
                );
                return;
            }
            CoupleCheck::Matches => {}
        }

        if self.metadata.namespace_name.is_empty() {
            self.set_status(
                GroupStatus::Bad,
                format!(
                    "Group {} is in state BAD because there is no namespace assigned to it.",
                    self.id
                ),
            );
            return;
        }

        if !self.metadata.couple.contains(&self.id) {
            self.set_status(
                GroupStatus::Broken,
                format!(
                    "Group {} is in state BROKEN because its id is missing in coupling info.",
                    self.id
                ),
            );
            return;
        }

        if let Some(ro) = backends.iter().find(|b| b.status == BackendStatus::Ro) {
            if self.metadata.service.migrating {
                self.set_status(
                    GroupStatus::Migrating,
                    format!(
                        "Group {} is migrating, job id is {}.",
                        self.id, self.metadata.service.job_id
                    ),
                );
            } else {
                self.set_status(
                    GroupStatus::Ro,
                    format!(
                        "Group {} is Read-Only because backend {} is Read-Only.",
                        self.id, ro.key
                    ),
                );
            }
            return;
        }

        if let Some(bad) = backends.iter().find(|b| b.status != BackendStatus::Ok) {
            self.set_status(
                GroupStatus::Bad,
                format!(
                    "Group {} is in state BAD because backend {} is in state {}",
                    self.id,
                    bad.key,
                    bad.status.as_str()
                ),
            );
            return;
        }

        self.set_status(GroupStatus::Coupled, format!("Group {} is OK", self.id));
    }

    /// Reconciles two views of the same group; the one with the greater
    /// update time wins.
    pub fn merge(&mut self, other: &Group, have_newer: &mut bool) {
        if self.update_time > other.update_time {
            *have_newer = true;
            return;
        }
        if self.update_time == other.update_time {
            return;
        }

        self.backends
            .retain(|key| other.backends.contains(key));

        self.clean = other.clean;
        self.metadata_file = other.metadata_file.clone();
        self.update_time = other.update_time;
        self.metadata = other.metadata.clone();
        self.metadata_parsed = other.metadata_parsed;
        self.metadata_error = other.metadata_error.clone();
        self.status = other.status;
        self.status_text = other.status_text.clone();
    }

    pub fn print_info(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Group {{");
        let _ = writeln!(out, "  id: {}", self.id);
        match &self.couple {
            Some(couple) => {
                let _ = writeln!(out, "  couple: {}", couple);
            }
            None => {
                let _ = writeln!(out, "  couple: <none>");
            }
        }
        let _ = write!(out, "  backends: [ ");
        for key in &self.backends {
            let _ = write!(out, "{} ", key);
        }
        let _ = writeln!(out, "]");
        if self.metadata_parsed {
            let _ = writeln!(out, "  namespace: {}", self.metadata.namespace_name);
            let _ = writeln!(out, "  frozen: {}", self.metadata.frozen);
        }
        let _ = writeln!(out, "  status: {}", self.status.as_str());
        let _ = writeln!(out, "  status_text: '{}'", self.status_text);
        let _ = write!(out, "}}");
        out
    }
}

fn parse_couple(value: &Value) -> Option<Vec<u64>> {
    let items = value.as_array()?;
    let mut couple = Vec::with_capacity(items.len());
    for item in items {
        let id = item.as_u64()?;
        if id == 0 {
            return None;
        }
        couple.push(id);
    }
    couple.sort_unstable();
    couple.dedup();
    Some(couple)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_couple_sorts_and_dedups() {
        let value: Value = serde_json::from_str("[42, 17, 83]").unwrap();
        assert_eq!(parse_couple(&value), Some(vec![17, 42, 83]));

        let value: Value = serde_json::from_str("[42, 17, 42]").unwrap();
        assert_eq!(parse_couple(&value), Some(vec![17, 42]));
    }

    #[test]
    fn test_parse_couple_rejects_non_positive() {
        let zero: Value = serde_json::from_str("[17, 0]").unwrap();
        assert_eq!(parse_couple(&zero), None);
        let negative: Value = serde_json::from_str("[17, -3]").unwrap();
        assert_eq!(parse_couple(&negative), None);
        let string: Value = serde_json::from_str(r#"[17, "42"]"#).unwrap();
        assert_eq!(parse_couple(&string), None);
    }
}
