use std::fmt::Write as _;

use crate::core::group::GroupStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum CoupleStatus {
    #[default]
    Init,
    Ok,
    Full,
    Bad,
    Broken,
    Frozen,
}

impl CoupleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoupleStatus::Init => "INIT",
            CoupleStatus::Ok => "OK",
            CoupleStatus::Full => "FULL",
            CoupleStatus::Bad => "BAD",
            CoupleStatus::Broken => "BROKEN",
            CoupleStatus::Frozen => "FROZEN",
        }
    }
}

/// Per-group digest handed to the couple status machine by the store.
#[derive(Clone, Debug)]
pub struct GroupBrief {
    pub id: u64,
    pub status: GroupStatus,
    pub frozen: bool,
    pub metadata_parsed: bool,
    pub metadata_file: Vec<u8>,
    pub total_space: u64,
    pub full: bool,
}

pub fn couple_key(group_ids: &[u64]) -> String {
    let mut key = String::new();
    for (i, id) in group_ids.iter().enumerate() {
        if i > 0 {
            key.push(':');
        }
        let _ = write!(key, "{}", id);
    }
    key
}

/// A set of groups replicating the same data, keyed by the sorted
/// colon-joined member ids.
#[derive(Clone, Debug)]
pub struct Couple {
    key: String,
    group_ids: Vec<u64>,
    status: CoupleStatus,
    status_text: String,
}

impl Couple {
    pub fn new(group_ids: Vec<u64>) -> Self {
        Couple {
            key: couple_key(&group_ids),
            group_ids,
            status: CoupleStatus::Init,
            status_text: String::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn group_ids(&self) -> &[u64] {
        &self.group_ids
    }

    pub fn status(&self) -> CoupleStatus {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// True when the decoded member list matches this couple exactly. Both
    /// sides are sorted ascending.
    pub fn check(&self, group_ids: &[u64]) -> bool {
        self.group_ids == group_ids
    }

    fn set_status(&mut self, status: CoupleStatus, text: &str) {
        self.status = status;
        self.status_text = text.to_string();
    }

    /// Recomputes the couple status from the member digests, in priority
    /// order: BAD, BROKEN (unmatched totals), FROZEN, FULL/OK, propagated
    /// INIT/BROKEN, then the terminal BAD fallback.
    pub fn update_status(
        &mut self,
        groups: &[GroupBrief],
        forbidden_unmatched_group_total_space: bool,
    ) {
        if groups.is_empty() {
            self.set_status(CoupleStatus::Bad, "Couple has no groups");
            return;
        }

        // bytewise metadata agreement, among members that decoded anything
        let mut parsed = groups.iter().filter(|g| g.metadata_parsed);
        if let Some(first) = parsed.next() {
            if parsed.any(|g| g.metadata_file != first.metadata_file) {
                self.set_status(CoupleStatus::Bad, "Groups have different metadata");
                return;
            }
        }

        if groups.iter().any(|g| {
            matches!(
                g.status,
                GroupStatus::Bad | GroupStatus::Ro | GroupStatus::Migrating
            )
        }) {
            let text = if groups.iter().any(|g| g.status == GroupStatus::Bad) {
                "Some groups are in state BAD"
            } else {
                "Some groups are read-only"
            };
            self.set_status(CoupleStatus::Bad, text);
            return;
        }

        if forbidden_unmatched_group_total_space
            && groups.iter().any(|g| g.total_space != groups[0].total_space)
        {
            self.set_status(
                CoupleStatus::Broken,
                "Couple has unequal total space in groups",
            );
            return;
        }

        // a frozen member freezes the couple even when it is full
        if groups.iter().any(|g| g.frozen) {
            self.set_status(CoupleStatus::Frozen, "Some groups are frozen");
            return;
        }

        if groups.iter().all(|g| g.status == GroupStatus::Coupled) {
            if groups.iter().any(|g| g.full) {
                self.set_status(CoupleStatus::Full, "Couple is FULL");
            } else {
                self.set_status(CoupleStatus::Ok, "Couple is OK");
            }
            return;
        }

        if groups.iter().any(|g| g.status == GroupStatus::Init) {
            self.set_status(CoupleStatus::Init, "Some groups are uninitialized");
            return;
        }

        if groups.iter().any(|g| g.status == GroupStatus::Broken) {
            self.set_status(CoupleStatus::Broken, "Some groups are in state BROKEN");
            return;
        }

        self.set_status(CoupleStatus::Bad, "Couple is BAD for unknown reason");
    }

    /// Adopts the other view's status; group membership mismatches are a
    /// caller-level inconsistency reported there.
    pub fn merge(&mut self, other: &Couple) {
        self.status = other.status;
        self.status_text = other.status_text.clone();
    }

    pub fn print_info(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Couple {{");
        let _ = writeln!(out, "  key: {}", self.key);
        let _ = write!(out, "  groups: [ ");
        for id in &self.group_ids {
            let _ = write!(out, "{} ", id);
        }
        let _ = writeln!(out, "]");
        let _ = writeln!(out, "  status: {}", self.status.as_str());
        let _ = writeln!(out, "  status_text: '{}'", self.status_text);
        let _ = write!(out, "}}");
        out
    }
}
