use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Permission tags a task access profile can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionType {
    Read,
    Refer,
    Own,
    Manage,
    Execute,
    Cancel,
    Complete,
    CompleteOwn,
    CancelOwn,
    Claim,
    Unclaim,
    Assign,
    Unassign,
    UnclaimAssign,
    UnassignClaim,
    UnassignAssign,
}

impl PermissionType {
    pub const ALL: [PermissionType; 16] = [
        PermissionType::Read,
        PermissionType::Refer,
        PermissionType::Own,
        PermissionType::Manage,
        PermissionType::Execute,
        PermissionType::Cancel,
        PermissionType::Complete,
        PermissionType::CompleteOwn,
        PermissionType::CancelOwn,
        PermissionType::Claim,
        PermissionType::Unclaim,
        PermissionType::Assign,
        PermissionType::Unassign,
        PermissionType::UnclaimAssign,
        PermissionType::UnassignClaim,
        PermissionType::UnassignAssign,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionType::Read => "READ",
            PermissionType::Refer => "REFER",
            PermissionType::Own => "OWN",
            PermissionType::Manage => "MANAGE",
            PermissionType::Execute => "EXECUTE",
            PermissionType::Cancel => "CANCEL",
            PermissionType::Complete => "COMPLETE",
            PermissionType::CompleteOwn => "COMPLETE_OWN",
            PermissionType::CancelOwn => "CANCEL_OWN",
            PermissionType::Claim => "CLAIM",
            PermissionType::Unclaim => "UNCLAIM",
            PermissionType::Assign => "ASSIGN",
            PermissionType::Unassign => "UNASSIGN",
            PermissionType::UnclaimAssign => "UNCLAIM_ASSIGN",
            PermissionType::UnassignClaim => "UNASSIGN_CLAIM",
            PermissionType::UnassignAssign => "UNASSIGN_ASSIGN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(value))
    }
}

impl std::fmt::Display for PermissionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized boolean expression over permissions: each group is an AND,
/// groups are OR-ed together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionRequirement {
    groups: Vec<BTreeSet<PermissionType>>,
}

impl PermissionRequirement {
    /// Degenerate one-group, one-permission requirement.
    pub fn single(permission: PermissionType) -> Self {
        Self::all_of([permission])
    }

    /// One group; every permission must be granted.
    pub fn all_of<I: IntoIterator<Item = PermissionType>>(permissions: I) -> Self {
        Self::empty().or_all_of(permissions)
    }

    /// One group per permission; any one suffices.
    pub fn any_of<I: IntoIterator<Item = PermissionType>>(permissions: I) -> Self {
        permissions
            .into_iter()
            .fold(Self::empty(), |req, p| req.or_all_of([p]))
    }

    /// Appends an OR-ed group. Empty groups are ignored.
    pub fn or_all_of<I: IntoIterator<Item = PermissionType>>(mut self, permissions: I) -> Self {
        let group: BTreeSet<PermissionType> = permissions.into_iter().collect();
        if !group.is_empty() {
            self.groups.push(group);
        }
        self
    }

    pub fn empty() -> Self {
        Self { groups: Vec::new() }
    }

    pub fn groups(&self) -> &[BTreeSet<PermissionType>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every permission mentioned anywhere in the requirement.
    pub fn permissions(&self) -> BTreeSet<PermissionType> {
        self.groups.iter().flatten().copied().collect()
    }
}
