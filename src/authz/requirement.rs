use std::collections::BTreeSet;

use crate::models::{PermissionRequirement, PermissionType};

/// Whether `granted` satisfies the requirement: at least one group must be
/// wholly contained in the granted set. No groups means no match.
pub fn evaluate(requirement: &PermissionRequirement, granted: &BTreeSet<PermissionType>) -> bool {
    requirement
        .groups()
        .iter()
        .any(|group| !group.is_empty() && group.is_subset(granted))
}

/// Requirements for the task operations the host service exposes.
pub mod operations {
    use super::*;
    use PermissionType::*;

    pub fn read() -> PermissionRequirement {
        PermissionRequirement::single(Read)
    }

    pub fn claim() -> PermissionRequirement {
        PermissionRequirement::all_of([Claim, Own])
            .or_all_of([Claim, Execute])
            .or_all_of([Assign, Execute])
            .or_all_of([Assign, Own])
    }

    pub fn unclaim() -> PermissionRequirement {
        PermissionRequirement::any_of([Unclaim, Manage])
    }

    pub fn assign() -> PermissionRequirement {
        PermissionRequirement::any_of([Assign, Manage])
    }

    pub fn unassign() -> PermissionRequirement {
        PermissionRequirement::any_of([Unassign, Manage])
    }

    /// What the receiving actor must hold to be given a task.
    pub fn assignee() -> PermissionRequirement {
        PermissionRequirement::any_of([Own, Execute])
    }
}
