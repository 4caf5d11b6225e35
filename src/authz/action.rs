use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::TaskState;

/// Name recorded for a task transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskAction {
    Claim,
    Assign,
    Unclaim,
    Unassign,
    UnclaimAssign,
    UnassignClaim,
    UnassignAssign,
    AutoAssign,
    AutoUnassign,
    AutoUnassignAssign,
    Configure,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Claim => "claim",
            TaskAction::Assign => "assign",
            TaskAction::Unclaim => "unclaim",
            TaskAction::Unassign => "unassign",
            TaskAction::UnclaimAssign => "unclaim_assign",
            TaskAction::UnassignClaim => "unassign_claim",
            TaskAction::UnassignAssign => "unassign_assign",
            TaskAction::AutoAssign => "auto_assign",
            TaskAction::AutoUnassign => "auto_unassign",
            TaskAction::AutoUnassignAssign => "auto_unassign_assign",
            TaskAction::Configure => "configure",
        }
    }
}

/// Labels a transition. An initiator changing the assignee gets an
/// actor-relative name; everything else is named from the state change.
pub fn classify(
    initiator: Option<&str>,
    old_assignee: Option<&str>,
    new_assignee: Option<&str>,
    old_state: TaskState,
    new_state: TaskState,
) -> TaskAction {
    if let Some(initiator) = initiator {
        if let Some(action) = classify_assignee_change(initiator, old_assignee, new_assignee) {
            return action;
        }
    }
    classify_state_change(old_assignee, new_assignee, old_state, new_state)
}

fn classify_assignee_change(initiator: &str, old: Option<&str>, new: Option<&str>) -> Option<TaskAction> {
    let action = match (old, new) {
        (None, Some(new)) if new == initiator => TaskAction::Claim,
        (None, Some(_)) => TaskAction::Assign,
        (Some(old), None) if old == initiator => TaskAction::Unclaim,
        (Some(_), None) => TaskAction::Unassign,
        (Some(old), Some(new)) if old == new => return None,
        (Some(old), Some(_)) if old == initiator => TaskAction::UnclaimAssign,
        (Some(_), Some(new)) if new == initiator => TaskAction::UnassignClaim,
        (Some(_), Some(_)) => TaskAction::UnassignAssign,
        (None, None) => return None,
    };
    Some(action)
}

fn classify_state_change(
    old_assignee: Option<&str>,
    new_assignee: Option<&str>,
    old_state: TaskState,
    new_state: TaskState,
) -> TaskAction {
    use TaskState::*;

    match (old_state, new_state) {
        (Unconfigured | Unassigned, Assigned) => TaskAction::AutoAssign,
        (Assigned, Assigned) if old_assignee != new_assignee => TaskAction::AutoUnassignAssign,
        (Assigned, Unassigned) => TaskAction::AutoUnassign,
        _ => TaskAction::Configure,
    }
}
