use super::grant::intersects;
use crate::models::{RoleAssignment, TaskAccessProfile};

/// Picks at most one role assignment to receive a task.
///
/// Profiles are walked in ascending `assignment_priority` (stable, so equal
/// priorities keep their configured order). Under each profile the holders of
/// that role are tried in assignment-id order and the first eligible one wins.
/// Authorisation matching is a gate, never a score.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoAssignmentSelector;

impl AutoAssignmentSelector {
    pub fn new() -> Self {
        Self
    }

    /// Selection for a task with no current assignee.
    pub fn select_assignee(&self, profiles: &[TaskAccessProfile], assignments: &[RoleAssignment]) -> Option<String> {
        self.select_assignee_for(profiles, assignments, None)
    }

    /// Selection that also considers the re-validation path for tasks that
    /// are already assigned.
    pub fn select_assignee_for(
        &self,
        profiles: &[TaskAccessProfile],
        assignments: &[RoleAssignment],
        current_assignee: Option<&str>,
    ) -> Option<String> {
        self.select(profiles, assignments, current_assignee)
            .map(|ra| ra.actor_id.clone())
    }

    pub fn select<'a>(
        &self,
        profiles: &[TaskAccessProfile],
        assignments: &'a [RoleAssignment],
        current_assignee: Option<&str>,
    ) -> Option<&'a RoleAssignment> {
        let mut ordered: Vec<&TaskAccessProfile> = profiles.iter().collect();
        ordered.sort_by_key(|p| p.assignment_priority);

        for profile in ordered {
            let mut holders: Vec<&RoleAssignment> = assignments
                .iter()
                .filter(|ra| !ra.is_excluded() && ra.role_name == profile.role_name)
                .collect();
            holders.sort_by(|a, b| a.id.cmp(&b.id));

            if let Some(winner) = holders
                .into_iter()
                .find(|ra| eligible(profile, ra, current_assignee.is_some()))
            {
                tracing::debug!(
                    actor_id = %winner.actor_id,
                    role = %winner.role_name,
                    priority = profile.assignment_priority,
                    "auto-assignment candidate selected"
                );
                return Some(winner);
            }
        }

        tracing::debug!(profiles = profiles.len(), assignments = assignments.len(), "no eligible auto-assignee");
        None
    }
}

fn eligible(profile: &TaskAccessProfile, assignment: &RoleAssignment, task_assigned: bool) -> bool {
    let required = &profile.required_authorisations;
    if profile.auto_assignable {
        required.is_empty() || intersects(&assignment.authorisations, required)
    } else {
        task_assigned && intersects(&assignment.authorisations, required)
    }
}
