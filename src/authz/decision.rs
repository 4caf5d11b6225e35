use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::grant::GrantEvaluator;
use super::requirement;
use crate::models::{PermissionRequirement, PermissionType, RoleAssignment, TaskAccessProfile, TaskAttributes};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_role_assignment: Option<RoleAssignment>,
}

impl AccessDecision {
    pub fn denied() -> Self {
        Self {
            allowed: false,
            matched_role_assignment: None,
        }
    }

    fn allowed(matched: RoleAssignment) -> Self {
        Self {
            allowed: true,
            matched_role_assignment: Some(matched),
        }
    }
}

/// Combines all of a subject's role assignments into one decision.
/// Grants are OR-ed; a matching EXCLUDED assignment vetoes all of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessDecisionAggregator {
    grants: GrantEvaluator,
}

impl AccessDecisionAggregator {
    pub fn new(grants: GrantEvaluator) -> Self {
        Self { grants }
    }

    pub fn decide(
        &self,
        assignments: &[RoleAssignment],
        task: &TaskAttributes,
        profiles: &[TaskAccessProfile],
        required: &PermissionRequirement,
    ) -> AccessDecision {
        let candidates = self.candidates(assignments, task, profiles);
        if candidates.is_empty() {
            tracing::debug!(task_id = %task.task_id, "no candidate role assignment");
            return AccessDecision::denied();
        }

        let mut union: BTreeSet<PermissionType> = BTreeSet::new();
        let mut first_sufficient: Option<&RoleAssignment> = None;
        for (assignment, profile) in &candidates {
            union.extend(profile.granted_permissions.iter().copied());
            if first_sufficient.is_none() && requirement::evaluate(required, &profile.granted_permissions) {
                first_sufficient = Some(*assignment);
            }
        }

        if !requirement::evaluate(required, &union) {
            tracing::debug!(
                task_id = %task.task_id,
                candidates = candidates.len(),
                "candidates lack required permissions"
            );
            return AccessDecision::denied();
        }

        let matched = first_sufficient.unwrap_or(candidates[0].0);
        tracing::debug!(
            task_id = %task.task_id,
            actor_id = %matched.actor_id,
            role = %matched.role_name,
            "access granted"
        );
        AccessDecision::allowed(matched.clone())
    }

    /// Non-vetoed candidates, in input order. Used to narrow the pool handed
    /// to auto-assignment.
    pub fn eligible_for_auto_assignment(
        &self,
        assignments: &[RoleAssignment],
        task: &TaskAttributes,
        profiles: &[TaskAccessProfile],
    ) -> Vec<RoleAssignment> {
        self.candidates(assignments, task, profiles)
            .into_iter()
            .map(|(assignment, _)| assignment.clone())
            .collect()
    }

    fn candidates<'a>(
        &self,
        assignments: &'a [RoleAssignment],
        task: &TaskAttributes,
        profiles: &'a [TaskAccessProfile],
    ) -> Vec<(&'a RoleAssignment, &'a TaskAccessProfile)> {
        let (excluders, grantors): (Vec<&RoleAssignment>, Vec<&RoleAssignment>) =
            assignments.iter().partition(|ra| ra.is_excluded());

        if let Some(excluder) = excluders.iter().find(|ra| self.grants.excludes(ra, task)) {
            tracing::debug!(
                task_id = %task.task_id,
                actor_id = %excluder.actor_id,
                role = %excluder.role_name,
                "excluded role assignment vetoes access"
            );
            return Vec::new();
        }

        grantors
            .into_iter()
            .filter_map(|ra| {
                let profile = profiles.iter().find(|p| p.role_name == ra.role_name)?;
                self.grants
                    .is_candidate(ra, task, profile)
                    .then_some((ra, profile))
            })
            .collect()
    }
}
