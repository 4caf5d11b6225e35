use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::requirement;
use crate::models::{GrantType, PermissionRequirement, RoleAssignment, TaskAccessProfile, TaskAttributes};

/// Decides whether one role assignment authorizes access to one task
/// through one of the task's access profiles.
///
/// Evaluation order (first failure wins):
/// 1. validity window contains `now`
/// 2. assignment classification >= profile classification
/// 3. grant-type attribute match
/// 4. permission requirement against the profile's granted permissions
///
/// EXCLUDED assignments never match here; their veto is applied by
/// [`GrantEvaluator::excludes`] from the aggregator.
#[derive(Debug, Clone, Copy)]
pub struct GrantEvaluator {
    now: DateTime<Utc>,
}

impl Default for GrantEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl GrantEvaluator {
    pub fn new() -> Self {
        Self { now: Utc::now() }
    }

    /// Evaluator pinned to a fixed instant.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn matches(
        &self,
        assignment: &RoleAssignment,
        task: &TaskAttributes,
        profile: &TaskAccessProfile,
        required: &PermissionRequirement,
    ) -> bool {
        if !self.is_candidate(assignment, task, profile) {
            return false;
        }

        let permitted = requirement::evaluate(required, &profile.granted_permissions);
        if !permitted {
            tracing::debug!(
                actor_id = %assignment.actor_id,
                role = %assignment.role_name,
                task_id = %task.task_id,
                "profile does not grant required permissions"
            );
        }
        permitted
    }

    /// Steps 1-3 only: the assignment is active, cleared for the profile's
    /// classification and matches the task's attributes.
    pub fn is_candidate(
        &self,
        assignment: &RoleAssignment,
        task: &TaskAttributes,
        profile: &TaskAccessProfile,
    ) -> bool {
        if assignment.is_excluded() || assignment.role_name != profile.role_name {
            return false;
        }

        if !assignment.is_active_at(self.now) {
            tracing::debug!(
                actor_id = %assignment.actor_id,
                role = %assignment.role_name,
                "role assignment outside validity window"
            );
            return false;
        }

        if assignment.classification < profile.classification {
            tracing::debug!(
                actor_id = %assignment.actor_id,
                role = %assignment.role_name,
                task_id = %task.task_id,
                "classification below profile floor"
            );
            return false;
        }

        attributes_match(assignment, task, profile)
    }

    /// An active EXCLUDED assignment whose jurisdiction, and every other
    /// attribute it carries, equals the task's. An excluder without a
    /// jurisdiction excludes nothing.
    pub fn excludes(&self, assignment: &RoleAssignment, task: &TaskAttributes) -> bool {
        if !assignment.is_excluded() || !assignment.is_active_at(self.now) {
            return false;
        }

        let attrs = &assignment.attributes;
        required_eq(&attrs.jurisdiction, &task.jurisdiction)
            && optional_eq(&attrs.case_type, &task.case_type)
            && optional_eq(&attrs.case_id, &task.case_id)
            && optional_eq(&attrs.region, &task.region)
            && optional_eq(&attrs.base_location, &task.location)
            && work_type_allowed(&attrs.work_types, &task.work_type)
    }
}

fn attributes_match(assignment: &RoleAssignment, task: &TaskAttributes, profile: &TaskAccessProfile) -> bool {
    let attrs = &assignment.attributes;

    match assignment.grant_type {
        GrantType::Specific => {
            required_eq(&attrs.jurisdiction, &task.jurisdiction)
                && required_eq(&attrs.case_type, &task.case_type)
                && required_eq(&attrs.case_id, &task.case_id)
        }
        // case type narrows when present; staff grants usually span case types
        GrantType::Standard => {
            required_eq(&attrs.jurisdiction, &task.jurisdiction)
                && required_eq(&attrs.region, &task.region)
                && required_eq(&attrs.base_location, &task.location)
                && optional_eq(&attrs.case_type, &task.case_type)
                && work_type_allowed(&attrs.work_types, &task.work_type)
        }
        GrantType::Challenged => {
            required_eq(&attrs.jurisdiction, &task.jurisdiction)
                && optional_eq(&attrs.case_type, &task.case_type)
                && authorisations_satisfied(&assignment.authorisations, &profile.required_authorisations)
        }
        GrantType::Excluded => false,
    }
}

/// The assignment must carry the attribute and it must equal the task's.
pub(crate) fn required_eq(assignment: &Option<String>, task: &Option<String>) -> bool {
    match (assignment, task) {
        (Some(a), Some(t)) => a == t,
        _ => false,
    }
}

/// An attribute absent from the assignment places no restriction.
pub(crate) fn optional_eq(assignment: &Option<String>, task: &Option<String>) -> bool {
    match assignment {
        None => true,
        Some(a) => task.as_ref() == Some(a),
    }
}

fn work_type_allowed(allowed: &BTreeSet<String>, task: &Option<String>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    task.as_ref().map(|wt| allowed.contains(wt)).unwrap_or(false)
}

/// Empty requirement accepts anyone; otherwise the held tags must overlap.
pub(crate) fn authorisations_satisfied(held: &BTreeSet<String>, required: &BTreeSet<String>) -> bool {
    required.is_empty() || intersects(held, required)
}

pub(crate) fn intersects(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    a.intersection(b).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, PermissionType};
    use chrono::Duration;

    fn task() -> TaskAttributes {
        TaskAttributes::new("task-1", Classification::Public)
            .with_jurisdiction("IA")
            .with_case_type("Asylum")
            .with_case_id("1623278362431003")
            .with_region("1")
            .with_location("765324")
            .with_work_type("hearing_work")
    }

    fn profile(role: &str) -> TaskAccessProfile {
        TaskAccessProfile::new(role, Classification::Public)
            .with_permissions([PermissionType::Read, PermissionType::Own])
    }

    fn standard() -> RoleAssignment {
        RoleAssignment::new("actor-1", "tribunal-caseworker", GrantType::Standard, Classification::Public)
            .with_jurisdiction("IA")
            .with_region("1")
            .with_base_location("765324")
    }

    #[test]
    fn standard_matches_without_case_type() {
        let eval = GrantEvaluator::new();
        let read = PermissionRequirement::single(PermissionType::Read);
        assert!(eval.matches(&standard(), &task(), &profile("tribunal-caseworker"), &read));
    }

    #[test]
    fn standard_fails_on_other_location_or_missing_jurisdiction() {
        let eval = GrantEvaluator::new();
        let p = profile("tribunal-caseworker");

        let elsewhere = standard().with_base_location("111111");
        assert!(!eval.is_candidate(&elsewhere, &task(), &p));

        let mut no_jurisdiction = standard();
        no_jurisdiction.attributes.jurisdiction = None;
        assert!(!eval.is_candidate(&no_jurisdiction, &task(), &p));
    }

    #[test]
    fn standard_without_region_or_location_fails_closed() {
        let eval = GrantEvaluator::new();
        let p = profile("tribunal-caseworker");
        let read = PermissionRequirement::single(PermissionType::Read);

        let jurisdiction_only =
            RoleAssignment::new("actor-1", "tribunal-caseworker", GrantType::Standard, Classification::Public)
                .with_jurisdiction("IA");
        assert!(!eval.matches(&jurisdiction_only, &task(), &p, &read));

        let mut no_region = standard();
        no_region.attributes.region = None;
        assert!(!eval.matches(&no_region, &task(), &p, &read));

        let mut no_location = standard();
        no_location.attributes.base_location = None;
        assert!(!eval.matches(&no_location, &task(), &p, &read));

        assert!(!eval.is_candidate(&standard().with_case_type("Divorce"), &task(), &p));
    }

    #[test]
    fn standard_work_types_restrict_when_present() {
        let eval = GrantEvaluator::new();
        let p = profile("tribunal-caseworker");
        assert!(eval.is_candidate(&standard().with_work_types(["hearing_work"]), &task(), &p));
        assert!(!eval.is_candidate(&standard().with_work_types(["routine_work"]), &task(), &p));
    }

    #[test]
    fn specific_requires_all_three_identifiers() {
        let eval = GrantEvaluator::new();
        let p = profile("case-manager");
        let full = RoleAssignment::new("actor-1", "case-manager", GrantType::Specific, Classification::Public)
            .with_jurisdiction("IA")
            .with_case_type("Asylum")
            .with_case_id("1623278362431003");
        assert!(eval.is_candidate(&full, &task(), &p));

        let mut missing_type = full.clone();
        missing_type.attributes.case_type = None;
        assert!(!eval.is_candidate(&missing_type, &task(), &p));

        assert!(!eval.is_candidate(&full.with_case_id("999"), &task(), &p));
    }

    #[test]
    fn challenged_checks_authorisations() {
        let eval = GrantEvaluator::new();
        let challenged = RoleAssignment::new("actor-1", "challenged-access-judiciary", GrantType::Challenged, Classification::Public)
            .with_jurisdiction("IA");

        let open = profile("challenged-access-judiciary");
        let gated = profile("challenged-access-judiciary").with_required_authorisations(["DIVORCE"]);

        assert!(eval.is_candidate(&challenged, &task(), &open));
        assert!(!eval.is_candidate(&challenged, &task(), &gated));

        let tagged = challenged.with_authorisations(["DIVORCE", "PROBATE"]);
        assert!(eval.is_candidate(&tagged, &task(), &gated));
    }

    #[test]
    fn classification_floor_and_monotonicity() {
        let eval = GrantEvaluator::new();
        let private_profile = TaskAccessProfile::new("tribunal-caseworker", Classification::Private);

        let mut ra = standard();
        assert!(!eval.is_candidate(&ra, &task(), &private_profile));
        for c in [Classification::Private, Classification::Restricted] {
            ra.classification = c;
            assert!(eval.is_candidate(&ra, &task(), &private_profile));
        }
    }

    #[test]
    fn profile_classification_gates_not_the_task_marking() {
        let eval = GrantEvaluator::new();
        let restricted_task = TaskAttributes {
            classification: Classification::Restricted,
            ..task()
        };
        assert!(eval.is_candidate(&standard(), &restricted_task, &profile("tribunal-caseworker")));

        let restricted_profile = TaskAccessProfile::new("tribunal-caseworker", Classification::Restricted);
        assert!(!eval.is_candidate(&standard(), &task(), &restricted_profile));
    }

    #[test]
    fn expired_assignment_never_matches() {
        let now = Utc::now();
        let eval = GrantEvaluator::at(now);
        let expired = standard().with_validity(Some(now - Duration::days(10)), Some(now - Duration::days(1)));
        assert!(!eval.is_candidate(&expired, &task(), &profile("tribunal-caseworker")));
    }

    #[test]
    fn excluded_never_grants_but_excludes_same_case() {
        let eval = GrantEvaluator::new();
        let excluded = RoleAssignment::new("actor-1", "conflict-of-interest", GrantType::Excluded, Classification::Restricted)
            .with_jurisdiction("IA")
            .with_case_id("1623278362431003");
        let p = profile("conflict-of-interest").with_permissions(PermissionType::ALL);

        assert!(!eval.matches(&excluded, &task(), &p, &PermissionRequirement::single(PermissionType::Read)));
        assert!(eval.excludes(&excluded, &task()));
        assert!(!eval.excludes(&excluded.clone().with_case_id("other"), &task()));

        let mut no_jurisdiction = excluded;
        no_jurisdiction.attributes.jurisdiction = None;
        assert!(!eval.excludes(&no_jurisdiction, &task()));
    }

    #[test]
    fn excluded_compares_whatever_attributes_it_carries() {
        let eval = GrantEvaluator::new();
        let location_ban = RoleAssignment::new("actor-1", "conflict-of-interest", GrantType::Excluded, Classification::Public)
            .with_jurisdiction("IA")
            .with_region("1")
            .with_base_location("765324");

        assert!(eval.excludes(&location_ban, &task()));
        assert!(!eval.excludes(&location_ban.clone().with_base_location("111111"), &task()));
        assert!(eval.excludes(&location_ban.clone().with_work_types(["hearing_work"]), &task()));
        assert!(!eval.excludes(&location_ban.with_work_types(["routine_work"]), &task()));
    }

    #[test]
    fn role_name_must_match_profile() {
        let eval = GrantEvaluator::new();
        assert!(!eval.is_candidate(&standard(), &task(), &profile("senior-tribunal-caseworker")));
    }
}
