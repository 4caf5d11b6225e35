//! Search predicate construction.
//!
//! Translates a subject's role assignments into a filter that selects every
//! task the aggregator would allow, so that bulk search and single-task
//! checks cannot disagree. The predicate is a plain value: the in-memory
//! evaluator here is used by tests, and `db::search` renders it to SQL.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::grant::authorisations_satisfied;
use crate::models::{
    Classification, GrantType, PermissionRequirement, PermissionType, RoleAssignment, TaskAccessProfile,
    TaskAttributes,
};

/// Task columns a predicate can constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskField {
    Jurisdiction,
    CaseType,
    CaseId,
    Region,
    Location,
    WorkType,
}

impl TaskField {
    pub fn column(&self) -> &'static str {
        match self {
            TaskField::Jurisdiction => "jurisdiction",
            TaskField::CaseType => "case_type",
            TaskField::CaseId => "case_id",
            TaskField::Region => "region",
            TaskField::Location => "location",
            TaskField::WorkType => "work_type",
        }
    }

    fn value<'a>(&self, task: &'a TaskAttributes) -> Option<&'a str> {
        match self {
            TaskField::Jurisdiction => task.jurisdiction.as_deref(),
            TaskField::CaseType => task.case_type.as_deref(),
            TaskField::CaseId => task.case_id.as_deref(),
            TaskField::Region => task.region.as_deref(),
            TaskField::Location => task.location.as_deref(),
            TaskField::WorkType => task.work_type.as_deref(),
        }
    }
}

/// "The task has an access profile for `role_name` that this grant clears."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFilter {
    pub role_name: String,
    /// Highest profile classification the grant may see.
    pub max_classification: Classification,
    /// Authorisations held by a CHALLENGED grant; `None` skips the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorisations: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<PermissionType>,
}

impl ProfileFilter {
    fn matches(&self, profile: &TaskAccessProfile) -> bool {
        profile.role_name == self.role_name
            && profile.classification <= self.max_classification
            && self
                .authorisations
                .as_ref()
                .map_or(true, |held| authorisations_satisfied(held, &profile.required_authorisations))
            && self
                .permission
                .map_or(true, |p| profile.granted_permissions.contains(&p))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    True,
    False,
    In { field: TaskField, values: BTreeSet<String> },
    Profile(ProfileFilter),
    And { all: Vec<Predicate> },
    Or { any: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    pub fn equals(field: TaskField, value: impl Into<String>) -> Self {
        Predicate::In {
            field,
            values: BTreeSet::from([value.into()]),
        }
    }

    pub fn one_of(field: TaskField, values: BTreeSet<String>) -> Self {
        if values.is_empty() {
            Predicate::False
        } else {
            Predicate::In { field, values }
        }
    }

    /// Conjunction, flattened; `True` terms drop out and any `False` wins.
    pub fn and(terms: Vec<Predicate>) -> Self {
        let mut all = Vec::with_capacity(terms.len());
        for term in terms {
            match term {
                Predicate::True => {}
                Predicate::False => return Predicate::False,
                Predicate::And { all: nested } => all.extend(nested),
                other => all.push(other),
            }
        }
        match all.len() {
            0 => Predicate::True,
            1 => all.remove(0),
            _ => Predicate::And { all },
        }
    }

    /// Disjunction, flattened; `False` terms drop out and any `True` wins.
    pub fn or(terms: Vec<Predicate>) -> Self {
        let mut any = Vec::with_capacity(terms.len());
        for term in terms {
            match term {
                Predicate::False => {}
                Predicate::True => return Predicate::True,
                Predicate::Or { any: nested } => any.extend(nested),
                other => {
                    if !any.contains(&other) {
                        any.push(other)
                    }
                }
            }
        }
        match any.len() {
            0 => Predicate::False,
            1 => any.remove(0),
            _ => Predicate::Or { any },
        }
    }

    pub fn negate(predicate: Predicate) -> Self {
        match predicate {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::Not { predicate } => *predicate,
            other => Predicate::Not {
                predicate: Box::new(other),
            },
        }
    }

    /// Evaluates against one task and its access profiles.
    pub fn matches(&self, task: &TaskAttributes, profiles: &[TaskAccessProfile]) -> bool {
        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::In { field, values } => field.value(task).map_or(false, |v| values.contains(v)),
            Predicate::Profile(filter) => profiles.iter().any(|p| filter.matches(p)),
            Predicate::And { all } => all.iter().all(|p| p.matches(task, profiles)),
            Predicate::Or { any } => any.iter().any(|p| p.matches(task, profiles)),
            Predicate::Not { predicate } => !predicate.matches(task, profiles),
        }
    }
}

/// One positive grant in predicate form: attribute constraints on the task
/// plus the profile its role must have on that task.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GrantClause {
    attributes: Predicate,
    profile: ProfileFilter,
}

impl GrantClause {
    fn predicate(&self, permission: Option<PermissionType>) -> Predicate {
        let mut profile = self.profile.clone();
        profile.permission = permission;
        Predicate::and(vec![self.attributes.clone(), Predicate::Profile(profile)])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchPredicateBuilder {
    now: Option<DateTime<Utc>>,
}

impl SearchPredicateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Some(now) }
    }

    pub fn build(&self, assignments: &[RoleAssignment], required: &PermissionRequirement) -> Predicate {
        let now = self.now.unwrap_or_else(Utc::now);
        let active: Vec<&RoleAssignment> = assignments.iter().filter(|ra| ra.is_active_at(now)).collect();

        let clauses = grant_clauses(&active);
        if clauses.is_empty() {
            tracing::debug!(assignments = assignments.len(), "no usable grants for search");
            return Predicate::False;
        }

        let granted = Predicate::or(clauses.iter().map(|c| c.predicate(None)).collect());
        let not_vetoed = Predicate::negate(veto(&active));
        let permitted = Predicate::or(
            required
                .groups()
                .iter()
                .map(|group| {
                    if group.is_empty() {
                        return Predicate::False;
                    }
                    Predicate::and(
                        group
                            .iter()
                            .map(|p| Predicate::or(clauses.iter().map(|c| c.predicate(Some(*p))).collect()))
                            .collect(),
                    )
                })
                .collect(),
        );

        Predicate::and(vec![granted, not_vetoed, permitted])
    }
}

fn grant_clauses(active: &[&RoleAssignment]) -> Vec<GrantClause> {
    let mut clauses: Vec<GrantClause> = Vec::new();
    // (role, classification, jurisdiction, case type) -> case ids
    let mut specific: BTreeMap<(String, Classification, String, String), BTreeSet<String>> = BTreeMap::new();

    for ra in active {
        let attrs = &ra.attributes;
        let profile = ProfileFilter {
            role_name: ra.role_name.clone(),
            max_classification: ra.classification,
            authorisations: None,
            permission: None,
        };

        let clause = match ra.grant_type {
            GrantType::Excluded => continue,
            GrantType::Specific => {
                if let (Some(j), Some(ct), Some(id)) = (&attrs.jurisdiction, &attrs.case_type, &attrs.case_id) {
                    specific
                        .entry((ra.role_name.clone(), ra.classification, j.clone(), ct.clone()))
                        .or_default()
                        .insert(id.clone());
                }
                continue;
            }
            GrantType::Standard => {
                let (Some(j), Some(region), Some(location)) =
                    (&attrs.jurisdiction, &attrs.region, &attrs.base_location)
                else {
                    continue;
                };
                let mut terms = vec![
                    Predicate::equals(TaskField::Jurisdiction, j.clone()),
                    Predicate::equals(TaskField::Region, region.clone()),
                    Predicate::equals(TaskField::Location, location.clone()),
                ];
                terms.extend(optional_term(TaskField::CaseType, &attrs.case_type));
                terms.extend(work_type_term(&attrs.work_types));
                GrantClause {
                    attributes: Predicate::and(terms),
                    profile,
                }
            }
            GrantType::Challenged => {
                let Some(j) = &attrs.jurisdiction else { continue };
                let mut terms = vec![Predicate::equals(TaskField::Jurisdiction, j.clone())];
                terms.extend(optional_term(TaskField::CaseType, &attrs.case_type));
                GrantClause {
                    attributes: Predicate::and(terms),
                    profile: ProfileFilter {
                        authorisations: Some(ra.authorisations.clone()),
                        ..profile
                    },
                }
            }
        };

        if !clauses.contains(&clause) {
            clauses.push(clause);
        }
    }

    for ((role_name, classification, jurisdiction, case_type), case_ids) in specific {
        clauses.push(GrantClause {
            attributes: Predicate::and(vec![
                Predicate::equals(TaskField::Jurisdiction, jurisdiction),
                Predicate::equals(TaskField::CaseType, case_type),
                Predicate::one_of(TaskField::CaseId, case_ids),
            ]),
            profile: ProfileFilter {
                role_name,
                max_classification: classification,
                authorisations: None,
                permission: None,
            },
        });
    }

    clauses
}

fn optional_term(field: TaskField, value: &Option<String>) -> Option<Predicate> {
    value.as_ref().map(|v| Predicate::equals(field, v.clone()))
}

fn work_type_term(work_types: &BTreeSet<String>) -> Option<Predicate> {
    (!work_types.is_empty()).then(|| Predicate::one_of(TaskField::WorkType, work_types.clone()))
}

/// Excluder attributes other than case id; excluders sharing them collapse
/// into one term with a case-id list.
type VetoScope<'a> = (&'a str, Option<&'a str>, Option<&'a str>, Option<&'a str>, &'a BTreeSet<String>);

/// Tasks named by any active EXCLUDED assignment, matching every attribute
/// the excluder carries. `None` case ids mean the whole scope is vetoed.
fn veto(active: &[&RoleAssignment]) -> Predicate {
    let mut scopes: BTreeMap<VetoScope<'_>, Option<BTreeSet<String>>> = BTreeMap::new();
    for ra in active.iter().filter(|ra| ra.is_excluded()) {
        let attrs = &ra.attributes;
        let Some(j) = attrs.jurisdiction.as_deref() else { continue };
        let scope = (
            j,
            attrs.case_type.as_deref(),
            attrs.region.as_deref(),
            attrs.base_location.as_deref(),
            &attrs.work_types,
        );
        let case_ids = scopes.entry(scope).or_insert_with(|| Some(BTreeSet::new()));
        match &attrs.case_id {
            None => *case_ids = None,
            Some(id) => {
                if let Some(ids) = case_ids {
                    ids.insert(id.clone());
                }
            }
        }
    }

    Predicate::or(
        scopes
            .into_iter()
            .map(|((j, case_type, region, location, work_types), case_ids)| {
                let mut terms = vec![Predicate::equals(TaskField::Jurisdiction, j)];
                terms.extend(case_type.map(|v| Predicate::equals(TaskField::CaseType, v)));
                terms.extend(region.map(|v| Predicate::equals(TaskField::Region, v)));
                terms.extend(location.map(|v| Predicate::equals(TaskField::Location, v)));
                terms.extend(work_type_term(work_types));
                terms.extend(case_ids.map(|ids| Predicate::one_of(TaskField::CaseId, ids)));
                Predicate::and(terms)
            })
            .collect(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    DueDate,
    TaskName,
    CaseId,
    Jurisdiction,
    Location,
    CreatedAt,
    MajorPriority,
    PriorityDate,
    MinorPriority,
    TaskId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortOrder {
    pub field: SortField,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortOrder {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }
}

const TIE_BREAKERS: [SortField; 4] = [
    SortField::MajorPriority,
    SortField::PriorityDate,
    SortField::MinorPriority,
    SortField::TaskId,
];

/// Caller order followed by the fixed tie-breakers, ending on task id so
/// repeated page requests see one total order.
pub fn total_order(requested: &[SortOrder]) -> Vec<SortOrder> {
    let mut order: Vec<SortOrder> = Vec::with_capacity(requested.len() + TIE_BREAKERS.len());
    for sort in requested {
        if !order.iter().any(|s| s.field == sort.field) {
            order.push(*sort);
        }
    }
    for field in TIE_BREAKERS {
        if !order.iter().any(|s| s.field == field) {
            order.push(SortOrder::asc(field));
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::decision::AccessDecisionAggregator;
    use crate::authz::grant::GrantEvaluator;
    use crate::authz::requirement::operations;
    use crate::models::TaskState;
    use chrono::Duration;
    use PermissionType::*;

    fn caseworker(location: &str) -> RoleAssignment {
        RoleAssignment::new("actor-1", "tribunal-caseworker", GrantType::Standard, Classification::Public)
            .with_jurisdiction("IA")
            .with_region("1")
            .with_base_location(location)
    }

    fn case_manager(case_id: &str) -> RoleAssignment {
        RoleAssignment::new("actor-1", "case-manager", GrantType::Specific, Classification::Private)
            .with_jurisdiction("IA")
            .with_case_type("Asylum")
            .with_case_id(case_id)
    }

    fn task(id: &str, case_id: &str, location: &str) -> TaskAttributes {
        TaskAttributes::new(id, Classification::Public)
            .with_jurisdiction("IA")
            .with_case_type("Asylum")
            .with_case_id(case_id)
            .with_region("1")
            .with_location(location)
    }

    fn profiles() -> Vec<TaskAccessProfile> {
        vec![
            TaskAccessProfile::new("tribunal-caseworker", Classification::Public).with_permissions([Read, Claim]),
            TaskAccessProfile::new("case-manager", Classification::Private).with_permissions([Read, Execute]),
            TaskAccessProfile::new("challenged-access-legal-ops", Classification::Public)
                .with_required_authorisations(["DIVORCE"])
                .with_permissions([Read]),
            TaskAccessProfile::new("hearing-judge", Classification::Restricted).with_permissions([Read, Own, Claim]),
        ]
    }

    fn judge(classification: Classification) -> RoleAssignment {
        RoleAssignment::new("actor-1", "hearing-judge", GrantType::Standard, classification)
            .with_jurisdiction("IA")
            .with_region("1")
            .with_base_location("765324")
    }

    #[test]
    fn no_grants_is_false() {
        let excluded_only = RoleAssignment::new("a", "conflict", GrantType::Excluded, Classification::Public)
            .with_jurisdiction("IA")
            .with_case_id("1");
        assert_eq!(SearchPredicateBuilder::new().build(&[], &operations::read()), Predicate::False);
        assert_eq!(SearchPredicateBuilder::new().build(&[excluded_only], &operations::read()), Predicate::False);
    }

    #[test]
    fn multiple_assignments_widen_access() {
        let ras = vec![caseworker("765324"), caseworker("111111")];
        let predicate = SearchPredicateBuilder::new().build(&ras, &operations::read());

        assert!(predicate.matches(&task("t1", "c1", "765324"), &profiles()));
        assert!(predicate.matches(&task("t2", "c1", "111111"), &profiles()));
        assert!(!predicate.matches(&task("t3", "c1", "222222"), &profiles()));
    }

    #[test]
    fn specific_case_ids_collapse_into_one_list() {
        let ras = vec![case_manager("c1"), case_manager("c2")];
        let predicate = SearchPredicateBuilder::new().build(&ras, &operations::read());

        let serialized = serde_json::to_string(&predicate).unwrap();
        assert_eq!(serialized.matches("\"case_id\"").count(), 2, "{serialized}");
        assert!(predicate.matches(&task("t1", "c2", "0"), &profiles()));
        assert!(!predicate.matches(&task("t1", "c3", "0"), &profiles()));
    }

    #[test]
    fn excluded_case_is_filtered_out() {
        let excluded = RoleAssignment::new("actor-1", "conflict-of-interest", GrantType::Excluded, Classification::Public)
            .with_jurisdiction("IA")
            .with_case_id("c1");
        let predicate = SearchPredicateBuilder::new().build(&[caseworker("765324"), excluded], &operations::read());

        assert!(!predicate.matches(&task("t1", "c1", "765324"), &profiles()));
        assert!(predicate.matches(&task("t2", "c2", "765324"), &profiles()));
    }

    #[test]
    fn standard_grant_needs_region_and_location() {
        let broad = RoleAssignment::new("actor-1", "tribunal-caseworker", GrantType::Standard, Classification::Public)
            .with_jurisdiction("IA");
        assert_eq!(SearchPredicateBuilder::new().build(&[broad], &operations::read()), Predicate::False);

        let mut no_location = caseworker("765324");
        no_location.attributes.base_location = None;
        let predicate = SearchPredicateBuilder::new().build(&[no_location, caseworker("111111")], &operations::read());
        assert!(!predicate.matches(&task("t1", "c1", "765324"), &profiles()));
        assert!(predicate.matches(&task("t2", "c1", "111111"), &profiles()));
    }

    #[test]
    fn location_excluder_filters_its_scope() {
        let ban = RoleAssignment::new("actor-1", "location-ban", GrantType::Excluded, Classification::Public)
            .with_jurisdiction("IA")
            .with_region("1")
            .with_base_location("765324");
        let predicate = SearchPredicateBuilder::new().build(
            &[caseworker("765324"), caseworker("111111"), ban],
            &operations::read(),
        );

        assert!(!predicate.matches(&task("t1", "c1", "765324"), &profiles()));
        assert!(!predicate.matches(&task("t2", "c2", "765324"), &profiles()));
        assert!(predicate.matches(&task("t3", "c1", "111111"), &profiles()));
    }

    #[test]
    fn permission_requirement_uses_union_of_matching_roles() {
        let ras = vec![caseworker("765324"), case_manager("c1")];
        let predicate = SearchPredicateBuilder::new().build(&ras, &operations::claim());

        // CLAIM from the caseworker profile plus EXECUTE from the case-manager profile.
        assert!(predicate.matches(&task("t1", "c1", "765324"), &profiles()));
        // The case-manager grant does not reach c2, so EXECUTE is missing there.
        assert!(!predicate.matches(&task("t2", "c2", "765324"), &profiles()));
    }

    #[test]
    fn agrees_with_aggregator() {
        let now = Utc::now();
        let agg = AccessDecisionAggregator::new(GrantEvaluator::at(now));
        let builder = SearchPredicateBuilder::at(now);

        let challenged = RoleAssignment::new("actor-1", "challenged-access-legal-ops", GrantType::Challenged, Classification::Public)
            .with_jurisdiction("IA");
        let excluded = RoleAssignment::new("actor-1", "conflict-of-interest", GrantType::Excluded, Classification::Public)
            .with_jurisdiction("IA")
            .with_case_id("c3");

        let expired = caseworker("765324").with_validity(Some(now - Duration::days(10)), Some(now - Duration::days(1)));
        let not_yet_excluded = RoleAssignment::new("actor-1", "conflict-of-interest", GrantType::Excluded, Classification::Public)
            .with_jurisdiction("IA")
            .with_case_id("c1")
            .with_validity(Some(now + Duration::days(1)), None);
        let location_ban = RoleAssignment::new("actor-1", "location-ban", GrantType::Excluded, Classification::Public)
            .with_jurisdiction("IA")
            .with_region("1")
            .with_base_location("111111");
        let jurisdiction_only = RoleAssignment::new("actor-1", "tribunal-caseworker", GrantType::Standard, Classification::Public)
            .with_jurisdiction("IA");

        let subjects: Vec<Vec<RoleAssignment>> = vec![
            vec![caseworker("765324")],
            vec![case_manager("c1"), case_manager("c2")],
            vec![challenged.clone()],
            vec![challenged.with_authorisations(["DIVORCE"])],
            vec![caseworker("765324"), case_manager("c1"), excluded],
            vec![expired],
            vec![caseworker("765324"), not_yet_excluded],
            vec![caseworker("765324").with_work_types(["hearing_work"])],
            vec![judge(Classification::Private)],
            vec![judge(Classification::Restricted)],
            vec![caseworker("111111"), caseworker("765324"), location_ban],
            vec![jurisdiction_only],
        ];
        let tasks: Vec<TaskAttributes> = vec![
            task("t1", "c1", "765324"),
            task("t2", "c2", "111111"),
            task("t3", "c3", "765324"),
            TaskAttributes { state: TaskState::Assigned, ..task("t4", "c1", "111111") },
            task("t5", "c5", "765324").with_work_type("hearing_work"),
            task("t6", "c6", "765324").with_work_type("routine_work"),
        ];
        let requirements = [operations::read(), operations::claim(), operations::assign()];

        for ras in &subjects {
            for required in &requirements {
                let predicate = builder.build(ras, required);
                for t in &tasks {
                    let expected = agg.decide(ras, t, &profiles(), required).allowed;
                    assert_eq!(
                        predicate.matches(t, &profiles()),
                        expected,
                        "task {} with {:?} and {:?}",
                        t.task_id,
                        ras.iter().map(|r| &r.role_name).collect::<Vec<_>>(),
                        required
                    );
                }
            }
        }

        let read = operations::read();
        assert_eq!(builder.build(&subjects[5], &read), Predicate::False);
        assert!(agg.decide(&subjects[6], &tasks[0], &profiles(), &read).allowed);
        assert!(agg.decide(&subjects[7], &tasks[4], &profiles(), &read).allowed);
        assert!(!agg.decide(&subjects[7], &tasks[5], &profiles(), &read).allowed);
        assert!(!agg.decide(&subjects[8], &tasks[0], &profiles(), &read).allowed);
        assert!(agg.decide(&subjects[9], &tasks[0], &profiles(), &read).allowed);
    }

    #[test]
    fn smart_constructors_simplify() {
        let a = Predicate::equals(TaskField::Region, "1");
        assert_eq!(Predicate::and(vec![Predicate::True, a.clone()]), a);
        assert_eq!(Predicate::and(vec![a.clone(), Predicate::False]), Predicate::False);
        assert_eq!(Predicate::or(vec![a.clone(), Predicate::False, a.clone()]), a);
        assert_eq!(Predicate::negate(Predicate::negate(a.clone())), a);
        assert_eq!(Predicate::one_of(TaskField::CaseId, BTreeSet::new()), Predicate::False);
    }

    #[test]
    fn total_order_appends_missing_tie_breakers() {
        let order = total_order(&[SortOrder::desc(SortField::DueDate), SortOrder::asc(SortField::MinorPriority)]);
        let fields: Vec<SortField> = order.iter().map(|s| s.field).collect();
        assert_eq!(
            fields,
            vec![
                SortField::DueDate,
                SortField::MinorPriority,
                SortField::MajorPriority,
                SortField::PriorityDate,
                SortField::TaskId,
            ]
        );
        assert_eq!(order[0].direction, SortDirection::Desc);
        assert_eq!(total_order(&[]).last(), Some(&SortOrder::asc(SortField::TaskId)));
    }
}
