//! Authorization engine for workflow tasks.
//!
//! Decides whether a subject, described by its role assignments, may perform
//! an operation on a task; turns the same rules into a search predicate;
//! selects an auto-assignee; and names task transitions.
//!
//! Everything except [`source`] is synchronous and side-effect free apart
//! from `tracing` output. Time is injected through [`GrantEvaluator::at`]
//! and [`SearchPredicateBuilder::at`].

pub mod action;
pub mod auto_assign;
pub mod decision;
pub mod grant;
pub mod predicate;
pub mod requirement;
pub mod source;

pub use action::{classify, TaskAction};
pub use auto_assign::AutoAssignmentSelector;
pub use decision::{AccessDecision, AccessDecisionAggregator};
pub use grant::GrantEvaluator;
pub use predicate::{Predicate, SearchPredicateBuilder, SortDirection, SortField, SortOrder};
pub use requirement::operations;
pub use source::{RoleAssignmentSource, SqliteRoleAssignmentSource, StaticRoleAssignmentSource};
