//! Stateless JSON wrappers around the engine. Callers supply every input;
//! nothing is read from or written to the store.

use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::authz::{
    classify, AccessDecisionAggregator, AutoAssignmentSelector, GrantEvaluator, Predicate, SearchPredicateBuilder,
    SortOrder, TaskAction,
};
use crate::db::search;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::models::{PermissionRequirement, RoleAssignment, TaskAccessProfile, TaskAttributes, TaskState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeRequest {
    #[schema(value_type = Vec<Object>)]
    pub role_assignments: Vec<RoleAssignment>,
    #[schema(value_type = Object)]
    pub task: TaskAttributes,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub profiles: Vec<TaskAccessProfile>,
    /// OR of AND-groups, e.g. `[["CLAIM","OWN"],["ASSIGN"]]`.
    #[schema(value_type = Vec<Vec<String>>)]
    pub required: PermissionRequirement,
    /// Evaluation instant; defaults to the server clock.
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthorizeResponse {
    pub allowed: bool,
    #[schema(value_type = Option<Object>)]
    pub matched_role_assignment: Option<RoleAssignment>,
}

#[utoipa::path(
    post,
    path = "/engine/authorize",
    tag = "Engine",
    request_body = AuthorizeRequest,
    responses((status = 200, description = "Access decision", body = AuthorizeResponse)),
    security(("bearerAuth" = []))
)]
pub async fn authorize(_auth: AuthUser, Json(payload): Json<AuthorizeRequest>) -> AppResult<Json<AuthorizeResponse>> {
    let grants = payload.now.map(GrantEvaluator::at).unwrap_or_default();
    let decision = AccessDecisionAggregator::new(grants).decide(
        &payload.role_assignments,
        &payload.task,
        &payload.profiles,
        &payload.required,
    );

    Ok(Json(AuthorizeResponse {
        allowed: decision.allowed,
        matched_role_assignment: decision.matched_role_assignment,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchPredicateRequest {
    #[schema(value_type = Vec<Object>)]
    pub role_assignments: Vec<RoleAssignment>,
    #[schema(value_type = Vec<Vec<String>>)]
    pub required: PermissionRequirement,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub sort_by: Vec<SortOrder>,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchPredicateResponse {
    #[schema(value_type = Object)]
    pub predicate: Predicate,
    /// WHERE fragment over `tasks t`.
    pub sql: String,
    /// Positional parameters for `sql`.
    pub binds: Vec<String>,
    pub order_by: String,
}

#[utoipa::path(
    post,
    path = "/engine/search-predicate",
    tag = "Engine",
    request_body = SearchPredicateRequest,
    responses((status = 200, description = "Search predicate and its SQL rendering", body = SearchPredicateResponse)),
    security(("bearerAuth" = []))
)]
pub async fn search_predicate(
    _auth: AuthUser,
    Json(payload): Json<SearchPredicateRequest>,
) -> AppResult<Json<SearchPredicateResponse>> {
    let builder = payload.now.map(SearchPredicateBuilder::at).unwrap_or_default();
    let predicate = builder.build(&payload.role_assignments, &payload.required);
    let filter = search::render(&predicate);

    Ok(Json(SearchPredicateResponse {
        predicate,
        sql: filter.sql,
        binds: filter.binds,
        order_by: search::order_by(&payload.sort_by),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AutoAssigneeRequest {
    #[schema(value_type = Vec<Object>)]
    pub profiles: Vec<TaskAccessProfile>,
    #[schema(value_type = Vec<Object>)]
    pub role_assignments: Vec<RoleAssignment>,
    /// Set when re-validating an already assigned task.
    #[serde(default)]
    pub current_assignee: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AutoAssigneeResponse {
    pub assignee: Option<String>,
    pub role_assignment_id: Option<String>,
}

#[utoipa::path(
    post,
    path = "/engine/auto-assignee",
    tag = "Engine",
    request_body = AutoAssigneeRequest,
    responses((status = 200, description = "Selected assignee, if any", body = AutoAssigneeResponse)),
    security(("bearerAuth" = []))
)]
pub async fn auto_assignee(
    _auth: AuthUser,
    Json(payload): Json<AutoAssigneeRequest>,
) -> AppResult<Json<AutoAssigneeResponse>> {
    let selected = AutoAssignmentSelector::new().select(
        &payload.profiles,
        &payload.role_assignments,
        payload.current_assignee.as_deref(),
    );

    Ok(Json(AutoAssigneeResponse {
        assignee: selected.map(|ra| ra.actor_id.clone()),
        role_assignment_id: selected.map(|ra| ra.id.clone()),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClassifyActionRequest {
    #[serde(default)]
    pub initiator: Option<String>,
    #[serde(default)]
    pub old_assignee: Option<String>,
    #[serde(default)]
    pub new_assignee: Option<String>,
    pub old_state: TaskState,
    pub new_state: TaskState,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClassifyActionResponse {
    pub action: TaskAction,
}

#[utoipa::path(
    post,
    path = "/engine/classify-action",
    tag = "Engine",
    request_body = ClassifyActionRequest,
    responses((status = 200, description = "Transition name", body = ClassifyActionResponse)),
    security(("bearerAuth" = []))
)]
pub async fn classify_action(
    _auth: AuthUser,
    Json(payload): Json<ClassifyActionRequest>,
) -> AppResult<Json<ClassifyActionResponse>> {
    let action = classify(
        payload.initiator.as_deref(),
        payload.old_assignee.as_deref(),
        payload.new_assignee.as_deref(),
        payload.old_state,
        payload.new_state,
    );
    Ok(Json(ClassifyActionResponse { action }))
}
