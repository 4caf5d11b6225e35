use std::collections::BTreeSet;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app::AppState;
use crate::authz::{
    classify, operations, AccessDecision, AccessDecisionAggregator, AutoAssignmentSelector, SearchPredicateBuilder,
    SortOrder, TaskAction,
};
use crate::db::search::{self, Pagination};
use crate::db::tasks as store;
use crate::errors::{AppError, AppResult};
use crate::events::{AccessDenial, TaskTransition};
use crate::jwt::AuthUser;
use crate::models::{PermissionRequirement, RoleAssignment, Task, TaskAccessProfile, TaskState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub sort_by: Vec<SortOrder>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    pub tasks: Vec<Task>,
    pub total_records: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRequest {
    /// New assignee; `null` unassigns.
    pub assignee: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskActionResponse {
    pub action: TaskAction,
    pub task: Task,
}

async fn load_task(state: &AppState, task_id: &str) -> AppResult<(Task, Vec<TaskAccessProfile>)> {
    let task = store::fetch_task(&state.pool, task_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("task {} not found", task_id)))?;
    let profiles = store::fetch_profiles(&state.pool, task_id).await?;
    Ok((task, profiles))
}

/// Runs the aggregator for `actor_id`; a denial is logged and mapped to 403.
async fn require(
    state: &AppState,
    actor_id: &str,
    task: &Task,
    profiles: &[TaskAccessProfile],
    operation: &str,
    required: &PermissionRequirement,
) -> AppResult<AccessDecision> {
    let assignments = state.role_source.role_assignments(actor_id).await?;
    let decision = AccessDecisionAggregator::default().decide(&assignments, &task.attributes(), profiles, required);

    if !decision.allowed {
        tracing::info!(task_id = %task.id, actor_id, operation, "access denied");
        state.access_log.record(
            "access_denied",
            Some(actor_id),
            &AccessDenial {
                task_id: task.id.clone(),
                actor_id: actor_id.to_string(),
                operation: operation.to_string(),
            },
        );
        return Err(AppError::forbidden(format!("{} not permitted on task {}", operation, task.id)));
    }
    Ok(decision)
}

fn ensure_open(task: &Task) -> AppResult<()> {
    match task.state {
        TaskState::Unassigned | TaskState::Assigned => Ok(()),
        other => Err(AppError::conflict(format!("task {} is {}", task.id, other.as_str()))),
    }
}

/// Persists the new assignee, names the transition and queues it for the
/// access log.
async fn transition(
    state: &AppState,
    initiator: Option<&str>,
    task: Task,
    new_assignee: Option<String>,
) -> AppResult<TaskActionResponse> {
    let new_state = if new_assignee.is_some() {
        TaskState::Assigned
    } else {
        TaskState::Unassigned
    };
    let action = classify(
        initiator,
        task.assignee.as_deref(),
        new_assignee.as_deref(),
        task.state,
        new_state,
    );

    store::update_assignment(&state.pool, &task.id, new_assignee.as_deref(), new_state).await?;

    let event = TaskTransition {
        task_id: task.id.clone(),
        action,
        old_assignee: task.assignee.clone(),
        new_assignee: new_assignee.clone(),
        old_state: task.state,
        new_state,
    };
    state.access_log.record(action.as_str(), initiator, &event);
    tracing::debug!(task_id = %task.id, action = action.as_str(), "task transition");

    Ok(TaskActionResponse {
        action,
        task: Task {
            assignee: new_assignee,
            state: new_state,
            ..task
        },
    })
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task", body = Task),
        (status = 403, description = "Caller may not read the task"),
        (status = 404, description = "No such task")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    auth: AuthUser,
) -> AppResult<Json<Task>> {
    let (task, profiles) = load_task(&state, &task_id).await?;
    require(&state, &auth.actor_id, &task, &profiles, "read", &operations::read()).await?;
    Ok(Json(task))
}

#[utoipa::path(
    post,
    path = "/tasks/search",
    tag = "Tasks",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Readable tasks, one page", body = SearchResponse),
        (status = 400, description = "Invalid offset or limit")
    ),
    security(("bearerAuth" = []))
)]
pub async fn search_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<SearchRequest>,
) -> AppResult<Json<SearchResponse>> {
    let page = Pagination::new(payload.offset, payload.limit)?;

    let assignments = state.role_source.role_assignments(&auth.actor_id).await?;
    let predicate = SearchPredicateBuilder::new().build(&assignments, &operations::read());

    let tasks = search::search_tasks(&state.pool, &predicate, &payload.sort_by, page).await?;
    let total_records = search::count_tasks(&state.pool, &predicate).await?;

    Ok(Json(SearchResponse { tasks, total_records }))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/claim",
    tag = "Tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task claimed", body = TaskActionResponse),
        (status = 403, description = "Caller may not claim the task"),
        (status = 409, description = "Task is held by someone else or closed")
    ),
    security(("bearerAuth" = []))
)]
pub async fn claim_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    auth: AuthUser,
) -> AppResult<Json<TaskActionResponse>> {
    let _guard = state.task_locks.acquire(&task_id).await;
    let (task, profiles) = load_task(&state, &task_id).await?;
    ensure_open(&task)?;

    require(&state, &auth.actor_id, &task, &profiles, "claim", &operations::claim()).await?;

    match task.assignee.as_deref() {
        Some(current) if current != auth.actor_id => {
            return Err(AppError::conflict(format!("task {} is assigned to another user", task.id)));
        }
        _ => {}
    }

    let response = transition(&state, Some(&auth.actor_id), task, Some(auth.actor_id.clone())).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/unclaim",
    tag = "Tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task released", body = TaskActionResponse),
        (status = 403, description = "Caller may not unclaim the task"),
        (status = 409, description = "Task is not assigned")
    ),
    security(("bearerAuth" = []))
)]
pub async fn unclaim_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    auth: AuthUser,
) -> AppResult<Json<TaskActionResponse>> {
    let _guard = state.task_locks.acquire(&task_id).await;
    let (task, profiles) = load_task(&state, &task_id).await?;
    ensure_open(&task)?;

    require(&state, &auth.actor_id, &task, &profiles, "unclaim", &operations::unclaim()).await?;

    match task.assignee.as_deref() {
        None => return Err(AppError::conflict(format!("task {} is not assigned", task.id))),
        Some(current) if current != auth.actor_id => {
            // releasing someone else's task is an unassign
            require(&state, &auth.actor_id, &task, &profiles, "unassign", &operations::unassign()).await?;
        }
        Some(_) => {}
    }

    let response = transition(&state, Some(&auth.actor_id), task, None).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/assign",
    tag = "Tasks",
    params(("id" = String, Path, description = "Task id")),
    request_body = AssignRequest,
    responses(
        (status = 200, description = "Assignee changed", body = TaskActionResponse),
        (status = 403, description = "Caller may not assign, or the assignee may not own the task")
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    auth: AuthUser,
    Json(payload): Json<AssignRequest>,
) -> AppResult<Json<TaskActionResponse>> {
    let _guard = state.task_locks.acquire(&task_id).await;
    let (task, profiles) = load_task(&state, &task_id).await?;
    ensure_open(&task)?;

    let new_assignee = payload.assignee.filter(|a| !a.trim().is_empty());
    if new_assignee == task.assignee {
        return Err(AppError::conflict(format!("task {} already has that assignee", task.id)));
    }

    if task.assignee.is_some() {
        require(&state, &auth.actor_id, &task, &profiles, "unassign", &operations::unassign()).await?;
    }

    if let Some(assignee) = new_assignee.as_deref() {
        require(&state, &auth.actor_id, &task, &profiles, "assign", &operations::assign()).await?;

        let assignee_ras = state.role_source.role_assignments(assignee).await?;
        let decision = AccessDecisionAggregator::default().decide(
            &assignee_ras,
            &task.attributes(),
            &profiles,
            &operations::assignee(),
        );
        if !decision.allowed {
            state.access_log.record(
                "access_denied",
                Some(&auth.actor_id),
                &AccessDenial {
                    task_id: task.id.clone(),
                    actor_id: assignee.to_string(),
                    operation: "assignee".to_string(),
                },
            );
            return Err(AppError::forbidden(format!("{} may not be assigned task {}", assignee, task.id)));
        }
    }

    let response = transition(&state, Some(&auth.actor_id), task, new_assignee).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/auto-assign",
    tag = "Tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Auto-assignment applied", body = TaskActionResponse),
        (status = 404, description = "No such task"),
        (status = 409, description = "Task is closed")
    ),
    security(("bearerAuth" = []))
)]
pub async fn auto_assign_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    _auth: AuthUser,
) -> AppResult<Json<TaskActionResponse>> {
    let _guard = state.task_locks.acquire(&task_id).await;
    let (task, profiles) = load_task(&state, &task_id).await?;
    ensure_open(&task)?;

    let eligible = eligible_pool(&state, &task, &profiles).await?;
    let selected = AutoAssignmentSelector::new()
        .select(&profiles, &eligible, task.assignee.as_deref())
        .map(|ra| ra.actor_id.clone());

    tracing::info!(
        task_id = %task.id,
        candidates = eligible.len(),
        selected = selected.as_deref().unwrap_or("-"),
        "auto-assignment evaluated"
    );

    if selected == task.assignee {
        let action = classify(None, task.assignee.as_deref(), selected.as_deref(), task.state, task.state);
        return Ok(Json(TaskActionResponse { action, task }));
    }

    let response = transition(&state, None, task, selected).await?;
    Ok(Json(response))
}

/// Candidate assignments for auto-assignment: holders of the task's
/// profile roles, each actor checked with its full assignment set so that
/// their own exclusions apply.
async fn eligible_pool(
    state: &AppState,
    task: &Task,
    profiles: &[TaskAccessProfile],
) -> AppResult<Vec<RoleAssignment>> {
    let role_names: Vec<String> = profiles.iter().map(|p| p.role_name.clone()).collect();
    let holders = state.role_source.holders_of(&role_names).await?;
    let actors: BTreeSet<&str> = holders.iter().map(|ra| ra.actor_id.as_str()).collect();

    let aggregator = AccessDecisionAggregator::default();
    let attributes = task.attributes();
    let mut eligible = Vec::new();
    for actor in actors {
        let assignments = state.role_source.role_assignments(actor).await?;
        eligible.extend(aggregator.eligible_for_auto_assignment(&assignments, &attributes, profiles));
    }
    Ok(eligible)
}
