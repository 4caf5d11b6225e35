use std::collections::BTreeMap;

use sqlx::{Row, SqlitePool};

use crate::db::row_parsers;
use crate::errors::{AppError, AppResult};
use crate::models::{Classification, PermissionType, Task, TaskAccessProfile, TaskState};

pub(crate) const TASK_COLUMNS: &str = "t.id, t.name, t.state, t.assignee, t.jurisdiction, t.case_type, t.case_id, \
     t.region, t.location, t.work_type, t.classification, t.major_priority, t.minor_priority, \
     t.priority_date, t.due_date, t.created_at";

pub async fn insert_task(pool: &SqlitePool, task: &Task) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO tasks (id, name, state, assignee, jurisdiction, case_type, case_id, region, location, \
         work_type, classification, major_priority, minor_priority, priority_date, due_date, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&task.id)
    .bind(&task.name)
    .bind(task.state.as_str())
    .bind(&task.assignee)
    .bind(&task.jurisdiction)
    .bind(&task.case_type)
    .bind(&task.case_id)
    .bind(&task.region)
    .bind(&task.location)
    .bind(&task.work_type)
    .bind(task.classification.rank())
    .bind(task.major_priority)
    .bind(task.minor_priority)
    .bind(task.priority_date.map(|d| d.to_rfc3339()))
    .bind(task.due_date.map(|d| d.to_rfc3339()))
    .bind(task.created_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|err| match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::conflict(format!("task {} already exists", task.id))
        }
        other => AppError::Database(other),
    })?;

    Ok(())
}

/// Replaces the profile for `(task_id, profile.role_name)` together with its
/// permission and authorisation rows.
pub async fn insert_profile(pool: &SqlitePool, task_id: &str, profile: &TaskAccessProfile) -> AppResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM task_profile_permissions WHERE task_id = ? AND role_name = ?")
        .bind(task_id)
        .bind(&profile.role_name)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM task_profile_authorisations WHERE task_id = ? AND role_name = ?")
        .bind(task_id)
        .bind(&profile.role_name)
        .execute(&mut *tx)
        .await?;
    // Upsert keeps the row's rowid, and with it the profile's place in
    // `fetch_profiles` order.
    sqlx::query(
        "INSERT INTO task_access_profiles (task_id, role_name, classification, assignment_priority, auto_assignable) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (task_id, role_name) DO UPDATE SET \
         classification = excluded.classification, \
         assignment_priority = excluded.assignment_priority, \
         auto_assignable = excluded.auto_assignable",
    )
    .bind(task_id)
    .bind(&profile.role_name)
    .bind(profile.classification.rank())
    .bind(profile.assignment_priority)
    .bind(profile.auto_assignable)
    .execute(&mut *tx)
    .await?;

    for permission in &profile.granted_permissions {
        sqlx::query("INSERT INTO task_profile_permissions (task_id, role_name, permission) VALUES (?, ?, ?)")
            .bind(task_id)
            .bind(&profile.role_name)
            .bind(permission.as_str())
            .execute(&mut *tx)
            .await?;
    }

    for tag in &profile.required_authorisations {
        sqlx::query("INSERT INTO task_profile_authorisations (task_id, role_name, authorisation) VALUES (?, ?, ?)")
            .bind(task_id)
            .bind(&profile.role_name)
            .bind(tag)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn fetch_task(pool: &SqlitePool, task_id: &str) -> AppResult<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks t WHERE t.id = ?", TASK_COLUMNS);
    let row = sqlx::query(&sql).bind(task_id).fetch_optional(pool).await?;

    match row {
        Some(row) => Ok(Some(Task::try_from(row_parsers::db_task_from_row(&row)?)?)),
        None => Ok(None),
    }
}

pub async fn task_exists(pool: &SqlitePool, task_id: &str) -> AppResult<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Profiles in insertion order, which is the order the selector falls back
/// to when priorities tie.
pub async fn fetch_profiles(pool: &SqlitePool, task_id: &str) -> AppResult<Vec<TaskAccessProfile>> {
    let rows = sqlx::query(
        "SELECT role_name, classification, assignment_priority, auto_assignable \
         FROM task_access_profiles WHERE task_id = ? ORDER BY rowid",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    let mut profiles = Vec::with_capacity(rows.len());
    let mut index = BTreeMap::new();
    for row in rows {
        let role_name: String = row.try_get("role_name")?;
        let rank: i64 = row.try_get("classification")?;
        let classification = Classification::from_rank(rank)
            .ok_or_else(|| AppError::internal(format!("unknown classification rank: {}", rank)))?;

        let profile = TaskAccessProfile::new(role_name.clone(), classification)
            .with_priority(row.try_get("assignment_priority")?)
            .auto_assignable(row.try_get("auto_assignable")?);

        index.insert(role_name, profiles.len());
        profiles.push(profile);
    }

    let permissions = sqlx::query("SELECT role_name, permission FROM task_profile_permissions WHERE task_id = ?")
        .bind(task_id)
        .fetch_all(pool)
        .await?;
    for row in permissions {
        let role_name: String = row.try_get("role_name")?;
        let value: String = row.try_get("permission")?;
        let permission = PermissionType::parse(&value)
            .ok_or_else(|| AppError::internal(format!("unknown permission: {}", value)))?;
        if let Some(&i) = index.get(&role_name) {
            profiles[i].granted_permissions.insert(permission);
        }
    }

    let authorisations =
        sqlx::query("SELECT role_name, authorisation FROM task_profile_authorisations WHERE task_id = ?")
            .bind(task_id)
            .fetch_all(pool)
            .await?;
    for row in authorisations {
        let role_name: String = row.try_get("role_name")?;
        let tag: String = row.try_get("authorisation")?;
        if let Some(&i) = index.get(&role_name) {
            profiles[i].required_authorisations.insert(tag);
        }
    }

    Ok(profiles)
}

pub async fn update_assignment(
    pool: &SqlitePool,
    task_id: &str,
    assignee: Option<&str>,
    state: TaskState,
) -> AppResult<()> {
    let result = sqlx::query("UPDATE tasks SET assignee = ?, state = ? WHERE id = ?")
        .bind(assignee)
        .bind(state.as_str())
        .bind(task_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("task {} not found", task_id)));
    }
    Ok(())
}
