//! SQL rendering of search predicates and the paged task query.

use sqlx::{Row, SqlitePool};

use crate::authz::predicate::{total_order, Predicate, ProfileFilter, SortDirection, SortField, SortOrder};
use crate::db::row_parsers;
use crate::db::tasks::TASK_COLUMNS;
use crate::errors::{AppError, AppResult, LIMIT_TOO_SMALL, OFFSET_NEGATIVE, TOO_MANY_GRANTS};
use crate::models::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(offset: i64, limit: i64) -> AppResult<Self> {
        if offset < 0 {
            return Err(AppError::validation(OFFSET_NEGATIVE));
        }
        if limit < 1 {
            return Err(AppError::validation(LIMIT_TOO_SMALL));
        }
        Ok(Self { offset, limit })
    }
}

/// SQLite's default cap on `?` parameters in one statement.
pub const MAX_BINDS: usize = 32_766;

/// A WHERE fragment over `tasks t` plus its positional parameters.
///
/// Only caller-supplied text is bound. Classification ranks and permission
/// names come from closed enums and are rendered as literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFilter {
    pub sql: String,
    pub binds: Vec<String>,
}

pub fn render(predicate: &Predicate) -> SqlFilter {
    let mut binds = Vec::new();
    let sql = render_into(predicate, &mut binds);
    SqlFilter { sql, binds }
}

fn render_into(predicate: &Predicate, binds: &mut Vec<String>) -> String {
    match predicate {
        Predicate::True => "1=1".to_string(),
        Predicate::False => "1=0".to_string(),
        Predicate::In { field, values } => {
            if values.is_empty() {
                return "1=0".to_string();
            }
            binds.extend(values.iter().cloned());
            // NULL never matches, so NOT over this stays true for NULL columns.
            format!(
                "(t.{col} IS NOT NULL AND t.{col} IN ({}))",
                placeholders(values.len()),
                col = field.column()
            )
        }
        Predicate::Profile(filter) => render_profile(filter, binds),
        Predicate::And { all } => join(all, " AND ", "1=1", binds),
        Predicate::Or { any } => join(any, " OR ", "1=0", binds),
        Predicate::Not { predicate } => format!("(NOT {})", render_into(predicate, binds)),
    }
}

fn join(terms: &[Predicate], sep: &str, empty: &str, binds: &mut Vec<String>) -> String {
    if terms.is_empty() {
        return empty.to_string();
    }
    let parts: Vec<String> = terms.iter().map(|p| render_into(p, binds)).collect();
    format!("({})", parts.join(sep))
}

fn render_profile(filter: &ProfileFilter, binds: &mut Vec<String>) -> String {
    let mut sql = format!(
        "EXISTS (SELECT 1 FROM task_access_profiles p WHERE p.task_id = t.id AND p.role_name = ? AND p.classification <= {}",
        filter.max_classification.rank()
    );
    binds.push(filter.role_name.clone());

    if let Some(held) = &filter.authorisations {
        let unrestricted = "NOT EXISTS (SELECT 1 FROM task_profile_authorisations a \
             WHERE a.task_id = p.task_id AND a.role_name = p.role_name)";
        if held.is_empty() {
            sql.push_str(&format!(" AND {}", unrestricted));
        } else {
            sql.push_str(&format!(
                " AND ({} OR EXISTS (SELECT 1 FROM task_profile_authorisations a \
                 WHERE a.task_id = p.task_id AND a.role_name = p.role_name AND a.authorisation IN ({})))",
                unrestricted,
                placeholders(held.len())
            ));
            binds.extend(held.iter().cloned());
        }
    }

    if let Some(permission) = filter.permission {
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM task_profile_permissions pp \
             WHERE pp.task_id = p.task_id AND pp.role_name = p.role_name AND pp.permission = '{}')",
            permission.as_str()
        ));
    }

    sql.push(')');
    sql
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn sort_column(field: SortField) -> &'static str {
    match field {
        SortField::DueDate => "t.due_date",
        SortField::TaskName => "t.name",
        SortField::CaseId => "t.case_id",
        SortField::Jurisdiction => "t.jurisdiction",
        SortField::Location => "t.location",
        SortField::CreatedAt => "t.created_at",
        SortField::MajorPriority => "t.major_priority",
        SortField::PriorityDate => "t.priority_date",
        SortField::MinorPriority => "t.minor_priority",
        SortField::TaskId => "t.id",
    }
}

/// ORDER BY clause for the caller's sort plus the fixed tie-breakers.
pub fn order_by(requested: &[SortOrder]) -> String {
    let parts: Vec<String> = total_order(requested)
        .iter()
        .map(|s| {
            let dir = match s.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("{} {}", sort_column(s.field), dir)
        })
        .collect();
    format!("ORDER BY {}", parts.join(", "))
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    binds: &'q [String],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for bind in binds {
        query = query.bind(bind.as_str());
    }
    query
}

/// Renders the predicate, refusing filters SQLite would reject. `extra`
/// counts parameters the caller appends after the filter.
fn render_bounded(predicate: &Predicate, extra: usize) -> AppResult<SqlFilter> {
    let filter = render(predicate);
    if filter.binds.len() + extra > MAX_BINDS {
        tracing::warn!(binds = filter.binds.len(), "search filter exceeds parameter limit");
        return Err(AppError::validation(TOO_MANY_GRANTS));
    }
    Ok(filter)
}

pub async fn search_tasks(
    pool: &SqlitePool,
    predicate: &Predicate,
    sort: &[SortOrder],
    page: Pagination,
) -> AppResult<Vec<Task>> {
    if *predicate == Predicate::False {
        return Ok(Vec::new());
    }

    let filter = render_bounded(predicate, 2)?;
    let sql = format!(
        "SELECT {} FROM tasks t WHERE {} {} LIMIT ? OFFSET ?",
        TASK_COLUMNS,
        filter.sql,
        order_by(sort)
    );
    tracing::debug!(sql = %sql, binds = filter.binds.len(), "task search");

    let rows = bind_all(sqlx::query(&sql), &filter.binds)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(pool)
        .await?;

    let mut tasks = Vec::with_capacity(rows.len());
    for row in rows {
        tasks.push(Task::try_from(row_parsers::db_task_from_row(&row)?)?);
    }
    Ok(tasks)
}

pub async fn count_tasks(pool: &SqlitePool, predicate: &Predicate) -> AppResult<i64> {
    if *predicate == Predicate::False {
        return Ok(0);
    }

    let filter = render_bounded(predicate, 0)?;
    let sql = format!("SELECT COUNT(*) AS total FROM tasks t WHERE {}", filter.sql);
    let row = bind_all(sqlx::query(&sql), &filter.binds).fetch_one(pool).await?;

    Ok(row.try_get("total")?)
}
