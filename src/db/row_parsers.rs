use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::errors::AppError;
use crate::models::task::DbTask;
use crate::models::{Classification, GrantType, RoleAssignment, RoleAttributes, RoleCategory};

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // RFC3339 (e.g. 2025-11-19T12:34:56Z or sqlx's +00:00 form)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp format: "YYYY-MM-DD HH:MM:SS" (with optional fractional seconds)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    // sqlx writes "YYYY-MM-DD HH:MM:SS.f+00:00" for DateTime<Utc>
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

pub fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    match s {
        Some(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(parse_datetime(trimmed)?))
            }
        }
        None => Ok(None),
    }
}

/// Comma separated column -> set; blanks are skipped.
pub fn split_list(value: Option<String>) -> BTreeSet<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_list(values: &BTreeSet<String>) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().cloned().collect::<Vec<_>>().join(","))
    }
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, AppError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
}

pub fn db_task_from_row(row: &SqliteRow) -> Result<DbTask, AppError> {
    let created_at_s: String = get(row, "created_at")?;

    Ok(DbTask {
        id: get(row, "id")?,
        name: get(row, "name")?,
        state: get(row, "state")?,
        assignee: get(row, "assignee")?,
        jurisdiction: get(row, "jurisdiction")?,
        case_type: get(row, "case_type")?,
        case_id: get(row, "case_id")?,
        region: get(row, "region")?,
        location: get(row, "location")?,
        work_type: get(row, "work_type")?,
        classification: get(row, "classification")?,
        major_priority: get(row, "major_priority")?,
        minor_priority: get(row, "minor_priority")?,
        priority_date: parse_opt_datetime(get(row, "priority_date")?)?,
        due_date: parse_opt_datetime(get(row, "due_date")?)?,
        created_at: parse_datetime(&created_at_s)?,
    })
}

pub fn role_assignment_from_row(row: &SqliteRow) -> Result<RoleAssignment, AppError> {
    let category_s: String = get(row, "role_category")?;
    let grant_s: String = get(row, "grant_type")?;
    let classification_s: String = get(row, "classification")?;

    let role_category = RoleCategory::parse(&category_s)
        .ok_or_else(|| AppError::internal(format!("unknown role category: {}", category_s)))?;
    let grant_type = GrantType::parse(&grant_s)
        .ok_or_else(|| AppError::internal(format!("unknown grant type: {}", grant_s)))?;
    let classification = Classification::parse(&classification_s)
        .ok_or_else(|| AppError::internal(format!("unknown classification: {}", classification_s)))?;

    Ok(RoleAssignment {
        id: get(row, "id")?,
        actor_id: get(row, "actor_id")?,
        role_name: get(row, "role_name")?,
        role_category,
        grant_type,
        classification,
        valid_from: parse_opt_datetime(get(row, "valid_from")?)?,
        valid_to: parse_opt_datetime(get(row, "valid_to")?)?,
        authorisations: split_list(get(row, "authorisations")?),
        attributes: RoleAttributes {
            jurisdiction: get(row, "jurisdiction")?,
            case_type: get(row, "case_type")?,
            case_id: get(row, "case_id")?,
            region: get(row, "region")?,
            base_location: get(row, "base_location")?,
            work_types: split_list(get(row, "work_types")?),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_and_rfc3339_forms() {
        let expected = Utc.with_ymd_and_hms(2025, 10, 1, 9, 0, 0).unwrap();
        assert_eq!(parse_datetime("2025-10-01T09:00:00Z").unwrap(), expected);
        assert_eq!(parse_datetime("2025-10-01 09:00:00").unwrap(), expected);
        assert_eq!(parse_datetime("2025-10-01 09:00:00+00:00").unwrap(), expected);
        assert_eq!(
            parse_datetime("2025-10-01").unwrap(),
            Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_datetime("yesterday").is_err());
        assert_eq!(parse_opt_datetime(Some("  ".into())).unwrap(), None);
    }

    #[test]
    fn list_columns_skip_blanks() {
        let set = split_list(Some("DIVORCE, ,PROBATE,".into()));
        assert_eq!(set.len(), 2);
        assert_eq!(join_list(&set).as_deref(), Some("DIVORCE,PROBATE"));
        assert_eq!(join_list(&BTreeSet::new()), None);
    }
}
