use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::row_parsers::{self, join_list};
use crate::errors::{AppError, AppResult};
use crate::models::RoleAssignment;

/// Where a subject's role assignments come from. The HTTP layer only asks
/// this trait, so a remote role service can replace the local table.
#[async_trait]
pub trait RoleAssignmentSource: Send + Sync {
    async fn role_assignments(&self, actor_id: &str) -> AppResult<Vec<RoleAssignment>>;

    /// Every assignment, across actors, holding one of `role_names`. Feeds
    /// the auto-assignment candidate pool.
    async fn holders_of(&self, role_names: &[String]) -> AppResult<Vec<RoleAssignment>>;
}

/// Role assignments kept in the local `role_assignments` table.
#[derive(Debug, Clone)]
pub struct SqliteRoleAssignmentSource {
    pool: SqlitePool,
}

impl SqliteRoleAssignmentSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces one assignment. An empty id gets a fresh uuid.
    pub async fn insert(&self, assignment: &RoleAssignment) -> AppResult<String> {
        let id = if assignment.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            assignment.id.clone()
        };
        let attrs = &assignment.attributes;

        sqlx::query(
            "INSERT OR REPLACE INTO role_assignments (id, actor_id, role_name, role_category, grant_type, \
             classification, valid_from, valid_to, authorisations, jurisdiction, case_type, case_id, region, \
             base_location, work_types) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&assignment.actor_id)
        .bind(&assignment.role_name)
        .bind(assignment.role_category.as_str())
        .bind(assignment.grant_type.as_str())
        .bind(assignment.classification.as_str())
        .bind(assignment.valid_from.map(|d| d.to_rfc3339()))
        .bind(assignment.valid_to.map(|d| d.to_rfc3339()))
        .bind(join_list(&assignment.authorisations))
        .bind(&attrs.jurisdiction)
        .bind(&attrs.case_type)
        .bind(&attrs.case_id)
        .bind(&attrs.region)
        .bind(&attrs.base_location)
        .bind(join_list(&attrs.work_types))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}

#[async_trait]
impl RoleAssignmentSource for SqliteRoleAssignmentSource {
    async fn role_assignments(&self, actor_id: &str) -> AppResult<Vec<RoleAssignment>> {
        let rows = sqlx::query(
            "SELECT id, actor_id, role_name, role_category, grant_type, classification, valid_from, valid_to, \
             authorisations, jurisdiction, case_type, case_id, region, base_location, work_types \
             FROM role_assignments WHERE actor_id = ? ORDER BY id",
        )
        .bind(actor_id)
        .fetch_all(&self.pool)
        .await?;

        let mut parsed = Vec::with_capacity(rows.len());
        for row in rows {
            parsed.push(row_parsers::role_assignment_from_row(&row)?);
        }

        tracing::debug!(actor_id, count = parsed.len(), "loaded role assignments");
        Ok(parsed)
    }

    async fn holders_of(&self, role_names: &[String]) -> AppResult<Vec<RoleAssignment>> {
        if role_names.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, actor_id, role_name, role_category, grant_type, classification, valid_from, valid_to, \
             authorisations, jurisdiction, case_type, case_id, region, base_location, work_types \
             FROM role_assignments WHERE role_name IN ({}) ORDER BY id",
            vec!["?"; role_names.len()].join(", ")
        );
        let mut query = sqlx::query(&sql);
        for name in role_names {
            query = query.bind(name);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut parsed = Vec::with_capacity(rows.len());
        for row in rows {
            parsed.push(row_parsers::role_assignment_from_row(&row)?);
        }
        Ok(parsed)
    }
}

/// Fixed in-memory assignments, keyed by actor.
#[derive(Debug, Clone, Default)]
pub struct StaticRoleAssignmentSource {
    assignments: Vec<RoleAssignment>,
}

impl StaticRoleAssignmentSource {
    pub fn new(assignments: Vec<RoleAssignment>) -> Self {
        Self { assignments }
    }
}

#[async_trait]
impl RoleAssignmentSource for StaticRoleAssignmentSource {
    async fn role_assignments(&self, actor_id: &str) -> AppResult<Vec<RoleAssignment>> {
        if actor_id.is_empty() {
            return Err(AppError::bad_request("actor id must not be empty"));
        }
        Ok(self
            .assignments
            .iter()
            .filter(|ra| ra.actor_id == actor_id)
            .cloned()
            .collect())
    }

    async fn holders_of(&self, role_names: &[String]) -> AppResult<Vec<RoleAssignment>> {
        Ok(self
            .assignments
            .iter()
            .filter(|ra| role_names.contains(&ra.role_name))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, GrantType, RoleCategory};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    #[tokio::test]
    async fn sqlite_source_round_trips_list_columns() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("ras.db").display());
        let pool = crate::db::init(&url).await.unwrap();
        let source = SqliteRoleAssignmentSource::new(pool);

        let ra = RoleAssignment::new("judge-1", "hearing-judge", GrantType::Standard, Classification::Restricted)
            .with_id("ra-1")
            .with_category(RoleCategory::Judicial)
            .with_validity(Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()), None)
            .with_authorisations(["DIVORCE", "PROBATE"])
            .with_jurisdiction("IA")
            .with_work_types(["hearing_work", "decision_making_work"]);
        source.insert(&ra).await.unwrap();
        source
            .insert(&RoleAssignment::new("someone-else", "r", GrantType::Standard, Classification::Public))
            .await
            .unwrap();

        let loaded = source.role_assignments("judge-1").await.unwrap();
        assert_eq!(loaded, vec![ra.clone()]);

        let holders = source.holders_of(&["hearing-judge".to_string()]).await.unwrap();
        assert_eq!(holders, vec![ra]);
        assert!(source.holders_of(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn static_source_filters_by_actor() {
        let source = StaticRoleAssignmentSource::new(vec![
            RoleAssignment::new("a", "r1", GrantType::Standard, Classification::Public),
            RoleAssignment::new("b", "r2", GrantType::Standard, Classification::Public),
        ]);
        let loaded = source.role_assignments("b").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].role_name, "r2");
        assert!(source.role_assignments("").await.is_err());
        assert_eq!(source.holders_of(&["r1".to_string()]).await.unwrap().len(), 1);
    }
}
