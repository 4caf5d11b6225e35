use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::AppError;
use crate::models::permission::PermissionType;
use crate::models::role_assignment::Classification;

/// Lifecycle state reported by the workflow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Unconfigured,
    Unassigned,
    Assigned,
    Completed,
    Cancelled,
    Terminated,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Unconfigured => "UNCONFIGURED",
            TaskState::Unassigned => "UNASSIGNED",
            TaskState::Assigned => "ASSIGNED",
            TaskState::Completed => "COMPLETED",
            TaskState::Cancelled => "CANCELLED",
            TaskState::Terminated => "TERMINATED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UNCONFIGURED" => Some(TaskState::Unconfigured),
            "UNASSIGNED" => Some(TaskState::Unassigned),
            "ASSIGNED" => Some(TaskState::Assigned),
            "COMPLETED" => Some(TaskState::Completed),
            "CANCELLED" => Some(TaskState::Cancelled),
            "TERMINATED" => Some(TaskState::Terminated),
            _ => None,
        }
    }
}

/// The identifying attributes of one task that role assignments are matched
/// against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttributes {
    pub task_id: String,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub case_type: Option<String>,
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub work_type: Option<String>,
    /// The task's own marking. Access is gated by the classification of the
    /// matching profile, never by this value.
    pub classification: Classification,
    pub state: TaskState,
    #[serde(default)]
    pub assignee: Option<String>,
}

impl TaskAttributes {
    pub fn new(task_id: impl Into<String>, classification: Classification) -> Self {
        Self {
            task_id: task_id.into(),
            jurisdiction: None,
            case_type: None,
            case_id: None,
            region: None,
            location: None,
            work_type: None,
            classification,
            state: TaskState::Unassigned,
            assignee: None,
        }
    }

    pub fn with_jurisdiction(mut self, value: impl Into<String>) -> Self {
        self.jurisdiction = Some(value.into());
        self
    }

    pub fn with_case_type(mut self, value: impl Into<String>) -> Self {
        self.case_type = Some(value.into());
        self
    }

    pub fn with_case_id(mut self, value: impl Into<String>) -> Self {
        self.case_id = Some(value.into());
        self
    }

    pub fn with_region(mut self, value: impl Into<String>) -> Self {
        self.region = Some(value.into());
        self
    }

    pub fn with_location(mut self, value: impl Into<String>) -> Self {
        self.location = Some(value.into());
        self
    }

    pub fn with_work_type(mut self, value: impl Into<String>) -> Self {
        self.work_type = Some(value.into());
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self.state = TaskState::Assigned;
        self
    }
}

/// Per-role authorization metadata attached to a task. A task carries at
/// most one profile per role name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAccessProfile {
    pub role_name: String,
    #[serde(default)]
    pub required_authorisations: BTreeSet<String>,
    pub classification: Classification,
    pub assignment_priority: i32,
    #[serde(default)]
    pub auto_assignable: bool,
    #[serde(default)]
    pub granted_permissions: BTreeSet<PermissionType>,
}

impl TaskAccessProfile {
    pub fn new(role_name: impl Into<String>, classification: Classification) -> Self {
        Self {
            role_name: role_name.into(),
            required_authorisations: BTreeSet::new(),
            classification,
            assignment_priority: 1,
            auto_assignable: false,
            granted_permissions: BTreeSet::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.assignment_priority = priority;
        self
    }

    pub fn auto_assignable(mut self, value: bool) -> Self {
        self.auto_assignable = value;
        self
    }

    pub fn with_required_authorisations<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_authorisations = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_permissions<I: IntoIterator<Item = PermissionType>>(mut self, permissions: I) -> Self {
        self.granted_permissions = permissions.into_iter().collect();
        self
    }
}

/// Stored task row as returned by the task endpoints and search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub state: TaskState,
    pub assignee: Option<String>,
    pub jurisdiction: Option<String>,
    pub case_type: Option<String>,
    pub case_id: Option<String>,
    pub region: Option<String>,
    pub location: Option<String>,
    pub work_type: Option<String>,
    #[schema(value_type = String, example = "PUBLIC")]
    pub classification: Classification,
    pub major_priority: i64,
    pub minor_priority: i64,
    #[schema(format = DateTime, example = "2025-10-01T09:00:00Z")]
    pub priority_date: Option<DateTime<Utc>>,
    #[schema(format = DateTime, example = "2025-10-15T17:00:00Z")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn attributes(&self) -> TaskAttributes {
        TaskAttributes {
            task_id: self.id.clone(),
            jurisdiction: self.jurisdiction.clone(),
            case_type: self.case_type.clone(),
            case_id: self.case_id.clone(),
            region: self.region.clone(),
            location: self.location.clone(),
            work_type: self.work_type.clone(),
            classification: self.classification,
            state: self.state,
            assignee: self.assignee.clone(),
        }
    }
}

/// Raw row shape; enum columns are still text/integers here.
#[derive(Debug, Clone)]
pub struct DbTask {
    pub id: String,
    pub name: String,
    pub state: String,
    pub assignee: Option<String>,
    pub jurisdiction: Option<String>,
    pub case_type: Option<String>,
    pub case_id: Option<String>,
    pub region: Option<String>,
    pub location: Option<String>,
    pub work_type: Option<String>,
    pub classification: i64,
    pub major_priority: i64,
    pub minor_priority: i64,
    pub priority_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbTask> for Task {
    type Error = AppError;

    fn try_from(value: DbTask) -> Result<Self, Self::Error> {
        let state = TaskState::parse(&value.state)
            .ok_or_else(|| AppError::internal(format!("unknown task state: {}", value.state)))?;
        let classification = Classification::from_rank(value.classification).ok_or_else(|| {
            AppError::internal(format!("unknown classification rank: {}", value.classification))
        })?;

        Ok(Task {
            id: value.id,
            name: value.name,
            state,
            assignee: value.assignee,
            jurisdiction: value.jurisdiction,
            case_type: value.case_type,
            case_id: value.case_id,
            region: value.region,
            location: value.location,
            work_type: value.work_type,
            classification,
            major_priority: value.major_priority,
            minor_priority: value.minor_priority,
            priority_date: value.priority_date,
            due_date: value.due_date,
            created_at: value.created_at,
        })
    }
}
