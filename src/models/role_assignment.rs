use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Matching strategy a role assignment uses against a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantType {
    Standard,
    Specific,
    Challenged,
    Excluded,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::Standard => "STANDARD",
            GrantType::Specific => "SPECIFIC",
            GrantType::Challenged => "CHALLENGED",
            GrantType::Excluded => "EXCLUDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "STANDARD" => Some(GrantType::Standard),
            "SPECIFIC" => Some(GrantType::Specific),
            "CHALLENGED" => Some(GrantType::Challenged),
            "EXCLUDED" => Some(GrantType::Excluded),
            _ => None,
        }
    }
}

/// Sensitivity tier. Declaration order is the access ordering:
/// PUBLIC < PRIVATE < RESTRICTED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Public,
    Private,
    Restricted,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Public => "PUBLIC",
            Classification::Private => "PRIVATE",
            Classification::Restricted => "RESTRICTED",
        }
    }

    /// Numeric rank stored in the task tables.
    pub fn rank(&self) -> i64 {
        match self {
            Classification::Public => 0,
            Classification::Private => 1,
            Classification::Restricted => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Classification::Public),
            1 => Some(Classification::Private),
            2 => Some(Classification::Restricted),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PUBLIC" => Some(Classification::Public),
            "PRIVATE" => Some(Classification::Private),
            "RESTRICTED" => Some(Classification::Restricted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleCategory {
    Judicial,
    LegalOperations,
    Admin,
    Ctsc,
}

impl RoleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleCategory::Judicial => "JUDICIAL",
            RoleCategory::LegalOperations => "LEGAL_OPERATIONS",
            RoleCategory::Admin => "ADMIN",
            RoleCategory::Ctsc => "CTSC",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "JUDICIAL" => Some(RoleCategory::Judicial),
            "LEGAL_OPERATIONS" => Some(RoleCategory::LegalOperations),
            "ADMIN" => Some(RoleCategory::Admin),
            "CTSC" => Some(RoleCategory::Ctsc),
            _ => None,
        }
    }
}

/// Typed attribute set carried by a role assignment. Which fields are
/// required depends on the grant type; see `authz::grant`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_location: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub work_types: BTreeSet<String>,
}

/// One grant held by a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    #[serde(default)]
    pub id: String,
    pub actor_id: String,
    pub role_name: String,
    pub role_category: RoleCategory,
    pub grant_type: GrantType,
    pub classification: Classification,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub authorisations: BTreeSet<String>,
    #[serde(default)]
    pub attributes: RoleAttributes,
}

impl RoleAssignment {
    pub fn new(
        actor_id: impl Into<String>,
        role_name: impl Into<String>,
        grant_type: GrantType,
        classification: Classification,
    ) -> Self {
        Self {
            id: String::new(),
            actor_id: actor_id.into(),
            role_name: role_name.into(),
            role_category: RoleCategory::LegalOperations,
            grant_type,
            classification,
            valid_from: None,
            valid_to: None,
            authorisations: BTreeSet::new(),
            attributes: RoleAttributes::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_category(mut self, category: RoleCategory) -> Self {
        self.role_category = category;
        self
    }

    pub fn with_validity(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.valid_from = from;
        self.valid_to = to;
        self
    }

    pub fn with_authorisations<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authorisations = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_jurisdiction(mut self, value: impl Into<String>) -> Self {
        self.attributes.jurisdiction = Some(value.into());
        self
    }

    pub fn with_case_type(mut self, value: impl Into<String>) -> Self {
        self.attributes.case_type = Some(value.into());
        self
    }

    pub fn with_case_id(mut self, value: impl Into<String>) -> Self {
        self.attributes.case_id = Some(value.into());
        self
    }

    pub fn with_region(mut self, value: impl Into<String>) -> Self {
        self.attributes.region = Some(value.into());
        self
    }

    pub fn with_base_location(mut self, value: impl Into<String>) -> Self {
        self.attributes.base_location = Some(value.into());
        self
    }

    pub fn with_work_types<I, S>(mut self, work_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.work_types = work_types.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `now` lies inside the validity window. A missing bound is
    /// unbounded on that side, so an assignment with neither bound is active.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if let Some(from) = self.valid_from {
            if now < from {
                return false;
            }
        }
        if let Some(to) = self.valid_to {
            if now > to {
                return false;
            }
        }
        true
    }

    pub fn is_excluded(&self) -> bool {
        self.grant_type == GrantType::Excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn classification_orders_public_private_restricted() {
        assert!(Classification::Public < Classification::Private);
        assert!(Classification::Private < Classification::Restricted);
        assert_eq!(Classification::from_rank(Classification::Restricted.rank()), Some(Classification::Restricted));
    }

    #[test]
    fn validity_window_is_inclusive_and_open_ended() {
        let now = Utc::now();
        let base = RoleAssignment::new("a1", "tribunal-caseworker", GrantType::Standard, Classification::Public);

        assert!(base.clone().with_validity(None, None).is_active_at(now));
        assert!(base.clone().with_validity(Some(now), Some(now)).is_active_at(now));
        assert!(base.clone().with_validity(Some(now - Duration::days(1)), None).is_active_at(now));
        assert!(!base.clone().with_validity(Some(now + Duration::hours(1)), None).is_active_at(now));
        assert!(!base.with_validity(None, Some(now - Duration::seconds(1))).is_active_at(now));
    }

    #[test]
    fn deserializes_wire_names() {
        let ra: RoleAssignment = serde_json::from_value(serde_json::json!({
            "actor_id": "judge-1",
            "role_name": "judge",
            "role_category": "JUDICIAL",
            "grant_type": "SPECIFIC",
            "classification": "RESTRICTED",
            "authorisations": ["373"],
            "attributes": { "jurisdiction": "IA", "case_id": "1623278362431003" }
        }))
        .expect("deserialize");

        assert_eq!(ra.grant_type, GrantType::Specific);
        assert_eq!(ra.role_category, RoleCategory::Judicial);
        assert_eq!(ra.attributes.case_id.as_deref(), Some("1623278362431003"));
        assert!(ra.valid_from.is_none());
        assert!(ra.id.is_empty());
    }
}
