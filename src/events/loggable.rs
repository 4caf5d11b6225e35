use serde::{Deserialize, Serialize};

/// Severity levels for access log entries.
/// Controls retention policies and log filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Security-relevant events: long-term retention, never auto-delete
    Critical,
    /// Routine task transitions (default)
    #[default]
    Important,
    /// Noise events: aggressively trimmed
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Trait for records that can be written to the access log.
pub trait Loggable: Serialize + Send + Sync {
    /// Prefix of the event name, e.g. "task" in "task.claim".
    fn entity_type() -> &'static str;

    /// Identifier of the thing the event is about.
    fn subject_id(&self) -> String;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    /// Denials are always kept.
    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "access_denied" => Severity::Critical,
            _ => self.severity(),
        }
    }
}
