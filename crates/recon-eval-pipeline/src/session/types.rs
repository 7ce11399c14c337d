//! Session metadata, operation log and export records.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Metadata about an evaluation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Problem type identifier (from `ProblemType::name()`).
    pub problem_type: String,
    pub schema_version: u32,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    pub last_modified: u64,
    /// Usually the dataset name.
    pub description: Option<String>,
}

impl SessionMetadata {
    pub fn new(problem_type: impl Into<String>, schema_version: u32) -> Self {
        let now = current_timestamp();
        Self {
            problem_type: problem_type.into(),
            schema_version,
            created_at: now,
            last_modified: now,
            description: None,
        }
    }

    pub fn with_description(
        problem_type: impl Into<String>,
        schema_version: u32,
        description: impl Into<String>,
    ) -> Self {
        let mut meta = Self::new(problem_type, schema_version);
        meta.description = Some(description.into());
        meta
    }

    pub fn touch(&mut self) {
        self.last_modified = current_timestamp();
    }
}

/// One entry of the session's operation log.
///
/// An audit trail of which steps ran, were reloaded or were skipped, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: u64,
    /// Step name (e.g. "match_cameras", "estimate_scale").
    pub operation: String,
    pub success: bool,
    /// Notes on success, error message on failure.
    pub notes: Option<String>,
}

impl LogEntry {
    pub fn success(operation: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success: true,
            notes: None,
        }
    }

    pub fn success_with_notes(operation: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success: true,
            notes: Some(notes.into()),
        }
    }

    pub fn failure(operation: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success: false,
            notes: Some(error.into()),
        }
    }
}

/// An exported result with the time it was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord<E> {
    pub timestamp: u64,
    pub export: E,
    pub notes: Option<String>,
}

impl<E> ExportRecord<E> {
    pub fn new(export: E) -> Self {
        Self {
            timestamp: current_timestamp(),
            export,
            notes: None,
        }
    }
}

/// Current Unix timestamp in seconds; `0` if the clock is before the epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_new() {
        let meta = SessionMetadata::new("reconstruction_evaluation", 1);
        assert_eq!(meta.problem_type, "reconstruction_evaluation");
        assert_eq!(meta.schema_version, 1);
        assert!(meta.created_at > 0);
        assert_eq!(meta.created_at, meta.last_modified);
        assert!(meta.description.is_none());
    }

    #[test]
    fn metadata_touch_is_monotonic() {
        let mut meta = SessionMetadata::with_description("test", 1, "run_0001");
        let original = meta.last_modified;
        meta.touch();
        assert!(meta.last_modified >= original);
        assert_eq!(meta.description.as_deref(), Some("run_0001"));
    }

    #[test]
    fn log_entries() {
        let ok = LogEntry::success_with_notes("estimate_scale", "median 0.25");
        assert!(ok.success);
        assert_eq!(ok.notes.as_deref(), Some("median 0.25"));

        let failed = LogEntry::failure("fine_registration", "CloudCompare not configured");
        assert!(!failed.success);
        assert_eq!(failed.operation, "fine_registration");
    }

    #[test]
    fn export_record_serialization() {
        let record = ExportRecord::new(vec![0.25, 0.5]);
        let json = serde_json::to_string(&record).unwrap();
        let restored: ExportRecord<Vec<f64>> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.export, vec![0.25, 0.5]);
        assert!(restored.notes.is_none());
    }
}
