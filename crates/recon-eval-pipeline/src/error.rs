use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy of an evaluation run.
///
/// Steps return `anyhow::Error`; these variants are wrapped inside so the
/// orchestrator and callers can `downcast_ref::<EvalError>()` to decide between
/// skipping and aborting.
#[derive(Debug, Error)]
pub enum EvalError {
    /// An expected file or folder is absent.
    #[error("missing prerequisite {what}: {}", path.display())]
    MissingPrerequisite { what: &'static str, path: PathBuf },
    /// No valid distance ratio survived; never replaced by a default factor.
    #[error("scale undetermined for {dataset}: {reason}")]
    ScaleUndetermined { dataset: String, reason: String },
    /// A collaborator exited non-zero or left expected outputs unwritten.
    #[error("{tool} failed ({}), see {}", exit_status(*exit_code), log.display())]
    ExternalToolFailure {
        tool: String,
        exit_code: Option<i32>,
        log: PathBuf,
    },
    /// A correspondence index points outside its arena.
    #[error("malformed correspondence: {0}")]
    MalformedCorrespondence(String),
}

impl EvalError {
    pub fn missing(what: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::MissingPrerequisite {
            what,
            path: path.into(),
        }
    }

    /// Whether the orchestrator may continue in degraded mode.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::MissingPrerequisite { .. } | Self::ExternalToolFailure { .. }
        )
    }
}

fn exit_status(code: Option<i32>) -> String {
    code.map_or_else(|| "no exit code".to_string(), |c| format!("exit code {c}"))
}

/// Taxonomy variant carried by `err`, if any.
pub fn classify(err: &anyhow::Error) -> Option<&EvalError> {
    err.chain().find_map(|e| e.downcast_ref::<EvalError>())
}
