//! Evaluation session container with mutable state.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use super::problem_type::{InvalidationPolicy, ProblemType};
use super::types::{ExportRecord, LogEntry, SessionMetadata};

/// Mutable state container for one evaluation.
///
/// - Only one final output is stored.
/// - Input is embedded in the session.
/// - Input and config changes clear what the problem's invalidation policies
///   name.
/// - Every export is kept in [`Self::exports`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "P: ProblemType")]
pub struct EvaluationSession<P: ProblemType> {
    pub metadata: SessionMetadata,
    /// Always present, defaults unless set.
    pub config: P::Config,
    input: Option<P::Input>,
    pub state: P::State,
    output: Option<P::Output>,
    pub exports: Vec<ExportRecord<P::Export>>,
    /// Operation log.
    pub log: Vec<LogEntry>,
}

impl<P: ProblemType> EvaluationSession<P> {
    // ─────────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────────

    pub fn new() -> Self {
        Self {
            metadata: SessionMetadata::new(P::name(), P::schema_version()),
            config: P::Config::default(),
            input: None,
            state: P::State::default(),
            output: None,
            exports: Vec::new(),
            log: Vec::new(),
        }
    }

    pub fn with_description(description: impl Into<String>) -> Self {
        let mut session = Self::new();
        session.metadata =
            SessionMetadata::with_description(P::name(), P::schema_version(), description);
        session
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Input
    // ─────────────────────────────────────────────────────────────────────────

    /// Set input, applying validation and the invalidation policy.
    pub fn set_input(&mut self, input: P::Input) -> Result<()> {
        P::validate_input(&input)?;
        self.apply_policy(P::on_input_change());
        self.input = Some(input);
        self.metadata.touch();
        Ok(())
    }

    pub fn input(&self) -> Option<&P::Input> {
        self.input.as_ref()
    }

    pub fn require_input(&self) -> Result<&P::Input> {
        self.input
            .as_ref()
            .ok_or_else(|| anyhow!("input not set"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────────

    /// Set config, applying validation and the invalidation policy.
    pub fn set_config(&mut self, config: P::Config) -> Result<()> {
        P::validate_config(&config)?;
        self.apply_policy(P::on_config_change());
        self.config = config;
        self.metadata.touch();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Output
    // ─────────────────────────────────────────────────────────────────────────

    pub fn output(&self) -> Option<&P::Output> {
        self.output.as_ref()
    }

    pub fn require_output(&self) -> Result<&P::Output> {
        self.output
            .as_ref()
            .ok_or_else(|| anyhow!("output not computed"))
    }

    pub fn set_output(&mut self, output: P::Output) {
        self.output = Some(output);
        self.metadata.touch();
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Export the current output and record it.
    pub fn export(&mut self) -> Result<P::Export> {
        let export = P::export(self.require_output()?, &self.config)?;
        self.exports.push(ExportRecord::new(export.clone()));
        self.metadata.touch();
        Ok(export)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    pub fn log_success(&mut self, operation: impl Into<String>) {
        self.log.push(LogEntry::success(operation));
        self.metadata.touch();
    }

    pub fn log_success_with_notes(
        &mut self,
        operation: impl Into<String>,
        notes: impl Into<String>,
    ) {
        self.log.push(LogEntry::success_with_notes(operation, notes));
        self.metadata.touch();
    }

    pub fn log_failure(&mut self, operation: impl Into<String>, error: impl Into<String>) {
        self.log.push(LogEntry::failure(operation, error));
        self.metadata.touch();
    }

    fn apply_policy(&mut self, policy: InvalidationPolicy) {
        if policy.clear_state {
            self.state = P::State::default();
        }
        if policy.clear_output {
            self.output = None;
        }
        if policy.clear_exports {
            self.exports.clear();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Serialization
    // ─────────────────────────────────────────────────────────────────────────

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }

    /// Deserialize, rejecting other problem types and newer schemas.
    pub fn from_json(json: &str) -> Result<Self> {
        let session: Self = serde_json::from_str(json)?;
        if session.metadata.problem_type != P::name() {
            bail!(
                "session belongs to problem type {:?}, expected {:?}",
                session.metadata.problem_type,
                P::name()
            );
        }
        if session.metadata.schema_version > P::schema_version() {
            bail!(
                "session schema version {} is newer than supported version {}",
                session.metadata.schema_version,
                P::schema_version()
            );
        }
        Ok(session)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)
            .with_context(|| format!("failed to write session {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read session {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid session {}", path.display()))
    }
}

impl<P: ProblemType> Default for EvaluationSession<P> {
    fn default() -> Self {
        Self::new()
    }
}
