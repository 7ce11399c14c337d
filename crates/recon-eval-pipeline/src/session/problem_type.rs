//! Problem type trait for evaluation sessions.

use anyhow::Result;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// What to clear when input or config changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationPolicy {
    pub clear_state: bool,
    pub clear_output: bool,
    pub clear_exports: bool,
}

impl InvalidationPolicy {
    pub const KEEP_ALL: Self = Self {
        clear_state: false,
        clear_output: false,
        clear_exports: false,
    };

    /// Clear state and output, keep exports.
    pub const CLEAR_COMPUTED: Self = Self {
        clear_state: true,
        clear_output: true,
        clear_exports: false,
    };
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self::KEEP_ALL
    }
}

/// Interface an evaluation problem implements to live in an
/// [`EvaluationSession`](super::EvaluationSession).
///
/// Behaviour lives in step functions taking `&mut EvaluationSession<Self>`;
/// the trait only fixes the associated types, validation and export.
pub trait ProblemType: Sized + 'static {
    type Config: Clone + Default + Serialize + DeserializeOwned + Debug;
    type Input: Clone + Serialize + DeserializeOwned + Debug;
    /// Intermediate results. Fields that cannot be serialized are skipped and
    /// rebuilt by the steps that need them.
    type State: Clone + Default + Serialize + DeserializeOwned + Debug;
    type Output: Clone + Serialize + DeserializeOwned + Debug;
    type Export: Clone + Serialize + DeserializeOwned + Debug;

    /// Stable snake_case identifier stored in session files.
    fn name() -> &'static str;

    /// Sessions with a newer schema are rejected on load.
    fn schema_version() -> u32 {
        1
    }

    fn validate_input(_input: &Self::Input) -> Result<()> {
        Ok(())
    }

    fn validate_config(_config: &Self::Config) -> Result<()> {
        Ok(())
    }

    fn on_input_change() -> InvalidationPolicy {
        InvalidationPolicy::CLEAR_COMPUTED
    }

    fn on_config_change() -> InvalidationPolicy {
        InvalidationPolicy::KEEP_ALL
    }

    fn export(output: &Self::Output, config: &Self::Config) -> Result<Self::Export>;
}
