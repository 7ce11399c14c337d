//! Evaluation session framework.
//!
//! A session is a mutable state container parameterized over a
//! [`ProblemType`]. It stores configuration, input, intermediate state and a
//! single final output. Step functions mutate the session in place and record
//! an entry in its operation log.
//!
//! ```no_run
//! use recon_eval_pipeline::evaluation::{
//!     DatasetPaths, ReconstructionEvaluation, step_estimate_scale, step_load_dataset,
//!     step_match_cameras,
//! };
//! use recon_eval_pipeline::session::EvaluationSession;
//! # fn main() -> anyhow::Result<()> {
//! let mut session = EvaluationSession::<ReconstructionEvaluation>::new();
//! step_load_dataset(&mut session, DatasetPaths::new("out", "renders", "cube.obj"))?;
//! step_match_cameras(&mut session)?;
//! step_estimate_scale(&mut session)?;
//! # Ok(())
//! # }
//! ```

pub mod evalsession;
pub mod problem_type;
pub mod types;

pub use evalsession::EvaluationSession;
pub use problem_type::{InvalidationPolicy, ProblemType};
pub use types::{ExportRecord, LogEntry, SessionMetadata, current_timestamp};
