//! Evaluation pipeline for photogrammetric reconstructions.
//!
//! The crate ties the geometry of `recon-eval-core` and the alignment stages
//! of `recon-eval-align` to the files written by the renderer, the
//! reconstruction engine and CloudCompare.
//!
//! ## Session API
//!
//! An [`EvaluationSession`] stores configuration, the dataset paths, the
//! intermediate state of every step and the final report. Step functions
//! mutate the session in place and persist their results next to it, so a
//! repeated run reloads instead of recomputing.
//!
//! ```no_run
//! use recon_eval_pipeline::evaluation::{
//!     DatasetPaths, EvaluationConfig, ReconstructionEvaluation, run_evaluation,
//! };
//! use recon_eval_pipeline::session::EvaluationSession;
//! # fn main() -> anyhow::Result<()> {
//! let paths = DatasetPaths::new("out/run_0001", "renders/run_0001", "objects/cube.obj");
//! let mut session = EvaluationSession::<ReconstructionEvaluation>::new();
//! session.set_config(EvaluationConfig::default())?;
//! run_evaluation(&mut session, paths)?;
//!
//! let summary = session.export()?;
//! println!("reconstruction rate: {:?}", summary.reconstruction_rate);
//! # Ok(())
//! # }
//! ```

mod error;
pub mod evaluation;
pub mod external;
pub mod fine_registration;
pub mod io;
pub mod session;
pub mod study;

pub use error::{EvalError, classify};

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use crate::evaluation::{
    Availability, CameraEvalConfig, DatasetPaths, EvaluationConfig, EvaluationReport,
    EvaluationSummary, ReconstructionEvaluation, run_evaluation,
};
pub use crate::session::{
    EvaluationSession, ExportRecord, InvalidationPolicy, LogEntry, ProblemType, SessionMetadata,
};
pub use crate::study::{StudyAccumulator, StudyRow, run_parameter_study};
