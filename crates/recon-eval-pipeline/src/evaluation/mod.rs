//! Evaluation of one reconstruction against its synthetic ground truth.
//!
//! Steps run in order: load the dataset, match cameras, estimate scale,
//! register meshes (coarse, then fine), register cameras, compute camera and
//! mesh metrics, and write the report.

mod metrics;
mod problem;
mod state;
mod steps;

pub use metrics::{
    CameraError, CameraMetrics, MeshComparison, MeshMetrics, MorphologyError, camera_metrics,
};
pub use problem::{
    Availability, CameraEvalConfig, DatasetPaths, EvaluationConfig, EvaluationInput,
    EvaluationReport, EvaluationSummary, ReconstructionEvaluation,
};
pub use state::{EvaluationState, GlobalRegistrationReport, LoadedScene, OutlierPair, ScaleReport};
pub use steps::{
    run_evaluation, step_camera_metrics, step_estimate_scale, step_finalize,
    step_fine_registration, step_global_registration, step_load_dataset, step_match_cameras,
    step_mesh_metrics, step_register_cameras,
};
