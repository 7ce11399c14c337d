//! [`ProblemType`] implementation for reconstruction evaluation.

use std::path::{Path, PathBuf};

use anyhow::{Result, ensure};
use recon_eval_align::{GlobalRegistrationConfig, ScaleConfig};
use recon_eval_core::{Axis, MatchSummary, Real};
use serde::{Deserialize, Serialize};

use crate::fine_registration::{FineRegistration, FineRegistrationConfig};
use crate::io::{EVALUATION_DIR, RECONSTRUCTED_MESH_FILE, SceneParameters};
use crate::session::{InvalidationPolicy, ProblemType};

use super::metrics::{CameraMetrics, MeshMetrics};
use super::state::{EvaluationState, GlobalRegistrationReport, ScaleReport};

/// Evaluation of one reconstruction run against its synthetic ground truth.
#[derive(Debug)]
pub struct ReconstructionEvaluation;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Camera pose error thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraEvalConfig {
    /// Position outlier when `error > threshold · distance(camera, focus)`.
    pub threshold: Real,
    pub orientation_threshold_deg: Real,
}

impl Default for CameraEvalConfig {
    fn default() -> Self {
        Self {
            threshold: 0.005,
            orientation_threshold_deg: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub scale: ScaleConfig,
    pub global_registration: GlobalRegistrationConfig,
    pub fine_registration: FineRegistrationConfig,
    pub cameras: CameraEvalConfig,
    /// Recompute every stage instead of reloading persisted results.
    pub recompute: bool,
    /// Axis the object may translate along and rotate about.
    pub motion_axis: Axis,
    /// Write `CamerasExtrinsicsStatic.json` / `CamerasExtrinsicsDynamic.json`.
    pub export_camera_extrinsics: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            scale: ScaleConfig::default(),
            global_registration: GlobalRegistrationConfig::default(),
            fine_registration: FineRegistrationConfig::default(),
            cameras: CameraEvalConfig::default(),
            recompute: false,
            motion_axis: Axis::Z,
            export_camera_extrinsics: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Input
// ─────────────────────────────────────────────────────────────────────────────

/// Where one dataset lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetPaths {
    /// Reconstruction engine output folder.
    pub reconstruction_dir: PathBuf,
    /// Rendered images plus the renderer's tables and parameters.
    pub image_dir: PathBuf,
    /// Ground-truth mesh.
    pub object_path: PathBuf,
    /// Where results are written; `<reconstruction_dir>/Evaluation` by default.
    pub evaluation_dir: PathBuf,
}

impl DatasetPaths {
    pub fn new(
        reconstruction_dir: impl Into<PathBuf>,
        image_dir: impl Into<PathBuf>,
        object_path: impl Into<PathBuf>,
    ) -> Self {
        let reconstruction_dir = reconstruction_dir.into();
        Self {
            evaluation_dir: reconstruction_dir.join(EVALUATION_DIR),
            reconstruction_dir,
            image_dir: image_dir.into(),
            object_path: object_path.into(),
        }
    }

    pub fn with_evaluation_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.evaluation_dir = dir.into();
        self
    }

    /// Mesh published by the reconstruction engine.
    pub fn reconstructed_mesh(&self) -> PathBuf {
        self.reconstruction_dir.join(RECONSTRUCTED_MESH_FILE)
    }

    pub fn in_evaluation_dir(&self, file: &str) -> PathBuf {
        self.evaluation_dir.join(file)
    }

    /// Dataset name for logs: the reconstruction folder's name.
    pub fn dataset_name(&self) -> String {
        folder_name(&self.reconstruction_dir)
    }
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationInput {
    pub paths: DatasetPaths,
    pub scene: SceneParameters,
}

impl EvaluationInput {
    pub fn dataset(&self) -> String {
        self.scene
            .name_or(&self.paths.dataset_name())
            .to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// A result that may be missing for a stated reason.
///
/// Stands in for results of skipped stages; never replaced by zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Availability<T> {
    Available(T),
    Unavailable { reason: String },
}

impl<T> Availability<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Available(v) => Some(v),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Available(_) => None,
            Self::Unavailable { reason } => Some(reason),
        }
    }
}

impl<T> From<Option<T>> for Availability<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or_else(|| Self::unavailable("not computed"), Self::Available)
    }
}

/// Everything one evaluation produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub dataset: String,
    pub matching: MatchSummary,
    pub scale: ScaleReport,
    pub global_registration: Availability<GlobalRegistrationReport>,
    pub fine_registration: Availability<FineRegistration>,
    pub cameras: Availability<CameraMetrics>,
    pub mesh: Availability<MeshMetrics>,
}

/// One flat row per dataset; unavailable values become empty cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub dataset: String,
    pub reference_cameras: usize,
    pub reconstructed_cameras: usize,
    pub matched_cameras: usize,
    pub reconstruction_rate: Option<Real>,
    pub scale_median: Real,
    pub scale_mean: Real,
    pub scale_std: Real,
    pub scale_inliers: usize,
    pub scale_outliers: usize,
    pub global_fitness: Option<Real>,
    pub global_rmse: Option<Real>,
    pub c2m_mean_before_icp: Option<Real>,
    pub c2m_std_before_icp: Option<Real>,
    pub c2m_mean_after_icp: Option<Real>,
    pub c2m_std_after_icp: Option<Real>,
    pub position_error_mean: Option<Real>,
    pub position_error_median: Option<Real>,
    pub relative_position_error_mean: Option<Real>,
    pub relative_position_error_median: Option<Real>,
    pub orientation_error_mean_deg: Option<Real>,
    pub orientation_error_median_deg: Option<Real>,
    pub position_outliers: Option<usize>,
    pub orientation_outliers: Option<usize>,
    pub volume_rel_error: Option<Real>,
    pub surface_area_rel_error: Option<Real>,
    pub sauter_diameter_rel_error: Option<Real>,
    pub specific_surface_rel_error: Option<Real>,
    pub sphericity_rel_error: Option<Real>,
}

impl From<&EvaluationReport> for EvaluationSummary {
    fn from(report: &EvaluationReport) -> Self {
        let estimate = &report.scale.estimate;
        let global = report.global_registration.get();
        let fine = report.fine_registration.get();
        let cams = report.cameras.get();
        let mesh = report.mesh.get().map(MeshMetrics::best);
        Self {
            dataset: report.dataset.clone(),
            reference_cameras: report.matching.reference,
            reconstructed_cameras: report.matching.reconstructed,
            matched_cameras: report.matching.matched,
            reconstruction_rate: report.matching.reconstruction_rate(),
            scale_median: estimate.median,
            scale_mean: estimate.mean,
            scale_std: estimate.std,
            scale_inliers: estimate.inliers,
            scale_outliers: estimate.outliers,
            global_fitness: global.map(|g| g.registration.fitness),
            global_rmse: global.map(|g| g.registration.inlier_rmse),
            c2m_mean_before_icp: fine.map(|f| f.before.mean),
            c2m_std_before_icp: fine.map(|f| f.before.std),
            c2m_mean_after_icp: fine.map(|f| f.after.mean),
            c2m_std_after_icp: fine.map(|f| f.after.std),
            position_error_mean: cams.map(|c| c.position.mean),
            position_error_median: cams.map(|c| c.position.median),
            relative_position_error_mean: cams.map(|c| c.relative_position.mean),
            relative_position_error_median: cams.map(|c| c.relative_position.median),
            orientation_error_mean_deg: cams.map(|c| c.orientation_deg.mean),
            orientation_error_median_deg: cams.map(|c| c.orientation_deg.median),
            position_outliers: cams.map(|c| c.position_outliers),
            orientation_outliers: cams.map(|c| c.orientation_outliers),
            volume_rel_error: mesh.map(|m| m.relative_error.volume),
            surface_area_rel_error: mesh.map(|m| m.relative_error.surface_area),
            sauter_diameter_rel_error: mesh.map(|m| m.relative_error.sauter_diameter),
            specific_surface_rel_error: mesh.map(|m| m.relative_error.specific_surface),
            sphericity_rel_error: mesh.map(|m| m.relative_error.sphericity),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProblemType
// ─────────────────────────────────────────────────────────────────────────────

impl ProblemType for ReconstructionEvaluation {
    type Config = EvaluationConfig;
    type Input = EvaluationInput;
    type State = EvaluationState;
    type Output = EvaluationReport;
    type Export = EvaluationSummary;

    fn name() -> &'static str {
        "reconstruction_evaluation"
    }

    fn validate_input(input: &Self::Input) -> Result<()> {
        let paths = &input.paths;
        ensure!(
            !paths.evaluation_dir.as_os_str().is_empty(),
            "evaluation directory must not be empty"
        );
        ensure!(
            !paths.object_path.as_os_str().is_empty(),
            "ground-truth object path must not be empty"
        );
        Ok(())
    }

    fn validate_config(config: &Self::Config) -> Result<()> {
        ensure!(
            config.scale.threshold >= 0.0,
            "scale threshold must be non-negative"
        );
        ensure!(
            config.cameras.threshold > 0.0,
            "camera threshold must be positive"
        );
        ensure!(
            config.cameras.orientation_threshold_deg > 0.0,
            "orientation threshold must be positive"
        );
        ensure!(
            config.global_registration.voxel_size > 0.0,
            "voxel size must be positive"
        );
        ensure!(
            config.global_registration.sample_points > 0,
            "sample_points must be positive"
        );
        Ok(())
    }

    fn on_input_change() -> InvalidationPolicy {
        InvalidationPolicy::CLEAR_COMPUTED
    }

    /// Every stage depends on the config, motion compensation included.
    fn on_config_change() -> InvalidationPolicy {
        InvalidationPolicy::CLEAR_COMPUTED
    }

    fn export(output: &Self::Output, _config: &Self::Config) -> Result<Self::Export> {
        Ok(EvaluationSummary::from(output))
    }
}
