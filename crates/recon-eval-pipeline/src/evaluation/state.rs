//! Intermediate state of a reconstruction evaluation.
//!
//! Pose entities carry lazily computed transform caches and are rebuilt from
//! the dataset files, so they are not part of the serialized state.

use anyhow::{Result, anyhow};
use recon_eval_align::{GlobalRegistration, GlobalRegistrationConfig, ScaleConfig, ScaleEstimate};
use recon_eval_core::{
    CameraReconstructed, CameraReference, Mat4, MatchSummary, ObjectTrajectory, Real,
};
use serde::{Deserialize, Serialize};

use crate::fine_registration::FineRegistration;

use super::metrics::{CameraMetrics, MeshMetrics};
use super::problem::Availability;

/// Cameras and object motion of the loaded dataset.
#[derive(Debug, Clone)]
pub struct LoadedScene {
    pub references: Vec<CameraReference>,
    pub reconstructed: Vec<CameraReconstructed>,
    /// `None` for a static scene.
    pub trajectory: Option<ObjectTrajectory>,
}

/// One rejected distance measurement, by image name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierPair {
    pub images: (String, String),
    pub timestep: u32,
    pub reference: Real,
    pub reconstructed: Real,
}

/// Persisted result of scale estimation (`ScaleReport.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleReport {
    pub estimate: ScaleEstimate,
    pub config: ScaleConfig,
    /// Distance measurements before outlier rejection.
    pub measurements: usize,
    /// Reference cameras seen only in rejected measurements.
    pub outlier_images: Vec<String>,
    pub outlier_pairs: Vec<OutlierPair>,
}

impl ScaleReport {
    pub fn new(
        estimate: ScaleEstimate,
        config: ScaleConfig,
        references: &[CameraReference],
    ) -> Self {
        let image = |i: usize| {
            references
                .get(i)
                .map_or_else(|| format!("#{i}"), |c| c.image.clone())
        };
        Self {
            measurements: estimate.inliers + estimate.outliers,
            outlier_images: estimate.outlier_cameras.iter().map(|&i| image(i)).collect(),
            outlier_pairs: estimate
                .outlier_measurements
                .iter()
                .map(|m| OutlierPair {
                    images: (image(m.cameras.0), image(m.cameras.1)),
                    timestep: m.timestep,
                    reference: m.reference,
                    reconstructed: m.reconstructed,
                })
                .collect(),
            estimate,
            config,
        }
    }

    pub fn factor(&self) -> Real {
        self.estimate.factor()
    }
}

/// Persisted result of coarse registration (`GlobalRegistration.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalRegistrationReport {
    /// Settings the registration was computed with.
    pub config: GlobalRegistrationConfig,
    /// Scale factor the registration was computed with.
    pub scale: Real,
    pub registration: GlobalRegistration,
}

impl GlobalRegistrationReport {
    /// Whether this result holds for `config` at `scale`.
    pub fn matches(&self, config: &GlobalRegistrationConfig, scale: Real) -> bool {
        self.config == *config && (self.scale - scale).abs() <= 1e-12 * scale
    }

    /// `T_global`.
    pub fn transform(&self) -> Mat4 {
        self.registration.combined()
    }
}

/// Intermediate state of one evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationState {
    // ─────────────────────────────────────────────────────────────────────────
    // From dataset loading
    // ─────────────────────────────────────────────────────────────────────────
    /// Cameras and trajectory, rebuilt on every load.
    #[serde(skip)]
    pub scene: Option<LoadedScene>,

    /// The evaluation directory held results of a different dataset; nothing
    /// in it may be reloaded.
    pub stale_results: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // From matching and scale estimation
    // ─────────────────────────────────────────────────────────────────────────
    pub matching: Option<MatchSummary>,

    pub scale: Option<ScaleReport>,

    // ─────────────────────────────────────────────────────────────────────────
    // From mesh registration
    // ─────────────────────────────────────────────────────────────────────────
    pub global_registration: Option<Availability<GlobalRegistrationReport>>,

    pub fine_registration: Option<Availability<FineRegistration>>,

    // ─────────────────────────────────────────────────────────────────────────
    // From metrics
    // ─────────────────────────────────────────────────────────────────────────
    /// Whether reconstructed cameras carry world transforms for the current
    /// registration.
    pub cameras_registered: bool,

    pub cameras: Option<Availability<CameraMetrics>>,

    pub mesh: Option<Availability<MeshMetrics>>,
}

impl EvaluationState {
    pub fn require_scene(&self) -> Result<&LoadedScene> {
        self.scene
            .as_ref()
            .ok_or_else(|| anyhow!("dataset not loaded"))
    }

    pub fn require_scene_mut(&mut self) -> Result<&mut LoadedScene> {
        self.scene
            .as_mut()
            .ok_or_else(|| anyhow!("dataset not loaded"))
    }

    pub fn require_matching(&self) -> Result<MatchSummary> {
        self.matching
            .ok_or_else(|| anyhow!("cameras must be matched first"))
    }

    pub fn require_scale(&self) -> Result<&ScaleReport> {
        self.scale
            .as_ref()
            .ok_or_else(|| anyhow!("scale must be estimated first"))
    }

    /// `T_global`, when coarse registration succeeded.
    pub fn global_transform(&self) -> Option<Mat4> {
        self.global_registration
            .as_ref()
            .and_then(Availability::get)
            .map(GlobalRegistrationReport::transform)
    }

    /// `T`, when fine registration succeeded.
    pub fn fine_transform(&self) -> Option<Mat4> {
        self.fine_registration
            .as_ref()
            .and_then(Availability::get)
            .map(|f| f.combined)
    }

    /// Clear everything derived from the registration.
    pub fn clear_registration(&mut self) {
        self.global_registration = None;
        self.fine_registration = None;
        self.cameras_registered = false;
        self.cameras = None;
        self.mesh = None;
    }

    /// Clear everything derived from the cameras, keeping the loaded scene.
    pub fn clear_derived(&mut self) {
        self.matching = None;
        self.scale = None;
        self.clear_registration();
    }
}
