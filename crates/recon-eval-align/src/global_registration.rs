//! Coarse alignment of a reconstructed mesh onto ground truth.
//!
//! `T_global = T3 · T2 · T1`: `T1` applies the estimated scale, `T2` moves the
//! scaled mesh's centroid onto the target's, and `T3` is a rigid fit found
//! either by RANSAC over FPFH matches or from supplied point pairs.

use recon_eval_core::{
    Estimator, Mat4, Pt3, RansacOptions, Real, TriangleMesh, Vec3, ransac, scale_transform,
    transform_point, translation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{FeatureCloud, fit_rigid, match_features};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("{sources} source points but {targets} target points")]
    LengthMismatch { sources: usize, targets: usize },
    #[error("need at least 3 point correspondences, got {0}")]
    NotEnoughCorrespondences(usize),
    #[error("correspondences are collinear or coincident")]
    DegenerateCorrespondences,
    #[error("no consensus among {0} feature correspondences")]
    NoConsensus(usize),
    #[error("{0} point cloud is empty after preprocessing")]
    EmptyCloud(&'static str),
    #[error("scale factor must be positive and finite, got {0}")]
    InvalidScale(Real),
}

/// How the rigid part `T3` is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalMethod {
    /// RANSAC over FPFH feature matches.
    #[default]
    Features,
    /// Closed-form fit from [`GlobalRegistrationConfig::correspondences`].
    Correspondences,
}

/// Feature-matching RANSAC settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureRansacConfig {
    pub max_iters: usize,
    pub confidence: Real,
    /// Edge-length checker: paired sample edges must agree within this ratio.
    pub edge_length_ratio: Real,
    /// Inlier and distance-checker threshold, in voxel sizes.
    pub distance_factor: Real,
    pub mutual_filter: bool,
    pub seed: u64,
}

impl Default for FeatureRansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 100_000,
            confidence: 0.9999,
            edge_length_ratio: 0.9,
            distance_factor: 1.5,
            mutual_filter: true,
            seed: 42,
        }
    }
}

/// A supplied point pair. `source` is picked on the unscaled reconstructed
/// mesh, `target` on the ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointPair {
    pub source: [Real; 3],
    pub target: [Real; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalRegistrationConfig {
    pub method: GlobalMethod,
    /// Surface samples drawn from each mesh.
    pub sample_points: usize,
    pub sample_seed: u64,
    pub voxel_size: Real,
    pub ransac: FeatureRansacConfig,
    pub correspondences: Vec<PointPair>,
}

impl Default for GlobalRegistrationConfig {
    fn default() -> Self {
        Self {
            method: GlobalMethod::Features,
            sample_points: 10_000,
            sample_seed: 0,
            voxel_size: 0.005,
            ransac: FeatureRansacConfig::default(),
            correspondences: Vec::new(),
        }
    }
}

/// The three factors of `T_global` plus fit diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalRegistration {
    /// `T1`.
    pub scale: Mat4,
    /// `T2`.
    pub recenter: Mat4,
    /// `T3`.
    pub alignment: Mat4,
    /// Inlier fraction of the candidate correspondences.
    pub fitness: Real,
    pub inlier_rmse: Real,
    pub correspondences: usize,
}

impl GlobalRegistration {
    /// `T_global = T3 · T2 · T1`.
    pub fn combined(&self) -> Mat4 {
        self.alignment * self.recenter * self.scale
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Feature RANSAC
// ─────────────────────────────────────────────────────────────────────────────

/// Rigid model from three paired points, with edge-length and distance
/// plausibility checks on every sample.
struct CorrespondenceEstimator {
    edge_length_ratio: Real,
    distance_threshold: Real,
}

impl Estimator for CorrespondenceEstimator {
    type Datum = (Pt3, Pt3);
    type Model = Mat4;

    const MIN_SAMPLES: usize = 3;

    fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Option<Mat4> {
        let (src, dst): (Vec<Pt3>, Vec<Pt3>) = sample.iter().map(|&i| data[i]).unzip();
        fit_rigid(&src, &dst).ok()
    }

    fn residual(&self, model: &Mat4, datum: &Self::Datum) -> f64 {
        (transform_point(model, &datum.0) - datum.1).norm()
    }

    fn is_degenerate(&self, data: &[Self::Datum], sample: &[usize]) -> bool {
        for (a, &i) in sample.iter().enumerate() {
            for &j in &sample[a + 1..] {
                let ds = (data[i].0 - data[j].0).norm();
                let dt = (data[i].1 - data[j].1).norm();
                if ds < dt * self.edge_length_ratio || dt < ds * self.edge_length_ratio {
                    return true;
                }
            }
        }
        false
    }

    fn is_plausible(&self, model: &Mat4, data: &[Self::Datum], sample: &[usize]) -> bool {
        sample
            .iter()
            .all(|&i| self.residual(model, &data[i]) <= self.distance_threshold)
    }

    fn refit(&self, data: &[Self::Datum], inliers: &[usize]) -> Option<Mat4> {
        let (src, dst): (Vec<Pt3>, Vec<Pt3>) = inliers.iter().map(|&i| data[i]).unzip();
        fit_rigid(&src, &dst).ok()
    }
}

/// Rigid transform taking `source` onto `target` from descriptor matches.
///
/// Returns the transform with its inlier fraction and RMSE.
pub fn register_feature_clouds(
    source: &FeatureCloud,
    target: &FeatureCloud,
    voxel_size: Real,
    config: &FeatureRansacConfig,
) -> Result<(Mat4, Real, Real), RegistrationError> {
    if source.is_empty() {
        return Err(RegistrationError::EmptyCloud("source"));
    }
    if target.is_empty() {
        return Err(RegistrationError::EmptyCloud("target"));
    }
    let matches = match_features(
        source,
        target,
        config.mutual_filter,
        3 * CorrespondenceEstimator::MIN_SAMPLES,
    );
    let data: Vec<(Pt3, Pt3)> = matches
        .iter()
        .map(|&(i, j)| (source.points[i], target.points[j]))
        .collect();

    let distance_threshold = config.distance_factor * voxel_size;
    let estimator = CorrespondenceEstimator {
        edge_length_ratio: config.edge_length_ratio,
        distance_threshold,
    };
    let opts = RansacOptions {
        max_iters: config.max_iters,
        thresh: distance_threshold,
        min_inliers: CorrespondenceEstimator::MIN_SAMPLES,
        confidence: config.confidence,
        seed: config.seed,
        refit_on_inliers: true,
    };
    let res = ransac(&estimator, &data, &opts);
    let Some(model) = res.model else {
        return Err(RegistrationError::NoConsensus(data.len()));
    };
    let fitness = res.inliers.len() as Real / data.len() as Real;
    log::debug!(
        "feature RANSAC: {} of {} correspondences agree (rmse {:.3e}) after {} iterations",
        res.inliers.len(),
        data.len(),
        res.inlier_rms,
        res.iters
    );
    Ok((model, fitness, res.inlier_rms))
}

// ─────────────────────────────────────────────────────────────────────────────
// Mesh-level registration
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse registration of `source` (reconstruction units) onto `target`.
pub fn global_registration(
    source: &TriangleMesh,
    target: &TriangleMesh,
    scale: Real,
    config: &GlobalRegistrationConfig,
) -> Result<GlobalRegistration, RegistrationError> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(RegistrationError::InvalidScale(scale));
    }
    let t1 = scale_transform(scale);
    let scaled = source.transformed(&t1);
    let t2 = translation(&(target.centroid() - scaled.centroid()));
    let pre = t2 * t1;

    let (t3, fitness, inlier_rmse, correspondences) = match config.method {
        GlobalMethod::Correspondences => {
            let (src, dst): (Vec<Pt3>, Vec<Pt3>) = config
                .correspondences
                .iter()
                .map(|p| {
                    (
                        transform_point(&pre, &Pt3::from(Vec3::from(p.source))),
                        Pt3::from(Vec3::from(p.target)),
                    )
                })
                .unzip();
            let t3 = fit_rigid(&src, &dst)?;
            let residuals: Vec<Real> = src
                .iter()
                .zip(&dst)
                .map(|(s, d)| (transform_point(&t3, s) - d).norm())
                .collect();
            let rmse =
                (residuals.iter().map(|r| r * r).sum::<Real>() / residuals.len() as Real).sqrt();
            (t3, 1.0, rmse, src.len())
        }
        GlobalMethod::Features => {
            let recentred = scaled.transformed(&t2);
            let src_pts = recentred.sample_points(config.sample_points, config.sample_seed);
            let dst_pts = target.sample_points(config.sample_points, config.sample_seed);
            let src = FeatureCloud::preprocess(&src_pts, config.voxel_size);
            let dst = FeatureCloud::preprocess(&dst_pts, config.voxel_size);
            let (t3, fitness, rmse) =
                register_feature_clouds(&src, &dst, config.voxel_size, &config.ransac)?;
            (t3, fitness, rmse, src.len().min(dst.len()))
        }
    };

    Ok(GlobalRegistration {
        scale: t1,
        recenter: t2,
        alignment: t3,
        fitness,
        inlier_rmse,
        correspondences,
    })
}
