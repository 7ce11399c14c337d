//! Camera pose and mesh accuracy metrics.

use anyhow::{Context, Result};
use recon_eval_align::nearest_distances;
use recon_eval_core::{
    CameraReconstructed, CameraReference, Mat4, Morphology, Real, SampleStats, SceneFrame,
    TriangleMesh, Vec3, decompose, matched_pairs, rotation_angle,
};
use serde::{Deserialize, Serialize};

use super::problem::CameraEvalConfig;

/// Points sampled per mesh for the cloud-to-cloud distance.
const DISTANCE_SAMPLES: usize = 20_000;
const DISTANCE_SEED: u64 = 7;

// ─────────────────────────────────────────────────────────────────────────────
// Cameras
// ─────────────────────────────────────────────────────────────────────────────

/// Errors of one matched camera in the static frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraError {
    pub image: String,
    pub timestep: u32,
    /// `‖x_rec − x_ref‖` in metres.
    pub position: Real,
    /// Position error over the reference camera's distance to the focus point.
    pub relative_position: Real,
    pub orientation_deg: Real,
    pub position_outlier: bool,
    pub orientation_outlier: bool,
}

/// Aggregate pose errors over matched cameras only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraMetrics {
    pub position: SampleStats,
    pub relative_position: SampleStats,
    pub orientation_deg: SampleStats,
    pub position_outliers: usize,
    pub orientation_outliers: usize,
    pub per_camera: Vec<CameraError>,
}

fn camera_error(
    reference: &CameraReference,
    reconstructed: &CameraReconstructed,
    focus: &Vec3,
    config: &CameraEvalConfig,
) -> Result<CameraError> {
    let t_rec = reconstructed
        .transform(SceneFrame::Static)
        .with_context(|| format!("camera {} has no registered pose", reconstructed.image))?;
    let rec = decompose(&t_rec)?;
    let gt = decompose(&reference.transform(SceneFrame::Static))?;

    let position = (rec.location - gt.location).norm();
    let distance = reference.distance_to(focus);
    let relative_position = position / distance;
    let orientation_deg = rotation_angle(&(rec.rotation.transpose() * gt.rotation)).to_degrees();
    Ok(CameraError {
        image: reference.image.clone(),
        timestep: reference.timestep,
        position,
        relative_position,
        orientation_deg,
        position_outlier: position > config.threshold * distance,
        orientation_outlier: orientation_deg > config.orientation_threshold_deg,
    })
}

/// Pose errors of every matched pair; `None` when nothing matched.
///
/// Reconstructed cameras must already carry their static-frame transform.
pub fn camera_metrics(
    references: &[CameraReference],
    reconstructed: &[CameraReconstructed],
    focus: &Vec3,
    config: &CameraEvalConfig,
) -> Result<Option<CameraMetrics>> {
    let per_camera = matched_pairs(references, reconstructed)?
        .into_iter()
        .map(|(i, j)| camera_error(&references[i], &reconstructed[j], focus, config))
        .collect::<Result<Vec<_>>>()?;

    let collect = |f: fn(&CameraError) -> Real| {
        let values: Vec<Real> = per_camera.iter().map(f).collect();
        SampleStats::from_samples(&values)
    };
    let (Some(position), Some(relative_position), Some(orientation_deg)) = (
        collect(|e| e.position),
        collect(|e| e.relative_position),
        collect(|e| e.orientation_deg),
    ) else {
        return Ok(None);
    };

    let metrics = CameraMetrics {
        position,
        relative_position,
        orientation_deg,
        position_outliers: per_camera.iter().filter(|e| e.position_outlier).count(),
        orientation_outliers: per_camera.iter().filter(|e| e.orientation_outlier).count(),
        per_camera,
    };
    log::debug!(
        "camera errors over {} cameras: position median {:.3e} m, orientation median {:.3e} deg",
        metrics.position.count,
        metrics.position.median,
        metrics.orientation_deg.median
    );
    Ok(Some(metrics))
}

// ─────────────────────────────────────────────────────────────────────────────
// Meshes
// ─────────────────────────────────────────────────────────────────────────────

/// `(reconstructed − ground truth) / ground truth` per descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MorphologyError {
    pub volume: Real,
    pub surface_area: Real,
    pub sauter_diameter: Real,
    pub specific_surface: Real,
    pub sphericity: Real,
}

impl MorphologyError {
    pub fn between(reconstructed: &Morphology, ground_truth: &Morphology) -> Self {
        let rel = |r: Real, g: Real| (r - g) / g;
        Self {
            volume: rel(reconstructed.volume, ground_truth.volume),
            surface_area: rel(reconstructed.surface_area, ground_truth.surface_area),
            sauter_diameter: rel(reconstructed.sauter_diameter, ground_truth.sauter_diameter),
            specific_surface: rel(reconstructed.specific_surface, ground_truth.specific_surface),
            sphericity: rel(reconstructed.sphericity, ground_truth.sphericity),
        }
    }
}

/// Reconstructed mesh after one registration transform, against ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshComparison {
    pub morphology: Morphology,
    pub relative_error: MorphologyError,
    /// Nearest-neighbour distance from reconstructed surface samples to
    /// ground-truth surface samples.
    pub cloud_to_cloud: Option<SampleStats>,
}

impl MeshComparison {
    pub fn new(reconstructed: &TriangleMesh, t: &Mat4, ground_truth: &TriangleMesh) -> Self {
        let registered = reconstructed.transformed(t);
        let morphology = Morphology::of(&registered);
        let source = registered.sample_points(DISTANCE_SAMPLES, DISTANCE_SEED);
        let target = ground_truth.sample_points(DISTANCE_SAMPLES, DISTANCE_SEED);
        Self {
            relative_error: MorphologyError::between(&morphology, &Morphology::of(ground_truth)),
            morphology,
            cloud_to_cloud: SampleStats::from_samples(&nearest_distances(&source, &target)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshMetrics {
    pub ground_truth: Morphology,
    /// After `T_global`.
    pub global: MeshComparison,
    /// After `T = T_ICP · T_global`, when fine registration ran.
    pub fine: Option<MeshComparison>,
}

impl MeshMetrics {
    pub fn compute(
        reconstructed: &TriangleMesh,
        ground_truth: &TriangleMesh,
        t_global: &Mat4,
        t_fine: Option<&Mat4>,
    ) -> Self {
        Self {
            ground_truth: Morphology::of(ground_truth),
            global: MeshComparison::new(reconstructed, t_global, ground_truth),
            fine: t_fine.map(|t| MeshComparison::new(reconstructed, t, ground_truth)),
        }
    }

    /// The most refined comparison available.
    pub fn best(&self) -> &MeshComparison {
        self.fine.as_ref().unwrap_or(&self.global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_eval_core::synthetic::{SceneSpec, box_mesh, build_scene, tilted_frame, uv_sphere};
    use recon_eval_core::{match_cameras, scale_transform, translation};

    fn registered_scene(spec: &SceneSpec) -> (Vec<CameraReference>, Vec<CameraReconstructed>) {
        let scene = build_scene(spec, box_mesh(Vec3::repeat(0.1))).unwrap();
        let t = scene.object_to_reconstruction().try_inverse().unwrap();
        let (mut refs, mut recs) = (scene.references, scene.reconstructed);
        match_cameras(&mut refs, &mut recs);
        for cam in &mut recs {
            cam.to_world_transform(&t, &spec.focus);
        }
        (refs, recs)
    }

    #[test]
    fn exact_registration_has_no_pose_error() {
        let spec = SceneSpec {
            reconstruction_frame: tilted_frame(),
            unsolved_timesteps: vec![2],
            ..SceneSpec::default()
        };
        let (refs, recs) = registered_scene(&spec);
        let m = camera_metrics(&refs, &recs, &spec.focus, &CameraEvalConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(m.per_camera.len(), 12);
        assert!(m.per_camera.iter().all(|e| e.timestep != 2));
        assert!(m.position.max < 1e-9, "{:?}", m.position);
        assert!(m.orientation_deg.max < 1e-6, "{:?}", m.orientation_deg);
        assert_eq!(m.position_outliers, 0);
        assert_eq!(m.orientation_outliers, 0);
    }

    #[test]
    fn shifted_camera_is_position_outlier() {
        let spec = SceneSpec::default();
        let scene = build_scene(&spec, box_mesh(Vec3::repeat(0.1))).unwrap();
        let t = scene.object_to_reconstruction().try_inverse().unwrap();
        let (mut refs, mut recs) = (scene.references, scene.reconstructed);
        match_cameras(&mut refs, &mut recs);
        // 0.016 reconstruction units is 4 mm at k = 0.25, above 0.5 % of
        // any ring camera's focus distance.
        for (n, cam) in recs.iter_mut().enumerate() {
            let nudge = if n == 0 { Vec3::new(0.0, 0.016, 0.0) } else { Vec3::zeros() };
            cam.center += nudge;
            cam.to_world_transform(&t, &spec.focus);
        }
        let m = camera_metrics(&refs, &recs, &spec.focus, &CameraEvalConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(m.position_outliers, 1);
        let worst = m
            .per_camera
            .iter()
            .find(|e| e.position_outlier)
            .unwrap();
        assert_eq!(worst.image, recs[0].image);
        assert!((worst.position - 0.004).abs() < 1e-9, "{}", worst.position);
        assert_eq!(m.orientation_outliers, 0);
    }

    #[test]
    fn no_matches_means_no_metrics() {
        let refs = vec![CameraReference::new(
            "0001.png",
            Vec3::new(0.6, 0.0, 1.0),
            Vec3::zeros(),
            1,
            0,
        )];
        let m = camera_metrics(&refs, &[], &Vec3::zeros(), &CameraEvalConfig::default()).unwrap();
        assert!(m.is_none());
    }

    #[test]
    fn scaled_mesh_has_expected_relative_errors() {
        let gt = uv_sphere(0.1, 16, 32);
        let rec = gt.transformed(&scale_transform(4.0));
        let exact = MeshMetrics::compute(&rec, &gt, &scale_transform(0.25), None);
        assert!(exact.best().relative_error.volume.abs() < 1e-9);
        assert!(exact.best().relative_error.sphericity.abs() < 1e-9);
        let c2c = exact.global.cloud_to_cloud.unwrap();
        assert!(c2c.median < 5e-3, "{c2c:?}");

        // 10 % too large in every direction.
        let loose = scale_transform(0.275);
        let off = MeshMetrics::compute(&rec, &gt, &scale_transform(0.25), Some(&loose));
        let e = off.best().relative_error;
        assert!((e.volume - (1.1f64.powi(3) - 1.0)).abs() < 1e-9);
        assert!((e.surface_area - (1.1f64.powi(2) - 1.0)).abs() < 1e-9);
        assert!((e.sauter_diameter - 0.1).abs() < 1e-9);
        assert!(e.sphericity.abs() < 1e-9);
        assert!(off.fine.is_some());
    }

    #[test]
    fn translated_mesh_distance_reflects_offset() {
        let gt = box_mesh(Vec3::repeat(1.0));
        let shift = translation(&Vec3::new(0.0, 0.0, 0.05));
        let cmp = MeshComparison::new(&gt, &shift, &gt);
        let c2c = cmp.cloud_to_cloud.unwrap();
        assert!(c2c.max > 0.03, "{c2c:?}");
        assert!(cmp.relative_error.volume.abs() < 1e-12);
    }
}
