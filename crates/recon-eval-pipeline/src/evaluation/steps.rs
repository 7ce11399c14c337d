//! Step functions of a reconstruction evaluation.
//!
//! Each step reads what earlier steps left in the session state, records its
//! own result and an entry in the session log. Stages with persisted results
//! reload them unless `recompute` is set or the evaluation directory belongs to
//! another dataset. This orchestrator is the only place that turns a skippable
//! failure into an [`Availability::Unavailable`] result.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use recon_eval_align::{RegistrationError, ScaleError, estimate_scale, global_registration};
use recon_eval_core::{
    CameraReconstructed, CameraReference, Mat4, MatchSummary, Real, SceneFrame,
    compensate_object_motion, match_cameras, matched_pairs,
};
use serde::de::DeserializeOwned;

use crate::error::{EvalError, classify};
use crate::fine_registration::{
    CloudCompareJob, FineRegistration, fine_registration, load_fine_registration,
};
use crate::io::{
    GLOBAL_MATRIX_FILE, GLOBAL_REGISTRATION_FILE, Manifest, OBJECT_POSES_FILE,
    RECONSTRUCTED_MESH_FILE, REFERENCE_CAMERAS_FILE, SCALE_REPORT_FILE, SCENE_PARAMETERS_FILE,
    SESSION_FILE, SUMMARY_FILE, export_camera_extrinsics, load_reconstructed_cameras,
    load_scene_parameters, read_json, read_obj, read_object_trajectory, read_reference_cameras,
    write_json, write_matrix, write_rows,
};
use crate::session::{EvaluationSession, current_timestamp};

use super::metrics::{MeshMetrics, camera_metrics};
use super::problem::{
    Availability, DatasetPaths, EvaluationInput, EvaluationReport, ReconstructionEvaluation,
};
use super::state::{GlobalRegistrationReport, LoadedScene, ScaleReport};

type Session = EvaluationSession<ReconstructionEvaluation>;

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted result at `path`, if it may be reused.
fn reusable<T: DeserializeOwned>(session: &Session, path: &Path) -> Option<T> {
    if session.config.recompute || session.state.stale_results || !path.is_file() {
        return None;
    }
    match read_json(path) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("ignoring unreadable {}: {err:#}", path.display());
            None
        }
    }
}

fn require_file(what: &'static str, path: &Path) -> Result<(), EvalError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(EvalError::missing(what, path))
    }
}

fn checked_pairs(
    references: &[CameraReference],
    reconstructed: &[CameraReconstructed],
) -> Result<Vec<(usize, usize)>, EvalError> {
    matched_pairs(references, reconstructed)
        .map_err(|e| EvalError::MalformedCorrespondence(e.to_string()))
}

/// Whether a failed stage may degrade to an unavailable result.
fn is_skippable(err: &anyhow::Error) -> bool {
    classify(err).is_some_and(EvalError::is_skippable)
        || err.chain().any(|e| e.is::<RegistrationError>())
}

fn dataset(session: &Session) -> String {
    session
        .input()
        .map_or_else(|| "<no dataset>".to_string(), EvaluationInput::dataset)
}

fn same_transform(a: &Mat4, b: &Mat4) -> bool {
    (a - b).abs().max() <= 1e-9 * a.abs().max().max(1.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Step Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Load reference cameras, object motion, reconstructed cameras and scene
/// parameters, compensate object motion, and write the manifest.
///
/// Replaces any previous input and clears all computed state.
pub fn step_load_dataset(session: &mut Session, paths: DatasetPaths) -> Result<()> {
    require_file("scene parameters", &paths.image_dir.join(SCENE_PARAMETERS_FILE))?;
    let cameras_table = paths.image_dir.join(REFERENCE_CAMERAS_FILE);
    require_file("reference camera table", &cameras_table)?;

    let scene = load_scene_parameters(&paths.image_dir)?;
    let references = read_reference_cameras(&cameras_table)?;
    let trajectory = read_object_trajectory(&paths.image_dir.join(OBJECT_POSES_FILE))?;
    let reconstructed = load_reconstructed_cameras(&paths.reconstruction_dir)?;
    compensate_object_motion(
        &references,
        trajectory.as_ref(),
        &scene.focus(),
        session.config.motion_axis,
    )
    .with_context(|| format!("object motion in {}", paths.image_dir.display()))?;

    fs::create_dir_all(&paths.evaluation_dir)
        .with_context(|| format!("failed to create {}", paths.evaluation_dir.display()))?;
    let mut manifest = Manifest {
        image_dir: paths.image_dir.clone(),
        object_path: paths.object_path.clone(),
        reconstruction_dir: paths.reconstruction_dir.clone(),
        evaluation_dir: paths.evaluation_dir.clone(),
        created_at: current_timestamp(),
    };
    let stale = match Manifest::read(&paths.evaluation_dir) {
        Ok(previous) if previous.same_dataset(&manifest) => {
            manifest.created_at = previous.created_at;
            false
        }
        Ok(previous) => {
            log::warn!(
                "{} held results for {}; recomputing every stage",
                paths.evaluation_dir.display(),
                previous.image_dir.display()
            );
            true
        }
        Err(_) => false,
    };
    manifest.write()?;

    let input = EvaluationInput { paths, scene };
    let name = input.dataset();
    session.set_input(input)?;
    session.state.stale_results = stale;

    let notes = format!(
        "{name}: {} reference cameras, {} reconstructed, {}",
        references.len(),
        reconstructed.len(),
        if trajectory.is_some() { "moving object" } else { "static scene" }
    );
    log::info!("loaded {notes}");
    session.state.scene = Some(LoadedScene {
        references,
        reconstructed,
        trajectory,
    });
    session.log_success_with_notes("load_dataset", notes);
    Ok(())
}

/// Match cameras by image name.
pub fn step_match_cameras(session: &mut Session) -> Result<MatchSummary> {
    let name = dataset(session);
    let scene = session.state.require_scene_mut()?;
    let summary = match_cameras(&mut scene.references, &mut scene.reconstructed);
    checked_pairs(&scene.references, &scene.reconstructed)?;

    if summary.reconstructed == 0 {
        log::warn!("{name}: the reconstruction solved no cameras");
    }
    let rate = summary
        .reconstruction_rate()
        .map_or("n/a".to_string(), |r| format!("{:.1}%", 100.0 * r));
    log::info!(
        "{name}: matched {} of {} reference cameras ({rate})",
        summary.matched,
        summary.reference
    );
    session.state.clear_derived();
    session.state.matching = Some(summary);
    session.log_success_with_notes(
        "match_cameras",
        format!("{}/{} matched", summary.matched, summary.reference),
    );
    Ok(summary)
}

/// Estimate the reconstruction's scale and persist `ScaleReport.json`.
///
/// An undetermined scale fails the evaluation.
pub fn step_estimate_scale(session: &mut Session) -> Result<Real> {
    session.state.require_matching()?;
    let name = dataset(session);
    let path = session
        .require_input()?
        .paths
        .in_evaluation_dir(SCALE_REPORT_FILE);

    if let Some(report) = reusable::<ScaleReport>(session, &path) {
        if report.config == session.config.scale {
            let factor = report.factor();
            log::info!("{name}: reloaded scale {factor:.6} from {}", path.display());
            session.state.clear_registration();
            session.state.scale = Some(report);
            session.log_success_with_notes("estimate_scale", format!("reloaded {factor:.6}"));
            return Ok(factor);
        }
        log::info!("{name}: scale configuration changed, recomputing");
    }

    let config = session.config.scale.clone();
    let scene = session.state.require_scene()?;
    let estimated = estimate_scale(&scene.references, &scene.reconstructed, &config)
        .map(|e| ScaleReport::new(e, config, &scene.references));
    let report = match estimated {
        Ok(report) => report,
        Err(ScaleError::Undetermined { total, surviving }) => {
            let err = EvalError::ScaleUndetermined {
                dataset: name,
                reason: format!("{surviving} of {total} distance measurements survived"),
            };
            log::error!("{err}");
            session.log_failure("estimate_scale", err.to_string());
            return Err(err.into());
        }
        Err(ScaleError::Correspondence(e)) => {
            return Err(EvalError::MalformedCorrespondence(e.to_string()).into());
        }
    };

    write_json(&path, &report)?;
    let factor = report.factor();
    log::info!(
        "{name}: scale {factor:.6} (mean {:.6}, std {:.3e}), {} of {} measurements rejected",
        report.estimate.mean,
        report.estimate.std,
        report.estimate.outliers,
        report.measurements
    );
    for pair in &report.outlier_pairs {
        log::debug!(
            "{name}: rejected {} <-> {} at timestep {}",
            pair.images.0,
            pair.images.1,
            pair.timestep
        );
    }
    let notes = format!(
        "scale {factor:.6}, {} outlier measurements",
        report.estimate.outliers
    );
    session.state.clear_registration();
    session.state.scale = Some(report);
    session.log_success_with_notes("estimate_scale", notes);
    Ok(factor)
}

fn compute_global_registration(
    paths: &DatasetPaths,
    scale: Real,
    session: &Session,
) -> Result<GlobalRegistrationReport> {
    let source_path = paths.reconstructed_mesh();
    require_file("reconstructed mesh", &source_path)?;
    require_file("ground-truth mesh", &paths.object_path)?;
    let source = read_obj(&source_path)?;
    let target = read_obj(&paths.object_path)?;

    let config = &session.config.global_registration;
    let registration = global_registration(&source, &target, scale, config)
        .with_context(|| format!("coarse registration of {}", source_path.display()))?;
    Ok(GlobalRegistrationReport {
        config: config.clone(),
        scale,
        registration,
    })
}

/// Coarse registration; persists `GlobalRegistration.json` and
/// `GlobalTransformationMatrix.txt`.
///
/// Missing meshes or a failed fit leave the registration unavailable.
pub fn step_global_registration(session: &mut Session) -> Result<()> {
    let scale = session.state.require_scale()?.factor();
    let name = dataset(session);
    let paths = session.require_input()?.paths.clone();
    let report_path = paths.in_evaluation_dir(GLOBAL_REGISTRATION_FILE);

    let previous = reusable::<GlobalRegistrationReport>(session, &report_path);
    let reloaded = previous
        .as_ref()
        .is_some_and(|r| r.matches(&session.config.global_registration, scale));
    let result = match previous {
        Some(report) if reloaded => {
            log::info!("{name}: reloaded coarse registration from {}", report_path.display());
            Availability::Available(report)
        }
        previous => {
            if previous.is_some() {
                log::info!("{name}: coarse registration settings changed, recomputing");
            }
            match compute_global_registration(&paths, scale, session) {
                Ok(report) => {
                    write_json(&report_path, &report)?;
                    log::info!(
                        "{name}: coarse registration fitness {:.3}, rmse {:.3e} over {} \
                         correspondences",
                        report.registration.fitness,
                        report.registration.inlier_rmse,
                        report.registration.correspondences
                    );
                    Availability::Available(report)
                }
                Err(err) if is_skippable(&err) => {
                    log::warn!("{name}: skipping coarse registration: {err:#}");
                    Availability::unavailable(format!("{err:#}"))
                }
                Err(err) => return Err(err),
            }
        }
    };

    if let Some(report) = result.get() {
        write_matrix(&paths.in_evaluation_dir(GLOBAL_MATRIX_FILE), &report.transform())?;
    }
    let notes = match result.reason() {
        Some(reason) => format!("unavailable: {reason}"),
        None if reloaded => "reloaded".to_string(),
        None => "available".to_string(),
    };
    session.state.clear_registration();
    session.state.global_registration = Some(result);
    session.log_success_with_notes("global_registration", notes);
    Ok(())
}

fn run_cloudcompare(
    executable: &Path,
    paths: &DatasetPaths,
    job: &CloudCompareJob,
    t_global: &Mat4,
    session: &Session,
) -> Result<FineRegistration> {
    let source = paths.reconstructed_mesh();
    require_file("reconstructed mesh", &source)?;
    require_file("ground-truth mesh", &job.ground_truth_mesh)?;
    fs::copy(&source, &job.reconstructed_mesh).with_context(|| {
        format!(
            "failed to copy {} to {}",
            source.display(),
            job.reconstructed_mesh.display()
        )
    })?;
    fine_registration(executable, job, t_global, &session.config.fine_registration)
}

/// Fine registration through CloudCompare, seeded with `T_global`.
///
/// Without coarse registration, a configured executable, or a successful
/// CloudCompare run the result is unavailable.
pub fn step_fine_registration(session: &mut Session) -> Result<()> {
    let name = dataset(session);
    let paths = session.require_input()?.paths.clone();
    let config = session.config.fine_registration.clone();
    let job = CloudCompareJob {
        evaluation_dir: paths.evaluation_dir.clone(),
        reconstructed_mesh: paths.evaluation_dir.join(RECONSTRUCTED_MESH_FILE),
        ground_truth_mesh: paths.object_path.clone(),
    };

    let result = match (session.state.global_transform(), &config.cloudcompare) {
        (None, _) => Availability::unavailable("coarse registration unavailable"),
        (Some(_), None) => Availability::unavailable("CloudCompare executable not configured"),
        (Some(t_global), Some(executable)) => {
            let reloaded = if session.config.recompute || session.state.stale_results {
                None
            } else {
                match load_fine_registration(&job, &config) {
                    Ok(previous) => {
                        previous.filter(|f| same_transform(&f.combined, &(f.icp * t_global)))
                    }
                    Err(err) => {
                        log::warn!("{name}: ignoring unreadable fine registration: {err:#}");
                        None
                    }
                }
            };
            match reloaded {
                Some(fine) => {
                    log::info!("{name}: reloaded fine registration from {}", job.log().display());
                    Availability::Available(fine)
                }
                None => match run_cloudcompare(executable, &paths, &job, &t_global, session) {
                    Ok(fine) => Availability::Available(fine),
                    Err(err) if is_skippable(&err) => Availability::unavailable(format!("{err:#}")),
                    Err(err) => return Err(err),
                },
            }
        }
    };

    if let Some(reason) = result.reason() {
        log::warn!("{name}: fine registration unavailable: {reason}");
    }
    let notes = match &result {
        Availability::Available(fine) => format!(
            "C2M after ICP {:.6} ± {:.6}",
            fine.after.mean, fine.after.std
        ),
        Availability::Unavailable { reason } => format!("unavailable: {reason}"),
    };
    session.state.fine_registration = Some(result);
    session.state.mesh = None;
    session.log_success_with_notes("fine_registration", notes);
    Ok(())
}

/// Register every reconstructed camera with `T_global`, in both the static
/// and the dynamic frame, and export the reference extrinsics.
pub fn step_register_cameras(session: &mut Session) -> Result<()> {
    let name = dataset(session);
    let Some(t_global) = session.state.global_transform() else {
        log::warn!("{name}: cameras stay unregistered without coarse registration");
        session.state.cameras_registered = false;
        session.state.cameras = None;
        session.log_success_with_notes("register_cameras", "skipped: no registration");
        return Ok(());
    };
    let input = session.require_input()?;
    let focus = input.scene.focus();
    let evaluation_dir = input.paths.evaluation_dir.clone();
    let export = session.config.export_camera_extrinsics;

    let scene = session.state.require_scene_mut()?;
    for cam in &mut scene.reconstructed {
        cam.to_world_transform(&t_global, &focus);
    }
    for (i, j) in checked_pairs(&scene.references, &scene.reconstructed)? {
        let dyn_to_static = scene.references[i]
            .dyn_to_static()
            .unwrap_or_else(Mat4::identity);
        scene.reconstructed[j]
            .to_dynamic_scene(&dyn_to_static)
            .with_context(|| format!("camera {}", scene.reconstructed[j].image))?;
    }
    if export {
        for frame in [SceneFrame::Static, SceneFrame::Dynamic] {
            let path = export_camera_extrinsics(&scene.references, frame, &evaluation_dir)?;
            log::debug!("{name}: wrote {}", path.display());
        }
    }
    let count = scene.reconstructed.len();

    session.state.cameras_registered = true;
    session.state.cameras = None;
    session.log_success_with_notes("register_cameras", format!("{count} cameras registered"));
    Ok(())
}

/// Camera position and orientation errors over matched cameras.
pub fn step_camera_metrics(session: &mut Session) -> Result<()> {
    let name = dataset(session);
    let result = if session.state.cameras_registered {
        let focus = session.require_input()?.scene.focus();
        let scene = session.state.require_scene()?;
        checked_pairs(&scene.references, &scene.reconstructed)?;
        match camera_metrics(
            &scene.references,
            &scene.reconstructed,
            &focus,
            &session.config.cameras,
        )? {
            Some(metrics) => Availability::Available(metrics),
            None => Availability::unavailable("no matched cameras"),
        }
    } else {
        Availability::unavailable("cameras are not registered")
    };

    let notes = match &result {
        Availability::Available(m) => {
            log::info!(
                "{name}: position error median {:.3e} m ({:.3}%), orientation median {:.3e} deg, \
                 {} position / {} orientation outliers",
                m.position.median,
                100.0 * m.relative_position.median,
                m.orientation_deg.median,
                m.position_outliers,
                m.orientation_outliers
            );
            format!(
                "{} cameras, {} position outliers",
                m.position.count, m.position_outliers
            )
        }
        Availability::Unavailable { reason } => {
            log::warn!("{name}: camera metrics unavailable: {reason}");
            format!("unavailable: {reason}")
        }
    };
    session.state.cameras = Some(result);
    session.log_success_with_notes("camera_metrics", notes);
    Ok(())
}

fn compute_mesh_metrics(
    paths: &DatasetPaths,
    t_global: &Mat4,
    t_fine: Option<&Mat4>,
) -> Result<MeshMetrics> {
    let source_path = paths.reconstructed_mesh();
    require_file("reconstructed mesh", &source_path)?;
    require_file("ground-truth mesh", &paths.object_path)?;
    let reconstructed = read_obj(&source_path)?;
    let ground_truth = read_obj(&paths.object_path)?;
    Ok(MeshMetrics::compute(&reconstructed, &ground_truth, t_global, t_fine))
}

/// Morphology and distance of the registered reconstructed mesh against
/// ground truth, after `T_global` and, when available, after `T`.
pub fn step_mesh_metrics(session: &mut Session) -> Result<()> {
    let name = dataset(session);
    let paths = session.require_input()?.paths.clone();
    let fine = session.state.fine_transform();
    let result = match session.state.global_transform() {
        None => Availability::unavailable("coarse registration unavailable"),
        Some(t_global) => match compute_mesh_metrics(&paths, &t_global, fine.as_ref()) {
            Ok(metrics) => Availability::Available(metrics),
            Err(err) if is_skippable(&err) => {
                log::warn!("{name}: skipping mesh metrics: {err:#}");
                Availability::unavailable(format!("{err:#}"))
            }
            Err(err) => return Err(err),
        },
    };

    let notes = match &result {
        Availability::Available(m) => {
            let best = m.best();
            log::info!(
                "{name}: volume error {:+.3}%, surface area error {:+.3}%, \
                 sphericity error {:+.3}%",
                100.0 * best.relative_error.volume,
                100.0 * best.relative_error.surface_area,
                100.0 * best.relative_error.sphericity
            );
            format!(
                "volume error {:+.4}, {}",
                best.relative_error.volume,
                if m.fine.is_some() { "after ICP" } else { "after coarse registration" }
            )
        }
        Availability::Unavailable { reason } => format!("unavailable: {reason}"),
    };
    session.state.mesh = Some(result);
    session.log_success_with_notes("mesh_metrics", notes);
    Ok(())
}

fn or_not_run<T: Clone>(value: &Option<Availability<T>>) -> Availability<T> {
    value
        .clone()
        .unwrap_or_else(|| Availability::unavailable("stage did not run"))
}

/// Assemble the report, export the summary row, and persist the session.
pub fn step_finalize(session: &mut Session) -> Result<EvaluationReport> {
    let input = session.require_input()?;
    let paths = input.paths.clone();
    let state = &session.state;
    let report = EvaluationReport {
        dataset: input.dataset(),
        matching: state.require_matching()?,
        scale: state.require_scale()?.clone(),
        global_registration: or_not_run(&state.global_registration),
        fine_registration: or_not_run(&state.fine_registration),
        cameras: or_not_run(&state.cameras),
        mesh: or_not_run(&state.mesh),
    };
    session.set_output(report.clone());
    let summary = session.export()?;
    write_rows(&paths.in_evaluation_dir(SUMMARY_FILE), &[summary])?;
    session.log_success("finalize");
    session.save(&paths.in_evaluation_dir(SESSION_FILE))?;
    log::info!(
        "{}: evaluation written to {}",
        report.dataset,
        paths.evaluation_dir.display()
    );
    Ok(report)
}

fn run_steps(session: &mut Session) -> Result<()> {
    step_match_cameras(session)?;
    step_estimate_scale(session)?;
    step_global_registration(session)?;
    step_fine_registration(session)?;
    step_register_cameras(session)?;
    step_camera_metrics(session)?;
    step_mesh_metrics(session)?;
    step_finalize(session)?;
    Ok(())
}

/// Run every step on one dataset.
///
/// On failure after loading, the session is still saved so its log shows
/// which step stopped the run.
pub fn run_evaluation(session: &mut Session, paths: DatasetPaths) -> Result<()> {
    step_load_dataset(session, paths)?;
    let result = run_steps(session);
    if let Err(err) = &result {
        if let Some(input) = session.input() {
            let path = input.paths.in_evaluation_dir(SESSION_FILE);
            if let Err(save_err) = session.save(&path) {
                log::warn!("could not save {}: {save_err:#}", path.display());
            }
        }
        log::error!("{}: evaluation failed: {err:#}", dataset(session));
    }
    result
}
