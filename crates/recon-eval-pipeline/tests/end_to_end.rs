//! Full evaluation of a synthetic dataset written to disk in the renderer's
//! and the reconstruction engine's formats.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::Result;
use recon_eval_align::{GlobalMethod, GlobalRegistrationConfig, PointPair};
use recon_eval_core::synthetic::{
    SceneSpec, SyntheticScene, asymmetric_mesh, build_scene, tilted_frame,
};
use recon_eval_pipeline::evaluation::{
    DatasetPaths, EvaluationConfig, ReconstructionEvaluation, run_evaluation,
};
use recon_eval_pipeline::io::{
    SCALE_REPORT_FILE, SESSION_FILE, SUMMARY_FILE, TRANSFORMATION_MATRIX_FILE, read_matrix,
    write_obj,
};
use recon_eval_pipeline::session::EvaluationSession;
use recon_eval_pipeline::study::{PARAMETER_SET_FILE, STUDY_RESULTS_FILE, run_parameter_study};
use tempfile::tempdir;

fn synthetic_scene() -> Result<SyntheticScene> {
    let spec = SceneSpec {
        scale: 0.25,
        reconstruction_frame: tilted_frame(),
        unsolved_timesteps: vec![4],
        ..SceneSpec::default()
    };
    Ok(build_scene(&spec, asymmetric_mesh())?)
}

fn write_renderer_output(scene: &SyntheticScene, image_dir: &Path) -> Result<()> {
    fs::create_dir_all(image_dir)?;
    let focus = scene.spec.focus;
    fs::write(
        image_dir.join("params.json"),
        format!(
            r#"{{"cam": {{"focuspoint": [{}, {}, {}], "distance": {}}}, "io": {{"name": "synthetic"}}}}"#,
            focus.x, focus.y, focus.z, scene.spec.radius
        ),
    )?;

    let mut cameras = String::from(
        "ImageFileName,TimeStep,PositionX,PositionY,PositionZ,RotationEulerX,RotationEulerY,RotationEulerZ\n",
    );
    for c in &scene.references {
        writeln!(
            cameras,
            "{},{},{},{},{},{},{},{}",
            c.image, c.timestep, c.location.x, c.location.y, c.location.z, c.euler.x, c.euler.y,
            c.euler.z
        )?;
    }
    fs::write(image_dir.join("CameraPositioningInMeters.csv"), cameras)?;

    let trajectory = scene.trajectory.as_ref().expect("synthetic object moves");
    let mut objects = String::from(
        "TimeStep,PositionX,PositionY,PositionZ,RotationEulerX,RotationEulerY,RotationEulerZ\n",
    );
    for p in std::iter::once(&trajectory.reference).chain(&trajectory.poses) {
        writeln!(
            objects,
            "{},{},{},{},{},{},{}",
            p.timestep, p.location.x, p.location.y, p.location.z, p.euler.x, p.euler.y, p.euler.z
        )?;
    }
    fs::write(image_dir.join("ObjectPositioningInMeters.csv"), objects)?;
    Ok(())
}

fn write_reconstruction(scene: &SyntheticScene, reconstruction_dir: &Path) -> Result<()> {
    let node = reconstruction_dir.join("MeshroomCache/StructureFromMotion/0f1e2d");
    fs::create_dir_all(&node)?;

    let views: Vec<_> = scene
        .reconstructed
        .iter()
        .enumerate()
        .map(|(id, c)| {
            serde_json::json!({
                "viewId": (1000 + id).to_string(),
                "poseId": (1000 + id).to_string(),
                "path": format!("/renders/{}", c.image),
            })
        })
        .collect();
    let poses: Vec<_> = scene
        .reconstructed
        .iter()
        .enumerate()
        .map(|(id, c)| {
            let rotation: Vec<String> = (0..3)
                .flat_map(|r| (0..3).map(move |k| (r, k)))
                .map(|(r, k)| c.rotation[(r, k)].to_string())
                .collect();
            let center: Vec<String> = c.center.iter().map(|v| v.to_string()).collect();
            serde_json::json!({
                "poseId": (1000 + id).to_string(),
                "pose": {"transform": {"rotation": rotation, "center": center}, "locked": "0"},
            })
        })
        .collect();
    let sfm = serde_json::json!({"version": ["1", "2", "4"], "views": views, "poses": poses});
    fs::write(node.join("cameras.sfm"), serde_json::to_string_pretty(&sfm)?)?;

    write_obj(&reconstruction_dir.join("texturedMesh.obj"), &scene.reconstructed_mesh)
}

fn correspondence_config(scene: &SyntheticScene) -> EvaluationConfig {
    let correspondences = [1usize, 2, 4, 7, 12]
        .iter()
        .map(|&v| {
            let s = scene.reconstructed_mesh.vertices()[v];
            let t = scene.ground_truth_mesh.vertices()[v];
            PointPair {
                source: [s.x, s.y, s.z],
                target: [t.x, t.y, t.z],
            }
        })
        .collect();
    EvaluationConfig {
        global_registration: GlobalRegistrationConfig {
            method: GlobalMethod::Correspondences,
            correspondences,
            ..GlobalRegistrationConfig::default()
        },
        ..EvaluationConfig::default()
    }
}

/// Notes of the last log entry for `operation`.
fn step_notes(session: &EvaluationSession<ReconstructionEvaluation>, operation: &str) -> String {
    session
        .log
        .iter()
        .rev()
        .find(|e| e.operation == operation)
        .and_then(|e| e.notes.clone())
        .unwrap_or_default()
}

fn evaluate(
    paths: &DatasetPaths,
    config: &EvaluationConfig,
) -> Result<EvaluationSession<ReconstructionEvaluation>> {
    let mut session = EvaluationSession::<ReconstructionEvaluation>::new();
    session.set_config(config.clone())?;
    run_evaluation(&mut session, paths.clone())?;
    Ok(session)
}

/// Writes one dataset below `root` and returns its paths.
fn write_dataset(scene: &SyntheticScene, root: &Path, name: &str) -> Result<DatasetPaths> {
    let paths = DatasetPaths::new(
        root.join("out").join(name),
        root.join("renders").join(name),
        root.join("objects/asymmetric.obj"),
    );
    write_renderer_output(scene, &paths.image_dir)?;
    write_reconstruction(scene, &paths.reconstruction_dir)?;
    fs::create_dir_all(root.join("objects"))?;
    write_obj(&paths.object_path, &scene.ground_truth_mesh)?;
    Ok(paths)
}

#[test]
fn synthetic_dataset_evaluates_and_reloads() -> Result<()> {
    let dir = tempdir()?;
    let scene = synthetic_scene()?;
    let paths = write_dataset(&scene, dir.path(), "run_0001")?;
    let config = correspondence_config(&scene);

    let mut session = EvaluationSession::<ReconstructionEvaluation>::new();
    session.set_config(config.clone())?;
    run_evaluation(&mut session, paths.clone())?;
    let report = session.require_output()?.clone();

    assert_eq!(report.dataset, "synthetic");
    assert_eq!(report.matching.reference, 15);
    assert_eq!(report.matching.reconstructed, 12);
    assert_eq!(report.matching.matched, 12);
    assert!((report.matching.reconstruction_rate().unwrap() - 0.8).abs() < 1e-12);

    assert!((report.scale.factor() - 0.25).abs() < 1e-9);
    assert_eq!(report.scale.estimate.outliers, 0);

    let cameras = report.cameras.get().expect("camera metrics available");
    assert_eq!(cameras.position.count, 12);
    assert!(cameras.position.max < 1e-7, "{:?}", cameras.position);
    assert!(cameras.orientation_deg.max < 1e-5, "{:?}", cameras.orientation_deg);
    assert_eq!(cameras.position_outliers, 0);
    assert_eq!(cameras.orientation_outliers, 0);

    assert!(report.fine_registration.reason().is_some());
    let mesh = report.mesh.get().expect("mesh metrics available");
    assert!(mesh.fine.is_none());
    assert!(mesh.global.relative_error.volume.abs() < 1e-6);
    assert!(mesh.global.relative_error.surface_area.abs() < 1e-6);

    let evaluation = &paths.evaluation_dir;
    for file in [
        SCALE_REPORT_FILE,
        SESSION_FILE,
        SUMMARY_FILE,
        "GlobalTransformationMatrix.txt",
        "CamerasExtrinsicsStatic.json",
        "CamerasExtrinsicsDynamic.json",
        "Manifest.json",
    ] {
        assert!(evaluation.join(file).is_file(), "missing {file}");
    }

    // A second run reuses the persisted stages.
    let mut rerun = EvaluationSession::<ReconstructionEvaluation>::new();
    rerun.set_config(config)?;
    run_evaluation(&mut rerun, paths)?;
    let scale_entry = rerun
        .log
        .iter()
        .find(|e| e.operation == "estimate_scale")
        .expect("scale step logged");
    assert!(
        scale_entry.notes.as_deref().is_some_and(|n| n.starts_with("reloaded")),
        "{scale_entry:?}"
    );
    let again = rerun.require_output()?;
    assert!((again.scale.factor() - report.scale.factor()).abs() < 1e-12);
    let again_cameras = again.cameras.get().expect("camera metrics available");
    assert_eq!(again_cameras.position.count, 12);
    assert!(again_cameras.position.max < 1e-7);
    Ok(())
}

#[test]
fn unsolvable_reconstruction_fails_scale() -> Result<()> {
    let dir = tempdir()?;
    let spec = SceneSpec {
        unsolved_timesteps: vec![1, 2, 3, 4, 5],
        ..SceneSpec::default()
    };
    let scene = build_scene(&spec, asymmetric_mesh())?;
    let paths = write_dataset(&scene, dir.path(), "run_0002")?;

    let mut session = EvaluationSession::<ReconstructionEvaluation>::new();
    let err = run_evaluation(&mut session, paths.clone()).unwrap_err();
    assert!(format!("{err:#}").contains("scale undetermined"), "{err:#}");
    assert!(session.log.iter().any(|e| !e.success && e.operation == "estimate_scale"));
    assert!(paths.in_evaluation_dir(SESSION_FILE).is_file());
    Ok(())
}

#[test]
fn parameter_study_records_each_dataset() -> Result<()> {
    let dir = tempdir()?;
    let scene = synthetic_scene()?;
    write_dataset(&scene, dir.path(), "run_0001")?;
    fs::write(
        dir.path().join(PARAMETER_SET_FILE),
        "output_dir,image_dir,obj_path\n\
         out/run_0001,renders/run_0001,objects/asymmetric.obj\n\
         out/missing,renders/missing,objects/asymmetric.obj\n",
    )?;

    let study = run_parameter_study(dir.path(), &correspondence_config(&scene))?;
    assert_eq!(study.rows().len(), 2);
    assert_eq!(study.failures(), 1);
    let good = &study.rows()[0];
    assert!((good.reconstruction_rate.unwrap() - 0.8).abs() < 1e-12);
    assert!((good.scale_median.unwrap() - 0.25).abs() < 1e-9);
    assert_eq!(good.position_outliers, Some(0));
    assert!(good.c2m_mean_after_icp.is_none());
    assert!(study.rows()[1].error.is_some());

    let written = fs::read_to_string(dir.path().join(STUDY_RESULTS_FILE))?;
    assert_eq!(written.lines().count(), 3);
    Ok(())
}

#[test]
fn changed_registration_settings_force_recompute() -> Result<()> {
    let dir = tempdir()?;
    let scene = synthetic_scene()?;
    let paths = write_dataset(&scene, dir.path(), "run_0003")?;
    let config = correspondence_config(&scene);

    let first = evaluate(&paths, &config)?;
    assert_eq!(step_notes(&first, "global_registration"), "available");
    let again = evaluate(&paths, &config)?;
    assert_eq!(step_notes(&again, "global_registration"), "reloaded");

    let mut changed = config.clone();
    changed.global_registration.voxel_size = 0.01;
    let recomputed = evaluate(&paths, &changed)?;
    assert!(step_notes(&recomputed, "estimate_scale").starts_with("reloaded"));
    assert_eq!(step_notes(&recomputed, "global_registration"), "available");
    let reloaded = evaluate(&paths, &changed)?;
    assert_eq!(step_notes(&reloaded, "global_registration"), "reloaded");
    Ok(())
}

/// Stand-in for CloudCompare: writes a two-line distance log, an identity
/// ICP matrix and a copy of the input mesh.
#[cfg(unix)]
const FAKE_CLOUDCOMPARE: &str = r#"#!/bin/sh
log=""; mesh=""
while [ $# -gt 0 ]; do
  case "$1" in
    -LOG_FILE) log="$2"; shift ;;
    -O) if [ -z "$mesh" ]; then mesh="$2"; fi; shift ;;
  esac
  shift
done
out="$(dirname "$mesh")/$(basename "$mesh" .obj)_TRANSFORMED_C2M_DIST"
printf '[C2M] Mean distance = 0.0125 / std deviation = 0.004\n' > "$log"
printf '[C2M] Mean distance = 0.0003 / std deviation = 0.0002\n' >> "$log"
printf '1 0 0 0\n0 1 0 0\n0 0 1 0\n0 0 0 1\n' > "${out}_REGISTRATION_MATRIX.txt"
cp "$mesh" "${out}_REGISTERED_C2M_DIST.obj"
"#;

#[cfg(unix)]
#[test]
fn corrupt_fine_registration_is_recomputed() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir()?;
    let scene = synthetic_scene()?;
    let paths = write_dataset(&scene, dir.path(), "run_0004")?;
    let tool = dir.path().join("fake_cloudcompare.sh");
    fs::write(&tool, FAKE_CLOUDCOMPARE)?;
    fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))?;
    let mut config = correspondence_config(&scene);
    config.fine_registration.cloudcompare = Some(tool);

    let first = evaluate(&paths, &config)?;
    let fine = first.require_output()?.fine_registration.get().expect("fine registration ran");
    assert!((fine.after.mean - 0.0003).abs() < 1e-12);

    let matrix = paths.in_evaluation_dir(TRANSFORMATION_MATRIX_FILE);
    fs::write(&matrix, "not a matrix\n")?;
    let rerun = evaluate(&paths, &config)?;
    let fine = rerun.require_output()?.fine_registration.get().expect("fine registration ran");
    assert!((fine.before.mean - 0.0125).abs() < 1e-12);
    assert!((read_matrix(&matrix)? - fine.combined).abs().max() < 1e-12);
    Ok(())
}
