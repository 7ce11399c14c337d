//! Fine registration through CloudCompare's command line.
//!
//! CloudCompare loads the reconstructed mesh, applies `T_global`, computes
//! the cloud-to-mesh distance to ground truth, refines with ICP and computes
//! the distance again. Its registration matrix `T_ICP` and the two distance
//! lines of its log are the results; `T = T_ICP · T_global`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use recon_eval_core::{Mat4, Real};
use serde::{Deserialize, Serialize};

use crate::EvalError;
use crate::external::{ExternalCommand, run_checked};
use crate::io::{
    CLOUDCOMPARE_LOG_FILE, GLOBAL_MATRIX_FILE, ICP_MATRIX_FILE, TRANSFORMATION_MATRIX_FILE,
    read_matrix, write_matrix,
};

const MEAN_MARKER: &str = "Mean distance =";
const STD_MARKER: &str = "std deviation =";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FineRegistrationConfig {
    /// CloudCompare executable; fine registration is skipped without it.
    pub cloudcompare: Option<PathBuf>,
    pub silent: bool,
    /// Also save both meshes into one CloudCompare bundle.
    pub save_meshes_all_at_once: bool,
    /// Let ICP estimate a scale correction.
    pub adjust_scale: bool,
    /// Export format of the registered mesh.
    pub mesh_format: String,
    pub min_error_diff: Real,
}

impl Default for FineRegistrationConfig {
    fn default() -> Self {
        Self {
            cloudcompare: None,
            silent: true,
            save_meshes_all_at_once: false,
            adjust_scale: false,
            mesh_format: "obj".to_string(),
            min_error_diff: 1e-7,
        }
    }
}

/// Cloud-to-mesh distance summary parsed from the log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct C2mDistance {
    pub mean: Real,
    pub std: Real,
}

/// Result of the CloudCompare stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineRegistration {
    /// `T_ICP`.
    pub icp: Mat4,
    /// `T = T_ICP · T_global`.
    pub combined: Mat4,
    /// Distance after `T_global`, before ICP.
    pub before: C2mDistance,
    /// Distance after ICP; the primary accuracy metric.
    pub after: C2mDistance,
    pub registered_mesh: PathBuf,
    pub log: PathBuf,
}

/// Files of one CloudCompare run inside the evaluation directory.
///
/// CloudCompare writes its outputs next to the first loaded mesh, so the
/// reconstructed mesh must already live in the evaluation directory.
#[derive(Debug, Clone)]
pub struct CloudCompareJob {
    pub evaluation_dir: PathBuf,
    pub reconstructed_mesh: PathBuf,
    pub ground_truth_mesh: PathBuf,
}

impl CloudCompareJob {
    fn stem(&self) -> String {
        self.reconstructed_mesh
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mesh".to_string())
    }

    pub fn initial_transform(&self) -> PathBuf {
        self.evaluation_dir.join(GLOBAL_MATRIX_FILE)
    }

    pub fn log(&self) -> PathBuf {
        self.evaluation_dir.join(CLOUDCOMPARE_LOG_FILE)
    }

    fn console_log(&self) -> PathBuf {
        self.evaluation_dir.join("log_CloudCompare_console.txt")
    }

    /// Mesh as saved by CloudCompare, and its final name.
    fn registered_mesh(&self, format: &str) -> (PathBuf, PathBuf) {
        let stem = self.stem();
        (
            self.evaluation_dir
                .join(format!("{stem}_TRANSFORMED_C2M_DIST_REGISTERED_C2M_DIST.{format}")),
            self.evaluation_dir.join(format!("{stem}_TRANSFORMED.{format}")),
        )
    }

    /// Registration matrix as saved by CloudCompare, and its final name.
    fn icp_matrix(&self) -> (PathBuf, PathBuf) {
        (
            self.evaluation_dir.join(format!(
                "{}_TRANSFORMED_C2M_DIST_REGISTRATION_MATRIX.txt",
                self.stem()
            )),
            self.evaluation_dir.join(ICP_MATRIX_FILE),
        )
    }
}

/// Build the CloudCompare command line for `job`.
pub fn cloudcompare_command(
    executable: &Path,
    job: &CloudCompareJob,
    config: &FineRegistrationConfig,
) -> ExternalCommand {
    let min_error = format!("{:e}", config.min_error_diff);
    let mut cmd = ExternalCommand::new("CloudCompare", executable)
        .args(["-AUTO_SAVE", "OFF", "-LOG_FILE"])
        .arg(job.log())
        .args(["-NO_TIMESTAMP", "-O"])
        .arg(&job.reconstructed_mesh)
        .arg("-APPLY_TRANS")
        .arg(job.initial_transform())
        .arg("-O")
        .arg(&job.ground_truth_mesh)
        .args(["-CLEAR_NORMALS", "-C2M_DIST", "-ICP", "-MIN_ERROR_DIFF"])
        .arg(&min_error)
        .args(["-AUTO_SAVE", "ON", "-C2M_DIST"]);
    if config.silent {
        cmd.insert_arg(0, "-SILENT");
    }
    if config.save_meshes_all_at_once {
        cmd = cmd.args(["-SAVE_MESHES", "ALL_AT_ONCE"]);
    }
    cmd = cmd
        .args(["-POP_MESHES", "-M_EXPORT_FMT"])
        .arg(&config.mesh_format)
        .arg("-SAVE_MESHES");
    if config.adjust_scale {
        if let Some(at) = cmd.position(&min_error) {
            cmd.insert_arg(at + 1, "-ADJUST_SCALE");
        }
    }
    cmd
}

/// Every `Mean distance = <f> / std deviation = <f>` line, in log order.
pub fn parse_c2m_distances(log: &str) -> Vec<C2mDistance> {
    log.lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once(MEAN_MARKER)?;
            let (mean, rest) = rest.split_once('/')?;
            let (_, std) = rest.split_once(STD_MARKER)?;
            let std = std.split_whitespace().next()?;
            Some(C2mDistance {
                mean: mean.trim().parse().ok()?,
                std: std.parse().ok()?,
            })
        })
        .collect()
}

/// Distances before and after ICP from CloudCompare's log.
///
/// A log without both distance lines means the run did not finish, whatever
/// its exit code.
fn distances_from_log(
    path: &Path,
    exit_code: Option<i32>,
) -> Result<(C2mDistance, C2mDistance)> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let distances = parse_c2m_distances(&text);
    match distances.as_slice() {
        &[before, after] => Ok((before, after)),
        &[before, .., after] => {
            log::warn!(
                "{} has more than 2 cloud-to-mesh distance lines, using the first and last",
                path.display()
            );
            Ok((before, after))
        }
        found => {
            let failure = EvalError::ExternalToolFailure {
                tool: "CloudCompare".to_string(),
                exit_code,
                log: path.to_path_buf(),
            };
            Err(anyhow::Error::new(failure).context(format!(
                "{} has {} cloud-to-mesh distance lines, expected 2",
                path.display(),
                found.len()
            )))
        }
    }
}

/// Run CloudCompare seeded with `t_global` and collect its results.
///
/// Writes `GlobalTransformationMatrix.txt` (the seed),
/// `ICPTransformationMatrix.txt` and `TransformationMatrix.txt`.
pub fn fine_registration(
    executable: &Path,
    job: &CloudCompareJob,
    t_global: &Mat4,
    config: &FineRegistrationConfig,
) -> Result<FineRegistration> {
    ensure!(
        job.reconstructed_mesh.parent() == Some(job.evaluation_dir.as_path()),
        "reconstructed mesh {} must be inside {}",
        job.reconstructed_mesh.display(),
        job.evaluation_dir.display()
    );
    write_matrix(&job.initial_transform(), t_global)?;

    let (saved_mesh, registered_mesh) = job.registered_mesh(&config.mesh_format);
    let (saved_icp, icp_path) = job.icp_matrix();
    let cmd = cloudcompare_command(executable, job, config);
    let run = run_checked(&cmd, &job.console_log(), &[saved_mesh.clone(), saved_icp.clone()])?;
    let (before, after) = distances_from_log(&job.log(), run.exit_code)?;

    fs::rename(&saved_mesh, &registered_mesh)
        .with_context(|| format!("failed to rename {}", saved_mesh.display()))?;
    fs::rename(&saved_icp, &icp_path)
        .with_context(|| format!("failed to rename {}", saved_icp.display()))?;

    let icp = read_matrix(&icp_path)?;
    let combined = icp * t_global;
    write_matrix(&job.evaluation_dir.join(TRANSFORMATION_MATRIX_FILE), &combined)?;
    log::info!(
        "fine registration done: C2M mean {:.6} -> {:.6}",
        before.mean,
        after.mean
    );
    Ok(FineRegistration {
        icp,
        combined,
        before,
        after,
        registered_mesh,
        log: job.log(),
    })
}

/// Reload a previous run's results, if all of its files exist.
pub fn load_fine_registration(
    job: &CloudCompareJob,
    config: &FineRegistrationConfig,
) -> Result<Option<FineRegistration>> {
    let (_, registered_mesh) = job.registered_mesh(&config.mesh_format);
    let (_, icp_path) = job.icp_matrix();
    let total = job.evaluation_dir.join(TRANSFORMATION_MATRIX_FILE);
    if ![&icp_path, &total, &job.log()].iter().all(|p| p.is_file()) {
        return Ok(None);
    }
    let (before, after) = distances_from_log(&job.log(), None)?;
    Ok(Some(FineRegistration {
        icp: read_matrix(&icp_path)?,
        combined: read_matrix(&total)?,
        before,
        after,
        registered_mesh,
        log: job.log(),
    }))
}
