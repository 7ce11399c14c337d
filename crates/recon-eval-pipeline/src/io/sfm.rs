//! Reconstruction engine pose file (`cameras.sfm`).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use recon_eval_core::{CameraReconstructed, Mat3, Real, Vec3};
use serde::{Deserialize, Serialize};

use crate::EvalError;

/// The engine writes numbers and ids either as JSON numbers or as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SfmScalar {
    Number(serde_json::Number),
    Text(String),
}

impl SfmScalar {
    pub fn as_real(&self) -> Result<Real> {
        match self {
            Self::Number(n) => n.as_f64().context("number out of range"),
            Self::Text(s) => s
                .trim()
                .parse()
                .with_context(|| format!("not a number: {s:?}")),
        }
    }

    /// Identifier text, without any numeric reformatting.
    pub fn key(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SfmView {
    view_id: SfmScalar,
    path: String,
}

#[derive(Debug, Deserialize)]
struct SfmTransform {
    rotation: Vec<SfmScalar>,
    center: Vec<SfmScalar>,
}

#[derive(Debug, Deserialize)]
struct SfmPoseBody {
    transform: SfmTransform,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SfmPose {
    pose_id: SfmScalar,
    pose: SfmPoseBody,
}

#[derive(Debug, Deserialize)]
struct SfmFile {
    #[serde(default)]
    views: Vec<SfmView>,
    #[serde(default)]
    poses: Vec<SfmPose>,
}

/// `<reconstruction>/MeshroomCache/StructureFromMotion/<first node>/cameras.sfm`.
///
/// Node folders are visited in name order.
pub fn find_sfm_file(reconstruction_dir: &Path) -> Result<PathBuf, EvalError> {
    let root = reconstruction_dir
        .join("MeshroomCache")
        .join("StructureFromMotion");
    let mut nodes: Vec<PathBuf> = fs::read_dir(&root)
        .map_err(|_| EvalError::missing("structure-from-motion cache", &root))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    nodes.sort();
    let file = nodes
        .first()
        .map(|node| node.join("cameras.sfm"))
        .ok_or_else(|| EvalError::missing("structure-from-motion node", &root))?;
    if !file.is_file() {
        return Err(EvalError::missing("camera pose file", file));
    }
    Ok(file)
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn parse_vector(values: &[SfmScalar], len: usize, what: &str) -> Result<Vec<Real>> {
    ensure!(
        values.len() == len,
        "{what} has {} entries, expected {len}",
        values.len()
    );
    values.iter().map(SfmScalar::as_real).collect()
}

/// Parse solved cameras from an sfm document.
///
/// The identity key is the file name of the view's image path. Poses
/// without a view are skipped with a warning.
pub fn parse_sfm(json: &str) -> Result<Vec<CameraReconstructed>> {
    let sfm: SfmFile = serde_json::from_str(json).context("invalid sfm document")?;
    let images: HashMap<String, &str> = sfm
        .views
        .iter()
        .map(|v| (v.view_id.key(), file_name(&v.path)))
        .collect();

    let mut cameras = Vec::with_capacity(sfm.poses.len());
    for pose in &sfm.poses {
        let id = pose.pose_id.key();
        let Some(image) = images.get(&id) else {
            log::warn!("pose {id} has no matching view, skipped");
            continue;
        };
        let t = &pose.pose.transform;
        let r = parse_vector(&t.rotation, 9, "rotation").with_context(|| format!("pose {id}"))?;
        let c = parse_vector(&t.center, 3, "center").with_context(|| format!("pose {id}"))?;
        cameras.push(CameraReconstructed::new(
            *image,
            Vec3::new(c[0], c[1], c[2]),
            Mat3::from_row_slice(&r),
        ));
    }
    if cameras.iter().any(|c| !c.center.iter().all(|v| v.is_finite())) {
        bail!("sfm document contains non-finite camera centres");
    }
    Ok(cameras)
}

pub fn read_sfm(path: &Path) -> Result<Vec<CameraReconstructed>> {
    let json =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_sfm(&json).with_context(|| format!("failed to parse {}", path.display()))
}

/// Solved cameras of a reconstruction run.
///
/// A missing pose file is a failed reconstruction, not an error: it is logged
/// and yields an empty list.
pub fn load_reconstructed_cameras(reconstruction_dir: &Path) -> Result<Vec<CameraReconstructed>> {
    match find_sfm_file(reconstruction_dir) {
        Ok(path) => read_sfm(&path),
        Err(err) => {
            log::warn!("{err}; treating {} as unsolved", reconstruction_dir.display());
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SFM: &str = r#"{
        "version": ["1", "2", "4"],
        "views": [
            {"viewId": "101", "poseId": "101", "path": "/data/renders/0001.png"},
            {"viewId": 102, "poseId": 102, "path": "C:\\renders\\0002.png"}
        ],
        "poses": [
            {"poseId": "102", "pose": {"transform": {
                "rotation": ["1", "0", "0", "0", "0", "-1", "0", "1", "0"],
                "center": ["0.5", "-1.25", "2"]}, "locked": "0"}},
            {"poseId": 101, "pose": {"transform": {
                "rotation": [1, 0, 0, 0, 1, 0, 0, 0, 1],
                "center": [0, 0, 0]}}},
            {"poseId": "999", "pose": {"transform": {
                "rotation": [1, 0, 0, 0, 1, 0, 0, 0, 1],
                "center": [0, 0, 0]}}}
        ]
    }"#;

    #[test]
    fn parses_string_and_number_fields() {
        let cams = parse_sfm(SFM).unwrap();
        assert_eq!(cams.len(), 2);
        assert_eq!(cams[0].image, "0002.png");
        assert_eq!(cams[1].image, "0001.png");
        assert!((cams[0].center - Vec3::new(0.5, -1.25, 2.0)).norm() < 1e-12);
        // Row-major: second row is (0, 0, -1).
        assert!((cams[0].rotation[(1, 2)] + 1.0).abs() < 1e-12);
        assert!((cams[0].rotation[(2, 1)] - 1.0).abs() < 1e-12);
        assert!(cams.iter().all(|c| c.timestep.is_none()));
    }

    #[test]
    fn wrong_rotation_length_fails() {
        let bad = r#"{
            "views": [{"viewId": "1", "path": "0001.png"}],
            "poses": [{"poseId": "1", "pose": {"transform": {
                "rotation": ["1", "0", "0"], "center": ["0", "0", "0"]}}}]
        }"#;
        assert!(parse_sfm(bad).is_err());
    }

    #[test]
    fn first_node_folder_is_used() {
        let dir = tempdir().unwrap();
        let sfm_root = dir.path().join("MeshroomCache/StructureFromMotion");
        for node in ["b2", "a1"] {
            fs::create_dir_all(sfm_root.join(node)).unwrap();
        }
        fs::write(sfm_root.join("a1/cameras.sfm"), SFM).unwrap();
        let found = find_sfm_file(dir.path()).unwrap();
        assert!(found.ends_with("a1/cameras.sfm"));
        assert_eq!(load_reconstructed_cameras(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn missing_pose_file_yields_no_cameras() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            find_sfm_file(dir.path()),
            Err(EvalError::MissingPrerequisite { .. })
        ));
        assert!(load_reconstructed_cameras(dir.path()).unwrap().is_empty());
    }
}
