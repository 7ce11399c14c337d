//! Camera extrinsics export and the evaluation manifest.

use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use recon_eval_core::{CameraReference, Mat4, Real, SceneFrame, decompose, rotation_to_euler};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use super::{EXTRINSICS_DYNAMIC_FILE, EXTRINSICS_STATIC_FILE, MANIFEST_FILE};

/// One camera in the renderer's placement format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraExtrinsics {
    pub name: String,
    pub image: String,
    pub x_m: Real,
    pub y_m: Real,
    pub z_m: Real,
    pub theta_x: Real,
    pub theta_y: Real,
    pub theta_z: Real,
}

impl CameraExtrinsics {
    /// From a world transform in the evaluation camera convention; `theta_x`
    /// gains `π` to return to the renderer's camera convention.
    pub fn from_transform(name: String, image: String, t: &Mat4) -> Result<Self> {
        let parts = decompose(t)?;
        let euler = rotation_to_euler(&parts.rotation);
        Ok(Self {
            name,
            image,
            x_m: parts.location.x,
            y_m: parts.location.y,
            z_m: parts.location.z,
            theta_x: euler.x + PI,
            theta_y: euler.y,
            theta_z: euler.z,
        })
    }
}

/// Cameras keyed `camera1`, `camera2`, ... in list order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtrinsicsFile(pub Vec<CameraExtrinsics>);

impl Serialize for ExtrinsicsFile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for cam in &self.0 {
            map.serialize_entry(&cam.name, cam)?;
        }
        map.end()
    }
}

pub fn extrinsics_file_name(frame: SceneFrame) -> &'static str {
    match frame {
        SceneFrame::Static => EXTRINSICS_STATIC_FILE,
        SceneFrame::Dynamic => EXTRINSICS_DYNAMIC_FILE,
    }
}

/// Write every reference camera's pose in `frame` to the evaluation directory.
pub fn export_camera_extrinsics(
    cameras: &[CameraReference],
    frame: SceneFrame,
    evaluation_dir: &Path,
) -> Result<PathBuf> {
    let entries = cameras
        .iter()
        .enumerate()
        .map(|(i, cam)| {
            CameraExtrinsics::from_transform(
                format!("camera{}", i + 1),
                cam.image.clone(),
                &cam.transform(frame),
            )
            .with_context(|| format!("camera {}", cam.image))
        })
        .collect::<Result<Vec<_>>>()?;
    let path = evaluation_dir.join(extrinsics_file_name(frame));
    super::write_json(&path, &ExtrinsicsFile(entries))?;
    Ok(path)
}

/// Which dataset an evaluation directory belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub image_dir: PathBuf,
    pub object_path: PathBuf,
    pub reconstruction_dir: PathBuf,
    pub evaluation_dir: PathBuf,
    pub created_at: u64,
}

impl Manifest {
    pub fn path_in(evaluation_dir: &Path) -> PathBuf {
        evaluation_dir.join(MANIFEST_FILE)
    }

    pub fn write(&self) -> Result<PathBuf> {
        let path = Self::path_in(&self.evaluation_dir);
        super::write_json(&path, self)?;
        Ok(path)
    }

    pub fn read(evaluation_dir: &Path) -> Result<Self> {
        super::read_json(&Self::path_in(evaluation_dir))
    }

    /// Whether this manifest describes the same dataset.
    pub fn same_dataset(&self, other: &Self) -> bool {
        self.image_dir == other.image_dir
            && self.object_path == other.object_path
            && self.reconstruction_dir == other.reconstruction_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_eval_core::Vec3;
    use tempfile::tempdir;

    #[test]
    fn extrinsics_restore_renderer_angles() {
        let dir = tempdir().unwrap();
        let euler = Vec3::new(1.2, 0.0, 0.4);
        let cams = vec![
            CameraReference::new("0001.png", Vec3::new(0.6, 0.0, 1.2), euler, 1, 0),
            CameraReference::new("0002.png", Vec3::new(0.0, 0.6, 1.2), euler, 1, 1),
        ];
        let path = export_camera_extrinsics(&cams, SceneFrame::Static, dir.path()).unwrap();
        assert!(path.ends_with(EXTRINSICS_STATIC_FILE));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let cam = &json["camera2"];
        assert_eq!(cam["image"], "0002.png");
        assert!((cam["y_m"].as_f64().unwrap() - 0.6).abs() < 1e-12);
        // Renderer angle plus the +π flip applied on import and on export.
        let theta_x = cam["theta_x"].as_f64().unwrap();
        let wrapped = (theta_x - euler.x).rem_euclid(2.0 * PI);
        assert!(wrapped.abs() < 1e-9 || (wrapped - 2.0 * PI).abs() < 1e-9, "{theta_x}");
        assert!((cam["theta_z"].as_f64().unwrap() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn manifest_roundtrip() {
        let dir = tempdir().unwrap();
        let manifest = Manifest {
            image_dir: "renders/run_0001".into(),
            object_path: "objects/cube.obj".into(),
            reconstruction_dir: "out/run_0001".into(),
            evaluation_dir: dir.path().to_path_buf(),
            created_at: 1,
        };
        manifest.write().unwrap();
        let back = Manifest::read(dir.path()).unwrap();
        assert_eq!(back, manifest);
        assert!(back.same_dataset(&manifest));
    }
}
