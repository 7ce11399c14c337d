//! File formats exchanged with the renderer, the reconstruction engine and
//! CloudCompare, plus the files the evaluation persists.

mod exports;
mod matrix;
mod obj;
mod scene;
mod sfm;
mod tables;

pub use exports::*;
pub use matrix::*;
pub use obj::*;
pub use scene::*;
pub use sfm::*;
pub use tables::*;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};

// Renderer outputs, inside the image directory.
pub const REFERENCE_CAMERAS_FILE: &str = "CameraPositioningInMeters.csv";
pub const OBJECT_POSES_FILE: &str = "ObjectPositioningInMeters.csv";
pub const SCENE_PARAMETERS_FILE: &str = "params.json";

// Reconstruction engine outputs, inside the reconstruction directory.
pub const RECONSTRUCTED_MESH_FILE: &str = "texturedMesh.obj";

// Evaluation outputs, inside the evaluation directory.
pub const EVALUATION_DIR: &str = "Evaluation";
pub const SESSION_FILE: &str = "EvaluationSession.json";
pub const MANIFEST_FILE: &str = "Manifest.json";
pub const SCALE_REPORT_FILE: &str = "ScaleReport.json";
pub const GLOBAL_REGISTRATION_FILE: &str = "GlobalRegistration.json";
pub const GLOBAL_MATRIX_FILE: &str = "GlobalTransformationMatrix.txt";
pub const ICP_MATRIX_FILE: &str = "ICPTransformationMatrix.txt";
pub const TRANSFORMATION_MATRIX_FILE: &str = "TransformationMatrix.txt";
pub const CLOUDCOMPARE_LOG_FILE: &str = "log_CloudCompare.txt";
pub const EXTRINSICS_STATIC_FILE: &str = "CamerasExtrinsicsStatic.json";
pub const EXTRINSICS_DYNAMIC_FILE: &str = "CamerasExtrinsicsDynamic.json";
pub const SUMMARY_FILE: &str = "EvaluationSummary.csv";

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}
