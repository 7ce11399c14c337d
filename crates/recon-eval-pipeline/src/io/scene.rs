//! Renderer scene parameters (`params.json`).

use std::path::Path;

use anyhow::{Context, Result, ensure};
use recon_eval_core::{Real, Vec3};
use serde::{Deserialize, Serialize};

/// Camera rig settings. Unknown keys of the renderer file are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigParameters {
    /// Point every camera looks at (metres).
    pub focuspoint: [Real; 3],
    /// Sensor width and height (mm).
    #[serde(default)]
    pub sensor_size: Option<[Real; 2]>,
    /// Focal length (mm).
    #[serde(default)]
    pub focal_length: Option<Real>,
    /// Camera distance from the focus point (metres).
    #[serde(default)]
    pub distance: Option<Real>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneIo {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneParameters {
    pub cam: RigParameters,
    #[serde(default)]
    pub io: SceneIo,
}

impl SceneParameters {
    pub fn focus(&self) -> Vec3 {
        Vec3::from(self.cam.focuspoint)
    }

    /// Scene name, falling back to `fallback` when the renderer left it out.
    pub fn name_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.io.name.as_deref().unwrap_or(fallback)
    }
}

pub fn read_scene_parameters(path: &Path) -> Result<SceneParameters> {
    let params: SceneParameters = super::read_json(path)?;
    ensure!(
        params.cam.focuspoint.iter().all(|v| v.is_finite()),
        "focus point in {} is not finite",
        path.display()
    );
    Ok(params)
}

/// Scene parameters next to the rendered images.
pub fn load_scene_parameters(image_dir: &Path) -> Result<SceneParameters> {
    let path = image_dir.join(super::SCENE_PARAMETERS_FILE);
    read_scene_parameters(&path).context("scene parameters are required to place the focus point")
}
