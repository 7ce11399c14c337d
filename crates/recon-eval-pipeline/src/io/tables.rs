//! Renderer pose tables.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use recon_eval_core::{CameraReference, ObjectPose, ObjectTrajectory, Real, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct CameraRow {
    #[serde(rename = "ImageFileName")]
    image: String,
    #[serde(rename = "TimeStep")]
    timestep: Real,
    #[serde(rename = "PositionX")]
    x: Real,
    #[serde(rename = "PositionY")]
    y: Real,
    #[serde(rename = "PositionZ")]
    z: Real,
    #[serde(rename = "RotationEulerX")]
    rx: Real,
    #[serde(rename = "RotationEulerY")]
    ry: Real,
    #[serde(rename = "RotationEulerZ")]
    rz: Real,
}

#[derive(Debug, Deserialize)]
struct ObjectRow {
    #[serde(rename = "TimeStep")]
    timestep: Real,
    #[serde(rename = "PositionX")]
    x: Real,
    #[serde(rename = "PositionY")]
    y: Real,
    #[serde(rename = "PositionZ")]
    z: Real,
    #[serde(rename = "RotationEulerX")]
    rx: Real,
    #[serde(rename = "RotationEulerY")]
    ry: Real,
    #[serde(rename = "RotationEulerZ")]
    rz: Real,
}

/// Deserialize every row of a headed CSV file, trimming whitespace.
pub fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    reader
        .deserialize()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("{}: bad row {}", path.display(), i + 1)))
        .collect()
}

/// Write `rows` under a header derived from `T`'s field names.
///
/// `None` fields become empty cells.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Shift raw renderer frame numbers so `first` maps to timestep 1.
fn renormalize(raw: Real, first: Real) -> Result<u32> {
    let shifted = raw - first + 1.0;
    if !shifted.is_finite() || shifted.fract() != 0.0 || shifted < 1.0 {
        bail!("time step {raw} cannot be renormalized against {first}");
    }
    Ok(shifted as u32)
}

/// Read the reference camera table.
///
/// Timesteps are shifted so the first row is timestep 1. Each camera's slot
/// is its position within its timestep group.
pub fn read_reference_cameras(path: &Path) -> Result<Vec<CameraReference>> {
    let rows: Vec<CameraRow> = read_rows(path)?;
    let Some(first) = rows.first().map(|r| r.timestep) else {
        bail!("{} contains no cameras", path.display());
    };

    let mut slots: BTreeMap<u32, usize> = BTreeMap::new();
    let mut cameras = Vec::with_capacity(rows.len());
    for row in rows {
        let timestep = renormalize(row.timestep, first)
            .with_context(|| format!("camera {}", row.image))?;
        let slot = slots.entry(timestep).or_default();
        cameras.push(CameraReference::new(
            row.image,
            Vec3::new(row.x, row.y, row.z),
            Vec3::new(row.rx, row.ry, row.rz),
            timestep,
            *slot,
        ));
        *slot += 1;
    }
    log::debug!(
        "read {} reference cameras over {} timesteps from {}",
        cameras.len(),
        slots.len(),
        path.display()
    );
    Ok(cameras)
}

/// Read the object pose table of a moving-object dataset.
///
/// The first row is the motion baseline (timestep 0); the remaining rows are
/// shifted so the second row is timestep 1. A missing file means the object
/// never moved and yields `None`.
pub fn read_object_trajectory(path: &Path) -> Result<Option<ObjectTrajectory>> {
    if !path.exists() {
        log::debug!("no object pose table at {}, static scene", path.display());
        return Ok(None);
    }
    let rows: Vec<ObjectRow> = read_rows(path)?;
    ensure!(
        rows.len() >= 2,
        "{} needs a reference pose and at least one timestep, found {} rows",
        path.display(),
        rows.len()
    );
    let first = rows[1].timestep;
    let mut poses = rows.into_iter().enumerate().map(|(i, row)| -> Result<ObjectPose> {
        let timestep = if i == 0 {
            Ok(0)
        } else {
            renormalize(row.timestep, first)
        }?;
        Ok(ObjectPose::new(
            timestep,
            Vec3::new(row.x, row.y, row.z),
            Vec3::new(row.rx, row.ry, row.rz),
        ))
    });
    let reference = poses
        .next()
        .context("object pose table lost its reference row")??;
    let poses = poses.collect::<Result<Vec<_>>>()?;
    Ok(Some(ObjectTrajectory { reference, poses }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const CAMERAS: &str = "\
ImageFileName,TimeStep,PositionX,PositionY,PositionZ,RotationEulerX,RotationEulerY,RotationEulerZ,ViewDirectionX,ViewDirectionY,ViewDirectionZ
0001.png,7,0.6,0.0,1.15,1.3,0.0,1.57,-1,0,0
0002.png,7,-0.3,0.52,0.9,1.7,0.0,-2.6,1,0,0
0003.png,8,0.6,0.0,1.15,1.3,0.0,1.57,-1,0,0
";

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        value: Option<f64>,
    }

    #[test]
    fn missing_values_are_empty_cells() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        let rows = vec![
            Row { name: "a".into(), value: Some(0.5) },
            Row { name: "b".into(), value: None },
        ];
        write_rows(&path, &rows).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "name,value\na,0.5\nb,\n");
        assert_eq!(read_rows::<Row>(&path).unwrap(), rows);
    }

    #[test]
    fn reference_cameras_renormalize_and_assign_slots() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("CameraPositioningInMeters.csv");
        fs::write(&path, CAMERAS).unwrap();

        let cams = read_reference_cameras(&path).unwrap();
        assert_eq!(cams.len(), 3);
        assert_eq!(
            cams.iter().map(|c| c.timestep).collect::<Vec<_>>(),
            vec![1, 1, 2]
        );
        assert_eq!(cams.iter().map(|c| c.slot).collect::<Vec<_>>(), vec![0, 1, 0]);
        assert_eq!(cams[1].image, "0002.png");
        assert!((cams[1].location - Vec3::new(-0.3, 0.52, 0.9)).norm() < 1e-12);
        assert!(cams.iter().all(|c| c.matched.is_none()));
    }

    #[test]
    fn object_table_keeps_reference_row_at_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ObjectPositioningInMeters.csv");
        fs::write(
            &path,
            "TimeStep,PositionX,PositionY,PositionZ,RotationEulerX,RotationEulerY,RotationEulerZ\n\
             0,0,0,1,0,0,0\n\
             12,0,0,1,0,0,0\n\
             13,0,0,1.02,0,0,0.25\n",
        )
        .unwrap();

        let traj = read_object_trajectory(&path).unwrap().unwrap();
        assert_eq!(traj.reference.timestep, 0);
        assert_eq!(
            traj.poses.iter().map(|p| p.timestep).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!((traj.pose_at(2).unwrap().location.z - 1.02).abs() < 1e-12);
    }

    #[test]
    fn missing_object_table_is_static_scene() {
        let dir = tempdir().unwrap();
        let traj = read_object_trajectory(&dir.path().join("ObjectPositioningInMeters.csv"));
        assert!(traj.unwrap().is_none());
    }

    #[test]
    fn non_integer_timestep_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cams.csv");
        fs::write(
            &path,
            "ImageFileName,TimeStep,PositionX,PositionY,PositionZ,RotationEulerX,RotationEulerY,RotationEulerZ\n\
             a.png,1,0,0,0,0,0,0\n\
             b.png,1.5,0,0,0,0,0,0\n",
        )
        .unwrap();
        assert!(read_reference_cameras(&path).is_err());
    }
}
