//! Camera and object pose entities.
//!
//! Raw fields are fixed once a dataset is loaded. Derived world transforms
//! live in a [`FrameCache`] keyed by [`SceneFrame`] and are computed lazily,
//! at most once per frame.

use std::cell::OnceCell;
use std::f64::consts::PI;

use crate::{
    Axis, Mat3, Mat4, Real, TransformError, Vec3, compose_pose, from_rotation_location, invert,
    rotation_x, translation, translation_part,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Positional tolerance (metres) for the single-axis motion check.
const MOTION_AXIS_TOL: Real = 1e-6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PoseError {
    #[error(
        "object motion at timestep {timestep} is not restricted to the {axis:?} axis: {reason}"
    )]
    UnsupportedObjectMotion {
        timestep: u32,
        axis: Axis,
        reason: String,
    },
    #[error("no object pose recorded for timestep {0}")]
    MissingObjectPose(u32),
    #[error("static frame requires a world transform; register the reconstruction first")]
    MissingWorldTransform,
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Which scene representation a camera transform is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneFrame {
    /// Object moves, camera rig fixed to the world.
    Dynamic,
    /// Object held at its reference pose, all relative motion on the cameras.
    Static,
}

/// Lazily filled world transforms, one slot per [`SceneFrame`].
#[derive(Debug, Clone, Default)]
pub struct FrameCache {
    dynamic: OnceCell<Mat4>,
    static_frame: OnceCell<Mat4>,
}

impl FrameCache {
    fn slot(&self, frame: SceneFrame) -> &OnceCell<Mat4> {
        match frame {
            SceneFrame::Dynamic => &self.dynamic,
            SceneFrame::Static => &self.static_frame,
        }
    }

    pub fn get(&self, frame: SceneFrame) -> Option<Mat4> {
        self.slot(frame).get().copied()
    }

    pub fn get_or_init(&self, frame: SceneFrame, init: impl FnOnce() -> Mat4) -> Mat4 {
        *self.slot(frame).get_or_init(init)
    }

    fn clear(&mut self) {
        self.dynamic.take();
        self.static_frame.take();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reference camera
// ─────────────────────────────────────────────────────────────────────────────

/// Ground-truth camera from the synthetic scene.
#[derive(Debug, Clone)]
pub struct CameraReference {
    /// Identity key shared with the reconstruction.
    pub image: String,
    pub location: Vec3,
    /// Renderer Euler angles (radians), extrinsic XYZ.
    pub euler: Vec3,
    /// 1-based timestep.
    pub timestep: u32,
    /// Position of the camera inside its timestep group; identifies the
    /// physical camera across timesteps.
    pub slot: usize,
    /// Index of the matched reconstructed camera.
    pub matched: Option<usize>,
    frames: FrameCache,
    dyn_to_static: OnceCell<Mat4>,
}

impl CameraReference {
    pub fn new(
        image: impl Into<String>,
        location: Vec3,
        euler: Vec3,
        timestep: u32,
        slot: usize,
    ) -> Self {
        Self {
            image: image.into(),
            location,
            euler,
            timestep,
            slot,
            matched: None,
            frames: FrameCache::default(),
            dyn_to_static: OnceCell::new(),
        }
    }

    /// World transform with the renderer's camera convention flipped about
    /// local X so the camera looks along its local +Z.
    pub fn to_world_transform(&self) -> Mat4 {
        self.frames.get_or_init(SceneFrame::Dynamic, || {
            let corrected = self.euler + Vec3::new(PI, 0.0, 0.0);
            compose_pose(&self.location, &corrected)
        })
    }

    /// Transform in the requested frame.
    ///
    /// Until [`Self::dynamic_to_static_scene`] runs, the static frame equals
    /// the dynamic one.
    pub fn transform(&self, frame: SceneFrame) -> Mat4 {
        match frame {
            SceneFrame::Dynamic => self.to_world_transform(),
            SceneFrame::Static => self
                .frames
                .get(SceneFrame::Static)
                .unwrap_or_else(|| self.to_world_transform()),
        }
    }

    /// Camera pose that would hold had the object stayed at its reference pose.
    ///
    /// `t_obj` is the object's pose at this camera's timestep, `t_obj0` the
    /// reference pose. Object motion must be a translation along `axis` plus a
    /// rotation about it. Returns `T_Dyn2Static`, which is cached; later calls
    /// return the cached mapping.
    pub fn dynamic_to_static_scene(
        &self,
        t_obj: &Mat4,
        t_obj0: &Mat4,
        focus: &Vec3,
        axis: Axis,
    ) -> Result<Mat4, PoseError> {
        if let Some(cached) = self.dyn_to_static.get() {
            return Ok(*cached);
        }
        check_axis_restricted_motion(self.timestep, t_obj, t_obj0, axis)?;

        let mut offset = Vec3::zeros();
        let k = axis.index();
        offset[k] = focus[k] - t_obj0[(k, 3)];
        let t_cam2obj0 = translation(&offset);
        let t_obj_rel_inv = t_obj0 * invert(t_obj)?;
        let dyn_to_static = t_cam2obj0 * t_obj_rel_inv;

        let t_cam = self.to_world_transform();
        self.frames
            .get_or_init(SceneFrame::Static, || dyn_to_static * t_cam);
        Ok(*self.dyn_to_static.get_or_init(|| dyn_to_static))
    }

    /// Cached `T_Dyn2Static`, if motion compensation ran.
    pub fn dyn_to_static(&self) -> Option<Mat4> {
        self.dyn_to_static.get().copied()
    }

    /// Distance from the camera (static frame) to a scene point.
    pub fn distance_to(&self, point: &Vec3) -> Real {
        (translation_part(&self.transform(SceneFrame::Static)) - point).norm()
    }
}

/// Reject object motion that is not a translation along `axis` combined with
/// a rotation about it.
pub fn check_axis_restricted_motion(
    timestep: u32,
    t_obj: &Mat4,
    t_obj0: &Mat4,
    axis: Axis,
) -> Result<(), PoseError> {
    let unsupported = |reason: String| PoseError::UnsupportedObjectMotion {
        timestep,
        axis,
        reason,
    };
    let mut off_axis = translation_part(t_obj) - translation_part(t_obj0);
    off_axis[axis.index()] = 0.0;
    if off_axis.norm() > MOTION_AXIS_TOL {
        return Err(unsupported(format!(
            "translation has off-axis component {:.3e} m",
            off_axis.norm()
        )));
    }
    let r: Mat3 = t_obj.fixed_view::<3, 3>(0, 0) * t_obj0.fixed_view::<3, 3>(0, 0).transpose();
    let u = axis.unit();
    let drift = (r * u - u).norm();
    if drift > MOTION_AXIS_TOL {
        return Err(unsupported(format!(
            "rotation moves the motion axis by {drift:.3e}"
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconstructed camera
// ─────────────────────────────────────────────────────────────────────────────

/// Camera pose solved by the reconstruction engine.
#[derive(Debug, Clone)]
pub struct CameraReconstructed {
    pub image: String,
    /// Camera centre in reconstruction units.
    pub center: Vec3,
    pub rotation: Mat3,
    /// Propagated from the matched reference camera.
    pub timestep: Option<u32>,
    /// Index of the matched reference camera.
    pub matched: Option<usize>,
    frames: FrameCache,
}

impl CameraReconstructed {
    pub fn new(image: impl Into<String>, center: Vec3, rotation: Mat3) -> Self {
        Self {
            image: image.into(),
            center,
            rotation,
            timestep: None,
            matched: None,
            frames: FrameCache::default(),
        }
    }

    /// `[R | c]` in the reconstruction frame.
    pub fn local_pose(&self) -> Mat4 {
        from_rotation_location(&self.rotation, &self.center)
    }

    /// World transform `translate(0, 0, focus.z) · T_ref2world · rotX(180°) · [R | c]`.
    ///
    /// Only the focus height is restored; the horizontal focus offset is part
    /// of the registration. The reconstruction sees the object at rest, so the
    /// result is the static frame. A new registration replaces any previously
    /// cached frames.
    pub fn to_world_transform(&mut self, t_ref2world: &Mat4, focus: &Vec3) -> Mat4 {
        self.frames.clear();
        let lift = translation(&Vec3::new(0.0, 0.0, focus.z));
        let t = lift * t_ref2world * rotation_x(PI) * self.local_pose();
        self.frames.get_or_init(SceneFrame::Static, || t)
    }

    /// Re-express the registered pose with the object moving, through the
    /// matched reference camera's `T_Dyn2Static`.
    pub fn to_dynamic_scene(&self, dyn_to_static: &Mat4) -> Result<Mat4, PoseError> {
        let t_static = self
            .frames
            .get(SceneFrame::Static)
            .ok_or(PoseError::MissingWorldTransform)?;
        let inv = invert(dyn_to_static)?;
        Ok(self
            .frames
            .get_or_init(SceneFrame::Dynamic, || inv * t_static))
    }

    /// Cached transform in `frame`, if computed.
    pub fn transform(&self, frame: SceneFrame) -> Option<Mat4> {
        self.frames.get(frame)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Object poses
// ─────────────────────────────────────────────────────────────────────────────

/// Pose of the tracked object at one timestep.
#[derive(Debug, Clone)]
pub struct ObjectPose {
    /// `0` for the reference pose, 1-based otherwise.
    pub timestep: u32,
    pub location: Vec3,
    pub euler: Vec3,
    world: OnceCell<Mat4>,
}

impl ObjectPose {
    pub fn new(timestep: u32, location: Vec3, euler: Vec3) -> Self {
        Self {
            timestep,
            location,
            euler,
            world: OnceCell::new(),
        }
    }

    pub fn to_world_transform(&self) -> Mat4 {
        *self
            .world
            .get_or_init(|| compose_pose(&self.location, &self.euler))
    }
}

/// Reference pose plus per-timestep poses of a moving object.
#[derive(Debug, Clone)]
pub struct ObjectTrajectory {
    /// Motion baseline.
    pub reference: ObjectPose,
    pub poses: Vec<ObjectPose>,
}

impl ObjectTrajectory {
    pub fn pose_at(&self, timestep: u32) -> Option<&ObjectPose> {
        self.poses.iter().find(|p| p.timestep == timestep)
    }
}

/// Compute the static-frame transform of every reference camera.
///
/// Without a trajectory the scene is static and nothing changes.
pub fn compensate_object_motion(
    cameras: &[CameraReference],
    trajectory: Option<&ObjectTrajectory>,
    focus: &Vec3,
    axis: Axis,
) -> Result<(), PoseError> {
    let Some(trajectory) = trajectory else {
        return Ok(());
    };
    let t_obj0 = trajectory.reference.to_world_transform();
    for cam in cameras {
        let obj = trajectory
            .pose_at(cam.timestep)
            .ok_or(PoseError::MissingObjectPose(cam.timestep))?;
        cam.dynamic_to_static_scene(&obj.to_world_transform(), &t_obj0, focus, axis)?;
    }
    log::debug!(
        "compensated object motion for {} cameras over {} timesteps",
        cameras.len(),
        trajectory.poses.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decompose, euler_rotation, rotation_z, transform_point};
    use nalgebra::Point3;

    fn mat_diff(a: &Mat4, b: &Mat4) -> Real {
        (a - b).abs().max()
    }

    #[test]
    fn reference_camera_looks_down_flipped_axis() {
        let cam = CameraReference::new("a.png", Vec3::new(0.0, 0.0, 2.0), Vec3::zeros(), 1, 0);
        let t = cam.to_world_transform();
        let d = decompose(&t).unwrap();
        // Renderer cameras look along local -Z; after the flip the camera's
        // local +Z points down the world -Z.
        let forward = d.rotation * Vec3::z();
        assert!((forward - Vec3::new(0.0, 0.0, -1.0)).norm() < 1e-12);
        assert_eq!(d.location, Vec3::new(0.0, 0.0, 2.0));
    }

    #[test]
    fn static_frame_defaults_to_dynamic() {
        let cam =
            CameraReference::new("a.png", Vec3::new(1.0, 0.0, 0.5), Vec3::new(0.2, 0.0, 0.3), 1, 0);
        assert_eq!(cam.transform(SceneFrame::Static), cam.transform(SceneFrame::Dynamic));
        assert!(cam.dyn_to_static().is_none());
    }

    #[test]
    fn no_motion_leaves_camera_unchanged() {
        let focus = Vec3::new(0.0, 0.0, 1.0);
        let cam = CameraReference::new(
            "a.png",
            Vec3::new(0.7, -0.2, 1.3),
            Vec3::new(1.2, 0.1, 2.0),
            3,
            1,
        );
        let t_obj0 = compose_pose(&focus, &Vec3::new(0.0, 0.0, 0.4));
        let map = cam
            .dynamic_to_static_scene(&t_obj0, &t_obj0, &focus, Axis::Z)
            .unwrap();
        assert!(mat_diff(&map, &Mat4::identity()) < 1e-12);
        assert!(
            mat_diff(&cam.transform(SceneFrame::Static), &cam.to_world_transform()) < 1e-12
        );
    }

    #[test]
    fn motion_compensation_preserves_camera_to_object_pose() {
        let focus = Vec3::new(0.0, 0.0, 1.0);
        let t_obj0 = compose_pose(&focus, &Vec3::zeros());
        let t_obj = compose_pose(&Vec3::new(0.0, 0.0, 1.35), &Vec3::new(0.0, 0.0, 0.8));
        let cam =
            CameraReference::new("a.png", Vec3::new(0.6, 0.3, 1.1), Vec3::new(1.4, 0.0, 0.5), 2, 0);
        cam.dynamic_to_static_scene(&t_obj, &t_obj0, &focus, Axis::Z)
            .unwrap();

        // The camera seen from the object must not depend on the frame.
        let rel_dynamic = invert(&t_obj).unwrap() * cam.transform(SceneFrame::Dynamic);
        let rel_static = invert(&t_obj0).unwrap() * cam.transform(SceneFrame::Static);
        assert!(mat_diff(&rel_dynamic, &rel_static) < 1e-12);
    }

    #[test]
    fn reference_pose_off_focus_is_aligned_along_motion_axis() {
        let focus = Vec3::new(0.0, 0.0, 1.0);
        let t_obj0 = compose_pose(&Vec3::new(0.0, 0.0, 0.8), &Vec3::zeros());
        let cam = CameraReference::new("a.png", Vec3::new(0.5, 0.0, 1.0), Vec3::zeros(), 1, 0);
        let map = cam
            .dynamic_to_static_scene(&t_obj0, &t_obj0, &focus, Axis::Z)
            .unwrap();
        let shift = translation_part(&map);
        assert!((shift - Vec3::new(0.0, 0.0, 0.2)).norm() < 1e-12);
    }

    #[test]
    fn off_axis_motion_is_rejected() {
        let focus = Vec3::new(0.0, 0.0, 1.0);
        let t_obj0 = compose_pose(&focus, &Vec3::zeros());
        let cam = CameraReference::new("a.png", Vec3::new(0.5, 0.0, 1.0), Vec3::zeros(), 4, 0);

        let shifted = compose_pose(&Vec3::new(0.1, 0.0, 1.2), &Vec3::zeros());
        let err = cam
            .dynamic_to_static_scene(&shifted, &t_obj0, &focus, Axis::Z)
            .unwrap_err();
        assert!(matches!(err, PoseError::UnsupportedObjectMotion { timestep: 4, .. }));

        let tilted = compose_pose(&focus, &Vec3::new(0.3, 0.0, 0.0));
        assert!(cam.dynamic_to_static_scene(&tilted, &t_obj0, &focus, Axis::Z).is_err());
    }

    #[test]
    fn reconstructed_camera_maps_through_registration() {
        let rot = euler_rotation(&Vec3::new(0.1, 0.2, 0.3));
        let mut cam = CameraReconstructed::new("a.png", Vec3::new(1.0, 2.0, 3.0), rot);
        let focus = Vec3::new(0.0, 0.0, 1.0);
        let t = cam.to_world_transform(&Mat4::identity(), &focus);
        let d = decompose(&t).unwrap();
        // rotX(180°) flips y and z of the centre before the focus offset.
        assert!((d.location - Vec3::new(1.0, -2.0, -2.0)).norm() < 1e-12);
        assert_eq!(cam.transform(SceneFrame::Static), Some(t));
        assert!(cam.transform(SceneFrame::Dynamic).is_none());

        let registration = rotation_z(0.5) * crate::scale_transform(2.0);
        let t2 = cam.to_world_transform(&registration, &focus);
        let expected =
            transform_point(&(registration * rotation_x(PI)), &Point3::new(1.0, 2.0, 3.0)).coords
                + focus;
        assert!((translation_part(&t2) - expected).norm() < 1e-12);
    }

    #[test]
    fn world_transform_lifts_to_focus_height_only() {
        let mut cam = CameraReconstructed::new("a.png", Vec3::new(1.0, 2.0, 3.0), Mat3::identity());
        let at_origin = cam.to_world_transform(&Mat4::identity(), &Vec3::zeros());
        let focus = Vec3::new(0.3, -0.2, 1.0);
        let lifted = cam.to_world_transform(&Mat4::identity(), &focus);
        let shift = translation_part(&lifted) - translation_part(&at_origin);
        assert!((shift - Vec3::new(0.0, 0.0, 1.0)).norm() < 1e-12, "{shift}");
        assert_eq!(
            lifted.fixed_view::<3, 3>(0, 0),
            at_origin.fixed_view::<3, 3>(0, 0)
        );
    }

    #[test]
    fn reconstructed_dynamic_frame_inverts_reference_mapping() {
        let mut cam = CameraReconstructed::new("a.png", Vec3::new(0.2, 0.0, 0.5), Mat3::identity());
        assert_eq!(
            cam.to_dynamic_scene(&Mat4::identity()),
            Err(PoseError::MissingWorldTransform)
        );
        let t_static = cam.to_world_transform(&Mat4::identity(), &Vec3::zeros());
        let map = translation(&Vec3::new(0.0, 0.0, -0.3)) * rotation_z(0.4);
        let t_dyn = cam.to_dynamic_scene(&map).unwrap();
        assert!(mat_diff(&(map * t_dyn), &t_static) < 1e-12);
    }

    #[test]
    fn missing_object_pose_is_reported() {
        let focus = Vec3::new(0.0, 0.0, 1.0);
        let trajectory = ObjectTrajectory {
            reference: ObjectPose::new(0, focus, Vec3::zeros()),
            poses: vec![ObjectPose::new(1, focus, Vec3::zeros())],
        };
        let cams = vec![CameraReference::new(
            "a.png",
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::zeros(),
            2,
            0,
        )];
        let err = compensate_object_motion(&cams, Some(&trajectory), &focus, Axis::Z).unwrap_err();
        assert_eq!(err, PoseError::MissingObjectPose(2));
    }
}
