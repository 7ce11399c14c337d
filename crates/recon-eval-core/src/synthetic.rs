//! Deterministic synthetic scenes for tests.
//!
//! A ring of cameras looks at a focus point while the object optionally
//! translates along one axis and spins about it. The matching reconstruction
//! output is derived exactly: reconstructed cameras live in a frame related
//! to the object frame by `M = R_frame · S(1/k)`, expressed in the
//! reconstruction engine's camera convention.

use std::f64::consts::PI;

use crate::{
    Axis, CameraReconstructed, CameraReference, Mat3, Mat4, ObjectPose, ObjectTrajectory, PoseError,
    Pt3, Real, SceneFrame, TriangleMesh, Vec3, compensate_object_motion, compose_pose, rotation_x,
    scale_transform, transform_point, translation, translation_part,
};

/// Parameters of a synthetic capture.
#[derive(Debug, Clone)]
pub struct SceneSpec {
    pub cameras_per_timestep: usize,
    pub timesteps: u32,
    pub focus: Vec3,
    /// Horizontal distance of the ring from the focus point.
    pub radius: Real,
    /// Height of each ring camera above the focus point, cycled.
    pub heights: Vec<Real>,
    /// Object translation per timestep along `axis`; zero for a static scene.
    pub object_step: Real,
    /// Object rotation per timestep about `axis` (radians).
    pub object_spin: Real,
    pub axis: Axis,
    /// True scale: real-world units per reconstruction unit.
    pub scale: Real,
    /// Rigid pose of the reconstruction frame relative to the object frame.
    pub reconstruction_frame: Mat4,
    /// Timesteps the reconstruction fails to solve.
    pub unsolved_timesteps: Vec<u32>,
}

impl Default for SceneSpec {
    fn default() -> Self {
        Self {
            cameras_per_timestep: 3,
            timesteps: 5,
            focus: Vec3::new(0.0, 0.0, 1.0),
            radius: 0.6,
            heights: vec![0.15, -0.1, 0.3],
            object_step: 0.02,
            object_spin: 0.25,
            axis: Axis::Z,
            scale: 0.25,
            reconstruction_frame: Mat4::identity(),
            unsolved_timesteps: Vec::new(),
        }
    }
}

/// Ground truth plus the matching reconstruction output.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub spec: SceneSpec,
    pub references: Vec<CameraReference>,
    /// Reconstructed cameras, in reverse capture order.
    pub reconstructed: Vec<CameraReconstructed>,
    pub trajectory: Option<ObjectTrajectory>,
    /// Ground-truth mesh in the object frame.
    pub ground_truth_mesh: TriangleMesh,
    /// Same mesh in the reconstruction frame.
    pub reconstructed_mesh: TriangleMesh,
}

impl SyntheticScene {
    /// Object frame to reconstruction frame, `R_frame · S(1/k)`.
    pub fn object_to_reconstruction(&self) -> Mat4 {
        self.spec.reconstruction_frame * scale_transform(1.0 / self.spec.scale)
    }
}

/// Renderer Euler angles of a camera at `location` looking at `target`.
///
/// Renderer cameras look along their local -Z with local +Y up.
pub fn look_at_euler(location: &Vec3, target: &Vec3) -> Vec3 {
    let d = target - location;
    let horizontal = (d.x * d.x + d.y * d.y).sqrt();
    let tilt = horizontal.atan2(-d.z);
    let yaw = d.y.atan2(d.x) - PI / 2.0;
    Vec3::new(tilt, 0.0, yaw)
}

/// Build reference cameras, object motion, reconstruction and meshes.
///
/// Image names are `0001.png`, `0002.png`, ... in capture order. Fails when
/// the requested object motion cannot be compensated.
pub fn build_scene(spec: &SceneSpec, object: TriangleMesh) -> Result<SyntheticScene, PoseError> {
    let mut references = Vec::new();
    let mut index = 0;
    for t in 1..=spec.timesteps {
        for slot in 0..spec.cameras_per_timestep {
            let phi = 2.0 * PI * slot as Real / spec.cameras_per_timestep as Real;
            let h = spec.heights[slot % spec.heights.len()];
            let location =
                spec.focus + Vec3::new(spec.radius * phi.cos(), spec.radius * phi.sin(), h);
            let euler = look_at_euler(&location, &spec.focus);
            index += 1;
            references.push(CameraReference::new(
                format!("{index:04}.png"),
                location,
                euler,
                t,
                slot,
            ));
        }
    }

    let moving = spec.object_step != 0.0 || spec.object_spin != 0.0;
    let trajectory = moving.then(|| {
        let mut spin = Vec3::zeros();
        let reference = ObjectPose::new(0, spec.focus, spin);
        let poses = (1..=spec.timesteps)
            .map(|t| {
                let k = (t - 1) as Real;
                spin[spec.axis.index()] = spec.object_spin * k;
                ObjectPose::new(t, spec.focus + spec.axis.unit() * (spec.object_step * k), spin)
            })
            .collect();
        ObjectTrajectory { reference, poses }
    });
    compensate_object_motion(&references, trajectory.as_ref(), &spec.focus, spec.axis)?;

    let scene_frame = spec.reconstruction_frame * scale_transform(1.0 / spec.scale);
    let to_engine =
        rotation_x(PI) * scene_frame * translation(&Vec3::new(0.0, 0.0, -spec.focus.z));
    let frame_rotation: Mat3 = spec.reconstruction_frame.fixed_view::<3, 3>(0, 0).into_owned();
    let mut reconstructed: Vec<CameraReconstructed> = references
        .iter()
        .filter(|c| !spec.unsolved_timesteps.contains(&c.timestep))
        .map(|c| {
            let t_static = c.transform(SceneFrame::Static);
            let r_static: Mat3 = t_static.fixed_view::<3, 3>(0, 0).into_owned();
            let rx: Mat3 = rotation_x(PI).fixed_view::<3, 3>(0, 0).into_owned();
            let center = transform_point(&to_engine, &Pt3::from(translation_part(&t_static)));
            CameraReconstructed::new(c.image.clone(), center.coords, rx * frame_rotation * r_static)
        })
        .collect();
    reconstructed.reverse();

    let reconstructed_mesh = object.transformed(&scene_frame);
    Ok(SyntheticScene {
        spec: spec.clone(),
        references,
        reconstructed,
        trajectory,
        ground_truth_mesh: object,
        reconstructed_mesh,
    })
}

/// Axis-aligned box centred at the origin, outward-facing triangles.
pub fn box_mesh(size: Vec3) -> TriangleMesh {
    let h = size / 2.0;
    let vertices: Vec<Pt3> = (0..8)
        .map(|i| {
            Pt3::new(
                if i & 1 == 0 { -h.x } else { h.x },
                if i & 2 == 0 { -h.y } else { h.y },
                if i & 4 == 0 { -h.z } else { h.z },
            )
        })
        .collect();
    let faces = vec![
        [0, 2, 1], [1, 2, 3], // -z
        [4, 5, 6], [5, 7, 6], // +z
        [0, 1, 4], [1, 5, 4], // -y
        [2, 6, 3], [3, 6, 7], // +y
        [0, 4, 2], [2, 4, 6], // -x
        [1, 3, 5], [3, 7, 5], // +x
    ];
    TriangleMesh::new(vertices, faces).expect("box faces are valid")
}

/// UV sphere centred at the origin.
pub fn uv_sphere(radius: Real, stacks: usize, slices: usize) -> TriangleMesh {
    let mut vertices = vec![Pt3::new(0.0, 0.0, radius)];
    for i in 1..stacks {
        let theta = PI * i as Real / stacks as Real;
        for j in 0..slices {
            let phi = 2.0 * PI * j as Real / slices as Real;
            vertices.push(Pt3::new(
                radius * theta.sin() * phi.cos(),
                radius * theta.sin() * phi.sin(),
                radius * theta.cos(),
            ));
        }
    }
    vertices.push(Pt3::new(0.0, 0.0, -radius));
    let south = vertices.len() - 1;
    let ring = |i: usize, j: usize| 1 + (i - 1) * slices + (j % slices);

    let mut faces = Vec::new();
    for j in 0..slices {
        faces.push([0, ring(1, j), ring(1, j + 1)]);
        faces.push([south, ring(stacks - 1, j + 1), ring(stacks - 1, j)]);
    }
    for i in 1..stacks - 1 {
        for j in 0..slices {
            let (a, b) = (ring(i, j), ring(i, j + 1));
            let (c, d) = (ring(i + 1, j), ring(i + 1, j + 1));
            faces.push([a, c, d]);
            faces.push([a, d, b]);
        }
    }
    TriangleMesh::new(vertices, faces).expect("sphere faces are valid")
}

/// Irregular, asymmetric solid used where registration needs distinctive
/// geometry: a box with a smaller box fused onto one corner region.
pub fn asymmetric_mesh() -> TriangleMesh {
    let body = box_mesh(Vec3::new(0.2, 0.12, 0.08));
    let knob = box_mesh(Vec3::new(0.06, 0.05, 0.1))
        .transformed(&compose_pose(&Vec3::new(0.07, 0.03, 0.07), &Vec3::new(0.0, 0.0, 0.4)));
    let offset = body.vertices().len();
    let vertices: Vec<Pt3> = body
        .vertices()
        .iter()
        .chain(knob.vertices().iter())
        .copied()
        .collect();
    let faces = body
        .faces()
        .iter()
        .copied()
        .chain(knob.faces().iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]))
        .collect();
    TriangleMesh::new(vertices, faces).expect("merged faces are valid")
}

/// Pose of the reconstruction frame used by tests that exercise registration.
pub fn tilted_frame() -> Mat4 {
    compose_pose(&Vec3::new(0.3, -0.2, 0.1), &Vec3::new(0.4, -0.3, 1.1))
}
