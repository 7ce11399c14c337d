//! Core geometry primitives for `recon-eval`.
//!
//! This crate provides the building blocks shared by the alignment and
//! pipeline crates:
//!
//! - linear algebra type aliases (`Real`, `Vec3`, `Mat4`, and friends),
//! - 4x4 similarity transform algebra (compose, decompose, scale),
//! - reference/reconstructed camera and object pose entities,
//! - camera matching by image name,
//! - triangle meshes with morphology measures,
//! - a deterministic, model-agnostic RANSAC engine.
//!
//! # Frames
//!
//! Three frames meet here: the renderer's world frame (ground truth), the
//! reconstruction engine's arbitrary-scale frame, and the moving object's own
//! frame. Reference cameras can be expressed either with the object moving
//! ([`SceneFrame::Dynamic`]) or with the object held at its reference pose
//! ([`SceneFrame::Static`]).
//!
//! # Example
//!
//! ```
//! use recon_eval_core::{compose_pose, decompose, Vec3};
//!
//! let t = compose_pose(&Vec3::new(1.0, 2.0, 3.0), &Vec3::new(0.1, -0.2, 0.3));
//! let parts = decompose(&t).unwrap();
//! assert!((parts.location - Vec3::new(1.0, 2.0, 3.0)).norm() < 1e-12);
//! ```

/// Linear algebra type aliases.
mod math;
/// Camera matching by identity key.
mod matching;
/// Triangle meshes and morphology.
mod mesh;
/// Reference, reconstructed and object pose entities.
mod pose;
/// Generic RANSAC engine and traits.
mod ransac;
/// Summary statistics over samples.
mod stats;
/// Deterministic synthetic scenes.
///
/// Public so integration tests in downstream crates can build the same
/// rigs, meshes and reconstruction outputs.
pub mod synthetic;
/// Homogeneous 4x4 transform algebra.
mod transform;

pub use math::*;
pub use matching::*;
pub use mesh::*;
pub use pose::*;
pub use ransac::*;
pub use stats::*;
pub use transform::*;
