//! Indexed triangle meshes and their morphology.

use std::f64::consts::PI;

use crate::{Mat4, Pt3, Real, Vec3, transform_point};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    #[error("mesh has no triangles")]
    Empty,
    #[error("face {face} references vertex {vertex}, but the mesh has {len} vertices")]
    FaceIndexOutOfRange { face: usize, vertex: usize, len: usize },
}

/// Triangle mesh with shared vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleMesh {
    vertices: Vec<Pt3>,
    faces: Vec<[usize; 3]>,
}

impl TriangleMesh {
    pub fn new(vertices: Vec<Pt3>, faces: Vec<[usize; 3]>) -> Result<Self, MeshError> {
        if faces.is_empty() {
            return Err(MeshError::Empty);
        }
        for (f, face) in faces.iter().enumerate() {
            if let Some(&v) = face.iter().find(|&&v| v >= vertices.len()) {
                return Err(MeshError::FaceIndexOutOfRange {
                    face: f,
                    vertex: v,
                    len: vertices.len(),
                });
            }
        }
        Ok(Self { vertices, faces })
    }

    pub fn vertices(&self) -> &[Pt3] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    fn corners(&self, face: usize) -> [Pt3; 3] {
        let [a, b, c] = self.faces[face];
        [self.vertices[a], self.vertices[b], self.vertices[c]]
    }

    /// Mean of the vertex positions.
    pub fn centroid(&self) -> Pt3 {
        let sum: Vec3 = self.vertices.iter().map(|p| p.coords).sum();
        Pt3::from(sum / self.vertices.len().max(1) as Real)
    }

    /// Copy of the mesh with `t` applied to every vertex.
    pub fn transformed(&self, t: &Mat4) -> Self {
        Self {
            vertices: self.vertices.iter().map(|p| transform_point(t, p)).collect(),
            faces: self.faces.clone(),
        }
    }

    pub fn triangle_area(&self, face: usize) -> Real {
        let [a, b, c] = self.corners(face);
        0.5 * (b - a).cross(&(c - a)).norm()
    }

    pub fn surface_area(&self) -> Real {
        (0..self.faces.len()).map(|f| self.triangle_area(f)).sum()
    }

    /// Enclosed volume from signed tetrahedra against the origin.
    ///
    /// Meaningful for closed, consistently oriented meshes; orientation sign is
    /// dropped.
    pub fn volume(&self) -> Real {
        let signed: Real = (0..self.faces.len())
            .map(|f| {
                let [a, b, c] = self.corners(f);
                a.coords.dot(&b.coords.cross(&c.coords)) / 6.0
            })
            .sum();
        signed.abs()
    }

    /// `count` points distributed uniformly over the surface.
    ///
    /// Triangles are drawn proportionally to their area, points uniformly
    /// inside them. Deterministic for a given `seed`.
    pub fn sample_points(&self, count: usize, seed: u64) -> Vec<Pt3> {
        let mut cumulative = Vec::with_capacity(self.faces.len());
        let mut total = 0.0;
        for f in 0..self.faces.len() {
            total += self.triangle_area(f);
            cumulative.push(total);
        }
        if total <= 0.0 {
            return Vec::new();
        }
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let target = rng.random::<Real>() * total;
                let f = cumulative
                    .partition_point(|&c| c <= target)
                    .min(self.faces.len() - 1);
                let [a, b, c] = self.corners(f);
                let r1 = rng.random::<Real>().sqrt();
                let r2 = rng.random::<Real>();
                let p = a.coords * (1.0 - r1) + b.coords * (r1 * (1.0 - r2)) + c.coords * (r1 * r2);
                Pt3::from(p)
            })
            .collect()
    }
}

/// Shape descriptors of a closed mesh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Morphology {
    pub volume: Real,
    pub surface_area: Real,
    /// `6 V / A`.
    pub sauter_diameter: Real,
    /// `A / V`.
    pub specific_surface: Real,
    /// `π^(1/3) (6 V)^(2/3) / A`, one for a sphere.
    pub sphericity: Real,
}

impl Morphology {
    pub fn of(mesh: &TriangleMesh) -> Self {
        let volume = mesh.volume();
        let area = mesh.surface_area();
        Self {
            volume,
            surface_area: area,
            sauter_diameter: 6.0 * volume / area,
            specific_surface: area / volume,
            sphericity: PI.cbrt() * (6.0 * volume).powf(2.0 / 3.0) / area,
        }
    }
}
