//! Wavefront OBJ meshes (geometry only).

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use recon_eval_core::{Pt3, Real, TriangleMesh};

fn resolve_index(token: &str, vertex_count: usize) -> Result<usize> {
    let raw = token
        .split('/')
        .next()
        .unwrap_or(token)
        .parse::<i64>()
        .with_context(|| format!("bad face index {token:?}"))?;
    let index = match raw {
        0 => bail!("face index 0 is not valid"),
        r if r > 0 => (r - 1) as usize,
        r => {
            let back = r.unsigned_abs() as usize;
            if back > vertex_count {
                bail!("relative face index {r} before the first vertex");
            }
            vertex_count - back
        }
    };
    Ok(index)
}

/// Parse `v` and `f` records; polygons are fan-triangulated.
///
/// Texture and normal indices (`v/vt/vn`) and all other records are ignored.
pub fn parse_obj(text: &str) -> Result<TriangleMesh> {
    let mut vertices = Vec::new();
    let mut faces = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let coords = tokens
                    .take(3)
                    .map(|t| t.parse::<Real>())
                    .collect::<Result<Vec<_>, _>>()
                    .with_context(|| format!("line {}: bad vertex", n + 1))?;
                if coords.len() != 3 {
                    bail!("line {}: vertex needs 3 coordinates", n + 1);
                }
                vertices.push(Pt3::new(coords[0], coords[1], coords[2]));
            }
            Some("f") => {
                let polygon = tokens
                    .map(|t| resolve_index(t, vertices.len()))
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| format!("line {}", n + 1))?;
                if polygon.len() < 3 {
                    bail!("line {}: face needs at least 3 vertices", n + 1);
                }
                for k in 1..polygon.len() - 1 {
                    faces.push([polygon[0], polygon[k], polygon[k + 1]]);
                }
            }
            _ => {}
        }
    }
    Ok(TriangleMesh::new(vertices, faces)?)
}

pub fn read_obj(path: &Path) -> Result<TriangleMesh> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_obj(&text).with_context(|| format!("invalid mesh {}", path.display()))
}

pub fn write_obj(path: &Path, mesh: &TriangleMesh) -> Result<()> {
    let mut out = String::new();
    for v in mesh.vertices() {
        let _ = writeln!(out, "v {:.17} {:.17} {:.17}", v.x, v.y, v.z);
    }
    for f in mesh.faces() {
        let _ = writeln!(out, "f {} {} {}", f[0] + 1, f[1] + 1, f[2] + 1);
    }
    fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_eval_core::Vec3;
    use recon_eval_core::synthetic::box_mesh;
    use tempfile::tempdir;

    #[test]
    fn quads_and_slash_indices() {
        let mesh = parse_obj(
            "# unit square\nmtllib m.mtl\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\n\
             f 1/1/1 2/1/1 3/1/1 4/1/1\n",
        )
        .unwrap();
        assert_eq!(mesh.faces(), &[[0, 1, 2], [0, 2, 3]]);
        assert!((mesh.surface_area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn negative_indices_are_relative() {
        let mesh = parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n").unwrap();
        assert_eq!(mesh.faces(), &[[0, 1, 2]]);
    }

    #[test]
    fn out_of_range_face_fails() {
        assert!(parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 7\n").is_err());
        assert!(parse_obj("v 0 0 0\nf 0 1 1\n").is_err());
    }

    #[test]
    fn write_then_read_keeps_geometry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("box.obj");
        let mesh = box_mesh(Vec3::new(0.1, 0.2, 0.3));
        write_obj(&path, &mesh).unwrap();
        let back = read_obj(&path).unwrap();
        assert_eq!(back.faces(), mesh.faces());
        assert!((back.volume() - 0.006).abs() < 1e-12);
    }
}
