//! Space-separated 4x4 matrix files.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use recon_eval_core::{Mat4, Real};

/// Parse 16 whitespace-separated numbers, row-major.
pub fn parse_matrix(text: &str) -> Result<Mat4> {
    let values = text
        .split_whitespace()
        .map(|tok| {
            tok.parse::<Real>()
                .with_context(|| format!("not a number: {tok:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    ensure!(
        values.len() == 16,
        "expected 16 matrix entries, found {}",
        values.len()
    );
    Ok(Mat4::from_row_slice(&values))
}

pub fn format_matrix(m: &Mat4) -> String {
    let mut out = String::new();
    for row in m.row_iter() {
        let line: Vec<String> = row.iter().map(|v| format!("{v:.18e}")).collect();
        let _ = writeln!(out, "{}", line.join(" "));
    }
    out
}

pub fn read_matrix(path: &Path) -> Result<Mat4> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_matrix(&text).with_context(|| format!("invalid matrix file {}", path.display()))
}

pub fn write_matrix(path: &Path, m: &Mat4) -> Result<()> {
    fs::write(path, format_matrix(m)).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_eval_core::{Vec3, compose_pose};
    use tempfile::tempdir;

    #[test]
    fn tolerates_irregular_whitespace() {
        let m = parse_matrix("1 0 0 0.5\n0 1  0 0\n\t0 0 1 -2\r\n0 0 0 1\n\n").unwrap();
        assert!((m[(0, 3)] - 0.5).abs() < 1e-15);
        assert!((m[(2, 3)] + 2.0).abs() < 1e-15);
    }

    #[test]
    fn rejects_wrong_count() {
        assert!(parse_matrix("1 0 0\n0 1 0\n0 0 1").is_err());
        assert!(parse_matrix("1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 x").is_err());
    }

    #[test]
    fn file_roundtrip_is_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("GlobalTransformationMatrix.txt");
        let m = compose_pose(&Vec3::new(0.1, -0.2, 1.3), &Vec3::new(0.3, 0.2, -1.1)) * 0.25;
        write_matrix(&path, &m).unwrap();
        let back = read_matrix(&path).unwrap();
        assert!((back - m).abs().max() < 1e-15);
    }
}
