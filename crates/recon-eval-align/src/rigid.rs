//! Closed-form rigid alignment of paired points (Horn / Kabsch).

use recon_eval_core::{Mat3, Mat4, Pt3, Real, Vec3, from_rotation_location};

use crate::RegistrationError;

/// Smallest accepted ratio between the second and first singular value of
/// the centred cross-covariance; below it the points are collinear.
const MIN_SPREAD_RATIO: Real = 1e-9;

fn centroid(points: &[Pt3]) -> Vec3 {
    let sum: Vec3 = points.iter().map(|p| p.coords).sum();
    sum / points.len() as Real
}

/// Rigid transform `T` minimizing `Σ ‖T · source_i − target_i‖²`.
///
/// Needs at least three non-collinear pairs.
pub fn fit_rigid(source: &[Pt3], target: &[Pt3]) -> Result<Mat4, RegistrationError> {
    if source.len() != target.len() {
        return Err(RegistrationError::LengthMismatch {
            sources: source.len(),
            targets: target.len(),
        });
    }
    if source.len() < 3 {
        return Err(RegistrationError::NotEnoughCorrespondences(source.len()));
    }

    let cs = centroid(source);
    let ct = centroid(target);
    let mut h = Mat3::zeros();
    for (s, t) in source.iter().zip(target) {
        h += (s.coords - cs) * (t.coords - ct).transpose();
    }

    let svd = h.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(RegistrationError::DegenerateCorrespondences);
    };
    let sv = svd.singular_values;
    let largest = sv.max();
    let mut sorted = [sv[0], sv[1], sv[2]];
    sorted.sort_by(|a, b| b.total_cmp(a));
    if largest <= 0.0 || sorted[1] / largest < MIN_SPREAD_RATIO {
        return Err(RegistrationError::DegenerateCorrespondences);
    }

    let mut v = v_t.transpose();
    let mut rotation = v * u.transpose();
    if rotation.determinant() < 0.0 {
        // Flip the axis of the smallest singular value.
        let smallest = (0..3)
            .min_by(|&a, &b| sv[a].total_cmp(&sv[b]))
            .unwrap_or(2);
        for i in 0..3 {
            v[(i, smallest)] = -v[(i, smallest)];
        }
        rotation = v * u.transpose();
    }

    let translation = ct - rotation * cs;
    Ok(from_rotation_location(&rotation, &translation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_eval_core::{compose_pose, transform_point};

    fn cloud() -> Vec<Pt3> {
        vec![
            Pt3::new(0.0, 0.0, 0.0),
            Pt3::new(1.0, 0.0, 0.0),
            Pt3::new(0.0, 2.0, 0.0),
            Pt3::new(0.0, 0.0, 3.0),
            Pt3::new(1.0, 1.0, 1.0),
        ]
    }

    #[test]
    fn recovers_rigid_motion() {
        let t = compose_pose(&Vec3::new(0.5, -2.0, 1.0), &Vec3::new(0.3, -1.2, 2.5));
        let src = cloud();
        let dst: Vec<Pt3> = src.iter().map(|p| transform_point(&t, p)).collect();
        let fit = fit_rigid(&src, &dst).unwrap();
        assert!((fit - t).abs().max() < 1e-10, "{fit}");
    }

    #[test]
    fn three_points_suffice() {
        let t = compose_pose(&Vec3::new(0.1, 0.2, 0.3), &Vec3::new(0.0, 0.0, 1.0));
        let src = &cloud()[1..4];
        let dst: Vec<Pt3> = src.iter().map(|p| transform_point(&t, p)).collect();
        let fit = fit_rigid(src, &dst).unwrap();
        assert!((fit - t).abs().max() < 1e-10);
        assert!((fit.fixed_view::<3, 3>(0, 0).determinant() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_degenerate_input() {
        let two = &cloud()[..2];
        assert_eq!(
            fit_rigid(two, two),
            Err(RegistrationError::NotEnoughCorrespondences(2))
        );
        let line: Vec<Pt3> = (0..4).map(|i| Pt3::new(i as f64, 0.0, 0.0)).collect();
        assert_eq!(
            fit_rigid(&line, &line),
            Err(RegistrationError::DegenerateCorrespondences)
        );
    }
}
