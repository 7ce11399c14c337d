//! Point-cloud preprocessing for feature-based registration.
//!
//! Voxel down-sampling, PCA normals over a hybrid (radius + max count)
//! neighbourhood, and 33-bin FPFH descriptors.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use nalgebra::SymmetricEigen;
use recon_eval_core::{Mat3, Pt3, Real, Vec3};

/// Number of bins per angular feature.
const BINS: usize = 11;
/// Length of an FPFH descriptor.
pub const FPFH_LEN: usize = 3 * BINS;

pub type Fpfh = [Real; FPFH_LEN];

/// Static k-d tree over a point cloud; items are point indices.
///
/// Bulk-built, so clouds with many points sharing a coordinate (faces of a
/// box, planar patches) are fine.
pub type PointTree = ImmutableKdTree<Real, 3>;

/// Build a k-d tree over `points`.
pub fn build_kdtree(points: &[Pt3]) -> PointTree {
    let coords: Vec<[Real; 3]> = points.iter().map(|p| [p.x, p.y, p.z]).collect();
    ImmutableKdTree::new_from_slice(&coords)
}

/// Up to `max_nn` neighbours within `radius`, nearest first, including the
/// query point itself. Returns `(index, squared distance)`.
pub fn hybrid_neighbours(
    tree: &PointTree,
    query: &Pt3,
    radius: Real,
    max_nn: usize,
) -> Vec<(usize, Real)> {
    if max_nn == 0 {
        return Vec::new();
    }
    tree.nearest_n_within::<SquaredEuclidean>(
        &[query.x, query.y, query.z],
        radius * radius,
        std::num::NonZero::new(max_nn).unwrap(),
        true,
    )
    .into_iter()
    .map(|n| (n.item as usize, n.distance))
    .collect()
}

/// Distance from every `source` point to its nearest `target` point.
///
/// Empty when `target` is empty.
pub fn nearest_distances(source: &[Pt3], target: &[Pt3]) -> Vec<Real> {
    if target.is_empty() {
        return Vec::new();
    }
    let tree = build_kdtree(target);
    source
        .iter()
        .map(|p| {
            tree.nearest_one::<SquaredEuclidean>(&[p.x, p.y, p.z])
                .distance
                .sqrt()
        })
        .collect()
}

/// Replace the points of every occupied voxel with their mean.
///
/// Output order follows voxel coordinates, so it is deterministic.
pub fn voxel_downsample(points: &[Pt3], voxel: Real) -> Vec<Pt3> {
    if voxel <= 0.0 {
        return points.to_vec();
    }
    let mut cells: BTreeMap<(i64, i64, i64), (Vec3, usize)> = BTreeMap::new();
    for p in points {
        let key = (
            (p.x / voxel).floor() as i64,
            (p.y / voxel).floor() as i64,
            (p.z / voxel).floor() as i64,
        );
        let cell = cells.entry(key).or_insert((Vec3::zeros(), 0));
        cell.0 += p.coords;
        cell.1 += 1;
    }
    cells
        .into_values()
        .map(|(sum, n)| Pt3::from(sum / n as Real))
        .collect()
}

/// Unit normals from the smallest-eigenvalue direction of the local
/// covariance, oriented away from the cloud centroid.
pub fn estimate_normals(
    points: &[Pt3],
    tree: &PointTree,
    radius: Real,
    max_nn: usize,
) -> Vec<Vec3> {
    let center: Vec3 =
        points.iter().map(|p| p.coords).sum::<Vec3>() / points.len().max(1) as Real;
    points
        .iter()
        .map(|p| {
            let nbrs = hybrid_neighbours(tree, p, radius, max_nn);
            if nbrs.len() < 3 {
                return (p.coords - center).try_normalize(1e-12).unwrap_or(Vec3::z());
            }
            let mean: Vec3 =
                nbrs.iter().map(|&(i, _)| points[i].coords).sum::<Vec3>() / nbrs.len() as Real;
            let mut cov = Mat3::zeros();
            for &(i, _) in &nbrs {
                let d = points[i].coords - mean;
                cov += d * d.transpose();
            }
            let eig = SymmetricEigen::new(cov);
            let k = eig.eigenvalues.imin();
            let mut n: Vec3 = eig.eigenvectors.column(k).into_owned();
            if n.dot(&(p.coords - center)) < 0.0 {
                n = -n;
            }
            n
        })
        .collect()
}

/// Darboux-frame pair feature `(f1, f2, f3, f4)`; `None` for coincident
/// points or degenerate frames.
fn pair_feature(p1: &Pt3, n1: &Vec3, p2: &Pt3, n2: &Vec3) -> Option<[Real; 4]> {
    let mut dp = p2 - p1;
    let f4 = dp.norm();
    if f4 == 0.0 {
        return None;
    }
    let (mut a, mut b) = (*n1, *n2);
    let angle1 = a.dot(&dp) / f4;
    let angle2 = b.dot(&dp) / f4;
    let f3 = if angle1.abs().acos() > angle2.abs().acos() {
        std::mem::swap(&mut a, &mut b);
        dp = -dp;
        -angle2
    } else {
        angle1
    };
    let v = dp.cross(&a).try_normalize(1e-12)?;
    let w = a.cross(&v);
    let f2 = v.dot(&b);
    let f1 = w.dot(&b).atan2(a.dot(&b));
    Some([f1, f2, f3, f4])
}

fn bin(value: Real, lo: Real, hi: Real) -> usize {
    let idx = (BINS as Real * (value - lo) / (hi - lo)).floor();
    (idx.max(0.0) as usize).min(BINS - 1)
}

/// Fast point feature histograms.
///
/// Each point's simplified histogram (normalized to 100 per feature) is
/// blended with its neighbours', weighted by inverse squared distance.
pub fn compute_fpfh(
    points: &[Pt3],
    normals: &[Vec3],
    tree: &PointTree,
    radius: Real,
    max_nn: usize,
) -> Vec<Fpfh> {
    let neighbourhoods: Vec<Vec<(usize, Real)>> = points
        .iter()
        .map(|p| hybrid_neighbours(tree, p, radius, max_nn))
        .collect();

    let spfh: Vec<Fpfh> = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut hist = [0.0; FPFH_LEN];
            let others: Vec<usize> = neighbourhoods[i]
                .iter()
                .map(|&(j, _)| j)
                .filter(|&j| j != i)
                .collect();
            if others.is_empty() {
                return hist;
            }
            let incr = 100.0 / others.len() as Real;
            for j in others {
                let Some([f1, f2, f3, _]) = pair_feature(p, &normals[i], &points[j], &normals[j])
                else {
                    continue;
                };
                hist[bin(f1, -PI, PI)] += incr;
                hist[BINS + bin(f2, -1.0, 1.0)] += incr;
                hist[2 * BINS + bin(f3, -1.0, 1.0)] += incr;
            }
            hist
        })
        .collect();

    (0..points.len())
        .map(|i| {
            let mut feature = [0.0; FPFH_LEN];
            let mut sums = [0.0; 3];
            for &(j, d2) in &neighbourhoods[i] {
                if j == i || d2 == 0.0 {
                    continue;
                }
                for (k, value) in spfh[j].iter().enumerate() {
                    let v = value / d2;
                    sums[k / BINS] += v;
                    feature[k] += v;
                }
            }
            for (k, f) in feature.iter_mut().enumerate() {
                let s = sums[k / BINS];
                let blended = if s != 0.0 { *f * 100.0 / s } else { 0.0 };
                *f = blended + spfh[i][k];
            }
            feature
        })
        .collect()
}

/// Down-sampled cloud with normals and descriptors.
#[derive(Debug, Clone)]
pub struct FeatureCloud {
    pub points: Vec<Pt3>,
    pub normals: Vec<Vec3>,
    pub features: Vec<Fpfh>,
}

impl FeatureCloud {
    /// Normals over `2 · voxel` (30 neighbours max), FPFH over `5 · voxel`
    /// (100 neighbours max), on the cloud as given.
    pub fn from_points(points: Vec<Pt3>, voxel: Real) -> Self {
        if points.is_empty() {
            return Self {
                points,
                normals: Vec::new(),
                features: Vec::new(),
            };
        }
        let tree = build_kdtree(&points);
        let normals = estimate_normals(&points, &tree, 2.0 * voxel, 30);
        let features = compute_fpfh(&points, &normals, &tree, 5.0 * voxel, 100);
        Self {
            points,
            normals,
            features,
        }
    }

    /// Voxel down-sample, then [`Self::from_points`].
    pub fn preprocess(points: &[Pt3], voxel: Real) -> Self {
        let down = voxel_downsample(points, voxel);
        log::debug!(
            "down-sampled {} points to {} with voxel {voxel:.4}",
            points.len(),
            down.len()
        );
        Self::from_points(down, voxel)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn feature_distance2(a: &Fpfh, b: &Fpfh) -> Real {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest_feature(query: &Fpfh, features: &[Fpfh]) -> Option<usize> {
    features
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            feature_distance2(query, a).total_cmp(&feature_distance2(query, b))
        })
        .map(|(i, _)| i)
}

/// Nearest-descriptor correspondences `(source, target)`.
///
/// With `mutual`, only pairs that are each other's nearest neighbour are
/// kept, unless that leaves fewer than `min_mutual`; then all forward matches
/// are returned.
pub fn match_features(
    source: &FeatureCloud,
    target: &FeatureCloud,
    mutual: bool,
    min_mutual: usize,
) -> Vec<(usize, usize)> {
    let forward: Vec<(usize, usize)> = source
        .features
        .iter()
        .enumerate()
        .filter_map(|(i, f)| nearest_feature(f, &target.features).map(|j| (i, j)))
        .collect();
    if !mutual {
        return forward;
    }
    let mutual_pairs: Vec<(usize, usize)> = forward
        .iter()
        .copied()
        .filter(|&(i, j)| nearest_feature(&target.features[j], &source.features) == Some(i))
        .collect();
    if mutual_pairs.len() < min_mutual {
        log::debug!(
            "only {} mutual feature matches, using all {} forward matches",
            mutual_pairs.len(),
            forward.len()
        );
        return forward;
    }
    mutual_pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_eval_core::synthetic::{box_mesh, uv_sphere};

    #[test]
    fn voxel_grid_averages_cells() {
        let pts = vec![
            Pt3::new(0.01, 0.01, 0.01),
            Pt3::new(0.03, 0.03, 0.03),
            Pt3::new(0.51, 0.0, 0.0),
        ];
        let down = voxel_downsample(&pts, 0.1);
        assert_eq!(down.len(), 2);
        assert!((down[0] - Pt3::new(0.02, 0.02, 0.02)).norm() < 1e-12);
    }

    #[test]
    fn nearest_distances_to_shifted_cloud() {
        let target = vec![Pt3::new(0.0, 0.0, 0.0), Pt3::new(1.0, 0.0, 0.0)];
        let source = vec![Pt3::new(0.0, 0.2, 0.0), Pt3::new(0.9, 0.0, 0.0)];
        let d = nearest_distances(&source, &target);
        assert!((d[0] - 0.2).abs() < 1e-12);
        assert!((d[1] - 0.1).abs() < 1e-12);
        assert!(nearest_distances(&source, &[]).is_empty());
    }

    #[test]
    fn box_surface_distances() {
        // Samples on a box share coordinates along whole faces.
        let mesh = box_mesh(Vec3::new(0.1, 0.1, 0.1));
        let target = mesh.sample_points(20_000, 3);
        let source: Vec<Pt3> = mesh
            .vertices()
            .iter()
            .map(|v| v + Vec3::new(0.0, 0.0, 0.02 * v.z.signum()))
            .collect();
        let d = nearest_distances(&source, &target);
        assert_eq!(d.len(), 8);
        for dist in d {
            assert!((0.02..0.03).contains(&dist), "{dist}");
        }

        let corners: Vec<Pt3> = mesh.vertices().to_vec();
        let d = nearest_distances(&corners, &corners);
        assert!(d.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn box_feature_cloud() {
        let mesh = box_mesh(Vec3::new(0.1, 0.06, 0.04));
        let cloud = FeatureCloud::preprocess(&mesh.sample_points(10_000, 4), 0.005);
        assert!(cloud.len() > 100);
        assert_eq!(cloud.normals.len(), cloud.len());
        assert_eq!(cloud.features.len(), cloud.len());
        // Face points away from edges have axis-aligned normals.
        let axis_aligned = cloud
            .normals
            .iter()
            .filter(|n| n.abs().max() > 0.99)
            .count();
        assert!(axis_aligned * 2 > cloud.len(), "{axis_aligned} of {}", cloud.len());
        assert!(FeatureCloud::from_points(Vec::new(), 0.005).is_empty());
    }

    #[test]
    fn neighbours_are_limited_by_radius_and_count() {
        let pts: Vec<Pt3> = (0..10).map(|i| Pt3::new(i as Real * 0.1, 0.0, 0.0)).collect();
        let tree = build_kdtree(&pts);
        let n = hybrid_neighbours(&tree, &pts[5], 0.25, 30);
        let mut idx: Vec<usize> = n.iter().map(|&(i, _)| i).collect();
        assert_eq!(idx[0], 5);
        idx.sort_unstable();
        assert_eq!(idx, vec![3, 4, 5, 6, 7]);
        assert_eq!(hybrid_neighbours(&tree, &pts[5], 0.25, 2).len(), 2);
    }

    #[test]
    fn sphere_normals_point_outward() {
        let mesh = uv_sphere(1.0, 24, 48);
        let pts = mesh.sample_points(3000, 1);
        let tree = build_kdtree(&pts);
        let normals = estimate_normals(&pts, &tree, 0.2, 30);
        for (p, n) in pts.iter().zip(&normals) {
            assert!((n.norm() - 1.0).abs() < 1e-9);
            assert!(n.dot(&p.coords.normalize()) > 0.9, "{p} {n}");
        }
    }

    #[test]
    fn pair_feature_of_parallel_normals_on_a_plane() {
        let n = Vec3::z();
        let f = pair_feature(&Pt3::origin(), &n, &Pt3::new(1.0, 0.0, 0.0), &n).unwrap();
        assert!(f[0].abs() < 1e-12);
        assert!(f[1].abs() < 1e-12);
        assert!(f[2].abs() < 1e-12);
        assert!((f[3] - 1.0).abs() < 1e-12);
        assert!(pair_feature(&Pt3::origin(), &n, &Pt3::origin(), &n).is_none());
    }

    #[test]
    fn descriptors_are_rotation_invariant() {
        let mesh = uv_sphere(0.1, 12, 24);
        let pts = voxel_downsample(&mesh.sample_points(4000, 5), 0.01);
        let rot = recon_eval_core::euler_rotation(&Vec3::new(0.4, -0.7, 1.9));
        let rotated: Vec<Pt3> = pts.iter().map(|p| Pt3::from(rot * p.coords)).collect();
        let a = FeatureCloud::from_points(pts, 0.01);
        let b = FeatureCloud::from_points(rotated, 0.01);
        for (fa, fb) in a.features.iter().zip(&b.features) {
            assert!(feature_distance2(fa, fb).sqrt() < 1e-6);
        }
    }
}
