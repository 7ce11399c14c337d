//! Uniform scale of a reconstruction from inter-camera distances.
//!
//! Within a timestep the cameras form a rigid constellation in both the
//! reference and the reconstruction, so every distance ratio `y / x`
//! (reference over reconstructed) samples the same unknown scale. Across
//! timesteps the same physical camera pair keeps its separation, which the
//! optional consistency filter uses to reject bad reconstructed positions.

use std::collections::{BTreeMap, BTreeSet};

use recon_eval_core::{
    CameraReconstructed, CameraReference, MatchError, Real, SampleStats, matched_pairs,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScaleError {
    #[error("scale undetermined: {surviving} of {total} distance measurements survived")]
    Undetermined { total: usize, surviving: usize },
    #[error(transparent)]
    Correspondence(#[from] MatchError),
}

/// Tolerance weighting for the consistency filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutlierCriterion {
    /// `β = 1`, threshold in reconstruction units.
    #[serde(rename = "abs")]
    Absolute,
    /// `β = ȳ / y_i`.
    #[serde(rename = "abs_norm")]
    AbsoluteNormalized,
    /// `β = (x̄ / ȳ) · y_i`, threshold as a fraction of the expected distance.
    #[default]
    #[serde(rename = "rel")]
    Relative,
}

/// Scale estimator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// Run the cross-timestep consistency filter before estimating.
    pub pre_outlier_detection: bool,
    pub threshold: Real,
    pub criterion: OutlierCriterion,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            pre_outlier_detection: true,
            threshold: 0.05,
            criterion: OutlierCriterion::Relative,
        }
    }
}

/// One pairwise distance observed in both frames at one timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceMeasurement {
    /// Reference camera indices of the pair.
    pub cameras: (usize, usize),
    /// Physical camera slots of the pair, smaller first.
    pub slots: (usize, usize),
    pub timestep: u32,
    /// Reference distance `y`.
    pub reference: Real,
    /// Reconstructed distance `x`.
    pub reconstructed: Real,
}

impl DistanceMeasurement {
    pub fn factor(&self) -> Real {
        self.reference / self.reconstructed
    }
}

/// Result of [`estimate_scale`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleEstimate {
    pub mean: Real,
    /// Authoritative scale estimate.
    pub median: Real,
    pub std: Real,
    pub inliers: usize,
    pub outliers: usize,
    /// Rejected measurements.
    pub outlier_measurements: Vec<DistanceMeasurement>,
    /// Reference cameras that appear only in rejected measurements.
    pub outlier_cameras: Vec<usize>,
}

impl ScaleEstimate {
    pub fn factor(&self) -> Real {
        self.median
    }
}

/// Strict upper triangle of the pairwise distance matrices, per timestep with
/// at least two matched cameras.
pub fn pairwise_distances(
    references: &[CameraReference],
    reconstructed: &[CameraReconstructed],
) -> Result<Vec<DistanceMeasurement>, MatchError> {
    let mut by_timestep: BTreeMap<u32, Vec<(usize, usize)>> = BTreeMap::new();
    for (i, j) in matched_pairs(references, reconstructed)? {
        by_timestep
            .entry(references[i].timestep)
            .or_default()
            .push((i, j));
    }

    let mut out = Vec::new();
    for (timestep, group) in &by_timestep {
        if group.len() < 2 {
            continue;
        }
        for (a, &(ra, ca)) in group.iter().enumerate() {
            for &(rb, cb) in &group[a + 1..] {
                let (sa, sb) = (references[ra].slot, references[rb].slot);
                out.push(DistanceMeasurement {
                    cameras: (ra, rb),
                    slots: (sa.min(sb), sa.max(sb)),
                    timestep: *timestep,
                    reference: (references[ra].location - references[rb].location).norm(),
                    reconstructed: (reconstructed[ca].center - reconstructed[cb].center).norm(),
                });
            }
        }
    }
    Ok(out)
}

/// Inlier mask from the cross-timestep consistency check.
///
/// Two measurements of the same camera pair at different timesteps are both
/// inliers when `|x_i - x_j| <= β · threshold`. A measurement never confirmed
/// this way is an outlier. With a single timestep nothing can be compared and
/// every measurement is kept.
pub fn consistency_inliers(
    measurements: &[DistanceMeasurement],
    config: &ScaleConfig,
) -> Vec<bool> {
    let timesteps: BTreeSet<u32> = measurements.iter().map(|m| m.timestep).collect();
    if timesteps.len() <= 1 {
        return vec![true; measurements.len()];
    }

    let n = measurements.len() as Real;
    let y_mean = measurements.iter().map(|m| m.reference).sum::<Real>() / n;
    let x_mean = measurements.iter().map(|m| m.reconstructed).sum::<Real>() / n;

    let mut by_pair: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
    for (k, m) in measurements.iter().enumerate() {
        by_pair.entry(m.slots).or_default().push(k);
    }

    let mut inlier = vec![false; measurements.len()];
    for group in by_pair.values() {
        for (a, &i) in group.iter().enumerate() {
            for &j in &group[a + 1..] {
                let (mi, mj) = (&measurements[i], &measurements[j]);
                if mi.timestep == mj.timestep {
                    continue;
                }
                let beta = match config.criterion {
                    OutlierCriterion::Absolute => 1.0,
                    OutlierCriterion::AbsoluteNormalized => y_mean / mi.reference,
                    OutlierCriterion::Relative => x_mean / y_mean * mi.reference,
                };
                if (mi.reconstructed - mj.reconstructed).abs() <= beta * config.threshold {
                    inlier[i] = true;
                    inlier[j] = true;
                }
            }
        }
    }
    inlier
}

/// Robust uniform scale (reference units per reconstruction unit).
///
/// Zero surviving measurements is an error, never a default factor.
pub fn estimate_scale(
    references: &[CameraReference],
    reconstructed: &[CameraReconstructed],
    config: &ScaleConfig,
) -> Result<ScaleEstimate, ScaleError> {
    let measurements = pairwise_distances(references, reconstructed)?;
    let mask = if config.pre_outlier_detection {
        consistency_inliers(&measurements, config)
    } else {
        vec![true; measurements.len()]
    };

    let mut factors = Vec::new();
    let mut kept = Vec::new();
    let mut rejected = Vec::new();
    for (m, ok) in measurements.iter().zip(&mask) {
        let f = m.factor();
        if *ok && f.is_finite() {
            factors.push(f);
            kept.push(m);
        } else {
            rejected.push(m.clone());
        }
    }

    let stats = SampleStats::from_samples(&factors).ok_or(ScaleError::Undetermined {
        total: measurements.len(),
        surviving: 0,
    })?;

    let confirmed: BTreeSet<usize> = kept
        .iter()
        .flat_map(|m| [m.cameras.0, m.cameras.1])
        .collect();
    let outlier_cameras: BTreeSet<usize> = rejected
        .iter()
        .flat_map(|m| [m.cameras.0, m.cameras.1])
        .filter(|c| !confirmed.contains(c))
        .collect();

    log::debug!(
        "scale from {} of {} distance ratios: median {:.6}, mean {:.6}, std {:.3e}",
        stats.count,
        measurements.len(),
        stats.median,
        stats.mean,
        stats.std
    );
    Ok(ScaleEstimate {
        mean: stats.mean,
        median: stats.median,
        std: stats.std,
        inliers: factors.len(),
        outliers: rejected.len(),
        outlier_measurements: rejected,
        outlier_cameras: outlier_cameras.into_iter().collect(),
    })
}
