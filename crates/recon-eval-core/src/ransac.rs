//! Seeded, model-agnostic RANSAC.
//!
//! Implement [`Estimator`] for a model and call [`ransac`] with the data and
//! [`RansacOptions`]. Estimators are values, so they can carry their own
//! thresholds and plausibility checks.
//!
//! The loop never panics on failure: without consensus it returns a
//! [`RansacResult`] with `model == None`.

use rand::prelude::IndexedRandom;
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

/// Configuration of the RANSAC loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacOptions {
    /// Hard cap on iterations.
    pub max_iters: usize,
    /// Inlier residual threshold.
    pub thresh: f64,
    /// Minimum inlier count for a model to be accepted.
    pub min_inliers: usize,
    /// Confidence in `[0, 1]` driving the adaptive iteration bound.
    pub confidence: f64,
    pub seed: u64,
    /// Refit on all inliers before scoring.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 100_000,
            thresh: 1.0,
            min_inliers: 3,
            confidence: 0.9999,
            seed: 1_234_567,
            refit_on_inliers: true,
        }
    }
}

/// Best model found by [`ransac`].
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub model: Option<M>,
    /// Indices of inlier data.
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over inliers.
    pub inlier_rms: f64,
    /// Iteration at which the best model was found.
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }
}

impl<M> RansacResult<M> {
    pub fn success(&self) -> bool {
        self.model.is_some()
    }
}

/// A model that can be hypothesized from a minimal sample and scored per datum.
pub trait Estimator {
    type Datum;
    type Model;

    /// Minimal number of samples needed to estimate a model.
    const MIN_SAMPLES: usize;

    /// Fit from a minimal sample; `None` when fitting fails.
    fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual in the units of `RansacOptions::thresh`.
    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Reject a sample before fitting. Default: accept everything.
    fn is_degenerate(&self, _data: &[Self::Datum], _sample: &[usize]) -> bool {
        false
    }

    /// Reject a hypothesis after fitting. Default: accept everything.
    fn is_plausible(&self, _model: &Self::Model, _data: &[Self::Datum], _sample: &[usize]) -> bool {
        true
    }

    /// Refit on the full inlier set. Default: keep the minimal-sample model.
    fn refit(&self, _data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

fn rms(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::INFINITY;
    }
    (vals.iter().map(|v| v * v).sum::<f64>() / vals.len() as f64).sqrt()
}

/// Iterations needed to draw one all-inlier sample with `confidence`.
fn adaptive_iterations(
    confidence: f64,
    inlier_ratio: f64,
    min_samples: usize,
    iters_so_far: usize,
    max_iters: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iters;
    }
    let denom = (1.0 - inlier_ratio.powi(min_samples as i32)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iters;
    }
    let n = ((1.0 - confidence).max(1e-12).ln() / denom).ceil() as usize;
    n.clamp(iters_so_far, max_iters)
}

fn score<E: Estimator>(
    est: &E,
    model: &E::Model,
    data: &[E::Datum],
    thresh: f64,
) -> (Vec<usize>, Vec<f64>) {
    let mut inliers = Vec::new();
    let mut residuals = Vec::new();
    for (i, datum) in data.iter().enumerate() {
        let r = est.residual(model, datum);
        if r <= thresh {
            inliers.push(i);
            residuals.push(r);
        }
    }
    (inliers, residuals)
}

/// Run RANSAC for `estimator` over `data`.
///
/// More inliers win; ties go to the lower inlier RMS.
pub fn ransac<E: Estimator>(
    estimator: &E,
    data: &[E::Datum],
    opts: &RansacOptions,
) -> RansacResult<E::Model> {
    let mut best: RansacResult<E::Model> = RansacResult::default();
    if data.len() < E::MIN_SAMPLES {
        return best;
    }

    let all_indices: Vec<usize> = (0..data.len()).collect();
    let mut sample = vec![0usize; E::MIN_SAMPLES];
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut iter_budget = opts.max_iters;

    let mut iters = 0;
    while iters < iter_budget {
        iters += 1;
        all_indices
            .as_slice()
            .choose_multiple(&mut rng, E::MIN_SAMPLES)
            .enumerate()
            .for_each(|(k, &idx)| sample[k] = idx);

        if estimator.is_degenerate(data, &sample) {
            continue;
        }
        let Some(model) = estimator.fit(data, &sample) else {
            continue;
        };
        if !estimator.is_plausible(&model, data, &sample) {
            continue;
        }

        let (mut inliers, mut residuals) = score(estimator, &model, data, opts.thresh);
        if inliers.len() < opts.min_inliers {
            continue;
        }

        let mut model = model;
        if opts.refit_on_inliers {
            if let Some(refined) = estimator.refit(data, &inliers) {
                let (ri, rr) = score(estimator, &refined, data, opts.thresh);
                if ri.len() >= inliers.len() {
                    model = refined;
                    inliers = ri;
                    residuals = rr;
                }
            }
        }

        let inlier_rms = rms(&residuals);
        let better = best.model.is_none()
            || inliers.len() > best.inliers.len()
            || (inliers.len() == best.inliers.len() && inlier_rms < best.inlier_rms);
        if better {
            let ratio = inliers.len() as f64 / data.len() as f64;
            best = RansacResult {
                model: Some(model),
                inliers,
                inlier_rms,
                iters,
            };
            iter_budget =
                adaptive_iterations(opts.confidence, ratio, E::MIN_SAMPLES, iters, opts.max_iters);
        }
    }

    log::debug!(
        "ransac finished after {iters} iterations: {} / {} inliers, rms {:.3e}",
        best.inliers.len(),
        data.len(),
        best.inlier_rms
    );
    best
}
