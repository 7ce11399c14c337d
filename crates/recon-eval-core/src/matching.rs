//! Correspondence between reference and reconstructed cameras.
//!
//! Both lists are arenas; a correspondence is an index into the other list.
//! Unmatched cameras keep `matched == None` and never enter a statistic.

use crate::{CameraReconstructed, CameraReference, Real};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("{side} camera {index} points at {target}, but only {len} entries exist")]
    MalformedCorrespondence {
        side: &'static str,
        index: usize,
        target: usize,
        len: usize,
    },
    #[error("correspondence {reference} <-> {reconstructed} is not mutual")]
    NotMutual {
        reference: usize,
        reconstructed: usize,
    },
}

/// Counts produced by [`match_cameras`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub reference: usize,
    pub reconstructed: usize,
    pub matched: usize,
}

impl MatchSummary {
    /// Matched over reference cameras; `None` without reference cameras.
    pub fn reconstruction_rate(&self) -> Option<Real> {
        (self.reference > 0).then(|| self.matched as Real / self.reference as Real)
    }
}

/// Match cameras by image name and propagate timesteps to the reconstruction.
///
/// Previous correspondences are cleared first, so the call is idempotent.
/// Image names are unique within each list.
pub fn match_cameras(
    references: &mut [CameraReference],
    reconstructed: &mut [CameraReconstructed],
) -> MatchSummary {
    for cam in references.iter_mut() {
        cam.matched = None;
    }
    for cam in reconstructed.iter_mut() {
        cam.matched = None;
        cam.timestep = None;
    }

    let mut matched = 0;
    for (i, reference) in references.iter_mut().enumerate() {
        if let Some(j) = reconstructed.iter().position(|r| r.image == reference.image) {
            reference.matched = Some(j);
            reconstructed[j].matched = Some(i);
            reconstructed[j].timestep = Some(reference.timestep);
            matched += 1;
        }
    }

    let summary = MatchSummary {
        reference: references.len(),
        reconstructed: reconstructed.len(),
        matched,
    };
    log::debug!(
        "matched {} of {} reference cameras ({} reconstructed)",
        summary.matched,
        summary.reference,
        summary.reconstructed
    );
    summary
}

/// `(reference, reconstructed)` index pairs in reference order.
///
/// Fails fast when an index is out of range or not mutual.
pub fn matched_pairs(
    references: &[CameraReference],
    reconstructed: &[CameraReconstructed],
) -> Result<Vec<(usize, usize)>, MatchError> {
    let mut pairs = Vec::new();
    for (i, cam) in references.iter().enumerate() {
        let Some(j) = cam.matched else { continue };
        let other = reconstructed
            .get(j)
            .ok_or(MatchError::MalformedCorrespondence {
                side: "reference",
                index: i,
                target: j,
                len: reconstructed.len(),
            })?;
        if other.matched != Some(i) {
            return Err(MatchError::NotMutual {
                reference: i,
                reconstructed: j,
            });
        }
        pairs.push((i, j));
    }
    for (j, cam) in reconstructed.iter().enumerate() {
        if let Some(i) = cam.matched {
            if i >= references.len() {
                return Err(MatchError::MalformedCorrespondence {
                    side: "reconstructed",
                    index: j,
                    target: i,
                    len: references.len(),
                });
            }
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Mat3, Vec3};

    fn refs(names: &[&str]) -> Vec<CameraReference> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let location = Vec3::new(i as f64, 0.0, 0.0);
                CameraReference::new(*n, location, Vec3::zeros(), 1 + i as u32 / 2, i % 2)
            })
            .collect()
    }

    fn recs(names: &[&str]) -> Vec<CameraReconstructed> {
        names
            .iter()
            .map(|n| CameraReconstructed::new(*n, Vec3::zeros(), Mat3::identity()))
            .collect()
    }

    #[test]
    fn matches_by_name_and_propagates_timestep() {
        let mut r = refs(&["a", "b", "c", "d"]);
        let mut c = recs(&["d", "b"]);
        let summary = match_cameras(&mut r, &mut c);
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.reconstruction_rate(), Some(0.5));
        assert_eq!(r[1].matched, Some(1));
        assert_eq!(r[3].matched, Some(0));
        assert_eq!(r[0].matched, None);
        assert_eq!(c[0].timestep, Some(2));
        assert_eq!(c[1].timestep, Some(1));
        assert_eq!(matched_pairs(&r, &c).unwrap(), vec![(1, 1), (3, 0)]);
    }

    #[test]
    fn matching_is_idempotent_and_order_independent() {
        let mut r = refs(&["a", "b", "c"]);
        let mut c1 = recs(&["c", "a"]);
        let mut c2 = recs(&["a", "c"]);
        let first = match_cameras(&mut r, &mut c1);
        let again = match_cameras(&mut r, &mut c1);
        assert_eq!(first, again);
        let names1: Vec<_> = matched_pairs(&r, &c1)
            .unwrap()
            .into_iter()
            .map(|(i, j)| (r[i].image.clone(), c1[j].image.clone()))
            .collect();
        match_cameras(&mut r, &mut c2);
        let names2: Vec<_> = matched_pairs(&r, &c2)
            .unwrap()
            .into_iter()
            .map(|(i, j)| (r[i].image.clone(), c2[j].image.clone()))
            .collect();
        assert_eq!(names1, names2);
    }

    #[test]
    fn empty_reconstruction_leaves_everything_unmatched() {
        let mut r = refs(&["a", "b"]);
        let summary = match_cameras(&mut r, &mut []);
        assert_eq!(summary.matched, 0);
        assert!(r.iter().all(|c| c.matched.is_none()));
        assert!(matched_pairs(&r, &[]).unwrap().is_empty());
        assert_eq!(match_cameras(&mut [], &mut []).reconstruction_rate(), None);
    }

    #[test]
    fn dangling_index_fails_fast() {
        let mut r = refs(&["a"]);
        r[0].matched = Some(5);
        let err = matched_pairs(&r, &recs(&["a"])).unwrap_err();
        assert!(matches!(err, MatchError::MalformedCorrespondence { target: 5, .. }));
    }
}
