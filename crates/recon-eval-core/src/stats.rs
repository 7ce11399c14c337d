//! Summary statistics over real-valued samples.

use crate::Real;
use serde::{Deserialize, Serialize};

/// Mean, median and population standard deviation of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub count: usize,
    pub mean: Real,
    pub median: Real,
    pub std: Real,
    pub min: Real,
    pub max: Real,
}

impl SampleStats {
    /// Summarize `values`, or `None` when the sample is empty.
    ///
    /// Non-finite values are not filtered; callers decide what belongs in the
    /// sample.
    pub fn from_samples(values: &[Real]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as Real;
        let mean = values.iter().sum::<Real>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<Real>() / n;
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Some(Self {
            count: values.len(),
            mean,
            median: median_of_sorted(&sorted),
            std: var.sqrt(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        })
    }
}

fn median_of_sorted(sorted: &[Real]) -> Real {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}
