//! Scale recovery and coarse mesh registration.
//!
//! - [`estimate_scale`]: robust uniform scale from pairwise camera distances,
//!   with cross-timestep consistency filtering.
//! - [`fit_rigid`]: closed-form rigid transform from paired points.
//! - [`global_registration`]: scale, recentre and rigidly align a
//!   reconstructed mesh onto ground truth, either from FPFH feature matches
//!   under RANSAC or from supplied correspondences.

mod global_registration;
mod pointcloud;
mod rigid;
mod scale;

pub use global_registration::*;
pub use pointcloud::*;
pub use rigid::*;
pub use scale::*;
