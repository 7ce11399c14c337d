//! Parameter studies: one evaluation per row of `ParameterSet.csv`.
//!
//! Results accumulate in a [`StudyAccumulator`] threaded through the loop;
//! `EvaluationParameterStudy.csv` is rewritten after every row so an
//! interrupted sweep keeps what it finished. A failed dataset becomes a row
//! carrying its error instead of stopping the sweep.

use std::path::{Path, PathBuf};

use anyhow::Result;
use recon_eval_core::Real;
use serde::{Deserialize, Serialize};

use crate::evaluation::{
    DatasetPaths, EvaluationConfig, EvaluationSummary, ReconstructionEvaluation, run_evaluation,
};
use crate::io::{read_rows, write_rows};
use crate::session::EvaluationSession;

pub const PARAMETER_SET_FILE: &str = "ParameterSet.csv";
pub const STUDY_RESULTS_FILE: &str = "EvaluationParameterStudy.csv";

/// One row of `ParameterSet.csv`; paths are relative to the study directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub output_dir: PathBuf,
    pub image_dir: PathBuf,
    pub obj_path: PathBuf,
}

impl ParameterSet {
    pub fn paths(&self, study_dir: &Path) -> DatasetPaths {
        DatasetPaths::new(
            study_dir.join(&self.output_dir),
            study_dir.join(&self.image_dir),
            study_dir.join(&self.obj_path),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyStatus {
    Evaluated,
    Failed,
}

/// Headline metrics of one parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyRow {
    pub output_dir: PathBuf,
    pub image_dir: PathBuf,
    pub obj_path: PathBuf,
    pub status: StudyStatus,
    pub error: Option<String>,
    pub reconstruction_rate: Option<Real>,
    pub scale_median: Option<Real>,
    pub scale_std: Option<Real>,
    pub scale_outliers: Option<usize>,
    pub c2m_mean_after_icp: Option<Real>,
    pub c2m_std_after_icp: Option<Real>,
    pub position_error_median: Option<Real>,
    pub relative_position_error_median: Option<Real>,
    pub orientation_error_median_deg: Option<Real>,
    pub position_outliers: Option<usize>,
    pub volume_rel_error: Option<Real>,
    pub surface_area_rel_error: Option<Real>,
    pub sphericity_rel_error: Option<Real>,
}

impl StudyRow {
    fn empty(set: &ParameterSet, status: StudyStatus) -> Self {
        Self {
            output_dir: set.output_dir.clone(),
            image_dir: set.image_dir.clone(),
            obj_path: set.obj_path.clone(),
            status,
            error: None,
            reconstruction_rate: None,
            scale_median: None,
            scale_std: None,
            scale_outliers: None,
            c2m_mean_after_icp: None,
            c2m_std_after_icp: None,
            position_error_median: None,
            relative_position_error_median: None,
            orientation_error_median_deg: None,
            position_outliers: None,
            volume_rel_error: None,
            surface_area_rel_error: None,
            sphericity_rel_error: None,
        }
    }

    pub fn evaluated(set: &ParameterSet, summary: &EvaluationSummary) -> Self {
        Self {
            reconstruction_rate: summary.reconstruction_rate,
            scale_median: Some(summary.scale_median),
            scale_std: Some(summary.scale_std),
            scale_outliers: Some(summary.scale_outliers),
            c2m_mean_after_icp: summary.c2m_mean_after_icp,
            c2m_std_after_icp: summary.c2m_std_after_icp,
            position_error_median: summary.position_error_median,
            relative_position_error_median: summary.relative_position_error_median,
            orientation_error_median_deg: summary.orientation_error_median_deg,
            position_outliers: summary.position_outliers,
            volume_rel_error: summary.volume_rel_error,
            surface_area_rel_error: summary.surface_area_rel_error,
            sphericity_rel_error: summary.sphericity_rel_error,
            ..Self::empty(set, StudyStatus::Evaluated)
        }
    }

    pub fn failed(set: &ParameterSet, error: &anyhow::Error) -> Self {
        Self {
            error: Some(format!("{error:#}")),
            ..Self::empty(set, StudyStatus::Failed)
        }
    }
}

/// Rows collected so far.
#[derive(Debug, Clone, Default)]
pub struct StudyAccumulator {
    rows: Vec<StudyRow>,
}

impl StudyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, row: StudyRow) -> Self {
        self.rows.push(row);
        self
    }

    pub fn rows(&self) -> &[StudyRow] {
        &self.rows
    }

    pub fn failures(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.status == StudyStatus::Failed)
            .count()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_rows(path, &self.rows)
    }
}

fn evaluate_parameter_set(
    set: &ParameterSet,
    study_dir: &Path,
    config: &EvaluationConfig,
) -> Result<EvaluationSummary> {
    let mut session = EvaluationSession::<ReconstructionEvaluation>::with_description(format!(
        "parameter study {}",
        study_dir.display()
    ));
    session.set_config(config.clone())?;
    run_evaluation(&mut session, set.paths(study_dir))?;
    Ok(EvaluationSummary::from(session.require_output()?))
}

/// Evaluate every parameter set of the study in `study_dir`.
pub fn run_parameter_study(
    study_dir: &Path,
    config: &EvaluationConfig,
) -> Result<StudyAccumulator> {
    let sets: Vec<ParameterSet> = read_rows(&study_dir.join(PARAMETER_SET_FILE))?;
    let results = study_dir.join(STUDY_RESULTS_FILE);
    let total = sets.len();
    log::info!("evaluating {total} parameter sets from {}", study_dir.display());

    let study = sets
        .iter()
        .enumerate()
        .try_fold(StudyAccumulator::new(), |acc, (i, set)| -> Result<_> {
            log::info!(
                "parameter set {}/{total}: {}",
                i + 1,
                set.output_dir.display()
            );
            let row = match evaluate_parameter_set(set, study_dir, config) {
                Ok(summary) => StudyRow::evaluated(set, &summary),
                Err(err) => {
                    log::error!("parameter set {} failed: {err:#}", i + 1);
                    StudyRow::failed(set, &err)
                }
            };
            let acc = acc.push(row);
            acc.write(&results)?;
            Ok(acc)
        })?;

    log::info!(
        "study finished: {} of {total} parameter sets evaluated, results in {}",
        total - study.failures(),
        results.display()
    );
    Ok(study)
}
