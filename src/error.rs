use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything that can abort the prediction pipeline.
///
/// Data-layer problems carry the season/team they were found in so a caller
/// can point at the offending row without re-parsing logs.
#[derive(Error, Debug)]
pub enum PredictorError {
    #[error("missing data: training season {season} is not available")]
    MissingData { season: String },

    #[error("malformed data: {detail} (season {season}, team {team})")]
    MalformedData {
        season: String,
        team: String,
        detail: String,
    },

    #[error("identifier conflict: team {team} appears twice in season {season}")]
    IdentifierConflict { season: String, team: String },

    #[error("insufficient data: {detail}")]
    InsufficientData { detail: String },

    #[error("training failed in {component}: {detail}")]
    TrainingFailed { component: String, detail: String },

    #[error("bracket seeding infeasible after {attempts} attempts")]
    SeedingInfeasible { attempts: u32 },

    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    #[error("cancelled")]
    Cancelled,

    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl PredictorError {
    pub fn malformed(season: &str, team: &str, detail: impl Into<String>) -> Self {
        Self::MalformedData {
            season: season.to_string(),
            team: team.to_string(),
            detail: detail.into(),
        }
    }

    pub fn training(component: &str, detail: impl Into<String>) -> Self {
        Self::TrainingFailed {
            component: component.to_string(),
            detail: detail.into(),
        }
    }
}

/// Non-fatal degradations, carried on the output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineWarning {
    /// A calibrator had fewer than 3 positive examples and fell back to the
    /// identity map.
    CalibrationSkipped { component: String, positives: usize },
    /// No historical series were available; the series model runs on its
    /// round base rates alone.
    SeriesHistoryEmpty,
    /// The simulation was cancelled after this many completed trials.
    PartialSimulation { completed_trials: u64 },
}

impl std::fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CalibrationSkipped {
                component,
                positives,
            } => write!(
                f,
                "{component}: isotonic calibration skipped ({positives} positive examples)"
            ),
            Self::SeriesHistoryEmpty => {
                write!(f, "series model fitted without history, using round base rates")
            }
            Self::PartialSimulation { completed_trials } => {
                write!(f, "simulation cancelled after {completed_trials} trials")
            }
        }
    }
}
