//! Best-of-seven series win probability for the nominally higher seed.
//!
//! Round base rates are anchored as fixed intercepts: with no strength or
//! experience edge the model reproduces the historical higher-seed win rate
//! for that round. Only the slopes are fitted. The conference-final anchor
//! sits at a coin flip, which is exactly why the anchor exists: a pure
//! strength model over-predicts the favorite there.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineWarning, PredictorError};
use crate::features::{FeatureVector, IDX_PLAYOFF_EXPERIENCE};
use crate::linear::{logistic_fit, logit, sigmoid};
use crate::weights::LearnedWeights;

/// Historical higher-seed series win rate per round 1..4.
pub const ROUND_BASE_RATES: [f64; 4] = [0.59, 0.53, 0.50, 0.53];

const L2_DAMPING: f64 = 0.5;
const MAX_NEWTON_ITER: u32 = 60;
const PROB_FLOOR: f64 = 0.001;

// Prior slopes used until real series history is fitted: one unit of
// composite-strength edge is worth about a logit, experience a sliver.
const PRIOR_STRENGTH_SLOPE: f64 = 1.0;
const PRIOR_EXPERIENCE_SLOPE: f64 = 0.1;

/// One historical series joined against that season's fitted features.
#[derive(Debug, Clone)]
pub struct SeriesExample {
    pub higher: FeatureVector,
    pub lower: FeatureVector,
    pub round: u8,
    pub higher_won: bool,
}

/// A side of a series, reduced to what the model consumes.
#[derive(Debug, Clone, Copy)]
pub struct SeriesTeam {
    pub strength: f64,
    pub experience: f64,
}

impl SeriesTeam {
    pub fn from_features(features: &FeatureVector, weights: &LearnedWeights) -> Self {
        Self {
            strength: weights.score(features),
            experience: features.get(IDX_PLAYOFF_EXPERIENCE),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesModel {
    // strength diff, experience diff, strength diff x round depth
    slopes: [f64; 3],
}

impl Default for SeriesModel {
    fn default() -> Self {
        Self {
            slopes: [PRIOR_STRENGTH_SLOPE, PRIOR_EXPERIENCE_SLOPE, 0.0],
        }
    }
}

impl SeriesModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit the slopes on historical series. An empty history keeps the
    /// anchors and prior slopes and reports a warning rather than aborting.
    pub fn fit(
        &mut self,
        examples: &[SeriesExample],
        weights: &LearnedWeights,
    ) -> Result<Option<PipelineWarning>, PredictorError> {
        if examples.is_empty() {
            *self = Self::default();
            warn!("no historical series; series model keeps prior slopes and round base rates");
            return Ok(Some(PipelineWarning::SeriesHistoryEmpty));
        }

        let mut xs = Vec::with_capacity(examples.len());
        let mut ys = Vec::with_capacity(examples.len());
        let mut offsets = Vec::with_capacity(examples.len());
        for example in examples {
            let round = validate_round(example.round)?;
            let higher = SeriesTeam::from_features(&example.higher, weights);
            let lower = SeriesTeam::from_features(&example.lower, weights);
            xs.push(inputs(higher, lower, round));
            ys.push(f64::from(example.higher_won));
            offsets.push(logit(ROUND_BASE_RATES[usize::from(round) - 1]));
        }
        let sample_weights = vec![1.0; xs.len()];

        let fit = logistic_fit(
            &xs,
            &ys,
            &sample_weights,
            Some(&offsets),
            false,
            L2_DAMPING,
            MAX_NEWTON_ITER,
        )
        .map_err(|err| PredictorError::training("series model", err.to_string()))?;

        self.slopes = [fit.beta[0], fit.beta[1], fit.beta[2]];
        debug!(
            strength = self.slopes[0],
            experience = self.slopes[1],
            interaction = self.slopes[2],
            examples = examples.len(),
            "series model fitted"
        );
        Ok(None)
    }

    /// Probability that the higher seed wins the series in the given round.
    pub fn predict(&self, higher: SeriesTeam, lower: SeriesTeam, round: u8) -> f64 {
        let Ok(round) = validate_round(round) else {
            return 0.5;
        };
        let x = inputs(higher, lower, round);
        let mut z = logit(ROUND_BASE_RATES[usize::from(round) - 1]);
        for (slope, value) in self.slopes.iter().zip(&x) {
            z += slope * value;
        }
        sigmoid(z).clamp(PROB_FLOOR, 1.0 - PROB_FLOOR)
    }
}

fn validate_round(round: u8) -> Result<u8, PredictorError> {
    if (1..=4).contains(&round) {
        Ok(round)
    } else {
        Err(PredictorError::InsufficientData {
            detail: format!("series round {round} outside 1..4"),
        })
    }
}

fn inputs(higher: SeriesTeam, lower: SeriesTeam, round: u8) -> Vec<f64> {
    let strength_diff = higher.strength - lower.strength;
    let experience_diff = higher.experience - lower.experience;
    let round_depth = f64::from(round - 1) / 3.0;
    vec![strength_diff, experience_diff, strength_diff * round_depth]
}
