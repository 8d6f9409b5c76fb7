//! Composite-strength weighting: a non-negative, unit-sum linear weighting
//! of the feature vector, learned from graded season outcomes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PredictorError;
use crate::features::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector};
use crate::linear::ridge_fit;
use crate::team_season::season_start_year;

// Fixed so that no single feature can swallow the composite unless the data
// really is one-dimensional.
const RIDGE_STRENGTH: f64 = 4.0;

/// Graded outcome for the regression target: missed, qualified, finalist,
/// champion.
pub fn graded_outcome(qualified: bool, reached_final: bool, won_cup: bool) -> f64 {
    let grade = match (qualified, reached_final, won_cup) {
        (_, _, true) => 3.0,
        (_, true, false) => 2.0,
        (true, false, false) => 1.0,
        (false, ..) => 0.0,
    };
    grade / 3.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedWeights {
    values: [f64; FEATURE_COUNT],
}

impl LearnedWeights {
    pub fn uniform() -> Self {
        Self {
            values: [1.0 / FEATURE_COUNT as f64; FEATURE_COUNT],
        }
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.values
    }

    /// Composite strength: the weighted sum of the feature vector.
    pub fn score(&self, features: &FeatureVector) -> f64 {
        self.values
            .iter()
            .zip(features.as_slice())
            .map(|(w, x)| w * x)
            .sum()
    }

    /// Name -> weight, ordered by name so serialized artifacts are stable.
    pub fn named(&self) -> BTreeMap<String, f64> {
        FEATURE_NAMES
            .iter()
            .zip(&self.values)
            .map(|(name, w)| ((*name).to_string(), *w))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WeightOptimizer;

impl WeightOptimizer {
    /// Ridge-fit the graded outcome, clip negative coefficients, and
    /// renormalize to a unit-sum weighting.
    pub fn fit(
        features: &[FeatureVector],
        graded: &[f64],
        sample_weights: &[f64],
    ) -> Result<LearnedWeights, PredictorError> {
        let xs: Vec<Vec<f64>> = features.iter().map(|f| f.as_slice().to_vec()).collect();
        let (_, beta) = ridge_fit(&xs, graded, sample_weights, RIDGE_STRENGTH)?;

        let mut values = [0.0; FEATURE_COUNT];
        for (slot, raw) in values.iter_mut().zip(&beta) {
            *slot = raw.max(0.0);
        }
        let total: f64 = values.iter().sum();
        if total <= 1e-9 {
            // Nothing discriminates (e.g. a degenerate corpus); an even
            // weighting keeps the composite defined.
            warn!("weight optimizer found no positive coefficients, using uniform weights");
            return Ok(LearnedWeights::uniform());
        }
        for slot in &mut values {
            *slot /= total;
        }
        Ok(LearnedWeights { values })
    }
}

/// Per-sample recency weights: `exp(-lambda * seasons_ago)`, boosted for
/// championship seasons. `lambda = 0` disables decay (all ones when the
/// boost is neutral too).
pub fn recency_weights(
    seasons: &[&str],
    won_cup: &[bool],
    decay_rate: f64,
    cup_winner_boost: f64,
) -> Vec<f64> {
    debug_assert_eq!(seasons.len(), won_cup.len());
    let latest = seasons
        .iter()
        .filter_map(|s| season_start_year(s))
        .max()
        .unwrap_or(0);

    seasons
        .iter()
        .zip(won_cup)
        .map(|(season, champion)| {
            let delta = season_start_year(season)
                .map(|year| (latest - year).max(0) as f64)
                .unwrap_or(0.0);
            let boost = if *champion { cup_winner_boost } else { 1.0 };
            ((-decay_rate * delta).exp() * boost).max(0.05)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureBuilder;
    use crate::test_fixtures::spread_corpus;

    fn fitted_inputs() -> (Vec<FeatureVector>, Vec<f64>) {
        let corpus = spread_corpus(4);
        let mut builder = FeatureBuilder::new();
        builder.fit(&corpus).unwrap();
        let features: Vec<FeatureVector> =
            corpus.iter().map(|t| builder.transform(t).unwrap()).collect();
        let graded: Vec<f64> = corpus
            .iter()
            .map(|t| {
                let labels = t.labels.expect("spread corpus is labeled");
                graded_outcome(labels.qualified, labels.reached_final, labels.won_cup)
            })
            .collect();
        (features, graded)
    }

    #[test]
    fn weights_are_simplex() {
        let (features, graded) = fitted_inputs();
        let sample_weights = vec![1.0; features.len()];
        let weights = WeightOptimizer::fit(&features, &graded, &sample_weights).unwrap();
        let sum: f64 = weights.values().iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(weights.values().iter().all(|w| *w >= 0.0));
    }

    #[test]
    fn ridge_keeps_weights_diffuse() {
        let (features, graded) = fitted_inputs();
        let sample_weights = vec![1.0; features.len()];
        let weights = WeightOptimizer::fit(&features, &graded, &sample_weights).unwrap();
        let max = weights.values().iter().cloned().fold(0.0_f64, f64::max);
        assert!(max < 0.75, "one feature took {max} of the weighting");
        let nontrivial = weights.values().iter().filter(|w| **w > 0.01).count();
        assert!(nontrivial >= 3);
    }

    #[test]
    fn degenerate_corpus_falls_back_to_uniform() {
        let features = vec![FeatureVector([0.0; FEATURE_COUNT]); 20];
        let graded: Vec<f64> = (0..20).map(|i| f64::from(i % 2) / 3.0).collect();
        let sample_weights = vec![1.0; 20];
        let weights = WeightOptimizer::fit(&features, &graded, &sample_weights).unwrap();
        assert_eq!(weights, LearnedWeights::uniform());
    }

    #[test]
    fn stronger_profiles_score_higher() {
        let (features, graded) = fitted_inputs();
        let sample_weights = vec![1.0; features.len()];
        let weights = WeightOptimizer::fit(&features, &graded, &sample_weights).unwrap();

        let mut paired: Vec<(f64, f64)> = features
            .iter()
            .zip(&graded)
            .map(|(f, g)| (weights.score(f), *g))
            .collect();
        paired.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        let bottom: f64 = paired.iter().take(16).map(|(_, g)| g).sum();
        let top: f64 = paired.iter().rev().take(16).map(|(_, g)| g).sum();
        assert!(top > bottom, "high composite strength should track outcomes");
    }

    #[test]
    fn recency_decays_and_boosts() {
        let seasons = ["2020-2021", "2021-2022", "2022-2023"];
        let champs = [false, true, false];
        let weights = recency_weights(&seasons, &champs, 0.15, 2.0);
        assert!(weights[0] < weights[2]);
        assert!(weights[1] > weights[0]);
        // Neutral settings mean flat weights.
        let flat = recency_weights(&seasons, &champs, 0.0, 1.0);
        assert!(flat.iter().all(|w| (*w - 1.0).abs() < 1e-12));
    }

    #[test]
    fn graded_outcome_scale() {
        assert_eq!(graded_outcome(false, false, false), 0.0);
        assert_eq!(graded_outcome(true, false, false), 1.0 / 3.0);
        assert_eq!(graded_outcome(true, true, false), 2.0 / 3.0);
        assert_eq!(graded_outcome(true, true, true), 1.0);
    }
}
