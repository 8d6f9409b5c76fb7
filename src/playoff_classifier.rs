//! Calibrated probability of qualifying for the post-season.
//!
//! A weighted logistic regression provides the raw score; an isotonic map
//! fitted on 5-fold out-of-fold predictions corrects its shape. Across a
//! 32-team league the probabilities should account for the 16 post-season
//! slots; a league-wide drift outside the tolerance is shrunk back.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calibration::Isotonic;
use crate::error::{PipelineWarning, PredictorError};
use crate::features::FeatureVector;
use crate::linear::{logistic_fit, sigmoid};

const L2_DAMPING: f64 = 1.0;
const MAX_NEWTON_ITER: u32 = 60;
const CV_FOLDS: usize = 5;
const MIN_CALIBRATION_POSITIVES: usize = 3;

pub const PLAYOFF_SLOTS: f64 = 16.0;
pub const SLOT_SUM_TOLERANCE: f64 = 1.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Fitted {
    intercept: f64,
    beta: Vec<f64>,
    calibrator: Isotonic,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayoffClassifier {
    fitted: Option<Fitted>,
}

impl PlayoffClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit the logistic model and its cross-validated calibrator. Returns a
    /// warning when calibration had to be skipped.
    pub fn fit(
        &mut self,
        features: &[FeatureVector],
        qualified: &[bool],
        sample_weights: &[f64],
    ) -> Result<Option<PipelineWarning>, PredictorError> {
        let xs: Vec<Vec<f64>> = features.iter().map(|f| f.as_slice().to_vec()).collect();
        let ys: Vec<f64> = qualified.iter().map(|q| f64::from(*q)).collect();

        let fit = logistic_fit(
            &xs,
            &ys,
            sample_weights,
            None,
            true,
            L2_DAMPING,
            MAX_NEWTON_ITER,
        )
        .map_err(|err| {
            PredictorError::training("playoff classifier", err.to_string())
        })?;
        debug!(iterations = fit.iterations, "qualification logistic converged");

        let positives = qualified.iter().filter(|q| **q).count();
        let (calibrator, warning) = if positives < MIN_CALIBRATION_POSITIVES {
            info!(positives, "skipping qualification calibration");
            (
                Isotonic::identity(),
                Some(PipelineWarning::CalibrationSkipped {
                    component: "playoff classifier".to_string(),
                    positives,
                }),
            )
        } else {
            let oof = out_of_fold_scores(&xs, &ys, sample_weights)?;
            (Isotonic::fit(&oof, qualified), None)
        };

        self.fitted = Some(Fitted {
            intercept: fit.intercept,
            beta: fit.beta,
            calibrator,
        });
        Ok(warning)
    }

    pub fn predict_proba(&self, features: &FeatureVector) -> Result<f64, PredictorError> {
        let Some(fitted) = &self.fitted else {
            return Err(PredictorError::InsufficientData {
                detail: "playoff classifier used before fit".to_string(),
            });
        };
        let mut z = fitted.intercept;
        for (b, x) in fitted.beta.iter().zip(features.as_slice()) {
            z += b * x;
        }
        Ok(fitted.calibrator.apply(sigmoid(z)).clamp(0.0, 1.0))
    }
}

/// Out-of-fold raw scores for calibration: deterministic `i % k` fold
/// assignment, refit on the complement, score the fold.
fn out_of_fold_scores(
    xs: &[Vec<f64>],
    ys: &[f64],
    sample_weights: &[f64],
) -> Result<Vec<f64>, PredictorError> {
    let folds = CV_FOLDS.min(xs.len());
    let mut scores = vec![0.0; xs.len()];

    for fold in 0..folds {
        let mut train_x = Vec::new();
        let mut train_y = Vec::new();
        let mut train_w = Vec::new();
        for i in 0..xs.len() {
            if i % folds != fold {
                train_x.push(xs[i].clone());
                train_y.push(ys[i]);
                train_w.push(sample_weights[i]);
            }
        }
        if train_x.is_empty() {
            continue;
        }
        let fit = logistic_fit(
            &train_x,
            &train_y,
            &train_w,
            None,
            true,
            L2_DAMPING,
            MAX_NEWTON_ITER,
        )
        .map_err(|err| PredictorError::training("playoff classifier (cv)", err.to_string()))?;

        for i in (fold..xs.len()).step_by(folds) {
            let mut z = fit.intercept;
            for (b, x) in fit.beta.iter().zip(&xs[i]) {
                z += b * x;
            }
            scores[i] = sigmoid(z);
        }
    }
    Ok(scores)
}

/// Shrink league-wide qualification probabilities toward the slot average
/// just enough to land on the violated tolerance boundary. The shift is
/// uniform across teams; teams pinned at 0 or 1 shed their share onto the
/// rest.
pub fn shrink_to_slots(probs: &mut [f64]) {
    for _ in 0..10 {
        let sum: f64 = probs.iter().sum();
        let target = if sum > PLAYOFF_SLOTS + SLOT_SUM_TOLERANCE {
            PLAYOFF_SLOTS + SLOT_SUM_TOLERANCE
        } else if sum < PLAYOFF_SLOTS - SLOT_SUM_TOLERANCE {
            PLAYOFF_SLOTS - SLOT_SUM_TOLERANCE
        } else {
            return;
        };

        let needs_increase = target > sum;
        let movable = probs
            .iter()
            .filter(|p| if needs_increase { **p < 1.0 } else { **p > 0.0 })
            .count();
        if movable == 0 {
            return;
        }
        let delta = (target - sum) / movable as f64;
        for p in probs.iter_mut() {
            if (needs_increase && *p < 1.0) || (!needs_increase && *p > 0.0) {
                *p = (*p + delta).clamp(0.0, 1.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureBuilder;
    use crate::test_fixtures::spread_corpus;

    fn fitted_classifier() -> (PlayoffClassifier, Vec<FeatureVector>, Vec<bool>) {
        let corpus = spread_corpus(4);
        let mut builder = FeatureBuilder::new();
        builder.fit(&corpus).unwrap();
        let features: Vec<FeatureVector> =
            corpus.iter().map(|t| builder.transform(t).unwrap()).collect();
        let qualified: Vec<bool> = corpus
            .iter()
            .map(|t| t.labels.expect("labeled").qualified)
            .collect();
        let weights = vec![1.0; features.len()];

        let mut clf = PlayoffClassifier::new();
        let warning = clf.fit(&features, &qualified, &weights).unwrap();
        assert!(warning.is_none());
        (clf, features, qualified)
    }

    #[test]
    fn predict_before_fit_fails() {
        let clf = PlayoffClassifier::new();
        let v = FeatureVector([0.0; crate::features::FEATURE_COUNT]);
        assert!(clf.predict_proba(&v).is_err());
    }

    #[test]
    fn qualified_teams_get_higher_probabilities() {
        let (clf, features, qualified) = fitted_classifier();
        let mut in_sum = 0.0;
        let mut in_n = 0.0;
        let mut out_sum = 0.0;
        let mut out_n = 0.0;
        for (f, q) in features.iter().zip(&qualified) {
            let p = clf.predict_proba(f).unwrap();
            assert!((0.0..=1.0).contains(&p));
            if *q {
                in_sum += p;
                in_n += 1.0;
            } else {
                out_sum += p;
                out_n += 1.0;
            }
        }
        assert!(in_sum / in_n > out_sum / out_n + 0.2);
    }

    #[test]
    fn few_positives_skip_calibration() {
        let corpus = spread_corpus(1);
        let mut builder = FeatureBuilder::new();
        builder.fit(&corpus).unwrap();
        let features: Vec<FeatureVector> =
            corpus.iter().map(|t| builder.transform(t).unwrap()).collect();
        // Pretend only two teams ever qualified.
        let qualified: Vec<bool> = (0..features.len()).map(|i| i < 2).collect();
        let weights = vec![1.0; features.len()];

        let mut clf = PlayoffClassifier::new();
        let warning = clf.fit(&features, &qualified, &weights).unwrap();
        assert!(matches!(
            warning,
            Some(PipelineWarning::CalibrationSkipped { positives: 2, .. })
        ));
    }

    #[test]
    fn shrinkage_restores_tolerance() {
        let mut high = vec![0.9; 32];
        shrink_to_slots(&mut high);
        let sum: f64 = high.iter().sum();
        assert!((sum - (PLAYOFF_SLOTS + SLOT_SUM_TOLERANCE)).abs() < 1e-9);

        let mut low = vec![0.2; 32];
        shrink_to_slots(&mut low);
        let sum: f64 = low.iter().sum();
        assert!((sum - (PLAYOFF_SLOTS - SLOT_SUM_TOLERANCE)).abs() < 1e-9);

        let mut fine = vec![0.5; 32];
        let before = fine.clone();
        shrink_to_slots(&mut fine);
        assert_eq!(fine, before);
    }

    #[test]
    fn shrinkage_keeps_confident_predictions_pinned() {
        // A near-certain qualifier stays near-certain; the shortfall lands
        // on the rest of the league.
        let mut probs = vec![0.03; 32];
        probs[0] = 0.995;
        shrink_to_slots(&mut probs);
        assert!(probs[0] > 0.99);
        let sum: f64 = probs.iter().sum();
        assert!((sum - (PLAYOFF_SLOTS - SLOT_SUM_TOLERANCE)).abs() < 1e-6);
    }
}
