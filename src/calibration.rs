//! Probability-quality metrics and the isotonic calibrator shared by the
//! qualification classifier and the cup ensemble.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct Metrics {
    pub samples: usize,
    pub positives: usize,
    pub brier: f64,
    pub log_loss: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

/// Brier + log loss of binary predictions against 0/1 outcomes.
pub fn evaluate_probs(predictions: &[f64], outcomes: &[bool]) -> Metrics {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return Metrics {
            samples: 0,
            positives: 0,
            brier: 0.0,
            log_loss: 0.0,
        };
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut positives = 0usize;

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let y = f64::from(*outcome);
        brier_sum += (p - y).powi(2);
        let matched = if *outcome { *p } else { 1.0 - *p }.clamp(1e-12, 1.0);
        log_loss_sum += -matched.ln();
        if *outcome {
            positives += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        positives,
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
    }
}

pub fn calibration_bins(predictions: &[f64], outcomes: &[bool], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let p = p.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        if *outcome {
            actual_sum[idx] += 1.0;
        }
    }

    let mut out = Vec::with_capacity(bins);
    for i in 0..bins {
        let count = counts[i];
        let (avg_pred, actual_rate) = if count > 0 {
            (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
        } else {
            (0.0, 0.0)
        };
        out.push(CalibrationBin {
            bucket_start: i as f64 / bins as f64,
            bucket_end: (i + 1) as f64 / bins as f64,
            count,
            avg_pred,
            actual_rate,
        });
    }
    out
}

/// Count-weighted mean |predicted - observed| over equal-width bins.
pub fn expected_calibration_error(predictions: &[f64], outcomes: &[bool], bins: usize) -> f64 {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return 0.0;
    }
    let n = predictions.len() as f64;
    calibration_bins(predictions, outcomes, bins)
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| (b.count as f64 / n) * (b.avg_pred - b.actual_rate).abs())
        .sum()
}

/// Monotone non-decreasing map fitted by pool-adjacent-violators. The
/// identity variant is what calibration degrades to when there are not
/// enough positive examples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Isotonic {
    // Block boundaries: `thresholds[i]` is the largest score of block i,
    // `values[i]` its pooled rate. Empty means identity.
    thresholds: Vec<f64>,
    values: Vec<f64>,
}

impl Isotonic {
    pub fn identity() -> Self {
        Self {
            thresholds: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Fit on (score, outcome) pairs. Scores need not be sorted.
    pub fn fit(scores: &[f64], outcomes: &[bool]) -> Self {
        debug_assert_eq!(scores.len(), outcomes.len());
        if scores.is_empty() {
            return Self::identity();
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| {
            scores[a]
                .partial_cmp(&scores[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Blocks of (max score, outcome sum, count). Ties on the score must
        // pool up front, otherwise equal scores could map to distinct
        // rates.
        let mut blocks: Vec<(f64, f64, f64)> = Vec::with_capacity(scores.len());
        for idx in order {
            match blocks.last_mut() {
                Some(last) if last.0 == scores[idx] => {
                    last.1 += f64::from(outcomes[idx]);
                    last.2 += 1.0;
                }
                _ => blocks.push((scores[idx], f64::from(outcomes[idx]), 1.0)),
            }
            while blocks.len() >= 2 {
                let n = blocks.len();
                if blocks[n - 2].1 / blocks[n - 2].2 <= blocks[n - 1].1 / blocks[n - 1].2 {
                    break;
                }
                let last = blocks[n - 1];
                let prev = &mut blocks[n - 2];
                prev.0 = prev.0.max(last.0);
                prev.1 += last.1;
                prev.2 += last.2;
                blocks.truncate(n - 1);
            }
        }

        Self {
            thresholds: blocks.iter().map(|b| b.0).collect(),
            values: blocks.iter().map(|b| b.1 / b.2).collect(),
        }
    }

    /// Calibrated value for a raw score. Scores between block boundaries
    /// interpolate linearly; scores past either end take the terminal
    /// block value.
    pub fn apply(&self, score: f64) -> f64 {
        if self.is_identity() {
            return score;
        }
        if score <= self.thresholds[0] {
            return self.values[0];
        }
        let last = self.thresholds.len() - 1;
        if score >= self.thresholds[last] {
            return self.values[last];
        }
        let idx = self.thresholds.partition_point(|t| *t < score);
        let (t0, t1) = (self.thresholds[idx - 1], self.thresholds[idx]);
        let (v0, v1) = (self.values[idx - 1], self.values[idx]);
        if t1 - t0 <= f64::EPSILON {
            return v1;
        }
        v0 + (v1 - v0) * (score - t0) / (t1 - t0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_have_zero_brier() {
        let preds = vec![1.0, 0.0, 1.0];
        let outcomes = vec![true, false, true];
        let m = evaluate_probs(&preds, &outcomes);
        assert_eq!(m.samples, 3);
        assert_eq!(m.positives, 2);
        assert!(m.brier < 1e-12);
    }

    #[test]
    fn ece_zero_for_matching_rates() {
        // All predictions 0.5, half the outcomes positive.
        let preds = vec![0.5; 10];
        let outcomes: Vec<bool> = (0..10).map(|i| i % 2 == 0).collect();
        assert!(expected_calibration_error(&preds, &outcomes, 5) < 1e-9);
    }

    #[test]
    fn isotonic_is_monotone() {
        let scores = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
        let outcomes = vec![false, false, true, false, true, true, false, true];
        let iso = Isotonic::fit(&scores, &outcomes);
        let mut prev = f64::NEG_INFINITY;
        for step in 0..=20 {
            let v = iso.apply(step as f64 / 20.0);
            assert!(v >= prev - 1e-12);
            prev = v;
        }
    }

    #[test]
    fn isotonic_pools_violators() {
        // Decreasing outcomes must pool into one flat block.
        let scores = vec![0.1, 0.5, 0.9];
        let outcomes = vec![true, false, false];
        let iso = Isotonic::fit(&scores, &outcomes);
        let pooled = iso.apply(0.5);
        assert!((pooled - 1.0 / 3.0).abs() < 1e-9);
        assert!((iso.apply(0.0) - pooled).abs() < 1e-9);
    }

    #[test]
    fn identity_passes_through() {
        let iso = Isotonic::identity();
        assert_eq!(iso.apply(0.37), 0.37);
    }

    #[test]
    fn tied_scores_pool_to_their_rate() {
        // Every prediction identical: the calibrated value is the overall
        // rate, never one side of the tie.
        let scores = vec![0.5; 10];
        let outcomes: Vec<bool> = (0..10).map(|i| i % 2 == 0).collect();
        let iso = Isotonic::fit(&scores, &outcomes);
        assert!((iso.apply(0.5) - 0.5).abs() < 1e-12);
        assert!((iso.apply(0.2) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn scores_between_blocks_interpolate() {
        // Two clean blocks: low scores never hit, high scores always hit.
        let scores = vec![0.01, 0.02, 0.9, 0.95];
        let outcomes = vec![false, false, true, true];
        let iso = Isotonic::fit(&scores, &outcomes);
        // Just above the low block must stay near its value, not jump to
        // the high block.
        assert!(iso.apply(0.03) < 0.05);
        assert!(iso.apply(0.0) == 0.0);
        assert!(iso.apply(0.99) == 1.0);
        let mid = iso.apply(0.46);
        assert!(mid > 0.2 && mid < 0.8);
    }
}
