//! Final combination of qualification probabilities and simulation output:
//! gating, cup calibration, exact normalization, tiers, and the
//! monotone-chain consistency pass.

use serde::{Deserialize, Serialize};

use crate::calibration::Isotonic;
use crate::error::PipelineWarning;

/// Below this qualification probability a team's cup and round-4 mass is
/// zeroed outright.
pub const QUALIFICATION_FLOOR: f64 = 0.1;
/// Full simulation weight is granted at and above this qualification
/// probability; below it the cup mass scales down linearly.
pub const GATE_PIVOT: f64 = 0.5;

const MIN_CALIBRATION_POSITIVES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Elite,
    Contender,
    Bubble,
    Longshot,
}

/// Gate a raw simulated cup probability by qualification probability.
pub fn gate_cup_probability(raw_cup: f64, playoff_prob: f64) -> f64 {
    if playoff_prob < QUALIFICATION_FLOOR {
        return 0.0;
    }
    raw_cup * (playoff_prob / GATE_PIVOT).min(1.0)
}

/// Fit the cup calibrator on historical (gated simulation, won cup) pairs.
/// Too few positives degrade to the identity map with a warning.
pub fn fit_cup_calibrator(
    scores: &[f64],
    won_cup: &[bool],
) -> (Isotonic, Option<PipelineWarning>) {
    let positives = won_cup.iter().filter(|w| **w).count();
    if positives < MIN_CALIBRATION_POSITIVES {
        return (
            Isotonic::identity(),
            Some(PipelineWarning::CalibrationSkipped {
                component: "cup ensemble".to_string(),
                positives,
            }),
        );
    }
    (Isotonic::fit(scores, won_cup), None)
}

/// Per-team ensemble output; round probabilities already satisfy the
/// monotone chain under the qualification probability.
#[derive(Debug, Clone, Copy)]
pub struct EnsembleRow {
    pub cup_prob: f64,
    pub rounds: [f64; 4],
    pub tier: Tier,
}

/// Combine per-team inputs into the final cup distribution.
///
/// The cup mass sums to exactly 1 afterwards, with each team capped at its
/// qualification probability; capped teams shed their excess onto the rest
/// (water-filling), and the float residue lands on the largest free share.
pub fn finalize(
    strengths: &[f64],
    playoff_probs: &[f64],
    round_probs: &[[f64; 4]],
    calibrator: &Isotonic,
) -> Vec<EnsembleRow> {
    let n = strengths.len();
    debug_assert_eq!(playoff_probs.len(), n);
    debug_assert_eq!(round_probs.len(), n);

    let mut cups: Vec<f64> = (0..n)
        .map(|i| {
            let gated = gate_cup_probability(round_probs[i][3], playoff_probs[i]);
            if gated == 0.0 {
                0.0
            } else {
                calibrator.apply(gated).clamp(0.0, 1.0)
            }
        })
        .collect();

    let caps: Vec<f64> = playoff_probs
        .iter()
        .map(|q| if *q < QUALIFICATION_FLOOR { 0.0 } else { *q })
        .collect();
    normalize_capped(&mut cups, &caps);

    let tiers = assign_tiers(strengths, &cups);

    (0..n)
        .map(|i| {
            let q = playoff_probs[i];
            let cup = cups[i];
            let mut rounds = round_probs[i];
            // Downward: nothing survives a round more often than it
            // qualifies; each round no more often than the previous.
            rounds[0] = rounds[0].min(q);
            for r in 1..4 {
                rounds[r] = rounds[r].min(rounds[r - 1]);
            }
            if q < QUALIFICATION_FLOOR {
                rounds[3] = 0.0;
            }
            // Upward: the final cup mass is a lower bound on surviving
            // every round.
            rounds[3] = rounds[3].max(cup);
            for r in (0..3).rev() {
                rounds[r] = rounds[r].max(rounds[r + 1]);
            }
            EnsembleRow {
                cup_prob: cup,
                rounds,
                tier: tiers[i],
            }
        })
        .collect()
}

/// Scale `values` to sum exactly 1 while respecting per-entry caps.
fn normalize_capped(values: &mut [f64], caps: &[f64]) {
    let n = values.len();
    if n == 0 {
        return;
    }
    for (v, cap) in values.iter_mut().zip(caps) {
        *v = v.min(*cap);
    }
    if values.iter().sum::<f64>() <= 0.0 {
        // Degenerate input: spread the mass over whoever may hold any.
        let open: Vec<usize> = (0..n).filter(|i| caps[*i] > 0.0).collect();
        if open.is_empty() {
            return;
        }
        let share = 1.0 / open.len() as f64;
        for i in open {
            values[i] = share.min(caps[i]);
        }
    }

    let mut capped = vec![false; n];
    loop {
        let fixed_mass: f64 = (0..n).filter(|i| capped[*i]).map(|i| values[i]).sum();
        let free_mass: f64 = (0..n).filter(|i| !capped[*i]).map(|i| values[i]).sum();
        if free_mass <= 0.0 {
            break;
        }
        let scale = (1.0 - fixed_mass) / free_mass;
        let mut newly_capped = false;
        for i in 0..n {
            if capped[i] {
                continue;
            }
            if values[i] * scale > caps[i] {
                values[i] = caps[i];
                capped[i] = true;
                newly_capped = true;
            }
        }
        if newly_capped {
            continue;
        }
        for i in 0..n {
            if !capped[i] {
                values[i] *= scale;
            }
        }
        break;
    }

    // Put the float residue on the largest uncapped share so the sum is
    // exact.
    let sum: f64 = values.iter().sum();
    let residue = 1.0 - sum;
    if residue != 0.0 {
        let target = (0..n)
            .filter(|i| !capped[*i] || residue < 0.0)
            .max_by(|a, b| {
                values[*a]
                    .partial_cmp(&values[*b])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some(i) = target {
            values[i] = (values[i] + residue).clamp(0.0, caps[i]);
        }
    }
}

/// Percentile tiers on composite strength: 12.5% Elite, 25% Contender, 25%
/// Bubble, rest Longshot. Ties break by cup probability.
fn assign_tiers(strengths: &[f64], cups: &[f64]) -> Vec<Tier> {
    let n = strengths.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        strengths[b]
            .partial_cmp(&strengths[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                cups[b]
                    .partial_cmp(&cups[a])
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.cmp(&b))
    });

    let elite = (n as f64 * 0.125).round() as usize;
    let contender = (n as f64 * 0.25).round() as usize;
    let bubble = (n as f64 * 0.25).round() as usize;

    let mut tiers = vec![Tier::Longshot; n];
    for (position, team) in order.into_iter().enumerate() {
        tiers[team] = if position < elite {
            Tier::Elite
        } else if position < elite + contender {
            Tier::Contender
        } else if position < elite + contender + bubble {
            Tier::Bubble
        } else {
            Tier::Longshot
        };
    }
    tiers
}
