//! End-to-end scenarios against synthetic leagues.

mod common;

use common::{coin_flip_corpus, neutral_current, separable_corpus};
use puckcast::config::{BracketPolicy, PredictorConfig};
use puckcast::pipeline::Pipeline;
use puckcast::simulator::CancelToken;

fn config(seed: u64) -> PredictorConfig {
    PredictorConfig {
        num_trials: 10_000,
        seed: Some(seed),
        ..Default::default()
    }
}

#[test]
fn trivially_separable_league_concentrates_on_the_dominant_team() {
    let strong = "BOS";
    let training = separable_corpus(strong, 5);
    let pipeline = Pipeline::fit_from_records(&training, &[], &config(7), &CancelToken::new(), |_| {})
        .unwrap();

    let mut current = neutral_current("2024-2025");
    for t in &mut current {
        if t.team == strong {
            t.goals_for = 282;
            t.goals_against = 200;
        }
    }
    let output = pipeline.predict(&current, &CancelToken::new()).unwrap();

    let top = output
        .predictions
        .iter()
        .find(|p| p.team == strong)
        .unwrap();
    assert!(top.playoff_prob > 0.99, "playoff_prob {}", top.playoff_prob);
    assert!(top.cup_prob > 0.9, "cup_prob {}", top.cup_prob);

    let others: f64 = output
        .predictions
        .iter()
        .filter(|p| p.team != strong)
        .map(|p| p.cup_prob)
        .sum();
    assert!(others < 0.1, "others combined {others}");

    // Ranked output puts the dominant team first.
    assert_eq!(output.predictions[0].team, strong);
}

#[test]
fn coin_flip_league_is_uniform() {
    let training = coin_flip_corpus(4);
    let pipeline =
        Pipeline::fit_from_records(&training, &[], &config(13), &CancelToken::new(), |_| {})
            .unwrap();
    let current = neutral_current("2024-2025");
    let output = pipeline.predict(&current, &CancelToken::new()).unwrap();

    for p in &output.predictions {
        assert!(
            (p.playoff_prob - 0.5).abs() <= 0.05,
            "{}: playoff_prob {}",
            p.team,
            p.playoff_prob
        );
        assert!(
            (p.cup_prob - 1.0 / 32.0).abs() <= 0.01,
            "{}: cup_prob {}",
            p.team,
            p.cup_prob
        );
        assert!(p.cup_ci_lo < p.cup_prob && p.cup_prob < p.cup_ci_hi);
    }

    let cup_sum: f64 = output.predictions.iter().map(|p| p.cup_prob).sum();
    assert!((cup_sum - 1.0).abs() < 1e-6);
    let playoff_sum: f64 = output.predictions.iter().map(|p| p.playoff_prob).sum();
    assert!((playoff_sum - 16.0).abs() <= 1.5 + 1e-9);
}

#[test]
fn strength_perturbation_is_monotone() {
    let training = coin_flip_corpus(4);
    let pipeline =
        Pipeline::fit_from_records(&training, &[], &config(21), &CancelToken::new(), |_| {})
            .unwrap();

    let target = "DAL";
    let baseline = pipeline
        .predict(&neutral_current("2024-2025"), &CancelToken::new())
        .unwrap();
    let base_target = baseline
        .predictions
        .iter()
        .find(|p| p.team == target)
        .unwrap()
        .clone();

    // +0.5 goals per game of differential.
    let mut perturbed_current = neutral_current("2024-2025");
    for t in &mut perturbed_current {
        if t.team == target {
            t.goals_for += 41;
        }
    }
    let perturbed = pipeline
        .predict(&perturbed_current, &CancelToken::new())
        .unwrap();
    let new_target = perturbed
        .predictions
        .iter()
        .find(|p| p.team == target)
        .unwrap();

    assert!(
        new_target.strength > base_target.strength,
        "strength {} -> {}",
        base_target.strength,
        new_target.strength
    );
    assert!(
        new_target.cup_prob > base_target.cup_prob,
        "cup {} -> {}",
        base_target.cup_prob,
        new_target.cup_prob
    );

    // The rest of the league loses cup mass in aggregate, and nobody else
    // gains more than simulation noise.
    let others_before: f64 = baseline
        .predictions
        .iter()
        .filter(|p| p.team != target)
        .map(|p| p.cup_prob)
        .sum();
    let others_after: f64 = perturbed
        .predictions
        .iter()
        .filter(|p| p.team != target)
        .map(|p| p.cup_prob)
        .sum();
    assert!(others_after < others_before);
    for before in baseline.predictions.iter().filter(|p| p.team != target) {
        let after = perturbed
            .predictions
            .iter()
            .find(|p| p.team == before.team)
            .unwrap();
        assert!(
            after.cup_prob <= before.cup_prob + 0.02,
            "{} gained cup mass: {} -> {}",
            before.team,
            before.cup_prob,
            after.cup_prob
        );
    }
}

#[test]
fn bracket_policies_agree_on_a_flat_league() {
    let training = coin_flip_corpus(3);
    let current = neutral_current("2024-2025");

    for policy in [BracketPolicy::Divisional, BracketPolicy::ConferenceReseed] {
        let cfg = PredictorConfig {
            bracket_policy: policy,
            num_trials: 10_000,
            seed: Some(5),
            ..Default::default()
        };
        let pipeline =
            Pipeline::fit_from_records(&training, &[], &cfg, &CancelToken::new(), |_| {}).unwrap();
        let output = pipeline.predict(&current, &CancelToken::new()).unwrap();
        for p in &output.predictions {
            assert!(
                (p.cup_prob - 1.0 / 32.0).abs() <= 0.01,
                "{policy:?} {}: cup_prob {}",
                p.team,
                p.cup_prob
            );
        }
    }
}

#[test]
fn universal_prediction_invariants_hold() {
    let training = coin_flip_corpus(3);
    let pipeline =
        Pipeline::fit_from_records(&training, &[], &config(3), &CancelToken::new(), |_| {})
            .unwrap();
    let output = pipeline
        .predict(&neutral_current("2024-2025"), &CancelToken::new())
        .unwrap();

    for p in &output.predictions {
        assert!(0.0 <= p.cup_prob);
        assert!(p.cup_prob <= p.round4 + 1e-12);
        assert!(p.round4 <= p.round3 + 1e-12);
        assert!(p.round3 <= p.round2 + 1e-12);
        assert!(p.round2 <= p.round1 + 1e-12);
        assert!(p.round1 <= p.playoff_prob + 1e-12);
        assert!(p.playoff_prob <= 1.0);
    }

    let weights = pipeline.weights().named();
    let weight_sum: f64 = weights.values().sum();
    assert!((weight_sum - 1.0).abs() < 1e-9);
    assert!(weights.values().all(|w| *w >= 0.0));
}
