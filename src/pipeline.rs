//! The fitted pipeline: one value carrying every learned artifact, fitted
//! once per training invocation and read-only at prediction time. No
//! ambient state; callers hold the `Pipeline` and pass it around.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backtest::BacktestSummary;
use crate::calibration::Isotonic;
use crate::config::PredictorConfig;
use crate::data_loader::{SeasonSource, validate_training};
use crate::ensemble::{self, Tier};
use crate::error::{PipelineWarning, PredictorError};
use crate::features::{FeatureBuilder, FeatureVector};
use crate::linear::splitmix64;
use crate::playoff_classifier::{PlayoffClassifier, shrink_to_slots};
use crate::series_model::{SeriesExample, SeriesModel};
use crate::simulator::{CancelToken, SimTeam, projected_fields, simulate};
use crate::team_season::{SeriesRecord, TeamSeason, normalize_team_code, validate_record};
use crate::weights::{LearnedWeights, WeightOptimizer, graded_outcome, recency_weights};

const SEED_TAG_SIMULATION: u64 = 0x51;
const SEED_TAG_CALIBRATION: u64 = 0xCA;

/// Reduced trial count for the per-season calibration simulations run
/// during fit.
const CALIBRATION_TRIALS_CAP: u64 = 2_000;

/// Structured progress events emitted to the caller instead of printing.
#[derive(Debug, Clone)]
pub struct PipelineProgress {
    pub stage: &'static str,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

/// One team's final prediction. Field names are the serialized contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub team: String,
    pub season: String,
    pub strength: f64,
    pub playoff_prob: f64,
    pub round1: f64,
    pub round2: f64,
    pub round3: f64,
    pub round4: f64,
    pub cup_prob: f64,
    pub cup_ci_lo: f64,
    pub cup_ci_hi: f64,
    pub tier: Tier,
}

/// A projected round-one series under deterministic seeding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedSeries {
    pub round: u8,
    pub higher_seed: String,
    pub lower_seed: String,
}

#[derive(Debug, Clone)]
pub struct PredictionOutput {
    pub predictions: Vec<Prediction>,
    pub projected_bracket: Vec<ProjectedSeries>,
    /// True when the simulation was cancelled and the tallies cover only
    /// the completed trials.
    pub partial: bool,
    pub completed_trials: u64,
}

/// The serialized top-level artifact handed to downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionArtifact {
    pub generated_at: String,
    pub model_version: String,
    pub season: String,
    pub weights: BTreeMap<String, f64>,
    pub warnings: Vec<String>,
    pub partial: bool,
    pub projected_bracket: Vec<ProjectedSeries>,
    pub predictions: Vec<Prediction>,
    pub backtest: Option<BacktestSummary>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PredictorConfig,
    seed: u64,
    builder: FeatureBuilder,
    weights: LearnedWeights,
    classifier: PlayoffClassifier,
    series: SeriesModel,
    cup_calibrator: Isotonic,
    warnings: Vec<PipelineWarning>,
}

impl Pipeline {
    pub fn fit(source: &dyn SeasonSource, config: &PredictorConfig) -> Result<Self, PredictorError> {
        Self::fit_with_progress(source, config, &CancelToken::new(), |_| {})
    }

    pub fn fit_with_progress(
        source: &dyn SeasonSource,
        config: &PredictorConfig,
        cancel: &CancelToken,
        on_progress: impl FnMut(PipelineProgress),
    ) -> Result<Self, PredictorError> {
        let training = source.load_training()?;
        let series = source.load_series()?;
        Self::fit_from_records(&training, &series, config, cancel, on_progress)
    }

    /// Fit every learned artifact from an already-loaded corpus. Used by
    /// the backtester to refit without re-reading storage.
    pub fn fit_from_records(
        training: &[TeamSeason],
        series_records: &[SeriesRecord],
        config: &PredictorConfig,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(PipelineProgress),
    ) -> Result<Self, PredictorError> {
        config.validate()?;
        validate_training(training)?;
        let seed = config.seed.unwrap_or_else(rand::random);

        let mut warnings = Vec::new();
        let mut stage = |name: &'static str, current: usize, message: String| {
            on_progress(PipelineProgress {
                stage: name,
                current,
                total: 6,
                message,
            });
        };

        check_cancel(cancel)?;
        stage("features", 1, format!("fitting transform on {} records", training.len()));
        let mut builder = FeatureBuilder::new();
        builder.fit(training)?;

        let mut features = Vec::with_capacity(training.len());
        let mut qualified = Vec::with_capacity(training.len());
        let mut graded = Vec::with_capacity(training.len());
        let mut won_cup = Vec::with_capacity(training.len());
        let mut seasons: Vec<&str> = Vec::with_capacity(training.len());
        for record in training {
            let labels = record.labels.ok_or_else(|| PredictorError::InsufficientData {
                detail: format!(
                    "training record {} {} has no outcome labels",
                    record.team, record.season
                ),
            })?;
            features.push(builder.transform(record)?);
            qualified.push(labels.qualified);
            graded.push(graded_outcome(
                labels.qualified,
                labels.reached_final,
                labels.won_cup,
            ));
            won_cup.push(labels.won_cup);
            seasons.push(record.season.as_str());
        }
        let sample_weights = recency_weights(
            &seasons,
            &won_cup,
            config.recency_decay_rate,
            config.cup_winner_boost,
        );

        check_cancel(cancel)?;
        stage("weights", 2, "fitting composite-strength weighting".to_string());
        let weights = WeightOptimizer::fit(&features, &graded, &sample_weights)?;

        check_cancel(cancel)?;
        stage("classifier", 3, "fitting qualification classifier".to_string());
        let mut classifier = PlayoffClassifier::new();
        if let Some(warning) = classifier.fit(&features, &qualified, &sample_weights)? {
            warnings.push(warning);
        }

        check_cancel(cancel)?;
        stage(
            "series",
            4,
            format!("fitting series model on {} series", series_records.len()),
        );
        let examples = join_series(training, &features, series_records);
        let mut series = SeriesModel::new();
        if let Some(warning) = series.fit(&examples, &weights)? {
            warnings.push(warning);
        }

        check_cancel(cancel)?;
        stage("calibration", 5, "simulating training seasons for cup calibration".to_string());
        let (cup_calibrator, warning) = fit_cup_calibration(
            training,
            &features,
            &weights,
            &classifier,
            &series,
            config,
            seed,
            cancel,
        )?;
        if let Some(warning) = warning {
            warnings.push(warning);
        }

        stage("done", 6, "pipeline fitted".to_string());
        info!(
            records = training.len(),
            series = examples.len(),
            warnings = warnings.len(),
            "pipeline fit complete"
        );

        Ok(Self {
            config: config.clone(),
            seed,
            builder,
            weights,
            classifier,
            series,
            cup_calibrator,
            warnings,
        })
    }

    pub fn weights(&self) -> &LearnedWeights {
        &self.weights
    }

    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn predict(
        &self,
        current: &[TeamSeason],
        cancel: &CancelToken,
    ) -> Result<PredictionOutput, PredictorError> {
        self.predict_with_progress(current, cancel, |_| {})
    }

    pub fn predict_with_progress(
        &self,
        current: &[TeamSeason],
        cancel: &CancelToken,
        mut on_progress: impl FnMut(PipelineProgress),
    ) -> Result<PredictionOutput, PredictorError> {
        validate_prediction_set(current)?;
        check_cancel(cancel)?;

        let season = current[0].season.clone();
        on_progress(PipelineProgress {
            stage: "score",
            current: 1,
            total: 3,
            message: format!("scoring {} teams for {season}", current.len()),
        });

        let features: Vec<FeatureVector> = current
            .iter()
            .map(|t| self.builder.transform(t))
            .collect::<Result<_, _>>()?;
        let strengths: Vec<f64> = features.iter().map(|f| self.weights.score(f)).collect();
        let mut playoff_probs = Vec::with_capacity(current.len());
        for f in &features {
            playoff_probs.push(self.classifier.predict_proba(f)?);
        }
        shrink_to_slots(&mut playoff_probs);

        let sim_teams: Vec<SimTeam> = current
            .iter()
            .enumerate()
            .map(|(i, t)| SimTeam {
                conference: t.conference,
                division: t.division,
                strength: strengths[i],
                experience: features[i].get(crate::features::IDX_PLAYOFF_EXPERIENCE),
                playoff_prob: playoff_probs[i],
            })
            .collect();

        check_cancel(cancel)?;
        on_progress(PipelineProgress {
            stage: "simulate",
            current: 2,
            total: 3,
            message: format!("{} Monte Carlo trials", self.config.num_trials),
        });
        let sim = simulate(
            &sim_teams,
            &self.series,
            self.config.bracket_policy,
            self.config.num_trials,
            component_seed(self.seed, SEED_TAG_SIMULATION),
            cancel,
        )?;
        if sim.partial {
            warn!(
                completed = sim.completed_trials,
                requested = sim.requested_trials,
                "simulation cancelled, emitting partial tallies"
            );
        }

        let rows = ensemble::finalize(
            &strengths,
            &playoff_probs,
            &sim.round_probs,
            &self.cup_calibrator,
        );

        let mut predictions: Vec<Prediction> = (0..current.len())
            .map(|i| {
                let half_width = sim.ci_half_width(rows[i].cup_prob);
                Prediction {
                    team: current[i].team.clone(),
                    season: season.clone(),
                    strength: strengths[i],
                    playoff_prob: playoff_probs[i],
                    round1: rows[i].rounds[0],
                    round2: rows[i].rounds[1],
                    round3: rows[i].rounds[2],
                    round4: rows[i].rounds[3],
                    cup_prob: rows[i].cup_prob,
                    cup_ci_lo: (rows[i].cup_prob - half_width).max(0.0),
                    cup_ci_hi: (rows[i].cup_prob + half_width).min(1.0),
                    tier: rows[i].tier,
                }
            })
            .collect();
        predictions.sort_by(|a, b| {
            b.cup_prob
                .partial_cmp(&a.cup_prob)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.strength
                        .partial_cmp(&a.strength)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.team.cmp(&b.team))
        });

        on_progress(PipelineProgress {
            stage: "finalize",
            current: 3,
            total: 3,
            message: "predictions ready".to_string(),
        });

        let projected_bracket = projected_fields(&sim_teams)?
            .into_iter()
            .flat_map(|(_, field)| {
                let s = field.slots;
                [(s[0], s[1]), (s[2], s[3]), (s[4], s[5]), (s[6], s[7])]
            })
            .map(|(higher, lower)| ProjectedSeries {
                round: 1,
                higher_seed: current[higher].team.clone(),
                lower_seed: current[lower].team.clone(),
            })
            .collect();

        Ok(PredictionOutput {
            predictions,
            projected_bracket,
            partial: sim.partial,
            completed_trials: sim.completed_trials,
        })
    }

    /// Assemble the serialized artifact. The timestamp is caller-supplied
    /// so seeded runs serialize byte-identically.
    pub fn artifact(
        &self,
        season: &str,
        output: &PredictionOutput,
        generated_at: &str,
        backtest: Option<BacktestSummary>,
    ) -> PredictionArtifact {
        let mut warnings: Vec<String> = self.warnings.iter().map(|w| w.to_string()).collect();
        if output.partial {
            warnings.push(
                PipelineWarning::PartialSimulation {
                    completed_trials: output.completed_trials,
                }
                .to_string(),
            );
        }
        PredictionArtifact {
            generated_at: generated_at.to_string(),
            model_version: env!("CARGO_PKG_VERSION").to_string(),
            season: season.to_string(),
            weights: self.weights.named(),
            warnings,
            partial: output.partial,
            projected_bracket: output.projected_bracket.clone(),
            predictions: output.predictions.clone(),
            backtest,
        }
    }
}

fn check_cancel(cancel: &CancelToken) -> Result<(), PredictorError> {
    if cancel.is_cancelled() {
        Err(PredictorError::Cancelled)
    } else {
        Ok(())
    }
}

fn component_seed(top: u64, tag: u64) -> u64 {
    splitmix64(top ^ splitmix64(tag))
}

/// The prediction set may be any complete field (the backtester feeds
/// historical seasons); the strict 32-team rule lives on the current-season
/// load path.
fn validate_prediction_set(current: &[TeamSeason]) -> Result<(), PredictorError> {
    if current.is_empty() {
        return Err(PredictorError::InsufficientData {
            detail: "no teams to predict".to_string(),
        });
    }
    let season = &current[0].season;
    let mut seen = std::collections::HashSet::new();
    for record in current {
        if record.season != *season {
            return Err(PredictorError::malformed(
                &record.season,
                &record.team,
                format!("prediction set mixes seasons ({season} and {})", record.season),
            ));
        }
        if !seen.insert(record.team.clone()) {
            return Err(PredictorError::IdentifierConflict {
                season: record.season.clone(),
                team: record.team.clone(),
            });
        }
        validate_record(record)?;
    }
    Ok(())
}

/// Join historical series onto the training corpus by (season, team code).
fn join_series(
    training: &[TeamSeason],
    features: &[FeatureVector],
    series_records: &[SeriesRecord],
) -> Vec<SeriesExample> {
    let mut index: std::collections::HashMap<(&str, String), usize> =
        std::collections::HashMap::new();
    for (i, record) in training.iter().enumerate() {
        index.insert((record.season.as_str(), record.team.clone()), i);
    }

    let mut out = Vec::with_capacity(series_records.len());
    for series in series_records {
        let higher = index
            .get(&(series.season.as_str(), normalize_team_code(&series.higher_seed)))
            .copied();
        let lower = index
            .get(&(series.season.as_str(), normalize_team_code(&series.lower_seed)))
            .copied();
        match (higher, lower) {
            (Some(h), Some(l)) => out.push(SeriesExample {
                higher: features[h],
                lower: features[l],
                round: series.round,
                higher_won: series.higher_seed_won,
            }),
            _ => warn!(
                season = %series.season,
                higher = %series.higher_seed,
                lower = %series.lower_seed,
                "series references a team-season outside the corpus, skipping"
            ),
        }
    }
    out
}

/// Run a reduced-trial simulation for each training season and fit the cup
/// calibrator on (gated simulated cup, won cup) pairs.
#[allow(clippy::too_many_arguments)]
fn fit_cup_calibration(
    training: &[TeamSeason],
    features: &[FeatureVector],
    weights: &LearnedWeights,
    classifier: &PlayoffClassifier,
    series: &SeriesModel,
    config: &PredictorConfig,
    seed: u64,
    cancel: &CancelToken,
) -> Result<(Isotonic, Option<PipelineWarning>), PredictorError> {
    let mut by_season: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, record) in training.iter().enumerate() {
        by_season.entry(record.season.as_str()).or_default().push(i);
    }

    let trials = config.num_trials.min(CALIBRATION_TRIALS_CAP);
    let mut scores = Vec::with_capacity(training.len());
    let mut outcomes = Vec::with_capacity(training.len());

    for (season_idx, (_season, members)) in by_season.iter().enumerate() {
        check_cancel(cancel)?;
        let mut playoff_probs = Vec::with_capacity(members.len());
        for i in members {
            playoff_probs.push(classifier.predict_proba(&features[*i])?);
        }
        shrink_to_slots(&mut playoff_probs);

        let sim_teams: Vec<SimTeam> = members
            .iter()
            .enumerate()
            .map(|(slot, i)| SimTeam {
                conference: training[*i].conference,
                division: training[*i].division,
                strength: weights.score(&features[*i]),
                experience: features[*i].get(crate::features::IDX_PLAYOFF_EXPERIENCE),
                playoff_prob: playoff_probs[slot],
            })
            .collect();

        let sim = simulate(
            &sim_teams,
            series,
            config.bracket_policy,
            trials,
            component_seed(seed, SEED_TAG_CALIBRATION + season_idx as u64),
            cancel,
        )?;

        for (slot, i) in members.iter().enumerate() {
            let gated =
                ensemble::gate_cup_probability(sim.round_probs[slot][3], playoff_probs[slot]);
            scores.push(gated);
            outcomes.push(training[*i].labels.map(|l| l.won_cup).unwrap_or(false));
        }
    }

    Ok(ensemble::fit_cup_calibrator(&scores, &outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BracketPolicy;
    use crate::data_loader::MemorySource;
    use crate::test_fixtures::spread_corpus;

    fn test_config() -> PredictorConfig {
        PredictorConfig {
            num_trials: 1_000,
            seed: Some(42),
            ..Default::default()
        }
    }

    fn source_with_seasons(n: u32) -> MemorySource {
        let training = spread_corpus(n);
        let mut current = spread_corpus(1);
        let season = format!("{}-{}", 2015 + n, 2016 + n);
        for t in &mut current {
            t.season = season.clone();
            t.labels = None;
        }
        MemorySource {
            training,
            current,
            series: Vec::new(),
        }
    }

    #[test]
    fn fit_and_predict_satisfy_core_invariants() {
        let source = source_with_seasons(3);
        let config = test_config();
        let pipeline = Pipeline::fit(&source, &config).unwrap();
        let current = source.load_current("2018-2019").unwrap();
        let output = pipeline.predict(&current, &CancelToken::new()).unwrap();

        assert_eq!(output.predictions.len(), 32);
        assert!(!output.partial);

        let cup_sum: f64 = output.predictions.iter().map(|p| p.cup_prob).sum();
        assert!((cup_sum - 1.0).abs() < 1e-6);

        let playoff_sum: f64 = output.predictions.iter().map(|p| p.playoff_prob).sum();
        assert!((playoff_sum - 16.0).abs() <= 1.5 + 1e-9);

        for p in &output.predictions {
            assert!(p.cup_prob <= p.round4 + 1e-12);
            assert!(p.round4 <= p.round3 + 1e-12);
            assert!(p.round3 <= p.round2 + 1e-12);
            assert!(p.round2 <= p.round1 + 1e-12);
            assert!(p.round1 <= p.playoff_prob + 1e-12);
            assert!(p.cup_ci_lo <= p.cup_prob && p.cup_prob <= p.cup_ci_hi);
        }

        // Ranked output: cup probability non-increasing.
        for pair in output.predictions.windows(2) {
            assert!(pair[0].cup_prob >= pair[1].cup_prob);
        }

        assert_eq!(output.projected_bracket.len(), 8);

        // The empty series history shows up as a warning.
        assert!(pipeline
            .warnings()
            .iter()
            .any(|w| matches!(w, PipelineWarning::SeriesHistoryEmpty)));
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let source = source_with_seasons(2);
        let config = test_config();
        let current = source.load_current("2017-2018").unwrap();

        let a = Pipeline::fit(&source, &config).unwrap();
        let out_a = a.predict(&current, &CancelToken::new()).unwrap();
        let b = Pipeline::fit(&source, &config).unwrap();
        let out_b = b.predict(&current, &CancelToken::new()).unwrap();

        assert_eq!(out_a.predictions, out_b.predictions);
        let art_a = a.artifact("2017-2018", &out_a, "2026-01-01T00:00:00Z", None);
        let art_b = b.artifact("2017-2018", &out_b, "2026-01-01T00:00:00Z", None);
        assert_eq!(
            serde_json::to_string(&art_a).unwrap(),
            serde_json::to_string(&art_b).unwrap()
        );
    }

    #[test]
    fn both_policies_run_to_completion() {
        let source = source_with_seasons(2);
        let current = source.load_current("2017-2018").unwrap();
        for policy in [BracketPolicy::Divisional, BracketPolicy::ConferenceReseed] {
            let config = PredictorConfig {
                bracket_policy: policy,
                ..test_config()
            };
            let pipeline = Pipeline::fit(&source, &config).unwrap();
            let output = pipeline.predict(&current, &CancelToken::new()).unwrap();
            let cup_sum: f64 = output.predictions.iter().map(|p| p.cup_prob).sum();
            assert!((cup_sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn cancellation_before_fit_components_aborts() {
        let source = source_with_seasons(2);
        let config = test_config();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err =
            Pipeline::fit_with_progress(&source, &config, &cancel, |_| {}).unwrap_err();
        assert!(matches!(err, PredictorError::Cancelled));
    }

    #[test]
    fn unlabeled_training_record_is_rejected() {
        let mut source = source_with_seasons(2);
        source.training[0].labels = None;
        let err = Pipeline::fit(&source, &test_config()).unwrap_err();
        assert!(matches!(err, PredictorError::InsufficientData { .. }));
    }
}
