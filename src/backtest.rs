//! Leave-one-season-out validation: refit the full pipeline on every other
//! season, predict the held-out season blind, and score qualification
//! calibration plus champion ranking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calibration::{evaluate_probs, expected_calibration_error};
use crate::config::PredictorConfig;
use crate::data_loader::validate_training;
use crate::error::PredictorError;
use crate::linear::splitmix64;
use crate::pipeline::{Pipeline, PipelineProgress};
use crate::simulator::CancelToken;
use crate::team_season::{SeriesRecord, TeamSeason};

const CALIBRATION_BINS: usize = 10;
const TOP_K: [u32; 5] = [1, 3, 5, 8, 10];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonReport {
    pub season: String,
    pub teams: usize,
    pub qualification_positives: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub calibration_error: f64,
    pub champion: Option<String>,
    /// 1-based rank of the actual champion by predicted cup probability.
    pub champion_rank: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopKRecall {
    pub k: u32,
    pub recall: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestAggregate {
    pub seasons: usize,
    pub qualification_samples: usize,
    pub qualification_positives: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub calibration_error: f64,
    pub top_k_recall: Vec<TopKRecall>,
    pub mean_champion_rank: Option<f64>,
    pub median_champion_rank: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub seasons: Vec<SeasonReport>,
    pub aggregate: BacktestAggregate,
}

pub fn run_backtest(
    training: &[TeamSeason],
    series: &[SeriesRecord],
    config: &PredictorConfig,
    cancel: &CancelToken,
    mut on_progress: impl FnMut(PipelineProgress),
) -> Result<BacktestSummary, PredictorError> {
    config.validate()?;
    validate_training(training)?;

    let mut by_season: BTreeMap<&str, Vec<&TeamSeason>> = BTreeMap::new();
    for record in training {
        by_season
            .entry(record.season.as_str())
            .or_default()
            .push(record);
    }
    if by_season.len() < 2 {
        return Err(PredictorError::InsufficientData {
            detail: format!(
                "leave-one-season-out needs at least 2 seasons, found {}",
                by_season.len()
            ),
        });
    }

    let top_seed = config.seed.unwrap_or_else(rand::random);
    let season_ids: Vec<String> = by_season.keys().map(|s| (*s).to_string()).collect();
    let mut reports = Vec::with_capacity(season_ids.len());

    for (idx, season) in season_ids.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(PredictorError::Cancelled);
        }
        on_progress(PipelineProgress {
            stage: "backtest",
            current: idx + 1,
            total: season_ids.len(),
            message: format!("holding out {season}"),
        });

        let train_rows: Vec<TeamSeason> = training
            .iter()
            .filter(|t| t.season != *season)
            .cloned()
            .collect();
        let train_series: Vec<SeriesRecord> = series
            .iter()
            .filter(|s| s.season != *season)
            .cloned()
            .collect();
        let fold_config = PredictorConfig {
            seed: Some(splitmix64(top_seed ^ splitmix64(idx as u64))),
            ..config.clone()
        };

        let pipeline = Pipeline::fit_from_records(
            &train_rows,
            &train_series,
            &fold_config,
            cancel,
            |_| {},
        )?;

        let held_out = &by_season[season.as_str()];
        let blind: Vec<TeamSeason> = held_out
            .iter()
            .map(|t| {
                let mut t = (*t).clone();
                t.labels = None;
                t
            })
            .collect();
        let output = pipeline.predict(&blind, cancel)?;

        let mut playoff_probs = Vec::with_capacity(held_out.len());
        let mut qualified = Vec::with_capacity(held_out.len());
        for record in held_out {
            let labels = record.labels.ok_or_else(|| PredictorError::InsufficientData {
                detail: format!(
                    "held-out record {} {} has no outcome labels",
                    record.team, record.season
                ),
            })?;
            let predicted = output
                .predictions
                .iter()
                .find(|p| p.team == record.team)
                .map(|p| p.playoff_prob)
                .unwrap_or(0.0);
            playoff_probs.push(predicted);
            qualified.push(labels.qualified);
        }

        let metrics = evaluate_probs(&playoff_probs, &qualified);
        let ece = expected_calibration_error(&playoff_probs, &qualified, CALIBRATION_BINS);

        let champion = held_out
            .iter()
            .find(|t| t.labels.is_some_and(|l| l.won_cup))
            .map(|t| t.team.clone());
        let champion_rank = champion.as_ref().and_then(|code| {
            output
                .predictions
                .iter()
                .position(|p| p.team == *code)
                .map(|pos| pos as u32 + 1)
        });

        reports.push(SeasonReport {
            season: season.clone(),
            teams: held_out.len(),
            qualification_positives: metrics.positives,
            brier: metrics.brier,
            log_loss: metrics.log_loss,
            calibration_error: ece,
            champion,
            champion_rank,
        });
    }

    let aggregate = aggregate_reports(&reports);
    info!(
        seasons = aggregate.seasons,
        brier = aggregate.brier,
        "backtest complete"
    );
    Ok(BacktestSummary {
        seasons: reports,
        aggregate,
    })
}

fn aggregate_reports(reports: &[SeasonReport]) -> BacktestAggregate {
    let total_samples: usize = reports.iter().map(|r| r.teams).sum();
    let weighted = |value: fn(&SeasonReport) -> f64| -> f64 {
        if total_samples == 0 {
            return 0.0;
        }
        reports
            .iter()
            .map(|r| value(r) * r.teams as f64)
            .sum::<f64>()
            / total_samples as f64
    };

    let mut ranks: Vec<u32> = reports.iter().filter_map(|r| r.champion_rank).collect();
    ranks.sort_unstable();
    let ranked = ranks.len();

    let top_k_recall = TOP_K
        .iter()
        .map(|k| TopKRecall {
            k: *k,
            recall: if ranked == 0 {
                0.0
            } else {
                ranks.iter().filter(|r| **r <= *k).count() as f64 / ranked as f64
            },
        })
        .collect();

    let mean_champion_rank = (ranked > 0)
        .then(|| ranks.iter().map(|r| *r as f64).sum::<f64>() / ranked as f64);
    let median_champion_rank = (ranked > 0).then(|| {
        let mid = ranked / 2;
        if ranked % 2 == 0 {
            (ranks[mid - 1] as f64 + ranks[mid] as f64) / 2.0
        } else {
            ranks[mid] as f64
        }
    });

    BacktestAggregate {
        seasons: reports.len(),
        qualification_samples: total_samples,
        qualification_positives: reports.iter().map(|r| r.qualification_positives).sum(),
        brier: weighted(|r| r.brier),
        log_loss: weighted(|r| r.log_loss),
        calibration_error: weighted(|r| r.calibration_error),
        top_k_recall,
        mean_champion_rank,
        median_champion_rank,
    }
}
